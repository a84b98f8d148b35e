//! Conversation transcript types.
//!
//! Messages are shared as `Arc<Message>` so that rewriting the tail of a
//! transcript leaves every earlier message pointer-identical.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Progress of a tool invocation embedded in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum InvocationState {
    /// Arguments are still streaming in.
    PartialCall,
    /// The model asked for the call; nothing decided yet.
    Call,
    /// A value sits in the result slot: either a decision sentinel or the
    /// final result.
    Result { result: Value },
}

/// A tool call requested by the model, as it appears in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(flatten)]
    pub state: InvocationState,
}

impl ToolInvocation {
    pub fn result(&self) -> Option<&Value> {
        match &self.state {
            InvocationState::Result { result } => Some(result),
            _ => None,
        }
    }
}

/// A part of a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolInvocation {
        tool_invocation: ToolInvocation,
    },
}

impl Part {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text { text: s.into() }
    }

    pub fn invocation(invocation: ToolInvocation) -> Self {
        Self::ToolInvocation {
            tool_invocation: invocation,
        }
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            role,
            parts,
        }
    }

    /// Combined text content.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolInvocation { tool_invocation } => Some(tool_invocation),
            _ => None,
        })
    }
}

pub type Transcript = Vec<Arc<Message>>;

/// Parse a JSON array of messages.
pub fn parse(json: &str) -> Result<Transcript> {
    let messages: Vec<Message> = serde_json::from_str(json)?;
    Ok(messages.into_iter().map(Arc::new).collect())
}

/// Serialize a transcript back to pretty JSON.
pub fn to_json(transcript: &[Arc<Message>]) -> Result<String> {
    let messages: Vec<&Message> = transcript.iter().map(|m| m.as_ref()).collect();
    Ok(serde_json::to_string_pretty(&messages)?)
}
