//! Provider connection: handshake, tool discovery and invocation.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, Incoming, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId, Tool,
};

/// Default timeout for a single request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum size of one message line (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// How to launch a provider process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-request timeout in seconds; [`DEFAULT_TIMEOUT`] when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Io {
    reader: Reader,
    writer: Writer,
}

/// A connection to one tool provider.
///
/// Requests are serialized: each request holds the connection until its
/// response (or a timeout) arrives. A request abandoned partway through a
/// message leaves the stream out of sync, so the client then refuses further
/// requests with [`Error::ConnectionBroken`].
pub struct Client {
    name: String,
    io: Mutex<Io>,
    process: Mutex<Option<Child>>,
    next_id: AtomicI64,
    initialized: AtomicBool,
    broken: AtomicBool,
    server_info: Mutex<Option<InitializeResult>>,
    timeout: Duration,
}

impl Client {
    /// Wrap an already-open byte stream pair.
    pub fn new(
        name: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            io: Mutex::new(Io {
                reader: Box::new(BufReader::new(reader)),
                writer: Box::new(writer),
            }),
            process: Mutex::new(None),
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            server_info: Mutex::new(None),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spawn a provider process speaking over stdio.
    pub async fn spawn(config: ServerConfig) -> Result<Self> {
        let timeout = config.request_timeout();
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(|source| Error::Spawn {
            command: config.command.clone(),
            source,
        })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("failed to capture stdin")))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("failed to capture stdout")))?;

        let client = Self::new(config.name, stdout, stdin).with_timeout(timeout);
        *client.process.lock().await = Some(process);
        Ok(client)
    }

    /// Spawn a provider process and complete the handshake.
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        let client = Self::spawn(config).await?;
        client.initialize().await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the `initialize` handshake. Must precede tool calls.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let result: InitializeResult = self
            .request("initialize", Some(InitializeParams::default()))
            .await?;
        self.notify("notifications/initialized").await?;

        debug!(
            provider = %self.name,
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "provider initialized"
        );
        *self.server_info.lock().await = Some(result.clone());
        self.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    /// Whether an interrupted exchange left the stream unusable.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().await.clone()
    }

    /// Fetch every tool the provider advertises, following pagination.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let page: ListToolsResult = self.request("tools/list", params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// Invoke a tool. A result flagged `isError` becomes [`Error::ToolCallFailed`].
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        self.ensure_initialized()?;

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            return Err(Error::ToolCallFailed(result.text()));
        }
        Ok(result)
    }

    /// Whether the provider process (if any) is still alive.
    pub async fn is_running(&self) -> bool {
        match self.process.lock().await.as_mut() {
            Some(process) => matches!(process.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Terminate the provider process. Best effort.
    pub async fn shutdown(&self) {
        if let Some(mut process) = self.process.lock().await.take() {
            let _ = process.kill().await;
        }
        self.initialized.store(false, Ordering::SeqCst);
    }

    // --- Internal methods ---

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        if self.is_broken() {
            return Err(Error::ConnectionBroken);
        }
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p)?;
        }

        let mut io = self.io.lock().await;
        write_message(&mut io.writer, &request).await?;

        let response = match timeout(self.timeout, read_response(&mut io, &id, &self.name)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e @ Error::OutputTooLarge { .. })) => {
                self.mark_broken();
                return Err(e);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                self.mark_broken();
                return Err(Error::Timeout(self.timeout));
            }
        };

        let value = response.into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    fn mark_broken(&self) {
        warn!(provider = %self.name, "connection out of sync, refusing further requests");
        self.broken.store(true, Ordering::SeqCst);
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let notification = JsonRpcRequest::notification(method);
        let mut io = self.io.lock().await;
        write_message(&mut io.writer, &notification).await
    }
}

async fn write_message(writer: &mut Writer, message: &impl Serialize) -> Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read lines until the response for `id` shows up.
///
/// Notifications are dropped; server-initiated requests are refused so the
/// provider does not wait on us.
async fn read_response(io: &mut Io, id: &RequestId, provider: &str) -> Result<JsonRpcResponse> {
    loop {
        let Some(line) = read_line_limited(&mut io.reader, MAX_OUTPUT_SIZE).await? else {
            return Err(Error::ServerExited);
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<Incoming>(&line)? {
            Incoming::Response(response) if &response.id == id => return Ok(response),
            Incoming::Response(response) => {
                warn!(provider, stale = ?response.id, expected = ?id, "dropping stale response");
            }
            Incoming::Request(request) => match request.id {
                Some(request_id) => {
                    let refusal = JsonRpcResponse::failure(
                        request_id,
                        JsonRpcError::new(
                            JsonRpcError::METHOD_NOT_FOUND,
                            format!("client does not handle {}", request.method),
                        ),
                    );
                    write_message(&mut io.writer, &refusal).await?;
                }
                None => debug!(provider, method = %request.method, "ignoring notification"),
            },
        }
    }
}

/// Read one line, failing as soon as it grows past `max` bytes instead of
/// buffering the whole thing. `None` at end of stream.
async fn read_line_limited(reader: &mut Reader, max: usize) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((!line.is_empty()).then_some(line));
        }
        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (end + 1, true),
            None => (available.len(), false),
        };
        if line.len() + used > max {
            return Err(Error::OutputTooLarge {
                size: line.len() + used,
                max,
            });
        }
        line.extend_from_slice(&available[..used]);
        reader.consume(used);
        if complete {
            return Ok(Some(line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults_env_and_args() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"name":"fs","command":"mcp-fs"}"#).unwrap();
        assert_eq!(config.name, "fs");
        assert!(config.args.is_empty());
        assert!(config.env.is_empty());
        assert_eq!(config.request_timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn server_config_timeout_override() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"name":"fs","command":"mcp-fs","timeout_secs":300}"#).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn spawned_client_uses_configured_timeout() {
        let client = Client::spawn(ServerConfig {
            name: "cat".into(),
            command: "cat".into(),
            timeout_secs: Some(300),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(300));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn lines_are_read_up_to_the_limit() {
        let mut reader: Reader = Box::new(BufReader::new(&b"{}\nabcdef\n"[..]));
        assert_eq!(
            read_line_limited(&mut reader, 16).await.unwrap(),
            Some(b"{}\n".to_vec())
        );
        let err = read_line_limited(&mut reader, 4).await.unwrap_err();
        assert!(matches!(err, Error::OutputTooLarge { max: 4, .. }));
    }

    #[tokio::test]
    async fn end_of_stream_is_none() {
        let mut reader: Reader = Box::new(BufReader::new(&b""[..]));
        assert_eq!(read_line_limited(&mut reader, 16).await.unwrap(), None);
    }

    #[tokio::test]
    async fn calls_before_initialize_are_rejected() {
        let (client_side, _server_side) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(client_side);
        let client = Client::new("test", reader, writer);

        assert!(matches!(client.list_tools().await, Err(Error::NotInitialized)));
        assert!(matches!(
            client.call_tool("x", None).await,
            Err(Error::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn closed_stream_reports_exit() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        drop(server_side);
        let (reader, writer) = tokio::io::split(client_side);
        let client = Client::new("test", reader, writer);

        let err = client.initialize().await.unwrap_err();
        // Writing may fail first with a broken pipe, or the read sees EOF.
        assert!(matches!(err, Error::ServerExited | Error::Io(_)));
    }
}
