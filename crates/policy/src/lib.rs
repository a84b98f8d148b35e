//! Approval policy for tool calls.
//!
//! Core principle: **side effects are confirmed by a human unless the policy
//! says otherwise.** Inspection is always allowed; file writes and command
//! execution are allowed, refused, or escalated to a human depending on the
//! configured [`Policy`].

mod capability;
mod error;
mod policy;

pub use capability::{CapabilityKind, CapabilityRequest};
pub use error::{Error, Result};
pub use policy::{AllowRules, Decision, DenyRules, Policy};
