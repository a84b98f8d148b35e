//! SQLite-backed audit log for capstan sessions.
//!
//! Every orchestration session leaves a trail here: when it started and on
//! what task, every tool call that was dispatched and what came back, every
//! approval that was asked for and how it was answered, and how the session
//! ended. The log answers "why did the agent do that?" after the fact.
//!
//! # Core Concepts
//!
//! - [`EventStore`] wraps a SQLite database; it appends events and answers
//!   session queries.
//! - [`Event`] is one entry: id, session, timestamp and an [`EventKind`].
//! - [`SessionSummary`] is derived from a session's events for listings.
//!
//! # Example
//!
//! ```no_run
//! use storage::{Event, EventKind, EventStore, SessionId};
//!
//! let store = EventStore::open("events.db")?;
//!
//! let session_id = SessionId::new();
//! store.append(&Event::new(session_id, EventKind::SessionStart { task: "tidy up".into() }))?;
//!
//! for event in store.load_session(session_id, None)? {
//!     println!("{}: {}", event.timestamp, event.kind.name());
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod store;

pub use error::{Error, Result};
pub use event::{Event, EventKind, SessionId};
pub use store::{EventStore, SessionSummary};
