//! SQLite event store implementation.

use crate::{Event, EventKind, Result, SessionId};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

/// Summary of one session, derived from its events.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub tool_calls: usize,
    pub final_status: Option<String>,
}

/// SQLite-backed event store.
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open or create an event store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory event store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_session
                ON events(session_id, kind);
            "#,
        )?;
        Ok(())
    }

    /// Append an event to the store.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events (id, session_id, timestamp, kind, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id.to_string(),
                event.session_id.to_string(),
                event.timestamp.to_rfc3339(),
                event.kind.name(),
                serde_json::to_string(&event.kind)?,
            ],
        )?;
        Ok(())
    }

    /// Load the events of a session in insertion order, optionally filtered
    /// by kind name (`tool_call`, `tool_result`, ...).
    pub fn load_session(&self, session_id: SessionId, kind: Option<&str>) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, data FROM events
             WHERE session_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY rowid",
        )?;

        let rows = stmt.query_map(params![session_id.to_string(), kind], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp, data) = row?;
            events.push(Event {
                id: id.parse().map_err(|e| crate::Error::Corrupt(format!("event id: {e}")))?,
                session_id,
                timestamp: parse_timestamp(&timestamp)?,
                kind: serde_json::from_str(&data)?,
            });
        }
        Ok(events)
    }

    /// List sessions, most recently started first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id,
                    MIN(timestamp),
                    SUM(CASE WHEN kind = 'tool_call' THEN 1 ELSE 0 END)
             FROM events
             GROUP BY session_id
             ORDER BY MIN(rowid) DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (session_id, started_at, tool_calls) = row?;
            let id: SessionId = session_id
                .parse()
                .map_err(|e| crate::Error::Corrupt(format!("session id: {e}")))?;

            let task = match self.latest(id, "session_start")? {
                Some((_, EventKind::SessionStart { task })) => task,
                _ => String::new(),
            };
            let (ended_at, final_status) = match self.latest(id, "session_end")? {
                Some((at, EventKind::SessionEnd { status, .. })) => (Some(at), Some(status)),
                _ => (None, None),
            };

            summaries.push(SessionSummary {
                id,
                task,
                started_at: parse_timestamp(&started_at)?,
                ended_at,
                tool_calls: usize::try_from(tool_calls).unwrap_or_default(),
                final_status,
            });
        }
        Ok(summaries)
    }

    fn latest(&self, session_id: SessionId, kind: &str) -> Result<Option<(DateTime<Utc>, EventKind)>> {
        let row = self
            .conn
            .query_row(
                "SELECT timestamp, data FROM events
                 WHERE session_id = ?1 AND kind = ?2
                 ORDER BY rowid DESC LIMIT 1",
                params![session_id.to_string(), kind],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((timestamp, data)) => Ok(Some((
                parse_timestamp(&timestamp)?,
                serde_json::from_str(&data)?,
            ))),
            None => Ok(None),
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| crate::Error::Corrupt(format!("timestamp {raw:?}: {e}")))
}
