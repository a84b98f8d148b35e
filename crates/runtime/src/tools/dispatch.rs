//! Running a handler with a deadline.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use super::{ToolError, ToolHandler, ToolOutput};

/// Run `handler` on its own task, bounded by `limit`.
///
/// Panics and timeouts come back as [`ToolError`]s. A timed-out task is
/// aborted, which only takes effect at its next await point.
pub(crate) async fn invoke(
    handler: Arc<dyn ToolHandler>,
    params: Value,
    limit: Duration,
) -> Result<ToolOutput, ToolError> {
    let mut task = tokio::spawn(async move { handler.call(params).await });

    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join)) if join.is_panic() => {
            let message = panic_message(join.into_panic());
            warn!(panic = %message, "tool handler panicked");
            Err(ToolError::Panicked(message))
        }
        Ok(Err(join)) => Err(ToolError::Execution(format!("handler task cancelled: {join}"))),
        Err(_) => {
            task.abort();
            let ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            warn!(timeout_ms = ms, "tool handler timed out");
            Err(ToolError::Timeout(ms))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
