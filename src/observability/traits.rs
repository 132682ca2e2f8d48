use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One model call as seen by an observability backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub session_id: String,
    pub template: String,
    pub model: String,
    /// Filled prompt sent as the final user message.
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
}

impl TraceEvent {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Receiver of trace events.
///
/// Recording must never fail the caller: backends log their own I/O errors
/// and carry on.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent);

    /// The name of this backend.
    fn name(&self) -> &str;
}
