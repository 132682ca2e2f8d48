use super::traits::{TraceEvent, TraceSink};

/// Discards every event. Used when `observability.backend = "none"`.
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn record(&self, _event: &TraceEvent) {}

    fn name(&self) -> &str {
        "none"
    }
}
