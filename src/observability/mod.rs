//! Observability backends for model-call traces.

pub mod jsonl;
pub mod log;
pub mod noop;
pub mod traits;

pub use jsonl::JsonlTraceSink;
pub use log::LogTraceSink;
pub use noop::NoopTraceSink;
pub use traits::{TraceEvent, TraceSink};

use crate::config::{resolve_path, ObservabilityConfig};
use std::path::Path;
use std::sync::Arc;

/// Factory: create the configured trace sink.
///
/// Unknown backends fall back to `none` with a warning; `Config::validate`
/// rejects them before this point in normal startup.
pub fn create_trace_sink(config: &ObservabilityConfig, workspace_dir: &Path) -> Arc<dyn TraceSink> {
    match config.backend.as_str() {
        "log" => Arc::new(LogTraceSink),
        "jsonl" => {
            let path = resolve_path(workspace_dir, &config.trace_path);
            tracing::debug!(path = %path.display(), "JSONL trace sink enabled");
            Arc::new(JsonlTraceSink::new(path, config.trace_max_entries))
        }
        "none" => Arc::new(NoopTraceSink),
        other => {
            tracing::warn!(backend = other, "Unknown observability backend, tracing disabled");
            Arc::new(NoopTraceSink)
        }
    }
}
