use super::traits::{TraceEvent, TraceSink};

/// Emits each event as a structured `tracing` record.
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn record(&self, event: &TraceEvent) {
        if event.success {
            tracing::info!(
                target: "prdgen::trace",
                session_id = %event.session_id,
                template = %event.template,
                model = %event.model,
                input_chars = event.input.chars().count(),
                output_chars = event.output.as_deref().map_or(0, |o| o.chars().count()),
                duration_ms = event.duration_ms(),
                "model call completed"
            );
        } else {
            tracing::warn!(
                target: "prdgen::trace",
                session_id = %event.session_id,
                template = %event.template,
                model = %event.model,
                error = event.error.as_deref().unwrap_or(""),
                duration_ms = event.duration_ms(),
                "model call failed"
            );
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
