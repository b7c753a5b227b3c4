//! [`RecordSink`] that writes records through `tracing`.
//!
//! Each record becomes a single `info` event on the `request_curl` target, so a subscriber
//! can route curl records to their own file or stream with an ordinary target filter
//! (for example `RUST_LOG=request_curl=info`).

use tracing::info;

use crate::{Record, RecordSink, SinkError};

/// Target used for record events.
pub const RECORD_TARGET: &str = "request_curl";

/// Writes every record as a structured `tracing` event.
///
/// The event message is the record's display form (command, then outcome), and the
/// correlation id, status, and duration are attached as fields.
///
/// # Examples
///
/// ```rust,no_run
/// use request_curl::{CurlLoggerConfig, LoggingSink, RequestCurlLayer};
///
/// # #[tokio::main]
/// # async fn main() {
/// let layer = RequestCurlLayer::new(CurlLoggerConfig::default(), LoggingSink);
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

impl RecordSink for LoggingSink {
    async fn write(&self, record: Record) -> Result<(), SinkError> {
        let status = match &record.outcome {
            crate::Outcome::Response { status, .. } => Some(*status),
            crate::Outcome::Error(_) => None,
        };
        info!(
            target: RECORD_TARGET,
            correlation_id = %record.correlation_id,
            status = ?status,
            error = record.outcome.is_error(),
            duration_ms = record.duration.as_millis() as u64,
            "{record}"
        );
        Ok(())
    }
}
