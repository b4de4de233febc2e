//! Daemon-wide error taxonomy. Every variant here ends up converted into a
//! response envelope at the Dispatcher boundary; none of these are allowed
//! to unwind past it.

use parallite_protocol::{envelope::EnvelopeError, DecodeError, FramingError};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("malformed envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("worker io error: {0}")]
    WorkerIo(String),
    #[error("worker crashed: {0}")]
    WorkerCrash(String),
    #[error("task timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("daemon shutting down")]
    Shutdown,
}

impl TaskError {
    /// The human-readable message placed in a synthesized `Response::error`.
    pub fn as_response_message(&self) -> String {
        match self {
            TaskError::WorkerIo(detail) => format!("worker execute failed: {detail}"),
            TaskError::WorkerCrash(detail) => format!("worker execute failed: {detail}"),
            other => other.to_string(),
        }
    }
}
