//! Error types for keyq.
//!
//! [`Error`] covers setup and I/O around the engine. [`ProcessError`] is the
//! per-item failure a task processor reports back to its worker; it never
//! escapes the worker loop.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single work item failed to process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// The completion call failed.
    #[error("completion failed: {0}")]
    Completion(String),

    /// Delivery failed before anything reached the recipient.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Delivery failed after some chunks were already sent.
    #[error("delivery failed after {delivered}/{total} chunks: {reason}")]
    PartialDelivery {
        delivered: usize,
        total: usize,
        reason: String,
    },

    /// The payload lacks something the processor needs.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The attempt exceeded the per-item timeout and was aborted.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The processor panicked.
    #[error("processor panicked: {0}")]
    Panicked(String),
}

impl ProcessError {
    /// Whether another attempt could succeed.
    ///
    /// Partial deliveries are not retried: the recipient already has the
    /// first chunks and a retry would send them again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessError::Completion(_) | ProcessError::Delivery(_) | ProcessError::TimedOut(_)
        )
    }
}
