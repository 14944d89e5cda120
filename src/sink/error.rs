//! Sink-specific error types.

use thiserror::Error;

/// Errors that can occur in the event sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Output could not be opened or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Event could not be encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to send command to writer actor.
    #[error("failed to send command to writer actor")]
    ChannelSend,

    /// Internal error (e.g., thread join failure).
    #[error("internal error: {0}")]
    Internal(String),
}
