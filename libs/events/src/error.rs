//! Error types for event handling.

use thiserror::Error;

use flotilla_id::EventSeq;

/// Errors that can occur when publishing or consuming events.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The bus is closed (all subscriptions dropped).
    #[error("event bus closed")]
    Closed,

    /// An acknowledgment did not match the outstanding delivery.
    #[error("acknowledgment out of order: expected {expected}, got {actual}")]
    AckMismatch { expected: EventSeq, actual: EventSeq },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
