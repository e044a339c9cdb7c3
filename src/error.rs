//! Error types for nano-slots.

use thiserror::Error;

use crate::core::{RequestId, SlotIndex};

/// Result type alias for nano-slots operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nano-slots.
#[derive(Error, Debug)]
pub enum Error {
    /// Every slot is busy.
    #[error("no free sequence slot (capacity {capacity})")]
    NoFreeSlot { capacity: usize },

    /// The request already owns a slot.
    #[error("request {request_id} is already assigned to slot {slot}")]
    Conflict { request_id: RequestId, slot: SlotIndex },

    /// Slot index outside `[0, capacity)`.
    #[error("slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange { slot: SlotIndex, capacity: usize },

    /// A write was attempted by a request that does not own the slot.
    #[error("request {request_id} does not own slot {slot}")]
    NotOwner { request_id: RequestId, slot: SlotIndex },

    /// Neither the model nor the configuration provide a chat template.
    #[error("model does not have a chat template")]
    MissingChatTemplate,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tokenization error.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// Invalid multimodal payload.
    #[error("media error: {0}")]
    Media(String),

    /// Decode backend failure.
    #[error("decode error: {0}")]
    Decode(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the caller may retry the same operation later.
    ///
    /// Only capacity exhaustion is transient; everything else is a logic or
    /// input error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoFreeSlot { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::NoFreeSlot { capacity: 2 }.is_retryable());
        assert!(!Error::Conflict { request_id: 1, slot: 0 }.is_retryable());
        assert!(!Error::MissingChatTemplate.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::Conflict { request_id: 7, slot: 3 };
        assert_eq!(err.to_string(), "request 7 is already assigned to slot 3");

        let err = Error::NoFreeSlot { capacity: 4 };
        assert_eq!(err.to_string(), "no free sequence slot (capacity 4)");
    }
}
