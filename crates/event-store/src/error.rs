use thiserror::Error;

use crate::{InstanceId, SequenceNo};

/// Errors that can occur when interacting with the event log.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The sequence number being appended is already used for this instance.
    #[error("Sequence conflict for instance {instance_id}: {sequence_no} is taken, next is {next}")]
    Conflict {
        instance_id: InstanceId,
        sequence_no: SequenceNo,
        next: SequenceNo,
    },

    /// The batch violates the append contract (empty, gaps, mixed instances).
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// The backing store is temporarily unavailable. Nothing was written.
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true if retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EventStoreError::Unavailable(_))
    }
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
