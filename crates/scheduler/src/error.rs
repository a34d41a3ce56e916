//! Scheduler error types.

use std::time::Duration;

use event_store::{EventStoreError, InstanceId};
use orchestration::{OrchestrationStatus, RegistryError};
use thiserror::Error;

/// Errors that can occur while driving orchestrations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// An instance with this id already exists.
    #[error("Instance already exists: {0}")]
    Conflict(InstanceId),

    /// No instance with this id exists.
    #[error("Instance not found: {0}")]
    NotFound(InstanceId),

    /// No orchestrator is registered under this name.
    #[error("Unknown orchestration: {0}")]
    UnknownOrchestration(String),

    /// The instance is in the wrong state for the requested operation.
    #[error("Cannot {operation} instance {instance_id} in {status} state")]
    InvalidState {
        instance_id: InstanceId,
        status: OrchestrationStatus,
        operation: &'static str,
    },

    /// Replay diverged from the recorded history; the instance has been failed.
    #[error("Non-determinism detected in instance {instance_id}: {message}")]
    NonDeterminism {
        instance_id: InstanceId,
        message: String,
    },

    /// The stored history does not begin with `OrchestrationStarted`.
    #[error("Corrupt history for instance {0}")]
    CorruptHistory(InstanceId),

    /// The instance did not reach a terminal state in time.
    #[error("Timed out after {waited:?} waiting for instance {instance_id}")]
    Timeout {
        instance_id: InstanceId,
        waited: Duration,
    },

    /// Event log error.
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Returns true if the operation committed nothing and may be retried as a whole.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::Store(e) if e.is_transient())
    }
}

/// Convenience type alias for scheduler results.
pub type Result<T> = std::result::Result<T, SchedulerError>;
