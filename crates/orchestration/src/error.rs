//! Orchestration error types.

use event_store::{ErrorDetails, ErrorKind, SequenceNo};
use thiserror::Error;

/// The final failure of an activity, as observed by orchestrator code.
///
/// Returned from `OrchestrationContext::call_activity` once the dispatcher has
/// recorded a failure with no retry left.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Activity '{name}' (sequence {sequence_no}) failed after {attempts} attempt(s): {message}")]
pub struct ActivityFailure {
    pub name: String,
    pub sequence_no: SequenceNo,
    pub attempts: u32,
    pub message: String,
}

/// Errors an orchestrator function can return.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An awaited activity failed and the orchestrator propagated it.
    #[error(transparent)]
    Activity(#[from] ActivityFailure),

    /// Application-level failure raised by orchestrator code.
    #[error("{0}")]
    Application(String),

    /// A payload could not be converted.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Creates an application error.
    pub fn application(message: impl Into<String>) -> Self {
        OrchestratorError::Application(message.into())
    }

    /// Converts the error into the payload recorded in `OrchestrationFailed`.
    pub fn to_details(&self) -> ErrorDetails {
        let kind = match self {
            OrchestratorError::Activity(_) => ErrorKind::ActivityFailed,
            OrchestratorError::Application(_) | OrchestratorError::Serialization(_) => {
                ErrorKind::Application
            }
        };
        ErrorDetails::new(kind, self.to_string())
    }
}

/// Errors raised while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// One or more names were registered twice.
    #[error("Duplicate registration: {}", .0.join(", "))]
    Duplicate(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_failure_maps_to_activity_failed_kind() {
        let err = OrchestratorError::from(ActivityFailure {
            name: "CheckInventory".to_string(),
            sequence_no: SequenceNo::new(2),
            attempts: 3,
            message: "out of stock".to_string(),
        });

        let details = err.to_details();
        assert_eq!(details.kind, ErrorKind::ActivityFailed);
        assert!(details.message.contains("CheckInventory"));
        assert!(details.message.contains("out of stock"));
    }

    #[test]
    fn application_error_keeps_message() {
        let details = OrchestratorError::application("order rejected").to_details();
        assert_eq!(details.kind, ErrorKind::Application);
        assert_eq!(details.message, "order rejected");
    }

    #[test]
    fn duplicate_lists_names() {
        let err = RegistryError::Duplicate(vec!["A".to_string(), "B".to_string()]);
        assert_eq!(err.to_string(), "Duplicate registration: A, B");
    }
}
