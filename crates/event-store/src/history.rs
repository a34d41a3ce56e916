//! Orchestration history events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SequenceNo;

/// Events recorded in an orchestration instance's history.
///
/// The persisted form is adjacently tagged (`{"type": ..., "data": ...}`) so
/// that new variants and new optional fields can be introduced without
/// breaking records written by older engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum HistoryEvent {
    /// The instance was created for a named orchestrator.
    OrchestrationStarted(OrchestrationStartedData),

    /// The orchestrator requested an activity.
    ActivityScheduled(ActivityScheduledData),

    /// An activity returned a result.
    ActivityCompleted(ActivityCompletedData),

    /// An activity attempt failed.
    ActivityFailed(ActivityFailedData),

    /// The orchestrator returned its output (terminal).
    OrchestrationCompleted(OrchestrationCompletedData),

    /// The orchestration failed (terminal).
    OrchestrationFailed(OrchestrationFailedData),

    /// The instance was terminated out of band (terminal).
    OrchestrationTerminated(OrchestrationTerminatedData),
}

impl HistoryEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            HistoryEvent::OrchestrationStarted(_) => "OrchestrationStarted",
            HistoryEvent::ActivityScheduled(_) => "ActivityScheduled",
            HistoryEvent::ActivityCompleted(_) => "ActivityCompleted",
            HistoryEvent::ActivityFailed(_) => "ActivityFailed",
            HistoryEvent::OrchestrationCompleted(_) => "OrchestrationCompleted",
            HistoryEvent::OrchestrationFailed(_) => "OrchestrationFailed",
            HistoryEvent::OrchestrationTerminated(_) => "OrchestrationTerminated",
        }
    }

    /// Returns true for events that end the orchestration.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HistoryEvent::OrchestrationCompleted(_)
                | HistoryEvent::OrchestrationFailed(_)
                | HistoryEvent::OrchestrationTerminated(_)
        )
    }

    /// Returns the scheduling sequence number for activity events.
    pub fn activity_sequence(&self) -> Option<SequenceNo> {
        match self {
            HistoryEvent::ActivityScheduled(data) => Some(data.sequence_no),
            HistoryEvent::ActivityCompleted(data) => Some(data.sequence_no),
            HistoryEvent::ActivityFailed(data) => Some(data.sequence_no),
            _ => None,
        }
    }

    /// Returns true if this event settles the activity scheduled at `sequence_no`.
    ///
    /// A completion settles it, as does a failure with no retry left.
    pub fn settles_activity(&self, sequence_no: SequenceNo) -> bool {
        match self {
            HistoryEvent::ActivityCompleted(data) => data.sequence_no == sequence_no,
            HistoryEvent::ActivityFailed(data) => {
                data.sequence_no == sequence_no && !data.retrying
            }
            _ => false,
        }
    }
}

/// Data for OrchestrationStarted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationStartedData {
    /// Registered name of the orchestrator.
    pub name: String,
    /// Input payload.
    pub input: Value,
}

/// Data for ActivityScheduled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityScheduledData {
    /// Sequence number of this scheduling record; activity outcomes refer to it.
    pub sequence_no: SequenceNo,
    /// Registered name of the activity.
    pub name: String,
    /// Input payload.
    pub input: Value,
}

/// Data for ActivityCompleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityCompletedData {
    /// The scheduling record this result belongs to.
    pub sequence_no: SequenceNo,
    /// Output payload.
    pub result: Value,
}

/// Data for ActivityFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityFailedData {
    /// The scheduling record this failure belongs to.
    pub sequence_no: SequenceNo,
    /// 1-based attempt number that failed.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
    /// Error message reported by the handler.
    pub error: String,
    /// True if the dispatcher will run the activity again.
    #[serde(default)]
    pub retrying: bool,
}

fn first_attempt() -> u32 {
    1
}

/// Data for OrchestrationCompleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationCompletedData {
    /// Output payload.
    pub output: Value,
}

/// Data for OrchestrationFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationFailedData {
    /// What went wrong.
    pub error: ErrorDetails,
}

/// Data for OrchestrationTerminated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationTerminatedData {
    /// Reason given by the caller.
    pub reason: String,
}

/// Category of a recorded orchestration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The orchestrator returned an application error.
    Application,
    /// An activity failed and the orchestrator propagated it.
    ActivityFailed,
    /// Replay diverged from the recorded history; the instance is quarantined.
    NonDeterminism,
    /// Orchestrator code panicked.
    Panic,
    /// No orchestrator is registered under the recorded name.
    UnknownOrchestration,
}

impl ErrorKind {
    /// Returns the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Application => "Application",
            ErrorKind::ActivityFailed => "ActivityFailed",
            ErrorKind::NonDeterminism => "NonDeterminism",
            ErrorKind::Panic => "Panic",
            ErrorKind::UnknownOrchestration => "UnknownOrchestration",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured error payload recorded when an orchestration fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetails {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// Convenience constructors
impl HistoryEvent {
    /// Creates an OrchestrationStarted event.
    pub fn orchestration_started(name: impl Into<String>, input: Value) -> Self {
        HistoryEvent::OrchestrationStarted(OrchestrationStartedData {
            name: name.into(),
            input,
        })
    }

    /// Creates an ActivityScheduled event.
    pub fn activity_scheduled(
        sequence_no: SequenceNo,
        name: impl Into<String>,
        input: Value,
    ) -> Self {
        HistoryEvent::ActivityScheduled(ActivityScheduledData {
            sequence_no,
            name: name.into(),
            input,
        })
    }

    /// Creates an ActivityCompleted event.
    pub fn activity_completed(sequence_no: SequenceNo, result: Value) -> Self {
        HistoryEvent::ActivityCompleted(ActivityCompletedData {
            sequence_no,
            result,
        })
    }

    /// Creates an ActivityFailed event.
    pub fn activity_failed(
        sequence_no: SequenceNo,
        attempt: u32,
        error: impl Into<String>,
        retrying: bool,
    ) -> Self {
        HistoryEvent::ActivityFailed(ActivityFailedData {
            sequence_no,
            attempt,
            error: error.into(),
            retrying,
        })
    }

    /// Creates an OrchestrationCompleted event.
    pub fn orchestration_completed(output: Value) -> Self {
        HistoryEvent::OrchestrationCompleted(OrchestrationCompletedData { output })
    }

    /// Creates an OrchestrationFailed event.
    pub fn orchestration_failed(error: ErrorDetails) -> Self {
        HistoryEvent::OrchestrationFailed(OrchestrationFailedData { error })
    }

    /// Creates an OrchestrationTerminated event.
    pub fn orchestration_terminated(reason: impl Into<String>) -> Self {
        HistoryEvent::OrchestrationTerminated(OrchestrationTerminatedData {
            reason: reason.into(),
        })
    }
}
