//! Instance projection folded from history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use event_store::{ErrorDetails, EventRecord, HistoryEvent, InstanceId, SequenceNo};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of an orchestration instance.
///
/// State transitions:
/// ```text
/// Pending ──► Running ──┬──► Completed
///    │                  ├──► Failed
///    └──────────────────┴──► Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrchestrationStatus {
    /// Created; only `OrchestrationStarted` is recorded.
    Pending,
    /// At least one event after the start is recorded.
    Running,
    /// The orchestrator returned its output (terminal state).
    Completed,
    /// The orchestrator failed (terminal state).
    Failed,
    /// Stopped out of band (terminal state).
    Terminated,
}

impl OrchestrationStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed
                | OrchestrationStatus::Failed
                | OrchestrationStatus::Terminated
        )
    }

    /// Returns true if the instance can still be terminated.
    pub fn can_terminate(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationStatus::Pending => "Pending",
            OrchestrationStatus::Running => "Running",
            OrchestrationStatus::Completed => "Completed",
            OrchestrationStatus::Failed => "Failed",
            OrchestrationStatus::Terminated => "Terminated",
        }
    }
}

impl std::fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scheduled activity that has no final outcome yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityTask {
    pub instance_id: InstanceId,
    /// Sequence number of the `ActivityScheduled` record; the task's correlation id.
    pub sequence_no: SequenceNo,
    pub name: String,
    pub input: Value,
    /// 1-based number of the next attempt.
    pub attempt: u32,
}

#[derive(Debug, Clone)]
struct ActivityState {
    name: String,
    input: Value,
    failed_attempts: u32,
    settled: bool,
}

/// State of one instance, rebuilt by applying its history records in order.
#[derive(Debug, Clone)]
pub struct Instance {
    id: InstanceId,
    name: String,
    input: Value,
    status: OrchestrationStatus,
    output: Option<Value>,
    error: Option<ErrorDetails>,
    termination_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_sequence: SequenceNo,
    activities: BTreeMap<SequenceNo, ActivityState>,
}

impl Instance {
    /// Rebuilds an instance from its history.
    ///
    /// Returns None when the history is empty or does not begin with
    /// `OrchestrationStarted`.
    pub fn from_history(history: &[EventRecord]) -> Option<Self> {
        let (first, rest) = history.split_first()?;
        let HistoryEvent::OrchestrationStarted(started) = &first.event else {
            return None;
        };

        let mut instance = Self {
            id: first.instance_id.clone(),
            name: started.name.clone(),
            input: started.input.clone(),
            status: OrchestrationStatus::Pending,
            output: None,
            error: None,
            termination_reason: None,
            created_at: first.timestamp,
            updated_at: first.timestamp,
            last_sequence: first.sequence_no,
            activities: BTreeMap::new(),
        };
        for record in rest {
            instance.apply(record);
        }
        Some(instance)
    }

    /// Applies one record.
    ///
    /// Once the instance is terminal its status, output and error no longer
    /// change; late activity results are still tracked.
    pub fn apply(&mut self, record: &EventRecord) {
        self.last_sequence = record.sequence_no;
        self.updated_at = record.timestamp;

        match &record.event {
            HistoryEvent::OrchestrationStarted(_) => {}
            HistoryEvent::ActivityScheduled(data) => {
                self.activities.insert(
                    data.sequence_no,
                    ActivityState {
                        name: data.name.clone(),
                        input: data.input.clone(),
                        failed_attempts: 0,
                        settled: false,
                    },
                );
            }
            event @ (HistoryEvent::ActivityCompleted(_) | HistoryEvent::ActivityFailed(_)) => {
                if let Some(seq) = event.activity_sequence()
                    && let Some(activity) = self.activities.get_mut(&seq)
                {
                    if let HistoryEvent::ActivityFailed(data) = event {
                        activity.failed_attempts = activity.failed_attempts.max(data.attempt);
                    }
                    activity.settled |= event.settles_activity(seq);
                }
            }
            HistoryEvent::OrchestrationCompleted(data) => {
                if !self.status.is_terminal() {
                    self.status = OrchestrationStatus::Completed;
                    self.output = Some(data.output.clone());
                }
                return;
            }
            HistoryEvent::OrchestrationFailed(data) => {
                if !self.status.is_terminal() {
                    self.status = OrchestrationStatus::Failed;
                    self.error = Some(data.error.clone());
                }
                return;
            }
            HistoryEvent::OrchestrationTerminated(data) => {
                if !self.status.is_terminal() {
                    self.status = OrchestrationStatus::Terminated;
                    self.termination_reason = Some(data.reason.clone());
                }
                return;
            }
        }

        if self.status == OrchestrationStatus::Pending {
            self.status = OrchestrationStatus::Running;
        }
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Registered name of the orchestrator.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn status(&self) -> OrchestrationStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorDetails> {
        self.error.as_ref()
    }

    pub fn termination_reason(&self) -> Option<&str> {
        self.termination_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Sequence number of the last applied record.
    pub fn last_sequence(&self) -> SequenceNo {
        self.last_sequence
    }

    /// Returns true if the activity scheduled at `sequence_no` has a final outcome.
    pub fn is_settled(&self, sequence_no: SequenceNo) -> bool {
        self.activities
            .get(&sequence_no)
            .is_some_and(|activity| activity.settled)
    }

    /// Number of failed attempts recorded for the activity scheduled at `sequence_no`.
    pub fn failed_attempts(&self, sequence_no: SequenceNo) -> u32 {
        self.activities
            .get(&sequence_no)
            .map(|activity| activity.failed_attempts)
            .unwrap_or(0)
    }

    /// Returns the task for the activity scheduled at `sequence_no`, if it is still pending.
    pub fn pending_task(&self, sequence_no: SequenceNo) -> Option<ActivityTask> {
        let activity = self.activities.get(&sequence_no)?;
        if activity.settled {
            return None;
        }
        Some(ActivityTask {
            instance_id: self.id.clone(),
            sequence_no,
            name: activity.name.clone(),
            input: activity.input.clone(),
            attempt: activity.failed_attempts + 1,
        })
    }

    /// Scheduled activities without a final outcome, in sequence order.
    pub fn pending_tasks(&self) -> Vec<ActivityTask> {
        self.activities
            .keys()
            .filter_map(|seq| self.pending_task(*seq))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::ErrorKind;
    use serde_json::json;

    fn history(events: Vec<HistoryEvent>) -> Vec<EventRecord> {
        EventRecord::sequence(&InstanceId::from("order-1"), SequenceNo::initial(), events)
    }

    fn started() -> HistoryEvent {
        HistoryEvent::orchestration_started("OrderProcessing", json!({"id": "order-1"}))
    }

    #[test]
    fn test_started_only_is_pending() {
        let instance = Instance::from_history(&history(vec![started()])).unwrap();

        assert_eq!(instance.status(), OrchestrationStatus::Pending);
        assert_eq!(instance.name(), "OrderProcessing");
        assert_eq!(instance.input(), &json!({"id": "order-1"}));
        assert_eq!(instance.last_sequence(), SequenceNo::first());
    }

    #[test]
    fn test_scheduling_moves_to_running() {
        let instance = Instance::from_history(&history(vec![
            started(),
            HistoryEvent::activity_scheduled(SequenceNo::new(2), "CheckInventory", json!({})),
        ]))
        .unwrap();

        assert_eq!(instance.status(), OrchestrationStatus::Running);
        assert_eq!(instance.pending_tasks().len(), 1);
        assert_eq!(instance.pending_tasks()[0].attempt, 1);
    }

    #[test]
    fn test_empty_or_headless_history() {
        assert!(Instance::from_history(&[]).is_none());
        assert!(
            Instance::from_history(&history(vec![HistoryEvent::orchestration_terminated("x")]))
                .is_none()
        );
    }

    #[test]
    fn test_retrying_failures_count_attempts() {
        let seq = SequenceNo::new(2);
        let instance = Instance::from_history(&history(vec![
            started(),
            HistoryEvent::activity_scheduled(seq, "CheckCustomer", json!({})),
            HistoryEvent::activity_failed(seq, 1, "timeout", true),
            HistoryEvent::activity_failed(seq, 2, "timeout", true),
        ]))
        .unwrap();

        assert_eq!(instance.failed_attempts(seq), 2);
        assert!(!instance.is_settled(seq));
        assert_eq!(instance.pending_task(seq).unwrap().attempt, 3);
    }

    #[test]
    fn test_final_failure_settles() {
        let seq = SequenceNo::new(2);
        let instance = Instance::from_history(&history(vec![
            started(),
            HistoryEvent::activity_scheduled(seq, "CheckCustomer", json!({})),
            HistoryEvent::activity_failed(seq, 1, "fatal", false),
        ]))
        .unwrap();

        assert!(instance.is_settled(seq));
        assert!(instance.pending_tasks().is_empty());
    }

    #[test]
    fn test_completed_records_output() {
        let instance = Instance::from_history(&history(vec![
            started(),
            HistoryEvent::orchestration_completed(json!({"status": "HANDLED"})),
        ]))
        .unwrap();

        assert_eq!(instance.status(), OrchestrationStatus::Completed);
        assert_eq!(instance.output(), Some(&json!({"status": "HANDLED"})));
        assert!(instance.is_terminal());
    }

    #[test]
    fn test_failed_records_error() {
        let details = ErrorDetails::new(ErrorKind::NonDeterminism, "diverged");
        let instance = Instance::from_history(&history(vec![
            started(),
            HistoryEvent::orchestration_failed(details.clone()),
        ]))
        .unwrap();

        assert_eq!(instance.status(), OrchestrationStatus::Failed);
        assert_eq!(instance.error(), Some(&details));
    }

    #[test]
    fn test_late_result_after_termination_keeps_status() {
        let seq = SequenceNo::new(2);
        let instance = Instance::from_history(&history(vec![
            started(),
            HistoryEvent::activity_scheduled(seq, "CheckInventory", json!({})),
            HistoryEvent::orchestration_terminated("cancelled by operator"),
            HistoryEvent::activity_completed(seq, json!(true)),
        ]))
        .unwrap();

        assert_eq!(instance.status(), OrchestrationStatus::Terminated);
        assert_eq!(instance.termination_reason(), Some("cancelled by operator"));
        assert!(instance.is_settled(seq));
        assert_eq!(instance.last_sequence(), SequenceNo::new(4));
    }

    #[test]
    fn test_terminal_state_is_not_overwritten() {
        let instance = Instance::from_history(&history(vec![
            started(),
            HistoryEvent::orchestration_terminated("stop"),
            HistoryEvent::orchestration_completed(json!(1)),
        ]))
        .unwrap();

        assert_eq!(instance.status(), OrchestrationStatus::Terminated);
        assert!(instance.output().is_none());
    }

    #[test]
    fn test_status_flags() {
        assert!(OrchestrationStatus::Pending.can_terminate());
        assert!(OrchestrationStatus::Running.can_terminate());
        assert!(!OrchestrationStatus::Completed.can_terminate());
        assert_eq!(OrchestrationStatus::Terminated.to_string(), "Terminated");
    }
}
