//! The orchestration context handed to orchestrator code.
//!
//! A context is built fresh for every turn from the full instance history.
//! Every `call_activity` claims the next activity position: positions that
//! history already records are replayed, the first unrecorded one produces a
//! new `ActivityScheduled` event and suspends the orchestrator.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use event_store::{EventRecord, HistoryEvent, InstanceId, SequenceNo};
use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Level;
use uuid::Uuid;

use crate::error::{ActivityFailure, OrchestratorError};

/// Built-in activity returning the current UTC time.
pub const SYSTEM_NOW_ACTIVITY: &str = "__system_now";

/// Built-in activity returning a fresh v4 UUID.
pub const SYSTEM_NEW_GUID_ACTIVITY: &str = "__system_new_guid";

#[derive(Debug, Clone)]
enum RecordedOutcome {
    Completed(Value),
    Failed { attempts: u32, message: String },
}

impl RecordedOutcome {
    fn from_event(event: &HistoryEvent) -> Option<Self> {
        match event {
            HistoryEvent::ActivityCompleted(data) => Some(Self::Completed(data.result.clone())),
            HistoryEvent::ActivityFailed(data) => Some(Self::Failed {
                attempts: data.attempt,
                message: data.error.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedActivity {
    sequence_no: SequenceNo,
    name: String,
    input: Value,
    outcome: Option<RecordedOutcome>,
}

/// Replay bookkeeping shared between the context and its activity futures.
#[derive(Debug)]
pub(crate) struct ReplayState {
    instance_id: InstanceId,
    recorded: Vec<RecordedActivity>,
    claimed: usize,
    last_sequence: SequenceNo,
    new_events: Vec<HistoryEvent>,
    divergence: Option<String>,
}

impl ReplayState {
    pub(crate) fn from_history(instance_id: InstanceId, history: &[EventRecord]) -> Self {
        let mut recorded: Vec<RecordedActivity> = Vec::new();
        let mut index: HashMap<SequenceNo, usize> = HashMap::new();

        for record in history {
            match &record.event {
                HistoryEvent::ActivityScheduled(data) => {
                    index.insert(data.sequence_no, recorded.len());
                    recorded.push(RecordedActivity {
                        sequence_no: data.sequence_no,
                        name: data.name.clone(),
                        input: data.input.clone(),
                        outcome: None,
                    });
                }
                event => {
                    let Some(i) = event
                        .activity_sequence()
                        .filter(|seq| event.settles_activity(*seq))
                        .and_then(|seq| index.get(&seq).copied())
                    else {
                        continue;
                    };
                    // The first settling record wins.
                    if recorded[i].outcome.is_none() {
                        recorded[i].outcome = RecordedOutcome::from_event(event);
                    }
                }
            }
        }

        let last_sequence = history
            .last()
            .map(|r| r.sequence_no)
            .unwrap_or(SequenceNo::initial());

        Self {
            instance_id,
            recorded,
            claimed: 0,
            last_sequence,
            new_events: Vec::new(),
            divergence: None,
        }
    }

    pub(crate) fn unclaimed(&self) -> &[RecordedActivity] {
        &self.recorded[self.claimed.min(self.recorded.len())..]
    }

    pub(crate) fn diverge(&mut self, message: String) {
        if self.divergence.is_none() {
            self.divergence = Some(message);
        }
    }

    pub(crate) fn take_divergence(&mut self) -> Option<String> {
        self.divergence.take()
    }

    pub(crate) fn take_new_events(&mut self) -> Vec<HistoryEvent> {
        std::mem::take(&mut self.new_events)
    }
}

impl RecordedActivity {
    pub(crate) fn describe(&self) -> String {
        format!("'{}' at sequence {}", self.name, self.sequence_no)
    }
}

/// Handle given to orchestrator code for every turn.
///
/// Cloning is cheap; all clones observe the same turn.
#[derive(Clone)]
pub struct OrchestrationContext {
    state: Rc<RefCell<ReplayState>>,
}

impl OrchestrationContext {
    pub(crate) fn new(state: ReplayState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ReplayState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    /// Returns the id of the instance being executed.
    pub fn instance_id(&self) -> InstanceId {
        self.state.borrow().instance_id.clone()
    }

    /// Returns true while the code is re-executing steps that history already records.
    pub fn is_replaying(&self) -> bool {
        let state = self.state.borrow();
        state.claimed < state.recorded.len()
    }

    /// Requests an activity and returns a future for its result.
    ///
    /// The position is claimed when this is called, not when the future is
    /// first polled, so several calls combined with `join_all` are numbered in
    /// call order.
    pub fn call_activity(&self, name: impl Into<String>, input: Value) -> ActivityFuture {
        let name = name.into();
        let mut state = self.state.borrow_mut();

        if state.divergence.is_some() {
            return ActivityFuture::diverged(self.state.clone());
        }

        let position = state.claimed;
        state.claimed += 1;

        if let Some(recorded) = state.recorded.get(position) {
            if recorded.name != name || recorded.input != input {
                let message = format!(
                    "activity call #{} requested '{}' but history recorded {} with input {}",
                    position + 1,
                    name,
                    recorded.describe(),
                    recorded.input
                );
                state.diverge(message);
                return ActivityFuture::diverged(self.state.clone());
            }
            return ActivityFuture {
                state: self.state.clone(),
                slot: Slot::Recorded(position),
            };
        }

        let sequence_no = SequenceNo::new(
            state.last_sequence.as_u64() + state.new_events.len() as u64 + 1,
        );
        tracing::debug!(
            instance_id = %state.instance_id,
            %sequence_no,
            activity = %name,
            "activity scheduled"
        );
        state
            .new_events
            .push(HistoryEvent::activity_scheduled(sequence_no, name, input));

        ActivityFuture {
            state: self.state.clone(),
            slot: Slot::Scheduled,
        }
    }

    /// Typed variant of `call_activity`: serializes the input and deserializes the result.
    pub fn call_activity_typed<I, O>(
        &self,
        name: impl Into<String>,
        input: &I,
    ) -> LocalBoxFuture<'static, Result<O, OrchestratorError>>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned + 'static,
    {
        let call = serde_json::to_value(input).map(|value| self.call_activity(name, value));
        async move {
            let result = call?.await?;
            Ok(serde_json::from_value(result)?)
        }
        .boxed_local()
    }

    /// Returns the current time, recorded in history so replays see the same value.
    pub fn current_time(
        &self,
    ) -> LocalBoxFuture<'static, Result<DateTime<Utc>, OrchestratorError>> {
        self.call_activity_typed(SYSTEM_NOW_ACTIVITY, &())
    }

    /// Returns a new GUID, recorded in history so replays see the same value.
    pub fn new_guid(&self) -> LocalBoxFuture<'static, Result<Uuid, OrchestratorError>> {
        self.call_activity_typed(SYSTEM_NEW_GUID_ACTIVITY, &())
    }

    /// Emits a log line unless the code is replaying.
    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        if self.is_replaying() {
            return;
        }
        let instance_id = self.instance_id();
        let message = message.as_ref();
        match level {
            Level::ERROR => tracing::error!(%instance_id, "{message}"),
            Level::WARN => tracing::warn!(%instance_id, "{message}"),
            Level::INFO => tracing::info!(%instance_id, "{message}"),
            Level::DEBUG => tracing::debug!(%instance_id, "{message}"),
            _ => tracing::trace!(%instance_id, "{message}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    /// Replays the activity recorded at this position.
    Recorded(usize),
    /// Newly scheduled in this turn; no outcome can exist yet.
    Scheduled,
    /// Replay diverged from history; never resolves.
    Diverged,
}

/// Future returned by `OrchestrationContext::call_activity`.
///
/// Resolves immediately when history holds the activity's final outcome and
/// stays pending otherwise.
pub struct ActivityFuture {
    state: Rc<RefCell<ReplayState>>,
    slot: Slot,
}

impl ActivityFuture {
    fn diverged(state: Rc<RefCell<ReplayState>>) -> Self {
        Self {
            state,
            slot: Slot::Diverged,
        }
    }
}

impl Future for ActivityFuture {
    type Output = Result<Value, ActivityFailure>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Slot::Recorded(position) = self.slot else {
            return Poll::Pending;
        };
        let state = self.state.borrow();
        let recorded = &state.recorded[position];
        match &recorded.outcome {
            Some(RecordedOutcome::Completed(value)) => Poll::Ready(Ok(value.clone())),
            Some(RecordedOutcome::Failed { attempts, message }) => {
                Poll::Ready(Err(ActivityFailure {
                    name: recorded.name.clone(),
                    sequence_no: recorded.sequence_no,
                    attempts: *attempts,
                    message: message.clone(),
                }))
            }
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::task::noop_waker_ref;
    use serde_json::json;

    fn history(events: Vec<HistoryEvent>) -> Vec<EventRecord> {
        EventRecord::sequence(&InstanceId::from("ctx"), SequenceNo::initial(), events)
    }

    fn context(events: Vec<HistoryEvent>) -> OrchestrationContext {
        OrchestrationContext::new(ReplayState::from_history(
            InstanceId::from("ctx"),
            &history(events),
        ))
    }

    fn poll(fut: &mut ActivityFuture) -> Poll<Result<Value, ActivityFailure>> {
        let mut cx = Context::from_waker(noop_waker_ref());
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn first_call_schedules_after_last_record() {
        let ctx = context(vec![HistoryEvent::orchestration_started("O", json!(null))]);

        let mut fut = ctx.call_activity("A", json!(1));

        assert!(poll(&mut fut).is_pending());
        let events = ctx.with_state(|s| s.take_new_events());
        assert_eq!(
            events,
            vec![HistoryEvent::activity_scheduled(SequenceNo::new(2), "A", json!(1))]
        );
    }

    #[test]
    fn recorded_result_resolves_immediately() {
        let ctx = context(vec![
            HistoryEvent::orchestration_started("O", json!(null)),
            HistoryEvent::activity_scheduled(SequenceNo::new(2), "A", json!(1)),
            HistoryEvent::activity_completed(SequenceNo::new(2), json!("done")),
        ]);

        assert!(ctx.is_replaying());
        let mut fut = ctx.call_activity("A", json!(1));
        assert!(!ctx.is_replaying());

        assert_eq!(poll(&mut fut), Poll::Ready(Ok(json!("done"))));
        assert!(ctx.with_state(|s| s.take_new_events()).is_empty());
    }

    #[test]
    fn retrying_failure_keeps_future_pending() {
        let ctx = context(vec![
            HistoryEvent::orchestration_started("O", json!(null)),
            HistoryEvent::activity_scheduled(SequenceNo::new(2), "A", json!(1)),
            HistoryEvent::activity_failed(SequenceNo::new(2), 1, "boom", true),
        ]);

        let mut fut = ctx.call_activity("A", json!(1));
        assert!(poll(&mut fut).is_pending());
    }

    #[test]
    fn final_failure_resolves_to_activity_failure() {
        let ctx = context(vec![
            HistoryEvent::orchestration_started("O", json!(null)),
            HistoryEvent::activity_scheduled(SequenceNo::new(2), "A", json!(1)),
            HistoryEvent::activity_failed(SequenceNo::new(2), 1, "boom", true),
            HistoryEvent::activity_failed(SequenceNo::new(2), 2, "boom again", false),
        ]);

        let mut fut = ctx.call_activity("A", json!(1));
        let Poll::Ready(Err(failure)) = poll(&mut fut) else {
            panic!("expected a final failure");
        };
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.message, "boom again");
        assert_eq!(failure.sequence_no, SequenceNo::new(2));
    }

    #[test]
    fn name_mismatch_diverges() {
        let ctx = context(vec![
            HistoryEvent::orchestration_started("O", json!(null)),
            HistoryEvent::activity_scheduled(SequenceNo::new(2), "A", json!(1)),
        ]);

        let mut fut = ctx.call_activity("B", json!(1));

        assert!(poll(&mut fut).is_pending());
        let divergence = ctx.with_state(|s| s.take_divergence()).unwrap();
        assert!(divergence.contains("'B'"));
        assert!(divergence.contains("'A' at sequence 2"));
    }

    #[test]
    fn input_mismatch_diverges() {
        let ctx = context(vec![
            HistoryEvent::orchestration_started("O", json!(null)),
            HistoryEvent::activity_scheduled(SequenceNo::new(2), "A", json!(1)),
        ]);

        let _fut = ctx.call_activity("A", json!(2));
        assert!(ctx.with_state(|s| s.take_divergence()).is_some());
    }

    #[test]
    fn calls_are_numbered_in_call_order() {
        let ctx = context(vec![HistoryEvent::orchestration_started("O", json!(null))]);

        let _a = ctx.call_activity("A", json!(null));
        let _b = ctx.call_activity("B", json!(null));
        let _c = ctx.call_activity("C", json!(null));

        let events = ctx.with_state(|s| s.take_new_events());
        let numbers: Vec<_> = events
            .iter()
            .filter_map(|e| e.activity_sequence())
            .map(|s| s.as_u64())
            .collect();
        assert_eq!(numbers, vec![2, 3, 4]);
    }
}
