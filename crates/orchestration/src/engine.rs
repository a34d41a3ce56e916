//! One replay turn of an orchestrator.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::task::{Context, Poll};

use event_store::{ErrorDetails, ErrorKind, EventRecord, HistoryEvent, InstanceId};
use futures_util::task::noop_waker_ref;
use serde_json::Value;

use crate::context::{OrchestrationContext, ReplayState};
use crate::registry::OrchestrationHandler;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The orchestrator is waiting on at least one activity.
    Suspended,
    /// The orchestrator returned its output.
    Completed(Value),
    /// The orchestrator returned an error or panicked.
    Failed(ErrorDetails),
    /// The code no longer matches the recorded history.
    NonDeterminism(String),
}

/// Result of a replay turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub outcome: TurnOutcome,
    /// Activities newly scheduled by this turn, numbered after the last record.
    pub new_events: Vec<HistoryEvent>,
}

impl TurnResult {
    /// Returns every event the turn wants appended, terminal event included.
    pub fn into_events(self) -> Vec<HistoryEvent> {
        let mut events = self.new_events;
        match self.outcome {
            TurnOutcome::Suspended => {}
            TurnOutcome::Completed(output) => {
                events.push(HistoryEvent::orchestration_completed(output));
            }
            TurnOutcome::Failed(details) => {
                events.push(HistoryEvent::orchestration_failed(details));
            }
            TurnOutcome::NonDeterminism(message) => {
                events.clear();
                events.push(HistoryEvent::orchestration_failed(ErrorDetails::new(
                    ErrorKind::NonDeterminism,
                    message,
                )));
            }
        }
        events
    }
}

/// Replays the orchestrator from the start against `history` and polls it once.
///
/// Activities with recorded outcomes resolve immediately, so the orchestrator
/// advances through everything history already knows and stops at the first
/// activity without a result. Nothing here performs I/O.
pub fn run_turn(
    instance_id: &InstanceId,
    history: &[EventRecord],
    input: Value,
    handler: &dyn OrchestrationHandler,
) -> TurnResult {
    metrics::counter!("replay_turns_total").increment(1);

    let ctx = OrchestrationContext::new(ReplayState::from_history(instance_id.clone(), history));

    let polled = catch_unwind(AssertUnwindSafe(|| {
        let mut future = handler.invoke(ctx.clone(), input);
        let mut cx = Context::from_waker(noop_waker_ref());
        future.as_mut().poll(&mut cx)
    }));

    let poll = match polled {
        Ok(poll) => poll,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(%instance_id, %message, "orchestrator panicked");
            return TurnResult {
                outcome: TurnOutcome::Failed(ErrorDetails::new(ErrorKind::Panic, message)),
                new_events: Vec::new(),
            };
        }
    };

    let (divergence, unclaimed, new_events) = ctx.with_state(|state| {
        let unclaimed: Vec<String> = state.unclaimed().iter().map(|a| a.describe()).collect();
        (state.take_divergence(), unclaimed, state.take_new_events())
    });

    if let Some(message) = divergence {
        return TurnResult {
            outcome: TurnOutcome::NonDeterminism(message),
            new_events: Vec::new(),
        };
    }
    if !unclaimed.is_empty() {
        return TurnResult {
            outcome: TurnOutcome::NonDeterminism(format!(
                "history records activities the orchestrator no longer requests: {}",
                unclaimed.join(", ")
            )),
            new_events: Vec::new(),
        };
    }

    let outcome = match poll {
        Poll::Pending => TurnOutcome::Suspended,
        Poll::Ready(Ok(output)) => TurnOutcome::Completed(output),
        Poll::Ready(Err(err)) => TurnOutcome::Failed(err.to_details()),
    };

    TurnResult {
        outcome,
        new_events,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "orchestrator panicked".to_string()
    }
}
