//! Integration tests for the replay engine.

use chrono::{DateTime, TimeZone, Utc};
use event_store::{EventRecord, HistoryEvent, InstanceId, SequenceNo};
use futures_util::future::join_all;
use orchestration::{
    Instance, OrchestrationContext, OrchestrationRegistry, OrchestrationStatus, OrchestratorError,
    SYSTEM_NOW_ACTIVITY, TurnOutcome, run_turn,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Drives an orchestrator by hand: runs turns and plays the dispatcher.
struct TestHarness {
    registry: OrchestrationRegistry,
    instance_id: InstanceId,
    history: Vec<EventRecord>,
}

impl TestHarness {
    fn new(name: &str, input: Value) -> Self {
        let registry = OrchestrationRegistry::builder()
            .register_fn("FanOut", fan_out)
            .register_fn("Typed", typed)
            .register_fn("Clock", clock)
            .build()
            .unwrap();
        let instance_id = InstanceId::from("replay-1");
        let history = EventRecord::sequence(
            &instance_id,
            SequenceNo::initial(),
            vec![HistoryEvent::orchestration_started(name, input)],
        );
        Self {
            registry,
            instance_id,
            history,
        }
    }

    fn last(&self) -> SequenceNo {
        self.history.last().map(|r| r.sequence_no).unwrap_or_default()
    }

    fn append(&mut self, events: Vec<HistoryEvent>) {
        let records = EventRecord::sequence(&self.instance_id, self.last(), events);
        self.history.extend(records);
    }

    /// Runs a turn and appends what it produced.
    fn turn(&mut self) -> TurnOutcome {
        let instance = Instance::from_history(&self.history).unwrap();
        let handler = self.registry.get(instance.name()).unwrap();
        let result = run_turn(
            &self.instance_id,
            &self.history,
            instance.input().clone(),
            handler.as_ref(),
        );
        let outcome = result.outcome.clone();
        let events = result.into_events();
        if !events.is_empty() {
            self.append(events);
        }
        outcome
    }

    fn complete(&mut self, sequence_no: u64, result: Value) {
        self.append(vec![HistoryEvent::activity_completed(
            SequenceNo::new(sequence_no),
            result,
        )]);
    }

    fn scheduled_names(&self) -> Vec<(u64, String)> {
        self.history
            .iter()
            .filter_map(|r| match &r.event {
                HistoryEvent::ActivityScheduled(data) => {
                    Some((data.sequence_no.as_u64(), data.name.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

async fn fan_out(ctx: OrchestrationContext, _input: Value) -> Result<Value, OrchestratorError> {
    let calls = vec![
        ctx.call_activity("A", json!("a")),
        ctx.call_activity("B", json!("b")),
        ctx.call_activity("C", json!("c")),
    ];
    let results = join_all(calls).await;
    let values = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(values))
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Quote {
    sku: String,
    quantity: u32,
}

async fn typed(ctx: OrchestrationContext, input: Value) -> Result<Value, OrchestratorError> {
    let quote: Quote = serde_json::from_value(input)?;
    let price: u64 = ctx.call_activity_typed("Price", &quote).await?;
    Ok(json!({ "total": price * u64::from(quote.quantity) }))
}

async fn clock(ctx: OrchestrationContext, _input: Value) -> Result<Value, OrchestratorError> {
    let started = ctx.current_time().await?;
    Ok(json!(started.to_rfc3339()))
}

#[test]
fn join_all_schedules_in_request_order() {
    let mut harness = TestHarness::new("FanOut", json!(null));

    assert_eq!(harness.turn(), TurnOutcome::Suspended);

    assert_eq!(
        harness.scheduled_names(),
        vec![
            (2, "A".to_string()),
            (3, "B".to_string()),
            (4, "C".to_string())
        ]
    );
}

#[test]
fn results_arriving_out_of_order_complete_in_request_order() {
    let mut harness = TestHarness::new("FanOut", json!(null));
    harness.turn();

    harness.complete(4, json!(3));
    assert_eq!(harness.turn(), TurnOutcome::Suspended);
    harness.complete(2, json!(1));
    assert_eq!(harness.turn(), TurnOutcome::Suspended);
    harness.complete(3, json!(2));

    assert_eq!(harness.turn(), TurnOutcome::Completed(json!([1, 2, 3])));
}

#[test]
fn replaying_full_history_is_a_no_op() {
    let mut harness = TestHarness::new("FanOut", json!(null));
    harness.turn();
    harness.complete(2, json!(1));
    let before = harness.history.len();

    // Same history replayed repeatedly: no new events, same decisions.
    for _ in 0..3 {
        assert_eq!(harness.turn(), TurnOutcome::Suspended);
        assert_eq!(harness.history.len(), before);
    }
    assert_eq!(harness.scheduled_names().len(), 3);
}

#[test]
fn typed_calls_round_trip_payloads() {
    let mut harness = TestHarness::new("Typed", json!({"sku": "X-1", "quantity": 3}));
    harness.turn();

    let HistoryEvent::ActivityScheduled(data) = &harness.history[1].event else {
        panic!("expected a scheduled activity");
    };
    assert_eq!(data.input, json!({"sku": "X-1", "quantity": 3}));

    harness.complete(2, json!(7));
    assert_eq!(harness.turn(), TurnOutcome::Completed(json!({"total": 21})));

    let instance = Instance::from_history(&harness.history).unwrap();
    assert_eq!(instance.status(), OrchestrationStatus::Completed);
}

#[test]
fn second_completion_for_same_activity_is_ignored() {
    let mut harness = TestHarness::new("Typed", json!({"sku": "X-1", "quantity": 3}));
    harness.turn();

    harness.complete(2, json!(7));
    harness.complete(2, json!(999));

    assert_eq!(harness.turn(), TurnOutcome::Completed(json!({"total": 21})));
    let instance = Instance::from_history(&harness.history).unwrap();
    assert_eq!(instance.output(), Some(&json!({"total": 21})));
    assert!(instance.is_settled(SequenceNo::new(2)));

    // Replaying the finished history again reads the first result only.
    let handler = harness.registry.get("Typed").unwrap();
    let replay = run_turn(
        &harness.instance_id,
        &harness.history,
        instance.input().clone(),
        handler.as_ref(),
    );
    assert_eq!(replay.outcome, TurnOutcome::Completed(json!({"total": 21})));
    assert!(replay.new_events.is_empty());
}

#[test]
fn bad_typed_input_fails_the_orchestration() {
    let mut harness = TestHarness::new("Typed", json!({"sku": 1}));

    let TurnOutcome::Failed(details) = harness.turn() else {
        panic!("expected failure");
    };
    assert!(details.message.starts_with("Serialization error"));
}

#[test]
fn current_time_is_recorded_and_replayed() {
    let mut harness = TestHarness::new("Clock", json!(null));
    harness.turn();
    assert_eq!(harness.scheduled_names(), vec![(2, SYSTEM_NOW_ACTIVITY.to_string())]);

    let recorded: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    harness.complete(2, json!(recorded));

    assert_eq!(
        harness.turn(),
        TurnOutcome::Completed(json!(recorded.to_rfc3339()))
    );
}
