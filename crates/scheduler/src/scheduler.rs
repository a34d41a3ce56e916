//! Orchestration scheduler.

use event_store::{
    ErrorDetails, ErrorKind, EventLog, EventLogExt, EventRecord, EventStoreError, HistoryEvent,
    InstanceId, SequenceNo,
};
use orchestration::{ActivityTask, Instance, OrchestrationRegistry, TurnOutcome, run_turn};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Result, SchedulerError};
use crate::locks::InstanceLocks;

/// Drives orchestration instances forward.
///
/// A pass loads the full history, replays the orchestrator, appends every new
/// event in one atomic batch and then queues the newly scheduled activities.
/// Nothing is queued unless the batch was committed, so a failed append
/// leaves no trace and the pass can simply be run again.
pub struct Scheduler<L: EventLog> {
    log: L,
    orchestrations: OrchestrationRegistry,
    locks: InstanceLocks,
    work_tx: mpsc::UnboundedSender<ActivityTask>,
    resume_tx: mpsc::UnboundedSender<InstanceId>,
}

impl<L> Scheduler<L>
where
    L: EventLog + Clone + 'static,
{
    /// Creates a scheduler.
    ///
    /// Newly scheduled activities are sent on `work_tx`. Instances whose pass
    /// hit a store outage are sent on `resume_tx` to be run again.
    pub fn new(
        log: L,
        orchestrations: OrchestrationRegistry,
        locks: InstanceLocks,
        work_tx: mpsc::UnboundedSender<ActivityTask>,
        resume_tx: mpsc::UnboundedSender<InstanceId>,
    ) -> Self {
        Self {
            log,
            orchestrations,
            locks,
            work_tx,
            resume_tx,
        }
    }

    /// Creates an instance and runs its first pass.
    ///
    /// Fails with `UnknownOrchestration` before anything is written, and with
    /// `Conflict` if the id is already in use. Once the instance is created, a
    /// first pass lost to a store outage is queued for resume and the start
    /// still succeeds.
    #[tracing::instrument(skip(self, input), fields(%instance_id))]
    pub async fn start(&self, instance_id: &InstanceId, name: &str, input: Value) -> Result<()> {
        if !self.orchestrations.contains(name) {
            return Err(SchedulerError::UnknownOrchestration(name.to_string()));
        }

        let _guard = self.locks.lock(instance_id).await;

        let record = EventRecord::new(
            instance_id.clone(),
            SequenceNo::first(),
            HistoryEvent::orchestration_started(name, input),
        );
        match self.log.append_event(record).await {
            Ok(_) => {}
            Err(EventStoreError::Conflict { .. }) => {
                return Err(SchedulerError::Conflict(instance_id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("orchestrations_started_total", "orchestration" => name.to_string())
            .increment(1);
        tracing::info!(orchestration = name, "orchestration started");

        match self.run_pass(instance_id).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "first pass failed, queued for resume");
                self.requeue(instance_id);
                Ok(())
            }
            result => result,
        }
    }

    /// Replays an instance and persists whatever progress it makes.
    ///
    /// A no-op for terminal instances and for passes that produce nothing new.
    #[tracing::instrument(skip(self), fields(%instance_id))]
    pub async fn resume(&self, instance_id: &InstanceId) -> Result<()> {
        let _guard = self.locks.lock(instance_id).await;
        self.run_pass(instance_id).await
    }

    /// Restarts work left behind by a previous process.
    ///
    /// For every non-terminal instance the pending activities are queued again
    /// (the dispatcher skips those that settle meanwhile) and a pass is run,
    /// which also picks up instances that crashed right after being created.
    /// Returns the number of instances recovered.
    pub async fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for instance_id in self.log.list_instances().await? {
            let history = self.log.read_all(&instance_id).await?;
            let Some(instance) = Instance::from_history(&history) else {
                tracing::error!(%instance_id, "skipping instance with corrupt history");
                continue;
            };
            if instance.is_terminal() {
                continue;
            }

            let pending = instance.pending_tasks();
            tracing::info!(%instance_id, pending = pending.len(), "recovering instance");
            for task in pending {
                self.enqueue(task);
            }
            match self.resume(&instance_id).await {
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        %instance_id,
                        error = %e,
                        "recovery pass failed, queued for resume"
                    );
                    self.requeue(&instance_id);
                }
                Err(e) => tracing::error!(%instance_id, error = %e, "recovery pass failed"),
                Ok(()) => {}
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn run_pass(&self, instance_id: &InstanceId) -> Result<()> {
        let history = self.log.read_all(instance_id).await?;
        if history.is_empty() {
            return Err(SchedulerError::NotFound(instance_id.clone()));
        }
        let instance = Instance::from_history(&history)
            .ok_or_else(|| SchedulerError::CorruptHistory(instance_id.clone()))?;
        if instance.is_terminal() {
            tracing::debug!(status = %instance.status(), "instance is terminal, nothing to do");
            return Ok(());
        }

        let Some(handler) = self.orchestrations.get(instance.name()) else {
            let details = ErrorDetails::new(
                ErrorKind::UnknownOrchestration,
                format!("No orchestration registered as '{}'", instance.name()),
            );
            self.log
                .append_after(
                    instance_id,
                    instance.last_sequence(),
                    vec![HistoryEvent::orchestration_failed(details)],
                )
                .await?;
            metrics::counter!(
                "orchestrations_failed_total",
                "orchestration" => instance.name().to_string()
            )
            .increment(1);
            return Err(SchedulerError::UnknownOrchestration(instance.name().to_string()));
        };

        let result = run_turn(instance_id, &history, instance.input().clone(), handler.as_ref());
        let outcome = result.outcome.clone();
        let events = result.into_events();
        if events.is_empty() {
            tracing::debug!("pass produced no new events");
            return Ok(());
        }

        let tasks: Vec<ActivityTask> = events
            .iter()
            .filter_map(|event| match event {
                HistoryEvent::ActivityScheduled(data) => Some(ActivityTask {
                    instance_id: instance_id.clone(),
                    sequence_no: data.sequence_no,
                    name: data.name.clone(),
                    input: data.input.clone(),
                    attempt: 1,
                }),
                _ => None,
            })
            .collect();

        let last = self
            .log
            .append_after(instance_id, instance.last_sequence(), events)
            .await?;
        tracing::debug!(%last, scheduled = tasks.len(), "pass committed");

        let orchestration = instance.name().to_string();
        match outcome {
            TurnOutcome::Suspended => {
                for task in tasks {
                    self.enqueue(task);
                }
                Ok(())
            }
            TurnOutcome::Completed(_) => {
                metrics::counter!(
                    "orchestrations_completed_total",
                    "orchestration" => orchestration
                )
                .increment(1);
                tracing::info!("orchestration completed");
                Ok(())
            }
            TurnOutcome::Failed(details) => {
                metrics::counter!("orchestrations_failed_total", "orchestration" => orchestration)
                    .increment(1);
                tracing::warn!(error = %details, "orchestration failed");
                Ok(())
            }
            TurnOutcome::NonDeterminism(message) => {
                metrics::counter!("orchestrations_failed_total", "orchestration" => orchestration)
                    .increment(1);
                tracing::error!(%message, "non-determinism detected, instance failed");
                Err(SchedulerError::NonDeterminism {
                    instance_id: instance_id.clone(),
                    message,
                })
            }
        }
    }

    fn enqueue(&self, task: ActivityTask) {
        if let Err(e) = self.work_tx.send(task) {
            tracing::warn!(instance_id = %e.0.instance_id, "work queue closed, task not queued");
        }
    }

    fn requeue(&self, instance_id: &InstanceId) {
        if self.resume_tx.send(instance_id.clone()).is_err() {
            tracing::warn!(%instance_id, "resume queue closed, instance not queued");
        }
    }
}
