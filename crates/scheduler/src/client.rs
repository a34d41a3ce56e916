//! Client API for orchestration instances.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use event_store::{ErrorDetails, EventLog, EventLogExt, EventRecord, HistoryEvent, InstanceId};
use orchestration::{Instance, OrchestrationStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SchedulerError};
use crate::locks::InstanceLocks;
use crate::scheduler::Scheduler;

/// Point-in-time view of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub instance_id: InstanceId,
    pub name: String,
    pub status: OrchestrationStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<ErrorDetails>,
    pub termination_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Instance> for InstanceStatus {
    fn from(instance: &Instance) -> Self {
        Self {
            instance_id: instance.id().clone(),
            name: instance.name().to_string(),
            status: instance.status(),
            input: instance.input().clone(),
            output: instance.output().cloned(),
            error: instance.error().cloned(),
            termination_reason: instance.termination_reason().map(str::to_string),
            created_at: instance.created_at(),
            updated_at: instance.updated_at(),
        }
    }
}

/// Starts, inspects and stops orchestration instances.
///
/// Cheap to clone; clones share the scheduler.
pub struct InstanceManager<L: EventLog> {
    log: L,
    scheduler: Arc<Scheduler<L>>,
    locks: InstanceLocks,
    poll_interval: Duration,
}

impl<L: EventLog + Clone> Clone for InstanceManager<L> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            scheduler: self.scheduler.clone(),
            locks: self.locks.clone(),
            poll_interval: self.poll_interval,
        }
    }
}

impl<L> InstanceManager<L>
where
    L: EventLog + Clone + 'static,
{
    pub fn new(
        log: L,
        scheduler: Arc<Scheduler<L>>,
        locks: InstanceLocks,
        poll_interval: Duration,
    ) -> Self {
        Self {
            log,
            scheduler,
            locks,
            poll_interval,
        }
    }

    /// Starts a new instance under a fresh id.
    pub async fn start_new(&self, name: &str, input: Value) -> Result<InstanceId> {
        let instance_id = InstanceId::new();
        self.scheduler.start(&instance_id, name, input).await?;
        Ok(instance_id)
    }

    /// Starts a new instance under a caller-chosen id.
    ///
    /// Fails with `Conflict` if the id is already in use.
    pub async fn start_new_with_id(
        &self,
        instance_id: impl Into<InstanceId>,
        name: &str,
        input: Value,
    ) -> Result<InstanceId> {
        let instance_id = instance_id.into();
        self.scheduler.start(&instance_id, name, input).await?;
        Ok(instance_id)
    }

    /// Returns the current status of an instance.
    pub async fn get_status(&self, instance_id: &InstanceId) -> Result<InstanceStatus> {
        let instance = self.load(instance_id).await?;
        Ok(InstanceStatus::from(&instance))
    }

    /// Returns the raw history of an instance.
    pub async fn get_history(&self, instance_id: &InstanceId) -> Result<Vec<EventRecord>> {
        let history = self.log.read_all(instance_id).await?;
        if history.is_empty() {
            return Err(SchedulerError::NotFound(instance_id.clone()));
        }
        Ok(history)
    }

    /// Stops a pending or running instance.
    ///
    /// Activities already running finish and their results are recorded, but
    /// nothing is dispatched and the orchestrator does not run again.
    #[tracing::instrument(skip(self), fields(%instance_id))]
    pub async fn terminate(&self, instance_id: &InstanceId, reason: &str) -> Result<()> {
        let _guard = self.locks.lock(instance_id).await;
        let instance = self.load(instance_id).await?;
        if !instance.status().can_terminate() {
            return Err(SchedulerError::InvalidState {
                instance_id: instance_id.clone(),
                status: instance.status(),
                operation: "terminate",
            });
        }

        self.log
            .append_after(
                instance_id,
                instance.last_sequence(),
                vec![HistoryEvent::orchestration_terminated(reason)],
            )
            .await?;
        metrics::counter!("orchestrations_terminated_total").increment(1);
        tracing::info!(reason, "orchestration terminated");
        Ok(())
    }

    /// Polls until the instance reaches a terminal state.
    pub async fn wait_for_completion(
        &self,
        instance_id: &InstanceId,
        timeout: Duration,
    ) -> Result<InstanceStatus> {
        match tokio::time::timeout(timeout, self.poll_until_terminal(instance_id)).await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Timeout {
                instance_id: instance_id.clone(),
                waited: timeout,
            }),
        }
    }

    async fn poll_until_terminal(&self, instance_id: &InstanceId) -> Result<InstanceStatus> {
        loop {
            let status = self.get_status(instance_id).await?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn load(&self, instance_id: &InstanceId) -> Result<Instance> {
        let history = self.get_history(instance_id).await?;
        Instance::from_history(&history)
            .ok_or_else(|| SchedulerError::CorruptHistory(instance_id.clone()))
    }
}
