//! Activity execution with retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use event_store::{EventLog, EventLogExt, EventRecord, HistoryEvent, InstanceId, SequenceNo};
use orchestration::{
    ActivityTask, Instance, OrchestrationStatus, Registry, RegistryBuilder,
    SYSTEM_NEW_GUID_ACTIVITY, SYSTEM_NOW_ACTIVITY,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::locks::InstanceLocks;
use crate::retry::{RetryPolicy, retry_transient};

/// What an activity handler knows about the call it is serving.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityContext {
    pub instance_id: InstanceId,
    /// Sequence number of the `ActivityScheduled` record.
    pub sequence_no: SequenceNo,
    pub name: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Error returned by an activity handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActivityError {
    message: String,
    retryable: bool,
}

impl ActivityError {
    /// An error the retry policy may retry.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// An error recorded as final immediately.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(err: serde_json::Error) -> Self {
        ActivityError::fatal(format!("Serialization error: {err}"))
    }
}

/// A named unit of work.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: ActivityContext,
        input: Value,
    ) -> std::result::Result<Value, ActivityError>;
}

/// Adapts a closure into an `ActivityHandler`.
pub struct FnActivity<F>(pub F);

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F>
where
    F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, ActivityError>> + Send + 'static,
{
    async fn execute(
        &self,
        ctx: ActivityContext,
        input: Value,
    ) -> std::result::Result<Value, ActivityError> {
        (self.0)(ctx, input).await
    }
}

/// Activities keyed by name.
pub type ActivityRegistry = Registry<dyn ActivityHandler>;

/// Closure registration for activity registries.
pub trait ActivityRegistryBuilderExt: Sized {
    fn register_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ActivityError>> + Send + 'static;
}

impl ActivityRegistryBuilderExt for RegistryBuilder<dyn ActivityHandler> {
    fn register_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ActivityError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnActivity(f)))
    }
}

struct SystemNow;

#[async_trait]
impl ActivityHandler for SystemNow {
    async fn execute(
        &self,
        _ctx: ActivityContext,
        _input: Value,
    ) -> std::result::Result<Value, ActivityError> {
        Ok(serde_json::to_value(Utc::now())?)
    }
}

struct SystemNewGuid;

#[async_trait]
impl ActivityHandler for SystemNewGuid {
    async fn execute(
        &self,
        _ctx: ActivityContext,
        _input: Value,
    ) -> std::result::Result<Value, ActivityError> {
        Ok(serde_json::to_value(Uuid::new_v4())?)
    }
}

fn system_activity(name: &str) -> Option<Arc<dyn ActivityHandler>> {
    match name {
        SYSTEM_NOW_ACTIVITY => Some(Arc::new(SystemNow)),
        SYSTEM_NEW_GUID_ACTIVITY => Some(Arc::new(SystemNewGuid)),
        _ => None,
    }
}

#[derive(Clone)]
enum Outcome {
    Completed(Value),
    Failed(ActivityError),
}

/// What happened when an outcome was offered to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recorded {
    /// Appended; `retrying` tells whether another attempt follows.
    Appended { retrying: bool },
    /// Nothing appended: the activity already has a final outcome or the
    /// instance finished.
    Skipped,
}

/// Executes activity tasks and records their outcomes.
pub struct ActivityDispatcher<L: EventLog> {
    log: L,
    activities: ActivityRegistry,
    retry: RetryPolicy,
    store_retry: RetryPolicy,
    locks: InstanceLocks,
    resume_tx: mpsc::UnboundedSender<InstanceId>,
}

impl<L> ActivityDispatcher<L>
where
    L: EventLog + Clone + 'static,
{
    /// Creates a dispatcher. Instances whose activities settle are sent on `resume_tx`.
    pub fn new(
        log: L,
        activities: ActivityRegistry,
        retry: RetryPolicy,
        locks: InstanceLocks,
        resume_tx: mpsc::UnboundedSender<InstanceId>,
    ) -> Self {
        Self {
            log,
            activities,
            retry,
            store_retry: RetryPolicy::default(),
            locks,
            resume_tx,
        }
    }

    /// Sets how often an outcome is offered again while the log is unavailable.
    pub fn with_store_retry(mut self, store_retry: RetryPolicy) -> Self {
        self.store_retry = store_retry;
        self
    }

    fn resolve(&self, name: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.activities.get(name).or_else(|| system_activity(name))
    }

    /// Runs a task until it completes, fails finally or becomes moot.
    ///
    /// Attempt numbers come from history, so a task dispatched again after a
    /// restart continues where the recorded failures left off.
    #[tracing::instrument(
        skip(self, task),
        fields(
            instance_id = %task.instance_id,
            sequence_no = %task.sequence_no,
            activity = %task.name
        )
    )]
    pub async fn dispatch(&self, task: ActivityTask) -> Result<()> {
        if self.next_attempt(&task).await?.is_none() {
            tracing::debug!("activity no longer pending, skipped");
            return Ok(());
        }

        let Some(handler) = self.resolve(&task.name) else {
            tracing::warn!("activity not registered");
            let error = ActivityError::fatal(format!("Activity '{}' is not registered", task.name));
            let outcome = Outcome::Failed(error);
            if let Recorded::Appended { .. } = self.record_durably(&task, outcome).await? {
                self.notify(&task.instance_id);
            }
            return Ok(());
        };

        while let Some(attempt) = self.next_attempt(&task).await? {
            metrics::counter!("activity_attempts_total", "activity" => task.name.clone())
                .increment(1);
            let ctx = ActivityContext {
                instance_id: task.instance_id.clone(),
                sequence_no: task.sequence_no,
                name: task.name.clone(),
                attempt,
            };

            let started = Instant::now();
            let result = handler.execute(ctx, task.input.clone()).await;
            metrics::histogram!("activity_duration_seconds", "activity" => task.name.clone())
                .record(started.elapsed().as_secs_f64());

            let outcome = match result {
                Ok(value) => {
                    tracing::debug!(attempt, "activity completed");
                    Outcome::Completed(value)
                }
                Err(err) => {
                    metrics::counter!("activity_failures_total", "activity" => task.name.clone())
                        .increment(1);
                    tracing::warn!(attempt, error = %err, "activity attempt failed");
                    Outcome::Failed(err)
                }
            };

            match self.record_durably(&task, outcome).await? {
                Recorded::Appended { retrying: true } => {
                    tokio::time::sleep(self.retry.backoff_for(attempt)).await;
                }
                Recorded::Appended { retrying: false } => {
                    self.notify(&task.instance_id);
                    return Ok(());
                }
                Recorded::Skipped => return Ok(()),
            }
        }

        tracing::debug!("activity no longer pending, skipped");
        Ok(())
    }

    /// Next attempt number, or None if the instance is finished or the
    /// activity already has a final outcome.
    async fn next_attempt(&self, task: &ActivityTask) -> Result<Option<u32>> {
        let instance = self.load(&task.instance_id).await?;
        if instance.is_terminal() {
            return Ok(None);
        }
        Ok(instance.pending_task(task.sequence_no).map(|pending| pending.attempt))
    }

    async fn load(&self, instance_id: &InstanceId) -> Result<Instance> {
        let history = self.log.read_all(instance_id).await?;
        if history.is_empty() {
            return Err(SchedulerError::NotFound(instance_id.clone()));
        }
        Instance::from_history(&history)
            .ok_or_else(|| SchedulerError::CorruptHistory(instance_id.clone()))
    }

    /// Records an outcome, offering it again while the log is unavailable so a
    /// finished attempt is not lost to a store outage.
    async fn record_durably(&self, task: &ActivityTask, outcome: Outcome) -> Result<Recorded> {
        retry_transient(&self.store_retry, move || self.record(task, outcome.clone())).await
    }

    /// Appends the outcome of one attempt under the instance lock.
    async fn record(&self, task: &ActivityTask, outcome: Outcome) -> Result<Recorded> {
        let _guard = self.locks.lock(&task.instance_id).await;
        let instance = self.load(&task.instance_id).await?;

        if instance.is_settled(task.sequence_no) {
            tracing::debug!("outcome already recorded");
            return Ok(Recorded::Skipped);
        }
        // Late results are kept for terminated instances only.
        if matches!(
            instance.status(),
            OrchestrationStatus::Completed | OrchestrationStatus::Failed
        ) {
            tracing::warn!(status = %instance.status(), "dropping result for finished instance");
            return Ok(Recorded::Skipped);
        }

        let attempt = instance.failed_attempts(task.sequence_no) + 1;
        let (event, retrying) = match outcome {
            Outcome::Completed(value) => {
                (HistoryEvent::activity_completed(task.sequence_no, value), false)
            }
            Outcome::Failed(err) => {
                let retrying = err.is_retryable()
                    && self.retry.should_retry(attempt)
                    && !instance.is_terminal();
                let event = HistoryEvent::activity_failed(
                    task.sequence_no,
                    attempt,
                    err.message(),
                    retrying,
                );
                (event, retrying)
            }
        };

        let record = EventRecord::new(
            task.instance_id.clone(),
            instance.last_sequence().next(),
            event,
        );
        self.log.append_event(record).await?;
        Ok(Recorded::Appended { retrying })
    }

    fn notify(&self, instance_id: &InstanceId) {
        if self.resume_tx.send(instance_id.clone()).is_err() {
            tracing::debug!(%instance_id, "resume queue closed");
        }
    }
}
