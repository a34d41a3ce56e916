//! Background runtime wiring the scheduler and the dispatcher together.

use std::sync::Arc;
use std::time::Duration;

use event_store::{EventLog, InstanceId};
use orchestration::{ActivityTask, OrchestrationRegistry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::InstanceManager;
use crate::dispatcher::{ActivityDispatcher, ActivityRegistry};
use crate::error::Result;
use crate::locks::InstanceLocks;
use crate::retry::{RetryPolicy, retry_transient};
use crate::scheduler::Scheduler;

/// Runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeOptions {
    pub retry_policy: RetryPolicy,
    /// How often a pass or an outcome is retried while the log is unavailable.
    pub store_retry: RetryPolicy,
    /// How often `wait_for_completion` re-reads the instance status.
    pub poll_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            store_retry: RetryPolicy::new(20)
                .with_initial_backoff(Duration::from_millis(10))
                .with_max_backoff(Duration::from_secs(1)),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl RuntimeOptions {
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_store_retry(mut self, store_retry: RetryPolicy) -> Self {
        self.store_retry = store_retry;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// A running orchestration host.
///
/// Two loops serve the queues: the work loop runs each scheduled activity on
/// its own task, the resume loop runs a scheduler pass for each instance whose
/// activity settled. Work that fails on a store outage is retried under
/// `RuntimeOptions::store_retry`; what is still stranded after that is picked
/// up by recovery on the next start.
pub struct Runtime<L: EventLog> {
    manager: InstanceManager<L>,
    loops: Vec<JoinHandle<()>>,
}

impl<L> Runtime<L>
where
    L: EventLog + Clone + 'static,
{
    /// Starts the loops and recovers instances left unfinished in `log`.
    pub async fn start(
        log: L,
        orchestrations: OrchestrationRegistry,
        activities: ActivityRegistry,
        options: RuntimeOptions,
    ) -> Result<Self> {
        let locks = InstanceLocks::new();
        let (work_tx, work_rx) = mpsc::unbounded_channel::<ActivityTask>();
        let (resume_tx, resume_rx) = mpsc::unbounded_channel::<InstanceId>();

        let scheduler = Arc::new(Scheduler::new(
            log.clone(),
            orchestrations,
            locks.clone(),
            work_tx,
            resume_tx.clone(),
        ));
        let dispatcher = Arc::new(
            ActivityDispatcher::new(
                log.clone(),
                activities,
                options.retry_policy.clone(),
                locks.clone(),
                resume_tx,
            )
            .with_store_retry(options.store_retry.clone()),
        );

        let loops = vec![
            tokio::spawn(work_loop(dispatcher, work_rx, options.store_retry.clone())),
            tokio::spawn(resume_loop(scheduler.clone(), resume_rx, options.store_retry.clone())),
        ];

        let recovered = scheduler.recover().await?;
        tracing::info!(recovered, "runtime started");

        Ok(Self {
            manager: InstanceManager::new(log, scheduler, locks, options.poll_interval),
            loops,
        })
    }

    /// Returns a client for this runtime.
    pub fn client(&self) -> InstanceManager<L> {
        self.manager.clone()
    }

    /// Stops the loops. Activities already running are not awaited.
    pub async fn shutdown(self) {
        for handle in &self.loops {
            handle.abort();
        }
        for handle in self.loops {
            let _ = handle.await;
        }
        tracing::info!("runtime stopped");
    }
}

async fn work_loop<L>(
    dispatcher: Arc<ActivityDispatcher<L>>,
    mut work_rx: mpsc::UnboundedReceiver<ActivityTask>,
    store_retry: RetryPolicy,
) where
    L: EventLog + Clone + 'static,
{
    while let Some(task) = work_rx.recv().await {
        let dispatcher = dispatcher.clone();
        let store_retry = store_retry.clone();
        tokio::spawn(async move {
            let dispatcher: &ActivityDispatcher<L> = &dispatcher;
            let task = &task;
            let result =
                retry_transient(&store_retry, move || dispatcher.dispatch(task.clone())).await;
            if let Err(e) = result {
                metrics::counter!("engine_errors_total", "loop" => "work").increment(1);
                tracing::error!(
                    instance_id = %task.instance_id,
                    sequence_no = %task.sequence_no,
                    error = %e,
                    "activity dispatch failed"
                );
            }
        });
    }
}

async fn resume_loop<L>(
    scheduler: Arc<Scheduler<L>>,
    mut resume_rx: mpsc::UnboundedReceiver<InstanceId>,
    store_retry: RetryPolicy,
) where
    L: EventLog + Clone + 'static,
{
    while let Some(instance_id) = resume_rx.recv().await {
        let scheduler = scheduler.clone();
        let store_retry = store_retry.clone();
        tokio::spawn(async move {
            let scheduler: &Scheduler<L> = &scheduler;
            let id = &instance_id;
            if let Err(e) = retry_transient(&store_retry, move || scheduler.resume(id)).await {
                metrics::counter!("engine_errors_total", "loop" => "resume").increment(1);
                tracing::error!(%instance_id, error = %e, "scheduler pass failed");
            }
        });
    }
}
