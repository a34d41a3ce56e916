use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventRecord, EventStoreError, InstanceId, Result, SequenceNo,
    store::{EventLog, validate_records_for_append},
};

/// In-memory event log implementation.
///
/// Keeps one record list per instance behind a single lock, so appends are
/// atomic and readers always observe a gap-free prefix. Clones share the
/// same storage, which lets tests simulate a process restart by building a
/// fresh runtime over a clone of the log.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    instances: Arc<RwLock<HashMap<InstanceId, Vec<EventRecord>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventLog {
    /// Creates a new empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn record_count(&self) -> usize {
        self.instances.read().await.values().map(Vec::len).sum()
    }

    /// Simulates an outage: while set, every operation fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::Unavailable(
                "in-memory log is switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, records: Vec<EventRecord>) -> Result<SequenceNo> {
        self.check_available()?;
        validate_records_for_append(&records)?;

        let Some(first) = records.first() else {
            return Err(EventStoreError::InvalidAppend(
                "Cannot append empty record list".to_string(),
            ));
        };
        let instance_id = first.instance_id.clone();
        let first_seq = first.sequence_no;

        let mut store = self.instances.write().await;

        // Next free position for this instance
        let next = store
            .get(&instance_id)
            .and_then(|log| log.last())
            .map(|r| r.sequence_no.next())
            .unwrap_or(SequenceNo::first());

        if first_seq < next {
            return Err(EventStoreError::Conflict {
                instance_id,
                sequence_no: first_seq,
                next,
            });
        }
        if first_seq > next {
            return Err(EventStoreError::InvalidAppend(format!(
                "Appending at {first_seq} would leave a gap, next is {next}"
            )));
        }

        let last = records
            .last()
            .map(|r| r.sequence_no)
            .unwrap_or(first_seq);
        let count = records.len();
        store.entry(instance_id.clone()).or_default().extend(records);

        metrics::counter!("event_log_records_appended_total").increment(count as u64);
        tracing::trace!(%instance_id, %last, count, "records appended");

        Ok(last)
    }

    async fn read_all(&self, instance_id: &InstanceId) -> Result<Vec<EventRecord>> {
        self.check_available()?;
        let store = self.instances.read().await;
        Ok(store.get(instance_id).cloned().unwrap_or_default())
    }

    async fn read_from(
        &self,
        instance_id: &InstanceId,
        from: SequenceNo,
    ) -> Result<Vec<EventRecord>> {
        self.check_available()?;
        let store = self.instances.read().await;
        Ok(store
            .get(instance_id)
            .map(|log| {
                log.iter()
                    .filter(|r| r.sequence_no >= from)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn last_sequence(&self, instance_id: &InstanceId) -> Result<Option<SequenceNo>> {
        self.check_available()?;
        let store = self.instances.read().await;
        Ok(store
            .get(instance_id)
            .and_then(|log| log.last())
            .map(|r| r.sequence_no))
    }

    async fn list_instances(&self) -> Result<Vec<InstanceId>> {
        self.check_available()?;
        let store = self.instances.read().await;
        let mut ids: Vec<_> = store.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
