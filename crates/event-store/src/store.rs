use async_trait::async_trait;

use crate::{EventRecord, EventStoreError, HistoryEvent, InstanceId, Result, SequenceNo};

/// Core trait for orchestration history logs.
///
/// A log holds one append-only list of records per instance. Records are
/// never mutated or deleted once appended. All implementations must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends records to an instance log.
    ///
    /// Records are appended atomically - either all succeed or none do.
    /// Fails with `Conflict` if the first sequence number is already used.
    ///
    /// Returns the sequence number of the last appended record.
    async fn append(&self, records: Vec<EventRecord>) -> Result<SequenceNo>;

    /// Retrieves the full history of an instance.
    ///
    /// Records are returned in sequence order. Unknown instances yield an
    /// empty list.
    async fn read_all(&self, instance_id: &InstanceId) -> Result<Vec<EventRecord>>;

    /// Retrieves the history of an instance starting at a sequence number (inclusive).
    async fn read_from(&self, instance_id: &InstanceId, from: SequenceNo)
    -> Result<Vec<EventRecord>>;

    /// Returns the sequence number of the last record, or None if the instance
    /// doesn't exist.
    async fn last_sequence(&self, instance_id: &InstanceId) -> Result<Option<SequenceNo>>;

    /// Lists every instance that has at least one record.
    async fn list_instances(&self) -> Result<Vec<InstanceId>>;
}

/// Extension trait providing convenience methods for event logs.
#[async_trait]
pub trait EventLogExt: EventLog {
    /// Appends a single record.
    async fn append_event(&self, record: EventRecord) -> Result<SequenceNo> {
        self.append(vec![record]).await
    }

    /// Appends events after `last`, numbering them consecutively.
    async fn append_after(
        &self,
        instance_id: &InstanceId,
        last: SequenceNo,
        events: Vec<HistoryEvent>,
    ) -> Result<SequenceNo> {
        self.append(EventRecord::sequence(instance_id, last, events))
            .await
    }

    /// Checks if an instance exists (has any records).
    async fn exists(&self, instance_id: &InstanceId) -> Result<bool> {
        Ok(self.last_sequence(instance_id).await?.is_some())
    }
}

// Blanket implementation for all EventLog implementations
impl<T: EventLog + ?Sized> EventLogExt for T {}

/// Validates records before appending.
///
/// A valid batch is non-empty, targets a single instance, carries consecutive
/// sequence numbers, and every `ActivityScheduled` event names its own record.
pub fn validate_records_for_append(records: &[EventRecord]) -> Result<()> {
    let Some(first) = records.first() else {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append empty record list".to_string(),
        ));
    };

    if first.sequence_no < SequenceNo::first() {
        return Err(EventStoreError::InvalidAppend(
            "Sequence numbers start at 1".to_string(),
        ));
    }

    let mut expected = first.sequence_no;
    for (index, record) in records.iter().enumerate() {
        if record.instance_id != first.instance_id {
            return Err(EventStoreError::InvalidAppend(
                "All records must be for the same instance".to_string(),
            ));
        }
        if index > 0 {
            expected = expected.next();
        }
        if record.sequence_no != expected {
            return Err(EventStoreError::InvalidAppend(format!(
                "Sequence numbers must be consecutive. Expected {}, got {}",
                expected, record.sequence_no
            )));
        }
        if let HistoryEvent::ActivityScheduled(data) = &record.event
            && data.sequence_no != record.sequence_no
        {
            return Err(EventStoreError::InvalidAppend(format!(
                "ActivityScheduled at {} refers to sequence {}",
                record.sequence_no, data.sequence_no
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(instance: &str, seq: u64, event: HistoryEvent) -> EventRecord {
        EventRecord::new(InstanceId::from(instance), SequenceNo::new(seq), event)
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            validate_records_for_append(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn mixed_instances_are_rejected() {
        let records = vec![
            record("a", 1, HistoryEvent::orchestration_started("x", json!(null))),
            record("b", 2, HistoryEvent::orchestration_terminated("x")),
        ];
        assert!(validate_records_for_append(&records).is_err());
    }

    #[test]
    fn gaps_are_rejected() {
        let records = vec![
            record("a", 1, HistoryEvent::orchestration_started("x", json!(null))),
            record("a", 3, HistoryEvent::orchestration_terminated("x")),
        ];
        assert!(validate_records_for_append(&records).is_err());
    }

    #[test]
    fn scheduled_activity_must_reference_its_own_record() {
        let records = vec![record(
            "a",
            2,
            HistoryEvent::activity_scheduled(SequenceNo::new(5), "Step", json!(null)),
        )];
        assert!(validate_records_for_append(&records).is_err());

        let records = vec![record(
            "a",
            2,
            HistoryEvent::activity_scheduled(SequenceNo::new(2), "Step", json!(null)),
        )];
        assert!(validate_records_for_append(&records).is_ok());
    }
}
