use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::InstanceId;
use crate::history::HistoryEvent;

/// Position of a record within an instance's history.
///
/// Sequence numbers start at 1 for the first record and increment by 1 for
/// each subsequent record of the same instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNo(u64);

impl SequenceNo {
    /// Creates a sequence number from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the position before the first record (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the sequence number of the first record (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next sequence number.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SequenceNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SequenceNo {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SequenceNo> for u64 {
    fn from(seq: SequenceNo) -> Self {
        seq.0
    }
}

/// A history event together with its position in the instance log.
///
/// This is the unit of persistence: an instance's log is an ordered list of
/// records with consecutive sequence numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// The instance this record belongs to.
    pub instance_id: InstanceId,

    /// Position of the record within the instance log.
    pub sequence_no: SequenceNo,

    /// When the record was created.
    pub timestamp: DateTime<Utc>,

    /// The recorded event.
    pub event: HistoryEvent,
}

impl EventRecord {
    /// Creates a record stamped with the current time.
    pub fn new(instance_id: InstanceId, sequence_no: SequenceNo, event: HistoryEvent) -> Self {
        Self {
            instance_id,
            sequence_no,
            timestamp: Utc::now(),
            event,
        }
    }

    /// Numbers a batch of events consecutively, starting after `last`.
    pub fn sequence(
        instance_id: &InstanceId,
        last: SequenceNo,
        events: impl IntoIterator<Item = HistoryEvent>,
    ) -> Vec<EventRecord> {
        let mut seq = last;
        events
            .into_iter()
            .map(|event| {
                seq = seq.next();
                EventRecord::new(instance_id.clone(), seq, event)
            })
            .collect()
    }
}
