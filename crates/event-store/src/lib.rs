pub mod error;
pub mod event;
pub mod history;
pub mod memory;
pub mod store;

pub use common::InstanceId;
pub use error::{EventStoreError, Result};
pub use event::{EventRecord, SequenceNo};
pub use history::{
    ActivityCompletedData, ActivityFailedData, ActivityScheduledData, ErrorDetails, ErrorKind,
    HistoryEvent, OrchestrationCompletedData, OrchestrationFailedData, OrchestrationStartedData,
    OrchestrationTerminatedData,
};
pub use memory::InMemoryEventLog;
pub use store::{EventLog, EventLogExt};
