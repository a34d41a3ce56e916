//! Demo error types.

use orchestration::RegistryError;
use scheduler::SchedulerError;
use thiserror::Error;

/// Errors surfaced by the demo application.
#[derive(Debug, Error)]
pub enum DemoError {
    /// Runtime error.
    #[error("Runtime error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Registration error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The metrics recorder could not be installed.
    #[error("Metrics error: {0}")]
    Metrics(String),
}
