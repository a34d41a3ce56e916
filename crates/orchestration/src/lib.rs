//! Replay engine for durable orchestrations.
//!
//! This crate provides:
//! - `OrchestrationContext`, the handle orchestrator code uses to call activities
//! - `run_turn`, which replays an orchestrator against its recorded history
//! - `Instance`, the status projection folded from history records
//! - `Registry`, the name-to-handler tables for orchestrators and activities

pub mod context;
pub mod engine;
pub mod error;
pub mod instance;
pub mod registry;

pub use context::{
    ActivityFuture, OrchestrationContext, SYSTEM_NEW_GUID_ACTIVITY, SYSTEM_NOW_ACTIVITY,
};
pub use engine::{TurnOutcome, TurnResult, run_turn};
pub use error::{ActivityFailure, OrchestratorError, RegistryError};
pub use instance::{ActivityTask, Instance, OrchestrationStatus};
pub use registry::{
    FnOrchestration, OrchestrationHandler, OrchestrationRegistry, Registry, RegistryBuilder,
};
