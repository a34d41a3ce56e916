//! Durable orchestration runtime.
//!
//! This crate drives orchestrations recorded in an `EventLog`:
//! 1. `Scheduler` replays an instance and persists the events each pass produces
//! 2. `ActivityDispatcher` runs scheduled activities with retries and records outcomes
//! 3. `InstanceManager` is the client API to start, query, wait on and terminate instances
//!
//! `Runtime` wires the three together over two queues and recovers unfinished
//! instances on startup.

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod locks;
pub mod retry;
pub mod runtime;
pub mod scheduler;

pub use client::{InstanceManager, InstanceStatus};
pub use dispatcher::{
    ActivityContext, ActivityDispatcher, ActivityError, ActivityHandler, ActivityRegistry,
    ActivityRegistryBuilderExt, FnActivity,
};
pub use error::{Result, SchedulerError};
pub use locks::InstanceLocks;
pub use retry::RetryPolicy;
pub use runtime::{Runtime, RuntimeOptions};
pub use scheduler::Scheduler;
