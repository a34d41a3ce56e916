//! Order processing on the durable orchestration runtime.
//!
//! An order goes through CheckInventory, CheckCustomer and CheckFullfillment
//! and, if it can be fulfilled, SendToFullfillment. Each step is an activity;
//! the `OrderProcessing` orchestrator only sequences them.

pub mod activities;
pub mod config;
pub mod error;
pub mod order;
pub mod workflow;

use event_store::EventLog;
use scheduler::{Runtime, RuntimeOptions};

pub use activities::{Check, Checker, FixedChecker, RandomChecker, order_activities};
pub use config::Config;
pub use error::DemoError;
pub use order::{Order, OrderStatus};
pub use workflow::{ORDER_PROCESSING, order_orchestrations, order_processing};

/// Starts a runtime with the order workflow and its activities registered.
pub async fn start_runtime<L, C>(
    log: L,
    checker: C,
    options: RuntimeOptions,
) -> Result<Runtime<L>, DemoError>
where
    L: EventLog + Clone + 'static,
    C: Checker + 'static,
{
    let runtime = Runtime::start(
        log,
        order_orchestrations()?,
        order_activities(checker)?,
        options,
    )
    .await?;
    Ok(runtime)
}
