//! The `OrderProcessing` orchestrator.

use orchestration::{OrchestrationContext, OrchestrationRegistry, OrchestratorError, RegistryError};
use serde_json::Value;
use tracing::Level;

use crate::activities::{CHECK_CUSTOMER, CHECK_FULLFILLMENT, CHECK_INVENTORY, SEND_TO_FULLFILLMENT};
use crate::order::Order;

pub const ORDER_PROCESSING: &str = "OrderProcessing";

/// Runs the three checks in order, then sends the order to fulfilment if it
/// passed. Returns the last version of the order.
pub async fn order_processing(
    ctx: OrchestrationContext,
    input: Value,
) -> Result<Value, OrchestratorError> {
    ctx.log(Level::INFO, "Starting OrderProcessing");
    let order: Order = serde_json::from_value(input)?;

    let order: Order = ctx.call_activity_typed(CHECK_INVENTORY, &order).await?;
    let order: Order = ctx.call_activity_typed(CHECK_CUSTOMER, &order).await?;
    let order: Order = ctx.call_activity_typed(CHECK_FULLFILLMENT, &order).await?;

    if !order.can_fulfill {
        ctx.log(Level::INFO, format!("Order {} cannot be fulfilled", order.id));
        return Ok(serde_json::to_value(order)?);
    }

    let order: Order = ctx.call_activity_typed(SEND_TO_FULLFILLMENT, &order).await?;
    ctx.log(Level::INFO, format!("Order {} handled", order.id));
    Ok(serde_json::to_value(order)?)
}

/// Builds the orchestration registry for the order workflow.
pub fn order_orchestrations() -> Result<OrchestrationRegistry, RegistryError> {
    OrchestrationRegistry::builder()
        .register_fn(ORDER_PROCESSING, order_processing)
        .build()
}
