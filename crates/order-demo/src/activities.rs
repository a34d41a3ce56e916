//! Order activities.
//!
//! The three checks ask a [`Checker`] for their verdict so tests can pin the
//! outcome; the binary uses [`RandomChecker`].

use std::sync::Arc;

use async_trait::async_trait;
use orchestration::RegistryError;
use rand::Rng;
use scheduler::{ActivityContext, ActivityError, ActivityHandler, ActivityRegistry};
use serde_json::Value;

use crate::order::{Order, OrderStatus};

pub const CHECK_INVENTORY: &str = "CheckInventory";
pub const CHECK_CUSTOMER: &str = "CheckCustomer";
pub const CHECK_FULLFILLMENT: &str = "CheckFullfillment";
pub const SEND_TO_FULLFILLMENT: &str = "SendToFullfillment";

/// The checks an order goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    Inventory,
    Customer,
    Fullfillment,
}

impl Check {
    pub fn activity_name(&self) -> &'static str {
        match self {
            Check::Inventory => CHECK_INVENTORY,
            Check::Customer => CHECK_CUSTOMER,
            Check::Fullfillment => CHECK_FULLFILLMENT,
        }
    }

    fn apply(&self, order: &mut Order, passed: bool) {
        match self {
            Check::Inventory => {
                order.inventory_checked = passed;
                order.status = OrderStatus::InventoryDone;
            }
            Check::Customer => {
                order.customer_checked = passed;
                order.status = OrderStatus::CustomerDone;
            }
            Check::Fullfillment => {
                order.can_fulfill = passed;
                order.status = OrderStatus::FullfillmentDone;
            }
        }
    }
}

/// Decides whether an order passes a check.
pub trait Checker: Send + Sync {
    fn check(&self, check: Check, order: &Order) -> bool;
}

/// Flips a coin for every check.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomChecker;

impl Checker for RandomChecker {
    fn check(&self, _check: Check, _order: &Order) -> bool {
        rand::rng().random_bool(0.5)
    }
}

/// Returns the same verdict for each check every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedChecker {
    pub inventory: bool,
    pub customer: bool,
    pub fullfillment: bool,
}

impl FixedChecker {
    pub fn new(inventory: bool, customer: bool, fullfillment: bool) -> Self {
        Self {
            inventory,
            customer,
            fullfillment,
        }
    }
}

impl Checker for FixedChecker {
    fn check(&self, check: Check, _order: &Order) -> bool {
        match check {
            Check::Inventory => self.inventory,
            Check::Customer => self.customer,
            Check::Fullfillment => self.fullfillment,
        }
    }
}

struct CheckActivity {
    check: Check,
    checker: Arc<dyn Checker>,
}

#[async_trait]
impl ActivityHandler for CheckActivity {
    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let mut order: Order = serde_json::from_value(input)?;
        let passed = self.checker.check(self.check, &order);
        self.check.apply(&mut order, passed);
        tracing::info!(
            order_id = %order.id,
            instance_id = %ctx.instance_id,
            attempt = ctx.attempt,
            passed,
            "{} done",
            self.check.activity_name()
        );
        Ok(serde_json::to_value(order)?)
    }
}

struct SendToFullfillment;

#[async_trait]
impl ActivityHandler for SendToFullfillment {
    async fn execute(&self, ctx: ActivityContext, input: Value) -> Result<Value, ActivityError> {
        let mut order: Order = serde_json::from_value(input)?;
        if !order.can_fulfill {
            return Err(ActivityError::fatal(format!(
                "Order {} cannot be fulfilled",
                order.id
            )));
        }
        order.status = OrderStatus::Handled;
        tracing::info!(
            order_id = %order.id,
            instance_id = %ctx.instance_id,
            "order sent to fulfilment"
        );
        Ok(serde_json::to_value(order)?)
    }
}

/// Builds the activity registry for the order workflow.
pub fn order_activities<C: Checker + 'static>(
    checker: C,
) -> Result<ActivityRegistry, RegistryError> {
    let checker: Arc<dyn Checker> = Arc::new(checker);
    let mut builder = ActivityRegistry::builder();
    for check in [Check::Inventory, Check::Customer, Check::Fullfillment] {
        builder = builder.register(
            check.activity_name(),
            Arc::new(CheckActivity {
                check,
                checker: checker.clone(),
            }),
        );
    }
    builder
        .register(SEND_TO_FULLFILLMENT, Arc::new(SendToFullfillment))
        .build()
}
