//! The order moved through the processing workflow.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where an order is in the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    InventoryDone,
    CustomerDone,
    FullfillmentDone,
    Handled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::InventoryDone => "INVENTORY_DONE",
            OrderStatus::CustomerDone => "CUSTOMER_DONE",
            OrderStatus::FullfillmentDone => "FULLFILLMENT_DONE",
            OrderStatus::Handled => "HANDLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An order. Passed by value between activities; each step returns the updated copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_checked: bool,
    pub inventory_checked: bool,
    pub can_fulfill: bool,
    pub status: OrderStatus,
}

impl Order {
    /// Creates a fresh order with a random id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_checked: false,
            inventory_checked: false,
            can_fulfill: false,
            status: OrderStatus::Created,
        }
    }
}

impl Default for Order {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_order_starts_created() {
        let order = Order::new();
        assert_eq!(order.status, OrderStatus::Created);
        assert!(!order.inventory_checked);
        assert!(!order.customer_checked);
        assert!(!order.can_fulfill);
    }

    #[test]
    fn status_serializes_as_screaming_snake_case() {
        let json = serde_json::to_value(OrderStatus::FullfillmentDone).unwrap();
        assert_eq!(json, serde_json::json!("FULLFILLMENT_DONE"));

        for status in [
            OrderStatus::Created,
            OrderStatus::InventoryDone,
            OrderStatus::CustomerDone,
            OrderStatus::FullfillmentDone,
            OrderStatus::Handled,
        ] {
            assert_eq!(serde_json::to_value(status).unwrap(), serde_json::json!(status.as_str()));
        }
    }

    #[test]
    fn order_json_shape() {
        let order = Order::new();
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "CREATED");
        assert_eq!(json["can_fulfill"], false);
        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }
}
