use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::aggregate::Order;
use super::value_objects::{OrderItem, OrderStage};

// ============================================================================
// Order Events - facts published on the order-lifecycle stream
// ============================================================================

/// An order reached `stage` at `occurred_at`.
///
/// Published once per applied transition; consumers may see it more than once.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderLifecycleEvent {
    pub order_id: String,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub total_amount: u64,
    pub stage: OrderStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

impl OrderLifecycleEvent {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            items: order.items.clone(),
            total_amount: order.total_amount,
            stage: order.stage,
            reason: order.cancel_reason.clone(),
            created_at: order.created_at,
            occurred_at: order.updated_at,
        }
    }
}

/// Someone asked for the order to be cancelled
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CancellationRequested {
    pub order_id: String,
    pub reason: String,
    #[serde(default)]
    pub requested_by: Option<String>,
    pub requested_at: DateTime<Utc>,
}
