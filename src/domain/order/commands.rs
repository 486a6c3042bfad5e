use serde::{Deserialize, Serialize};
use super::value_objects::{DeliveryDetails, OrderItem, PaymentMethod};

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

/// A customer's request to place an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOrder {
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub delivery: DeliveryDetails,
    pub payment_method: PaymentMethod,
}
