use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::order::{DeliveryDetails, OrderItem};

// ============================================================================
// Shipment Value Objects & Events
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    InTransit,
    OutForDelivery,
    Delivered,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ShipmentRequest {
    pub order_id: String,
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub delivery: DeliveryDetails,
}

/// Signal from the delivery-tracking collaborator, keyed by order id
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ShipmentProgressEvent {
    pub order_id: String,
    pub tracking_number: String,
    pub status: ShipmentStatus,
    pub occurred_at: DateTime<Utc>,
}
