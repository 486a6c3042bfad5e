use async_trait::async_trait;

use crate::domain::inventory::{InventoryAdjustment, StockShortfall};
use crate::domain::notification::Notification;
use crate::domain::order::{Order, OrderItem};
use crate::domain::payment::PaymentRequest;
use crate::domain::shipment::ShipmentRequest;
use crate::messaging::EventEnvelope;

// ============================================================================
// Collaborator Seams
// ============================================================================
//
// Everything the coordinator touches outside its own process. Each call is
// bounded by the coordinator's timeout; implementations must not block
// forever either.
//
// ============================================================================

/// Authoritative record of each order's stage
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> anyhow::Result<()>;

    async fn load(&self, order_id: &str) -> anyhow::Result<Option<Order>>;

    /// Persist the order after a transition. Must be durable on return.
    async fn save(&self, order: &Order) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StockError {
    #[error("Insufficient stock for {} product(s)", .0.len())]
    Insufficient(Vec<StockShortfall>),

    #[error("Reservation for order {0} was already released")]
    AlreadyReleased(String),

    #[error("Stock ledger unavailable: {0}")]
    Unavailable(String),
}

/// Linearizable stock ledger.
///
/// `reserve_stock` is all-or-nothing across the item list and idempotent per
/// order id; `compensate_stock` credits back whatever the order still holds
/// and is a no-op the second time.
#[async_trait]
pub trait StockLedger: Send + Sync {
    async fn reserve_stock(
        &self,
        order_id: &str,
        items: &[OrderItem],
    ) -> Result<Vec<InventoryAdjustment>, StockError>;

    async fn compensate_stock(&self, order_id: &str) -> Result<Vec<InventoryAdjustment>, StockError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("{0} rejected the request: {1}")]
    Rejected(String, String),
}

/// Fire-and-forget: the outcome arrives later on the payment-result stream
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the attempt id. A request whose `idempotency_key` was already
    /// accepted returns the original attempt id and starts no new charge.
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<String, CollaboratorError>;

    async fn refund_payment(
        &self,
        order_id: &str,
        attempt_id: &str,
        amount: u64,
    ) -> Result<(), CollaboratorError>;
}

/// Progress arrives later on the delivery-tracking stream
#[async_trait]
pub trait ShipmentService: Send + Sync {
    /// Returns the tracking number
    async fn initiate_shipment(&self, request: &ShipmentRequest) -> Result<String, CollaboratorError>;
}

/// At-least-once, ordered per envelope key
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

/// Best-effort and non-blocking; failures are the sink's problem
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification);
}
