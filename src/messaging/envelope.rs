use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use anyhow::Result;

use crate::domain::inventory::InventoryAdjustment;
use crate::domain::notification::Notification;
use crate::domain::order::{CancellationRequested, OrderLifecycleEvent};
use crate::domain::payment::PaymentResultEvent;
use crate::domain::shipment::ShipmentProgressEvent;

// ============================================================================
// Event Envelope - what travels on the bus
// ============================================================================
//
// Payload shape is decided once, here, at the transport boundary. Handlers
// only ever see a typed `WorkflowEvent`.
//
// ============================================================================

/// Logical streams, one topic each
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Stream {
    OrderLifecycle,
    OrderCancellation,
    InventoryAdjustment,
    PaymentResult,
    DeliveryTracking,
    Notification,
}

impl Stream {
    pub const ALL: [Stream; 6] = [
        Stream::OrderLifecycle,
        Stream::OrderCancellation,
        Stream::InventoryAdjustment,
        Stream::PaymentResult,
        Stream::DeliveryTracking,
        Stream::Notification,
    ];

    /// Streams the coordinator consumes
    pub const CONSUMED: [Stream; 4] = [
        Stream::OrderLifecycle,
        Stream::OrderCancellation,
        Stream::PaymentResult,
        Stream::DeliveryTracking,
    ];

    pub fn topic(&self) -> &'static str {
        match self {
            Stream::OrderLifecycle => "order-lifecycle",
            Stream::OrderCancellation => "order-cancellation",
            Stream::InventoryAdjustment => "inventory-adjustment",
            Stream::PaymentResult => "payment-result",
            Stream::DeliveryTracking => "delivery-tracking",
            Stream::Notification => "notification",
        }
    }

    pub fn from_topic(topic: &str) -> Option<Stream> {
        Stream::ALL.into_iter().find(|s| s.topic() == topic)
    }
}

/// Tagged union of every payload the workflow publishes or consumes
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WorkflowEvent {
    OrderLifecycle(OrderLifecycleEvent),
    CancellationRequested(CancellationRequested),
    InventoryAdjusted(InventoryAdjustment),
    PaymentResult(PaymentResultEvent),
    ShipmentProgress(ShipmentProgressEvent),
    Notification(Notification),
}

impl WorkflowEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::OrderLifecycle(_) => "order_lifecycle",
            WorkflowEvent::CancellationRequested(_) => "cancellation_requested",
            WorkflowEvent::InventoryAdjusted(_) => "inventory_adjusted",
            WorkflowEvent::PaymentResult(_) => "payment_result",
            WorkflowEvent::ShipmentProgress(_) => "shipment_progress",
            WorkflowEvent::Notification(_) => "notification",
        }
    }

    /// Stream and ordering key this payload belongs on
    pub fn route(&self) -> (Stream, String) {
        match self {
            WorkflowEvent::OrderLifecycle(e) => (Stream::OrderLifecycle, e.order_id.clone()),
            WorkflowEvent::CancellationRequested(e) => (Stream::OrderCancellation, e.order_id.clone()),
            WorkflowEvent::InventoryAdjusted(e) => (Stream::InventoryAdjustment, e.product_id.clone()),
            WorkflowEvent::PaymentResult(e) => (Stream::PaymentResult, e.order_id.clone()),
            WorkflowEvent::ShipmentProgress(e) => (Stream::DeliveryTracking, e.order_id.clone()),
            WorkflowEvent::Notification(n) => (Stream::Notification, n.user_id.clone()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub stream: Stream,
    /// Partition/ordering key
    pub key: String,
    pub emitted_at: DateTime<Utc>,
    pub event: WorkflowEvent,
}

impl EventEnvelope {
    pub fn new(event: WorkflowEvent) -> Self {
        let (stream, key) = event.route();
        Self {
            event_id: Uuid::new_v4(),
            stream,
            key,
            emitted_at: Utc::now(),
            event,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<WorkflowEvent> for EventEnvelope {
    fn from(event: WorkflowEvent) -> Self {
        EventEnvelope::new(event)
    }
}

// ============================================================================
// Tests
// ============================================================================
