use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::order::{Order, OrderStage};

// ============================================================================
// Notifications
// ============================================================================
//
// Append-only user-facing messages. The only mutation is flipping `read`.
// Each workflow stage has its own category and wording.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationCategory {
    OrderCreated,
    OrderConfirmed,
    PaymentInitiated,
    PaymentSucceeded,
    PaymentFailed,
    ShipmentStarted,
    DeliveryCompleted,
    OrderCancelled,
    InventoryLow,
    SystemAlert,
}

impl NotificationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::OrderCreated => "order-created",
            NotificationCategory::OrderConfirmed => "order-confirmed",
            NotificationCategory::PaymentInitiated => "payment-initiated",
            NotificationCategory::PaymentSucceeded => "payment-succeeded",
            NotificationCategory::PaymentFailed => "payment-failed",
            NotificationCategory::ShipmentStarted => "shipment-started",
            NotificationCategory::DeliveryCompleted => "delivery-completed",
            NotificationCategory::OrderCancelled => "order-cancelled",
            NotificationCategory::InventoryLow => "inventory-low",
            NotificationCategory::SystemAlert => "system-alert",
        }
    }

    pub fn default_priority(&self) -> NotificationPriority {
        match self {
            NotificationCategory::DeliveryCompleted | NotificationCategory::PaymentFailed => {
                NotificationPriority::High
            }
            NotificationCategory::OrderCancelled | NotificationCategory::InventoryLow => {
                NotificationPriority::High
            }
            NotificationCategory::SystemAlert => NotificationPriority::Urgent,
            _ => NotificationPriority::Normal,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub category: NotificationCategory,
    pub title: String,
    pub body: String,
    pub related_order_id: Option<String>,
    pub priority: NotificationPriority,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        category: NotificationCategory,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            category,
            title: title.into(),
            body: body.into(),
            related_order_id: None,
            priority: category.default_priority(),
            read: false,
            created_at: Utc::now(),
        }
    }

    pub fn for_order(mut self, order_id: impl Into<String>) -> Self {
        self.related_order_id = Some(order_id.into());
        self
    }

    /// The message a customer gets when their order enters `stage`.
    ///
    /// Cancellation wording depends on why, so it has its own constructors.
    pub fn for_stage(order: &Order) -> Self {
        let id = order.id.as_str();
        let (category, title, body) = match order.stage {
            OrderStage::Received => (
                NotificationCategory::OrderCreated,
                "Order received".to_string(),
                format!("We received order {} totalling {}.", id, format_amount(order.total_amount)),
            ),
            OrderStage::StockReserved => (
                NotificationCategory::OrderConfirmed,
                "Order confirmed".to_string(),
                format!("All items in order {} are reserved for you.", id),
            ),
            OrderStage::PaymentPending => (
                NotificationCategory::PaymentInitiated,
                "Payment in progress".to_string(),
                format!(
                    "We requested a payment of {} by {} for order {}.",
                    format_amount(order.total_amount),
                    order.payment_method.as_str(),
                    id
                ),
            ),
            OrderStage::Paid => (
                NotificationCategory::PaymentSucceeded,
                "Payment succeeded".to_string(),
                format!("Payment for order {} went through.", id),
            ),
            OrderStage::Shipped => (
                NotificationCategory::ShipmentStarted,
                "Order shipped".to_string(),
                match &order.tracking_number {
                    Some(tracking) => format!("Order {} is on its way. Tracking number: {}.", id, tracking),
                    None => format!("Order {} is on its way.", id),
                },
            ),
            OrderStage::Delivered => (
                NotificationCategory::DeliveryCompleted,
                "Order delivered".to_string(),
                format!("Order {} was delivered. Enjoy!", id),
            ),
            OrderStage::Cancelled => (
                NotificationCategory::OrderCancelled,
                "Order cancelled".to_string(),
                format!(
                    "Order {} was cancelled: {}.",
                    id,
                    order.cancel_reason.as_deref().unwrap_or("no reason given")
                ),
            ),
        };

        Notification::new(order.user_id.clone(), category, title, body).for_order(id)
    }

    pub fn payment_failed(order: &Order, reason: Option<&str>) -> Self {
        Notification::new(
            order.user_id.clone(),
            NotificationCategory::PaymentFailed,
            "Payment failed",
            format!(
                "Payment for order {} failed ({}). The order was cancelled and nothing was charged.",
                order.id,
                reason.unwrap_or("declined")
            ),
        )
        .for_order(order.id.clone())
    }

    pub fn inventory_low(recipient: &str, product_id: &str, product_name: &str, remaining: u64) -> Self {
        Notification::new(
            recipient,
            NotificationCategory::InventoryLow,
            "Inventory low",
            format!("{} ({}) is down to {} units.", product_name, product_id, remaining),
        )
    }

    pub fn system_alert(user_id: &str, order_id: &str, message: impl Into<String>) -> Self {
        Notification::new(user_id, NotificationCategory::SystemAlert, "Order delayed", message)
            .for_order(order_id)
    }
}

fn format_amount(minor_units: u64) -> String {
    format!("{}.{:02}", minor_units / 100, minor_units % 100)
}
