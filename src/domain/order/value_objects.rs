use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Order Value Objects
// ============================================================================

/// A single order line. Prices are in minor currency units (cents).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: u64,
}

impl OrderItem {
    pub fn new(product_id: impl Into<String>, quantity: u32, unit_price: u64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Line total, `None` on overflow
    pub fn line_total(&self) -> Option<u64> {
        self.unit_price.checked_mul(u64::from(self.quantity))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeliveryDetails {
    pub recipient: String,
    pub address: String,
    pub phone: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    BankTransfer,
    DigitalWallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::DigitalWallet => "digital_wallet",
        }
    }
}

/// Lifecycle stage of an order.
///
/// ```text
/// RECEIVED → STOCK_RESERVED → PAYMENT_PENDING → PAID → SHIPPED → DELIVERED
///     └────────────┴──────────────┴──→ CANCELLED
/// ```
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStage {
    Received,
    StockReserved,
    PaymentPending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStage::Delivered | OrderStage::Cancelled)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStage::Received | OrderStage::StockReserved | OrderStage::PaymentPending
        )
    }

    /// The only stage a forward transition into `self` may start from.
    /// `Received` is initial and `Cancelled` has several predecessors.
    pub fn expected_predecessor(&self) -> Option<OrderStage> {
        match self {
            OrderStage::Received | OrderStage::Cancelled => None,
            OrderStage::StockReserved => Some(OrderStage::Received),
            OrderStage::PaymentPending => Some(OrderStage::StockReserved),
            OrderStage::Paid => Some(OrderStage::PaymentPending),
            OrderStage::Shipped => Some(OrderStage::Paid),
            OrderStage::Delivered => Some(OrderStage::Shipped),
        }
    }

    pub fn can_transition_to(&self, target: OrderStage) -> bool {
        match target {
            OrderStage::Cancelled => self.is_cancellable(),
            OrderStage::Received => false,
            other => other.expected_predecessor() == Some(*self),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStage::Received => "RECEIVED",
            OrderStage::StockReserved => "STOCK_RESERVED",
            OrderStage::PaymentPending => "PAYMENT_PENDING",
            OrderStage::Paid => "PAID",
            OrderStage::Shipped => "SHIPPED",
            OrderStage::Delivered => "DELIVERED",
            OrderStage::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether this order currently holds stock in the ledger
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    #[default]
    None,
    Held,
    Released,
}

// ============================================================================
// Unit Tests
// ============================================================================
