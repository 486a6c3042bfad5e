use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::order::PaymentMethod;

// ============================================================================
// Payment Value Objects & Events
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Pending,
    Success,
    Failed,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Pending => "pending",
            PaymentOutcome::Success => "success",
            PaymentOutcome::Failed => "failed",
        }
    }
}

/// What the coordinator hands to the payment gateway
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: String,
    /// Repeating a request with the same key must not charge again
    pub idempotency_key: String,
    pub user_id: String,
    pub amount: u64,
    pub method: PaymentMethod,
}

/// Payment-result stream payload, keyed by order id
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PaymentResultEvent {
    pub order_id: String,
    pub user_id: String,
    pub attempt_id: String,
    pub amount: u64,
    pub method: PaymentMethod,
    pub outcome: PaymentOutcome,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub processed_at: DateTime<Utc>,
}
