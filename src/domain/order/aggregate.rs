use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::commands::SubmitOrder;
use super::errors::OrderError;
use super::value_objects::{DeliveryDetails, OrderItem, OrderStage, PaymentMethod, ReservationState};

// ============================================================================
// Order - the record the coordinator owns
// ============================================================================
//
// Only the coordinator mutates `stage`, and only through `transition_to`,
// which enforces the lifecycle state machine. The record is persisted by an
// OrderStore after every applied transition.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: String,
    pub user_id: String,

    // Contents
    pub items: Vec<OrderItem>,
    pub total_amount: u64,
    pub delivery: DeliveryDetails,
    pub payment_method: PaymentMethod,

    // Workflow state
    pub stage: OrderStage,
    pub reservation: ReservationState,
    pub payment_attempt_id: Option<String>,
    pub refund_issued: bool,
    pub tracking_number: Option<String>,
    pub cancel_reason: Option<String>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Validate a submission and build a new order at `RECEIVED`
    pub fn place(request: SubmitOrder) -> Result<Self, OrderError> {
        if request.user_id.trim().is_empty() {
            return Err(OrderError::EmptyUserId);
        }
        if request.delivery.address.trim().is_empty() {
            return Err(OrderError::MissingDeliveryAddress);
        }

        let total_amount = Self::compute_total(&request.items)?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::now_v7().to_string(),
            user_id: request.user_id,
            items: request.items,
            total_amount,
            delivery: request.delivery,
            payment_method: request.payment_method,
            stage: OrderStage::Received,
            reservation: ReservationState::None,
            payment_attempt_id: None,
            refund_issued: false,
            tracking_number: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Σ(unit price × quantity), rejecting empty or malformed lines
    pub fn compute_total(items: &[OrderItem]) -> Result<u64, OrderError> {
        if items.is_empty() {
            return Err(OrderError::EmptyItems);
        }

        let mut total: u64 = 0;
        for item in items {
            if item.product_id.trim().is_empty() {
                return Err(OrderError::EmptyProductId);
            }
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                });
            }
            let line = item.line_total().ok_or(OrderError::TotalOverflow)?;
            total = total.checked_add(line).ok_or(OrderError::TotalOverflow)?;
        }

        Ok(total)
    }

    pub fn transition_to(&mut self, target: OrderStage) -> Result<(), OrderError> {
        if !self.stage.can_transition_to(target) {
            return Err(OrderError::InvalidStageTransition {
                from: self.stage,
                to: target,
            });
        }

        self.stage = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.transition_to(OrderStage::Cancelled)?;
        self.cancel_reason = Some(reason.into());
        Ok(())
    }

    pub fn holds_stock(&self) -> bool {
        self.reservation == ReservationState::Held
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn submission(items: Vec<OrderItem>) -> SubmitOrder {
        SubmitOrder {
            user_id: "U1".to_string(),
            items,
            delivery: DeliveryDetails {
                recipient: "Ada".to_string(),
                address: "1 Main St".to_string(),
                phone: None,
            },
            payment_method: PaymentMethod::CreditCard,
        }
    }

    #[test]
    fn test_place_computes_total() {
        let order = Order::place(submission(vec![
            OrderItem::new("P1", 2, 100),
            OrderItem::new("P2", 3, 250),
        ]))
        .unwrap();

        assert_eq!(order.total_amount, 200 + 750);
        assert_eq!(order.stage, OrderStage::Received);
        assert_eq!(order.reservation, ReservationState::None);
    }

    #[test]
    fn test_zero_price_items_are_valid() {
        let order = Order::place(submission(vec![OrderItem::new("FREEBIE", 1, 0)])).unwrap();
        assert_eq!(order.total_amount, 0);
    }

    #[test]
    fn test_order_ids_are_unique() {
        let ids: HashSet<String> = (0..100)
            .map(|_| Order::place(submission(vec![OrderItem::new("P1", 1, 10)])).unwrap().id)
            .collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_empty_items_rejected() {
        let result = Order::place(submission(vec![]));
        assert_eq!(result.unwrap_err(), OrderError::EmptyItems);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let result = Order::place(submission(vec![OrderItem::new("P1", 0, 10)]));
        assert!(matches!(result.unwrap_err(), OrderError::InvalidQuantity { quantity: 0, .. }));
    }

    #[test]
    fn test_blank_user_rejected() {
        let mut request = submission(vec![OrderItem::new("P1", 1, 10)]);
        request.user_id = "  ".to_string();
        assert_eq!(Order::place(request).unwrap_err(), OrderError::EmptyUserId);
    }

    #[test]
    fn test_missing_address_rejected() {
        let mut request = submission(vec![OrderItem::new("P1", 1, 10)]);
        request.delivery.address = String::new();
        assert_eq!(Order::place(request).unwrap_err(), OrderError::MissingDeliveryAddress);
    }

    #[test]
    fn test_overflowing_total_rejected() {
        let result = Order::place(submission(vec![
            OrderItem::new("P1", 1, u64::MAX),
            OrderItem::new("P2", 1, 1),
        ]));
        assert_eq!(result.unwrap_err(), OrderError::TotalOverflow);
    }

    #[test]
    fn test_transition_rejects_skip() {
        let mut order = Order::place(submission(vec![OrderItem::new("P1", 1, 10)])).unwrap();
        let result = order.transition_to(OrderStage::Paid);
        assert!(matches!(result, Err(OrderError::InvalidStageTransition { .. })));
        assert_eq!(order.stage, OrderStage::Received);
    }

    #[test]
    fn test_cancel_records_reason() {
        let mut order = Order::place(submission(vec![OrderItem::new("P1", 1, 10)])).unwrap();
        order.transition_to(OrderStage::StockReserved).unwrap();
        order.cancel("customer changed their mind").unwrap();

        assert_eq!(order.stage, OrderStage::Cancelled);
        assert_eq!(order.cancel_reason.as_deref(), Some("customer changed their mind"));
    }

    #[test]
    fn test_cancel_after_payment_rejected() {
        let mut order = Order::place(submission(vec![OrderItem::new("P1", 1, 10)])).unwrap();
        order.transition_to(OrderStage::StockReserved).unwrap();
        order.transition_to(OrderStage::PaymentPending).unwrap();
        order.transition_to(OrderStage::Paid).unwrap();

        assert!(order.cancel("too late").is_err());
        assert_eq!(order.stage, OrderStage::Paid);
        assert_eq!(order.cancel_reason, None);
    }
}
