use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::payment::{PaymentOutcome, PaymentRequest, PaymentResultEvent};
use crate::domain::shipment::{ShipmentProgressEvent, ShipmentRequest, ShipmentStatus};
use crate::messaging::{EventEnvelope, WorkflowEvent};

use super::collaborators::{CollaboratorError, EventBus, PaymentGateway, ShipmentService};

// ============================================================================
// Simulated external services
// ============================================================================
//
// Stand-ins for a payment gateway and a carrier. They answer the way the
// real ones would: asynchronously, on the payment-result and
// delivery-tracking streams. Outcomes are deterministic.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentScript {
    ApproveAll,
    /// Decline any amount strictly greater than this
    DeclineAbove(u64),
    DeclineAll,
    /// Accept the request but never report an outcome
    Silent,
}

pub struct SimulatedPaymentGateway {
    bus: Arc<dyn EventBus>,
    script: PaymentScript,
    initiated: AtomicU32,
    /// Accepted attempts by idempotency key
    attempts: DashMap<String, String>,
    refunds: Mutex<Vec<(String, u64)>>,
}

impl SimulatedPaymentGateway {
    pub fn new(bus: Arc<dyn EventBus>, script: PaymentScript) -> Self {
        Self {
            bus,
            script,
            initiated: AtomicU32::new(0),
            attempts: DashMap::new(),
            refunds: Mutex::new(Vec::new()),
        }
    }

    /// Charges actually started; idempotent replays are not counted
    pub fn initiated_count(&self) -> u32 {
        self.initiated.load(Ordering::SeqCst)
    }

    pub async fn refunds(&self) -> Vec<(String, u64)> {
        self.refunds.lock().await.clone()
    }

    fn decide(&self, amount: u64) -> Option<PaymentOutcome> {
        match self.script {
            PaymentScript::ApproveAll => Some(PaymentOutcome::Success),
            PaymentScript::DeclineAbove(limit) if amount > limit => Some(PaymentOutcome::Failed),
            PaymentScript::DeclineAbove(_) => Some(PaymentOutcome::Success),
            PaymentScript::DeclineAll => Some(PaymentOutcome::Failed),
            PaymentScript::Silent => None,
        }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<String, CollaboratorError> {
        if let Some(existing) = self.attempts.get(&request.idempotency_key) {
            tracing::debug!(
                order_id = %request.order_id,
                attempt_id = %existing.value(),
                "Simulated gateway replayed idempotent payment request"
            );
            return Ok(existing.value().clone());
        }

        self.initiated.fetch_add(1, Ordering::SeqCst);
        let attempt_id = format!("pay-{}", Uuid::new_v4());

        tracing::debug!(
            order_id = %request.order_id,
            attempt_id = %attempt_id,
            amount = request.amount,
            "Simulated gateway accepted payment request"
        );

        if let Some(outcome) = self.decide(request.amount) {
            let result = PaymentResultEvent {
                order_id: request.order_id.clone(),
                user_id: request.user_id.clone(),
                attempt_id: attempt_id.clone(),
                amount: request.amount,
                method: request.method,
                outcome,
                failure_reason: (outcome == PaymentOutcome::Failed).then(|| "card declined".to_string()),
                processed_at: Utc::now(),
            };

            self.bus
                .publish(&EventEnvelope::new(WorkflowEvent::PaymentResult(result)))
                .await
                .map_err(|e| CollaboratorError::Unavailable(format!("payment gateway ({})", e)))?;
        }

        self.attempts.insert(request.idempotency_key.clone(), attempt_id.clone());
        Ok(attempt_id)
    }

    async fn refund_payment(
        &self,
        order_id: &str,
        attempt_id: &str,
        amount: u64,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(order_id, attempt_id, amount, "Simulated gateway refunded payment");
        self.refunds.lock().await.push((order_id.to_string(), amount));
        Ok(())
    }
}

pub struct SimulatedCarrier {
    bus: Arc<dyn EventBus>,
    report_delivery: bool,
    shipped: AtomicU32,
}

impl SimulatedCarrier {
    /// With `report_delivery` the carrier immediately reports the parcel as
    /// in transit and then delivered; otherwise it stays quiet.
    pub fn new(bus: Arc<dyn EventBus>, report_delivery: bool) -> Self {
        Self {
            bus,
            report_delivery,
            shipped: AtomicU32::new(0),
        }
    }

    pub fn shipped_count(&self) -> u32 {
        self.shipped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShipmentService for SimulatedCarrier {
    async fn initiate_shipment(&self, request: &ShipmentRequest) -> Result<String, CollaboratorError> {
        self.shipped.fetch_add(1, Ordering::SeqCst);
        let tracking_number = format!("TRK-{}", &Uuid::new_v4().simple().to_string()[..12]);

        if self.report_delivery {
            for status in [ShipmentStatus::InTransit, ShipmentStatus::Delivered] {
                let progress = ShipmentProgressEvent {
                    order_id: request.order_id.clone(),
                    tracking_number: tracking_number.clone(),
                    status,
                    occurred_at: Utc::now(),
                };
                self.bus
                    .publish(&EventEnvelope::new(WorkflowEvent::ShipmentProgress(progress)))
                    .await
                    .map_err(|e| CollaboratorError::Unavailable(format!("carrier ({})", e)))?;
            }
        }

        Ok(tracking_number)
    }
}
