// ============================================================================
// Order saga scenarios
// ============================================================================
//
// Each test wires the coordinator to in-memory collaborators and pumps the
// bus by hand, so delivery order (and duplication) is under test control.
//
// ============================================================================

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::domain::inventory::InventoryAdjustment;
use crate::domain::notification::NotificationCategory;
use crate::domain::order::{
    CancellationRequested, DeliveryDetails, Order, OrderItem, OrderStage, PaymentMethod, SubmitOrder,
};
use crate::domain::payment::{PaymentOutcome, PaymentRequest, PaymentResultEvent};
use crate::domain::shipment::{ShipmentProgressEvent, ShipmentRequest, ShipmentStatus};
use crate::messaging::{EventEnvelope, Stream, WorkflowEvent};
use crate::metrics::Metrics;
use crate::utils::IsTransient;
use crate::notifications::{NotificationHub, Subscription};
use crate::workflow::in_memory::{InMemoryEventBus, InMemoryOrderStore, InMemoryStockLedger};
use crate::workflow::simulation::{PaymentScript, SimulatedCarrier, SimulatedPaymentGateway};

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

struct Harness {
    coordinator: OrderWorkflowCoordinator,
    store: Arc<SpyStore>,
    ledger: Arc<InMemoryStockLedger>,
    bus: Arc<InMemoryEventBus>,
    gateway: Arc<SimulatedPaymentGateway>,
    carrier: Arc<SimulatedCarrier>,
    hub: Arc<NotificationHub>,
    metrics: Arc<Metrics>,
}

struct Overrides {
    ledger: Option<Arc<dyn StockLedger>>,
    payments: Option<Arc<dyn PaymentGateway>>,
    shipments: Option<Arc<dyn ShipmentService>>,
}

impl Overrides {
    fn none() -> Self {
        Self {
            ledger: None,
            payments: None,
            shipments: None,
        }
    }
}

async fn harness(script: PaymentScript, report_delivery: bool) -> Harness {
    build(script, report_delivery, |_, _| Overrides::none()).await
}

async fn build<F>(script: PaymentScript, report_delivery: bool, overrides: F) -> Harness
where
    F: FnOnce(Arc<InMemoryStockLedger>, Arc<SimulatedPaymentGateway>) -> Overrides,
{
    let bus = Arc::new(InMemoryEventBus::new());
    let store = Arc::new(SpyStore::default());
    let ledger = Arc::new(InMemoryStockLedger::new());
    ledger.restock("P1", "Keyboard", 10).await;
    ledger.restock("P2", "Mouse", 1).await;

    let gateway = Arc::new(SimulatedPaymentGateway::new(bus.clone(), script));
    let carrier = Arc::new(SimulatedCarrier::new(bus.clone(), report_delivery));
    let hub = Arc::new(NotificationHub::new(64));
    let metrics = Arc::new(Metrics::new().unwrap());

    let overrides = overrides(ledger.clone(), gateway.clone());

    let collaborators = Collaborators {
        store: store.clone(),
        ledger: overrides.ledger.unwrap_or_else(|| ledger.clone() as Arc<dyn StockLedger>),
        payments: overrides.payments.unwrap_or_else(|| gateway.clone() as Arc<dyn PaymentGateway>),
        shipments: overrides.shipments.unwrap_or_else(|| carrier.clone() as Arc<dyn ShipmentService>),
        bus: bus.clone(),
        notifier: hub.clone(),
    };

    let settings = WorkflowSettings {
        call_timeout: Duration::from_millis(100),
        low_stock_threshold: 2,
        operations_recipient: "ops".to_string(),
    };

    Harness {
        coordinator: OrderWorkflowCoordinator::new(collaborators, settings, metrics.clone()),
        store,
        ledger,
        bus,
        gateway,
        carrier,
        hub,
        metrics,
    }
}

impl Harness {
    /// Deliver everything on the bus, and whatever that produces, until quiet
    async fn pump(&self) -> Vec<HandlerOutcome> {
        let mut outcomes = Vec::new();
        loop {
            self.coordinator.drain_shipments().await;
            let batch = self.bus.take_pending().await;
            if batch.is_empty() {
                return outcomes;
            }
            for envelope in batch {
                outcomes.push(self.coordinator.handle(&envelope).await.unwrap());
            }
        }
    }

    async fn order(&self, order_id: &str) -> Order {
        self.coordinator.order(order_id).await.unwrap().unwrap()
    }

    async fn lifecycle_stages(&self, order_id: &str) -> Vec<OrderStage> {
        self.bus
            .published_on(Stream::OrderLifecycle)
            .await
            .into_iter()
            .filter(|e| e.key == order_id)
            .filter_map(|e| match e.event {
                WorkflowEvent::OrderLifecycle(event) => Some(event.stage),
                _ => None,
            })
            .collect()
    }

    async fn adjustments(&self) -> Vec<InventoryAdjustment> {
        self.bus
            .published_on(Stream::InventoryAdjustment)
            .await
            .into_iter()
            .filter_map(|e| match e.event {
                WorkflowEvent::InventoryAdjusted(adjustment) => Some(adjustment),
                _ => None,
            })
            .collect()
    }
}

fn submission(user_id: &str, items: Vec<OrderItem>) -> SubmitOrder {
    SubmitOrder {
        user_id: user_id.to_string(),
        items,
        delivery: DeliveryDetails {
            recipient: "Ada Lovelace".to_string(),
            address: "12 Analytical Row".to_string(),
            phone: Some("+44 20 0000 0000".to_string()),
        },
        payment_method: PaymentMethod::CreditCard,
    }
}

fn categories(subscription: &mut Subscription) -> Vec<NotificationCategory> {
    let mut seen = Vec::new();
    while let Some(notification) = subscription.try_recv() {
        seen.push(notification.category);
    }
    seen
}

fn payment_result(order: &Order, outcome: PaymentOutcome) -> EventEnvelope {
    EventEnvelope::new(WorkflowEvent::PaymentResult(PaymentResultEvent {
        order_id: order.id.clone(),
        user_id: order.user_id.clone(),
        attempt_id: order
            .payment_attempt_id
            .clone()
            .unwrap_or_else(|| "pay-unknown".to_string()),
        amount: order.total_amount,
        method: order.payment_method,
        outcome,
        failure_reason: (outcome == PaymentOutcome::Failed).then(|| "insufficient funds".to_string()),
        processed_at: Utc::now(),
    }))
}

fn cancellation(order_id: &str) -> EventEnvelope {
    EventEnvelope::new(WorkflowEvent::CancellationRequested(CancellationRequested {
        order_id: order_id.to_string(),
        reason: "changed my mind".to_string(),
        requested_by: Some("U1".to_string()),
        requested_at: Utc::now(),
    }))
}

fn delivered(order_id: &str) -> EventEnvelope {
    EventEnvelope::new(WorkflowEvent::ShipmentProgress(ShipmentProgressEvent {
        order_id: order_id.to_string(),
        tracking_number: "TRK-1".to_string(),
        status: ShipmentStatus::Delivered,
        occurred_at: Utc::now(),
    }))
}

// ----------------------------------------------------------------------------
// Misbehaving collaborators
// ----------------------------------------------------------------------------

/// In-memory store that remembers inserted ids and can refuse one save
#[derive(Default)]
struct SpyStore {
    inner: InMemoryOrderStore,
    inserted: std::sync::Mutex<Vec<String>>,
    refuse_save_at: std::sync::Mutex<Option<OrderStage>>,
    fail_loads: AtomicBool,
}

impl SpyStore {
    /// Fail the next save that would record `stage`
    fn refuse_next_save_at(&self, stage: OrderStage) {
        *self.refuse_save_at.lock().unwrap() = Some(stage);
    }

    fn inserted(&self) -> Vec<String> {
        self.inserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderStore for SpyStore {
    async fn insert(&self, order: &Order) -> anyhow::Result<()> {
        self.inner.insert(order).await?;
        self.inserted.lock().unwrap().push(order.id.clone());
        Ok(())
    }

    async fn load(&self, order_id: &str) -> anyhow::Result<Option<Order>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            anyhow::bail!("unexpected response loading order {}", order_id);
        }
        self.inner.load(order_id).await
    }

    async fn save(&self, order: &Order) -> anyhow::Result<()> {
        let refuse = {
            let mut refuse_at = self.refuse_save_at.lock().unwrap();
            if *refuse_at == Some(order.stage) {
                refuse_at.take();
                true
            } else {
                false
            }
        };
        if refuse {
            anyhow::bail!("order store write failed");
        }
        self.inner.save(order).await
    }
}

/// Applies the reservation, then hangs past any sane timeout
struct StallingLedger(Arc<InMemoryStockLedger>);

#[async_trait]
impl StockLedger for StallingLedger {
    async fn reserve_stock(
        &self,
        order_id: &str,
        items: &[OrderItem],
    ) -> Result<Vec<InventoryAdjustment>, StockError> {
        let applied = self.0.reserve_stock(order_id, items).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        applied
    }

    async fn compensate_stock(&self, order_id: &str) -> Result<Vec<InventoryAdjustment>, StockError> {
        self.0.compensate_stock(order_id).await
    }
}

struct StallingGateway;

#[async_trait]
impl PaymentGateway for StallingGateway {
    async fn initiate_payment(&self, _request: &PaymentRequest) -> Result<String, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("never".to_string())
    }

    async fn refund_payment(&self, _: &str, _: &str, _: u64) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Unavailable on the first call, then delegates
struct FlakyGateway {
    inner: Arc<SimulatedPaymentGateway>,
    failed_once: AtomicBool,
}

#[async_trait]
impl PaymentGateway for FlakyGateway {
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<String, CollaboratorError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("payment gateway".to_string()));
        }
        self.inner.initiate_payment(request).await
    }

    async fn refund_payment(&self, order_id: &str, attempt_id: &str, amount: u64) -> Result<(), CollaboratorError> {
        self.inner.refund_payment(order_id, attempt_id, amount).await
    }
}

struct RejectingCarrier;

#[async_trait]
impl ShipmentService for RejectingCarrier {
    async fn initiate_shipment(&self, _request: &ShipmentRequest) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Rejected(
            "carrier".to_string(),
            "address not serviceable".to_string(),
        ))
    }
}

// ----------------------------------------------------------------------------
// Submission
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_submit_computes_total_and_publishes_received() {
    let h = harness(PaymentScript::Silent, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 2, 100), OrderItem::new("P2", 1, 35)]))
        .await
        .unwrap();

    let order = h.order(&order_id).await;
    assert_eq!(order.total_amount, 235);
    assert_eq!(order.stage, OrderStage::Received);
    assert_eq!(h.lifecycle_stages(&order_id).await, vec![OrderStage::Received]);
    assert_eq!(h.metrics.orders_submitted.get(), 1);
}

#[tokio::test]
async fn test_submitted_order_ids_are_unique() {
    let h = harness(PaymentScript::Silent, false).await;

    let first = h.coordinator.submit(submission("U1", vec![OrderItem::new("P1", 1, 10)])).await.unwrap();
    let second = h.coordinator.submit(submission("U1", vec![OrderItem::new("P1", 1, 10)])).await.unwrap();

    assert_ne!(first, second);
}

#[tokio::test]
async fn test_invalid_submission_publishes_nothing() {
    let h = harness(PaymentScript::ApproveAll, false).await;
    let mut inbox = h.hub.subscribe("U1");

    let result = h.coordinator.submit(submission("U1", vec![])).await;

    assert!(matches!(result, Err(WorkflowError::Validation(_))));
    assert!(h.bus.published().await.is_empty());
    assert!(categories(&mut inbox).is_empty());
}

#[tokio::test]
async fn test_publish_failure_cancels_stored_order() {
    let h = harness(PaymentScript::ApproveAll, false).await;
    let mut inbox = h.hub.subscribe("U1");
    h.bus.set_failing(true);

    let result = h.coordinator.submit(submission("U1", vec![OrderItem::new("P1", 1, 10)])).await;

    assert!(matches!(result, Err(WorkflowError::Publish { .. })));
    assert!(categories(&mut inbox).is_empty());
    assert_eq!(h.metrics.orders_submitted.get(), 0);

    // The stored order is not left at RECEIVED
    let inserted = h.store.inserted();
    assert_eq!(inserted.len(), 1);
    let order = h.order(&inserted[0]).await;
    assert_eq!(order.stage, OrderStage::Cancelled);
    assert_eq!(order.cancel_reason.as_deref(), Some("order could not be announced"));
}

// ----------------------------------------------------------------------------
// End to end
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_happy_path_reaches_delivered() {
    let h = harness(PaymentScript::ApproveAll, true).await;
    let mut inbox = h.hub.subscribe("U1");

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 2, 100)]))
        .await
        .unwrap();
    h.pump().await;

    let order = h.order(&order_id).await;
    assert_eq!(order.stage, OrderStage::Delivered);
    assert_eq!(order.total_amount, 200);
    assert!(order.tracking_number.is_some());

    assert_eq!(
        h.lifecycle_stages(&order_id).await,
        vec![
            OrderStage::Received,
            OrderStage::StockReserved,
            OrderStage::PaymentPending,
            OrderStage::Paid,
            OrderStage::Shipped,
            OrderStage::Delivered,
        ]
    );

    assert_eq!(
        categories(&mut inbox),
        vec![
            NotificationCategory::OrderCreated,
            NotificationCategory::OrderConfirmed,
            NotificationCategory::PaymentInitiated,
            NotificationCategory::PaymentSucceeded,
            NotificationCategory::ShipmentStarted,
            NotificationCategory::DeliveryCompleted,
        ]
    );

    assert_eq!(h.ledger.on_hand("P1").await, 8);
    assert_eq!(h.gateway.initiated_count(), 1);
    assert_eq!(h.carrier.shipped_count(), 1);
    assert_eq!(h.coordinator.tracked_locks(), 0);
}

#[tokio::test]
async fn test_insufficient_stock_cancels_without_payment() {
    let h = harness(PaymentScript::ApproveAll, true).await;
    let mut inbox = h.hub.subscribe("U1");

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 1, 100), OrderItem::new("P2", 3, 50)]))
        .await
        .unwrap();
    h.pump().await;

    let order = h.order(&order_id).await;
    assert_eq!(order.stage, OrderStage::Cancelled);
    assert!(order.cancel_reason.unwrap().contains("P2"));
    assert_eq!(
        h.lifecycle_stages(&order_id).await,
        vec![OrderStage::Received, OrderStage::Cancelled]
    );

    let seen = categories(&mut inbox);
    assert_eq!(
        seen.iter().filter(|c| **c == NotificationCategory::OrderCancelled).count(),
        1
    );
    assert_eq!(h.gateway.initiated_count(), 0);

    // Nothing was reserved, so nothing moved
    assert_eq!(h.ledger.on_hand("P1").await, 10);
    assert_eq!(h.ledger.on_hand("P2").await, 1);
    assert!(h.adjustments().await.is_empty());
}

#[tokio::test]
async fn test_declined_payment_releases_exactly_what_was_reserved() {
    let h = harness(PaymentScript::DeclineAll, true).await;
    let mut inbox = h.hub.subscribe("U1");

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 3, 100)]))
        .await
        .unwrap();
    h.pump().await;

    let order = h.order(&order_id).await;
    assert_eq!(order.stage, OrderStage::Cancelled);
    assert_eq!(h.ledger.on_hand("P1").await, 10);

    let deltas: Vec<i64> = h.adjustments().await.iter().map(|a| a.delta_qty).collect();
    assert_eq!(deltas, vec![-3, 3]);

    assert!(categories(&mut inbox).contains(&NotificationCategory::PaymentFailed));
    assert_eq!(h.metrics.compensations.with_label_values(&["stock_release"]).get(), 1);
    assert_eq!(h.carrier.shipped_count(), 0);
}

// ----------------------------------------------------------------------------
// Idempotency and ordering
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicate_received_event_reserves_once() {
    let h = harness(PaymentScript::Silent, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 2, 100)]))
        .await
        .unwrap();
    let received = h.bus.take_pending().await.remove(0);

    let first = h.coordinator.handle(&received).await.unwrap();
    let second = h.coordinator.handle(&received).await.unwrap();

    assert_eq!(first, HandlerOutcome::Advanced(OrderStage::PaymentPending));
    assert_eq!(
        second,
        HandlerOutcome::Dropped(DropReason::AlreadyApplied {
            current: OrderStage::PaymentPending
        })
    );
    assert_eq!(h.ledger.on_hand("P1").await, 8);
    assert_eq!(h.gateway.initiated_count(), 1);
    assert_eq!(h.order(&order_id).await.stage, OrderStage::PaymentPending);
}

#[tokio::test]
async fn test_duplicate_payment_success_ships_once() {
    let h = harness(PaymentScript::Silent, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 1, 100)]))
        .await
        .unwrap();
    h.pump().await;

    let pending = h.order(&order_id).await;
    let success = payment_result(&pending, PaymentOutcome::Success);

    assert_eq!(
        h.coordinator.handle(&success).await.unwrap(),
        HandlerOutcome::Advanced(OrderStage::Paid)
    );
    h.coordinator.drain_shipments().await;
    h.coordinator.handle(&success).await.unwrap();
    h.coordinator.drain_shipments().await;

    assert_eq!(h.order(&order_id).await.stage, OrderStage::Shipped);
    assert_eq!(h.carrier.shipped_count(), 1);
}

#[tokio::test]
async fn test_delivery_before_shipment_is_dropped() {
    let h = harness(PaymentScript::Silent, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 1, 100)]))
        .await
        .unwrap();
    h.pump().await;

    let outcome = h.coordinator.handle(&delivered(&order_id)).await.unwrap();

    assert_eq!(
        outcome,
        HandlerOutcome::Dropped(DropReason::UnexpectedStage {
            current: OrderStage::PaymentPending,
            expected: OrderStage::Shipped,
        })
    );
    assert_eq!(h.order(&order_id).await.stage, OrderStage::PaymentPending);
    assert_eq!(
        h.metrics.events_dropped.with_label_values(&["shipment_progress", "unexpected_stage"]).get(),
        1
    );
}

#[tokio::test]
async fn test_events_for_unknown_orders_are_dropped() {
    let h = harness(PaymentScript::Silent, false).await;

    let outcome = h.coordinator.handle(&delivered("no-such-order")).await.unwrap();
    assert_eq!(outcome, HandlerOutcome::Dropped(DropReason::UnknownOrder));

    let outcome = h.coordinator.handle(&cancellation("no-such-order")).await.unwrap();
    assert_eq!(outcome, HandlerOutcome::Dropped(DropReason::UnknownOrder));
}

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_cancellation_while_payment_pending_releases_stock() {
    let h = harness(PaymentScript::Silent, false).await;
    let mut inbox = h.hub.subscribe("U1");

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 4, 100)]))
        .await
        .unwrap();
    h.pump().await;
    assert_eq!(h.ledger.on_hand("P1").await, 6);

    let outcome = h.coordinator.handle(&cancellation(&order_id)).await.unwrap();

    assert_eq!(outcome, HandlerOutcome::Advanced(OrderStage::Cancelled));
    assert_eq!(h.ledger.on_hand("P1").await, 10);
    assert_eq!(categories(&mut inbox).last(), Some(&NotificationCategory::OrderCancelled));
}

#[tokio::test]
async fn test_payment_success_after_cancellation_is_refunded_once() {
    let h = harness(PaymentScript::Silent, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 2, 100)]))
        .await
        .unwrap();
    h.pump().await;
    let pending = h.order(&order_id).await;

    h.coordinator.handle(&cancellation(&order_id)).await.unwrap();

    let late_success = payment_result(&pending, PaymentOutcome::Success);
    let first = h.coordinator.handle(&late_success).await.unwrap();
    let second = h.coordinator.handle(&late_success).await.unwrap();

    assert_eq!(first, HandlerOutcome::Compensated);
    assert!(matches!(second, HandlerOutcome::Dropped(DropReason::AlreadyApplied { .. })));

    let order = h.order(&order_id).await;
    assert_eq!(order.stage, OrderStage::Cancelled);
    assert!(order.refund_issued);
    assert_eq!(h.gateway.refunds().await, vec![(order_id.clone(), 200)]);
    assert_eq!(h.ledger.on_hand("P1").await, 10);
    assert_eq!(h.carrier.shipped_count(), 0);
}

#[tokio::test]
async fn test_payment_failure_after_cancellation_does_not_double_release() {
    let h = harness(PaymentScript::Silent, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 2, 100)]))
        .await
        .unwrap();
    h.pump().await;
    let pending = h.order(&order_id).await;

    h.coordinator.handle(&cancellation(&order_id)).await.unwrap();
    let outcome = h
        .coordinator
        .handle(&payment_result(&pending, PaymentOutcome::Failed))
        .await
        .unwrap();

    assert!(matches!(outcome, HandlerOutcome::Dropped(_)));
    assert_eq!(h.ledger.on_hand("P1").await, 10);
}

#[tokio::test]
async fn test_cancellation_after_shipment_is_refused() {
    let h = harness(PaymentScript::ApproveAll, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 1, 100)]))
        .await
        .unwrap();
    h.pump().await;
    assert_eq!(h.order(&order_id).await.stage, OrderStage::Shipped);

    let outcome = h.coordinator.handle(&cancellation(&order_id)).await.unwrap();

    assert_eq!(
        outcome,
        HandlerOutcome::Dropped(DropReason::NotCancellable {
            current: OrderStage::Shipped
        })
    );
    assert_eq!(h.order(&order_id).await.stage, OrderStage::Shipped);
    assert_eq!(h.ledger.on_hand("P1").await, 9);
}

// ----------------------------------------------------------------------------
// Collaborator failures
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_reservation_timeout_compensates_and_cancels() {
    let h = build(PaymentScript::ApproveAll, false, |ledger, _| Overrides {
        ledger: Some(Arc::new(StallingLedger(ledger))),
        ..Overrides::none()
    })
    .await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 5, 100)]))
        .await
        .unwrap();
    h.pump().await;

    let order = h.order(&order_id).await;
    assert_eq!(order.stage, OrderStage::Cancelled);
    assert_eq!(h.ledger.on_hand("P1").await, 10);
    assert_eq!(h.gateway.initiated_count(), 0);
}

#[tokio::test]
async fn test_payment_initiation_timeout_compensates_and_cancels() {
    let h = build(PaymentScript::ApproveAll, false, |_, _| Overrides {
        payments: Some(Arc::new(StallingGateway)),
        ..Overrides::none()
    })
    .await;
    let mut inbox = h.hub.subscribe("U1");

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 2, 100)]))
        .await
        .unwrap();
    h.pump().await;

    assert_eq!(h.order(&order_id).await.stage, OrderStage::Cancelled);
    assert_eq!(h.ledger.on_hand("P1").await, 10);
    assert!(categories(&mut inbox).contains(&NotificationCategory::PaymentFailed));
}

#[tokio::test]
async fn test_unavailable_gateway_resumes_from_stock_reserved() {
    let h = build(PaymentScript::Silent, false, |_, gateway| Overrides {
        payments: Some(Arc::new(FlakyGateway {
            inner: gateway,
            failed_once: AtomicBool::new(false),
        })),
        ..Overrides::none()
    })
    .await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 2, 100)]))
        .await
        .unwrap();
    let received = h.bus.take_pending().await.remove(0);

    let first = h.coordinator.handle(&received).await;
    assert!(matches!(first, Err(WorkflowError::Collaborator(CollaboratorError::Unavailable(_)))));
    assert_eq!(h.order(&order_id).await.stage, OrderStage::StockReserved);

    let retried = h.coordinator.handle(&received).await.unwrap();
    assert_eq!(retried, HandlerOutcome::Advanced(OrderStage::PaymentPending));

    // Reserved exactly once across both deliveries
    assert_eq!(h.ledger.on_hand("P1").await, 8);
}

#[tokio::test]
async fn test_success_before_pending_is_recorded_is_adopted() {
    let h = harness(PaymentScript::ApproveAll, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 2, 100)]))
        .await
        .unwrap();
    let received = h.bus.take_pending().await.remove(0);
    h.store.refuse_next_save_at(OrderStage::PaymentPending);

    let first = h.coordinator.handle(&received).await;
    assert!(matches!(first, Err(WorkflowError::Store(_))));
    assert_eq!(h.order(&order_id).await.stage, OrderStage::StockReserved);

    // The gateway's success is consumed before RECEIVED comes back
    let outcomes = h.pump().await;
    assert!(outcomes.contains(&HandlerOutcome::Advanced(OrderStage::Paid)));

    let redelivered = h.coordinator.handle(&received).await.unwrap();
    assert!(matches!(
        redelivered,
        HandlerOutcome::Dropped(DropReason::AlreadyApplied { .. })
    ));

    assert_eq!(h.order(&order_id).await.stage, OrderStage::Shipped);
    assert_eq!(h.gateway.initiated_count(), 1);
    assert!(h.gateway.refunds().await.is_empty());
}

#[tokio::test]
async fn test_resume_after_lost_pending_write_charges_once() {
    let h = harness(PaymentScript::ApproveAll, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 2, 100)]))
        .await
        .unwrap();
    let received = h.bus.take_pending().await.remove(0);
    h.store.refuse_next_save_at(OrderStage::PaymentPending);

    assert!(h.coordinator.handle(&received).await.is_err());

    // RECEIVED comes back before the gateway's success is consumed
    let retried = h.coordinator.handle(&received).await.unwrap();
    assert_eq!(retried, HandlerOutcome::Advanced(OrderStage::PaymentPending));
    h.pump().await;

    let order = h.order(&order_id).await;
    assert_eq!(order.stage, OrderStage::Shipped);
    assert_eq!(h.gateway.initiated_count(), 1);
    assert!(h.gateway.refunds().await.is_empty());
    assert_eq!(h.ledger.on_hand("P1").await, 8);
}

#[tokio::test]
async fn test_unreadable_order_is_redelivered_not_dropped() {
    let h = harness(PaymentScript::Silent, false).await;

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 1, 100)]))
        .await
        .unwrap();
    let received = h.bus.take_pending().await.remove(0);

    h.store.fail_loads.store(true, Ordering::SeqCst);
    let failed = h.coordinator.handle(&received).await;
    match failed {
        Err(e @ WorkflowError::Store(_)) => assert!(e.is_transient()),
        other => panic!("expected a store error, got {:?}", other),
    }

    h.store.fail_loads.store(false, Ordering::SeqCst);
    let retried = h.coordinator.handle(&received).await.unwrap();
    assert_eq!(retried, HandlerOutcome::Advanced(OrderStage::PaymentPending));
    assert_eq!(h.order(&order_id).await.stage, OrderStage::PaymentPending);
}

#[tokio::test]
async fn test_rejected_shipment_keeps_order_paid_and_alerts() {
    let h = build(PaymentScript::ApproveAll, false, |_, _| Overrides {
        shipments: Some(Arc::new(RejectingCarrier)),
        ..Overrides::none()
    })
    .await;
    let mut inbox = h.hub.subscribe("U1");

    let order_id = h
        .coordinator
        .submit(submission("U1", vec![OrderItem::new("P1", 1, 100)]))
        .await
        .unwrap();
    h.pump().await;

    assert_eq!(h.order(&order_id).await.stage, OrderStage::Paid);
    assert_eq!(categories(&mut inbox).last(), Some(&NotificationCategory::SystemAlert));
}

// ----------------------------------------------------------------------------
// Concurrency
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_orders_never_oversell() {
    let h = harness(PaymentScript::Silent, false).await;
    let mut ops = h.hub.subscribe("ops");

    for _ in 0..6 {
        h.coordinator
            .submit(submission("U1", vec![OrderItem::new("P1", 2, 100)]))
            .await
            .unwrap();
    }

    let received = h.bus.take_pending().await;
    let outcomes = futures_util::future::join_all(received.iter().map(|e| h.coordinator.handle(e))).await;

    let advanced = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(HandlerOutcome::Advanced(OrderStage::PaymentPending))))
        .count();
    let cancelled = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(HandlerOutcome::Advanced(OrderStage::Cancelled))))
        .count();

    assert_eq!(advanced, 5);
    assert_eq!(cancelled, 1);
    assert_eq!(h.ledger.on_hand("P1").await, 0);

    // Only the reservation that left 0 units crossed the threshold of 2
    assert_eq!(categories(&mut ops), vec![NotificationCategory::InventoryLow]);
}
