use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;

use crate::domain::inventory::InventoryAdjustment;
use crate::domain::notification::Notification;
use crate::domain::order::{
    CancellationRequested, Order, OrderLifecycleEvent, OrderStage, ReservationState, SubmitOrder,
};
use crate::domain::payment::{PaymentOutcome, PaymentRequest, PaymentResultEvent};
use crate::domain::shipment::{ShipmentProgressEvent, ShipmentRequest, ShipmentStatus};
use crate::messaging::{EventEnvelope, WorkflowEvent};
use crate::metrics::Metrics;

use super::collaborators::{
    CollaboratorError, EventBus, NotificationSink, OrderStore, PaymentGateway, ShipmentService,
    StockError, StockLedger,
};
use super::errors::WorkflowError;

// ============================================================================
// Order Workflow Coordinator
// ============================================================================
//
// Drives every order through
//
//   RECEIVED -> STOCK_RESERVED -> PAYMENT_PENDING -> PAID -> SHIPPED -> DELIVERED
//        \             \                 \
//         +-------------+-----------------+--> CANCELLED
//
// reacting to events from the bus. Handlers for one order run one at a time
// (per-order async mutex); handlers for different orders run concurrently.
//
// Rules every handler follows:
// - Load the order, apply only the transition whose predecessor matches the
//   current stage, drop anything else with a log line.
// - Persist the new stage, then publish its lifecycle event, then notify.
// - A collaborator call that times out is a failure and is compensated.
// - CANCELLED is sticky. A payment success that lands afterwards is refunded
//   and any stock still held is released.
//
// Business outcomes (no stock, declined card) become transitions. Only
// infrastructure trouble surfaces as `Err`, and the caller redelivers.
//
// ============================================================================

/// Why an event was logged and dropped without effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnknownOrder,
    /// The transition this event asks for has already happened
    AlreadyApplied { current: OrderStage },
    /// The order is not yet at the stage this event follows
    UnexpectedStage { current: OrderStage, expected: OrderStage },
    NotCancellable { current: OrderStage },
    /// Events the coordinator publishes but does not act on
    NotConsumed,
}

impl DropReason {
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::UnknownOrder => "unknown_order",
            DropReason::AlreadyApplied { .. } => "already_applied",
            DropReason::UnexpectedStage { .. } => "unexpected_stage",
            DropReason::NotCancellable { .. } => "not_cancellable",
            DropReason::NotConsumed => "not_consumed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The order ended the handler at this stage
    Advanced(OrderStage),
    /// No transition, but compensating work was done
    Compensated,
    /// Informational event; nothing to change
    Unchanged,
    Dropped(DropReason),
}

pub struct Collaborators {
    pub store: Arc<dyn OrderStore>,
    pub ledger: Arc<dyn StockLedger>,
    pub payments: Arc<dyn PaymentGateway>,
    pub shipments: Arc<dyn ShipmentService>,
    pub bus: Arc<dyn EventBus>,
    pub notifier: Arc<dyn NotificationSink>,
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// Upper bound on any single collaborator call
    pub call_timeout: Duration,
    /// A reservation that leaves fewer units than this raises an inventory-low alert
    pub low_stock_threshold: u64,
    /// Recipient of inventory-low alerts
    pub operations_recipient: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            low_stock_threshold: 5,
            operations_recipient: "operations".to_string(),
        }
    }
}

struct Inner {
    collaborators: Collaborators,
    settings: WorkflowSettings,
    metrics: Arc<Metrics>,
    order_locks: DashMap<String, Arc<Mutex<()>>>,
    shipments: Mutex<JoinSet<()>>,
}

#[derive(Clone)]
pub struct OrderWorkflowCoordinator {
    inner: Arc<Inner>,
}

impl OrderWorkflowCoordinator {
    pub fn new(collaborators: Collaborators, settings: WorkflowSettings, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                collaborators,
                settings,
                metrics,
                order_locks: DashMap::new(),
                shipments: Mutex::new(JoinSet::new()),
            }),
        }
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Validate, persist at RECEIVED, publish, notify. Returns the new order id.
    ///
    /// Invalid input publishes nothing. If the RECEIVED event cannot be
    /// published the order is cancelled in the store and the error returned,
    /// so nothing is left stranded at RECEIVED.
    pub async fn submit(&self, request: SubmitOrder) -> Result<String, WorkflowError> {
        let order = Order::place(request)?;

        self.within("order_store.insert", self.inner.collaborators.store.insert(&order))
            .await?
            .map_err(WorkflowError::Store)?;

        tracing::info!(
            order_id = %order.id,
            user_id = %order.user_id,
            total_amount = order.total_amount,
            items = order.items.len(),
            "Order received"
        );

        if let Err(e) = self.publish_lifecycle(&order).await {
            tracing::error!(order_id = %order.id, error = %e, "Order event not published, cancelling order");

            let mut stranded = order.clone();
            if stranded.cancel("order could not be announced").is_ok() {
                if let Err(store_err) = self.persist(&stranded).await {
                    tracing::error!(order_id = %order.id, error = %store_err, "Failed to cancel stranded order");
                }
            }
            return Err(e);
        }

        self.inner.metrics.orders_submitted.inc();
        self.notify(Notification::for_stage(&order)).await;

        Ok(order.id)
    }

    /// Route one decoded envelope to its handler
    pub async fn handle(&self, envelope: &EventEnvelope) -> Result<HandlerOutcome, WorkflowError> {
        let kind = envelope.event.kind();
        let started = Instant::now();

        let result = match &envelope.event {
            WorkflowEvent::OrderLifecycle(event) if event.stage == OrderStage::Received => {
                self.on_order_received(event).await
            }
            WorkflowEvent::CancellationRequested(request) => self.on_cancellation(request).await,
            WorkflowEvent::PaymentResult(result) => self.on_payment_result(result).await,
            WorkflowEvent::ShipmentProgress(progress) => self.on_shipment_progress(progress).await,
            WorkflowEvent::OrderLifecycle(_)
            | WorkflowEvent::InventoryAdjusted(_)
            | WorkflowEvent::Notification(_) => Ok(HandlerOutcome::Dropped(DropReason::NotConsumed)),
        };

        self.inner
            .metrics
            .record_consumed(kind, started.elapsed().as_secs_f64());

        match &result {
            Ok(HandlerOutcome::Dropped(DropReason::NotConsumed)) => {
                tracing::trace!(event_id = %envelope.event_id, kind, "Event not consumed by the coordinator");
                self.inner.metrics.record_dropped(kind, DropReason::NotConsumed.label());
            }
            Ok(HandlerOutcome::Dropped(reason)) => {
                tracing::info!(
                    event_id = %envelope.event_id,
                    key = %envelope.key,
                    kind,
                    reason = ?reason,
                    "Event dropped"
                );
                self.inner.metrics.record_dropped(kind, reason.label());
            }
            Ok(outcome) => {
                tracing::debug!(event_id = %envelope.event_id, kind, outcome = ?outcome, "Event handled");
            }
            Err(e) => {
                tracing::warn!(event_id = %envelope.event_id, key = %envelope.key, kind, error = %e, "Handler failed");
            }
        }

        result
    }

    /// Wait for every in-flight shipment task
    pub async fn drain_shipments(&self) {
        let mut tasks = std::mem::take(&mut *self.inner.shipments.lock().await);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Shipment task panicked or was cancelled");
            }
        }
    }

    pub async fn order(&self, order_id: &str) -> Result<Option<Order>, WorkflowError> {
        self.load(order_id).await
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    pub async fn on_order_received(&self, event: &OrderLifecycleEvent) -> Result<HandlerOutcome, WorkflowError> {
        self.serialized(&event.order_id, async {
            let Some(order) = self.load(&event.order_id).await? else {
                return Ok(HandlerOutcome::Dropped(DropReason::UnknownOrder));
            };

            match order.stage {
                OrderStage::Received => self.reserve_then_pay(order).await,
                OrderStage::StockReserved => {
                    tracing::info!(order_id = %order.id, "Resuming order at payment initiation");
                    self.start_payment(order).await
                }
                current => Ok(HandlerOutcome::Dropped(DropReason::AlreadyApplied { current })),
            }
        })
        .await
    }

    pub async fn on_payment_result(&self, result: &PaymentResultEvent) -> Result<HandlerOutcome, WorkflowError> {
        self.serialized(&result.order_id, async {
            let Some(mut order) = self.load(&result.order_id).await? else {
                return Ok(HandlerOutcome::Dropped(DropReason::UnknownOrder));
            };

            match result.outcome {
                PaymentOutcome::Pending => {
                    tracing::info!(order_id = %order.id, attempt_id = %result.attempt_id, "Payment still pending");
                    Ok(HandlerOutcome::Unchanged)
                }
                PaymentOutcome::Success => self.apply_payment_success(&mut order, result).await,
                PaymentOutcome::Failed => self.apply_payment_failure(&mut order, result).await,
            }
        })
        .await
    }

    pub async fn on_shipment_progress(
        &self,
        progress: &ShipmentProgressEvent,
    ) -> Result<HandlerOutcome, WorkflowError> {
        if progress.status != ShipmentStatus::Delivered {
            tracing::info!(
                order_id = %progress.order_id,
                tracking_number = %progress.tracking_number,
                status = ?progress.status,
                "Shipment progress"
            );
            return Ok(HandlerOutcome::Unchanged);
        }

        self.serialized(&progress.order_id, async {
            let Some(mut order) = self.load(&progress.order_id).await? else {
                return Ok(HandlerOutcome::Dropped(DropReason::UnknownOrder));
            };

            match order.stage {
                OrderStage::Shipped => {
                    if order.tracking_number.is_none() {
                        order.tracking_number = Some(progress.tracking_number.clone());
                    }
                    self.advance(&mut order, OrderStage::Delivered).await?;
                    self.notify(Notification::for_stage(&order)).await;
                    Ok(HandlerOutcome::Advanced(OrderStage::Delivered))
                }
                current if current.is_terminal() => {
                    Ok(HandlerOutcome::Dropped(DropReason::AlreadyApplied { current }))
                }
                current => Ok(HandlerOutcome::Dropped(DropReason::UnexpectedStage {
                    current,
                    expected: OrderStage::Shipped,
                })),
            }
        })
        .await
    }

    pub async fn on_cancellation(&self, request: &CancellationRequested) -> Result<HandlerOutcome, WorkflowError> {
        self.serialized(&request.order_id, async {
            let Some(mut order) = self.load(&request.order_id).await? else {
                return Ok(HandlerOutcome::Dropped(DropReason::UnknownOrder));
            };

            match order.stage {
                stage if stage.is_cancellable() => {
                    tracing::info!(
                        order_id = %order.id,
                        stage = %stage,
                        requested_by = ?request.requested_by,
                        reason = %request.reason,
                        "Cancelling order on request"
                    );
                    self.cancel(&mut order, request.reason.clone(), false).await?;
                    self.notify(Notification::for_stage(&order)).await;
                    Ok(HandlerOutcome::Advanced(OrderStage::Cancelled))
                }
                OrderStage::Cancelled => Ok(HandlerOutcome::Dropped(DropReason::AlreadyApplied {
                    current: OrderStage::Cancelled,
                })),
                current => {
                    tracing::warn!(order_id = %order.id, stage = %current, "Cancellation refused, order past payment");
                    Ok(HandlerOutcome::Dropped(DropReason::NotCancellable { current }))
                }
            }
        })
        .await
    }

    // ========================================================================
    // Saga steps
    // ========================================================================

    async fn reserve_then_pay(&self, mut order: Order) -> Result<HandlerOutcome, WorkflowError> {
        let reservation = self
            .within(
                "stock_ledger.reserve_stock",
                self.inner.collaborators.ledger.reserve_stock(&order.id, &order.items),
            )
            .await;

        match reservation {
            Ok(Ok(adjustments)) => {
                order.reservation = ReservationState::Held;
                self.advance(&mut order, OrderStage::StockReserved).await?;
                self.publish_adjustments(&adjustments).await?;
                self.notify(Notification::for_stage(&order)).await;
                self.start_payment(order).await
            }
            Ok(Err(StockError::Insufficient(shortfalls))) => {
                let products: Vec<&str> = shortfalls.iter().map(|s| s.product_id.as_str()).collect();
                tracing::warn!(order_id = %order.id, products = ?products, "Insufficient stock");

                self.cancel(&mut order, format!("insufficient stock for {}", products.join(", ")), false)
                    .await?;
                self.notify(Notification::for_stage(&order)).await;
                Ok(HandlerOutcome::Advanced(OrderStage::Cancelled))
            }
            Ok(Err(StockError::AlreadyReleased(_))) => {
                self.cancel(&mut order, "reservation was already released".to_string(), false)
                    .await?;
                self.notify(Notification::for_stage(&order)).await;
                Ok(HandlerOutcome::Advanced(OrderStage::Cancelled))
            }
            Ok(Err(e @ StockError::Unavailable(_))) => Err(e.into()),
            Err(timeout) => {
                // The ledger may or may not have applied the reservation
                tracing::warn!(order_id = %order.id, error = %timeout, "Stock reservation timed out");
                self.cancel(&mut order, "stock reservation timed out".to_string(), true)
                    .await?;
                self.notify(Notification::for_stage(&order)).await;
                Ok(HandlerOutcome::Advanced(OrderStage::Cancelled))
            }
        }
    }

    /// STOCK_RESERVED -> PAYMENT_PENDING
    async fn start_payment(&self, mut order: Order) -> Result<HandlerOutcome, WorkflowError> {
        let request = PaymentRequest {
            order_id: order.id.clone(),
            idempotency_key: order.id.clone(),
            user_id: order.user_id.clone(),
            amount: order.total_amount,
            method: order.payment_method,
        };

        let initiated = self
            .within(
                "payment_gateway.initiate_payment",
                self.inner.collaborators.payments.initiate_payment(&request),
            )
            .await;

        let reason = match initiated {
            Ok(Ok(attempt_id)) => {
                tracing::info!(order_id = %order.id, attempt_id = %attempt_id, amount = order.total_amount, "Payment initiated");
                order.payment_attempt_id = Some(attempt_id);
                self.advance(&mut order, OrderStage::PaymentPending).await?;
                self.notify(Notification::for_stage(&order)).await;
                return Ok(HandlerOutcome::Advanced(OrderStage::PaymentPending));
            }
            // Stay at STOCK_RESERVED; a redelivered RECEIVED event resumes here
            Ok(Err(e @ CollaboratorError::Unavailable(_))) => return Err(e.into()),
            Ok(Err(CollaboratorError::Rejected(_, reason))) => format!("payment could not be started: {}", reason),
            Err(timeout) => {
                tracing::warn!(order_id = %order.id, error = %timeout, "Payment initiation timed out");
                "payment initiation timed out".to_string()
            }
        };

        self.cancel(&mut order, reason.clone(), false).await?;
        self.notify(Notification::payment_failed(&order, Some(&reason))).await;
        Ok(HandlerOutcome::Advanced(OrderStage::Cancelled))
    }

    async fn apply_payment_success(
        &self,
        order: &mut Order,
        result: &PaymentResultEvent,
    ) -> Result<HandlerOutcome, WorkflowError> {
        match order.stage {
            OrderStage::PaymentPending => self.complete_payment(order, result).await,
            OrderStage::StockReserved => {
                // Initiation went through but PAYMENT_PENDING was never saved
                tracing::warn!(
                    order_id = %order.id,
                    attempt_id = %result.attempt_id,
                    "Payment succeeded before PAYMENT_PENDING was recorded, adopting attempt"
                );
                order.payment_attempt_id = Some(result.attempt_id.clone());
                self.advance(order, OrderStage::PaymentPending).await?;
                self.complete_payment(order, result).await
            }
            OrderStage::Paid => {
                // Shipment may not have started before a crash
                tracing::info!(order_id = %order.id, "Payment success redelivered, re-driving shipment");
                self.spawn_shipment(order.id.clone()).await;
                Ok(HandlerOutcome::Unchanged)
            }
            OrderStage::Cancelled => self.refund_late_payment(order, result).await,
            current @ (OrderStage::Shipped | OrderStage::Delivered) => {
                Ok(HandlerOutcome::Dropped(DropReason::AlreadyApplied { current }))
            }
            current => Ok(HandlerOutcome::Dropped(DropReason::UnexpectedStage {
                current,
                expected: OrderStage::PaymentPending,
            })),
        }
    }

    /// PAYMENT_PENDING -> PAID, then hand off to shipment
    async fn complete_payment(
        &self,
        order: &mut Order,
        result: &PaymentResultEvent,
    ) -> Result<HandlerOutcome, WorkflowError> {
        order.payment_attempt_id = Some(result.attempt_id.clone());
        self.advance(order, OrderStage::Paid).await?;
        self.notify(Notification::for_stage(order)).await;
        self.spawn_shipment(order.id.clone()).await;
        Ok(HandlerOutcome::Advanced(OrderStage::Paid))
    }

    async fn apply_payment_failure(
        &self,
        order: &mut Order,
        result: &PaymentResultEvent,
    ) -> Result<HandlerOutcome, WorkflowError> {
        match order.stage {
            OrderStage::PaymentPending | OrderStage::StockReserved => {
                let reason = result.failure_reason.as_deref().unwrap_or("payment declined");
                tracing::warn!(order_id = %order.id, attempt_id = %result.attempt_id, reason, "Payment failed");

                self.cancel(order, format!("payment failed: {}", reason), false).await?;
                self.notify(Notification::payment_failed(order, Some(reason))).await;
                Ok(HandlerOutcome::Advanced(OrderStage::Cancelled))
            }
            OrderStage::Cancelled if order.holds_stock() => {
                self.release_stock(order, false).await?;
                self.persist(order).await?;
                Ok(HandlerOutcome::Compensated)
            }
            OrderStage::Received => Ok(HandlerOutcome::Dropped(DropReason::UnexpectedStage {
                current: OrderStage::Received,
                expected: OrderStage::PaymentPending,
            })),
            current => {
                if current != OrderStage::Cancelled {
                    tracing::warn!(order_id = %order.id, stage = %current, "Payment failure after the order was paid");
                }
                Ok(HandlerOutcome::Dropped(DropReason::AlreadyApplied { current }))
            }
        }
    }

    /// Payment succeeded for an order that is already CANCELLED
    async fn refund_late_payment(
        &self,
        order: &mut Order,
        result: &PaymentResultEvent,
    ) -> Result<HandlerOutcome, WorkflowError> {
        if order.refund_issued && !order.holds_stock() {
            return Ok(HandlerOutcome::Dropped(DropReason::AlreadyApplied {
                current: OrderStage::Cancelled,
            }));
        }

        tracing::warn!(
            order_id = %order.id,
            attempt_id = %result.attempt_id,
            amount = result.amount,
            "Payment succeeded after cancellation, refunding"
        );

        if !order.refund_issued {
            self.within(
                "payment_gateway.refund_payment",
                self.inner
                    .collaborators
                    .payments
                    .refund_payment(&order.id, &result.attempt_id, result.amount),
            )
            .await??;

            order.refund_issued = true;
            self.inner.metrics.record_compensation("payment_refund");
        }

        if order.holds_stock() {
            self.release_stock(order, false).await?;
        }

        self.persist(order).await?;
        Ok(HandlerOutcome::Compensated)
    }

    async fn spawn_shipment(&self, order_id: String) {
        let coordinator = self.clone();
        let mut tasks = self.inner.shipments.lock().await;

        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            if let Err(e) = coordinator.ship(&order_id).await {
                tracing::error!(order_id = %order_id, error = %e, "Shipment could not be started");
            }
        });
    }

    /// PAID -> SHIPPED, run off the event path
    async fn ship(&self, order_id: &str) -> Result<HandlerOutcome, WorkflowError> {
        self.serialized(order_id, async {
            let Some(mut order) = self.load(order_id).await? else {
                return Ok(HandlerOutcome::Dropped(DropReason::UnknownOrder));
            };

            if order.stage != OrderStage::Paid {
                tracing::debug!(order_id, stage = %order.stage, "Shipment already handled");
                return Ok(HandlerOutcome::Dropped(DropReason::AlreadyApplied { current: order.stage }));
            }

            let request = ShipmentRequest {
                order_id: order.id.clone(),
                user_id: order.user_id.clone(),
                items: order.items.clone(),
                delivery: order.delivery.clone(),
            };

            let started = self
                .within(
                    "shipment_service.initiate_shipment",
                    self.inner.collaborators.shipments.initiate_shipment(&request),
                )
                .await
                .and_then(|r| r.map_err(WorkflowError::from));

            match started {
                Ok(tracking_number) => {
                    tracing::info!(order_id, tracking_number = %tracking_number, "Shipment started");
                    order.tracking_number = Some(tracking_number);
                    self.advance(&mut order, OrderStage::Shipped).await?;
                    self.notify(Notification::for_stage(&order)).await;
                    Ok(HandlerOutcome::Advanced(OrderStage::Shipped))
                }
                Err(e) => {
                    // The order stays PAID; a redelivered payment success retries
                    self.notify(Notification::system_alert(
                        &order.user_id,
                        &order.id,
                        format!("Shipment of order {} is delayed. We are on it.", order.id),
                    ))
                    .await;
                    Err(e)
                }
            }
        })
        .await
    }

    // ========================================================================
    // Building blocks
    // ========================================================================

    /// Apply `target`, persist, publish. Callers have already checked the stage.
    async fn advance(&self, order: &mut Order, target: OrderStage) -> Result<(), WorkflowError> {
        let from = order.stage;
        order.transition_to(target).map_err(WorkflowError::StateViolation)?;

        self.persist(order).await?;
        self.inner.metrics.record_transition(from, target);
        tracing::info!(order_id = %order.id, from = %from, to = %target, "Order stage advanced");

        self.publish_lifecycle(order).await
    }

    /// Cancel, releasing held stock first. With `force` the ledger is asked to
    /// compensate even when no reservation is recorded on the order.
    async fn cancel(&self, order: &mut Order, reason: String, force: bool) -> Result<(), WorkflowError> {
        if order.holds_stock() || force {
            self.release_stock(order, force).await?;
        }

        let from = order.stage;
        order.cancel(reason).map_err(WorkflowError::StateViolation)?;

        self.persist(order).await?;
        self.inner.metrics.record_transition(from, OrderStage::Cancelled);
        tracing::info!(
            order_id = %order.id,
            from = %from,
            reason = order.cancel_reason.as_deref().unwrap_or_default(),
            "Order cancelled"
        );

        self.publish_lifecycle(order).await
    }

    async fn release_stock(&self, order: &mut Order, force: bool) -> Result<(), WorkflowError> {
        let adjustments = self
            .within(
                "stock_ledger.compensate_stock",
                self.inner.collaborators.ledger.compensate_stock(&order.id),
            )
            .await??;

        if !adjustments.is_empty() {
            self.inner.metrics.record_compensation("stock_release");
            tracing::info!(order_id = %order.id, lines = adjustments.len(), "Reserved stock released");
        }

        if order.holds_stock() || (force && !adjustments.is_empty()) {
            order.reservation = ReservationState::Released;
        }

        self.publish_adjustments(&adjustments).await
    }

    async fn publish_adjustments(&self, adjustments: &[InventoryAdjustment]) -> Result<(), WorkflowError> {
        for adjustment in adjustments {
            self.publish(
                WorkflowEvent::InventoryAdjusted(adjustment.clone()),
                "inventory adjustment",
            )
            .await?;

            if adjustment.delta_qty < 0 && adjustment.remaining_qty < self.inner.settings.low_stock_threshold {
                tracing::warn!(
                    product_id = %adjustment.product_id,
                    remaining = adjustment.remaining_qty,
                    "Inventory low"
                );
                self.notify(Notification::inventory_low(
                    &self.inner.settings.operations_recipient,
                    &adjustment.product_id,
                    &adjustment.product_name,
                    adjustment.remaining_qty,
                ))
                .await;
            }
        }
        Ok(())
    }

    async fn publish_lifecycle(&self, order: &Order) -> Result<(), WorkflowError> {
        self.publish(
            WorkflowEvent::OrderLifecycle(OrderLifecycleEvent::from_order(order)),
            "order lifecycle event",
        )
        .await
    }

    async fn publish(&self, event: WorkflowEvent, what: &'static str) -> Result<(), WorkflowError> {
        let envelope = EventEnvelope::new(event);
        self.within("event_bus.publish", self.inner.collaborators.bus.publish(&envelope))
            .await?
            .map_err(|source| WorkflowError::Publish { what, source })
    }

    async fn notify(&self, notification: Notification) {
        self.inner.metrics.record_notification(notification.category.as_str());

        let category = notification.category.as_str();
        if self
            .within("notification_sink.notify", self.inner.collaborators.notifier.notify(notification))
            .await
            .is_err()
        {
            tracing::warn!(category, "Notification sink did not accept in time");
        }
    }

    async fn load(&self, order_id: &str) -> Result<Option<Order>, WorkflowError> {
        let order = self
            .within("order_store.load", self.inner.collaborators.store.load(order_id))
            .await?
            .map_err(WorkflowError::Store)?;

        if order.is_none() {
            tracing::warn!(order_id, "Event for unknown order");
        }
        Ok(order)
    }

    async fn persist(&self, order: &Order) -> Result<(), WorkflowError> {
        self.within("order_store.save", self.inner.collaborators.store.save(order))
            .await?
            .map_err(WorkflowError::Store)
    }

    /// Bound a collaborator call by the configured timeout
    async fn within<F: Future>(&self, what: &'static str, call: F) -> Result<F::Output, WorkflowError> {
        tokio::time::timeout(self.inner.settings.call_timeout, call)
            .await
            .map_err(|_| {
                tracing::warn!(call = what, timeout = ?self.inner.settings.call_timeout, "Collaborator call timed out");
                WorkflowError::Timeout(what)
            })
    }

    async fn lock_order(&self, order_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .order_locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Run `work` holding the order's lock, then forget the lock if idle
    async fn serialized<F>(&self, order_id: &str, work: F) -> Result<HandlerOutcome, WorkflowError>
    where
        F: Future<Output = Result<HandlerOutcome, WorkflowError>>,
    {
        let guard = self.lock_order(order_id).await;
        let out = work.await;
        drop(guard);

        self.inner
            .order_locks
            .remove_if(order_id, |_, lock| Arc::strong_count(lock) == 1);
        out
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.inner.order_locks.len()
    }
}
