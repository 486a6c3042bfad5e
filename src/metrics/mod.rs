// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

pub use server::{start_metrics_server, ServerState};

use crate::domain::order::OrderStage;

// ============================================================================
// Metrics Module - Prometheus metrics for the order workflow
// ============================================================================
//
// - Events consumed / dropped per kind
// - Stage transitions and compensations
// - Notifications per category
// - Redelivery and dead-letter counts
// - Broker circuit breaker state
//
// Scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Consumption
    pub events_consumed: IntCounterVec,
    pub events_dropped: IntCounterVec,
    pub handler_duration: HistogramVec,

    // Workflow
    pub orders_submitted: IntCounter,
    pub stage_transitions: IntCounterVec,
    pub compensations: IntCounterVec,
    pub notifications_sent: IntCounterVec,

    // Transport boundary
    pub redeliveries: IntCounterVec,
    pub dlq_events_total: IntCounter,
    pub dlq_events_by_stream: IntCounterVec,
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_consumed = IntCounterVec::new(
            Opts::new("workflow_events_consumed_total", "Events handed to the coordinator"),
            &["kind"],
        )?;
        registry.register(Box::new(events_consumed.clone()))?;

        let events_dropped = IntCounterVec::new(
            Opts::new("workflow_events_dropped_total", "Events logged and dropped without effect"),
            &["kind", "reason"],
        )?;
        registry.register(Box::new(events_dropped.clone()))?;

        let handler_duration = HistogramVec::new(
            HistogramOpts::new("workflow_handler_duration_seconds", "Coordinator handler duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["kind"],
        )?;
        registry.register(Box::new(handler_duration.clone()))?;

        let orders_submitted = IntCounter::new("orders_submitted_total", "Orders accepted by submit")?;
        registry.register(Box::new(orders_submitted.clone()))?;

        let stage_transitions = IntCounterVec::new(
            Opts::new("order_stage_transitions_total", "Applied order stage transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(stage_transitions.clone()))?;

        let compensations = IntCounterVec::new(
            Opts::new("workflow_compensations_total", "Compensating actions performed"),
            &["action"],
        )?;
        registry.register(Box::new(compensations.clone()))?;

        let notifications_sent = IntCounterVec::new(
            Opts::new("notifications_sent_total", "Notifications emitted"),
            &["category"],
        )?;
        registry.register(Box::new(notifications_sent.clone()))?;

        let redeliveries = IntCounterVec::new(
            Opts::new("event_redeliveries_total", "Extra deliveries of a consumed event"),
            &["stream"],
        )?;
        registry.register(Box::new(redeliveries.clone()))?;

        let dlq_events_total = IntCounter::new("dlq_events_total", "Events routed to the dead letter queue")?;
        registry.register(Box::new(dlq_events_total.clone()))?;

        let dlq_events_by_stream = IntCounterVec::new(
            Opts::new("dlq_events_by_stream", "Dead-lettered events by stream"),
            &["stream"],
        )?;
        registry.register(Box::new(dlq_events_by_stream.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Broker circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            events_consumed,
            events_dropped,
            handler_duration,
            orders_submitted,
            stage_transitions,
            compensations,
            notifications_sent,
            redeliveries,
            dlq_events_total,
            dlq_events_by_stream,
            circuit_breaker_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_consumed(&self, kind: &str, duration_secs: f64) {
        self.events_consumed.with_label_values(&[kind]).inc();
        self.handler_duration.with_label_values(&[kind]).observe(duration_secs);
    }

    pub fn record_dropped(&self, kind: &str, reason: &str) {
        self.events_dropped.with_label_values(&[kind, reason]).inc();
    }

    pub fn record_transition(&self, from: OrderStage, to: OrderStage) {
        self.stage_transitions.with_label_values(&[from.as_str(), to.as_str()]).inc();
    }

    pub fn record_compensation(&self, action: &str) {
        self.compensations.with_label_values(&[action]).inc();
    }

    pub fn record_notification(&self, category: &str) {
        self.notifications_sent.with_label_values(&[category]).inc();
    }

    pub fn record_redeliveries(&self, stream: &str, extra: u32) {
        if extra > 0 {
            self.redeliveries.with_label_values(&[stream]).inc_by(u64::from(extra));
        }
    }

    pub fn record_dlq_event(&self, stream: &str) {
        self.dlq_events_total.inc();
        self.dlq_events_by_stream.with_label_values(&[stream]).inc();
    }
}
