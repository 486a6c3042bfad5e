use chrono::Utc;
use futures_util::StreamExt;
use kameo::actor::ActorRef;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::actors::{AddToDlq, DeadLetter, DlqActor};
use crate::config::RedpandaSettings;
use crate::metrics::Metrics;
use crate::utils::{redeliver, Delivery, RedeliveryPolicy};
use crate::workflow::{HandlerOutcome, OrderWorkflowCoordinator, WorkflowError};

use super::envelope::{EventEnvelope, Stream};

// ============================================================================
// Consumer side of the bus
// ============================================================================
//
// raw bytes -> EventEnvelope (decoded once, here) -> coordinator.handle
//
// Transient handler failures are redelivered with backoff. When the policy
// gives up, or the failure is permanent, the envelope goes to the dead
// letter queue and the offset is committed anyway: one poisoned order must
// not stall its partition.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Handled(HandlerOutcome),
    Undecodable,
    DeadLettered,
}

pub struct EventDispatcher {
    coordinator: OrderWorkflowCoordinator,
    dlq: Option<ActorRef<DlqActor>>,
    policy: RedeliveryPolicy,
    metrics: Arc<Metrics>,
}

impl EventDispatcher {
    pub fn new(
        coordinator: OrderWorkflowCoordinator,
        dlq: Option<ActorRef<DlqActor>>,
        policy: RedeliveryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            coordinator,
            dlq,
            policy,
            metrics,
        }
    }

    pub async fn dispatch_raw(&self, topic: &str, payload: &[u8]) -> DispatchResult {
        let envelope = match EventEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(topic, error = %e, bytes = payload.len(), "Malformed event dropped");
                self.metrics.record_dropped("undecodable", "malformed");
                return DispatchResult::Undecodable;
            }
        };

        if Stream::from_topic(topic) != Some(envelope.stream) {
            tracing::warn!(
                topic,
                stream = envelope.stream.topic(),
                event_id = %envelope.event_id,
                "Envelope stream does not match its topic"
            );
        }

        self.dispatch(envelope).await
    }

    pub async fn dispatch(&self, envelope: EventEnvelope) -> DispatchResult {
        let first_attempt_at = Utc::now();
        let current = &envelope;

        let delivery = redeliver(&self.policy, move |attempt| self.deliver_once(current, attempt)).await;

        self.metrics
            .record_redeliveries(envelope.stream.topic(), delivery.attempts().saturating_sub(1));

        match delivery {
            Delivery::Succeeded { value, .. } => DispatchResult::Handled(value),
            Delivery::Exhausted { error, attempts } | Delivery::Permanent { error, attempts } => {
                self.dead_letter(&envelope, &error, attempts, first_attempt_at).await;
                DispatchResult::DeadLettered
            }
        }
    }

    async fn deliver_once(
        &self,
        envelope: &EventEnvelope,
        attempt: u32,
    ) -> Result<HandlerOutcome, WorkflowError> {
        if attempt > 1 {
            tracing::debug!(event_id = %envelope.event_id, attempt, "Redelivering event");
        }
        self.coordinator.handle(envelope).await
    }

    async fn dead_letter(
        &self,
        envelope: &EventEnvelope,
        error: &WorkflowError,
        attempts: u32,
        first_failed_at: chrono::DateTime<Utc>,
    ) {
        let stream = envelope.stream.topic();
        self.metrics.record_dlq_event(stream);

        let entry = DeadLetter {
            event_id: envelope.event_id,
            stream: stream.to_string(),
            key: envelope.key.clone(),
            event_kind: envelope.event.kind().to_string(),
            payload: envelope.encode().unwrap_or_default(),
            error_message: error.to_string(),
            attempts,
            first_failed_at,
            dead_lettered_at: Utc::now(),
        };

        match &self.dlq {
            Some(dlq) => {
                if let Err(e) = dlq.tell(AddToDlq(entry)).send().await {
                    tracing::error!(event_id = %envelope.event_id, error = %e, "Failed to reach the DLQ actor");
                }
            }
            None => {
                tracing::error!(
                    event_id = %envelope.event_id,
                    stream,
                    error = %error,
                    "No dead letter queue configured, event abandoned"
                );
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Local loop
// ----------------------------------------------------------------------------

/// Drain envelopes forwarded by the in-memory bus until the channel closes
/// or shutdown is signalled
pub async fn run_local(
    dispatcher: Arc<EventDispatcher>,
    mut inbox: mpsc::UnboundedReceiver<EventEnvelope>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Local dispatch loop started");

    loop {
        tokio::select! {
            next = inbox.recv() => match next {
                Some(envelope) => {
                    dispatcher.dispatch(envelope).await;
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("Local dispatch loop stopped");
}

// ----------------------------------------------------------------------------
// Redpanda consumer
// ----------------------------------------------------------------------------

pub struct RedpandaConsumer {
    consumer: StreamConsumer,
    dispatcher: Arc<EventDispatcher>,
}

impl RedpandaConsumer {
    pub fn new(settings: &RedpandaSettings, dispatcher: Arc<EventDispatcher>) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| anyhow::anyhow!("Failed to create Redpanda consumer: {}", e))?;

        let topics: Vec<&str> = Stream::CONSUMED.iter().map(|s| s.topic()).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| anyhow::anyhow!("Failed to subscribe to {:?}: {}", topics, e))?;

        tracing::info!(group_id = %settings.group_id, topics = ?topics, "Subscribed to Redpanda topics");

        Ok(Self { consumer, dispatcher })
    }

    /// Consume until shutdown. Offsets are committed only after the
    /// dispatcher is done with a message, dead-lettered or not.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                next = stream.next() => {
                    let Some(result) = next else { break };

                    let message = match result {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::error!(error = %e, "Redpanda consumer error");
                            continue;
                        }
                    };

                    match message.payload() {
                        Some(payload) => {
                            tracing::trace!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Received message"
                            );
                            self.dispatcher.dispatch_raw(message.topic(), payload).await;
                        }
                        None => tracing::warn!(topic = message.topic(), "Received message with no payload"),
                    }

                    if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                        tracing::error!(error = %e, "Failed to commit offset");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Redpanda consumer stopped");
    }
}
