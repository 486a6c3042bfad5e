use anyhow::Result;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

use crate::config::RedpandaSettings;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
use crate::workflow::EventBus;

use super::envelope::EventEnvelope;

/// Producer side of the bus. Every stream maps to one topic and every
/// record is keyed by the envelope key, so one order's events share a
/// partition and keep their order.
pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    send_timeout: Duration,
}

impl RedpandaClient {
    pub fn new(settings: &RedpandaSettings) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", settings.message_timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|e| anyhow::anyhow!("Failed to create Redpanda producer: {}", e))?;

        tracing::info!(brokers = %settings.brokers, "Redpanda producer created");

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig {
                trip_after: settings.breaker_trip_after,
                open_for: Duration::from_secs(settings.breaker_open_secs),
                close_after: 3,
            }),
            send_timeout: Duration::from_millis(settings.message_timeout_ms),
        })
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }
}

#[async_trait]
impl EventBus for RedpandaClient {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        let topic = envelope.stream.topic();
        let payload = envelope.encode()?;

        let sent = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(topic).key(&envelope.key).payload(&payload);

                self.producer
                    .send(record, Timeout::After(self.send_timeout))
                    .await
                    .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))
            })
            .await;

        match sent {
            Ok(_) => {
                tracing::debug!(
                    topic,
                    key = %envelope.key,
                    event_id = %envelope.event_id,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic, "Circuit breaker open, Redpanda unavailable");
                Err(anyhow::anyhow!("Circuit breaker open for Redpanda"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(topic, key = %envelope.key, error = %e, "Failed to publish to Redpanda");
                Err(e)
            }
        }
    }
}
