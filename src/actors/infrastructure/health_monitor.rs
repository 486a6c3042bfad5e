use kameo::Actor;
use kameo::Reply;
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::message::{Context, Message};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;

use crate::actors::core::{overall_status, ComponentHealth, HealthStatus};
use crate::messaging::RedpandaClient;
use crate::metrics::Metrics;
use crate::utils::CircuitState;

// ============================================================================
// Health Monitor Actor
// ============================================================================
//
// - Tracks health reported by components (consumer, order store, ...)
// - Polls the broker circuit breaker when running against Redpanda
// - Aggregates a system-wide status for /health
//
// ============================================================================

const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

#[derive(Debug)]
pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize, Reply)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: chrono::DateTime<Utc>,
}

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    redpanda: Option<Arc<RedpandaClient>>,
    metrics: Arc<Metrics>,
}

impl HealthMonitorActor {
    pub fn new(redpanda: Option<Arc<RedpandaClient>>, metrics: Arc<Metrics>) -> Self {
        Self {
            components: HashMap::new(),
            redpanda,
            metrics,
        }
    }
}

impl Actor for HealthMonitorActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!("HealthMonitorActor started");

        if let Some(redpanda) = state.redpanda.clone() {
            let metrics = state.metrics.clone();
            let monitor = actor_ref.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(POLL_INTERVAL);
                loop {
                    interval.tick().await;

                    let circuit = redpanda.circuit_state().await;
                    metrics.circuit_breaker_state.set(circuit.as_gauge());

                    let status = match circuit {
                        CircuitState::Closed => HealthStatus::Healthy,
                        CircuitState::HalfOpen => {
                            HealthStatus::Degraded("Circuit breaker half-open".to_string())
                        }
                        CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
                    };

                    let sent = monitor
                        .tell(UpdateHealth {
                            component: "redpanda".to_string(),
                            status,
                            details: None,
                        })
                        .send()
                        .await;

                    if sent.is_err() {
                        tracing::debug!("Health monitor gone, stopping broker poll");
                        break;
                    }
                }
            });
        }

        Ok(state)
    }
}

impl Message<UpdateHealth> for HealthMonitorActor {
    type Reply = ();

    async fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        tracing::debug!(
            component = %msg.component,
            status = ?msg.status,
            "Updated component health"
        );

        let health = ComponentHealth::new(msg.component.clone(), msg.status).with_details(msg.details);
        self.components.insert(msg.component, health);
    }
}

impl Message<GetSystemHealth> for HealthMonitorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        SystemHealth {
            overall_status: overall_status(self.components.values()),
            components: self.components.clone(),
            check_time: Utc::now(),
        }
    }
}
