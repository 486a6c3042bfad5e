use kameo::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod actors;
mod config;
mod domain;
mod messaging;
mod metrics;
mod notifications;
mod storage;
mod utils;
mod workflow;

use actors::{DlqActor, HealthMonitorActor, HealthStatus, UpdateHealth};
use crate::config::{AppConfig, RunMode, StoreBackend};
use domain::order::{DeliveryDetails, OrderItem, PaymentMethod, SubmitOrder};
use messaging::{run_local, EventDispatcher, EventEnvelope, RedpandaClient, RedpandaConsumer};
use metrics::{Metrics, ServerState};
use notifications::NotificationHub;
use workflow::in_memory::{InMemoryEventBus, InMemoryOrderStore, InMemoryStockLedger};
use workflow::simulation::{PaymentScript, SimulatedCarrier, SimulatedPaymentGateway};
use workflow::{Collaborators, EventBus, OrderStore, OrderWorkflowCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter, e.g. RUST_LOG=order_saga=trace
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,order_saga=debug")))
        .init();

    let config = AppConfig::load()?;
    tracing::info!(mode = ?config.mode, store = ?config.store, "Starting order saga coordinator");

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);

    // === 2. Storage ===
    let session = match config.store {
        StoreBackend::Scylla => Some(storage::connect(&config.scylla).await?),
        StoreBackend::Memory => None,
    };

    let store: Arc<dyn OrderStore> = match &session {
        Some(session) => Arc::new(storage::ScyllaOrderStore::new(session.clone())),
        None => Arc::new(InMemoryOrderStore::new()),
    };

    // === 3. Bus ===
    let (bus, redpanda, local_inbox): (Arc<dyn EventBus>, Option<Arc<RedpandaClient>>, _) = match config.mode {
        RunMode::Local => {
            let (tx, rx) = mpsc::unbounded_channel::<EventEnvelope>();
            (Arc::new(InMemoryEventBus::forwarding(tx)) as Arc<dyn EventBus>, None, Some(rx))
        }
        RunMode::Redpanda => {
            let client = Arc::new(RedpandaClient::new(&config.redpanda)?);
            (client.clone() as Arc<dyn EventBus>, Some(client), None)
        }
    };

    // === 4. Infrastructure actors ===
    let dlq = DlqActor::spawn(DlqActor::new(session.clone()));
    let health = HealthMonitorActor::spawn(HealthMonitorActor::new(redpanda, metrics.clone()));

    report_health(&health, "order_store", format!("{:?}", config.store)).await;

    if config.metrics.enabled {
        let state = ServerState {
            registry: metrics.registry().clone(),
            health: Some(health.clone()),
            dlq: Some(dlq.clone()),
        };
        let port = config.metrics.port;

        // actix-web wants its own system
        std::thread::spawn(move || {
            let served = actix_web::rt::System::new().block_on(metrics::start_metrics_server(state, port));
            if let Err(e) = served {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    }

    // === 5. Collaborators ===
    let ledger = Arc::new(InMemoryStockLedger::new());
    for seed in &config.simulation.seed_stock {
        ledger.restock(&seed.product_id, &seed.name, seed.quantity).await;
    }

    let script = config
        .simulation
        .decline_above
        .map(PaymentScript::DeclineAbove)
        .unwrap_or(PaymentScript::ApproveAll);

    let (hub, notification_writer) =
        NotificationHub::with_durable_log(bus.clone(), config.workflow.notification_buffer);
    let hub = Arc::new(hub);

    let coordinator = OrderWorkflowCoordinator::new(
        Collaborators {
            store,
            ledger,
            payments: Arc::new(SimulatedPaymentGateway::new(bus.clone(), script)),
            shipments: Arc::new(SimulatedCarrier::new(bus.clone(), config.simulation.report_delivery)),
            bus: bus.clone(),
            notifier: hub.clone(),
        },
        config.workflow.settings(),
        metrics.clone(),
    );

    // === 6. Consumer ===
    let dispatcher = Arc::new(EventDispatcher::new(
        coordinator.clone(),
        Some(dlq.clone()),
        config.redelivery.policy(),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_task = match local_inbox {
        Some(inbox) => tokio::spawn(run_local(dispatcher, inbox, shutdown_rx)),
        None => {
            let consumer = RedpandaConsumer::new(&config.redpanda, dispatcher)?;
            tokio::spawn(consumer.run(shutdown_rx))
        }
    };
    report_health(&health, "consumer", "running".to_string()).await;

    // === 7. Demo traffic ===
    if config.demo.enabled {
        run_demo(&coordinator, &hub).await;
    }

    tracing::info!("Order saga coordinator running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_task.await {
        tracing::error!(error = %e, "Consumer task ended abnormally");
    }
    coordinator.drain_shipments().await;

    // The writer ends once every hub handle is gone and its queue is empty
    drop(coordinator);
    drop(hub);
    match tokio::time::timeout(Duration::from_secs(10), notification_writer).await {
        Ok(Ok(())) => tracing::info!("Notification log flushed"),
        Ok(Err(e)) => tracing::error!(error = %e, "Notification writer ended abnormally"),
        Err(_) => tracing::warn!("Timed out flushing the notification log"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn report_health(health: &ActorRef<HealthMonitorActor>, component: &str, details: String) {
    let sent = health
        .tell(UpdateHealth {
            component: component.to_string(),
            status: HealthStatus::Healthy,
            details: Some(details),
        })
        .send()
        .await;

    if let Err(e) = sent {
        tracing::warn!(component, error = %e, "Failed to report component health");
    }
}

/// Submit a few sample orders and echo one customer's notifications
async fn run_demo(coordinator: &OrderWorkflowCoordinator, hub: &Arc<NotificationHub>) {
    let mut inbox = hub.subscribe("demo-customer");
    tokio::spawn(async move {
        while let Some(notification) = inbox.recv().await {
            tracing::info!(
                category = notification.category.as_str(),
                order_id = ?notification.related_order_id,
                title = %notification.title,
                "demo-customer notified"
            );
        }
    });

    let delivery = DeliveryDetails {
        recipient: "Demo Customer".to_string(),
        address: "1 Sample Street".to_string(),
        phone: None,
    };

    let orders = [
        vec![OrderItem::new("P1", 2, 4_999)],
        vec![OrderItem::new("P1", 1, 4_999), OrderItem::new("P2", 1, 1_999)],
        vec![OrderItem::new("P2", 50, 1_999)],
    ];

    for items in orders {
        let request = SubmitOrder {
            user_id: "demo-customer".to_string(),
            items,
            delivery: delivery.clone(),
            payment_method: PaymentMethod::CreditCard,
        };

        match coordinator.submit(request).await {
            Ok(order_id) => tracing::info!(order_id = %order_id, "Demo order submitted"),
            Err(e) => tracing::error!(error = %e, "Demo order rejected"),
        }
    }
}
