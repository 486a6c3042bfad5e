use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use kameo::actor::ActorRef;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;

use crate::actors::{
    DlqActor, GetDlqStats, GetRecentDeadLetters, GetSystemHealth, HealthMonitorActor, HealthStatus,
};

/// What the HTTP endpoints read from
#[derive(Clone)]
pub struct ServerState {
    pub registry: Registry,
    pub health: Option<ActorRef<HealthMonitorActor>>,
    pub dlq: Option<ActorRef<DlqActor>>,
}

/// Serve /metrics, /health and /dlq.
/// Runs its own actix system, so call it from a dedicated thread/runtime.
pub async fn start_metrics_server(state: ServerState, port: u16) -> std::io::Result<()> {
    tracing::info!(port, "Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
            .route("/dlq", web::get().to(dlq_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(state: web::Data<ServerState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<ServerState>) -> impl Responder {
    let Some(monitor) = &state.health else {
        return HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "service": "order-saga"
        }));
    };

    match monitor.ask(GetSystemHealth).send().await {
        Ok(health) if !matches!(health.overall_status, HealthStatus::Unhealthy(_)) => HttpResponse::Ok().json(health),
        Ok(health) => HttpResponse::ServiceUnavailable().json(health),
        Err(e) => {
            tracing::error!(error = %e, "Health monitor unreachable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({ "status": "unknown" }))
        }
    }
}

#[derive(Deserialize)]
struct DlqQuery {
    limit: Option<usize>,
}

async fn dlq_handler(state: web::Data<ServerState>, query: web::Query<DlqQuery>) -> impl Responder {
    let Some(dlq) = &state.dlq else {
        return HttpResponse::NotFound().finish();
    };

    let stats = dlq.ask(GetDlqStats).send().await;
    let recent = dlq
        .ask(GetRecentDeadLetters {
            limit: query.limit.unwrap_or(20),
        })
        .send()
        .await;

    match (stats, recent) {
        (Ok(stats), Ok(recent)) => HttpResponse::Ok().json(serde_json::json!({
            "total": stats.total,
            "by_stream": stats.by_stream,
            "recent": recent.0,
        })),
        _ => HttpResponse::ServiceUnavailable().finish(),
    }
}
