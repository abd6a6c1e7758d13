//! # lobbykey-observability
//!
//! Observability-Crate fuer Lobbykey:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`)
//! - Structured Logging via tracing-subscriber
//! - Request-Timing Middleware

pub mod health;
pub mod logging;
pub mod metrics;
pub mod middleware;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, LobbyMetrics};
pub use middleware::request_timing_layer;

use anyhow::Result;
use std::future::Future;
use std::net::SocketAddr;

/// Baut den Router mit `/metrics` und `/health`
pub fn observability_router(metriken: LobbyMetrics, health: HealthState) -> axum::Router {
    axum::Router::new()
        .merge(metrics_router(metriken))
        .merge(health_router(health))
        .layer(axum::middleware::from_fn(middleware::timing_middleware))
        .layer(request_timing_layer())
}

/// Startet den Observability-HTTP-Server (Metriken + Health)
///
/// Laeuft bis `shutdown` abgeschlossen ist.
pub async fn observability_server_starten<F>(
    bind_addr: SocketAddr,
    metriken: LobbyMetrics,
    health: HealthState,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = observability_router(metriken, health);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
