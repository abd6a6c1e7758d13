//! Prometheus-kompatible Metriken fuer Lobbykey
//!
//! Registrierte Metriken:
//! - `lobbykey_sessions_online` – Gauge: Aktuell authentifizierte Sessions
//! - `lobbykey_handshakes_total` – Counter: Handshakes (result)
//! - `lobbykey_messages_total` – Counter: Lobby-Nachrichten (result)
//! - `lobbykey_presence_events_total` – Counter: Join/Leave-Events (event)
//! - `lobbykey_broadcast_dropped_total` – Counter: Verworfene Zustellungen
//! - `lobbykey_message_verify_seconds` – Histogram: Dauer der Nachrichtenpruefung

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Lobbykey-Prometheus-Metriken
#[derive(Clone)]
pub struct LobbyMetrics {
    pub registry: Arc<Registry>,

    pub sessions_online: IntGauge,
    pub handshakes_total: IntCounterVec,
    pub messages_total: IntCounterVec,
    pub presence_events_total: IntCounterVec,
    pub broadcast_dropped_total: IntCounter,
    pub message_verify_seconds: Histogram,
}

impl LobbyMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let sessions_online = IntGauge::with_opts(Opts::new(
            "lobbykey_sessions_online",
            "Anzahl aktuell authentifizierter Sessions",
        ))?;
        registry.register(Box::new(sessions_online.clone()))?;

        let handshakes_total = IntCounterVec::new(
            Opts::new("lobbykey_handshakes_total", "Abgeschlossene Handshakes"),
            &["result"],
        )?;
        registry.register(Box::new(handshakes_total.clone()))?;

        let messages_total = IntCounterVec::new(
            Opts::new(
                "lobbykey_messages_total",
                "Eingereichte Lobby-Nachrichten nach Ergebnis",
            ),
            &["result"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let presence_events_total = IntCounterVec::new(
            Opts::new("lobbykey_presence_events_total", "Presence-Events"),
            &["event"],
        )?;
        registry.register(Box::new(presence_events_total.clone()))?;

        let broadcast_dropped_total = IntCounter::with_opts(Opts::new(
            "lobbykey_broadcast_dropped_total",
            "Zustellungen, die wegen voller oder geschlossener Queue verworfen wurden",
        ))?;
        registry.register(Box::new(broadcast_dropped_total.clone()))?;

        let message_verify_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "lobbykey_message_verify_seconds",
                "Dauer von Validierung und Signaturpruefung in Sekunden",
            )
            .buckets(vec![0.00005, 0.0001, 0.00025, 0.0005, 0.001, 0.005, 0.01]),
        )?;
        registry.register(Box::new(message_verify_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            sessions_online,
            handshakes_total,
            messages_total,
            presence_events_total,
            broadcast_dropped_total,
            message_verify_seconds,
        })
    }

    /// Zaehlt einen Handshake (`ok`, `rejected`, `timeout`)
    pub fn handshake(&self, ergebnis: &str) {
        self.handshakes_total.with_label_values(&[ergebnis]).inc();
    }

    /// Zaehlt eine eingereichte Nachricht nach Ergebnis
    pub fn nachricht(&self, ergebnis: &str) {
        self.messages_total.with_label_values(&[ergebnis]).inc();
    }

    /// Zaehlt ein Presence-Event (`joined`, `left`, `superseded`)
    pub fn presence(&self, event: &str) {
        self.presence_events_total.with_label_values(&[event]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: LobbyMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<LobbyMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
