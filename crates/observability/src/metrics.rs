//! Prometheus-kompatible Metriken fuer Raumfunk
//!
//! Registrierte Metriken:
//! - `raumfunk_connected_clients` – Gauge: Aktuell verbundene Clients
//! - `raumfunk_zones_active` – Gauge: Zonen mit mindestens einem Mitglied
//! - `raumfunk_chat_messages_total` – Counter: Angenommene Chat-Nachrichten
//! - `raumfunk_signals_relayed_total` – Counter: Weitergeleitete Signale (kind)
//! - `raumfunk_protocol_errors_total` – Counter: Ungueltige Frames
//! - `raumfunk_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `raumfunk_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Raumfunk-Prometheus-Metriken
///
/// Jede Instanz hat ihre eigene Registry, mehrere Dienste im selben
/// Prozess (z.B. in Tests) stoeren sich nicht.
#[derive(Clone)]
pub struct RaumfunkMetrics {
    pub registry: Arc<Registry>,

    // Dienst-Metriken
    pub connected_clients: Gauge,
    pub zones_active: Gauge,
    pub chat_messages_total: IntCounter,
    pub signals_relayed_total: IntCounterVec,
    pub protocol_errors_total: IntCounter,

    // HTTP-Metriken
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

impl RaumfunkMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_clients = Gauge::with_opts(Opts::new(
            "raumfunk_connected_clients",
            "Anzahl aktuell verbundener Clients",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let zones_active = Gauge::with_opts(Opts::new(
            "raumfunk_zones_active",
            "Anzahl aktiver Zonen",
        ))?;
        registry.register(Box::new(zones_active.clone()))?;

        let chat_messages_total = IntCounter::with_opts(Opts::new(
            "raumfunk_chat_messages_total",
            "Gesamtanzahl angenommener Chat-Nachrichten",
        ))?;
        registry.register(Box::new(chat_messages_total.clone()))?;

        let signals_relayed_total = IntCounterVec::new(
            Opts::new(
                "raumfunk_signals_relayed_total",
                "Gesamtanzahl weitergeleiteter Signaling-Nachrichten",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(signals_relayed_total.clone()))?;

        let protocol_errors_total = IntCounter::with_opts(Opts::new(
            "raumfunk_protocol_errors_total",
            "Gesamtanzahl verworfener ungueltiger Frames",
        ))?;
        registry.register(Box::new(protocol_errors_total.clone()))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("raumfunk_http_requests_total", "Gesamtanzahl HTTP-Anfragen"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "raumfunk_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            zones_active,
            chat_messages_total,
            signals_relayed_total,
            protocol_errors_total,
            http_requests_total,
            http_request_duration_seconds,
        })
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
pub fn metrics_router(metriken: RaumfunkMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<RaumfunkMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
