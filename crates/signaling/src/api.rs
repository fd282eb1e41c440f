//! Status-API (Axum)
//!
//! Nur lesende Endpunkte fuer Betrieb und Clients:
//! - `GET /health`
//! - `GET /api/zones`
//! - `GET /api/zones/:zone_id/peers`
//! - `GET /api/ice-config`
//! - `GET /metrics` (aus `raumfunk-observability`)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use raumfunk_core::types::ZoneId;
use raumfunk_observability::{metrics_router, request_timing_layer, timing_middleware};
use raumfunk_protocol::messages::IceServer;
use serde::Serialize;
use std::sync::Arc;

use crate::registry::ZonenUebersicht;
use crate::server_state::SignalingState;

/// Antwort von `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub active_zones: usize,
    pub active_peers: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IceKonfiguration {
    ice_servers: Vec<IceServer>,
}

#[derive(Debug, Serialize)]
struct FehlerAntwort {
    error: String,
}

/// Vollstaendiger Router inklusive `/metrics` und Timing-Middleware
pub fn api_router(state: Arc<SignalingState>) -> Router {
    let metriken = state.metriken.clone();

    Router::new()
        .route("/health", get(health))
        .route("/api/zones", get(zonen_liste))
        .route("/api/zones/:zone_id/peers", get(zonen_peers))
        .route("/api/ice-config", get(ice_konfiguration))
        .with_state(state)
        .merge(metrics_router(metriken.clone()))
        .layer(axum::middleware::from_fn_with_state(metriken, timing_middleware))
        .layer(request_timing_layer())
}

async fn health(State(state): State<Arc<SignalingState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_sek(),
        active_zones: state.registry.zonen_anzahl(),
        active_peers: state.registry.peer_anzahl(),
    })
}

async fn zonen_liste(State(state): State<Arc<SignalingState>>) -> Json<Vec<ZonenUebersicht>> {
    Json(state.registry.uebersicht())
}

async fn zonen_peers(
    State(state): State<Arc<SignalingState>>,
    Path(zone_id): Path<String>,
) -> Response {
    let zone_id = ZoneId::new(zone_id);
    match state.registry.peers_von(&zone_id) {
        Some(peers) => Json(peers).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(FehlerAntwort {
                error: format!("Zone '{zone_id}' existiert nicht"),
            }),
        )
            .into_response(),
    }
}

async fn ice_konfiguration(State(state): State<Arc<SignalingState>>) -> impl IntoResponse {
    Json(IceKonfiguration {
        ice_servers: state.config.ice_servers.clone(),
    })
}
