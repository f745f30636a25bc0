use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::relay::ConnectionDetail;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_connections: u64,
    pub active_connections: usize,
    pub packets_received: u64,
    pub bytes_received: u64,
    /// Seconds since process start.
    pub uptime: u64,
    #[serde(rename = "hasSPS")]
    pub has_sps: bool,
    #[serde(rename = "hasPPS")]
    pub has_pps: bool,
    pub connection_details: Vec<ConnectionDetail>,
}

/// `GET /stats`: ingest counters plus a per-session breakdown.
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let (ingest, connection_details) = state.media.stats().await;
    Json(StatsResponse {
        total_connections: ingest.total_connections,
        active_connections: ingest.active_connections,
        packets_received: ingest.packets_received,
        bytes_received: ingest.bytes_received,
        uptime: ingest.uptime_secs,
        has_sps: ingest.has_sps,
        has_pps: ingest.has_pps,
        connection_details,
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
}

/// `GET /health`: liveness probe.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.media.active_connections().await,
    })
}
