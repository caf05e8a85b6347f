//! Status, stats, and liveness read endpoints.

use std::collections::HashMap;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::health::StatusMap;
use crate::state::AppState;
use crate::stats::ByteSnapshot;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub services: StatusMap,
}

/// Per-service runtime and byte counters.
#[derive(Debug, Serialize)]
pub struct ServiceStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub bytes_total: u64,
    pub restart_count: u64,
    pub last_start_time: Option<DateTime<Utc>>,
    pub last_active: Option<String>,
    pub listener_id: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        services: state.prober().status().as_ref().clone(),
    })
}

/// GET /api/socat_stats
pub async fn socat_stats(
    State(state): State<AppState>,
) -> Json<HashMap<String, ServiceStats>> {
    let services = state.store().list_services().await;
    let bytes = state.stats().service_snapshot().await;
    let runtime = state.forwarder().runtime_snapshot().await;

    let stats = services
        .into_iter()
        .map(|service| {
            let counters = bytes.get(&service.name).copied().unwrap_or_default();
            let runtime = runtime.get(&service.name);
            (
                service.name,
                ServiceStats {
                    bytes_in: counters.bytes_in,
                    bytes_out: counters.bytes_out,
                    bytes_total: counters.bytes_total,
                    restart_count: runtime.map(|r| r.restart_count).unwrap_or(0),
                    last_start_time: runtime.and_then(|r| r.last_start_time),
                    last_active: runtime.and_then(|r| r.last_active.clone()),
                    listener_id: runtime.and_then(|r| r.listener_id),
                },
            )
        })
        .collect();

    Json(stats)
}

/// GET /api/socat_stats_by_server
pub async fn socat_stats_by_server(
    State(state): State<AppState>,
) -> Json<HashMap<String, ByteSnapshot>> {
    Json(state.stats().backend_snapshot().await)
}

/// GET /healthz
///
/// Liveness probe for the control plane itself; does not check the data
/// plane.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "balancer".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}
