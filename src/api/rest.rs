// =============================================================================
// Status API — Axum 0.7
// =============================================================================
//
// Read-only view of the running exporter under `/api/v1/`. No endpoint can
// change ingestion state.
//
// CORS is permissive; the API exposes counters only.
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::stats::IngestStats;
use crate::types::Phase;

// =============================================================================
// Router construction
// =============================================================================

/// Build the status router with CORS middleware and shared stats.
pub fn router(stats: Arc<IngestStats>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .layer(cors)
        .with_state(stats)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    phase: Phase,
    live: bool,
    server_time: i64,
}

async fn health(State(stats): State<Arc<IngestStats>>) -> impl IntoResponse {
    let phase = stats.phase();
    Json(HealthResponse {
        status: "ok",
        phase,
        live: phase == Phase::Live,
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Full status snapshot
// =============================================================================

async fn status(State(stats): State<Arc<IngestStats>>) -> impl IntoResponse {
    Json(stats.snapshot())
}
