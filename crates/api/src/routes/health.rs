//! Aggregate health endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health — cache backend status plus broker reachability. Reports 503
/// when either dependency is down; a disabled cache counts as healthy.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.cache.health().await;
    let broker_reachable = state.bus.healthy().await;
    let healthy = cache.is_healthy() && broker_reachable;

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "service": "courier-api",
            "version": env!("CARGO_PKG_VERSION"),
            "broker": if broker_reachable { "reachable" } else { "unreachable" },
            "cache": cache,
        })),
    )
}
