//! Liveness and readiness endpoints

use crate::core::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use shared::{AppError, AppResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/ready", get(ready))
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    ready: bool,
    epoch: String,
    cached_tickets: usize,
    ticket_subscribers: usize,
    order_item_subscribers: usize,
    ticket_events_dropped: u64,
    order_item_events_dropped: u64,
}

/// GET /api/health - liveness plus basic pipeline stats
async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        ready: state.is_ready(),
        epoch: state.epoch.clone(),
        cached_tickets: state.ticket_cache.len(),
        ticket_subscribers: state.ticket_stream.subscriber_count(),
        order_item_subscribers: state.order_item_stream.subscriber_count(),
        ticket_events_dropped: state.ticket_stream.dropped_total(),
        order_item_events_dropped: state.order_item_stream.dropped_total(),
    })
}

/// GET /api/ready - 503 until the cache warm has completed
async fn ready(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    if !state.is_ready() {
        return Err(AppError::not_ready());
    }
    Ok(Json(serde_json::json!({ "ready": true })))
}
