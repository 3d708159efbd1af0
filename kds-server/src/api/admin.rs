//! Admin API - seed tooling, off the runtime hot path

use crate::core::AppState;
use crate::seed;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use shared::AppResult;

pub fn router() -> Router<AppState> {
    Router::new().nest("/api/admin", routes())
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/seed", post(apply_seed))
        .route("/seed/clear", post(clear_seed))
        .route("/reset", post(reset))
}

/// POST /api/admin/seed - apply the demo seed (idempotent)
async fn apply_seed(State(state): State<AppState>) -> AppResult<Json<seed::SeedOutcome>> {
    let outcome = seed::apply_demo_seed(&state.pool, &state.ticket_cache).await?;
    Ok(Json(outcome))
}

/// POST /api/admin/seed/clear - remove demo-tagged records
async fn clear_seed(State(state): State<AppState>) -> AppResult<Json<seed::ClearOutcome>> {
    let outcome = seed::clear_demo_data(&state.pool, &state.ticket_cache).await?;
    Ok(Json(outcome))
}

/// POST /api/admin/reset - wipe stores, streams and cache
async fn reset(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    seed::full_reset(&state.pool, &state.ticket_cache, &state.bus).await?;
    Ok(Json(serde_json::json!({ "reset": true })))
}
