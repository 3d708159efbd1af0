//! Table state read API

use crate::core::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use shared::{AppResult, TableStatusEvent};

pub fn router() -> Router<AppState> {
    Router::new().nest("/api/tables", routes())
}

fn routes() -> Router<AppState> {
    Router::new().route("/", get(list))
}

/// GET /api/tables - last known status per table
async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<TableStatusEvent>>> {
    Ok(Json(state.table_status.all()))
}
