//! Ticket read API - served from the cache, never the store

use crate::core::AppState;
use crate::stream::StationFilter;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use shared::{AppError, AppResult, Ticket};
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new().nest("/api/tickets", routes())
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/{id}", get(get_by_id))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    station: Option<String>,
}

/// GET /api/tickets?station= - live tickets, ordered by creation time
async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Ticket>>> {
    if !state.is_ready() {
        return Err(AppError::not_ready());
    }
    let filter = StationFilter::from_station(query.station);
    Ok(Json(state.ticket_cache.list(&filter)))
}

/// GET /api/tickets/:id
async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Ticket>> {
    if !state.is_ready() {
        return Err(AppError::not_ready());
    }
    state
        .ticket_cache
        .get(id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Ticket {id}")))
}
