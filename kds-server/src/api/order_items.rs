//! Order-item read API

use crate::core::AppState;
use crate::db::repository;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use shared::{AppResult, OrderItem};
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new().nest("/api/order-items", routes())
}

fn routes() -> Router<AppState> {
    Router::new().route("/", get(list))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    order_id: Option<Uuid>,
    station: Option<String>,
}

/// GET /api/order-items?order_id=&station=
///
/// With `order_id`: every line of that order. Without: the non-terminal
/// items, optionally narrowed to a station.
async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<OrderItem>>> {
    let items = match query.order_id {
        Some(order_id) => repository::order_item::list_by_order(&state.pool, order_id).await?,
        None => {
            repository::order_item::list_active(&state.pool, query.station.as_deref()).await?
        }
    };
    Ok(Json(items))
}
