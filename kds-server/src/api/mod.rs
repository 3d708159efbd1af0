//! HTTP API - read path and admin surface

pub mod admin;
pub mod health;
pub mod order_items;
pub mod tables;
pub mod tickets;

use crate::core::AppState;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(tickets::router())
        .merge(order_items::router())
        .merge(tables::router())
        .merge(admin::router())
        .merge(health::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
