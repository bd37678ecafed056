//! Axum router wiring for C9.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rank", post(handlers::rank))
        .route("/fuse", post(handlers::fuse))
        .route("/ingest", post(handlers::ingest))
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
