//! API routes definition

use super::handlers;
use super::realtime::RealtimeService;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the router with all endpoints
pub fn build_router(service: Arc<RealtimeService>) -> Router {
    Router::new()
        // Transports
        .route("/ws", get(handlers::open_socket))
        .route("/events", get(handlers::open_stream))
        // Sync
        .route("/sync/:actor_id", get(handlers::incremental_sync))
        .route("/actors/:actor_id/state", get(handlers::actor_state))
        .route("/actors/:actor_id/events", post(handlers::publish_event))
        .route("/health", get(handlers::health))
        .with_state(service)
}
