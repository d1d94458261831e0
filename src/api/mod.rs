//! HTTP API module
//!
//! This module contains all HTTP endpoint handlers and response structures.

pub mod handlers;
pub mod responses;

use std::sync::Arc;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use handlers::*;

/// Create the HTTP router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/signal/:action", post(signal_handler))
        .route("/timer", get(timer_handler))
        .route("/timer/finish", post(finish_handler))
        .route("/timer/events", get(events_handler))
        .route("/sessions", get(sessions_handler))
        .route("/sessions/total", get(session_total_handler))
        .route("/sessions/:id", delete(delete_session_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
