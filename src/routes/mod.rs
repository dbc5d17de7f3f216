use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

pub mod auth;
pub mod health;
pub mod notifications;

/// Application routes without the outer layers (CORS, tracing).
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/notifications", notifications::router())
        .with_state(state)
}
