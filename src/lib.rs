pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod report;
pub mod s3p;
pub mod services;
pub mod utils;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::services::callback_listener::EventStore;

/// Routes served by the callback listener.
pub fn create_app(store: Arc<EventStore>, log_bodies: bool) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/callback", post(handlers::webhook::callback))
        .layer(axum::middleware::from_fn_with_state(
            log_bodies,
            middleware::request_logger::request_logger_middleware,
        ))
        .with_state(store)
}
