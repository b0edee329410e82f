pub mod webhook;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::services::callback_listener::EventStore;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub open_mailboxes: usize,
    pub discarded_events: u64,
}

/// Liveness of the callback listener, handy when exposing it through a tunnel.
pub async fn health(State(store): State<Arc<EventStore>>) -> impl IntoResponse {
    let health_response = HealthStatus {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        open_mailboxes: store.open_mailboxes(),
        discarded_events: store.discarded(),
    };

    (StatusCode::OK, Json(health_response))
}
