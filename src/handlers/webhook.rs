use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::AppError;
use crate::services::callback_listener::EventStore;

/// Receives an S3P status notification. Any well-formed payload is
/// acknowledged with 200, whether or not a transaction is waiting for it.
pub async fn callback(
    State(store): State<Arc<EventStore>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let receipt = store.on_request(&body)?;
    Ok((StatusCode::OK, Json(receipt)))
}
