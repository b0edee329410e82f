use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use uuid::Uuid;

const MAX_BODY_LOG_SIZE: usize = 16 * 1024;

/// Logs every inbound callback request with a generated request id. Bodies
/// are logged (sanitized) only when `log_bodies` is set.
pub async fn request_logger_middleware(
    State(log_bodies): State<bool>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    if log_bodies {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_BODY_LOG_SIZE).await {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    method = %method,
                    uri = %uri,
                    "Callback body too large or failed to read"
                );
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };

        let sanitized_body = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(json) => crate::utils::sanitize::sanitize_json(&json).to_string(),
            Err(_) => format!("[non-json, {} bytes]", bytes.len()),
        };

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            body_size = bytes.len(),
            body = %sanitized_body,
            "Incoming callback"
        );

        req = Request::from_parts(parts, Body::from(bytes));
    } else {
        tracing::debug!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            "Incoming callback"
        );
    }

    let mut response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        latency_ms = start.elapsed().as_millis(),
        "Callback handled"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use axum::{routing::post, Router};
    use tower::ServiceExt;

    fn app(log_bodies: bool) -> Router {
        Router::new()
            .route("/test", post(|body: String| async move { body }))
            .layer(axum::middleware::from_fn_with_state(
                log_bodies,
                request_logger_middleware,
            ))
    }

    #[tokio::test]
    async fn test_request_logger_adds_request_id() {
        let response = app(false)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_body_survives_logging() {
        let response = app(true)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/test")
                    .body(Body::from(r#"{"trid":"T","status":"SUCCESS"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], br#"{"trid":"T","status":"SUCCESS"}"#);
    }
}
