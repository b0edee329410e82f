use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::TransactionState;

/// Failure of a single signed call to the S3P API.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("S3P rejected the request ({status}): {message}")]
    Provider {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("Invalid response from S3P: {0}")]
    Decode(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),
}

impl TransportError {
    /// Whether the failure is worth retrying: network trouble, throttling,
    /// server-side errors or an open breaker.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            TransportError::Provider { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            TransportError::Decode(_) => false,
            TransportError::CircuitOpen(_) => true,
        }
    }
}

/// Per-transaction failure. Always caught at the state machine boundary and
/// recorded on the transaction record.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payment items error: {0}")]
    Items(String),

    #[error("Quote error: {0}")]
    Quote(String),

    #[error("Collect error: {0}")]
    Collect(String),

    #[error("Verification timed out after {attempts} poll attempt(s)")]
    Timeout { attempts: u32 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),
}

impl TransactionError {
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionError::Validation(_) => "ValidationError",
            TransactionError::Items(_) => "ItemsError",
            TransactionError::Quote(_) => "QuoteError",
            TransactionError::Collect(_) => "CollectError",
            TransactionError::Timeout { .. } => "TimeoutError",
            TransactionError::Transport(_) => "TransportError",
            TransactionError::Record(_) => "StateError",
        }
    }
}

impl From<crate::validation::ValidationError> for TransactionError {
    fn from(e: crate::validation::ValidationError) -> Self {
        TransactionError::Validation(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Could not bind callback listener on ports {port}..{} ({attempts} attempt(s))", .port.saturating_add(.attempts.saturating_sub(1)))]
    Bind { port: u16, attempts: u16 },

    #[error("Callback listener I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected mutation of a transaction record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Transaction {0} is already terminal")]
    Terminal(String),

    #[error("Illegal transition {from} -> {to}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },
}

/// Errors surfaced by the callback HTTP endpoint.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(status: u16) -> TransportError {
        TransportError::Provider {
            status,
            code: Some(40602),
            message: "rejected".to_string(),
        }
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(provider(500).is_transient());
        assert!(provider(503).is_transient());
        assert!(provider(429).is_transient());
        assert!(provider(408).is_transient());
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        assert!(!provider(400).is_transient());
        assert!(!provider(404).is_transient());
        assert!(!TransportError::Decode("garbage".to_string()).is_transient());
    }

    #[test]
    fn test_open_breaker_is_transient() {
        assert!(TransportError::CircuitOpen("open".to_string()).is_transient());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(TransactionError::Validation("x".into()).kind(), "ValidationError");
        assert_eq!(TransactionError::Items("x".into()).kind(), "ItemsError");
        assert_eq!(TransactionError::Quote("x".into()).kind(), "QuoteError");
        assert_eq!(TransactionError::Collect("x".into()).kind(), "CollectError");
        assert_eq!(TransactionError::Timeout { attempts: 3 }.kind(), "TimeoutError");
        assert_eq!(TransactionError::from(provider(500)).kind(), "TransportError");
    }

    #[test]
    fn test_bind_error_message_names_port_range() {
        let err = ListenerError::Bind { port: 8085, attempts: 3 };
        assert_eq!(
            err.to_string(),
            "Could not bind callback listener on ports 8085..8087 (3 attempt(s))"
        );
    }

    #[test]
    fn test_bad_request_status_code() {
        let error = AppError::BadRequest("missing trid".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_request_response() {
        let response = AppError::BadRequest("missing trid".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
