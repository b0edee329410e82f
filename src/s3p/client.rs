use async_trait::async_trait;
use chrono::Utc;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use super::models::{CollectRequest, OneOrMany, PaymentItem, PaymentStatus, ProviderErrorBody, Quote};
use super::signer::{self, Credentials};
use crate::domain::ServiceType;
use crate::error::TransportError;
use crate::utils::sanitize::{sanitize_body, sanitize_json};

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

/// The four S3P calls the state machine drives.
#[async_trait]
pub trait S3pApi: Send + Sync {
    async fn payment_items(
        &self,
        service_type: ServiceType,
        service_id: &str,
    ) -> Result<Vec<PaymentItem>, TransportError>;

    async fn quote(&self, pay_item_id: &str, amount: u64) -> Result<Quote, TransportError>;

    async fn collect(&self, request: &CollectRequest) -> Result<PaymentStatus, TransportError>;

    async fn verify(&self, ptn: &str) -> Result<Vec<PaymentStatus>, TransportError>;
}

/// Signed HTTP client for the Smobilpay S3P API
#[derive(Clone)]
pub struct S3pClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    circuit_breaker: Breaker,
}

impl S3pClient {
    pub fn new(base_url: String, credentials: Credentials, timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, credentials, timeout, 5, 30)
    }

    /// Creates a client with a custom circuit breaker configuration
    pub fn with_circuit_breaker(
        base_url: String,
        credentials: Credentials,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        S3pClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            circuit_breaker,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Signs and sends one call. Query params go on the URL for GET, the body
    /// is JSON for POST; both take part in the signature.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: BTreeMap<String, Value>,
        body: Option<Value>,
    ) -> Result<T, TransportError> {
        let url = self.url(endpoint);

        let mut signed = query.clone();
        if let Some(Value::Object(fields)) = &body {
            signed.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let now = Utc::now().timestamp_millis().to_string();
        let signature = signer::sign(&self.credentials, method.as_str(), &url, &signed, &now, &now);

        let query_pairs: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
            .collect();

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(reqwest::header::AUTHORIZATION, signature.header(&self.credentials))
            .query(&query_pairs);
        if let Some(body) = &body {
            request = request.json(body);
        }

        tracing::debug!(
            %method,
            %url,
            body = %body.as_ref().map(|b| sanitize_json(b).to_string()).unwrap_or_default(),
            "s3p request"
        );

        let result = self
            .circuit_breaker
            .call_with(
                |e: &TransportError| e.is_transient(),
                async move {
                    let response = request.send().await?;
                    let status = response.status();
                    let text = response.text().await?;
                    tracing::debug!(status = status.as_u16(), body = %sanitize_body(&text), "s3p response");

                    if !status.is_success() {
                        return Err(provider_error(status, &text));
                    }

                    serde_json::from_str::<T>(&text)
                        .map_err(|e| TransportError::Decode(format!("{}: {}", e, text)))
                },
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(TransportError::CircuitOpen(
                "S3P API circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn provider_error(status: StatusCode, text: &str) -> TransportError {
    let body = serde_json::from_str::<ProviderErrorBody>(text).ok();
    TransportError::Provider {
        status: status.as_u16(),
        code: body.as_ref().and_then(|b| b.resp_code),
        message: body
            .and_then(|b| b.message())
            .unwrap_or_else(|| text.chars().take(200).collect()),
    }
}

fn params(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[async_trait]
impl S3pApi for S3pClient {
    async fn payment_items(
        &self,
        service_type: ServiceType,
        service_id: &str,
    ) -> Result<Vec<PaymentItem>, TransportError> {
        let items: OneOrMany<PaymentItem> = self
            .send(
                Method::GET,
                service_type.endpoint(),
                params(&[("serviceid", Value::from(service_id))]),
                None,
            )
            .await?;
        Ok(items.into_vec())
    }

    async fn quote(&self, pay_item_id: &str, amount: u64) -> Result<Quote, TransportError> {
        let body = serde_json::json!({
            "payItemId": pay_item_id,
            "amount": amount,
        });
        self.send(Method::POST, "quotestd", BTreeMap::new(), Some(body))
            .await
    }

    async fn collect(&self, request: &CollectRequest) -> Result<PaymentStatus, TransportError> {
        let body = serde_json::to_value(request)
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        self.send(Method::POST, "collectstd", BTreeMap::new(), Some(body))
            .await
    }

    async fn verify(&self, ptn: &str) -> Result<Vec<PaymentStatus>, TransportError> {
        let statuses: OneOrMany<PaymentStatus> = self
            .send(
                Method::GET,
                "verifytx",
                params(&[("ptn", Value::from(ptn))]),
                None,
            )
            .await?;
        Ok(statuses.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: String) -> S3pClient {
        S3pClient::with_circuit_breaker(
            url,
            Credentials::new("key", "secret"),
            Duration::from_secs(5),
            3,
            1,
        )
    }

    #[test]
    fn test_client_creation_trims_trailing_slash() {
        let client = client("https://s3p.smobilpay.staging.maviance.info/v2/".to_string());
        assert_eq!(client.base_url(), "https://s3p.smobilpay.staging.maviance.info/v2");
        assert_eq!(client.url("/quotestd"), "https://s3p.smobilpay.staging.maviance.info/v2/quotestd");
    }

    #[test]
    fn test_circuit_breaker_state() {
        let client = client("https://s3p.smobilpay.staging.maviance.info/v2".to_string());
        assert_eq!(client.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn test_payment_items_are_signed_and_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/cashin")
            .match_query(mockito::Matcher::UrlEncoded("serviceid".into(), "20052".into()))
            .match_header(
                "authorization",
                mockito::Matcher::Regex(r#"^s3pAuth s3pAuth_timestamp="\d+", s3pAuth_signature="[A-Za-z0-9+/=]{28}""#.into()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"payItemId":"S-112-948-CMORANGEOM-30052-2006125104-1","serviceid":"20052","amountType":"CUSTOM"}]"#)
            .create_async()
            .await;

        let items = client(server.url())
            .payment_items(ServiceType::Cashin, "20052")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].pay_item_id, "S-112-948-CMORANGEOM-30052-2006125104-1");
    }

    #[tokio::test]
    async fn test_provider_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/quotestd")
            .with_status(400)
            .with_body(r#"{"respCode":40301,"devMsg":"Invalid payItemId"}"#)
            .create_async()
            .await;

        let err = client(server.url()).quote("nope", 1000).await.unwrap_err();
        match err {
            TransportError::Provider { status, code, message } => {
                assert_eq!(status, 400);
                assert_eq!(code, Some(40301));
                assert_eq!(message, "Invalid payItemId");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_accepts_single_object() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/verifytx")
            .match_query(mockito::Matcher::UrlEncoded("ptn".into(), "PTN1".into()))
            .with_status(200)
            .with_body(r#"{"ptn":"PTN1","status":"SUCCESS"}"#)
            .create_async()
            .await;

        let statuses = client(server.url()).verify("PTN1").await.unwrap();
        assert_eq!(statuses[0].status.as_deref(), Some("SUCCESS"));
    }

    #[tokio::test]
    async fn test_garbage_body_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/verifytx")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = client(server.url()).verify("PTN1").await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_transient_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/verifytx")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .expect_at_least(3)
            .create_async()
            .await;

        let client = client(server.url());
        for _ in 0..3 {
            let _ = client.verify("PTN1").await;
        }

        let result = client.verify("PTN1").await;
        assert!(matches!(result, Err(TransportError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn test_provider_rejections_do_not_trip_breaker() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/quotestd")
            .with_status(400)
            .with_body(r#"{"respCode":40602,"devMsg":"rejected"}"#)
            .create_async()
            .await;

        let client = client(server.url());
        for _ in 0..5 {
            let _ = client.quote("item", 1000).await;
        }
        assert_eq!(client.circuit_state(), "closed");
    }
}
