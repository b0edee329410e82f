#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use s3p_harness::config::catalog;
use s3p_harness::config::{EngineSettings, WebhookSettings};
use s3p_harness::domain::{ServiceType, TransactionRequest};
use s3p_harness::s3p::{Credentials, S3pClient};
use s3p_harness::services::{CallbackListener, RetryPolicy};
use s3p_harness::validation::TridRules;

pub const PTN: &str = "99999166542651400095315364801168";

pub const CASHIN_ITEMS: &str = r#"[{
    "payItemId": "S-112-951-CMORANGEOM-20052-CM_ORANGE_VTU_CUSTOM-1",
    "serviceid": "20052",
    "merchant": "CMORANGEOM",
    "amountType": "CUSTOM",
    "localCur": "XAF",
    "minAmount": 100,
    "maxAmount": 500000
}]"#;

pub const PRODUCT_ITEMS: &str = r#"{"payItems": [
    {"payItemId": "S-112-974-CMENEOPREPAID-90006-10000", "amountType": "FIXED", "amountLocalCur": 10000},
    {"payItemId": "S-112-974-CMENEOPREPAID-90006-15000", "amountType": "FIXED", "amountLocalCur": 15000},
    {"payItemId": "S-112-974-CMENEOPREPAID-90006-22500", "amountType": "FIXED", "amountLocalCur": 22500},
    {"payItemId": "S-112-974-CMENEOPREPAID-90006-45000", "amountType": "FIXED", "amountLocalCur": 45000}
]}"#;

pub const QUOTE: &str = r#"{
    "quoteId": "b9f2c4d1-quote",
    "expiresAt": "2099-01-01T00:00:00+00:00",
    "payItemId": "S-112-951-CMORANGEOM-20052-CM_ORANGE_VTU_CUSTOM-1",
    "amountLocalCur": 1000,
    "priceLocalCur": 1000
}"#;

pub fn collect_body() -> String {
    format!(r#"{{"ptn": "{}", "status": "PENDING", "trid": "JAYCASHIN17000000000001"}}"#, PTN)
}

pub fn verify_body(status: &str) -> String {
    format!(r#"[{{"ptn": "{}", "status": "{}"}}]"#, PTN, status)
}

pub fn client(url: String) -> Arc<S3pClient> {
    Arc::new(S3pClient::new(
        url,
        Credentials::new("test-key", "test-secret"),
        Duration::from_secs(5),
    ))
}

/// Millisecond-scale timings so scenarios finish quickly.
pub fn fast_engine() -> EngineSettings {
    let tick = Duration::from_millis(5);
    EngineSettings {
        trid_rules: TridRules::default(),
        quote_retry: RetryPolicy::new(2, tick, 1.0, tick),
        collect_retry: RetryPolicy::new(2, tick, 1.0, tick),
        poll: RetryPolicy::new(5, tick, 1.0, tick),
        callback_wait: Duration::from_millis(50),
        initial_poll_delay: tick,
        cashout_initial_poll_delay: tick,
    }
}

pub fn request(service_type: ServiceType, amount: u64, trid: &str) -> TransactionRequest {
    catalog::request_for(service_type, Some(amount), trid.to_string())
}

pub fn webhook_settings(port: u16) -> WebhookSettings {
    WebhookSettings {
        enabled: true,
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        bind_attempts: 5,
        public_url: None,
        log_bodies: true,
    }
}

pub async fn listener() -> Arc<CallbackListener> {
    Arc::new(CallbackListener::start(&webhook_settings(0)).await.unwrap())
}
