//! s3pAuth request signing (HMAC-SHA1).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use sha1::Sha1;
use std::collections::BTreeMap;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_METHOD: &str = "HMAC-SHA1";

/// Everything except unreserved characters is escaped.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"****")
            .finish()
    }
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }
}

/// Output of one signing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub timestamp: String,
    pub nonce: String,
    pub value: String,
}

impl Signature {
    /// Value of the `Authorization` header.
    pub fn header(&self, credentials: &Credentials) -> String {
        format!(
            "s3pAuth s3pAuth_timestamp=\"{}\", s3pAuth_signature=\"{}\", s3pAuth_nonce=\"{}\", s3pAuth_signature_method=\"{}\", s3pAuth_token=\"{}\"",
            self.timestamp, self.value, self.nonce, SIGNATURE_METHOD, credentials.key
        )
    }
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn encode(raw: &str) -> String {
    utf8_percent_encode(raw, UNRESERVED).to_string()
}

/// Canonical `k=v&k=v` string: request params merged with the s3pAuth
/// params, string values trimmed, keys sorted.
pub fn canonical_params(
    credentials: &Credentials,
    params: &BTreeMap<String, Value>,
    timestamp: &str,
    nonce: &str,
) -> String {
    let mut merged: BTreeMap<&str, String> = params
        .iter()
        .map(|(k, v)| (k.as_str(), param_value(v)))
        .collect();
    merged.insert("s3pAuth_nonce", nonce.to_string());
    merged.insert("s3pAuth_timestamp", timestamp.to_string());
    merged.insert("s3pAuth_signature_method", SIGNATURE_METHOD.to_string());
    merged.insert("s3pAuth_token", credentials.key.trim().to_string());

    merged
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn base_string(method: &str, url: &str, parameter_string: &str) -> String {
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(url),
        encode(parameter_string)
    )
}

/// Signs one request. Pure: identical inputs give an identical signature.
pub fn sign(
    credentials: &Credentials,
    method: &str,
    url: &str,
    params: &BTreeMap<String, Value>,
    timestamp: &str,
    nonce: &str,
) -> Signature {
    let parameter_string = canonical_params(credentials, params, timestamp, nonce);
    let base = base_string(method, url, &parameter_string);

    // HMAC accepts keys of any length
    let mut mac = HmacSha1::new_from_slice(credentials.secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(base.as_bytes());

    Signature {
        timestamp: timestamp.to_string(),
        nonce: nonce.to_string(),
        value: STANDARD.encode(mac.finalize().into_bytes()),
    }
}
