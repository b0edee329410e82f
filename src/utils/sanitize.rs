use serde_json::Value;

/// Masks customer and credential fields in JSON payloads before logging
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

/// Raw body variant of [`sanitize_json`]. Non-JSON bodies pass through.
pub fn sanitize_body(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => sanitize_json(&value).to_string(),
        Err(_) => text.to_string(),
    }
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "customerphonenumber"
            | "customeremailaddress"
            | "customer_phone"
            | "customer_email"
            | "pin"
            | "secret"
            | "token"
            | "authorization"
            | "s3pauth_token"
    )
}

/// Keeps the first and last four characters of long values.
pub fn mask(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 8 {
        let visible: String = chars[..4].iter().collect();
        let end: String = chars[chars.len() - 4..].iter().collect();
        format!("{}****{}", visible, end)
    } else {
        "****".to_string()
    }
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask(s)),
        _ => Value::String("****".to_string()),
    }
}
