use bigdecimal::BigDecimal;
use std::fmt;

use crate::domain::TransactionRequest;
use crate::s3p::models::{AmountType, PaymentItem};

pub const DEFAULT_TRID_PREFIX: &str = "JAY";
pub const DEFAULT_TRID_MIN_LEN: usize = 21;
pub const TRID_MAX_LEN: usize = 64;
pub const SERVICE_NUMBER_MAX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

/// Format contract for caller-supplied transaction ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TridRules {
    pub prefix: String,
    pub min_len: usize,
}

impl Default for TridRules {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_TRID_PREFIX.to_string(),
            min_len: DEFAULT_TRID_MIN_LEN,
        }
    }
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_transaction_id(trid: &str, rules: &TridRules) -> ValidationResult {
    validate_required("transaction_id", trid)?;
    validate_max_len("transaction_id", trid, TRID_MAX_LEN)?;

    if trid.len() < rules.min_len {
        return Err(ValidationError::new(
            "transaction_id",
            format!("must be at least {} characters", rules.min_len),
        ));
    }

    if !trid.starts_with(&rules.prefix) {
        return Err(ValidationError::new(
            "transaction_id",
            format!("must start with '{}'", rules.prefix),
        ));
    }

    if !trid.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-') {
        return Err(ValidationError::new(
            "transaction_id",
            "must contain only letters, digits, '_' or '-'",
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: u64) -> ValidationResult {
    if amount == 0 {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

/// Checks everything that can be checked without touching the network.
pub fn validate_request(request: &TransactionRequest, rules: &TridRules) -> ValidationResult {
    validate_transaction_id(&request.transaction_id, rules)?;
    validate_required("service_id", &request.service_id)?;
    validate_required("service_number", &request.service_number)?;
    validate_max_len("service_number", &request.service_number, SERVICE_NUMBER_MAX_LEN)?;
    validate_positive_amount(request.amount)?;

    Ok(())
}

/// Picks the payment item the requested amount is allowed against.
///
/// Fixed-tariff items only accept their exact advertised amount; custom
/// items accept anything inside their optional bounds.
pub fn select_payment_item(
    items: &[PaymentItem],
    amount: u64,
) -> Result<&PaymentItem, ValidationError> {
    validate_positive_amount(amount)?;
    let requested = BigDecimal::from(amount);

    if let Some(item) = items.iter().find(|item| match item.amount_type {
        AmountType::Fixed => item.amount_local_cur.as_ref() == Some(&requested),
        AmountType::Custom => item.accepts(&requested),
    }) {
        return Ok(item);
    }

    let tariffs: Vec<String> = items
        .iter()
        .filter(|item| item.amount_type == AmountType::Fixed)
        .filter_map(|item| item.amount_local_cur.as_ref().map(|a| a.to_string()))
        .collect();

    let message = if tariffs.is_empty() {
        format!("{} is outside the permitted range", amount)
    } else {
        format!(
            "{} is not an advertised tariff (allowed: {})",
            amount,
            tariffs.join(", ")
        )
    };

    Err(ValidationError::new("amount", message))
}
