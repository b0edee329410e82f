//! Built-in S3P staging services and the default test customer.

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{CustomerProfile, ServiceType, TransactionRequest};
use crate::validation::TridRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDefaults {
    pub service_id: &'static str,
    pub service_number: &'static str,
    pub recommended_amounts: &'static [u64],
}

pub fn service_defaults(service_type: ServiceType) -> ServiceDefaults {
    match service_type {
        ServiceType::Cashin => ServiceDefaults {
            service_id: "20052",
            service_number: "677389120",
            recommended_amounts: &[1000, 500, 2000, 5000],
        },
        ServiceType::Cashout => ServiceDefaults {
            service_id: "20053",
            service_number: "677389120",
            recommended_amounts: &[500, 1000, 2000],
        },
        ServiceType::Topup => ServiceDefaults {
            service_id: "20062",
            service_number: "698081976",
            recommended_amounts: &[500, 100, 1000, 2000],
        },
        ServiceType::Product => ServiceDefaults {
            service_id: "90006",
            service_number: "23900419411616",
            recommended_amounts: &[10000, 15000, 22500, 45000],
        },
        ServiceType::Subscription => ServiceDefaults {
            service_id: "5000",
            service_number: "00000108",
            recommended_amounts: &[1000, 2000, 3000],
        },
        ServiceType::Bill => ServiceDefaults {
            service_id: "2000",
            service_number: "677777777",
            recommended_amounts: &[1000, 2000, 5000],
        },
    }
}

pub fn default_customer() -> CustomerProfile {
    CustomerProfile {
        customer_phone: "237655754334".to_string(),
        customer_email: "test@smobilpay.com".to_string(),
        customer_name: "Test Customer".to_string(),
        customer_address: "Test Address, Douala, Cameroon".to_string(),
    }
}

/// Produces ids of the form `<prefix><TYPE><epoch secs><4 digits>`, unique
/// within one generator. Every 10 000 ids the seconds part moves forward by one.
#[derive(Debug, Clone)]
pub struct TridGenerator {
    rules: TridRules,
    epoch_secs: i64,
    next: u64,
}

impl TridGenerator {
    pub fn new(rules: TridRules) -> Self {
        let seed = (Uuid::new_v4().as_u128() % 10_000) as u64;
        Self {
            rules,
            epoch_secs: Utc::now().timestamp(),
            next: seed,
        }
    }

    pub fn generate(&mut self, service_type: ServiceType) -> String {
        let issued = self.next;
        self.next += 1;
        let sequence = issued % 10_000;
        let epoch_secs = self.epoch_secs + (issued / 10_000) as i64;

        let mut trid = format!(
            "{}{}{}{:04}",
            self.rules.prefix,
            service_type.as_str().to_ascii_uppercase(),
            epoch_secs,
            sequence
        );
        while trid.len() < self.rules.min_len {
            trid.push('0');
        }
        trid
    }
}

pub fn request_for(
    service_type: ServiceType,
    amount: Option<u64>,
    transaction_id: String,
) -> TransactionRequest {
    let defaults = service_defaults(service_type);
    TransactionRequest {
        service_type,
        service_id: defaults.service_id.to_string(),
        amount: amount.unwrap_or(defaults.recommended_amounts[0]),
        service_number: defaults.service_number.to_string(),
        customer: default_customer(),
        transaction_id,
    }
}

/// One cash-in, one cash-out and one top-up at their default amounts.
pub fn default_set(ids: &mut TridGenerator) -> Vec<TransactionRequest> {
    [ServiceType::Cashin, ServiceType::Cashout, ServiceType::Topup]
        .into_iter()
        .map(|t| request_for(t, None, ids.generate(t)))
        .collect()
}

/// Every service type at its first two recommended amounts.
pub fn suite(ids: &mut TridGenerator) -> Vec<TransactionRequest> {
    ServiceType::ALL
        .into_iter()
        .flat_map(|t| {
            service_defaults(t)
                .recommended_amounts
                .iter()
                .take(2)
                .map(move |amount| (t, *amount))
        })
        .map(|(t, amount)| request_for(t, Some(amount), ids.generate(t)))
        .collect()
}

/// `count` identical cash-in transactions of 1000.
pub fn stress(ids: &mut TridGenerator, count: usize) -> Vec<TransactionRequest> {
    (0..count)
        .map(|i| {
            let mut request = request_for(ServiceType::Cashin, Some(1000), ids.generate(ServiceType::Cashin));
            request.customer.customer_name = format!("Test Customer {}", i + 1);
            request
        })
        .collect()
}
