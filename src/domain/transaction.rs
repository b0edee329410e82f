//! Transaction domain entities.
//! The immutable request, the single-writer record and its lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RecordError, TransactionError};
use crate::validation::ValidationError;

/// S3P service families. Each maps to its own payment-items endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Cashin,
    Cashout,
    Topup,
    Product,
    Subscription,
    Bill,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::Cashin,
        ServiceType::Cashout,
        ServiceType::Topup,
        ServiceType::Product,
        ServiceType::Subscription,
        ServiceType::Bill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Cashin => "cashin",
            ServiceType::Cashout => "cashout",
            ServiceType::Topup => "topup",
            ServiceType::Product => "product",
            ServiceType::Subscription => "subscription",
            ServiceType::Bill => "bill",
        }
    }

    /// Path segment of the payment-items endpoint.
    pub fn endpoint(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                ValidationError::new(
                    "service_type",
                    format!(
                        "must be one of: {}",
                        ServiceType::ALL.map(|t| t.as_str()).join(", ")
                    ),
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub customer_phone: String,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_address: String,
}

/// One transaction to drive through the four-step lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub service_type: ServiceType,
    pub service_id: String,
    pub amount: u64,
    pub service_number: String,
    #[serde(flatten)]
    pub customer: CustomerProfile,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Created,
    ItemsFetched,
    Quoted,
    Collected,
    Verifying,
    Success,
    Failed,
    Error,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Success | TransactionState::Failed | TransactionState::Error
        )
    }

    /// The only non-terminal state reachable from `self`.
    fn successor(&self) -> Option<TransactionState> {
        match self {
            TransactionState::Created => Some(TransactionState::ItemsFetched),
            TransactionState::ItemsFetched => Some(TransactionState::Quoted),
            TransactionState::Quoted => Some(TransactionState::Collected),
            TransactionState::Collected => Some(TransactionState::Verifying),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Created => "CREATED",
            TransactionState::ItemsFetched => "ITEMS_FETCHED",
            TransactionState::Quoted => "QUOTED",
            TransactionState::Collected => "COLLECTED",
            TransactionState::Verifying => "VERIFYING",
            TransactionState::Success => "SUCCESS",
            TransactionState::Failed => "FAILED",
            TransactionState::Error => "ERROR",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failed,
    Error,
}

impl From<Outcome> for TransactionState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => TransactionState::Success,
            Outcome::Failed => TransactionState::Failed,
            Outcome::Error => TransactionState::Error,
        }
    }
}

/// How a provider status string is treated during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Pending,
    Terminal(Outcome),
}

/// Maps the S3P status vocabulary. Unrecognised values are never success.
pub fn classify_status(status: &str) -> StatusClass {
    match status.trim().to_ascii_uppercase().as_str() {
        "SUCCESS" => StatusClass::Terminal(Outcome::Success),
        "ERRORED" | "FAILED" | "REVERSED" => StatusClass::Terminal(Outcome::Failed),
        "PENDING" | "INPROCESS" | "UNDERINVESTIGATION" => StatusClass::Pending,
        _ => StatusClass::Terminal(Outcome::Error),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionSource {
    Callback,
    Poll,
}

impl fmt::Display for CompletionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionSource::Callback => f.write_str("callback"),
            CompletionSource::Poll => f.write_str("poll"),
        }
    }
}

/// First terminal signal for a transaction, from whichever source won.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub outcome: Outcome,
    pub provider_status: String,
    pub source: CompletionSource,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedError {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub state: TransactionState,
    pub at: DateTime<Utc>,
}

/// Mutable lifecycle record, owned by exactly one state machine while it runs.
/// Every mutation goes through a guarded method; once terminal it is frozen.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    request: TransactionRequest,
    state: TransactionState,
    history: Vec<StateChange>,
    pay_item_id: Option<String>,
    quote_id: Option<String>,
    ptn: Option<String>,
    provider_status: Option<String>,
    completion_source: Option<CompletionSource>,
    error: Option<RecordedError>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    pub fn new(request: TransactionRequest) -> Self {
        let now = Utc::now();
        Self {
            request,
            state: TransactionState::Created,
            history: vec![StateChange {
                state: TransactionState::Created,
                at: now,
            }],
            pay_item_id: None,
            quote_id: None,
            ptn: None,
            provider_status: None,
            completion_source: None,
            error: None,
            created_at: now,
            finished_at: None,
        }
    }

    /// A record that never left `CREATED`, terminated by `error`.
    pub fn rejected(request: TransactionRequest, error: &TransactionError) -> Self {
        let mut record = Self::new(request);
        record.error = Some(RecordedError {
            kind: error.kind(),
            message: error.to_string(),
        });
        record.enter(TransactionState::Error);
        record
    }

    pub fn request(&self) -> &TransactionRequest {
        &self.request
    }

    pub fn transaction_id(&self) -> &str {
        &self.request.transaction_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    pub fn visited_states(&self) -> Vec<TransactionState> {
        self.history.iter().map(|c| c.state).collect()
    }

    pub fn quote_id(&self) -> Option<&str> {
        self.quote_id.as_deref()
    }

    pub fn ptn(&self) -> Option<&str> {
        self.ptn.as_deref()
    }

    pub fn provider_status(&self) -> Option<&str> {
        self.provider_status.as_deref()
    }

    pub fn completion_source(&self) -> Option<CompletionSource> {
        self.completion_source
    }

    pub fn error(&self) -> Option<&RecordedError> {
        self.error.as_ref()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn execution_time(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| (end - self.created_at).to_std().ok())
    }

    pub fn record_items(&mut self) -> Result<(), RecordError> {
        self.advance(TransactionState::ItemsFetched)
    }

    pub fn record_quote(&mut self, pay_item_id: String, quote_id: String) -> Result<(), RecordError> {
        self.advance(TransactionState::Quoted)?;
        self.pay_item_id = Some(pay_item_id);
        self.quote_id = Some(quote_id);
        Ok(())
    }

    pub fn record_collect(&mut self, ptn: String) -> Result<(), RecordError> {
        self.advance(TransactionState::Collected)?;
        self.ptn = Some(ptn);
        Ok(())
    }

    pub fn begin_verification(&mut self) -> Result<(), RecordError> {
        self.advance(TransactionState::Verifying)
    }

    /// Applies the first terminal verification signal.
    pub fn complete(&mut self, completion: &Completion) -> Result<(), RecordError> {
        let to = TransactionState::from(completion.outcome);
        self.guard_live()?;
        if self.state != TransactionState::Verifying {
            return Err(RecordError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.provider_status = Some(completion.provider_status.clone());
        self.completion_source = Some(completion.source);
        if completion.outcome != Outcome::Success {
            self.error = Some(RecordedError {
                kind: "ProviderStatus",
                message: format!(
                    "provider reported {} via {}",
                    completion.provider_status, completion.source
                ),
            });
        }
        self.enter(to);
        Ok(())
    }

    /// Terminates the record with `ERROR` from any live state.
    pub fn abort(&mut self, error: &TransactionError) -> Result<(), RecordError> {
        self.guard_live()?;
        self.error = Some(RecordedError {
            kind: error.kind(),
            message: error.to_string(),
        });
        self.enter(TransactionState::Error);
        Ok(())
    }

    fn advance(&mut self, to: TransactionState) -> Result<(), RecordError> {
        self.guard_live()?;
        if self.state.successor() != Some(to) {
            return Err(RecordError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.enter(to);
        Ok(())
    }

    fn guard_live(&self) -> Result<(), RecordError> {
        if self.state.is_terminal() {
            return Err(RecordError::Terminal(self.request.transaction_id.clone()));
        }
        Ok(())
    }

    fn enter(&mut self, state: TransactionState) {
        let at = Utc::now();
        self.state = state;
        self.history.push(StateChange { state, at });
        if state.is_terminal() {
            self.finished_at = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TransactionRequest {
        TransactionRequest {
            service_type: ServiceType::Cashin,
            service_id: "20052".to_string(),
            amount: 1000,
            service_number: "677389120".to_string(),
            customer: CustomerProfile {
                customer_phone: "237655754334".to_string(),
                customer_email: "test@smobilpay.com".to_string(),
                customer_name: "Test Customer".to_string(),
                customer_address: "Douala".to_string(),
            },
            transaction_id: "JAYCASHIN17000000001234".to_string(),
        }
    }

    fn completion(outcome: Outcome, status: &str, source: CompletionSource) -> Completion {
        Completion {
            outcome,
            provider_status: status.to_string(),
            source,
            payload: None,
        }
    }

    fn verifying_record() -> TransactionRecord {
        let mut record = TransactionRecord::new(request());
        record.record_items().unwrap();
        record
            .record_quote("S-112-948-CMORANGEOM-30052-2006125104-1".into(), "quote-1".into())
            .unwrap();
        record.record_collect("99999166542651400095315364801168".into()).unwrap();
        record.begin_verification().unwrap();
        record
    }

    #[test]
    fn test_full_lifecycle_visits_states_in_order() {
        let mut record = verifying_record();
        record
            .complete(&completion(Outcome::Success, "SUCCESS", CompletionSource::Poll))
            .unwrap();

        assert_eq!(
            record.visited_states(),
            vec![
                TransactionState::Created,
                TransactionState::ItemsFetched,
                TransactionState::Quoted,
                TransactionState::Collected,
                TransactionState::Verifying,
                TransactionState::Success,
            ]
        );
        assert!(record.finished_at().is_some());
        assert!(record.error().is_none());
    }

    #[test]
    fn test_cannot_skip_a_state() {
        let mut record = TransactionRecord::new(request());
        let err = record.record_quote("item".into(), "quote-1".into()).unwrap_err();
        assert_eq!(
            err,
            RecordError::InvalidTransition {
                from: TransactionState::Created,
                to: TransactionState::Quoted,
            }
        );
        assert_eq!(record.state(), TransactionState::Created);
        assert!(record.quote_id().is_none());
    }

    #[test]
    fn test_cannot_repeat_a_state() {
        let mut record = TransactionRecord::new(request());
        record.record_items().unwrap();
        assert!(record.record_items().is_err());
        assert_eq!(record.visited_states().len(), 2);
    }

    #[test]
    fn test_complete_requires_verifying() {
        let mut record = TransactionRecord::new(request());
        record.record_items().unwrap();
        let result = record.complete(&completion(
            Outcome::Success,
            "SUCCESS",
            CompletionSource::Callback,
        ));
        assert!(matches!(result, Err(RecordError::InvalidTransition { .. })));
        assert_eq!(record.state(), TransactionState::ItemsFetched);
    }

    #[test]
    fn test_terminal_record_rejects_late_callback() {
        let mut record = verifying_record();
        record
            .complete(&completion(Outcome::Success, "SUCCESS", CompletionSource::Poll))
            .unwrap();
        let before = format!("{:?}", record);

        let late = completion(Outcome::Failed, "ERRORED", CompletionSource::Callback);
        assert!(matches!(record.complete(&late), Err(RecordError::Terminal(_))));
        assert!(matches!(
            record.abort(&TransactionError::Timeout { attempts: 1 }),
            Err(RecordError::Terminal(_))
        ));

        assert_eq!(format!("{:?}", record), before);
        assert_eq!(record.completion_source(), Some(CompletionSource::Poll));
    }

    #[test]
    fn test_abort_records_error_kind() {
        let mut record = TransactionRecord::new(request());
        record
            .abort(&TransactionError::Validation("amount not permitted".into()))
            .unwrap();
        assert_eq!(record.state(), TransactionState::Error);
        let error = record.error().unwrap();
        assert_eq!(error.kind, "ValidationError");
        assert!(error.message.contains("amount not permitted"));
    }

    #[test]
    fn test_rejected_record_is_terminal_from_created() {
        let record = TransactionRecord::rejected(
            request(),
            &TransactionError::Validation("transaction_id: duplicate".into()),
        );
        assert_eq!(
            record.visited_states(),
            vec![TransactionState::Created, TransactionState::Error]
        );
        assert_eq!(record.error().unwrap().kind, "ValidationError");
        assert!(record.finished_at().is_some());
        assert!(record.ptn().is_none());
    }

    #[test]
    fn test_failed_completion_keeps_provider_status() {
        let mut record = verifying_record();
        record
            .complete(&completion(Outcome::Failed, "ERRORED", CompletionSource::Callback))
            .unwrap();
        assert_eq!(record.state(), TransactionState::Failed);
        assert_eq!(record.provider_status(), Some("ERRORED"));
        assert!(record.error().unwrap().message.contains("ERRORED"));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("SUCCESS"), StatusClass::Terminal(Outcome::Success));
        assert_eq!(classify_status("success"), StatusClass::Terminal(Outcome::Success));
        assert_eq!(classify_status("ERRORED"), StatusClass::Terminal(Outcome::Failed));
        assert_eq!(classify_status("REVERSED"), StatusClass::Terminal(Outcome::Failed));
        assert_eq!(classify_status("PENDING"), StatusClass::Pending);
        assert_eq!(classify_status("INPROCESS"), StatusClass::Pending);
        assert_eq!(classify_status("WHATEVER"), StatusClass::Terminal(Outcome::Error));
        assert_eq!(classify_status(""), StatusClass::Terminal(Outcome::Error));
    }

    #[test]
    fn test_service_type_parsing() {
        assert_eq!("cashin".parse::<ServiceType>().unwrap(), ServiceType::Cashin);
        assert_eq!("TOPUP".parse::<ServiceType>().unwrap(), ServiceType::Topup);
        assert!("voucher".parse::<ServiceType>().is_err());
    }

    #[test]
    fn test_request_json_shape() {
        let json = serde_json::json!({
            "service_type": "product",
            "service_id": "90006",
            "amount": 10000,
            "customer_phone": "237655754334",
            "customer_email": "test@smobilpay.com",
            "customer_name": "Test Customer",
            "customer_address": "Douala",
            "service_number": "23900419411616",
            "transaction_id": "JAYPRODUCT17000000001234"
        });
        let request: TransactionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.service_type, ServiceType::Product);
        assert_eq!(request.customer.customer_name, "Test Customer");
    }
}
