pub mod transaction;

pub use transaction::{
    classify_status, Completion, CompletionSource, CustomerProfile, Outcome, RecordedError,
    ServiceType, StateChange, StatusClass, TransactionRecord, TransactionRequest,
    TransactionState,
};
