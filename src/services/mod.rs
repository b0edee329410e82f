pub mod batch;
pub mod callback_listener;
pub mod completion;
pub mod retry;
pub mod state_machine;

pub use batch::{BatchOrchestrator, BatchSummary};
pub use callback_listener::{CallbackEvent, CallbackListener, EventStore};
pub use completion::CompletionCell;
pub use retry::RetryPolicy;
pub use state_machine::TransactionMachine;
