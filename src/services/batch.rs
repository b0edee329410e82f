use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use tokio::time::sleep;
use tracing::{info, warn};

use super::state_machine::TransactionMachine;
use crate::config::BatchSettings;
use crate::domain::{TransactionRecord, TransactionRequest, TransactionState};
use crate::error::TransactionError;

/// Terminal records of one batch, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub records: Vec<TransactionRecord>,
    /// Set when the batch was cut short; `records` then holds only the
    /// transactions that finished.
    pub interrupted: bool,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(TransactionState::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(TransactionState::Failed)
    }

    pub fn errored(&self) -> usize {
        self.count(TransactionState::Error)
    }

    pub fn all_succeeded(&self) -> bool {
        !self.interrupted && self.succeeded() == self.total()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.records
            .iter()
            .filter(|r| r.state() != TransactionState::Success)
    }

    fn count(&self, state: TransactionState) -> usize {
        self.records.iter().filter(|r| r.state() == state).count()
    }

    pub fn log(&self) {
        info!(
            total = self.total(),
            success = self.succeeded(),
            failed = self.failed(),
            error = self.errored(),
            interrupted = self.interrupted,
            "batch finished"
        );
        for record in self.failures() {
            warn!(
                trid = record.transaction_id(),
                service = %record.request().service_type,
                state = %record.state(),
                error = record.error().map(|e| e.message.as_str()).unwrap_or("-"),
                "transaction did not succeed"
            );
        }
    }
}

/// Runs requests through one shared [`TransactionMachine`].
pub struct BatchOrchestrator {
    machine: TransactionMachine,
    settings: BatchSettings,
}

impl BatchOrchestrator {
    pub fn new(machine: TransactionMachine, settings: BatchSettings) -> Self {
        Self { machine, settings }
    }

    pub async fn run(&self, requests: Vec<TransactionRequest>) -> BatchSummary {
        self.run_until(requests, std::future::pending::<()>()).await
    }

    /// Like [`run`](Self::run) but stops early once `shutdown` resolves.
    /// Every transaction that finished before that is kept, whatever its
    /// position; in-flight ones are dropped.
    pub async fn run_until<F>(&self, requests: Vec<TransactionRequest>, shutdown: F) -> BatchSummary
    where
        F: Future<Output = ()>,
    {
        let total = requests.len();
        let concurrency = self.settings.concurrency.max(1);
        info!(total, concurrency, webhook = self.machine.webhook_enabled(), "starting batch");

        let jobs = reject_duplicates(requests);
        let mut results = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, job)| async move {
                if concurrency == 1 && index > 0 && !self.settings.delay.is_zero() {
                    sleep(self.settings.delay).await;
                }
                let record = match job {
                    Ok(request) => self.machine.run(request).await,
                    Err(rejected) => rejected,
                };
                info!(
                    progress = format!("{}/{}", index + 1, total),
                    trid = record.transaction_id(),
                    state = %record.state(),
                    "transaction done"
                );
                (index, record)
            })
            .buffer_unordered(concurrency);

        let mut finished = Vec::with_capacity(total);
        let mut interrupted = false;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                next = results.next() => match next {
                    Some(done) => finished.push(done),
                    None => break,
                },
                _ = &mut shutdown => {
                    warn!(finished = finished.len(), total, "batch interrupted");
                    interrupted = true;
                    break;
                }
            }
        }

        finished.sort_by_key(|(index, _)| *index);
        BatchSummary {
            records: finished.into_iter().map(|(_, record)| record).collect(),
            interrupted,
        }
    }
}

/// Second and later uses of an id are rejected up front so that two
/// machines never share a transaction id.
fn reject_duplicates(
    requests: Vec<TransactionRequest>,
) -> Vec<Result<TransactionRequest, TransactionRecord>> {
    let mut seen = HashSet::new();
    requests
        .into_iter()
        .map(|request| {
            if seen.insert(request.transaction_id.clone()) {
                return Ok(request);
            }
            let error = TransactionError::Validation(format!(
                "transaction_id: duplicate id '{}' in batch",
                request.transaction_id
            ));
            warn!(trid = %request.transaction_id, "duplicate transaction id rejected");
            Err(TransactionRecord::rejected(request, &error))
        })
        .collect()
}
