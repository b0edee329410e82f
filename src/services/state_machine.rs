//! Per-transaction lifecycle driver.
//!
//! One machine instance can drive many transactions, but each call to
//! [`TransactionMachine::run`] owns its [`TransactionRecord`] exclusively.
//! Verification is raced between the callback listener (when enabled) and
//! the verification poll; both offer into a [`CompletionCell`] and the first
//! terminal signal is the only one applied.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, info_span, warn, Instrument};

use super::callback_listener::CallbackListener;
use super::completion::CompletionCell;
use crate::config::EngineSettings;
use crate::domain::{
    classify_status, Completion, CompletionSource, ServiceType, StatusClass, TransactionRecord,
    TransactionRequest,
};
use crate::error::{TransactionError, TransportError};
use crate::s3p::models::{CollectRequest, PaymentStatus};
use crate::s3p::S3pApi;
use crate::validation::{select_payment_item, validate_request};

#[derive(Clone)]
pub struct TransactionMachine {
    api: Arc<dyn S3pApi>,
    settings: EngineSettings,
    listener: Option<Arc<CallbackListener>>,
}

impl TransactionMachine {
    pub fn new(api: Arc<dyn S3pApi>, settings: EngineSettings) -> Self {
        Self {
            api,
            settings,
            listener: None,
        }
    }

    /// Enables webhook mode: collect calls carry the listener's URL and
    /// verification waits for a callback before falling back to polling.
    pub fn with_listener(mut self, listener: Arc<CallbackListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn webhook_enabled(&self) -> bool {
        self.listener.is_some()
    }

    /// Drives one request to a terminal state. Never fails: every error is
    /// recorded on the returned record.
    pub async fn run(&self, request: TransactionRequest) -> TransactionRecord {
        let span = info_span!(
            "transaction",
            trid = %request.transaction_id,
            service = %request.service_type
        );
        self.run_recorded(request).instrument(span).await
    }

    async fn run_recorded(&self, request: TransactionRequest) -> TransactionRecord {
        let trid = request.transaction_id.clone();
        let mut record = TransactionRecord::new(request);
        info!(
            service_id = %record.request().service_id,
            amount = record.request().amount,
            "transaction started"
        );

        if let Err(e) = self.drive(&mut record).await {
            warn!(kind = e.kind(), error = %e, state = %record.state(), "transaction aborted");
            if let Err(record_err) = record.abort(&e) {
                warn!(error = %record_err, "could not record failure");
            }
        }

        if let Some(listener) = &self.listener {
            listener.release(&trid);
        }

        info!(
            state = %record.state(),
            ptn = record.ptn().unwrap_or("-"),
            elapsed = ?record.execution_time(),
            "transaction finished"
        );
        record
    }

    async fn drive(&self, record: &mut TransactionRecord) -> Result<(), TransactionError> {
        let request = record.request().clone();
        validate_request(&request, &self.settings.trid_rules)?;

        let api = self.api.as_ref();

        let items = api
            .payment_items(request.service_type, &request.service_id)
            .await
            .map_err(|e| step_error(e, TransactionError::Items))?;
        if items.is_empty() {
            return Err(TransactionError::Items(format!(
                "no payment items for service {}",
                request.service_id
            )));
        }
        debug!(count = items.len(), "payment items fetched");
        record.record_items()?;

        let item = select_payment_item(&items, request.amount)?;
        let pay_item_id = item.pay_item_id.as_str();
        let amount = request.amount;
        let quote = self
            .settings
            .quote_retry
            .run(
                move |attempt| {
                    debug!(attempt, pay_item_id, "requesting quote");
                    api.quote(pay_item_id, amount)
                },
                |e: &TransportError| !matches!(e, TransportError::Decode(_)),
            )
            .await
            .map_err(|e| step_error(e, TransactionError::Quote))?;
        ensure_quote_fresh(quote.expires_at.as_deref(), Utc::now())?;
        debug!(quote_id = %quote.quote_id, expires_at = ?quote.expires_at, "quote received");
        record.record_quote(item.pay_item_id.clone(), quote.quote_id.clone())?;

        let callback_url = self.listener.as_ref().map(|listener| {
            listener.expect(&request.transaction_id);
            listener.callback_url().to_string()
        });
        let body = CollectRequest {
            quote_id: quote.quote_id,
            customer_phonenumber: request.customer.customer_phone.clone(),
            customer_emailaddress: request.customer.customer_email.clone(),
            customer_name: request.customer.customer_name.clone(),
            customer_address: request.customer.customer_address.clone(),
            service_number: request.service_number.clone(),
            trid: request.transaction_id.clone(),
            callback_url,
        };
        let body = &body;
        let payment = self
            .settings
            .collect_retry
            .run(
                move |attempt| {
                    debug!(attempt, "collecting payment");
                    api.collect(body)
                },
                TransportError::is_transient,
            )
            .await
            .map_err(|e| step_error(e, TransactionError::Collect))?;

        let ptn = payment
            .ptn
            .filter(|ptn| !ptn.trim().is_empty())
            .ok_or_else(|| TransactionError::Collect("collect response carried no PTN".to_string()))?;
        info!(ptn = %ptn, status = ?payment.status, "payment collected");
        record.record_collect(ptn.clone())?;

        record.begin_verification()?;
        let completion = self.verify(&request, &ptn).await?;
        info!(
            source = %completion.source,
            status = %completion.provider_status,
            "verification settled"
        );
        record.complete(&completion)?;
        Ok(())
    }

    /// Races the callback wait against polling. Whatever settles the cell
    /// first decides the outcome; the other producer is dropped.
    async fn verify(
        &self,
        request: &TransactionRequest,
        ptn: &str,
    ) -> Result<Completion, TransactionError> {
        let cell = CompletionCell::new();
        let trid = request.transaction_id.as_str();

        let first_poll_delay = if self.listener.is_some() {
            self.settings.callback_wait
        } else {
            self.initial_poll_delay(request.service_type)
        };

        let callback = async {
            match self.listener.as_deref() {
                Some(listener) => self.await_callback(listener, trid, &cell).await,
                None => std::future::pending::<()>().await,
            }
        };
        let poll = self.poll_status(ptn, first_poll_delay, &cell);

        let poll_result = tokio::select! {
            _ = cell.settled() => None,
            _ = callback => None,
            result = poll => Some(result),
        };

        if let Some(completion) = cell.get() {
            return Ok(completion.clone());
        }
        match poll_result {
            Some(Err(e)) => Err(e),
            _ => Err(TransactionError::Timeout {
                attempts: self.settings.poll.max_attempts,
            }),
        }
    }

    fn initial_poll_delay(&self, service_type: ServiceType) -> Duration {
        match service_type {
            ServiceType::Cashout => self.settings.cashout_initial_poll_delay,
            _ => self.settings.initial_poll_delay,
        }
    }

    async fn await_callback(&self, listener: &CallbackListener, trid: &str, cell: &CompletionCell) {
        loop {
            let Some(event) = listener.await_event(trid, self.settings.callback_wait).await else {
                continue;
            };
            match classify_status(&event.status) {
                StatusClass::Pending => {
                    debug!(status = %event.status, "interim callback, still waiting");
                }
                StatusClass::Terminal(outcome) => {
                    settle(
                        cell,
                        Completion {
                            outcome,
                            provider_status: event.status.to_ascii_uppercase(),
                            source: CompletionSource::Callback,
                            payload: Some(event.payload),
                        },
                    );
                    return;
                }
            }
        }
    }

    async fn poll_status(
        &self,
        ptn: &str,
        first_delay: Duration,
        cell: &CompletionCell,
    ) -> Result<(), TransactionError> {
        sleep(first_delay).await;
        if self.listener.is_some() && !cell.is_settled() {
            info!(waited = ?first_delay, "no callback yet, falling back to polling");
        }

        let policy = self.settings.poll;
        for attempt in 1..=policy.max_attempts {
            if cell.is_settled() {
                return Ok(());
            }

            match self.api.verify(ptn).await {
                Ok(statuses) => match pick_status(statuses, ptn) {
                    Some(status) => {
                        let raw = status.status.clone().unwrap_or_default();
                        match classify_status(&raw) {
                            StatusClass::Pending => debug!(attempt, status = %raw, "payment pending"),
                            StatusClass::Terminal(outcome) => {
                                settle(
                                    cell,
                                    Completion {
                                        outcome,
                                        provider_status: raw.to_ascii_uppercase(),
                                        source: CompletionSource::Poll,
                                        payload: serde_json::to_value(&status).ok(),
                                    },
                                );
                                return Ok(());
                            }
                        }
                    }
                    None => debug!(attempt, "payment not visible yet"),
                },
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "verification request failed");
                }
                Err(e) => return Err(e.into()),
            }

            if attempt < policy.max_attempts {
                sleep(policy.delay_after(attempt)).await;
            }
        }

        Err(TransactionError::Timeout {
            attempts: policy.max_attempts,
        })
    }
}

fn settle(cell: &CompletionCell, completion: Completion) {
    if let Err(late) = cell.offer(completion) {
        debug!(
            source = %late.source,
            status = %late.provider_status,
            "transaction already settled, ignoring signal"
        );
    }
}

/// `verifytx` may return several payments; prefer the one with our PTN.
fn pick_status(statuses: Vec<PaymentStatus>, ptn: &str) -> Option<PaymentStatus> {
    let position = statuses
        .iter()
        .position(|s| s.ptn.as_deref() == Some(ptn))
        .unwrap_or(0);
    statuses.into_iter().nth(position)
}

/// Provider rejections belong to the step that made the call; network
/// failures stay transport errors.
fn step_error(e: TransportError, wrap: fn(String) -> TransactionError) -> TransactionError {
    match e {
        TransportError::Provider { .. } | TransportError::Decode(_) => wrap(e.to_string()),
        other => TransactionError::Transport(other),
    }
}

fn ensure_quote_fresh(expires_at: Option<&str>, now: DateTime<Utc>) -> Result<(), TransactionError> {
    let Some(raw) = expires_at else {
        return Ok(());
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(expiry) if expiry < now => Err(TransactionError::Quote(format!(
            "quote expired at {}",
            raw
        ))),
        Ok(_) => Ok(()),
        Err(_) => {
            debug!(expires_at = raw, "unparseable quote expiry ignored");
            Ok(())
        }
    }
}
