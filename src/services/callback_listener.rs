//! Short-lived local HTTP endpoint receiving S3P status notifications.
//!
//! The listener never touches a transaction record. It only parks
//! [`CallbackEvent`] values in per-transaction mailboxes for the owning state
//! machine to pick up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WebhookSettings;
use crate::error::{AppError, ListenerError};

/// Inbound notification, already parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackEvent {
    pub transaction_id: String,
    pub status: String,
    pub ptn: Option<String>,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl CallbackEvent {
    /// Accepts `trid`, `transaction_id` or `transactionId` for the id.
    pub fn from_payload(payload: Value) -> Result<Self, AppError> {
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| payload.get(*name).and_then(Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if !payload.is_object() {
            return Err(AppError::BadRequest("payload must be a JSON object".to_string()));
        }
        let transaction_id = field(&["trid", "transaction_id", "transactionId"])
            .ok_or_else(|| AppError::BadRequest("missing transaction id".to_string()))?;
        let status = field(&["status"])
            .ok_or_else(|| AppError::BadRequest("missing status".to_string()))?;
        let ptn = field(&["ptn"]);

        Ok(Self {
            transaction_id,
            status,
            ptn,
            payload,
            received_at: Utc::now(),
        })
    }
}

/// What happened to an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Stored,
    Discarded,
}

/// Acknowledgement returned to the caller of the callback endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub received: bool,
    pub trid: String,
    pub delivery: Delivery,
}

/// Per-transaction mailboxes. Each mailbox keeps the latest event only.
#[derive(Debug, Default)]
pub struct EventStore {
    mailboxes: Mutex<HashMap<String, watch::Sender<Option<CallbackEvent>>>>,
    discarded: AtomicU64,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mailboxes(&self) -> std::sync::MutexGuard<'_, HashMap<String, watch::Sender<Option<CallbackEvent>>>> {
        // a poisoned map is still structurally valid
        self.mailboxes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Opens a mailbox so events arriving before anyone waits are kept.
    pub fn expect(&self, transaction_id: &str) {
        self.mailboxes()
            .entry(transaction_id.to_string())
            .or_insert_with(|| watch::channel(None).0);
    }

    /// Stores the event for a known transaction (last write wins) or drops
    /// it when no mailbox exists.
    pub fn record(&self, event: CallbackEvent) -> Delivery {
        let mailboxes = self.mailboxes();
        match mailboxes.get(&event.transaction_id) {
            Some(mailbox) => {
                debug!(trid = %event.transaction_id, status = %event.status, "callback stored");
                mailbox.send_replace(Some(event));
                Delivery::Stored
            }
            None => {
                warn!(trid = %event.transaction_id, "callback for unknown or finished transaction discarded");
                self.discarded.fetch_add(1, Ordering::Relaxed);
                Delivery::Discarded
            }
        }
    }

    /// Parses one inbound callback body and routes it to its mailbox.
    pub fn on_request(&self, body: &[u8]) -> Result<Receipt, AppError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("invalid JSON: {}", e)))?;
        let event = CallbackEvent::from_payload(payload)?;
        let trid = event.transaction_id.clone();

        Ok(Receipt {
            received: true,
            trid,
            delivery: self.record(event),
        })
    }

    /// Waits for an event and consumes it. `None` on timeout or when the
    /// mailbox is closed.
    pub async fn wait(&self, transaction_id: &str, timeout: Duration) -> Option<CallbackEvent> {
        let mut receiver = {
            let mut mailboxes = self.mailboxes();
            mailboxes
                .entry(transaction_id.to_string())
                .or_insert_with(|| watch::channel(None).0)
                .subscribe()
        };

        let ready = matches!(
            tokio::time::timeout(timeout, receiver.wait_for(Option::is_some)).await,
            Ok(Ok(_))
        );
        if !ready {
            return None;
        }

        self.mailboxes()
            .get(transaction_id)
            .and_then(|mailbox| mailbox.send_replace(None))
    }

    /// Closes one mailbox. Later events for the id are discarded.
    pub fn release(&self, transaction_id: &str) {
        self.mailboxes().remove(transaction_id);
    }

    /// Drops every mailbox and unclaimed event, waking all waiters.
    pub fn clear(&self) {
        self.mailboxes().clear();
    }

    pub fn open_mailboxes(&self) -> usize {
        self.mailboxes().len()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

/// Running callback endpoint. Cheap to share behind an `Arc`.
pub struct CallbackListener {
    store: Arc<EventStore>,
    port: u16,
    callback_url: String,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackListener {
    /// Binds the preferred port or one of the following `bind_attempts - 1`
    /// ports and starts serving on a background task.
    pub async fn start(settings: &WebhookSettings) -> Result<Self, ListenerError> {
        let attempts = settings.bind_attempts.max(1);
        let mut bound = None;

        for offset in 0..attempts {
            let Some(port) = settings.port.checked_add(offset) else {
                break;
            };
            let addr = SocketAddr::from((settings.bind_addr, port));
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    bound = Some(listener);
                    break;
                }
                Err(e) => debug!(port, error = %e, "callback port unavailable"),
            }
        }

        let listener = bound.ok_or(ListenerError::Bind {
            port: settings.port,
            attempts,
        })?;
        let port = listener.local_addr()?.port();
        let callback_url = settings
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}/callback", Ipv4Addr::LOCALHOST, port));

        let store = Arc::new(EventStore::new());
        let app = crate::create_app(store.clone(), settings.log_bodies);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "callback listener stopped with error");
            }
        });

        info!(port, url = %callback_url, "callback listener started");

        Ok(Self {
            store,
            port,
            callback_url,
            shutdown: Mutex::new(Some(shutdown_tx)),
            server: Mutex::new(Some(server)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// URL handed to S3P in the collect call.
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn expect(&self, transaction_id: &str) {
        self.store.expect(transaction_id);
    }

    pub async fn await_event(&self, transaction_id: &str, timeout: Duration) -> Option<CallbackEvent> {
        self.store.wait(transaction_id, timeout).await
    }

    pub fn on_request(&self, body: &[u8]) -> Result<Receipt, AppError> {
        self.store.on_request(body)
    }

    pub fn release(&self, transaction_id: &str) {
        self.store.release(transaction_id);
    }

    /// Releases the port and discards unclaimed events. Safe to call twice.
    pub async fn stop(&self) {
        let shutdown = self.shutdown.lock().unwrap_or_else(|e| e.into_inner()).take();
        let server = self.server.lock().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        self.store.clear();

        if let Some(handle) = server {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!(port = self.port, "callback listener did not shut down in time");
            } else {
                info!(port = self.port, "callback listener stopped");
            }
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(handle) = self.server.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}
