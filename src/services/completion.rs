//! Single-assignment result cell shared by the callback and poll producers
//! of one transaction. The first offer wins; later offers are handed back.

use std::sync::OnceLock;
use tokio::sync::Notify;

use crate::domain::Completion;

#[derive(Debug, Default)]
pub struct CompletionCell {
    slot: OnceLock<Completion>,
    notify: Notify,
}

impl CompletionCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `completion` if nothing has been stored yet. A losing offer is
    /// returned to the caller untouched.
    pub fn offer(&self, completion: Completion) -> Result<(), Completion> {
        self.slot.set(completion)?;
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn get(&self) -> Option<&Completion> {
        self.slot.get()
    }

    pub fn is_settled(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Resolves once a completion has been stored.
    pub async fn settled(&self) -> &Completion {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(completion) = self.slot.get() {
                return completion;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompletionSource, Outcome};
    use std::sync::Arc;
    use std::time::Duration;

    fn completion(outcome: Outcome, source: CompletionSource) -> Completion {
        Completion {
            outcome,
            provider_status: format!("{:?}", outcome).to_uppercase(),
            source,
            payload: None,
        }
    }

    #[test]
    fn test_first_offer_wins() {
        let cell = CompletionCell::new();
        assert!(!cell.is_settled());

        cell.offer(completion(Outcome::Failed, CompletionSource::Callback))
            .unwrap();
        let rejected = cell
            .offer(completion(Outcome::Success, CompletionSource::Poll))
            .unwrap_err();

        assert_eq!(rejected.source, CompletionSource::Poll);
        let stored = cell.get().unwrap();
        assert_eq!(stored.outcome, Outcome::Failed);
        assert_eq!(stored.source, CompletionSource::Callback);
    }

    #[tokio::test]
    async fn test_settled_returns_immediately_when_already_set() {
        let cell = CompletionCell::new();
        cell.offer(completion(Outcome::Success, CompletionSource::Poll))
            .unwrap();
        let settled = tokio::time::timeout(Duration::from_millis(50), cell.settled())
            .await
            .unwrap();
        assert_eq!(settled.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_settled_wakes_on_offer_from_other_task() {
        let cell = Arc::new(CompletionCell::new());
        let producer = cell.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = producer.offer(completion(Outcome::Success, CompletionSource::Callback));
        });

        let settled = tokio::time::timeout(Duration::from_secs(2), cell.settled())
            .await
            .unwrap();
        assert_eq!(settled.source, CompletionSource::Callback);
    }

    #[tokio::test]
    async fn test_concurrent_offers_settle_exactly_once() {
        let cell = Arc::new(CompletionCell::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let cell = cell.clone();
            handles.push(tokio::spawn(async move {
                let source = if i % 2 == 0 {
                    CompletionSource::Callback
                } else {
                    CompletionSource::Poll
                };
                cell.offer(completion(Outcome::Success, source)).is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
