//! In-memory mock implementation of EventPublisher for testing without a real event bus.

use super::types::{DomainEvent, EventPublisher, PublishError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

/// Recording publisher with failure injection.
///
/// Every call is recorded as an attempt (successful or not), so tests can check
/// both what reached the bus and what was tried. Failures are injected by
/// 1-based attempt number or by todo id.
#[derive(Default)]
pub struct MockPublisher {
    attempts: Mutex<Vec<DomainEvent>>,
    published: Mutex<Vec<DomainEvent>>,
    fail_attempts: Mutex<HashSet<usize>>,
    fail_ids: Mutex<HashSet<String>>,
}

impl MockPublisher {
    /// Create a publisher that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th publish attempt (1-based, counted across the mock's lifetime).
    pub fn fail_on_attempt(self, n: usize) -> Self {
        lock(&self.fail_attempts).insert(n);
        self
    }

    /// Fail every publish for the given todo id until [`MockPublisher::heal`] is called.
    pub fn fail_for_id(self, id: impl Into<String>) -> Self {
        lock(&self.fail_ids).insert(id.into());
        self
    }

    /// Clear all injected failures.
    pub fn heal(&self) {
        lock(&self.fail_attempts).clear();
        lock(&self.fail_ids).clear();
    }

    /// Every event passed to `publish`, in call order.
    pub fn attempts(&self) -> Vec<DomainEvent> {
        lock(&self.attempts).clone()
    }

    /// Events that were accepted, in call order.
    pub fn published(&self) -> Vec<DomainEvent> {
        lock(&self.published).clone()
    }

    /// Forget recorded attempts and publications, keeping injected failures.
    pub fn reset(&self) {
        lock(&self.attempts).clear();
        lock(&self.published).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A poisoned lock only means another test thread panicked mid-record
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl EventPublisher for MockPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let attempt = {
            let mut attempts = lock(&self.attempts);
            attempts.push(event.clone());
            attempts.len()
        };

        if lock(&self.fail_attempts).contains(&attempt) {
            return Err(PublishError::Transport(format!(
                "injected failure on attempt {}",
                attempt
            )));
        }
        if lock(&self.fail_ids).contains(&event.payload.id) {
            return Err(PublishError::Rejected(format!(
                "injected failure for {}",
                event.payload.id
            )));
        }

        lock(&self.published).push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TodoItem;

    fn event(id: &str) -> DomainEvent {
        DomainEvent::created(TodoItem::new(id, "x", 1))
    }

    #[tokio::test]
    async fn test_records_attempts_and_publications() {
        let mock = MockPublisher::new().fail_on_attempt(2);
        assert!(mock.publish(&event("a")).await.is_ok());
        assert!(mock.publish(&event("b")).await.is_err());
        assert!(mock.publish(&event("c")).await.is_ok());

        assert_eq!(mock.attempts().len(), 3);
        let ids: Vec<_> = mock.published().into_iter().map(|e| e.payload.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_fail_for_id_until_healed() {
        let mock = MockPublisher::new().fail_for_id("a");
        assert!(matches!(
            mock.publish(&event("a")).await,
            Err(PublishError::Rejected(_))
        ));
        mock.heal();
        assert!(mock.publish(&event("a")).await.is_ok());
    }
}
