//! In-process event bus for embedding the pipeline and for dry runs

use super::types::{BusMessage, DomainEvent, EventPublisher, PublishError, DEFAULT_EVENT_SOURCE};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Event bus that distributes derived events via `tokio::sync::broadcast`.
///
/// Unlike a fire-and-forget broadcast, publishing with no subscriber attached is
/// reported as a rejection so the event is not lost without a trace.
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
    source: String,
}

impl LocalBus {
    /// Create a new LocalBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            source: DEFAULT_EVENT_SOURCE.to_string(),
        }
    }

    /// Override the source tag attached to every message
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Subscribe to receive events (downstream consumers)
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventPublisher for LocalBus {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let message = BusMessage {
            event_type: event.event_type,
            source: self.source.clone(),
            payload: event.payload.clone(),
        };
        match self.sender.send(message) {
            Ok(n) => {
                debug!(
                    event_type = %event.event_type,
                    todo_id = %event.payload.id,
                    subscribers = n,
                    "Event delivered to local bus"
                );
                Ok(())
            }
            Err(_) => Err(PublishError::Rejected(
                "no subscriber attached to the local bus".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::records::TodoItem;

    fn created() -> DomainEvent {
        DomainEvent::created(TodoItem::new("a", "buy milk", 100))
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_rejected() {
        let bus = LocalBus::default();
        let err = bus.publish(&created()).await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected(_)));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_with_subscriber() {
        let bus = LocalBus::default();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(&created()).await.unwrap();

        let message = rx.try_recv().unwrap();
        assert_eq!(message.event_type, EventType::Created);
        assert_eq!(message.source, DEFAULT_EVENT_SOURCE);
        assert_eq!(message.payload.id, "a");
    }

    #[tokio::test]
    async fn test_multi_subscribers() {
        let bus = LocalBus::default().with_source("Replica");
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(&DomainEvent::deleted(TodoItem::new("b", "x", 1)))
            .await
            .unwrap();

        let e1 = rx1.try_recv().unwrap();
        let e2 = rx2.try_recv().unwrap();
        assert_eq!(e1, e2);
        assert_eq!(e1.event_type, EventType::Deleted);
        assert_eq!(e1.source, "Replica");
    }

    #[tokio::test]
    async fn test_clone_shares_channel() {
        let bus = LocalBus::default();
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(&created()).await.unwrap();

        assert_eq!(rx.try_recv().unwrap().payload.id, "a");
    }
}
