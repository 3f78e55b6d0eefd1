//! NATS-based event publisher
//!
//! Publishes derived events to `{prefix}.{discriminator}` subjects so consumers can
//! subscribe by event-type pattern (e.g. `todo.events.todoCompleted` or `todo.events.>`).
//!
//! Unlike a fire-and-forget emitter, every publish is awaited: in core mode the
//! connection is flushed, in JetStream mode the stream acknowledgement is awaited.
//! One attempt per call, bounded by the configured timeout.

use super::types::{DomainEvent, EventPublisher, EventType, PublishError};
use crate::records::TodoItem;
use async_nats::HeaderMap;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the event-type discriminator
pub const HEADER_EVENT_TYPE: &str = "Event-Type";
/// Header carrying the source tag
pub const HEADER_EVENT_SOURCE: &str = "Event-Source";
/// JetStream deduplication header, set to the event's idempotency key
pub const HEADER_MSG_ID: &str = "Nats-Msg-Id";

/// Build the subject for an event type (e.g. "todo.events.todoCreated").
pub fn event_subject(prefix: &str, event_type: EventType) -> String {
    format!("{}.{}", prefix, event_type)
}

/// Build the headers attached to a published event.
pub fn event_headers(event: &DomainEvent, source: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_EVENT_TYPE, event.event_type.as_str());
    headers.insert(HEADER_EVENT_SOURCE, source);
    headers.insert(HEADER_MSG_ID, event.idempotency_key());
    headers
}

/// NATS publisher for derived domain events.
///
/// The client is injected so one connection can be shared across publishers and
/// replaced in tests.
#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
    jetstream: Option<async_nats::jetstream::Context>,
    subject_prefix: String,
    source: String,
    timeout: Duration,
}

impl NatsPublisher {
    /// Create a core-NATS publisher. Events go to `{prefix}.{discriminator}`.
    pub fn new(
        client: async_nats::Client,
        subject_prefix: impl Into<String>,
        source: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            jetstream: None,
            subject_prefix: subject_prefix.into(),
            source: source.into(),
            timeout,
        }
    }

    /// Publish through JetStream and wait for the stream acknowledgement.
    ///
    /// A stream must capture the `{prefix}.>` subjects, otherwise every publish is rejected.
    pub fn with_jetstream(mut self) -> Self {
        self.jetstream = Some(async_nats::jetstream::new(self.client.clone()));
        self
    }

    /// Get a reference to the underlying NATS client.
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the subject prefix (e.g. "todo.events").
    pub fn subject_prefix(&self) -> &str {
        &self.subject_prefix
    }

    /// Get the source tag attached to every event.
    pub fn source(&self) -> &str {
        &self.source
    }

    async fn send(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        match &self.jetstream {
            Some(jetstream) => {
                let ack = jetstream
                    .publish_with_headers(subject, headers, payload.into())
                    .await
                    .map_err(|e| PublishError::Transport(e.to_string()))?;
                let ack = ack
                    .await
                    .map_err(|e| PublishError::Rejected(e.to_string()))?;
                // Replays land here, and so does a second transition sharing the
                // millisecond key (see `DomainEvent::idempotency_key`)
                if ack.duplicate {
                    debug!(
                        stream = %ack.stream,
                        sequence = ack.sequence,
                        "JetStream reported a duplicate publish"
                    );
                }
                Ok(())
            }
            None => {
                self.client
                    .publish_with_headers(subject, headers, payload.into())
                    .await
                    .map_err(|e| PublishError::Transport(e.to_string()))?;
                self.client
                    .flush()
                    .await
                    .map_err(|e| PublishError::Transport(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let subject = event_subject(&self.subject_prefix, event.event_type);
        let payload = event.body()?;
        let headers = event_headers(event, &self.source);

        match tokio::time::timeout(self.timeout, self.send(subject.clone(), headers, payload)).await
        {
            Ok(Ok(())) => {
                debug!(
                    subject = %subject,
                    event_type = %event.event_type,
                    todo_id = %event.payload.id,
                    "Event published to NATS"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(
                    subject = %subject,
                    event_type = %event.event_type,
                    todo_id = %event.payload.id,
                    "Failed to publish event to NATS: {}",
                    e
                );
                Err(e)
            }
            Err(_) => {
                warn!(
                    subject = %subject,
                    event_type = %event.event_type,
                    todo_id = %event.payload.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Publish to NATS timed out"
                );
                Err(PublishError::Timeout(self.timeout))
            }
        }
    }
}

/// An event received from the bus, as a consumer sees it
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub subject: String,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub idempotency_key: Option<String>,
    pub payload: TodoItem,
}

impl ReceivedEvent {
    /// Decode a bus message: headers plus the JSON snapshot body.
    pub fn from_message(message: &async_nats::Message) -> anyhow::Result<Self> {
        let header = |name: &str| {
            message
                .headers
                .as_ref()
                .and_then(|h| h.get(name))
                .map(|v| v.to_string())
        };
        let payload: TodoItem = serde_json::from_slice(&message.payload).map_err(|e| {
            anyhow::anyhow!("Invalid event payload on {}: {}", message.subject, e)
        })?;
        Ok(Self {
            subject: message.subject.to_string(),
            event_type: header(HEADER_EVENT_TYPE),
            source: header(HEADER_EVENT_SOURCE),
            idempotency_key: header(HEADER_MSG_ID),
            payload,
        })
    }
}

/// Subscribe to derived events, either all of them or a single discriminator.
pub async fn subscribe_events(
    client: &async_nats::Client,
    subject_prefix: &str,
    event_type: Option<EventType>,
) -> anyhow::Result<async_nats::Subscriber> {
    let subject = match event_type {
        Some(t) => event_subject(subject_prefix, t),
        None => format!("{}.>", subject_prefix),
    };
    let subscriber = client.subscribe(subject.clone()).await.map_err(|e| {
        anyhow::anyhow!("Failed to subscribe to NATS events {}: {}", subject, e)
    })?;
    debug!(subject = %subject, "Subscribed to NATS events");
    Ok(subscriber)
}

/// Connect to a NATS server.
///
/// Returns a connected `async_nats::Client` ready for publishing and subscribing.
pub async fn connect_nats(url: &str) -> anyhow::Result<async_nats::Client> {
    let client = async_nats::connect(url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to NATS at {}: {}", url, e))?;
    tracing::info!("Connected to NATS at {}", url);
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed() -> DomainEvent {
        DomainEvent::completed(
            TodoItem::new("a", "buy milk", 100)
                .with_completed(true)
                .with_updated_at(200),
        )
    }

    // ========================================================================
    // Subject construction
    // ========================================================================

    #[test]
    fn test_event_subject() {
        assert_eq!(
            event_subject("todo.events", EventType::Created),
            "todo.events.todoCreated"
        );
        assert_eq!(
            event_subject("po.dev", EventType::Deleted),
            "po.dev.todoDeleted"
        );
    }

    // ========================================================================
    // Headers
    // ========================================================================

    #[test]
    fn test_event_headers() {
        let headers = event_headers(&completed(), "TodoService");
        let get = |name: &str| headers.get(name).map(|v| v.to_string());
        assert_eq!(get(HEADER_EVENT_TYPE).as_deref(), Some("todoCompleted"));
        assert_eq!(get(HEADER_EVENT_SOURCE).as_deref(), Some("TodoService"));
        assert_eq!(get(HEADER_MSG_ID).as_deref(), Some("todoCompleted:a:200"));
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    #[tokio::test]
    async fn test_publish_fails_when_server_unreachable() {
        // Port 1: nothing listening; the client keeps reconnecting in the background
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .connect("nats://127.0.0.1:1")
            .await
            .unwrap();
        let publisher = NatsPublisher::new(
            client,
            "todo.events",
            "TodoService",
            Duration::from_millis(50),
        );

        // Either the flush never completes or the client refuses before connecting
        let err = publisher.publish(&completed()).await.unwrap_err();
        assert!(matches!(
            err,
            PublishError::Timeout(_) | PublishError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_connect_nats_fails_fast_without_server() {
        let result = connect_nats("nats://127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
