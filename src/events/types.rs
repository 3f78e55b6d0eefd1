//! Domain event types and the publisher contract

use crate::records::TodoItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default logical origin tag attached to every published event
pub const DEFAULT_EVENT_SOURCE: &str = "TodoService";

/// The kind of domain event derived from a mutation.
///
/// Serialized with the literal discriminators consumers subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "todoCreated")]
    Created,
    #[serde(rename = "todoCompleted")]
    Completed,
    #[serde(rename = "todoDeleted")]
    Deleted,
}

impl EventType {
    /// All discriminators, in declaration order
    pub const ALL: [EventType; 3] = [EventType::Created, EventType::Completed, EventType::Deleted];

    /// Discriminator string carried on the bus
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "todoCreated",
            EventType::Completed => "todoCompleted",
            EventType::Deleted => "todoDeleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type `{}`", s))
    }
}

/// A domain event derived from one mutation record.
///
/// Constructed per record, published once, then discarded. Events carry no
/// identity of their own; see [`DomainEvent::idempotency_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: EventType,
    /// `after` for Created/Completed, `before` for Deleted
    pub payload: TodoItem,
}

impl DomainEvent {
    pub fn created(after: TodoItem) -> Self {
        Self {
            event_type: EventType::Created,
            payload: after,
        }
    }

    pub fn completed(after: TodoItem) -> Self {
        Self {
            event_type: EventType::Completed,
            payload: after,
        }
    }

    pub fn deleted(before: TodoItem) -> Self {
        Self {
            event_type: EventType::Deleted,
            payload: before,
        }
    }

    /// Key that is identical every time the same transition is re-derived.
    ///
    /// Redelivered batches re-publish events; consumers with side effects dedupe on this.
    ///
    /// Resolution is `updatedAt`, i.e. one millisecond. Two distinct transitions of the
    /// same kind for the same item within one millisecond (complete, uncomplete, complete)
    /// share a key, and a deduplicating bus such as JetStream keeps only the first.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.event_type, self.payload.id, self.payload.updated_at
        )
    }

    /// JSON body sent on the bus: the snapshot itself
    pub fn body(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(&self.payload).map_err(|e| PublishError::Serialization(e.to_string()))
    }
}

/// An event as seen by in-process subscribers: the domain event plus its source tag.
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    pub event_type: EventType,
    pub source: String,
    pub payload: TodoItem,
}

/// Failure of a single publish attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("failed to serialize event payload: {0}")]
    Serialization(String),

    #[error("event bus transport failure: {0}")]
    Transport(String),

    #[error("event bus rejected the event: {0}")]
    Rejected(String),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers one domain event to the event bus.
///
/// Implementations make exactly one attempt per call and never retry internally;
/// retry policy belongs to the batch level. An event is never dropped silently:
/// anything other than a confirmed hand-off is an error.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}
