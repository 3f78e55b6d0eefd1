//! Domain events and their delivery to the event bus
//!
//! This module provides:
//! - `DomainEvent`: the typed event derived from one mutation record
//! - `EventPublisher`: the one-attempt publish contract the pipeline calls into
//! - `NatsPublisher`: NATS / JetStream transport for inter-process consumers
//! - `LocalBus`: broadcast channel for in-process consumers and dry runs
//! - `MockPublisher`: recording publisher with failure injection for tests

mod bus;
pub mod mock;
pub mod nats;
mod types;

pub use bus::LocalBus;
pub use mock::MockPublisher;
pub use nats::{connect_nats, subscribe_events, NatsPublisher, ReceivedEvent};
pub use types::{
    BusMessage, DomainEvent, EventPublisher, EventType, PublishError, DEFAULT_EVENT_SOURCE,
};
