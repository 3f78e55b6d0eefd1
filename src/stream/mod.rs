//! Mutation log consumption
//!
//! This module provides:
//! - `decode_batch` / `decode_json`: wire format → validated mutation records
//! - `StreamConsumer`: batching, bounded redelivery and dead-lettering around the coordinator
//! - `DeadLetterSink`: destinations for batches that exhausted their retries

mod dead_letter;
mod runner;
pub mod wire;

pub use dead_letter::{DeadLetter, DeadLetterSink, JsonlDeadLetterSink, MemoryDeadLetterSink};
pub use runner::{BatchDelivery, ConsumeReport, ConsumerSettings, StreamConsumer};
pub use wire::{decode_batch, decode_json, DecodedBatch, RejectedRecord, StreamEvent};
