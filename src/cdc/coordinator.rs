//! Batch coordinator
//!
//! Runs classify → derive → publish over a batch, strictly in order, and reports
//! whether the batch must be redelivered.
//!
//! ## Failure policy
//!
//! Every record is attempted in order. A publish failure fails the whole batch so
//! the log redelivers it (at-least-once); a redelivered batch re-publishes records
//! that already succeeded, so consumers must treat events as idempotent. Within one
//! invocation, once a record of key K fails, later records of K are deferred rather
//! than published: they would otherwise become visible before the failed earlier
//! event. Records of other keys are still attempted.
//!
//! No state survives an invocation.

use super::rules::derive;
use crate::events::{EventPublisher, EventType, PublishError};
use crate::records::{Batch, MutationKind};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Terminal state of one mutation record within an invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The record does not correspond to any domain event
    NoEvent,
    /// The derived event was handed to the bus
    Published(EventType),
    /// The derived event could not be published
    PublishFailed {
        event_type: EventType,
        error: PublishError,
    },
    /// Skipped because an earlier record of the same key failed in this invocation
    Deferred,
}

/// Per-record line of a batch outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReport {
    pub partition_key: String,
    pub sequence_number: Option<String>,
    pub kind: MutationKind,
    pub outcome: RecordOutcome,
}

/// Whether the batch may be acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Succeeded,
    Failed,
}

/// Result of processing one batch
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Correlation id for logs; fresh per invocation
    pub batch_id: Uuid,
    /// One entry per input record, in batch order
    pub records: Vec<RecordReport>,
}

impl BatchOutcome {
    pub fn status(&self) -> BatchStatus {
        let failed = self.records.iter().any(|r| {
            matches!(
                r.outcome,
                RecordOutcome::PublishFailed { .. } | RecordOutcome::Deferred
            )
        });
        if failed {
            BatchStatus::Failed
        } else {
            BatchStatus::Succeeded
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status() == BatchStatus::Failed
    }

    /// Event types that reached the bus, in publish order
    pub fn published(&self) -> Vec<EventType> {
        self.records
            .iter()
            .filter_map(|r| match r.outcome {
                RecordOutcome::Published(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Records whose publish attempt failed
    pub fn failures(&self) -> impl Iterator<Item = &RecordReport> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, RecordOutcome::PublishFailed { .. }))
    }

    /// Human-readable failure lines, e.g. for dead letters
    pub fn failure_messages(&self) -> Vec<String> {
        self.failures()
            .filter_map(|r| match &r.outcome {
                RecordOutcome::PublishFailed { event_type, error } => Some(format!(
                    "{} {} for {}: {}",
                    r.kind, event_type, r.partition_key, error
                )),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&RecordOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

/// Feeds each record of a batch through the differ, the rules and the publisher.
///
/// The publisher is injected so tests can substitute a fake bus.
#[derive(Clone)]
pub struct BatchCoordinator {
    publisher: Arc<dyn EventPublisher>,
}

impl BatchCoordinator {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Process one batch in order and report the per-record and overall outcome.
    ///
    /// Never returns early: every record gets a report.
    pub async fn process_batch(&self, batch: &Batch) -> BatchOutcome {
        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", %batch_id, records = batch.len());
        let records = self.run(batch).instrument(span).await;
        let outcome = BatchOutcome { batch_id, records };

        if outcome.is_failed() {
            warn!(
                %batch_id,
                failed = outcome.failures().count(),
                deferred = outcome.count(|o| *o == RecordOutcome::Deferred),
                "Batch failed, redelivery required"
            );
        } else {
            info!(
                %batch_id,
                published = outcome.published().len(),
                skipped = outcome.count(|o| *o == RecordOutcome::NoEvent),
                "Batch processed"
            );
        }
        outcome
    }

    async fn run(&self, batch: &Batch) -> Vec<RecordReport> {
        let mut failed_keys: HashSet<&str> = HashSet::new();
        let mut reports = Vec::with_capacity(batch.len());

        for record in batch.iter() {
            let key = record.partition_key();

            let outcome = if failed_keys.contains(key) {
                debug!(
                    partition_key = %key,
                    sequence = ?record.sequence_number(),
                    "Deferring record behind an earlier failure of the same key"
                );
                RecordOutcome::Deferred
            } else {
                match derive(record) {
                    None => {
                        debug!(
                            partition_key = %key,
                            kind = %record.kind(),
                            "No event derived"
                        );
                        RecordOutcome::NoEvent
                    }
                    Some(event) => match self.publisher.publish(&event).await {
                        Ok(()) => {
                            debug!(
                                partition_key = %key,
                                event_type = %event.event_type,
                                "Event published"
                            );
                            RecordOutcome::Published(event.event_type)
                        }
                        Err(e) => {
                            error!(
                                partition_key = %key,
                                sequence = ?record.sequence_number(),
                                event_type = %event.event_type,
                                "Failed to publish event: {}",
                                e
                            );
                            failed_keys.insert(key);
                            RecordOutcome::PublishFailed {
                                event_type: event.event_type,
                                error: e,
                            }
                        }
                    },
                }
            };

            reports.push(RecordReport {
                partition_key: key.to_string(),
                sequence_number: record.sequence_number().map(str::to_string),
                kind: record.kind(),
                outcome,
            });
        }

        reports
    }
}
