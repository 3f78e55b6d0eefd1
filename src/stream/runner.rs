//! Stream consumer: batching, bounded redelivery and dead-lettering
//!
//! Plays the part of the log-consumption mechanism around the coordinator:
//! records are cut into batches of at most `batch_size` in log order, each batch
//! is processed until it succeeds or its retry budget runs out, and exhausted
//! batches go to a dead-letter sink. Batches are consumed one after the other,
//! so a failing batch holds back the ones behind it, like a blocked shard.

use super::dead_letter::{DeadLetter, DeadLetterSink};
use crate::cdc::BatchCoordinator;
use crate::records::{Batch, MutationRecord};
use crate::Config;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Batching and retry knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Maximum records per batch
    pub batch_size: usize,
    /// Redeliveries after the first attempt before dead-lettering
    pub max_retries: u32,
    /// Pause between attempts of the same batch
    pub retry_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl From<&Config> for ConsumerSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
        }
    }
}

/// What happened to one batch across all its attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDelivery {
    /// Attempts made, first delivery included
    pub attempts: u32,
    /// Events accepted by the bus over all attempts (replays included)
    pub events_published: usize,
    pub dead_lettered: bool,
}

/// Totals for one consume run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    pub batches: usize,
    pub records: usize,
    pub events_published: usize,
    pub redeliveries: usize,
    pub dead_lettered_batches: usize,
    pub dead_lettered_records: usize,
}

impl ConsumeReport {
    pub fn has_dead_letters(&self) -> bool {
        self.dead_lettered_batches > 0
    }
}

/// Drives the coordinator over a record stream with at-least-once semantics.
pub struct StreamConsumer {
    coordinator: BatchCoordinator,
    dead_letters: Arc<dyn DeadLetterSink>,
    settings: ConsumerSettings,
}

impl StreamConsumer {
    pub fn new(
        coordinator: BatchCoordinator,
        dead_letters: Arc<dyn DeadLetterSink>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            coordinator,
            dead_letters,
            settings,
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Process one batch, redelivering it until it succeeds or the budget is spent.
    ///
    /// Returns an error only when an exhausted batch could not be dead-lettered.
    pub async fn deliver(&self, batch: &Batch) -> Result<BatchDelivery> {
        let max_attempts = self.settings.max_retries.saturating_add(1);
        let mut events_published = 0;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let outcome = self.coordinator.process_batch(batch).await;
            events_published += outcome.published().len();

            if !outcome.is_failed() {
                return Ok(BatchDelivery {
                    attempts,
                    events_published,
                    dead_lettered: false,
                });
            }

            if attempts >= max_attempts {
                error!(
                    batch_id = %outcome.batch_id,
                    attempts,
                    records = batch.len(),
                    "Batch exhausted its redelivery budget"
                );
                let letter = DeadLetter {
                    failed_at: Utc::now(),
                    attempts,
                    errors: outcome.failure_messages(),
                    records: batch.records.clone(),
                };
                self.dead_letters
                    .dead_letter(&letter)
                    .await
                    .context("Failed to dead-letter exhausted batch")?;
                return Ok(BatchDelivery {
                    attempts,
                    events_published,
                    dead_lettered: true,
                });
            }

            warn!(
                batch_id = %outcome.batch_id,
                attempt = attempts,
                max_attempts,
                "Redelivering failed batch"
            );
            if !self.settings.retry_backoff.is_zero() {
                tokio::time::sleep(self.settings.retry_backoff).await;
            }
        }
    }

    /// Cut records into batches in log order and deliver them one by one.
    pub async fn consume(&self, records: Vec<MutationRecord>) -> Result<ConsumeReport> {
        let mut report = ConsumeReport {
            records: records.len(),
            ..Default::default()
        };

        for chunk in records.chunks(self.settings.batch_size.max(1)) {
            let batch = Batch::new(chunk.to_vec());
            let delivery = self.deliver(&batch).await?;

            report.batches += 1;
            report.events_published += delivery.events_published;
            report.redeliveries += (delivery.attempts - 1) as usize;
            if delivery.dead_lettered {
                report.dead_lettered_batches += 1;
                report.dead_lettered_records += batch.len();
            }
        }

        info!(
            batches = report.batches,
            records = report.records,
            published = report.events_published,
            redeliveries = report.redeliveries,
            dead_lettered = report.dead_lettered_batches,
            "Consume run finished"
        );
        Ok(report)
    }
}
