//! Dead-letter sinks for batches that exhausted their redelivery budget

use crate::records::MutationRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// A batch routed to inspection instead of being discarded
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub failed_at: DateTime<Utc>,
    /// Total processing attempts, first delivery included
    pub attempts: u32,
    /// Failure lines from the last attempt
    pub errors: Vec<String>,
    pub records: Vec<MutationRecord>,
}

/// Destination for exhausted batches.
///
/// A failed write is fatal for the consumer: the batch would otherwise be lost.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<()>;
}

/// Appends one JSON document per dead letter to a file.
pub struct JsonlDeadLetterSink {
    path: PathBuf,
    // Serializes appends from concurrent consumers
    write_lock: Mutex<()>,
}

impl JsonlDeadLetterSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterSink {
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<()> {
        let mut line = serde_json::to_vec(letter).context("Failed to serialize dead letter")?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open dead-letter file {}", self.path.display()))?;
        file.write_all(&line)
            .await
            .with_context(|| format!("Failed to write dead letter to {}", self.path.display()))?;
        file.flush().await?;

        info!(
            path = %self.path.display(),
            records = letter.records.len(),
            attempts = letter.attempts,
            "Batch dead-lettered"
        );
        Ok(())
    }
}

/// Keeps dead letters in memory (tests, embedding).
#[derive(Default)]
pub struct MemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<()> {
        self.letters.lock().await.push(letter.clone());
        Ok(())
    }
}
