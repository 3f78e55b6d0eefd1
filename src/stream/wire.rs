//! Mutation log wire format
//!
//! The log delivers JSON batches shaped like
//! `{"Records": [{"eventID", "eventName", "dynamodb": {"Keys", "NewImage", "OldImage", "SequenceNumber"}}]}`.
//! Decoding turns each entry into a validated `MutationRecord`. Entries that cannot be
//! decoded are permanent failures: they are logged, reported, and left out of
//! derivation. They never fail the batch.

use crate::records::{AttributeMap, Batch, MutationKind, MutationRecord, RecordError, TodoItem};
use serde::Deserialize;
use tracing::error;

/// One delivery from the mutation log
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamEvent {
    #[serde(default)]
    pub records: Vec<StreamRecord>,
}

/// One raw log entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    #[serde(rename = "eventID", default)]
    pub event_id: Option<String>,
    pub event_name: String,
    pub dynamodb: StreamRecordData,
}

/// Images and position of a raw log entry
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamRecordData {
    #[serde(default)]
    pub keys: Option<AttributeMap>,
    #[serde(default)]
    pub new_image: Option<AttributeMap>,
    #[serde(default)]
    pub old_image: Option<AttributeMap>,
    #[serde(default)]
    pub sequence_number: Option<String>,
}

/// A log entry that was excluded from derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// Position in the delivered batch
    pub index: usize,
    pub event_id: Option<String>,
    pub sequence_number: Option<String>,
    pub error: RecordError,
}

/// Decoding result for one delivery
#[derive(Debug, Clone, Default)]
pub struct DecodedBatch {
    pub batch: Batch,
    pub rejected: Vec<RejectedRecord>,
}

impl StreamRecord {
    /// Validate the entry and build the mutation record.
    pub fn decode(&self) -> Result<MutationRecord, RecordError> {
        let kind: MutationKind = self.event_name.parse()?;
        let before = self
            .dynamodb
            .old_image
            .as_ref()
            .map(TodoItem::from_attributes)
            .transpose()?;
        let after = self
            .dynamodb
            .new_image
            .as_ref()
            .map(TodoItem::from_attributes)
            .transpose()?;

        let record = MutationRecord::from_parts(kind, before, after)?;
        Ok(match &self.dynamodb.sequence_number {
            Some(seq) => record.with_sequence_number(seq.clone()),
            None => record,
        })
    }
}

/// Decode a delivery, keeping log order and setting aside entries that fail validation.
pub fn decode_batch(event: &StreamEvent) -> DecodedBatch {
    let mut decoded = DecodedBatch::default();

    for (index, raw) in event.records.iter().enumerate() {
        match raw.decode() {
            Ok(record) => decoded.batch.records.push(record),
            Err(e) => {
                error!(
                    index,
                    event_id = ?raw.event_id,
                    event_name = %raw.event_name,
                    sequence = ?raw.dynamodb.sequence_number,
                    "Dropping log entry that violates the record contract: {}",
                    e
                );
                decoded.rejected.push(RejectedRecord {
                    index,
                    event_id: raw.event_id.clone(),
                    sequence_number: raw.dynamodb.sequence_number.clone(),
                    error: e,
                });
            }
        }
    }

    decoded
}

/// Parse and decode a JSON delivery.
pub fn decode_json(input: &str) -> anyhow::Result<DecodedBatch> {
    let event: StreamEvent = serde_json::from_str(input)
        .map_err(|e| anyhow::anyhow!("Invalid mutation log payload: {}", e))?;
    Ok(decode_batch(&event))
}
