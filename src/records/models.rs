//! Record snapshot and mutation log types

use super::parse::RecordError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of one todo item at a point in time.
///
/// Field names follow the datastore attributes (`todoId`, `createdAt`, ...) so the
/// serialized snapshot is byte-compatible with what the CRUD handlers return.
/// Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    /// Opaque unique id, immutable once assigned
    #[serde(rename = "todoId", alias = "id")]
    pub id: String,
    /// Non-empty display name
    pub name: String,
    /// Completion flag, false at creation
    #[serde(default)]
    pub completed: bool,
    /// Creation timestamp, immutable
    pub created_at: i64,
    /// Timestamp of the last mutation, never before `created_at`
    pub updated_at: i64,
}

impl TodoItem {
    /// Create a fresh, not yet completed item
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            completed: false,
            created_at,
            updated_at: created_at,
        }
    }

    /// Set the completion flag
    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the last-mutation timestamp
    pub fn with_updated_at(mut self, updated_at: i64) -> Self {
        self.updated_at = updated_at;
        self
    }
}

/// The kind of mutation recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationKind {
    Insert,
    Modify,
    Remove,
}

impl MutationKind {
    /// Wire name used by the mutation log
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Insert => "INSERT",
            MutationKind::Modify => "MODIFY",
            MutationKind::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(MutationKind::Insert),
            "MODIFY" => Ok(MutationKind::Modify),
            "REMOVE" => Ok(MutationKind::Remove),
            other => Err(RecordError::UnknownKind(other.to_string())),
        }
    }
}

/// One entry of the mutation log.
///
/// Only shapes allowed by the log contract can be constructed: Insert carries no
/// before-image, Remove carries no after-image, Modify carries both images of the
/// same record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    kind: MutationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<TodoItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<TodoItem>,
    partition_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_number: Option<String>,
}

impl MutationRecord {
    /// An item was created
    pub fn insert(after: TodoItem) -> Self {
        Self {
            kind: MutationKind::Insert,
            partition_key: after.id.clone(),
            before: None,
            after: Some(after),
            sequence_number: None,
        }
    }

    /// An item was removed
    pub fn remove(before: TodoItem) -> Self {
        Self {
            kind: MutationKind::Remove,
            partition_key: before.id.clone(),
            before: Some(before),
            after: None,
            sequence_number: None,
        }
    }

    /// An item was modified. Both images must describe the same record.
    pub fn modify(before: TodoItem, after: TodoItem) -> Result<Self, RecordError> {
        if before.id != after.id {
            return Err(RecordError::KeyMismatch {
                before: before.id,
                after: after.id,
            });
        }
        Ok(Self {
            kind: MutationKind::Modify,
            partition_key: after.id.clone(),
            before: Some(before),
            after: Some(after),
            sequence_number: None,
        })
    }

    /// Build a record from its loose parts, rejecting shapes the log contract forbids.
    pub fn from_parts(
        kind: MutationKind,
        before: Option<TodoItem>,
        after: Option<TodoItem>,
    ) -> Result<Self, RecordError> {
        match (kind, before, after) {
            (MutationKind::Insert, None, Some(after)) => Ok(Self::insert(after)),
            (MutationKind::Remove, Some(before), None) => Ok(Self::remove(before)),
            (MutationKind::Modify, Some(before), Some(after)) => Self::modify(before, after),
            (kind, before, after) => Err(RecordError::InvalidShape {
                kind,
                has_before: before.is_some(),
                has_after: after.is_some(),
            }),
        }
    }

    /// Attach the log-assigned sequence number
    pub fn with_sequence_number(mut self, sequence_number: impl Into<String>) -> Self {
        self.sequence_number = Some(sequence_number.into());
        self
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn before(&self) -> Option<&TodoItem> {
        self.before.as_ref()
    }

    pub fn after(&self) -> Option<&TodoItem> {
        self.after.as_ref()
    }

    /// Ordering key; equal to the record id
    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn sequence_number(&self) -> Option<&str> {
        self.sequence_number.as_deref()
    }
}

/// An ordered group of mutation records delivered together by the log.
///
/// Order within a batch is log order per partition key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub records: Vec<MutationRecord>,
}

impl Batch {
    pub fn new(records: Vec<MutationRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MutationRecord> {
        self.records.iter()
    }
}

impl From<Vec<MutationRecord>> for Batch {
    fn from(records: Vec<MutationRecord>) -> Self {
        Self::new(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> TodoItem {
        TodoItem::new(id, "buy milk", 100)
    }

    #[test]
    fn test_todo_item_uses_datastore_attribute_names() {
        let json = serde_json::to_value(item("a")).unwrap();
        assert_eq!(json["todoId"], "a");
        assert_eq!(json["createdAt"], 100);
        assert_eq!(json["updatedAt"], 100);
        assert_eq!(json["completed"], false);
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_todo_item_accepts_id_alias() {
        let parsed: TodoItem = serde_json::from_str(
            r#"{"id":"a","name":"x","createdAt":1,"updatedAt":2}"#,
        )
        .unwrap();
        assert_eq!(parsed.id, "a");
        assert!(!parsed.completed);
    }

    #[test]
    fn test_mutation_kind_parse() {
        assert_eq!("INSERT".parse::<MutationKind>().unwrap(), MutationKind::Insert);
        assert_eq!("MODIFY".parse::<MutationKind>().unwrap(), MutationKind::Modify);
        assert_eq!("REMOVE".parse::<MutationKind>().unwrap(), MutationKind::Remove);
        assert!(matches!(
            "TRUNCATE".parse::<MutationKind>(),
            Err(RecordError::UnknownKind(k)) if k == "TRUNCATE"
        ));
    }

    #[test]
    fn test_constructors_set_partition_key() {
        assert_eq!(MutationRecord::insert(item("a")).partition_key(), "a");
        assert_eq!(MutationRecord::remove(item("b")).partition_key(), "b");
        let modify = MutationRecord::modify(item("c"), item("c").with_completed(true)).unwrap();
        assert_eq!(modify.partition_key(), "c");
        assert_eq!(modify.kind(), MutationKind::Modify);
    }

    #[test]
    fn test_modify_rejects_different_ids() {
        let err = MutationRecord::modify(item("a"), item("b")).unwrap_err();
        assert!(matches!(err, RecordError::KeyMismatch { .. }));
    }

    #[test]
    fn test_from_parts_rejects_contract_violations() {
        let cases = [
            (MutationKind::Insert, Some(item("a")), Some(item("a"))),
            (MutationKind::Insert, None, None),
            (MutationKind::Modify, None, Some(item("a"))),
            (MutationKind::Modify, Some(item("a")), None),
            (MutationKind::Remove, Some(item("a")), Some(item("a"))),
            (MutationKind::Remove, None, None),
        ];
        for (kind, before, after) in cases {
            let err = MutationRecord::from_parts(kind, before, after).unwrap_err();
            assert!(matches!(err, RecordError::InvalidShape { .. }), "{kind}");
        }
    }

    #[test]
    fn test_from_parts_accepts_valid_shapes() {
        assert!(MutationRecord::from_parts(MutationKind::Insert, None, Some(item("a"))).is_ok());
        assert!(MutationRecord::from_parts(MutationKind::Remove, Some(item("a")), None).is_ok());
        assert!(MutationRecord::from_parts(
            MutationKind::Modify,
            Some(item("a")),
            Some(item("a").with_name("renamed"))
        )
        .is_ok());
    }

    #[test]
    fn test_sequence_number_omitted_when_absent() {
        let record = MutationRecord::insert(item("a"));
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("sequenceNumber").is_none());
        assert!(json.get("before").is_none());
        assert_eq!(json["kind"], "INSERT");

        let record = record.with_sequence_number("42");
        assert_eq!(record.sequence_number(), Some("42"));
    }
}
