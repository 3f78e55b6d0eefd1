//! Validated construction of snapshots from loosely typed attribute maps
//!
//! The mutation log hands over images as key/value maps. Values may be plain JSON
//! or datastore-typed (`{"S": "..."}`, `{"N": "123"}`, `{"BOOL": true}`). Parsing
//! happens once at the log-consumption boundary; everything downstream works on
//! `TodoItem`.

use super::models::{MutationKind, TodoItem};
use serde_json::{Map, Value};

/// A loosely typed image as delivered by the log
pub type AttributeMap = Map<String, Value>;

/// Why a log entry could not be turned into a mutation record.
///
/// All variants are permanent: retrying the same entry yields the same error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("missing required attribute `{0}`")]
    MissingField(&'static str),

    #[error("attribute `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unknown mutation kind `{0}`")]
    UnknownKind(String),

    #[error("{kind} record has invalid shape (before: {has_before}, after: {has_after})")]
    InvalidShape {
        kind: MutationKind,
        has_before: bool,
        has_after: bool,
    },

    #[error("before-image id `{before}` does not match after-image id `{after}`")]
    KeyMismatch { before: String, after: String },
}

impl TodoItem {
    /// Parse and validate a snapshot from an attribute map.
    ///
    /// Rejects missing or mistyped required attributes, an empty id or name, and
    /// `updatedAt < createdAt`. A missing `completed` attribute means `false`.
    pub fn from_attributes(attrs: &AttributeMap) -> Result<Self, RecordError> {
        let id = match lookup(attrs, "todoId").or_else(|| lookup(attrs, "id")) {
            Some(value) => as_string("todoId", value)?,
            None => return Err(RecordError::MissingField("todoId")),
        };
        if id.is_empty() {
            return Err(invalid("todoId", "must not be empty"));
        }

        let name = as_string("name", required(attrs, "name")?)?;
        if name.is_empty() {
            return Err(invalid("name", "must not be empty"));
        }

        let completed = match lookup(attrs, "completed") {
            Some(value) => as_bool("completed", value)?,
            None => false,
        };

        let created_at = as_timestamp("createdAt", required(attrs, "createdAt")?)?;
        let updated_at = as_timestamp("updatedAt", required(attrs, "updatedAt")?)?;
        if updated_at < created_at {
            return Err(invalid(
                "updatedAt",
                format!("{} is before createdAt {}", updated_at, created_at),
            ));
        }

        Ok(Self {
            id,
            name,
            completed,
            created_at,
            updated_at,
        })
    }
}

/// Resolve an attribute, unwrapping a datastore type descriptor if present.
///
/// `NULL`-typed and JSON `null` values count as absent.
fn lookup<'a>(attrs: &'a AttributeMap, key: &str) -> Option<Attr<'a>> {
    let raw = attrs.get(key)?;
    let attr = match raw {
        Value::Object(obj) if obj.len() == 1 => {
            let (tag, inner) = obj.iter().next()?;
            match tag.as_str() {
                "S" => Attr::Str(inner),
                "N" => Attr::Num(inner),
                "BOOL" => Attr::Bool(inner),
                "NULL" => return None,
                _ => Attr::Plain(raw),
            }
        }
        Value::Null => return None,
        _ => Attr::Plain(raw),
    };
    Some(attr)
}

fn required<'a>(attrs: &'a AttributeMap, key: &'static str) -> Result<Attr<'a>, RecordError> {
    lookup(attrs, key).ok_or(RecordError::MissingField(key))
}

/// An attribute value with its declared type, if any
#[derive(Debug, Clone, Copy)]
enum Attr<'a> {
    Str(&'a Value),
    Num(&'a Value),
    Bool(&'a Value),
    Plain(&'a Value),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> RecordError {
    RecordError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn as_string(field: &'static str, attr: Attr<'_>) -> Result<String, RecordError> {
    match attr {
        Attr::Str(Value::String(s)) | Attr::Plain(Value::String(s)) => Ok(s.clone()),
        _ => Err(invalid(field, "expected a string")),
    }
}

fn as_bool(field: &'static str, attr: Attr<'_>) -> Result<bool, RecordError> {
    match attr {
        Attr::Bool(Value::Bool(b)) | Attr::Plain(Value::Bool(b)) => Ok(*b),
        _ => Err(invalid(field, "expected a boolean")),
    }
}

fn as_timestamp(field: &'static str, attr: Attr<'_>) -> Result<i64, RecordError> {
    match attr {
        // Datastore numbers travel as decimal strings
        Attr::Num(Value::String(s)) => s
            .parse::<i64>()
            .map_err(|_| invalid(field, format!("`{}` is not an integer timestamp", s))),
        Attr::Num(Value::Number(n)) | Attr::Plain(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| invalid(field, format!("`{}` is not an integer timestamp", n))),
        _ => Err(invalid(field, "expected a number")),
    }
}
