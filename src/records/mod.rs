//! Todo record data model
//!
//! This module provides:
//! - `TodoItem`: a validated snapshot of one tracked item
//! - `MutationRecord`: one before/after entry of the mutation log
//! - `Batch`: an ordered group of mutation records, the unit of retry
//! - `RecordError`: rejection reasons at the log-consumption boundary

mod models;
mod parse;

pub use models::{Batch, MutationKind, MutationRecord, TodoItem};
pub use parse::{AttributeMap, RecordError};
