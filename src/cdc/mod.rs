//! Change-data-capture event derivation
//!
//! Data flow per mutation record: classify (differ) → derive (rules) → publish.
//! The coordinator runs that flow sequentially over a batch and decides whether
//! the batch as a whole succeeded.

pub mod coordinator;
pub mod differ;
pub mod rules;

pub use coordinator::{BatchCoordinator, BatchOutcome, BatchStatus, RecordOutcome, RecordReport};
pub use differ::{classify, MutationView};
pub use rules::derive;
