//! Snapshot differ
//!
//! Classifies a before/after pair of the same record. Total over all inputs:
//! either image may be absent, and nothing here can fail.

use crate::records::TodoItem;

/// Classification of one before/after pair.
///
/// At most one accessor is true for any input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationView<'a> {
    before: Option<&'a TodoItem>,
    after: Option<&'a TodoItem>,
}

/// Classify a mutation from its images.
pub fn classify<'a>(before: Option<&'a TodoItem>, after: Option<&'a TodoItem>) -> MutationView<'a> {
    MutationView { before, after }
}

impl<'a> MutationView<'a> {
    /// No before-image, an after-image
    pub fn was_just_created(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    /// Edge-triggered: `completed` went from false to true.
    ///
    /// true → false, true → true and any change that leaves `completed` alone do not count.
    pub fn was_just_completed(&self) -> bool {
        matches!(
            (self.before, self.after),
            (Some(before), Some(after)) if !before.completed && after.completed
        )
    }

    /// A before-image, no after-image
    pub fn was_just_deleted(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }

    pub fn before(&self) -> Option<&'a TodoItem> {
        self.before
    }

    pub fn after(&self) -> Option<&'a TodoItem> {
        self.after
    }
}
