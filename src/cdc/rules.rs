//! Event derivation rules
//!
//! Maps a mutation record to at most one domain event. The match is on the closed
//! `MutationKind`, and each arm consults exactly one differ classification, so a
//! record can never yield two events. A new event type gets its own arm (or a
//! condition inside an existing arm) rather than a second, overlapping check.

use super::differ::classify;
use crate::events::DomainEvent;
use crate::records::{MutationKind, MutationRecord};

/// Derive the domain event for one mutation record, if any.
pub fn derive(record: &MutationRecord) -> Option<DomainEvent> {
    let view = classify(record.before(), record.after());
    match record.kind() {
        MutationKind::Insert if view.was_just_created() => {
            view.after().cloned().map(DomainEvent::created)
        }
        MutationKind::Modify if view.was_just_completed() => {
            view.after().cloned().map(DomainEvent::completed)
        }
        MutationKind::Remove if view.was_just_deleted() => {
            view.before().cloned().map(DomainEvent::deleted)
        }
        MutationKind::Insert | MutationKind::Modify | MutationKind::Remove => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::records::TodoItem;

    fn milk() -> TodoItem {
        TodoItem::new("a", "buy milk", 100)
    }

    #[test]
    fn test_insert_derives_created_with_after() {
        let after = milk();
        let event = derive(&MutationRecord::insert(after.clone())).unwrap();
        assert_eq!(event.event_type, EventType::Created);
        assert_eq!(event.payload, after);
    }

    #[test]
    fn test_insert_of_completed_item_is_still_created() {
        let after = milk().with_completed(true);
        let event = derive(&MutationRecord::insert(after)).unwrap();
        assert_eq!(event.event_type, EventType::Created);
    }

    #[test]
    fn test_modify_completing_derives_completed_with_after() {
        let before = milk();
        let after = milk().with_completed(true).with_updated_at(200);
        let record = MutationRecord::modify(before, after.clone()).unwrap();
        let event = derive(&record).unwrap();
        assert_eq!(event.event_type, EventType::Completed);
        assert_eq!(event.payload, after);
    }

    #[test]
    fn test_modify_without_transition_derives_nothing() {
        let cases = [
            (milk(), milk().with_name("renamed").with_updated_at(150)),
            (milk(), milk().with_updated_at(150)),
            (
                milk().with_completed(true),
                milk().with_completed(true).with_name("renamed"),
            ),
            (milk().with_completed(true), milk().with_updated_at(150)),
        ];
        for (before, after) in cases {
            let record = MutationRecord::modify(before, after).unwrap();
            assert_eq!(derive(&record), None);
        }
    }

    #[test]
    fn test_remove_derives_deleted_with_before() {
        let before = milk().with_completed(true);
        let event = derive(&MutationRecord::remove(before.clone())).unwrap();
        assert_eq!(event.event_type, EventType::Deleted);
        assert_eq!(event.payload, before);
    }
}
