//! Change tracking shared by the data contexts.

use dispatch_core::changes::{ChangeKind, EntityChange, TrackedEntity};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Ordered set of pending writes, at most one per entity.
///
/// Repeated changes to the same entity are merged: an added entity that is
/// modified stays added with its latest state, and an added entity that is
/// deleted before saving is forgotten.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    changes: Mutex<Vec<EntityChange>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, entity: TrackedEntity, kind: ChangeKind) {
        let mut changes = self.lock();
        let position = changes.iter().position(|c| {
            c.entity.kind_name() == entity.kind_name() && c.entity.identity() == entity.identity()
        });

        let Some(position) = position else {
            changes.push(EntityChange::new(entity, kind));
            return;
        };

        let existing = changes[position].kind;
        match (existing, kind) {
            (ChangeKind::Added, ChangeKind::Deleted) => {
                changes.remove(position);
            }
            (ChangeKind::Added, _) => {
                changes[position].entity = entity;
            }
            (ChangeKind::Deleted, ChangeKind::Added) => {
                changes[position] = EntityChange::new(entity, ChangeKind::Modified);
            }
            (ChangeKind::Deleted, _) => {}
            (ChangeKind::Modified, _) => {
                changes[position] = EntityChange::new(entity, kind);
            }
        }
    }

    pub fn snapshot(&self) -> Vec<EntityChange> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EntityChange>> {
        self.changes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::customer::Customer;
    use dispatch_core::entity::Entity;

    fn customer() -> Customer {
        Customer::create("Ana", "ana@example.com", "1").unwrap()
    }

    #[test]
    fn test_added_then_modified_stays_added_with_latest_state() {
        let tracker = ChangeTracker::new();
        let mut c = customer();
        tracker.track(c.clone().into_tracked(), ChangeKind::Added);
        c.update_contact_info("new@example.com", "2").unwrap();
        tracker.track(c.clone().into_tracked(), ChangeKind::Modified);

        let changes = tracker.snapshot();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Added);
        match &changes[0].entity {
            TrackedEntity::Customer(saved) => assert_eq!(saved.email(), "new@example.com"),
            other => panic!("unexpected entity {other:?}"),
        }
    }

    #[test]
    fn test_added_then_deleted_is_forgotten() {
        let tracker = ChangeTracker::new();
        let c = customer();
        tracker.track(c.clone().into_tracked(), ChangeKind::Added);
        tracker.track(c.into_tracked(), ChangeKind::Deleted);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_modified_then_deleted_becomes_deleted() {
        let tracker = ChangeTracker::new();
        let c = customer();
        tracker.track(c.clone().into_tracked(), ChangeKind::Modified);
        tracker.track(c.into_tracked(), ChangeKind::Deleted);
        let changes = tracker.snapshot();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn test_distinct_entities_keep_order() {
        let tracker = ChangeTracker::new();
        let a = customer();
        let b = customer();
        tracker.track(a.clone().into_tracked(), ChangeKind::Added);
        tracker.track(b.clone().into_tracked(), ChangeKind::Modified);
        let ids: Vec<String> = tracker.snapshot().iter().map(|c| c.entity.identity()).collect();
        assert_eq!(ids, vec![a.id().to_string(), b.id().to_string()]);
    }
}
