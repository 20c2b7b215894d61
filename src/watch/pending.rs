use std::collections::hash_map::Iter;
use std::collections::HashMap;

use crate::model::DocumentKey;
use crate::watch::document::DocumentSnapshotBuilder;

/// A change observed for one document since the last snapshot.
#[derive(Clone, Debug)]
pub enum PendingChange {
    Removed,
    Updated(DocumentSnapshotBuilder),
}

/// Document changes collected between two snapshots. The latest change
/// recorded for a key replaces any earlier one.
#[derive(Debug, Default)]
pub struct PendingChangeMap {
    changes: HashMap<DocumentKey, PendingChange>,
}

impl PendingChangeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_add(&mut self, key: DocumentKey, builder: DocumentSnapshotBuilder) {
        self.changes.insert(key, PendingChange::Updated(builder));
    }

    pub fn record_removed(&mut self, key: DocumentKey) {
        self.changes.insert(key, PendingChange::Removed);
    }

    pub fn get(&self, key: &DocumentKey) -> Option<&PendingChange> {
        self.changes.get(key)
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, DocumentKey, PendingChange> {
        self.changes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    #[test]
    fn last_write_wins() {
        let mut pending = PendingChangeMap::new();
        pending.record_add(key("coll/a"), DocumentSnapshotBuilder::new(key("coll/a")));
        pending.record_removed(key("coll/a"));
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending.get(&key("coll/a")), Some(PendingChange::Removed)));

        pending.record_add(key("coll/a"), DocumentSnapshotBuilder::new(key("coll/a")));
        assert!(matches!(
            pending.get(&key("coll/a")),
            Some(PendingChange::Updated(_))
        ));
    }

    #[test]
    fn clear_discards_everything() {
        let mut pending = PendingChangeMap::new();
        pending.record_removed(key("coll/a"));
        pending.record_removed(key("coll/b"));
        pending.clear();
        assert!(pending.is_empty());
    }
}
