use crate::error::{internal_error, WatchResult};
use crate::model::{DocumentKey, Timestamp};
use crate::util::assert;
use crate::watch::document::{DocumentChange, DocumentChangeType, DocumentSnapshot};
use crate::watch::pending::{PendingChange, PendingChangeMap};
use crate::watch::snapshot_store::{DocumentSet, OrderedSnapshotStore};
use crate::watch::target::DocumentComparator;

/// A consistent view of the target's result set at `read_time`.
#[derive(Clone, Debug)]
pub struct WatchSnapshot {
    read_time: Timestamp,
    documents: DocumentSet,
    changes: Vec<DocumentChange>,
}

impl WatchSnapshot {
    pub fn read_time(&self) -> Timestamp {
        self.read_time
    }

    /// Documents in target order.
    pub fn documents(&self) -> &DocumentSet {
        &self.documents
    }

    pub fn size(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Changes since the previous snapshot. Replaying them in order against
    /// the previous document list, using the reported indices, yields
    /// [`documents`](Self::documents).
    pub fn changes(&self) -> &[DocumentChange] {
        &self.changes
    }
}

#[derive(Default)]
struct ChangeSet {
    deletes: Vec<DocumentKey>,
    adds: Vec<DocumentSnapshot>,
    updates: Vec<DocumentSnapshot>,
}

/// Folds pending changes into the ordered store and produces snapshots.
pub struct SnapshotAssembler {
    store: OrderedSnapshotStore,
    has_pushed: bool,
}

impl SnapshotAssembler {
    pub fn new(comparator: DocumentComparator) -> Self {
        Self {
            store: OrderedSnapshotStore::new(comparator),
            has_pushed: false,
        }
    }

    pub fn store(&self) -> &OrderedSnapshotStore {
        &self.store
    }

    pub fn has_pushed(&self) -> bool {
        self.has_pushed
    }

    /// Size the store would have once `pending` is applied.
    pub fn current_size(&self, pending: &PendingChangeMap) -> usize {
        let mut size = self.store.len();
        for (key, change) in pending.iter() {
            match change {
                PendingChange::Removed if self.store.contains(key) => size -= 1,
                PendingChange::Updated(_) if !self.store.contains(key) => size += 1,
                _ => {}
            }
        }
        size
    }

    /// Applies `pending` and returns a snapshot, or `None` when nothing
    /// changed and a snapshot was already delivered. `pending` is cleared
    /// either way.
    pub fn push_snapshot(
        &mut self,
        pending: &mut PendingChangeMap,
        read_time: Timestamp,
    ) -> WatchResult<Option<WatchSnapshot>> {
        let changes = self.compute_snapshot(pending, read_time)?;
        pending.clear();

        if self.has_pushed && changes.is_empty() {
            return Ok(None);
        }
        self.has_pushed = true;
        Ok(Some(WatchSnapshot {
            read_time,
            documents: self.store.version(),
            changes,
        }))
    }

    /// Applies `pending` to the store and returns the ordered change list:
    /// removals in their previous order, then additions, then modifications
    /// in target order.
    pub fn compute_snapshot(
        &mut self,
        pending: &PendingChangeMap,
        read_time: Timestamp,
    ) -> WatchResult<Vec<DocumentChange>> {
        let mut change_set = self.extract_changes(pending, read_time);
        let mut changes = Vec::with_capacity(
            change_set.deletes.len() + change_set.adds.len() + change_set.updates.len(),
        );

        let store = &self.store;
        change_set.deletes.sort_by_cached_key(|key| store.find(key));
        for key in &change_set.deletes {
            let (old_index, document) = self.store.remove(key)?;
            changes.push(DocumentChange::new(
                DocumentChangeType::Removed,
                document,
                Some(old_index),
                None,
            ));
        }

        change_set
            .adds
            .sort_by(|left, right| self.store.compare(left, right));
        for document in change_set.adds {
            let new_index = self.store.insert(document.clone())?;
            changes.push(DocumentChange::new(
                DocumentChangeType::Added,
                document,
                None,
                Some(new_index),
            ));
        }

        change_set
            .updates
            .sort_by(|left, right| self.store.compare(left, right));
        for document in change_set.updates {
            if let Some(change) = self.modify(document)? {
                changes.push(change);
            }
        }

        assert(
            self.store.len() == self.store.key_count(),
            format!(
                "ordered index holds {} documents but {} keys are tracked",
                self.store.len(),
                self.store.key_count()
            ),
        );
        Ok(changes)
    }

    fn extract_changes(&self, pending: &PendingChangeMap, read_time: Timestamp) -> ChangeSet {
        let mut change_set = ChangeSet::default();
        for (key, change) in pending.iter() {
            match change {
                PendingChange::Removed => {
                    if self.store.contains(key) {
                        change_set.deletes.push(key.clone());
                    }
                }
                PendingChange::Updated(builder) => {
                    let mut builder = builder.clone();
                    builder.set_read_time(read_time);
                    let document = builder.build();
                    if self.store.contains(key) {
                        change_set.updates.push(document);
                    } else {
                        change_set.adds.push(document);
                    }
                }
            }
        }
        change_set
    }

    // Replaces the stored version only when the update time moved.
    fn modify(&mut self, document: DocumentSnapshot) -> WatchResult<Option<DocumentChange>> {
        let existing = self.store.get(document.key()).ok_or_else(|| {
            internal_error(format!("Updated document {} is not stored", document.key()))
        })?;
        if existing.update_time() == document.update_time() {
            return Ok(None);
        }
        let (old_index, _) = self.store.remove(document.key())?;
        let new_index = self.store.insert(document.clone())?;
        Ok(Some(DocumentChange::new(
            DocumentChangeType::Modified,
            document,
            Some(old_index),
            Some(new_index),
        )))
    }
}
