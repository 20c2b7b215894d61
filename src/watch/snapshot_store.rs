use std::collections::HashMap;

use crate::error::{already_exists, not_found, WatchResult};
use crate::model::DocumentKey;
use crate::watch::document::DocumentSnapshot;
use crate::watch::sorted_tree::{Iter, SortedTree};
use crate::watch::target::DocumentComparator;

/// The documents last emitted to the subscriber, ordered by the target's
/// comparator and indexed by key.
pub struct OrderedSnapshotStore {
    tree: SortedTree<DocumentSnapshot>,
    by_key: HashMap<DocumentKey, DocumentSnapshot>,
}

impl OrderedSnapshotStore {
    pub fn new(comparator: DocumentComparator) -> Self {
        Self {
            tree: SortedTree::new(comparator),
            by_key: HashMap::new(),
        }
    }

    /// Inserts a document and returns its position under the comparator.
    pub fn insert(&mut self, snapshot: DocumentSnapshot) -> WatchResult<usize> {
        if self.by_key.contains_key(snapshot.key()) {
            return Err(already_exists(format!(
                "Document {} is already present in the snapshot store",
                snapshot.key()
            )));
        }
        let (tree, index) = self.tree.insert(snapshot.clone()).map_err(|_| {
            already_exists(format!(
                "Document {} compares equal to a stored document",
                snapshot.key()
            ))
        })?;
        self.tree = tree;
        self.by_key.insert(snapshot.key().clone(), snapshot);
        Ok(index)
    }

    /// Removes a document and returns the position it held together with the
    /// removed snapshot.
    pub fn remove(&mut self, key: &DocumentKey) -> WatchResult<(usize, DocumentSnapshot)> {
        let snapshot = self.by_key.get(key).cloned().ok_or_else(|| {
            not_found(format!("Document {key} is not present in the snapshot store"))
        })?;
        let (tree, index) = self.tree.remove(&snapshot).ok_or_else(|| {
            not_found(format!("Document {key} is missing from the ordered index"))
        })?;
        self.tree = tree;
        self.by_key.remove(key);
        Ok((index, snapshot))
    }

    pub fn find(&self, key: &DocumentKey) -> Option<usize> {
        let snapshot = self.by_key.get(key)?;
        self.tree.index_of(snapshot)
    }

    pub fn get(&self, key: &DocumentKey) -> Option<&DocumentSnapshot> {
        self.by_key.get(key)
    }

    pub fn contains(&self, key: &DocumentKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Number of distinct keys held; always equal to [`len`](Self::len).
    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &DocumentKey> {
        self.by_key.keys()
    }

    pub fn compare(&self, left: &DocumentSnapshot, right: &DocumentSnapshot) -> std::cmp::Ordering {
        (self.tree.comparator())(left, right)
    }

    /// Captures the current contents. The returned set is not affected by
    /// later mutations of the store.
    pub fn version(&self) -> DocumentSet {
        DocumentSet {
            tree: self.tree.clone(),
        }
    }
}

/// Immutable ordered view of the documents in one snapshot.
#[derive(Clone, Debug)]
pub struct DocumentSet {
    tree: SortedTree<DocumentSnapshot>,
}

impl DocumentSet {
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DocumentSnapshot> {
        self.tree.get(index)
    }

    pub fn iter(&self) -> Iter<'_, DocumentSnapshot> {
        self.tree.iter()
    }

    pub fn ordered_keys(&self) -> impl Iterator<Item = &DocumentKey> {
        self.tree.iter().map(DocumentSnapshot::key)
    }
}

impl<'a> IntoIterator for &'a DocumentSet {
    type Item = &'a DocumentSnapshot;
    type IntoIter = Iter<'a, DocumentSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
