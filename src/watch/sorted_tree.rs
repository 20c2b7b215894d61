//! Persistent order-statistic tree.
//!
//! A randomized treap whose nodes are shared through `Arc` and copied along
//! the modified path, so cloning a tree is O(1) and an old clone is never
//! affected by later inserts or removals. Every node tracks the size of its
//! subtree, which gives ordinal lookups in expected O(log n).

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use rand::Rng;

pub type Comparator<V> = Arc<dyn Fn(&V, &V) -> Ordering + Send + Sync>;

type Link<V> = Option<Arc<Node<V>>>;

struct Node<V> {
    value: V,
    priority: u64,
    size: usize,
    left: Link<V>,
    right: Link<V>,
}

impl<V: Clone> Node<V> {
    fn new(value: V, priority: u64, left: Link<V>, right: Link<V>) -> Arc<Self> {
        let size = 1 + link_size(&left) + link_size(&right);
        Arc::new(Self {
            value,
            priority,
            size,
            left,
            right,
        })
    }

    fn with_children(&self, left: Link<V>, right: Link<V>) -> Arc<Self> {
        Node::new(self.value.clone(), self.priority, left, right)
    }
}

fn link_size<V>(link: &Link<V>) -> usize {
    link.as_ref().map(|node| node.size).unwrap_or(0)
}

/// Insert into a tree that already holds an element comparing equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateEntry;

pub struct SortedTree<V> {
    root: Link<V>,
    comparator: Comparator<V>,
}

impl<V> Clone for SortedTree<V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            comparator: Arc::clone(&self.comparator),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for SortedTree<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<V> SortedTree<V> {
    pub fn new(comparator: Comparator<V>) -> Self {
        Self {
            root: None,
            comparator,
        }
    }

    pub fn len(&self) -> usize {
        link_size(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn comparator(&self) -> &Comparator<V> {
        &self.comparator
    }

    /// Returns the ordinal position of the element comparing equal to `value`.
    pub fn index_of(&self, value: &V) -> Option<usize> {
        let mut index = 0;
        let mut current = self.root.as_ref();
        while let Some(node) = current {
            match (self.comparator)(value, &node.value) {
                Ordering::Less => current = node.left.as_ref(),
                Ordering::Greater => {
                    index += link_size(&node.left) + 1;
                    current = node.right.as_ref();
                }
                Ordering::Equal => return Some(index + link_size(&node.left)),
            }
        }
        None
    }

    /// Returns the element at ordinal position `index`.
    pub fn get(&self, mut index: usize) -> Option<&V> {
        let mut current = self.root.as_ref();
        while let Some(node) = current {
            let left_size = link_size(&node.left);
            match index.cmp(&left_size) {
                Ordering::Less => current = node.left.as_ref(),
                Ordering::Equal => return Some(&node.value),
                Ordering::Greater => {
                    index -= left_size + 1;
                    current = node.right.as_ref();
                }
            }
        }
        None
    }

    pub fn iter(&self) -> Iter<'_, V> {
        let mut iter = Iter {
            stack: Vec::new(),
            remaining: self.len(),
        };
        iter.push_left(self.root.as_ref());
        iter
    }
}

impl<V: Clone> SortedTree<V> {
    /// Returns a new tree containing `value` together with its ordinal
    /// position.
    pub fn insert(&self, value: V) -> Result<(Self, usize), DuplicateEntry> {
        if self.index_of(&value).is_some() {
            return Err(DuplicateEntry);
        }
        let priority = rand::thread_rng().gen::<u64>();
        let root = insert_node(&self.root, value.clone(), priority, &self.comparator);
        let tree = Self {
            root: Some(root),
            comparator: Arc::clone(&self.comparator),
        };
        let index = tree.index_of(&value).unwrap_or_default();
        Ok((tree, index))
    }

    /// Returns a new tree without the element comparing equal to `value`,
    /// together with the position it held. `None` when no such element exists.
    pub fn remove(&self, value: &V) -> Option<(Self, usize)> {
        let index = self.index_of(value)?;
        let root = remove_node(&self.root, value, &self.comparator)?;
        Some((
            Self {
                root,
                comparator: Arc::clone(&self.comparator),
            },
            index,
        ))
    }
}

fn insert_node<V: Clone>(
    link: &Link<V>,
    value: V,
    priority: u64,
    comparator: &Comparator<V>,
) -> Arc<Node<V>> {
    match link {
        Some(node) if node.priority >= priority => {
            if comparator(&value, &node.value) == Ordering::Less {
                let left = insert_node(&node.left, value, priority, comparator);
                node.with_children(Some(left), node.right.clone())
            } else {
                let right = insert_node(&node.right, value, priority, comparator);
                node.with_children(node.left.clone(), Some(right))
            }
        }
        _ => {
            let (left, right) = split(link, &value, comparator);
            Node::new(value, priority, left, right)
        }
    }
}

/// Splits into elements ordered before `value` and elements ordered after it.
fn split<V: Clone>(link: &Link<V>, value: &V, comparator: &Comparator<V>) -> (Link<V>, Link<V>) {
    match link {
        None => (None, None),
        Some(node) => {
            if comparator(&node.value, value) == Ordering::Less {
                let (left, right) = split(&node.right, value, comparator);
                (Some(node.with_children(node.left.clone(), left)), right)
            } else {
                let (left, right) = split(&node.left, value, comparator);
                (left, Some(node.with_children(right, node.right.clone())))
            }
        }
    }
}

/// Joins two trees where every element of `left` orders before `right`.
fn merge<V: Clone>(left: &Link<V>, right: &Link<V>) -> Link<V> {
    match (left, right) {
        (None, _) => right.clone(),
        (_, None) => left.clone(),
        (Some(l), Some(r)) => {
            if l.priority > r.priority {
                Some(l.with_children(l.left.clone(), merge(&l.right, right)))
            } else {
                Some(r.with_children(merge(left, &r.left), r.right.clone()))
            }
        }
    }
}

fn remove_node<V: Clone>(
    link: &Link<V>,
    value: &V,
    comparator: &Comparator<V>,
) -> Option<Link<V>> {
    let node = link.as_ref()?;
    match comparator(value, &node.value) {
        Ordering::Less => {
            let left = remove_node(&node.left, value, comparator)?;
            Some(Some(node.with_children(left, node.right.clone())))
        }
        Ordering::Greater => {
            let right = remove_node(&node.right, value, comparator)?;
            Some(Some(node.with_children(node.left.clone(), right)))
        }
        Ordering::Equal => Some(merge(&node.left, &node.right)),
    }
}

pub struct Iter<'a, V> {
    stack: Vec<&'a Node<V>>,
    remaining: usize,
}

impl<'a, V> Iter<'a, V> {
    fn push_left(&mut self, mut link: Option<&'a Arc<Node<V>>>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = node.left.as_ref();
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_ref());
        self.remaining -= 1;
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, V> ExactSizeIterator for Iter<'a, V> {}
