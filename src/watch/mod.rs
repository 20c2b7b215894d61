pub mod assembler;
pub mod controller;
pub mod document;
pub mod pending;
pub mod snapshot_store;
pub mod sorted_tree;
pub mod subscription;
pub mod target;

pub use assembler::{SnapshotAssembler, WatchSnapshot};
pub use controller::WatchStatus;
pub use document::{DocumentChange, DocumentChangeType, DocumentSnapshot, DocumentSnapshotBuilder};
pub use snapshot_store::{DocumentSet, OrderedSnapshotStore};
pub use subscription::{Unsubscribe, Watch};
pub use target::{
    key_comparator, DocumentComparator, DocumentTarget, FieldFilter, FilterOperator, OrderBy,
    OrderDirection, QueryDefinition, QueryTarget, WatchTarget,
};
