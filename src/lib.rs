#![doc = include_str!("RUSTDOC.md")]

pub mod constants;
pub mod error;
pub mod model;
pub mod platform;
pub mod remote;
pub mod settings;
pub mod util;
pub mod value;
pub mod watch;

pub use error::{WatchError, WatchErrorCode, WatchResult};
pub use model::{DatabaseId, DocumentKey, FieldPath, ResourcePath, Timestamp};
pub use remote::{ChannelServer, ChannelTransport, JsonListenTransport, WatchTransport};
pub use settings::{BackoffSettings, WatchSettings};
pub use value::FieldValue;
pub use watch::{
    DocumentChange, DocumentChangeType, DocumentSet, DocumentSnapshot, OrderDirection,
    QueryDefinition, Unsubscribe, Watch, WatchSnapshot, WatchStatus,
};
