pub mod channel;
pub mod listen;
pub mod serializer;
pub mod transport;
pub mod watch_change;

pub use channel::{ChannelServer, ChannelTransport, ServerStream};
pub use listen::{ListenRequest, ListenTarget, TargetPayload};
pub use serializer::JsonProtoSerializer;
pub use transport::{
    ByteStream, ByteStreamConnector, JsonListenTransport, ListenStream, StreamingFuture,
    WatchTransport,
};
pub use watch_change::{
    decode_listen_response, DocumentDelete, DocumentRemove, ExistenceFilter, ListenDocumentChange,
    ListenResponse, ListenTargetChange, TargetChangeState, WatchDocument,
};
