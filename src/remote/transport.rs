use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value as JsonValue;

use crate::error::{internal_error, invalid_argument, WatchResult};
use crate::remote::listen::ListenRequest;
use crate::remote::serializer::JsonProtoSerializer;
use crate::remote::watch_change::{decode_listen_response, ListenResponse};

pub type StreamingFuture<'a, T> = BoxFuture<'a, T>;

pub(crate) fn box_stream_future<'a, F, T>(future: F) -> StreamingFuture<'a, T>
where
    F: std::future::Future<Output = T> + Send + 'a,
{
    future.boxed()
}

/// An open listen stream.
///
/// `next` yields decoded responses until the stream ends (`None`) or fails
/// (`Some(Err(_))`). `end` closes the stream from the client side; after it
/// returns no further events are expected.
pub trait ListenStream: Send + Sync + 'static {
    fn next(&self) -> StreamingFuture<'_, Option<WatchResult<ListenResponse>>>;
    fn end(&self);
}

/// Opens listen streams against the backend.
#[async_trait]
pub trait WatchTransport: Send + Sync + 'static {
    async fn open_listen_stream(&self, request: ListenRequest) -> WatchResult<Arc<dyn ListenStream>>;
}

/// A bidirectional stream of opaque frames, such as a WebSocket or an HTTP/2
/// stream carrying proto-JSON messages.
pub trait ByteStream: Send + Sync + 'static {
    fn send(&self, payload: Vec<u8>) -> StreamingFuture<'_, WatchResult<()>>;
    fn next(&self) -> StreamingFuture<'_, Option<WatchResult<Vec<u8>>>>;
    fn close(&self);
}

#[async_trait]
pub trait ByteStreamConnector: Send + Sync + 'static {
    async fn connect(&self) -> WatchResult<Arc<dyn ByteStream>>;
}

/// Speaks the listen protocol as proto-JSON frames over a [`ByteStream`].
pub struct JsonListenTransport {
    connector: Arc<dyn ByteStreamConnector>,
    serializer: JsonProtoSerializer,
}

impl JsonListenTransport {
    pub fn new(connector: Arc<dyn ByteStreamConnector>, serializer: JsonProtoSerializer) -> Self {
        Self {
            connector,
            serializer,
        }
    }
}

#[async_trait]
impl WatchTransport for JsonListenTransport {
    async fn open_listen_stream(&self, request: ListenRequest) -> WatchResult<Arc<dyn ListenStream>> {
        let stream = self.connector.connect().await?;
        let payload = serde_json::to_vec(&request.to_json(&self.serializer))
            .map_err(|err| internal_error(format!("Failed to encode listen request: {err}")))?;
        if let Err(err) = stream.send(payload).await {
            stream.close();
            return Err(err);
        }
        Ok(Arc::new(JsonListenStream {
            inner: stream,
            serializer: self.serializer.clone(),
        }))
    }
}

struct JsonListenStream {
    inner: Arc<dyn ByteStream>,
    serializer: JsonProtoSerializer,
}

impl ListenStream for JsonListenStream {
    fn next(&self) -> StreamingFuture<'_, Option<WatchResult<ListenResponse>>> {
        box_stream_future(async move {
            let frame = self.inner.next().await?;
            Some(frame.and_then(|payload| {
                let value: JsonValue = serde_json::from_slice(&payload).map_err(|err| {
                    invalid_argument(format!("Failed to decode listen response: {err}"))
                })?;
                decode_listen_response(&self.serializer, &value)
            }))
        })
    }

    fn end(&self) {
        self.inner.close();
    }
}
