//! In-process listen transport. Each opened stream is handed to a
//! [`ChannelServer`], which plays the backend side.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::{unavailable, WatchError, WatchResult};
use crate::remote::listen::ListenRequest;
use crate::remote::serializer::JsonProtoSerializer;
use crate::remote::transport::{box_stream_future, ListenStream, StreamingFuture, WatchTransport};
use crate::remote::watch_change::{decode_listen_response, ListenResponse};

pub struct ChannelTransport {
    sessions: Sender<ServerStream>,
    serializer: JsonProtoSerializer,
    open_failures: Mutex<VecDeque<WatchError>>,
    opened: AtomicUsize,
}

pub struct ChannelServer {
    sessions: Receiver<ServerStream>,
}

impl ChannelTransport {
    pub fn pair(serializer: JsonProtoSerializer) -> (Arc<ChannelTransport>, ChannelServer) {
        let (sessions_tx, sessions_rx) = async_channel::unbounded();
        let transport = Arc::new(ChannelTransport {
            sessions: sessions_tx,
            serializer,
            open_failures: Mutex::new(VecDeque::new()),
            opened: AtomicUsize::new(0),
        });
        (
            transport,
            ChannelServer {
                sessions: sessions_rx,
            },
        )
    }

    /// Makes the next open attempt fail with `error`. Failures queue up in
    /// call order.
    pub fn fail_next_open(&self, error: WatchError) {
        self.open_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Number of streams opened successfully.
    pub fn opened_streams(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WatchTransport for ChannelTransport {
    async fn open_listen_stream(&self, request: ListenRequest) -> WatchResult<Arc<dyn ListenStream>> {
        let failure = self
            .open_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        let (responses_tx, responses_rx) = async_channel::unbounded();
        let end_calls = Arc::new(AtomicUsize::new(0));
        let server_stream = ServerStream {
            request,
            responses: responses_tx,
            serializer: self.serializer.clone(),
            end_calls: Arc::clone(&end_calls),
        };
        self.sessions
            .send(server_stream)
            .await
            .map_err(|_| unavailable("Listen server is no longer accepting streams"))?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(ChannelListenStream {
            responses: responses_rx,
            end_calls,
        }))
    }
}

impl ChannelServer {
    /// Waits for the client to open the next stream.
    pub async fn accept(&self) -> Option<ServerStream> {
        self.sessions.recv().await.ok()
    }

    pub fn try_accept(&self) -> Option<ServerStream> {
        self.sessions.try_recv().ok()
    }
}

/// Backend side of one stream opened through a [`ChannelTransport`].
pub struct ServerStream {
    request: ListenRequest,
    responses: Sender<WatchResult<ListenResponse>>,
    serializer: JsonProtoSerializer,
    end_calls: Arc<AtomicUsize>,
}

impl ServerStream {
    pub fn request(&self) -> &ListenRequest {
        &self.request
    }

    /// Delivers a response; returns false once the client has ended the stream.
    pub fn send(&self, response: ListenResponse) -> bool {
        self.responses.try_send(Ok(response)).is_ok()
    }

    /// Delivers a proto-JSON response.
    pub fn send_json(&self, value: &JsonValue) -> WatchResult<bool> {
        let response = decode_listen_response(&self.serializer, value)?;
        Ok(self.send(response))
    }

    /// Fails the stream with `error`.
    pub fn fail(&self, error: WatchError) -> bool {
        let delivered = self.responses.try_send(Err(error)).is_ok();
        self.responses.close();
        delivered
    }

    /// Ends the stream from the server side without an error.
    pub fn finish(&self) {
        self.responses.close();
    }

    /// How many times the client called `end` on this stream.
    pub fn end_calls(&self) -> usize {
        self.end_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.responses.is_closed()
    }
}

struct ChannelListenStream {
    responses: Receiver<WatchResult<ListenResponse>>,
    end_calls: Arc<AtomicUsize>,
}

impl ListenStream for ChannelListenStream {
    fn next(&self) -> StreamingFuture<'_, Option<WatchResult<ListenResponse>>> {
        box_stream_future(async move { self.responses.recv().await.ok() })
    }

    fn end(&self) {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        self.responses.close();
    }
}
