//! Drives one watch: a synchronous state machine that folds listen
//! responses into snapshots, and the async loop that owns the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::constants::WATCH_TARGET_ID;
use crate::error::{internal_error, unknown, WatchError, WatchErrorCode, WatchResult};
use crate::model::Timestamp;
use crate::remote::listen::ListenRequest;
use crate::remote::serializer::JsonProtoSerializer;
use crate::remote::transport::{ListenStream, WatchTransport};
use crate::remote::watch_change::{
    ListenDocumentChange, ListenResponse, ListenTargetChange, TargetChangeState,
};
use crate::settings::BackoffSettings;
use crate::util::backoff::ExponentialBackoff;
use crate::util::subscribe::PartialObserver;
use crate::watch::assembler::{SnapshotAssembler, WatchSnapshot};
use crate::watch::document::DocumentSnapshotBuilder;
use crate::watch::pending::PendingChangeMap;
use crate::watch::target::WatchTarget;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchStatus {
    /// No subscriber yet.
    Idle,
    /// Waiting out the backoff delay or opening a stream.
    Connecting,
    Streaming,
    /// The stream failed or ended; deciding whether to reconnect.
    Interrupted,
    Closed,
}

/// What the stream loop should do after a response or failure.
#[derive(Debug)]
pub(crate) enum StreamAction {
    Continue,
    Emit(WatchSnapshot),
    Reconnect,
    Close(WatchError),
}

pub(crate) struct WatchState {
    tag: String,
    assembler: SnapshotAssembler,
    pending: PendingChangeMap,
    backoff: ExponentialBackoff,
    resume_token: Option<Vec<u8>>,
    current: bool,
}

impl WatchState {
    pub(crate) fn new(tag: String, target: &dyn WatchTarget, backoff: BackoffSettings) -> Self {
        Self {
            tag,
            assembler: SnapshotAssembler::new(target.comparator()),
            pending: PendingChangeMap::new(),
            backoff: ExponentialBackoff::new(backoff),
            resume_token: None,
            current: false,
        }
    }

    pub(crate) fn listen_request(
        &self,
        target: &dyn WatchTarget,
        serializer: &JsonProtoSerializer,
    ) -> WatchResult<ListenRequest> {
        let listen_target = target.listen_target(serializer, self.resume_token.as_deref())?;
        Ok(ListenRequest::new(serializer.database_name(), listen_target))
    }

    pub(crate) fn backoff_mut(&mut self) -> &mut ExponentialBackoff {
        &mut self.backoff
    }

    pub(crate) fn handle_response(&mut self, response: ListenResponse) -> StreamAction {
        match response {
            ListenResponse::TargetChange(change) => {
                let action = self.handle_target_change(&change);
                if change.resume_token.is_some() && change.affects_target(WATCH_TARGET_ID) {
                    self.backoff.reset();
                }
                action
            }
            ListenResponse::DocumentChange(change) => {
                self.handle_document_change(change);
                StreamAction::Continue
            }
            ListenResponse::DocumentDelete(delete) => {
                self.pending.record_removed(delete.key);
                StreamAction::Continue
            }
            ListenResponse::DocumentRemove(remove) => {
                self.pending.record_removed(remove.key);
                StreamAction::Continue
            }
            ListenResponse::Filter(filter) => {
                let expected = self.assembler.current_size(&self.pending);
                if i64::from(filter.count) != expected as i64 {
                    log::debug!(
                        "[{}] existence filter mismatch: backend has {}, local view has {expected}; resetting",
                        self.tag,
                        filter.count
                    );
                    self.reset_docs();
                    StreamAction::Reconnect
                } else {
                    StreamAction::Continue
                }
            }
            ListenResponse::Unknown(value) => StreamAction::Close(internal_error(format!(
                "Unknown listen response type: {value}"
            ))),
        }
    }

    fn handle_target_change(&mut self, change: &ListenTargetChange) -> StreamAction {
        match &change.state {
            TargetChangeState::NoChange => match change.read_time {
                Some(read_time) if change.target_ids.is_empty() && self.current => {
                    self.push_snapshot(read_time, change.resume_token.clone())
                }
                _ => StreamAction::Continue,
            },
            TargetChangeState::Add => {
                if change.target_ids.first() != Some(&WATCH_TARGET_ID) {
                    return StreamAction::Close(internal_error(
                        "Unexpected target ID sent by server",
                    ));
                }
                StreamAction::Continue
            }
            TargetChangeState::Remove => {
                let cause = change.cause.as_ref();
                let code = cause
                    .and_then(WatchError::code)
                    .filter(|code| *code != WatchErrorCode::Ok)
                    .unwrap_or(WatchErrorCode::Internal);
                let message = cause
                    .map(WatchError::message)
                    .filter(|message| !message.is_empty())
                    .unwrap_or("internal error");
                StreamAction::Close(WatchError::new(code, message))
            }
            TargetChangeState::Current => {
                self.current = true;
                StreamAction::Continue
            }
            TargetChangeState::Reset => {
                self.reset_docs();
                StreamAction::Continue
            }
            TargetChangeState::Unrecognized(kind) => StreamAction::Close(internal_error(format!(
                "Unknown target change type: {kind}"
            ))),
        }
    }

    fn handle_document_change(&mut self, change: ListenDocumentChange) {
        if change.target_ids.contains(&WATCH_TARGET_ID) {
            let document = change.document;
            let builder = DocumentSnapshotBuilder::new(document.key.clone())
                .fields(document.fields)
                .create_time(document.create_time)
                .update_time(document.update_time);
            self.pending.record_add(document.key, builder);
        } else if change.removed_target_ids.contains(&WATCH_TARGET_ID) {
            self.pending.record_removed(change.document.key);
        }
    }

    fn push_snapshot(
        &mut self,
        read_time: Timestamp,
        next_resume_token: Option<Vec<u8>>,
    ) -> StreamAction {
        match self.assembler.push_snapshot(&mut self.pending, read_time) {
            Ok(snapshot) => {
                self.resume_token = next_resume_token;
                match snapshot {
                    Some(snapshot) => StreamAction::Emit(snapshot),
                    None => StreamAction::Continue,
                }
            }
            Err(err) => StreamAction::Close(err),
        }
    }

    /// Forgets the resume token and schedules every held document for
    /// removal, so the next snapshot reflects only what the backend resends.
    fn reset_docs(&mut self) {
        self.pending.clear();
        self.resume_token = None;
        for key in self.assembler.store().keys() {
            self.pending.record_removed(key.clone());
        }
        self.current = false;
    }

    /// Decides between reconnecting and giving up after the stream failed,
    /// ended, or could not be opened.
    pub(crate) fn handle_stream_failure(&mut self, error: WatchError, active: bool) -> StreamAction {
        if active && !error.is_permanent() {
            log::debug!(
                "[{}] stream interrupted, reopening after retryable error: {error}",
                self.tag
            );
            self.pending.clear();
            if error.is_resource_exhausted() {
                self.backoff.reset_to_max();
            }
            StreamAction::Reconnect
        } else {
            StreamAction::Close(error)
        }
    }

    #[cfg(test)]
    pub(crate) fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    #[cfg(test)]
    pub(crate) fn resume_token(&self) -> Option<&[u8]> {
        self.resume_token.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn is_current(&self) -> bool {
        self.current
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &PendingChangeMap {
        &self.pending
    }
}

struct StreamSlot {
    generation: u64,
    handle: Option<Arc<dyn ListenStream>>,
}

/// State shared between a subscription handle and its stream loop.
pub(crate) struct WatchShared {
    tag: String,
    active: AtomicBool,
    observer: Mutex<Option<PartialObserver<WatchSnapshot>>>,
    stream: Mutex<StreamSlot>,
    status: Mutex<WatchStatus>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WatchShared {
    pub(crate) fn new(tag: String) -> Self {
        Self {
            tag,
            active: AtomicBool::new(false),
            observer: Mutex::new(None),
            stream: Mutex::new(StreamSlot {
                generation: 0,
                handle: None,
            }),
            status: Mutex::new(WatchStatus::Idle),
        }
    }

    pub(crate) fn tag(&self) -> &str {
        &self.tag
    }

    pub(crate) fn activate(&self, observer: PartialObserver<WatchSnapshot>) {
        *lock(&self.observer) = Some(observer);
        self.active.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn status(&self) -> WatchStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: WatchStatus) {
        let mut guard = lock(&self.status);
        if *guard != WatchStatus::Closed {
            *guard = status;
        }
    }

    /// Makes `handle` the current stream. Returns `None` when the watch is no
    /// longer active; the caller still owns the handle then.
    fn install_stream(&self, handle: Arc<dyn ListenStream>) -> Option<u64> {
        let mut slot = lock(&self.stream);
        if !self.is_active() {
            return None;
        }
        slot.generation += 1;
        slot.handle = Some(handle);
        Some(slot.generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        let slot = lock(&self.stream);
        slot.generation == generation && slot.handle.is_some()
    }

    /// Ends the stream of `generation` if it is still current.
    fn release_stream(&self, generation: u64) {
        let handle = {
            let mut slot = lock(&self.stream);
            if slot.generation != generation {
                return;
            }
            slot.handle.take()
        };
        if let Some(handle) = handle {
            handle.end();
        }
    }

    fn release_current_stream(&self) {
        let handle = lock(&self.stream).handle.take();
        if let Some(handle) = handle {
            handle.end();
        }
    }

    fn emit(&self, snapshot: &WatchSnapshot) {
        let next = lock(&self.observer)
            .as_ref()
            .and_then(|observer| observer.next.clone());
        if let Some(next) = next {
            if self.is_active() {
                next(snapshot);
            }
        }
    }

    /// Terminates the watch with `error`. The error callback runs at most
    /// once over the lifetime of the watch.
    fn close_with_error(&self, error: WatchError) {
        self.release_current_stream();
        self.set_status(WatchStatus::Closed);
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        log::warn!("[{}] watch closed: {error}", self.tag);
        let observer = lock(&self.observer).take();
        if let Some(on_error) = observer.and_then(|observer| observer.error) {
            on_error(&error);
        }
    }

    /// Stops the watch on behalf of the subscriber. Safe to call repeatedly.
    pub(crate) fn shutdown(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            log::debug!("[{}] unsubscribed", self.tag);
        }
        lock(&self.observer).take();
        self.release_current_stream();
        self.set_status(WatchStatus::Closed);
    }
}

enum Flow {
    Reconnect,
    Stop,
}

/// Runs until the watch is closed, reconnecting with backoff after
/// retryable failures.
pub(crate) async fn run_watch(
    shared: Arc<WatchShared>,
    mut state: WatchState,
    transport: Arc<dyn WatchTransport>,
    target: Arc<dyn WatchTarget>,
    serializer: JsonProtoSerializer,
) {
    log::debug!("[{}] watching {}", shared.tag(), target.describe());
    loop {
        shared.set_status(WatchStatus::Connecting);
        if let Err(err) = state.backoff_mut().back_off().await {
            shared.close_with_error(err);
            break;
        }
        if !shared.is_active() {
            log::debug!("[{}] not opening stream for inactive watch", shared.tag());
            break;
        }

        let request = match state.listen_request(target.as_ref(), &serializer) {
            Ok(request) => request,
            Err(err) => {
                shared.close_with_error(err);
                break;
            }
        };

        let stream = match transport.open_listen_stream(request).await {
            Ok(stream) => stream,
            Err(err) => {
                log::debug!("[{}] failed to open listen stream: {err}", shared.tag());
                if let StreamAction::Close(err) = state.handle_stream_failure(err, shared.is_active()) {
                    shared.close_with_error(err);
                    break;
                }
                continue;
            }
        };

        let Some(generation) = shared.install_stream(Arc::clone(&stream)) else {
            stream.end();
            break;
        };
        shared.set_status(WatchStatus::Streaming);
        log::debug!("[{}] listen stream opened", shared.tag());

        match pump_stream(&shared, &mut state, generation, stream).await {
            Flow::Reconnect => continue,
            Flow::Stop => break,
        }
    }
    shared.set_status(WatchStatus::Closed);
    log::debug!("[{}] watch loop finished", shared.tag());
}

async fn pump_stream(
    shared: &WatchShared,
    state: &mut WatchState,
    generation: u64,
    stream: Arc<dyn ListenStream>,
) -> Flow {
    loop {
        let event = stream.next().await;
        if !shared.is_current(generation) {
            log::debug!("[{}] ignoring event from a closed stream", shared.tag());
            return Flow::Stop;
        }

        let action = match event {
            Some(Ok(response)) => state.handle_response(response),
            Some(Err(err)) => {
                shared.release_stream(generation);
                shared.set_status(WatchStatus::Interrupted);
                state.handle_stream_failure(err, shared.is_active())
            }
            None => {
                shared.release_stream(generation);
                shared.set_status(WatchStatus::Interrupted);
                state.handle_stream_failure(unknown("Stream ended unexpectedly"), shared.is_active())
            }
        };

        match action {
            StreamAction::Continue => {}
            StreamAction::Emit(snapshot) => shared.emit(&snapshot),
            StreamAction::Reconnect => {
                shared.release_stream(generation);
                return Flow::Reconnect;
            }
            StreamAction::Close(err) => {
                shared.close_with_error(err);
                return Flow::Stop;
            }
        }
    }
}
