use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::error::WatchError;
use crate::model::DocumentKey;
use crate::platform::runtime;
use crate::remote::serializer::JsonProtoSerializer;
use crate::remote::transport::WatchTransport;
use crate::settings::WatchSettings;
use crate::util::assert;
use crate::util::subscribe::PartialObserver;
use crate::watch::assembler::WatchSnapshot;
use crate::watch::controller::{run_watch, WatchShared, WatchState, WatchStatus};
use crate::watch::target::{DocumentTarget, QueryDefinition, QueryTarget, WatchTarget};

const REQUEST_TAG_LENGTH: usize = 5;

/// A live query or document listener.
///
/// Nothing is sent to the backend until [`on_snapshot`](Self::on_snapshot)
/// is called. A watch accepts exactly one subscriber.
pub struct Watch {
    target: Arc<dyn WatchTarget>,
    transport: Arc<dyn WatchTransport>,
    settings: WatchSettings,
    shared: Arc<WatchShared>,
    subscribed: AtomicBool,
}

impl Watch {
    pub fn new(
        transport: Arc<dyn WatchTransport>,
        settings: WatchSettings,
        target: impl WatchTarget,
    ) -> Self {
        Self {
            target: Arc::new(target),
            transport,
            settings,
            shared: Arc::new(WatchShared::new(generate_request_tag())),
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn for_document(
        transport: Arc<dyn WatchTransport>,
        settings: WatchSettings,
        key: DocumentKey,
    ) -> Self {
        Self::new(transport, settings, DocumentTarget::new(key))
    }

    pub fn for_query(
        transport: Arc<dyn WatchTransport>,
        settings: WatchSettings,
        query: QueryDefinition,
    ) -> Self {
        Self::new(transport, settings, QueryTarget::new(query))
    }

    /// Random tag prefixed to every log line of this watch.
    pub fn request_tag(&self) -> &str {
        self.shared.tag()
    }

    pub fn status(&self) -> WatchStatus {
        self.shared.status()
    }

    /// Starts listening. `on_next` receives every snapshot; `on_error` is
    /// called at most once, after which no callback fires again.
    ///
    /// # Panics
    ///
    /// Panics when called more than once on the same watch.
    pub fn on_snapshot<N, E>(&self, on_next: N, on_error: E) -> Unsubscribe
    where
        N: Fn(&WatchSnapshot) + Send + Sync + 'static,
        E: Fn(&WatchError) + Send + Sync + 'static,
    {
        self.listen(
            PartialObserver::new()
                .with_next(on_next)
                .with_error(on_error),
        )
    }

    /// Like [`on_snapshot`](Self::on_snapshot), with optional callbacks.
    pub fn listen(&self, observer: PartialObserver<WatchSnapshot>) -> Unsubscribe {
        assert(
            !self.subscribed.swap(true, Ordering::SeqCst),
            "on_snapshot() may only be called once per watch",
        );

        self.shared.activate(observer);
        let state = WatchState::new(
            self.shared.tag().to_string(),
            self.target.as_ref(),
            self.settings.backoff().clone(),
        );
        let serializer = JsonProtoSerializer::new(self.settings.database_id().clone());
        runtime::spawn_detached(run_watch(
            Arc::clone(&self.shared),
            state,
            Arc::clone(&self.transport),
            Arc::clone(&self.target),
            serializer,
        ));

        Unsubscribe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("request_tag", &self.request_tag())
            .field("target", &self.target.describe())
            .field("status", &self.status())
            .finish()
    }
}

/// Handle returned by [`Watch::on_snapshot`]. Dropping it leaves the watch
/// running; call [`unsubscribe`](Self::unsubscribe) to stop it.
#[derive(Clone)]
pub struct Unsubscribe {
    shared: Arc<WatchShared>,
}

impl Unsubscribe {
    /// Stops the watch and closes its stream. Further calls do nothing.
    pub fn unsubscribe(&self) {
        self.shared.shutdown();
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("request_tag", &self.shared.tag())
            .field("active", &self.is_active())
            .finish()
    }
}

fn generate_request_tag() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(REQUEST_TAG_LENGTH)
        .collect()
}
