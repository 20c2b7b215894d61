use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use firestore_watch::remote::{ChannelServer, ChannelTransport, JsonProtoSerializer, ServerStream};
use firestore_watch::{
    BackoffSettings, DatabaseId, DocumentChangeType, DocumentKey, OrderDirection,
    QueryDefinition, Unsubscribe, Watch, WatchError, WatchErrorCode, WatchSettings, WatchSnapshot,
    WatchStatus,
};
use serde_json::{json, Value};

const ROOT: &str = "projects/watch-tests/databases/(default)/documents";
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Event {
    Snapshot(WatchSnapshot),
    Error(WatchError),
}

struct Harness {
    watch: Watch,
    transport: Arc<ChannelTransport>,
    server: ChannelServer,
    events: Receiver<Event>,
    unsubscribe: Unsubscribe,
}

fn database() -> DatabaseId {
    DatabaseId::default("watch-tests")
}

fn settings() -> WatchSettings {
    WatchSettings::new(database()).with_backoff(
        BackoffSettings::default()
            .with_initial_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20))
            .with_jitter_factor(0.0),
    )
}

fn start_with(query: QueryDefinition, settings: WatchSettings) -> Harness {
    let (transport, server) = ChannelTransport::pair(JsonProtoSerializer::new(database()));
    let watch = Watch::for_query(transport.clone(), settings, query);
    let (tx, events) = async_channel::unbounded();
    let error_tx = tx.clone();
    let unsubscribe = watch.on_snapshot(
        move |snapshot| {
            let _ = tx.try_send(Event::Snapshot(snapshot.clone()));
        },
        move |error| {
            let _ = error_tx.try_send(Event::Error(error.clone()));
        },
    );
    Harness {
        watch,
        transport,
        server,
        events,
        unsubscribe,
    }
}

fn start(query: QueryDefinition) -> Harness {
    start_with(query, settings())
}

fn collection() -> QueryDefinition {
    QueryDefinition::collection("col").unwrap()
}

impl Harness {
    async fn accept(&self) -> ServerStream {
        tokio::time::timeout(TIMEOUT, self.server.accept())
            .await
            .expect("stream opened in time")
            .expect("transport alive")
    }

    async fn next_event(&self) -> Event {
        tokio::time::timeout(TIMEOUT, self.events.recv())
            .await
            .expect("event delivered in time")
            .expect("event channel open")
    }

    async fn next_snapshot(&self) -> WatchSnapshot {
        match self.next_event().await {
            Event::Snapshot(snapshot) => snapshot,
            Event::Error(error) => panic!("unexpected error: {error}"),
        }
    }

    async fn next_error(&self) -> WatchError {
        match self.next_event().await {
            Event::Error(error) => error,
            Event::Snapshot(snapshot) => panic!("unexpected snapshot: {snapshot:?}"),
        }
    }

    async fn assert_quiet(&self) {
        let waited = tokio::time::timeout(Duration::from_millis(100), self.events.recv()).await;
        assert!(waited.is_err(), "unexpected event: {waited:?}");
    }
}

fn add(id: &str, update_seconds: i64, fields: Value) -> Value {
    json!({
        "documentChange": {
            "targetIds": [1],
            "document": {
                "name": format!("{ROOT}/col/{id}"),
                "fields": fields,
                "createTime": "2024-01-01T00:00:00Z",
                "updateTime": { "seconds": update_seconds }
            }
        }
    })
}

fn delete(id: &str) -> Value {
    json!({ "documentDelete": { "document": format!("{ROOT}/col/{id}") } })
}

fn current() -> Value {
    json!({ "targetChange": { "targetChangeType": "CURRENT", "targetIds": [1] } })
}

fn no_change(seconds: i64, token: &str) -> Value {
    json!({
        "targetChange": {
            "targetChangeType": "NO_CHANGE",
            "readTime": { "seconds": seconds },
            "resumeToken": token
        }
    })
}

fn send_all(stream: &ServerStream, frames: &[Value]) {
    for frame in frames {
        assert!(stream.send_json(frame).unwrap(), "client closed the stream");
    }
}

fn ids(snapshot: &WatchSnapshot) -> Vec<String> {
    snapshot
        .documents()
        .ordered_keys()
        .map(|key| key.id().to_string())
        .collect()
}

fn replay(previous: &mut Vec<DocumentKey>, snapshot: &WatchSnapshot) {
    for change in snapshot.changes() {
        let key = change.document().key().clone();
        match change.change_type() {
            DocumentChangeType::Removed => {
                let old = change.old_index().unwrap();
                assert_eq!(previous.remove(old), key);
            }
            DocumentChangeType::Added => {
                previous.insert(change.new_index().unwrap(), key);
            }
            DocumentChangeType::Modified => {
                let old = change.old_index().unwrap();
                assert_eq!(previous.remove(old), key);
                previous.insert(change.new_index().unwrap(), key);
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn snapshot_lists_documents_in_comparator_order() {
    let query = collection()
        .order_by("rank", OrderDirection::Ascending)
        .unwrap();
    let harness = start(query);
    let stream = harness.accept().await;

    send_all(
        &stream,
        &[
            add("x", 1, json!({ "rank": { "integerValue": "3" } })),
            add("y", 1, json!({ "rank": { "integerValue": "1" } })),
            add("z", 1, json!({ "rank": { "integerValue": "2" } })),
            add("w", 1, json!({ "rank": { "integerValue": "9" } })),
            delete("w"),
            current(),
            no_change(1, "AQ=="),
        ],
    );

    let snapshot = harness.next_snapshot().await;
    assert_eq!(ids(&snapshot), vec!["y", "z", "x"]);
    assert_eq!(snapshot.size(), 3);
    assert!(snapshot
        .changes()
        .iter()
        .all(|change| change.change_type() == DocumentChangeType::Added));
    assert_eq!(harness.watch.status(), WatchStatus::Streaming);
    harness.unsubscribe.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn change_lists_replay_to_reported_order() {
    let harness = start(collection());
    let stream = harness.accept().await;
    let mut replayed: Vec<DocumentKey> = Vec::new();

    send_all(
        &stream,
        &[
            add("d", 1, json!({})),
            add("b", 1, json!({})),
            add("a", 1, json!({})),
            current(),
            no_change(1, "AQ=="),
        ],
    );
    let first = harness.next_snapshot().await;
    replay(&mut replayed, &first);
    assert_eq!(replayed, first.documents().ordered_keys().cloned().collect::<Vec<_>>());

    send_all(
        &stream,
        &[
            delete("b"),
            add("c", 2, json!({})),
            add("a", 2, json!({})),
            add("e", 2, json!({})),
            no_change(2, "Ag=="),
        ],
    );
    let second = harness.next_snapshot().await;
    replay(&mut replayed, &second);
    assert_eq!(ids(&second), vec!["a", "c", "d", "e"]);
    assert_eq!(replayed, second.documents().ordered_keys().cloned().collect::<Vec<_>>());
    // The earlier snapshot is unaffected by later changes.
    assert_eq!(ids(&first), vec!["a", "b", "d"]);
    harness.unsubscribe.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn only_the_first_empty_snapshot_is_delivered() {
    let harness = start(collection());
    let stream = harness.accept().await;

    send_all(&stream, &[current(), no_change(1, "AQ==")]);
    let first = harness.next_snapshot().await;
    assert!(first.is_empty());
    assert!(first.changes().is_empty());

    send_all(&stream, &[no_change(2, "Ag=="), no_change(3, "Aw==")]);
    harness.assert_quiet().await;

    send_all(&stream, &[add("a", 1, json!({})), no_change(4, "BA==")]);
    let next = harness.next_snapshot().await;
    assert_eq!(ids(&next), vec!["a"]);
    assert_eq!(next.changes().len(), 1);
    harness.unsubscribe.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_update_time_is_not_reported_and_removal_keeps_old_index() {
    let harness = start(collection());
    let stream = harness.accept().await;

    send_all(
        &stream,
        &[
            add("docA", 1, json!({})),
            add("docB", 1, json!({})),
            current(),
            no_change(1, "AQ=="),
        ],
    );
    let first = harness.next_snapshot().await;
    assert_eq!(first.changes().len(), 2);
    assert_eq!(ids(&first), vec!["docA", "docB"]);

    send_all(
        &stream,
        &[add("docA", 1, json!({ "n": { "integerValue": "1" } })), current(), no_change(2, "Ag==")],
    );
    harness.assert_quiet().await;

    send_all(&stream, &[delete("docB"), current(), no_change(3, "Aw==")]);
    let removal = harness.next_snapshot().await;
    assert_eq!(removal.changes().len(), 1);
    let change = &removal.changes()[0];
    assert_eq!(change.change_type(), DocumentChangeType::Removed);
    assert_eq!(change.document().id(), "docB");
    assert_eq!(change.old_index(), Some(1));
    assert_eq!(change.new_index(), None);
    harness.unsubscribe.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_followed_by_identical_documents_reports_nothing() {
    let harness = start(collection());
    let stream = harness.accept().await;

    send_all(
        &stream,
        &[
            add("a", 1, json!({})),
            add("b", 1, json!({})),
            current(),
            no_change(1, "AQ=="),
        ],
    );
    harness.next_snapshot().await;

    send_all(
        &stream,
        &[
            json!({ "targetChange": { "targetChangeType": "RESET", "targetIds": [1] } }),
            add("a", 1, json!({})),
            add("b", 1, json!({})),
            current(),
            no_change(2, "Ag=="),
        ],
    );
    harness.assert_quiet().await;

    // A real change after the reset is still reported.
    send_all(&stream, &[add("c", 1, json!({})), no_change(3, "Aw==")]);
    let snapshot = harness.next_snapshot().await;
    assert_eq!(ids(&snapshot), vec!["a", "b", "c"]);
    assert_eq!(snapshot.changes().len(), 1);
    harness.unsubscribe.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn double_unsubscribe_closes_the_stream_once() {
    let harness = start(collection());
    let stream = harness.accept().await;
    send_all(&stream, &[current(), no_change(1, "AQ==")]);
    harness.next_snapshot().await;

    harness.unsubscribe.unsubscribe();
    harness.unsubscribe.clone().unsubscribe();

    assert_eq!(stream.end_calls(), 1);
    assert!(!harness.unsubscribe.is_active());
    assert_eq!(harness.watch.status(), WatchStatus::Closed);
    assert!(!stream.send_json(&no_change(2, "Ag==")).unwrap());
    harness.assert_quiet().await;
    assert_eq!(harness.transport.opened_streams(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_errors_reconnect_with_resume_token() {
    let harness = start(collection());
    let stream = harness.accept().await;
    assert!(stream.request().target().resume_token().is_none());

    send_all(&stream, &[add("a", 1, json!({})), current(), no_change(1, "BQY=")]);
    harness.next_snapshot().await;

    // Pending changes are dropped with the failed stream.
    send_all(&stream, &[add("b", 1, json!({}))]);
    stream.fail(WatchError::new(WatchErrorCode::Unavailable, "connection reset"));

    let reopened = harness.accept().await;
    assert_eq!(reopened.request().target().resume_token(), Some(&[5u8, 6][..]));
    assert_eq!(stream.end_calls(), 1);

    send_all(&reopened, &[current(), no_change(2, "Bw==")]);
    harness.assert_quiet().await;

    send_all(&reopened, &[add("c", 1, json!({})), no_change(3, "CA==")]);
    let snapshot = harness.next_snapshot().await;
    assert_eq!(ids(&snapshot), vec!["a", "c"]);
    harness.unsubscribe.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn server_end_reconnects() {
    let harness = start(collection());
    let stream = harness.accept().await;
    stream.finish();

    let reopened = harness.accept().await;
    send_all(&reopened, &[current(), no_change(1, "AQ==")]);
    assert!(harness.next_snapshot().await.is_empty());
    assert_eq!(harness.transport.opened_streams(), 2);
    harness.unsubscribe.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn existence_filter_mismatch_restarts_without_resume_token() {
    let harness = start(collection());
    let stream = harness.accept().await;
    send_all(
        &stream,
        &[
            add("a", 1, json!({})),
            add("b", 1, json!({})),
            current(),
            no_change(1, "AQ=="),
        ],
    );
    harness.next_snapshot().await;

    send_all(&stream, &[json!({ "filter": { "targetId": 1, "count": 1 } })]);
    let reopened = harness.accept().await;
    assert!(reopened.request().target().resume_token().is_none());
    assert_eq!(stream.end_calls(), 1);

    send_all(&reopened, &[add("a", 1, json!({})), current(), no_change(2, "Ag==")]);
    let snapshot = harness.next_snapshot().await;
    assert_eq!(ids(&snapshot), vec!["a"]);
    assert_eq!(snapshot.changes().len(), 1);
    assert_eq!(snapshot.changes()[0].change_type(), DocumentChangeType::Removed);
    harness.unsubscribe.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn target_removal_surfaces_error_once() {
    let harness = start(collection());
    let stream = harness.accept().await;

    send_all(
        &stream,
        &[json!({
            "targetChange": {
                "targetChangeType": "REMOVE",
                "targetIds": [1],
                "cause": { "code": 7, "message": "Missing or insufficient permissions." }
            }
        })],
    );
    let error = harness.next_error().await;
    assert_eq!(error.code(), Some(WatchErrorCode::PermissionDenied));
    assert_eq!(error.message(), "Missing or insufficient permissions.");

    assert_eq!(stream.end_calls(), 1);
    assert!(!harness.unsubscribe.is_active());
    harness.assert_quiet().await;

    // Unsubscribing after the error has no further effect.
    harness.unsubscribe.unsubscribe();
    assert_eq!(stream.end_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn permanent_stream_error_stops_the_watch() {
    let harness = start(collection());
    let stream = harness.accept().await;
    stream.fail(WatchError::new(WatchErrorCode::InvalidArgument, "bad query"));

    let error = harness.next_error().await;
    assert_eq!(error.code(), Some(WatchErrorCode::InvalidArgument));
    harness.assert_quiet().await;
    assert!(harness.server.try_accept().is_none());
    assert_eq!(harness.watch.status(), WatchStatus::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_frames_are_fatal() {
    let harness = start(collection());
    let stream = harness.accept().await;
    send_all(&stream, &[json!({ "somethingNew": {} })]);

    let error = harness.next_error().await;
    assert!(error.message().starts_with("Unknown listen response type"));
    assert!(harness.server.try_accept().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn open_failures_are_retried_until_the_budget_runs_out() {
    let settings = WatchSettings::new(database()).with_backoff(
        BackoffSettings::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_jitter_factor(0.0)
            .with_max_attempts(Some(2)),
    );
    let (transport, _server) = ChannelTransport::pair(JsonProtoSerializer::new(database()));
    for _ in 0..3 {
        transport.fail_next_open(WatchError::new(WatchErrorCode::Unavailable, "offline"));
    }
    let watch = Watch::for_query(transport.clone(), settings, collection());
    let (tx, errors) = async_channel::unbounded();
    let _unsubscribe = watch.on_snapshot(
        |_| {},
        move |error| {
            let _ = tx.try_send(error.clone());
        },
    );

    let error = tokio::time::timeout(TIMEOUT, errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error.code(), Some(WatchErrorCode::Unavailable));
    assert_eq!(error.message(), "Exceeded maximum number of retries allowed.");
    assert_eq!(transport.opened_streams(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn resource_exhaustion_waits_for_the_maximum_delay() {
    let settings = WatchSettings::new(database()).with_backoff(
        BackoffSettings::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(300))
            .with_jitter_factor(0.0),
    );
    let harness = start_with(collection(), settings);
    let stream = harness.accept().await;

    stream.fail(WatchError::new(WatchErrorCode::ResourceExhausted, "quota"));
    let failed_at = tokio::time::Instant::now();
    let reopened = harness.accept().await;
    assert!(failed_at.elapsed() >= Duration::from_millis(250));

    // A resume token for the target resets the backoff, so the next
    // reconnect is immediate.
    send_all(&reopened, &[current(), no_change(1, "AQ==")]);
    harness.next_snapshot().await;
    reopened.fail(WatchError::new(WatchErrorCode::Unavailable, "blip"));
    let failed_at = tokio::time::Instant::now();
    harness.accept().await;
    assert!(failed_at.elapsed() < Duration::from_millis(250));
    harness.unsubscribe.unsubscribe();
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribe_during_backoff_opens_no_new_stream() {
    let settings = WatchSettings::new(database()).with_backoff(
        BackoffSettings::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(300))
            .with_jitter_factor(0.0),
    );
    let harness = start_with(collection(), settings);
    let stream = harness.accept().await;

    stream.fail(WatchError::new(WatchErrorCode::ResourceExhausted, "quota"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.unsubscribe.unsubscribe();
    assert_eq!(harness.watch.status(), WatchStatus::Closed);

    // Outlast the backoff wait.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(harness.server.try_accept().is_none());
    assert_eq!(harness.transport.opened_streams(), 1);
    assert_eq!(harness.watch.status(), WatchStatus::Closed);
    harness.assert_quiet().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn document_watch_reports_single_document() {
    let (transport, server) = ChannelTransport::pair(JsonProtoSerializer::new(database()));
    let key = DocumentKey::from_string("col/only").unwrap();
    let watch = Watch::for_document(transport, settings(), key.clone());
    let (tx, snapshots) = async_channel::unbounded();
    let unsubscribe = watch.on_snapshot(
        move |snapshot| {
            let _ = tx.try_send(snapshot.clone());
        },
        |_| {},
    );

    let stream = tokio::time::timeout(TIMEOUT, server.accept())
        .await
        .unwrap()
        .unwrap();
    let request = stream.request().to_json(&JsonProtoSerializer::new(database()));
    assert_eq!(
        request["addTarget"]["documents"]["documents"][0],
        format!("{ROOT}/col/only")
    );

    send_all(
        &stream,
        &[
            add("only", 1, json!({ "name": { "stringValue": "solo" } })),
            current(),
            no_change(1, "AQ=="),
        ],
    );
    let snapshot = tokio::time::timeout(TIMEOUT, snapshots.recv())
        .await
        .unwrap()
        .unwrap();
    let document = snapshot.documents().get(0).unwrap();
    assert_eq!(document.key(), &key);
    assert_eq!(document.to_json().unwrap(), json!({ "name": "solo" }));
    assert_eq!(document.read_time(), Some(snapshot.read_time()));
    unsubscribe.unsubscribe();
}
