use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use dlbridge_core::engine::http::{HttpEngine, HttpEngineConfig};
use dlbridge_core::engine::store::DownloadStore;
use dlbridge_core::engine::{DownloadEngine, DownloadObserver, DownloadRecord, ObserverHandle};
use dlbridge_core::error::EngineError;
use dlbridge_core::extras::{ExtraValue, Extras};
use dlbridge_core::session::SessionRequest;
use dlbridge_core::types::{FailureKind, Notification, Reason, Status};

/// Generates deterministic test data.
fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Answers `Range: bytes=N-` with 206 and the tail of the body, anything else
/// with 200 and the whole body.
struct RangeResponder {
    body: Vec<u8>,
}

impl wiremock::Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let start = request
            .headers
            .get(&reqwest::header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.trim_end_matches('-').parse::<usize>().ok());
        match start {
            Some(start) if start < self.body.len() => ResponseTemplate::new(206)
                .set_body_bytes(self.body[start..].to_vec())
                .insert_header(
                    "Content-Range",
                    format!("bytes {}-{}/{}", start, self.body.len() - 1, self.body.len()),
                ),
            _ => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

struct ChannelObserver {
    handle: ObserverHandle,
    tx: mpsc::UnboundedSender<Notification>,
}

impl DownloadObserver for ChannelObserver {
    fn handle(&self) -> ObserverHandle {
        self.handle
    }

    fn on_changed(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

fn observe(engine: &HttpEngine, id: i32) -> mpsc::UnboundedReceiver<Notification> {
    let (tx, rx) = mpsc::unbounded_channel();
    engine
        .observe(
            id,
            Arc::new(ChannelObserver {
                handle: ObserverHandle::new(),
                tx,
            }),
        )
        .unwrap();
    rx
}

/// Collect notifications until one has `status`, returning all of them.
async fn collect_until(rx: &mut mpsc::UnboundedReceiver<Notification>, status: Status) -> Vec<Notification> {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        while let Some(n) = rx.recv().await {
            let done = n.status == status;
            seen.push(n);
            if done {
                return seen;
            }
        }
        panic!("observer channel closed before {:?}", status);
    })
    .await
    .expect("timed out waiting for notification")
}

fn config(dir: &Path) -> HttpEngineConfig {
    HttpEngineConfig::new("http-test")
        .with_state_path(dir.join("state.json"))
        .with_progress_interval(Duration::ZERO)
}

#[tokio::test]
async fn test_download_completes_with_ordered_notifications() {
    let body = generate_test_data(64 * 1024);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("movies").join("movie.bin");
    let request = SessionRequest::new(format!("{}/movie.bin", server.uri()), destination.to_string_lossy());
    let engine = HttpEngine::open(config(dir.path())).await.unwrap();

    let mut rx = observe(&engine, request.id);
    let session = engine.enqueue(request.clone()).await.unwrap();
    assert_eq!(session.id, request.id);

    let seen = collect_until(&mut rx, Status::Completed).await;
    let reasons: Vec<Reason> = seen.iter().map(|n| n.reason).collect();
    assert_eq!(&reasons[..3], &[Reason::DownloadAdded, Reason::DownloadQueued, Reason::DownloadStarted]);
    let last = seen.last().unwrap();
    assert_eq!(last.reason, Reason::DownloadCompleted);
    assert_eq!(last.progress, 100);
    assert!(seen
        .iter()
        .filter(|n| n.reason == Reason::DownloadProgressChanged)
        .all(|n| (0..=100).contains(&n.progress)));

    assert_eq!(std::fs::read(&destination).unwrap(), body);
    engine.close().await;
}

#[tokio::test]
async fn test_error_body_becomes_diagnostic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "message": "Network unreachable" })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = SessionRequest::new(server.uri(), dir.path().join("x.bin").to_string_lossy());
    let engine = HttpEngine::open(config(dir.path())).await.unwrap();
    let mut rx = observe(&engine, request.id);
    engine.enqueue(request).await.unwrap();

    let seen = collect_until(&mut rx, Status::Failed).await;
    let failed = seen.last().unwrap();
    assert_eq!(failed.reason, Reason::DownloadError);
    let error = failed.error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::RequestNotSuccessful);
    assert_eq!(error.response.as_ref().unwrap().code, 503);
    assert_eq!(error.diagnostic(), Some("Network unreachable"));
    engine.close().await;
}

#[tokio::test]
async fn test_unreachable_host_fails_without_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let request = SessionRequest::new("http://127.0.0.1:1/nonexistent", dir.path().join("n.bin").to_string_lossy());
    let engine = HttpEngine::open(config(dir.path())).await.unwrap();
    let mut rx = observe(&engine, request.id);
    engine.enqueue(request).await.unwrap();

    let seen = collect_until(&mut rx, Status::Failed).await;
    let error = seen.last().unwrap().error.clone().unwrap();
    assert_eq!(error.diagnostic(), None);
    engine.close().await;
}

#[tokio::test]
async fn test_retry_after_failure_completes() {
    let body = generate_test_data(16 * 1024);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "try later" })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("r.bin");
    let request = SessionRequest::new(server.uri(), destination.to_string_lossy());
    let engine = HttpEngine::open(config(dir.path())).await.unwrap();
    let mut rx = observe(&engine, request.id);
    engine.enqueue(request.clone()).await.unwrap();
    collect_until(&mut rx, Status::Failed).await;

    engine.retry(request.id).await.unwrap();
    let seen = collect_until(&mut rx, Status::Completed).await;
    assert_eq!(seen[0].reason, Reason::DownloadQueued);
    assert!(seen.iter().all(|n| n.error.is_none()));
    assert_eq!(std::fs::read(&destination).unwrap(), body);

    // Nothing to re-drive once completed.
    engine.retry(request.id).await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    engine.close().await;
}

#[tokio::test]
async fn test_partial_file_is_resumed_with_range() {
    let body = generate_test_data(48 * 1024);
    let half = body.len() / 2;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(RangeResponder { body: body.clone() })
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("partial.bin");
    std::fs::write(&destination, &body[..half]).unwrap();

    // State left behind by an interrupted run.
    let request = SessionRequest::new(server.uri(), destination.to_string_lossy());
    let mut record = DownloadRecord::from_request(&request);
    record.status = Status::Downloading;
    record.downloaded = half as i64;
    record.total = body.len() as i64;
    let mut store = DownloadStore::new("http-test");
    store.insert(record).unwrap();
    std::fs::write(dir.path().join("state.json"), store.to_json().unwrap()).unwrap();

    let engine = HttpEngine::open(config(dir.path())).await.unwrap();
    let reloaded = engine.get(request.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, Status::Queued);

    let mut rx = observe(&engine, request.id);
    assert_eq!(rx.recv().await.unwrap().reason, Reason::ObserverAttached);
    engine.enqueue(request).await.unwrap();
    collect_until(&mut rx, Status::Completed).await;

    assert_eq!(std::fs::read(&destination).unwrap(), body);
    let requests = server.received_requests().await.unwrap();
    let range = requests[0].headers.get(&reqwest::header::RANGE).unwrap();
    assert_eq!(range.to_str().unwrap(), format!("bytes={}-", half));
    engine.close().await;
}

#[tokio::test]
async fn test_enqueue_deduplicates_on_destination() {
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("same.bin").to_string_lossy().into_owned();
    let engine = HttpEngine::open(config(dir.path())).await.unwrap();

    let first = SessionRequest::new("http://a.invalid/file", destination.clone()).with_download_on_enqueue(false);
    let second = SessionRequest::new("http://b.invalid/file", destination).with_download_on_enqueue(false);
    assert_ne!(first.id, second.id);

    let a = engine.enqueue(first.clone()).await.unwrap();
    let b = engine.enqueue(second).await.unwrap();
    assert_eq!(a.id, first.id);
    assert_eq!(b.id, first.id);
    assert_eq!(b.status, Status::Added);
    engine.close().await;
}

#[tokio::test]
async fn test_extras_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let request = SessionRequest::new("http://a.invalid/file", dir.path().join("e.bin").to_string_lossy())
        .with_download_on_enqueue(false);
    let id = request.id;

    let engine = HttpEngine::open(config(dir.path())).await.unwrap();
    engine.enqueue(request).await.unwrap();
    engine
        .write_extras(id, "testString".to_string(), "test".into())
        .await
        .unwrap();
    let mut bulk = Extras::new();
    bulk.put_bool("nathan_is_here", true).put_int("testInt", 3);
    engine.write_extras_bulk(id, bulk).await.unwrap();
    let touched = engine
        .delete_extras_by_key(vec![id, id.wrapping_add(1)], "testInt".to_string())
        .await
        .unwrap();
    assert_eq!(touched, vec![id]);
    engine.close().await;
    assert!(matches!(engine.get(id).await, Err(EngineError::Closed { .. })));

    let reopened = HttpEngine::open(config(dir.path())).await.unwrap();
    let record = reopened.get(id).await.unwrap().unwrap();
    assert!(record.extras.get_bool("nathan_is_here", false));
    assert!(!record.extras.contains_key("testInt"));
    assert!(!record.extras.contains_key("testString"));
    reopened.close().await;
}

#[tokio::test]
async fn test_concurrent_extras_writes_all_reach_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let request = SessionRequest::new("http://a.invalid/file", dir.path().join("c.bin").to_string_lossy())
        .with_download_on_enqueue(false);
    let id = request.id;
    let engine = Arc::new(HttpEngine::open(config(dir.path())).await.unwrap());
    engine.enqueue(request).await.unwrap();

    let writers: Vec<_> = (0..100)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .write_extras(id, format!("key-{}", i), ExtraValue::Int(i))
                    .await
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    let in_memory = engine.get(id).await.unwrap().unwrap().extras;
    assert_eq!(in_memory.len(), 100);
    let json = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
    let on_disk = DownloadStore::from_json(&json, false).unwrap().get(id).unwrap().unwrap().extras;
    assert_eq!(on_disk, in_memory);
    engine.close().await;
}

#[tokio::test]
async fn test_non_finite_extra_is_refused_and_state_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let request = SessionRequest::new("http://a.invalid/file", dir.path().join("f.bin").to_string_lossy())
        .with_download_on_enqueue(false);
    let id = request.id;

    let engine = HttpEngine::open(config(dir.path())).await.unwrap();
    engine.enqueue(request).await.unwrap();
    let mut bulk = Extras::new();
    bulk.put_double("d", f64::NAN);
    let err = engine.write_extras_bulk(id, bulk).await.unwrap_err();
    assert!(matches!(err, EngineError::Rejected(_)));
    let err = engine
        .write_extras(id, "f".to_string(), ExtraValue::Float(f32::INFINITY))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Rejected(_)));
    engine.close().await;

    let reopened = HttpEngine::open(config(dir.path())).await.unwrap();
    assert!(reopened.get(id).await.unwrap().unwrap().extras.is_empty());
    reopened.close().await;
}

#[tokio::test]
async fn test_close_interrupts_transfer_and_keeps_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(generate_test_data(1024))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let request = SessionRequest::new(server.uri(), dir.path().join("slow.bin").to_string_lossy());
    let id = request.id;
    let engine = HttpEngine::open(config(dir.path())).await.unwrap();
    let mut rx = observe(&engine, id);
    engine.enqueue(request).await.unwrap();
    collect_until(&mut rx, Status::Downloading).await;

    tokio::time::timeout(Duration::from_secs(5), engine.close())
        .await
        .expect("close should not wait for the response");

    let reopened = HttpEngine::open(config(dir.path())).await.unwrap();
    let record = reopened.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, Status::Queued);
    assert_eq!(record.downloaded, 0);
    reopened.close().await;
}
