//! End-to-end upload pipeline tests against a stateful in-process server:
//! batching, per-batch retry, failure isolation, and monotonic progress.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tempfile::TempDir;

use vaultctl::auth::{Credentials, SessionStore};
use vaultctl::client::{ArchiveClient, ClientConfig, RetryPolicy};
use vaultctl::common::{ArchiveFormat, OverwritePolicy};
use vaultctl::transfer::{split_fixed, BatchProgressFn, UploadDestination, Uploader};

struct ImportState {
    hits: AtomicUsize,
    /// Answer this many leading requests with 500 before recovering.
    fail_first: usize,
}

async fn import_handler(
    State(state): State<Arc<ImportState>>,
    body: axum::body::Bytes,
) -> StatusCode {
    assert!(!body.is_empty(), "import request must carry an archive body");
    let n = state.hits.fetch_add(1, Ordering::SeqCst);
    if n < state.fail_first {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn spawn_import_server(fail_first: usize) -> (String, Arc<ImportState>) {
    let state = Arc::new(ImportState {
        hits: AtomicUsize::new(0),
        fail_first,
    });

    let app = Router::new()
        .route("/data/services/import", post(import_handler))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });

    (format!("http://{addr}"), state)
}

fn write_exam_files(dir: &TempDir, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.path().join(format!("scan_{i:03}.dcm"));
            std::fs::write(&path, format!("dicom payload {i}")).unwrap();
            path
        })
        .collect()
}

fn test_client(base_url: &str, store_dir: &TempDir) -> Arc<ArchiveClient> {
    let store = SessionStore::new(store_dir.path().join(".session"));
    store.save("upload-token", base_url, "tester").unwrap();

    let mut config = ClientConfig::new(base_url.to_string());
    config.timeout = Duration::from_secs(5);
    config.retry = RetryPolicy::none();

    let credentials = Credentials {
        username: "tester".to_string(),
        password: "hunter2".to_string(),
    };
    Arc::new(ArchiveClient::new(config, store, Some(credentials)).unwrap())
}

fn destination() -> UploadDestination {
    UploadDestination {
        project: "PROJ01".to_string(),
        subject: "SUBJ01".to_string(),
        session: "SESS01".to_string(),
        overwrite: OverwritePolicy::Delete,
        direct_archive: true,
    }
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn three_files_batched_by_two_survive_one_transient_failure() {
    let exam_dir = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let files = write_exam_files(&exam_dir, 3);

    // First import request answers 500 once, everything after succeeds.
    let (base_url, state) = spawn_import_server(1).await;
    let client = test_client(&base_url, &store_dir);

    let batches = split_fixed(&files, 2);
    let sizes: Vec<usize> = batches.iter().map(|b| b.files.len()).collect();
    assert_eq!(sizes, vec![2, 1]);

    let observed: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    let progress: BatchProgressFn = Arc::new(move |p| {
        sink.lock().unwrap().push(p.completed);
    });

    let uploader =
        Uploader::new(client, 2, ArchiveFormat::Zip).with_retry(fast_retry(2));
    let summary = uploader
        .upload_batches(batches, exam_dir.path(), &destination(), Some(progress))
        .await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert!(summary.success());
    assert_eq!(summary.total_files, 3);
    assert_eq!(
        state.hits.load(Ordering::SeqCst),
        3,
        "two batches plus exactly one retry"
    );

    let observed = observed.lock().unwrap();
    assert_eq!(*observed, vec![1, 2], "completed count grows monotonically");
}

#[tokio::test]
async fn failing_batch_does_not_abort_siblings() {
    let exam_dir = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let files = write_exam_files(&exam_dir, 4);

    // Enough leading failures to exhaust one batch's whole retry budget,
    // whichever batch arrives first.
    let (base_url, _state) = spawn_import_server(1).await;
    let client = test_client(&base_url, &store_dir);

    let batches = split_fixed(&files, 2);
    assert_eq!(batches.len(), 2);

    // Workers serialized so exactly the first-arriving batch eats the 500.
    let uploader = Uploader::new(client, 1, ArchiveFormat::Tar).with_retry(fast_retry(0));
    let summary = uploader
        .upload_batches(batches, exam_dir.path(), &destination(), None)
        .await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.succeeded, 1, "sibling batch still uploads");
    assert_eq!(summary.failed, 1);
    assert!(!summary.success());
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("HTTP 500"));
}

#[tokio::test]
async fn every_batch_failing_is_reported_per_batch() {
    let exam_dir = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let files = write_exam_files(&exam_dir, 4);

    let (base_url, state) = spawn_import_server(usize::MAX).await;
    let client = test_client(&base_url, &store_dir);

    let batches = split_fixed(&files, 2);
    let uploader = Uploader::new(client, 2, ArchiveFormat::Zip).with_retry(fast_retry(0));
    let summary = uploader
        .upload_batches(batches, exam_dir.path(), &destination(), None)
        .await;

    assert_eq!(summary.failed, 2);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.errors.len(), 2);
    assert_eq!(state.hits.load(Ordering::SeqCst), 2, "no retries configured");
}
