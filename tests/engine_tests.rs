use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use file_vault::engine::{
    DownloadOptions, EraseOptions, FileUpload, NewFolder, RetryPolicy, Storage, StorageError,
    UrlOverrides, PARTIAL_GRACE,
};
use file_vault::hashing::sha256_hex;
use file_vault::object_store::{
    ByteRange, LocalStore, ObjectBody, ObjectInfo, ObjectStore, ObjectStoreError, ObjectStream,
};
use file_vault::storage::Database;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Harness {
    _dir: tempfile::TempDir,
    storage: Arc<Storage>,
    store: Arc<LocalStore>,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let store = Arc::new(LocalStore::new(dir.path().join("files")));
    let backend: Arc<dyn ObjectStore> = store.clone();
    let storage = Storage::new(db, backend, RetryPolicy::none());
    storage.initialize().await.unwrap();

    Harness {
        _dir: dir,
        storage: Arc::new(storage),
        store,
    }
}

async fn object_count(store: &LocalStore) -> usize {
    store.list().await.unwrap().len()
}

async fn has_object(store: &dyn ObjectStore, key: &str) -> bool {
    match store.get(key, None).await {
        Ok(_) => true,
        Err(ObjectStoreError::NotFound(_)) => false,
        Err(e) => panic!("unexpected error: {e}"),
    }
}

/// Local store whose delete of one chosen key blocks until released.
struct GatedStore {
    inner: LocalStore,
    key: Mutex<Option<String>>,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new(inner: LocalStore) -> Self {
        Self {
            inner,
            key: Mutex::new(None),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    fn hold_delete_of(&self, key: &str) {
        *self.key.lock().unwrap() = Some(key.to_string());
    }
}

#[async_trait]
impl ObjectStore for GatedStore {
    fn backend_name(&self) -> &'static str {
        "gated"
    }

    async fn initialize(&self) -> Result<(), ObjectStoreError> {
        self.inner.initialize().await
    }

    async fn put(&self, key: &str, body: ObjectBody) -> Result<u64, ObjectStoreError> {
        self.inner.put(key, body).await
    }

    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, ObjectStoreError> {
        self.inner.get(key, range).await
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let held = self.key.lock().unwrap().as_deref() == Some(key);
        if held {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.delete(key).await
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        self.inner.list().await
    }
}

/// Serve `router` on an ephemeral port and return its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

// ============================================================================
// Upload and dedup
// ============================================================================

#[tokio::test]
async fn test_upload_records_hash_and_type() {
    let h = harness().await;

    let file = h
        .storage
        .upload(FileUpload::new("hello.txt", "hello world").with_description("greeting"))
        .await
        .unwrap();

    assert_eq!(file.hash, sha256_hex(b"hello world"));
    assert_eq!(file.byte_size, 11);
    assert_eq!(file.mime_type, "text/plain");
    assert_eq!(file.references, 1);
    assert_eq!(file.description.as_deref(), Some("greeting"));
    assert_eq!(
        file.parent_id.as_deref(),
        Some(h.storage.root_folder().unwrap().id.as_str())
    );
    assert!(has_object(h.store.as_ref(), &file.id).await);
}

#[tokio::test]
async fn test_identical_content_is_stored_once() {
    let h = harness().await;

    let first = h
        .storage
        .upload(FileUpload::new("a.png", &b"same bytes"[..]))
        .await
        .unwrap();
    let second = h
        .storage
        .upload(FileUpload::new("b.png", &b"same bytes"[..]))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.references, 2);
    // The duplicate keeps the original metadata
    assert_eq!(second.name, "a.png");
    assert_eq!(object_count(&h.store).await, 1);
}

#[tokio::test]
async fn test_different_content_same_name_gets_suffix() {
    let h = harness().await;

    let first = h
        .storage
        .upload(FileUpload::new("a.png", &b"one"[..]))
        .await
        .unwrap();
    let second = h
        .storage
        .upload(FileUpload::new("a.png", &b"two"[..]))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.name, "a (1).png");
    assert_eq!(object_count(&h.store).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_uploads() {
    let h = harness().await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let storage = Arc::clone(&h.storage);
            tokio::spawn(async move {
                storage
                    .upload(FileUpload::new(format!("copy-{i}.bin"), &b"racing content"[..]))
                    .await
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let file = h.storage.resolve_file(Some(&ids[0])).unwrap();
    assert_eq!(file.references, 8);
    assert_eq!(object_count(&h.store).await, 1);
}

#[tokio::test]
async fn test_upload_rejects_bad_names_and_parents() {
    let h = harness().await;

    let err = h
        .storage
        .upload(FileUpload::new("   ", "data"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    let err = h
        .storage
        .upload(FileUpload::new("a/b.txt", "data"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    let err = h
        .storage
        .upload(FileUpload::new("a.txt", "data").with_parent("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::FolderNotFound(_)));
    assert_eq!(object_count(&h.store).await, 0);
}

#[tokio::test]
async fn test_failed_stream_leaves_nothing_behind() {
    let h = harness().await;

    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"partial")),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client went away",
        )),
    ];
    let upload = FileUpload::new(
        "broken.bin",
        file_vault::hashing::Source::from_stream(futures::stream::iter(chunks)),
    );

    let err = h.storage.upload(upload).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(object_count(&h.store).await, 0);
    assert!(h.storage.db().get_all_files().unwrap().is_empty());
}

// ============================================================================
// Erase
// ============================================================================

#[tokio::test]
async fn test_erase_releases_references_first() {
    let h = harness().await;

    h.storage
        .upload(FileUpload::new("a.txt", "shared"))
        .await
        .unwrap();
    let file = h
        .storage
        .upload(FileUpload::new("b.txt", "shared"))
        .await
        .unwrap();
    assert_eq!(file.references, 2);

    h.storage
        .erase(&file, EraseOptions::default())
        .await
        .unwrap();
    let remaining = h.storage.resolve_file(Some(&file.id)).unwrap();
    assert_eq!(remaining.references, 1);
    assert!(has_object(h.store.as_ref(), &file.id).await);

    h.storage
        .erase(&file, EraseOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        h.storage.resolve_file(Some(&file.id)),
        Err(StorageError::FileNotFound(_))
    ));
    assert!(!has_object(h.store.as_ref(), &file.id).await);

    let err = h
        .storage
        .erase(&file, EraseOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::FileNotFound(_)));
}

#[tokio::test]
async fn test_force_erase_ignores_references() {
    let h = harness().await;

    h.storage
        .upload(FileUpload::new("a.txt", "shared"))
        .await
        .unwrap();
    let file = h
        .storage
        .upload(FileUpload::new("b.txt", "shared"))
        .await
        .unwrap();

    h.storage.erase(&file, EraseOptions::force()).await.unwrap();

    assert!(h.storage.db().get_file(&file.id).unwrap().is_none());
    assert!(h.storage.db().find_file_by_hash(&file.hash).unwrap().is_none());
    assert_eq!(object_count(&h.store).await, 0);
}

#[tokio::test]
async fn test_content_can_be_uploaded_again_after_erase() {
    let h = harness().await;

    let first = h
        .storage
        .upload(FileUpload::new("a.txt", "again"))
        .await
        .unwrap();
    h.storage
        .erase(&first, EraseOptions::default())
        .await
        .unwrap();

    let second = h
        .storage
        .upload(FileUpload::new("a.txt", "again"))
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.references, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_erase_racing_duplicate_upload() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("data")).unwrap();
    let gated = Arc::new(GatedStore::new(LocalStore::new(dir.path().join("files"))));
    let backend: Arc<dyn ObjectStore> = gated.clone();
    let storage = Arc::new(Storage::new(db, backend, RetryPolicy::none()));
    storage.initialize().await.unwrap();

    let first = storage
        .upload(FileUpload::new("a.txt", "payload"))
        .await
        .unwrap();
    gated.hold_delete_of(&first.id);

    let eraser = {
        let storage = storage.clone();
        let first = first.clone();
        tokio::spawn(async move { storage.erase(&first, EraseOptions::default()).await })
    };
    // The last reference is released and the object delete is in flight.
    gated.entered.notified().await;

    let second = storage
        .upload(FileUpload::new("b.txt", "payload"))
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.references, 1);

    gated.release.notify_one();
    eraser.await.unwrap().unwrap();

    assert!(matches!(
        storage.resolve_file(Some(&first.id)),
        Err(StorageError::FileNotFound(_))
    ));
    let survivor = storage.resolve_file(Some(&second.id)).unwrap();
    assert_eq!(survivor.hash, sha256_hex(b"payload"));
    assert!(has_object(&gated.inner, &second.id).await);
    assert!(!has_object(&gated.inner, &first.id).await);

    let again = storage
        .upload(FileUpload::new("c.txt", "payload"))
        .await
        .unwrap();
    assert_eq!(again.id, second.id);
    assert_eq!(again.references, 2);
}

// ============================================================================
// Download
// ============================================================================

#[tokio::test]
async fn test_download_round_trip() {
    let h = harness().await;
    let content: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();

    let file = h
        .storage
        .upload(FileUpload::new("blob.bin", content.clone()).with_size(70_000))
        .await
        .unwrap();
    let download = h
        .storage
        .download(&file, DownloadOptions::default())
        .await
        .unwrap();

    assert_eq!(download.size(), 70_000);
    assert_eq!(download.total_size(), 70_000);
    assert_eq!(download.data().await.unwrap(), Bytes::from(content));
    assert_eq!(
        h.storage.resolve_file(Some(&file.id)).unwrap().downloads,
        1
    );
}

#[tokio::test]
async fn test_download_range() {
    let h = harness().await;
    let file = h
        .storage
        .upload(FileUpload::new("letters.txt", "0123456789abcdefghij"))
        .await
        .unwrap();

    let slice = h
        .storage
        .download(&file, DownloadOptions::range(10, Some(5)))
        .await
        .unwrap();
    assert_eq!(slice.offset(), 10);
    assert_eq!(slice.size(), 5);
    assert_eq!(slice.text().await.unwrap(), "abcde");

    let clamped = h
        .storage
        .download(&file, DownloadOptions::range(15, Some(100)))
        .await
        .unwrap();
    assert_eq!(clamped.size(), 5);
    assert_eq!(clamped.text().await.unwrap(), "fghij");

    let tail = h
        .storage
        .download(&file, DownloadOptions::range(18, None))
        .await
        .unwrap();
    assert_eq!(tail.text().await.unwrap(), "ij");

    let err = h
        .storage
        .download(&file, DownloadOptions::range(20, None))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidRange(_)));
}

#[tokio::test]
async fn test_download_base64() {
    let h = harness().await;
    let file = h
        .storage
        .upload(FileUpload::new("hello.txt", "hello world"))
        .await
        .unwrap();

    let download = h
        .storage
        .download(&file, DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(
        download.base64().await.unwrap(),
        "data:text/plain;base64,aGVsbG8gd29ybGQ="
    );
}

#[tokio::test]
async fn test_download_of_empty_file() {
    let h = harness().await;
    let file = h
        .storage
        .upload(FileUpload::new("empty.txt", ""))
        .await
        .unwrap();
    assert_eq!(file.byte_size, 0);

    let download = h
        .storage
        .download(&file, DownloadOptions::default())
        .await
        .unwrap();
    assert!(download.data().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_download_cancellation() {
    let h = harness().await;
    let file = h
        .storage
        .upload(FileUpload::new("data.bin", vec![7u8; 4096]))
        .await
        .unwrap();

    let token = CancellationToken::new();
    let download = h
        .storage
        .download(
            &file,
            DownloadOptions {
                cancel: Some(token.clone()),
                ..DownloadOptions::default()
            },
        )
        .await
        .unwrap();
    token.cancel();
    assert!(matches!(
        download.data().await,
        Err(StorageError::TransferFailed(_))
    ));

    // Already cancelled: nothing is opened
    let err = h
        .storage
        .download(
            &file,
            DownloadOptions {
                cancel: Some(token),
                ..DownloadOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::TransferFailed(_)));
}

#[tokio::test]
async fn test_download_with_missing_object() {
    let h = harness().await;
    let file = h
        .storage
        .upload(FileUpload::new("gone.txt", "vanishing"))
        .await
        .unwrap();
    h.store.delete(&file.id).await.unwrap();

    let err = h
        .storage
        .download(&file, DownloadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ObjectNotFound(_)));
}

#[tokio::test]
async fn test_resolve_file_requires_id() {
    let h = harness().await;

    assert!(matches!(
        h.storage.resolve_file(None),
        Err(StorageError::MissingFileId)
    ));
    assert!(matches!(
        h.storage.resolve_file(Some("  ")),
        Err(StorageError::MissingFileId)
    ));
    assert!(matches!(
        h.storage.resolve_file(Some("nope")),
        Err(StorageError::FileNotFound(_))
    ));
}

// ============================================================================
// Purge
// ============================================================================

#[tokio::test]
async fn test_purge_removes_only_orphans() {
    let h = harness().await;
    let kept = h
        .storage
        .upload(FileUpload::new("kept.txt", "keep me"))
        .await
        .unwrap();

    h.store
        .put("orphan-1", ObjectBody::from(Bytes::from_static(b"12345")))
        .await
        .unwrap();
    h.store
        .put("orphan-2", ObjectBody::from(Bytes::from_static(b"678")))
        .await
        .unwrap();

    let stats = h.storage.purge().await.unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.size, 8);
    assert!(has_object(h.store.as_ref(), &kept.id).await);
    assert!(!has_object(h.store.as_ref(), "orphan-1").await);

    let again = h.storage.purge().await.unwrap();
    assert_eq!(again.count, 0);
    assert_eq!(again.size, 0);
}

#[tokio::test]
async fn test_purge_reclaims_partial_writes() {
    let h = harness().await;
    let kept = h
        .storage
        .upload(FileUpload::new("kept.txt", "keep me"))
        .await
        .unwrap();

    let files = h._dir.path().join("files");
    let stale = files.join(".partial-interrupted-1");
    let fresh = files.join(".partial-in-flight-1");
    std::fs::write(&stale, b"half an upload").unwrap();
    std::fs::write(&fresh, b"still writing").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&stale)
        .unwrap()
        .set_modified(SystemTime::now() - PARTIAL_GRACE - Duration::from_secs(60))
        .unwrap();

    let stats = h.storage.purge().await.unwrap();
    assert_eq!(stats.count, 1);
    assert_eq!(stats.size, 14);
    assert!(!stale.exists());
    assert!(fresh.exists());
    assert!(has_object(h.store.as_ref(), &kept.id).await);
}

// ============================================================================
// Folders
// ============================================================================

#[tokio::test]
async fn test_root_folder_is_created_once() {
    let h = harness().await;

    let first = h.storage.root_folder().unwrap();
    let second = h.storage.root_folder().unwrap();
    assert_eq!(first.id, second.id);
    assert!(first.is_root);
    assert_eq!(h.storage.folder_path(&first.id).unwrap(), "/");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_root_bootstrap() {
    let h = harness().await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let storage = Arc::clone(&h.storage);
            tokio::spawn(async move { storage.root_folder().map(|f| f.id) })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let roots: Vec<_> = h
        .storage
        .db()
        .get_all_folders()
        .unwrap()
        .into_iter()
        .filter(|f| f.is_root)
        .collect();
    assert_eq!(roots.len(), 1);
}

#[tokio::test]
async fn test_paths_and_sizes() {
    let h = harness().await;

    let images = h
        .storage
        .create_folder(NewFolder {
            name: "images".to_string(),
            parent_id: None,
            description: None,
        })
        .unwrap();
    let year = h
        .storage
        .create_folder(NewFolder {
            name: "2024".to_string(),
            parent_id: Some(images.id.clone()),
            description: None,
        })
        .unwrap();

    let a = h
        .storage
        .upload(FileUpload::new("a.png", vec![1u8; 100]).with_parent(images.id.clone()))
        .await
        .unwrap();
    h.storage
        .upload(FileUpload::new("b.png", vec![2u8; 50]).with_parent(year.id.clone()))
        .await
        .unwrap();
    h.storage
        .upload(FileUpload::new("top.txt", "12345"))
        .await
        .unwrap();

    assert_eq!(h.storage.file_path(&a).unwrap(), "/images/a.png");
    assert_eq!(h.storage.folder_path(&year.id).unwrap(), "/images/2024");

    assert_eq!(h.storage.folder_size(&year.id).unwrap(), 50);
    assert_eq!(h.storage.folder_size(&images.id).unwrap(), 150);
    let root = h.storage.root_folder().unwrap();
    assert_eq!(h.storage.folder_size(&root.id).unwrap(), 155);
}

#[tokio::test]
async fn test_delete_folder_cascades() {
    let h = harness().await;

    let images = h
        .storage
        .create_folder(NewFolder {
            name: "images".to_string(),
            parent_id: None,
            description: None,
        })
        .unwrap();
    let year = h
        .storage
        .create_folder(NewFolder {
            name: "2024".to_string(),
            parent_id: Some(images.id.clone()),
            description: None,
        })
        .unwrap();
    h.storage
        .upload(FileUpload::new("a.png", &b"a"[..]).with_parent(images.id.clone()))
        .await
        .unwrap();
    h.storage
        .upload(FileUpload::new("b.png", &b"b"[..]).with_parent(year.id.clone()))
        .await
        .unwrap();
    let outside = h
        .storage
        .upload(FileUpload::new("c.png", &b"c"[..]))
        .await
        .unwrap();

    let deletion = h.storage.delete_folder(&images.id).await.unwrap();
    assert_eq!(deletion.folders, 2);
    assert_eq!(deletion.files, 2);
    assert_eq!(deletion.moved_to_root, 0);

    assert!(h.storage.db().get_folder(&year.id).unwrap().is_none());
    assert_eq!(object_count(&h.store).await, 1);
    assert!(has_object(h.store.as_ref(), &outside.id).await);

    let root = h.storage.root_folder().unwrap();
    let err = h.storage.delete_folder(&root.id).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));
}

#[tokio::test]
async fn test_delete_folder_keeps_shared_files() {
    let h = harness().await;
    let root = h.storage.root_folder().unwrap();

    let docs = h
        .storage
        .create_folder(NewFolder {
            name: "docs".to_string(),
            parent_id: None,
            description: None,
        })
        .unwrap();
    let shared = h
        .storage
        .upload(FileUpload::new("report.pdf", "quarterly").with_parent(docs.id.clone()))
        .await
        .unwrap();
    let copy = h
        .storage
        .upload(FileUpload::new("copy.pdf", "quarterly"))
        .await
        .unwrap();
    assert_eq!(copy.id, shared.id);
    assert_eq!(copy.references, 2);
    h.storage
        .upload(FileUpload::new("report.pdf", "something else"))
        .await
        .unwrap();

    let deletion = h.storage.delete_folder(&docs.id).await.unwrap();
    assert_eq!(deletion.folders, 1);
    assert_eq!(deletion.files, 0);
    assert_eq!(deletion.moved_to_root, 1);

    let moved = h.storage.resolve_file(Some(&shared.id)).unwrap();
    assert_eq!(moved.parent_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(moved.references, 1);
    assert_ne!(moved.name, "report.pdf");
    assert!(has_object(h.store.as_ref(), &shared.id).await);
}

// ============================================================================
// Remote import
// ============================================================================

#[tokio::test]
async fn test_upload_from_url() {
    let h = harness().await;
    let base = serve(Router::new().route("/media/cat.txt", get(|| async { "meow meow" }))).await;

    let url = format!("{base}/media/cat.txt");
    let file = h
        .storage
        .upload_from_url(&url, UrlOverrides::default())
        .await
        .unwrap();

    assert_eq!(file.name, "cat.txt");
    assert_eq!(file.mime_type, "text/plain");
    assert_eq!(file.byte_size, 9);
    assert_eq!(file.source_url.as_deref(), Some(url.as_str()));
    assert_eq!(file.hash, sha256_hex(b"meow meow"));
}

#[tokio::test]
async fn test_upload_from_url_overrides() {
    let h = harness().await;
    let base = serve(Router::new().route("/raw", get(|| async { "payload" }))).await;

    let file = h
        .storage
        .upload_from_url(
            &format!("{base}/raw"),
            UrlOverrides {
                name: Some("renamed.json".to_string()),
                mime_type: Some("application/json".to_string()),
                description: Some("imported".to_string()),
                ..UrlOverrides::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(file.name, "renamed.json");
    assert_eq!(file.mime_type, "application/json");
    assert_eq!(file.description.as_deref(), Some("imported"));
}

#[tokio::test]
async fn test_upload_from_url_failures() {
    let h = harness().await;
    let router = Router::new()
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/chunked",
            get(|| async {
                let chunks: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"abc"))];
                (
                    [(header::CONTENT_TYPE, "text/plain")],
                    Body::from_stream(futures::stream::iter(chunks)),
                )
            }),
        );
    let base = serve(router).await;

    let err = h
        .storage
        .upload_from_url(&format!("{base}/missing"), UrlOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RemoteFetchFailed(_)));

    // No Content-Length on a streamed response
    let err = h
        .storage
        .upload_from_url(&format!("{base}/chunked"), UrlOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RemoteFetchFailed(_)));

    let err = h
        .storage
        .upload_from_url("ftp://example.com/file", UrlOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    assert_eq!(object_count(&h.store).await, 0);
}

#[tokio::test]
async fn test_upload_from_unreachable_url() {
    let h = harness().await;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = h
        .storage
        .upload_from_url(&format!("http://{addr}/file.txt"), UrlOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::RemoteFetchFailed(_)));
}
