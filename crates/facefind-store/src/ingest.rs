//! Operator upload pipeline.
//!
//! Each file runs as its own task: store bytes, then create the photo
//! record. Progress lives in a map keyed by a generated entry id, so
//! completions may land in any order.

use crate::storage::{ObjectStorage, StorageError};
use chrono::Utc;
use facefind_core::{EventId, GalleryStore, Photo, PhotoId, PhotoStatus, StoreError};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("deleting a photo requires explicit confirmation")]
    Unconfirmed,
    #[error("photo not found: {0}")]
    PhotoNotFound(PhotoId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    Uploading,
    Success { photo_id: PhotoId },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub file_name: String,
    pub event_id: EventId,
    pub state: UploadState,
    #[serde(skip)]
    seq: u64,
}

/// Where an upload's bytes come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Bytes(Vec<u8>),
    /// Read by the file's own task, so an unreadable path fails only that entry.
    Path(PathBuf),
}

/// One file selected for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub source: UploadSource,
}

impl UploadFile {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: UploadSource::Bytes(bytes),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            source: UploadSource::Path(path),
        }
    }
}

type Entries = Arc<Mutex<HashMap<EntryId, QueueEntry>>>;

/// Finished entries kept for status listings unless configured otherwise.
pub const DEFAULT_RETAINED_FINISHED: usize = 256;

/// Handle on the tasks started by one `submit` call.
pub struct UploadBatch {
    pub entries: Vec<EntryId>,
    tasks: JoinSet<()>,
}

impl UploadBatch {
    /// Resolve once every file in the batch has reached a final state.
    pub async fn wait(mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "upload task did not complete");
            }
        }
    }
}

pub struct IngestionQueue {
    store: Arc<dyn GalleryStore>,
    storage: Arc<dyn ObjectStorage>,
    entries: Entries,
    next_seq: AtomicU64,
    retain_finished: usize,
}

impl IngestionQueue {
    pub fn new(store: Arc<dyn GalleryStore>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            store,
            storage,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
            retain_finished: DEFAULT_RETAINED_FINISHED,
        }
    }

    /// Keep at most `limit` finished entries; older ones are dropped on the next submit.
    pub fn with_retention(mut self, limit: usize) -> Self {
        self.retain_finished = limit;
        self
    }

    /// Start uploading `files` into `event_id` on behalf of `operator`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, operator: &str, event_id: &EventId, files: Vec<UploadFile>) -> UploadBatch {
        self.prune_finished();
        let mut tasks = JoinSet::new();
        let mut ids = Vec::with_capacity(files.len());

        for file in files {
            let id = EntryId::generate();
            let entry = QueueEntry {
                id,
                file_name: file.name.clone(),
                event_id: event_id.clone(),
                state: UploadState::Uploading,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            };
            lock(&self.entries).insert(id, entry);
            tracing::info!(entry = %id, file = %file.name, event_id = %event_id, "upload queued");
            ids.push(id);

            let upload = Upload {
                id,
                operator: operator.to_string(),
                event_id: event_id.clone(),
                file,
            };
            let (store, storage, entries) = (self.store.clone(), self.storage.clone(), self.entries.clone());
            tasks.spawn(async move {
                let state = match upload.run(store.as_ref(), storage.as_ref()).await {
                    Ok(photo_id) => {
                        tracing::info!(entry = %upload.id, photo_id = %photo_id, "upload succeeded");
                        UploadState::Success { photo_id }
                    }
                    Err(message) => {
                        tracing::warn!(entry = %upload.id, file = %upload.file.name, error = %message, "upload failed");
                        UploadState::Error { message }
                    }
                };
                if let Some(entry) = lock(&entries).get_mut(&upload.id) {
                    entry.state = state;
                }
            });
        }

        UploadBatch { entries: ids, tasks }
    }

    /// All entries in submission order.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = lock(&self.entries).values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Drop the oldest finished entries beyond the retention limit.
    /// In-flight entries are never removed.
    fn prune_finished(&self) {
        let mut entries = lock(&self.entries);
        let mut finished: Vec<(u64, EntryId)> = entries
            .values()
            .filter(|e| e.state != UploadState::Uploading)
            .map(|e| (e.seq, e.id))
            .collect();
        if finished.len() <= self.retain_finished {
            return;
        }
        finished.sort_unstable_by_key(|(seq, _)| *seq);
        let excess = finished.len() - self.retain_finished;
        for (_, id) in finished.into_iter().take(excess) {
            entries.remove(&id);
        }
        tracing::debug!(pruned = excess, "finished upload entries pruned");
    }

    pub fn entry(&self, id: EntryId) -> Option<QueueEntry> {
        lock(&self.entries).get(&id).cloned()
    }

    /// Live photo listing for the operator view.
    pub async fn listing(&self, event_id: &EventId) -> Result<watch::Receiver<Vec<Photo>>, StoreError> {
        self.store.subscribe_photos(event_id).await
    }

    pub async fn delete_photo(&self, photo_id: &PhotoId, confirmed: bool) -> Result<(), IngestError> {
        if !confirmed {
            return Err(IngestError::Unconfirmed);
        }
        if !self.store.delete_photo(photo_id).await? {
            return Err(IngestError::PhotoNotFound(photo_id.clone()));
        }
        Ok(())
    }
}

fn lock(entries: &Entries) -> std::sync::MutexGuard<'_, HashMap<EntryId, QueueEntry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Upload {
    id: EntryId,
    operator: String,
    event_id: EventId,
    file: UploadFile,
}

impl Upload {
    fn storage_path(&self, unix_millis: i64) -> String {
        let base = Path::new(&self.file.name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("upload");
        format!(
            "agency_uploads/{}/{}/{unix_millis}_{}_{base}",
            self.operator, self.event_id, self.id
        )
    }

    async fn run(&self, store: &dyn GalleryStore, storage: &dyn ObjectStorage) -> Result<PhotoId, String> {
        let now = Utc::now();
        let path = self.storage_path(now.timestamp_millis());

        let bytes = match &self.file.source {
            UploadSource::Bytes(bytes) => bytes.clone(),
            UploadSource::Path(local) => tokio::fs::read(local)
                .await
                .map_err(|e| format!("{}: {e}", local.display()))?,
        };
        let url = storage
            .put(&path, bytes)
            .await
            .map_err(|e: StorageError| e.to_string())?;

        let photo = Photo {
            id: PhotoId(Uuid::new_v4().to_string()),
            event_id: self.event_id.clone(),
            agency_id: self.operator.clone(),
            original_url: url.clone(),
            display_url: url,
            descriptor: None,
            status: PhotoStatus::Active,
            created_at: now,
        };
        store.insert_photo(&photo).await.map_err(|e| e.to_string())?;
        Ok(photo.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteGalleryStore;
    use crate::storage::FsObjectStorage;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use facefind_core::{NewEvent, Pricing};

    /// Fails every object whose name contains "corrupt".
    struct PickyStorage(FsObjectStorage);

    #[async_trait]
    impl ObjectStorage for PickyStorage {
        async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
            if path.contains("corrupt") {
                return Err(StorageError::InvalidPath(path.to_string()));
            }
            self.0.put(path, bytes).await
        }
    }

    async fn setup(dir: &Path) -> (Arc<SqliteGalleryStore>, IngestionQueue, EventId) {
        let store = Arc::new(SqliteGalleryStore::open_in_memory(Pricing::default()).await.unwrap());
        let event = store
            .create_event(NewEvent {
                name: "Marathon".into(),
                slug: None,
                date: NaiveDate::from_ymd_opt(2026, 9, 20).unwrap(),
                agency_id: "op-1".into(),
                pricing: Pricing::default(),
            })
            .await
            .unwrap();
        let storage = Arc::new(PickyStorage(FsObjectStorage::new(dir)));
        let queue = IngestionQueue::new(store.clone(), storage);
        (store, queue, event.id)
    }

    fn file(name: &str) -> UploadFile {
        UploadFile::from_bytes(name, name.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_same_name_files_get_distinct_paths_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let (store, queue, event) = setup(dir.path()).await;

        let batch = queue.submit("op-1", &event, vec![file("IMG_0001.jpg"), file("IMG_0001.jpg")]);
        let ids = batch.entries.clone();
        batch.wait().await;

        let photos = store.photos_for_event(&event).await.unwrap();
        assert_eq!(photos.len(), 2);
        assert_ne!(photos[0].id, photos[1].id);
        assert_ne!(photos[0].original_url, photos[1].original_url);
        assert!(photos.iter().all(|p| p.descriptor.is_none() && p.status == PhotoStatus::Active));
        assert!(photos.iter().all(|p| p.original_url.contains("agency_uploads/op-1/")));

        for id in ids {
            assert!(matches!(queue.entry(id).unwrap().state, UploadState::Success { .. }));
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let (store, queue, event) = setup(dir.path()).await;

        queue
            .submit("op-1", &event, vec![file("a.jpg"), file("corrupt.jpg"), file("b.jpg")])
            .wait()
            .await;

        let snapshot = queue.snapshot();
        let names: Vec<&str> = snapshot.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "corrupt.jpg", "b.jpg"]);
        assert!(matches!(snapshot[0].state, UploadState::Success { .. }));
        assert!(matches!(snapshot[1].state, UploadState::Error { .. }));
        assert!(matches!(snapshot[2].state, UploadState::Success { .. }));
        assert_eq!(store.photos_for_event(&event).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_path_fails_only_its_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (store, queue, event) = setup(&dir.path().join("objects")).await;
        let local = dir.path().join("camera");
        std::fs::create_dir_all(&local).unwrap();
        std::fs::write(local.join("ok.jpg"), b"one").unwrap();
        std::fs::write(local.join("ok2.jpg"), b"two").unwrap();

        let files = vec![
            UploadFile::from_path(local.join("ok.jpg")),
            UploadFile::from_path(local.join("missing.jpg")),
            UploadFile::from_path(local.join("ok2.jpg")),
        ];
        queue.submit("op-1", &event, files).wait().await;

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(matches!(snapshot[0].state, UploadState::Success { .. }));
        match &snapshot[1].state {
            UploadState::Error { message } => assert!(message.contains("missing.jpg")),
            other => panic!("unexpected state: {other:?}"),
        }
        assert!(matches!(snapshot[2].state, UploadState::Success { .. }));

        let photos = store.photos_for_event(&event).await.unwrap();
        assert_eq!(photos.len(), 2);
        assert!(photos.iter().all(|p| p.original_url.ends_with("ok.jpg") || p.original_url.ends_with("ok2.jpg")));
    }

    #[tokio::test]
    async fn test_finished_entries_pruned_beyond_retention() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _, event) = setup(dir.path()).await;
        let storage = Arc::new(FsObjectStorage::new(dir.path()));
        let queue = IngestionQueue::new(store, storage).with_retention(2);

        queue
            .submit("op-1", &event, vec![file("a.jpg"), file("b.jpg"), file("c.jpg")])
            .wait()
            .await;
        assert_eq!(queue.snapshot().len(), 3);

        let batch = queue.submit("op-1", &event, vec![file("d.jpg")]);
        let names: Vec<String> = queue.snapshot().into_iter().map(|e| e.file_name).collect();
        assert_eq!(names, vec!["b.jpg", "c.jpg", "d.jpg"]);
        batch.wait().await;
    }

    #[test]
    fn test_storage_path_uses_basename() {
        let upload = Upload {
            id: EntryId::generate(),
            operator: "op-1".into(),
            event_id: "ev-9".into(),
            file: file("/home/op/DCIM/shot.jpg"),
        };
        let path = upload.storage_path(1_700_000_000_000);
        assert_eq!(path, format!("agency_uploads/op-1/ev-9/1700000000000_{}_shot.jpg", upload.id));
    }

    #[tokio::test]
    async fn test_deleted_photo_leaves_listing() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, queue, event) = setup(dir.path()).await;
        queue
            .submit("op-1", &event, vec![file("one.jpg"), file("two.jpg")])
            .wait()
            .await;

        let mut listing = queue.listing(&event).await.unwrap();
        let photos = listing.borrow_and_update().clone();
        assert_eq!(photos.len(), 2);

        let doomed = photos[0].id.clone();
        let survivor = photos[1].clone();
        assert!(matches!(
            queue.delete_photo(&doomed, false).await,
            Err(IngestError::Unconfirmed)
        ));
        queue.delete_photo(&doomed, true).await.unwrap();

        let after = listing.borrow_and_update().clone();
        assert_eq!(after, vec![survivor]);
        assert!(matches!(
            queue.delete_photo(&doomed, true).await,
            Err(IngestError::PhotoNotFound(_))
        ));
    }
}
