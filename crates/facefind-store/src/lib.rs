//! facefind-store: Persistence for events, photos and uploaded bytes.
//!
//! `SqliteGalleryStore` implements the core `GalleryStore` seam,
//! `FsObjectStorage` keeps uploaded files, and `IngestionQueue` drives
//! operator uploads through both.

pub mod ingest;
pub mod sqlite;
pub mod storage;

pub use ingest::{EntryId, IngestError, IngestionQueue, QueueEntry, UploadBatch, UploadFile, UploadSource, UploadState, DEFAULT_RETAINED_FINISHED};
pub use sqlite::SqliteGalleryStore;
pub use storage::{FsObjectStorage, ObjectStorage, StorageError};
