//! SQLite-backed gallery store.
//!
//! Descriptors are stored as JSON arrays in a nullable column. Live photo
//! listings are `watch` channels keyed by event, refreshed after every
//! write that touches that event.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use facefind_core::{Descriptor, Event, EventId, GalleryStore, NewEvent, Photo, PhotoId, PhotoStatus, Pricing, StoreError};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS events (
        id        TEXT PRIMARY KEY,
        name      TEXT NOT NULL,
        slug      TEXT UNIQUE,
        date      TEXT NOT NULL,
        agency_id TEXT NOT NULL,
        pricing   TEXT
    );
    CREATE TABLE IF NOT EXISTS photos (
        id           TEXT PRIMARY KEY,
        event_id     TEXT NOT NULL REFERENCES events(id),
        agency_id    TEXT NOT NULL,
        original_url TEXT NOT NULL,
        display_url  TEXT NOT NULL,
        descriptor   TEXT,
        status       TEXT NOT NULL,
        created_at   TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_photos_event ON photos(event_id, created_at);
";

const PHOTO_COLUMNS: &str = "id, event_id, agency_id, original_url, display_url, descriptor, status, created_at";
const EVENT_COLUMNS: &str = "id, name, slug, date, agency_id, pricing";

struct EventRow {
    id: String,
    name: String,
    slug: Option<String>,
    date: String,
    agency_id: String,
    pricing: Option<String>,
}

struct PhotoRow {
    id: String,
    event_id: String,
    agency_id: String,
    original_url: String,
    display_url: String,
    descriptor: Option<String>,
    status: String,
    created_at: String,
}

impl EventRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            date: row.get(3)?,
            agency_id: row.get(4)?,
            pricing: row.get(5)?,
        })
    }

    fn into_event(self, default_pricing: Pricing) -> Result<Event, StoreError> {
        let date = self.date.parse::<NaiveDate>().map_err(|e| corrupt(&self.id, format!("date: {e}")))?;
        let pricing = match self.pricing {
            Some(json) => serde_json::from_str(&json).map_err(|e| corrupt(&self.id, format!("pricing: {e}")))?,
            None => default_pricing,
        };
        Ok(Event {
            id: EventId(self.id),
            name: self.name,
            slug: self.slug,
            date,
            agency_id: self.agency_id,
            pricing,
        })
    }
}

impl PhotoRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_id: row.get(1)?,
            agency_id: row.get(2)?,
            original_url: row.get(3)?,
            display_url: row.get(4)?,
            descriptor: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_photo(self) -> Result<Photo, StoreError> {
        // An unreadable descriptor leaves the photo unresolved rather than
        // failing the whole event listing.
        let descriptor = match self.descriptor {
            Some(json) => match serde_json::from_str(&json) {
                Ok(values) => Some(Descriptor::new(values)),
                Err(e) => {
                    tracing::warn!(photo_id = %self.id, error = %e, "undecodable descriptor treated as unresolved");
                    None
                }
            },
            None => None,
        };
        let status =
            PhotoStatus::parse(&self.status).ok_or_else(|| corrupt(&self.id, format!("status: {}", self.status)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(&self.id, format!("created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(Photo {
            id: PhotoId(self.id),
            event_id: EventId(self.event_id),
            agency_id: self.agency_id,
            original_url: self.original_url,
            display_url: self.display_url,
            descriptor,
            status,
            created_at,
        })
    }
}

fn corrupt(id: &str, reason: String) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason,
    }
}

fn db_err(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn encode_descriptor(d: &Descriptor) -> String {
    serde_json::Value::from(d.values.clone()).to_string()
}

fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct SqliteGalleryStore {
    conn: Connection,
    default_pricing: Pricing,
    subscribers: Mutex<HashMap<EventId, watch::Sender<Vec<Photo>>>>,
    // Serializes refresh-and-send so listings never go backwards.
    publish_lock: tokio::sync::Mutex<()>,
}

impl SqliteGalleryStore {
    /// Open or create the database file and run migrations.
    pub async fn open(path: &Path, default_pricing: Pricing) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("failed to create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).await.map_err(db_err)?;
        Self::init(conn, default_pricing).await
    }

    pub async fn open_in_memory(default_pricing: Pricing) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(db_err)?;
        Self::init(conn, default_pricing).await
    }

    async fn init(conn: Connection, default_pricing: Pricing) -> Result<Self, StoreError> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(db_err)?;
        tracing::debug!("gallery schema ready");

        Ok(Self {
            conn,
            default_pricing,
            subscribers: Mutex::new(HashMap::new()),
            publish_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn event_where(&self, column: &'static str, value: String) -> Result<Option<Event>, StoreError> {
        let row = self
            .conn
            .call(move |c| {
                let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE {column} = ?1");
                Ok(c.query_row(&sql, params![value], EventRow::read).optional()?)
            })
            .await
            .map_err(db_err)?;
        row.map(|r| r.into_event(self.default_pricing)).transpose()
    }

    /// Push a fresh listing to live subscribers of `event_id`, if any.
    async fn publish(&self, event_id: &EventId) {
        let _guard = self.publish_lock.lock().await;
        {
            let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subs.retain(|_, tx| tx.receiver_count() > 0);
            if !subs.contains_key(event_id) {
                return;
            }
        }

        match self.photos_for_event(event_id).await {
            Ok(photos) => {
                let subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(tx) = subs.get(event_id) {
                    tracing::debug!(event_id = %event_id, photos = photos.len(), "listing refreshed");
                    tx.send_replace(photos);
                }
            }
            Err(e) => tracing::warn!(event_id = %event_id, error = %e, "listing refresh failed"),
        }
    }
}

#[async_trait]
impl GalleryStore for SqliteGalleryStore {
    async fn create_event(&self, event: NewEvent) -> Result<Event, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let pricing =
            serde_json::to_string(&event.pricing).map_err(|e| StoreError::Database(format!("pricing: {e}")))?;

        let (row_id, slug, date) = (id.clone(), event.slug.clone(), event.date.to_string());
        let (name, agency) = (event.name.clone(), event.agency_id.clone());
        let inserted = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                if let Some(slug) = &slug {
                    let taken: bool =
                        tx.query_row("SELECT EXISTS(SELECT 1 FROM events WHERE slug = ?1)", params![slug], |r| r.get(0))?;
                    if taken {
                        return Ok(false);
                    }
                }
                tx.execute(
                    "INSERT INTO events (id, name, slug, date, agency_id, pricing) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![row_id, name, slug, date, agency, pricing],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(db_err)?;

        if !inserted {
            return Err(StoreError::SlugTaken(event.slug.unwrap_or_default()));
        }
        tracing::info!(event_id = %id, name = %event.name, "event created");
        Ok(Event {
            id: EventId(id),
            name: event.name,
            slug: event.slug,
            date: event.date,
            agency_id: event.agency_id,
            pricing: event.pricing,
        })
    }

    async fn update_pricing(&self, id: &EventId, pricing: Pricing) -> Result<(), StoreError> {
        let json = serde_json::to_string(&pricing).map_err(|e| StoreError::Database(format!("pricing: {e}")))?;
        let row_id = id.0.clone();
        let changed = self
            .conn
            .call(move |c| Ok(c.execute("UPDATE events SET pricing = ?1 WHERE id = ?2", params![json, row_id])?))
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                kind: "event",
                id: id.0.clone(),
            });
        }
        tracing::info!(event_id = %id, "pricing updated");
        Ok(())
    }

    async fn event_by_id(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        self.event_where("id", id.0.clone()).await
    }

    async fn event_by_slug(&self, slug: &str) -> Result<Option<Event>, StoreError> {
        self.event_where("slug", slug.to_string()).await
    }

    async fn photos_for_event(&self, id: &EventId) -> Result<Vec<Photo>, StoreError> {
        let event_id = id.0.clone();
        let rows = self
            .conn
            .call(move |c| {
                let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE event_id = ?1 ORDER BY created_at, id");
                let mut stmt = c.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![event_id], PhotoRow::read)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(db_err)?;
        rows.into_iter().map(PhotoRow::into_photo).collect()
    }

    async fn insert_photo(&self, photo: &Photo) -> Result<(), StoreError> {
        if photo.descriptor.as_ref().is_some_and(|d| !d.is_finite()) {
            return Err(StoreError::InvalidDescriptor(photo.id.clone()));
        }
        let values = (
            photo.id.0.clone(),
            photo.event_id.0.clone(),
            photo.agency_id.clone(),
            photo.original_url.clone(),
            photo.display_url.clone(),
            photo.descriptor.as_ref().map(encode_descriptor),
            photo.status.as_str(),
            encode_time(&photo.created_at),
        );
        self.conn
            .call(move |c| {
                c.execute(
                    &format!("INSERT INTO photos ({PHOTO_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                    params![values.0, values.1, values.2, values.3, values.4, values.5, values.6, values.7],
                )?;
                Ok(())
            })
            .await
            .map_err(db_err)?;

        tracing::debug!(photo_id = %photo.id, event_id = %photo.event_id, "photo inserted");
        self.publish(&photo.event_id).await;
        Ok(())
    }

    async fn delete_photo(&self, id: &PhotoId) -> Result<bool, StoreError> {
        let row_id = id.0.clone();
        let event_id = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let event_id: Option<String> = tx
                    .query_row("SELECT event_id FROM photos WHERE id = ?1", params![row_id], |r| r.get(0))
                    .optional()?;
                if event_id.is_some() {
                    tx.execute("DELETE FROM photos WHERE id = ?1", params![row_id])?;
                }
                tx.commit()?;
                Ok(event_id)
            })
            .await
            .map_err(db_err)?;

        match event_id {
            Some(event_id) => {
                let event_id = EventId(event_id);
                tracing::info!(photo_id = %id, event_id = %event_id, "photo deleted");
                self.publish(&event_id).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn attach_descriptor(&self, id: &PhotoId, descriptor: &Descriptor) -> Result<(), StoreError> {
        if descriptor.is_empty() || !descriptor.is_finite() {
            return Err(StoreError::InvalidDescriptor(id.clone()));
        }
        let row_id = id.0.clone();
        let json = encode_descriptor(descriptor);
        // Only NULL or empty placeholders may be filled.
        let outcome = self
            .conn
            .call(move |c| {
                let tx = c.transaction()?;
                let current: Option<(String, Option<String>)> = tx
                    .query_row("SELECT event_id, descriptor FROM photos WHERE id = ?1", params![row_id], |r| {
                        Ok((r.get(0)?, r.get(1)?))
                    })
                    .optional()?;
                let Some((event_id, existing)) = current else {
                    return Ok(None);
                };
                let placeholder = existing.as_deref().map_or(true, |d| d.trim() == "[]");
                if placeholder {
                    tx.execute("UPDATE photos SET descriptor = ?1 WHERE id = ?2", params![json, row_id])?;
                    tx.commit()?;
                }
                Ok(Some((event_id, placeholder)))
            })
            .await
            .map_err(db_err)?;

        match outcome {
            None => Err(StoreError::NotFound {
                kind: "photo",
                id: id.0.clone(),
            }),
            Some((_, false)) => Err(StoreError::DescriptorPresent(id.clone())),
            Some((event_id, true)) => {
                tracing::info!(photo_id = %id, len = descriptor.len(), "descriptor attached");
                self.publish(&EventId(event_id)).await;
                Ok(())
            }
        }
    }

    async fn subscribe_photos(&self, id: &EventId) -> Result<watch::Receiver<Vec<Photo>>, StoreError> {
        let _guard = self.publish_lock.lock().await;
        let current = self.photos_for_event(id).await?;
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = subs
            .entry(id.clone())
            .or_insert_with(|| watch::channel(Vec::new()).0);
        tx.send_replace(current);
        Ok(tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facefind_core::Price;

    fn new_event(slug: Option<&str>) -> NewEvent {
        NewEvent {
            name: "Spring Gala".into(),
            slug: slug.map(str::to_string),
            date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            agency_id: "agency-1".into(),
            pricing: Pricing::default(),
        }
    }

    fn photo(id: &str, event: &EventId, descriptor: Option<Vec<f32>>) -> Photo {
        Photo {
            id: id.into(),
            event_id: event.clone(),
            agency_id: "agency-1".into(),
            original_url: format!("file:///store/{id}.jpg"),
            display_url: format!("file:///store/{id}.jpg"),
            descriptor: descriptor.map(Descriptor::new),
            status: PhotoStatus::Active,
            created_at: Utc::now(),
        }
    }

    async fn store() -> SqliteGalleryStore {
        SqliteGalleryStore::open_in_memory(Pricing::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_event_lookup_by_id_and_slug() {
        let store = store().await;
        let event = store.create_event(new_event(Some("spring-gala"))).await.unwrap();

        let by_id = store.event_by_id(&event.id).await.unwrap().unwrap();
        assert_eq!(by_id, event);
        let by_slug = store.event_by_slug("spring-gala").await.unwrap().unwrap();
        assert_eq!(by_slug.id, event.id);
        assert!(store.event_by_slug("autumn").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let store = store().await;
        store.create_event(new_event(Some("gala"))).await.unwrap();
        let err = store.create_event(new_event(Some("gala"))).await.unwrap_err();
        assert!(matches!(err, StoreError::SlugTaken(ref s) if s == "gala"));
        // Events without a slug never collide.
        store.create_event(new_event(None)).await.unwrap();
        store.create_event(new_event(None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_pricing_update() {
        let store = store().await;
        let event = store.create_event(new_event(None)).await.unwrap();
        let pricing = Pricing {
            print: Price(1499),
            ..Pricing::default()
        };
        store.update_pricing(&event.id, pricing).await.unwrap();
        let loaded = store.event_by_id(&event.id).await.unwrap().unwrap();
        assert_eq!(loaded.pricing.print, Price(1499));

        let missing = store.update_pricing(&EventId::from("nope"), pricing).await;
        assert!(matches!(missing, Err(StoreError::NotFound { kind: "event", .. })));
    }

    #[tokio::test]
    async fn test_photo_roundtrip_with_and_without_descriptor() {
        let store = store().await;
        let event = store.create_event(new_event(None)).await.unwrap();
        store.insert_photo(&photo("p1", &event.id, Some(vec![0.25, -1.5]))).await.unwrap();
        store.insert_photo(&photo("p2", &event.id, None)).await.unwrap();

        let photos = store.photos_for_event(&event.id).await.unwrap();
        assert_eq!(photos.len(), 2);
        let p1 = photos.iter().find(|p| p.id.0 == "p1").unwrap();
        assert_eq!(p1.descriptor, Some(Descriptor::new(vec![0.25, -1.5])));
        let p2 = photos.iter().find(|p| p.id.0 == "p2").unwrap();
        assert!(p2.descriptor.is_none());
    }

    #[tokio::test]
    async fn test_photo_for_unknown_event_rejected() {
        let store = store().await;
        let orphan = photo("p1", &EventId::from("missing"), None);
        assert!(matches!(store.insert_photo(&orphan).await, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn test_attach_descriptor_is_write_once() {
        let store = store().await;
        let event = store.create_event(new_event(None)).await.unwrap();
        store.insert_photo(&photo("p1", &event.id, None)).await.unwrap();
        store.insert_photo(&photo("p2", &event.id, Some(vec![]))).await.unwrap();

        let d = Descriptor::new(vec![0.1, 0.2]);
        store.attach_descriptor(&"p1".into(), &d).await.unwrap();
        store.attach_descriptor(&"p2".into(), &d).await.unwrap();

        let again = store.attach_descriptor(&"p1".into(), &Descriptor::new(vec![9.0, 9.0])).await;
        assert!(matches!(again, Err(StoreError::DescriptorPresent(_))));
        let missing = store.attach_descriptor(&"nope".into(), &d).await;
        assert!(matches!(missing, Err(StoreError::NotFound { kind: "photo", .. })));

        let photos = store.photos_for_event(&event.id).await.unwrap();
        assert!(photos.iter().all(|p| p.descriptor.as_ref() == Some(&d)));
    }

    #[tokio::test]
    async fn test_non_finite_descriptor_rejected() {
        let store = store().await;
        let event = store.create_event(new_event(None)).await.unwrap();
        store.insert_photo(&photo("good", &event.id, Some(vec![0.1, 0.2]))).await.unwrap();
        store.insert_photo(&photo("bad", &event.id, None)).await.unwrap();

        let nan = Descriptor::new(vec![f32::NAN, 1e300_f64 as f32]);
        let err = store.attach_descriptor(&"bad".into(), &nan).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDescriptor(ref id) if id.0 == "bad"));
        let err = store.attach_descriptor(&"bad".into(), &Descriptor::new(vec![])).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDescriptor(_)));
        let orphan = photo("worse", &event.id, Some(vec![f32::INFINITY]));
        assert!(matches!(
            store.insert_photo(&orphan).await,
            Err(StoreError::InvalidDescriptor(_))
        ));

        // The placeholder is still fillable and the listing still loads.
        store.attach_descriptor(&"bad".into(), &Descriptor::new(vec![0.3, 0.4])).await.unwrap();
        assert_eq!(store.photos_for_event(&event.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_descriptor_is_unresolved() {
        let store = store().await;
        let event = store.create_event(new_event(None)).await.unwrap();
        store.insert_photo(&photo("good", &event.id, Some(vec![0.1, 0.2]))).await.unwrap();
        store.insert_photo(&photo("bad", &event.id, None)).await.unwrap();
        store
            .conn
            .call(|c| {
                c.execute("UPDATE photos SET descriptor = '[null, null]' WHERE id = 'bad'", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let photos = store.photos_for_event(&event.id).await.unwrap();
        assert_eq!(photos.len(), 2);
        let bad = photos.iter().find(|p| p.id.0 == "bad").unwrap();
        assert!(bad.descriptor.is_none());
        let good = photos.iter().find(|p| p.id.0 == "good").unwrap();
        assert_eq!(good.descriptor, Some(Descriptor::new(vec![0.1, 0.2])));
    }

    #[tokio::test]
    async fn test_subscription_sees_insert_and_delete() {
        let store = store().await;
        let event = store.create_event(new_event(None)).await.unwrap();
        let other = store.create_event(new_event(None)).await.unwrap();
        store.insert_photo(&photo("keep", &event.id, None)).await.unwrap();

        let mut listing = store.subscribe_photos(&event.id).await.unwrap();
        assert_eq!(listing.borrow_and_update().len(), 1);

        store.insert_photo(&photo("gone", &event.id, None)).await.unwrap();
        assert!(listing.has_changed().unwrap());
        assert_eq!(listing.borrow_and_update().len(), 2);

        assert!(store.delete_photo(&"gone".into()).await.unwrap());
        let ids: Vec<String> = listing.borrow_and_update().iter().map(|p| p.id.0.clone()).collect();
        assert_eq!(ids, vec!["keep".to_string()]);

        // Writes to another event leave this listing alone.
        store.insert_photo(&photo("elsewhere", &other.id, None)).await.unwrap();
        assert!(!listing.has_changed().unwrap());

        assert!(!store.delete_photo(&"gone".into()).await.unwrap());
    }
}
