use crate::engine::{EngineError, EngineHandle};
use chrono::NaiveDate;
use facefind_core::{
    CameraError, Descriptor, EventId, EventRef, GalleryError, GalleryStore, NewEvent, PhotoId, Pricing, PurchaseTier,
    SessionError, StoreError,
};
use facefind_store::{IngestError, IngestionQueue, UploadFile};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use zbus::fdo;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const SERVICE_NAME: &str = "org.facefind.Gallery1";
pub const SERVICE_PATH: &str = "/org/facefind/Gallery1";

/// D-Bus interface for the FaceFind kiosk daemon.
///
/// Bus name: org.facefind.Gallery1
/// Object path: /org/facefind/Gallery1
pub struct FaceFindService {
    engine: EngineHandle,
    store: Arc<dyn GalleryStore>,
    ingest: Arc<IngestionQueue>,
    default_pricing: Pricing,
    watched: Arc<Mutex<HashSet<EventId>>>,
}

impl FaceFindService {
    pub fn new(
        engine: EngineHandle,
        store: Arc<dyn GalleryStore>,
        ingest: Arc<IngestionQueue>,
        default_pricing: Pricing,
    ) -> Self {
        Self {
            engine,
            store,
            ingest,
            default_pricing,
            watched: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Forward live listing changes for `event_id` as `PhotosChanged` signals.
    fn watch_listing(&self, conn: &zbus::Connection, event_id: EventId) {
        if !self.watched.lock().unwrap_or_else(PoisonError::into_inner).insert(event_id.clone()) {
            return;
        }
        let (ingest, conn, watched) = (self.ingest.clone(), conn.clone(), self.watched.clone());

        tokio::spawn(async move {
            let emitter = SignalEmitter::new(&conn, SERVICE_PATH);
            let listing = ingest.listing(&event_id).await;
            let (emitter, mut listing) = match (emitter, listing) {
                (Ok(emitter), Ok(listing)) => (emitter, listing),
                (Err(e), _) => {
                    tracing::warn!(event_id = %event_id, error = %e, "cannot emit listing signals");
                    watched.lock().unwrap_or_else(PoisonError::into_inner).remove(&event_id);
                    return;
                }
                (_, Err(e)) => {
                    tracing::warn!(event_id = %event_id, error = %e, "cannot subscribe to listing");
                    watched.lock().unwrap_or_else(PoisonError::into_inner).remove(&event_id);
                    return;
                }
            };
            tracing::debug!(event_id = %event_id, "watching photo listing");

            while listing.changed().await.is_ok() {
                let count = listing.borrow_and_update().len() as u32;
                if let Err(e) = FaceFindService::photos_changed(&emitter, &event_id.0, count).await {
                    tracing::warn!(event_id = %event_id, error = %e, "PhotosChanged emit failed");
                }
            }
        });
    }
}

#[interface(name = "org.facefind.Gallery1")]
impl FaceFindService {
    // --- attendee ---

    /// Open an event gallery by id. Returns the gallery snapshot as JSON.
    async fn open_event(&self, event_id: &str) -> fdo::Result<String> {
        tracing::info!(event_id, "open_event requested");
        let snapshot = self
            .engine
            .open_event(EventRef::Id(EventId::from(event_id)))
            .await
            .map_err(engine_error)?;
        json(&snapshot)
    }

    /// Open an event gallery by its slug.
    async fn open_event_by_slug(&self, slug: &str) -> fdo::Result<String> {
        tracing::info!(slug, "open_event_by_slug requested");
        let snapshot = self
            .engine
            .open_event(EventRef::Slug(slug.to_string()))
            .await
            .map_err(engine_error)?;
        json(&snapshot)
    }

    /// Turn the camera on for a selfie search.
    async fn start_search(&self) -> fdo::Result<()> {
        self.engine.start_search().await.map_err(engine_error)
    }

    /// Capture a selfie and filter the gallery. On `no_face` the camera stays on.
    async fn capture(&self) -> fdo::Result<String> {
        let report = self.engine.capture().await.map_err(engine_error)?;
        json(&report)
    }

    async fn cancel_search(&self) -> fdo::Result<()> {
        self.engine.cancel_search().await.map_err(engine_error)
    }

    async fn visible_photos(&self) -> fdo::Result<String> {
        let snapshot = self.engine.visible().await.map_err(engine_error)?;
        json(&snapshot)
    }

    /// Add a visible photo at a purchase tier (social, print, original, remix_credit).
    async fn add_to_cart(&self, photo_id: &str, tier: &str) -> fdo::Result<String> {
        let tier = PurchaseTier::parse(tier).ok_or_else(|| fdo::Error::InvalidArgs(format!("unknown tier: {tier}")))?;
        let (added, cart) = self
            .engine
            .add_to_cart(PhotoId::from(photo_id), tier)
            .await
            .map_err(engine_error)?;
        Ok(serde_json::json!({ "added": added, "cart": cart }).to_string())
    }

    async fn cart(&self) -> fdo::Result<String> {
        let cart = self.engine.cart().await.map_err(engine_error)?;
        json(&cart)
    }

    async fn clear_cart(&self) -> fdo::Result<()> {
        self.engine.clear_cart().await.map_err(engine_error)
    }

    /// Complete checkout. Returns the purchased lines and total.
    async fn checkout(&self) -> fdo::Result<String> {
        let receipt = self.engine.checkout().await.map_err(engine_error)?;
        json(&receipt)
    }

    // --- operator ---

    /// Create an event. `date` is YYYY-MM-DD; an empty `slug` means none.
    async fn create_event(&self, operator: &str, name: &str, date: &str, slug: &str) -> fdo::Result<String> {
        tracing::info!(operator, name, date, slug, "create_event requested");
        if name.trim().is_empty() {
            return Err(fdo::Error::InvalidArgs("event name must not be empty".into()));
        }
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| fdo::Error::InvalidArgs(format!("invalid date {date:?}: {e}")))?;
        let event = self
            .store
            .create_event(NewEvent {
                name: name.trim().to_string(),
                slug: (!slug.is_empty()).then(|| slug.to_string()),
                date,
                agency_id: operator.to_string(),
                pricing: self.default_pricing,
            })
            .await
            .map_err(store_error)?;
        json(&event)
    }

    /// Replace an event's price schedule, given as JSON in cents.
    async fn set_pricing(&self, event_id: &str, pricing: &str) -> fdo::Result<()> {
        let pricing: Pricing =
            serde_json::from_str(pricing).map_err(|e| fdo::Error::InvalidArgs(format!("invalid pricing: {e}")))?;
        self.store
            .update_pricing(&EventId::from(event_id), pricing)
            .await
            .map_err(store_error)
    }

    /// Queue image files for upload. Returns the new entry ids as JSON.
    async fn upload_photos(
        &self,
        operator: &str,
        event_id: &str,
        paths: Vec<String>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> fdo::Result<String> {
        tracing::info!(operator, event_id, files = paths.len(), "upload_photos requested");
        let event_id = EventId::from(event_id);
        if self.store.event_by_id(&event_id).await.map_err(store_error)?.is_none() {
            return Err(fdo::Error::FileNotFound(format!("event not found: {event_id}")));
        }

        let files: Vec<UploadFile> = paths.into_iter().map(UploadFile::from_path).collect();

        self.watch_listing(conn, event_id.clone());
        let batch = self.ingest.submit(operator, &event_id, files);
        let ids = batch.entries.clone();
        tokio::spawn(batch.wait());
        json(&ids)
    }

    /// Every upload entry with its current state, in submission order.
    async fn upload_status(&self) -> fdo::Result<String> {
        json(&self.ingest.snapshot())
    }

    /// All photos of an event, including unprocessed ones.
    async fn list_photos(&self, event_id: &str) -> fdo::Result<String> {
        let photos = self
            .store
            .photos_for_event(&EventId::from(event_id))
            .await
            .map_err(store_error)?;
        json(&photos)
    }

    async fn delete_photo(&self, photo_id: &str, confirmed: bool) -> fdo::Result<()> {
        tracing::info!(photo_id, confirmed, "delete_photo requested");
        self.ingest
            .delete_photo(&PhotoId::from(photo_id), confirmed)
            .await
            .map_err(|e| match e {
                IngestError::Unconfirmed => fdo::Error::InvalidArgs(e.to_string()),
                IngestError::PhotoNotFound(_) => fdo::Error::FileNotFound(e.to_string()),
                IngestError::Store(e) => store_error(e),
            })
    }

    /// Attach a computed descriptor to a photo that has none yet.
    async fn attach_descriptor(&self, photo_id: &str, values: Vec<f64>) -> fdo::Result<()> {
        if values.is_empty() {
            return Err(fdo::Error::InvalidArgs("descriptor must not be empty".into()));
        }
        let descriptor = Descriptor::new(values.into_iter().map(|v| v as f32).collect());
        if !descriptor.is_finite() {
            return Err(fdo::Error::InvalidArgs(
                "descriptor values must be finite and within f32 range".into(),
            ));
        }
        self.store
            .attach_descriptor(&PhotoId::from(photo_id), &descriptor)
            .await
            .map_err(store_error)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let status = self.engine.status().await.map_err(engine_error)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session": status.session,
            "model": status.model,
            "camera": status.camera,
            "event_id": status.event_id,
            "cart_items": status.cart_items,
            "uploads": self.ingest.snapshot().len(),
        })
        .to_string())
    }

    /// Emitted when an uploaded-to event's photo listing changes.
    #[zbus(signal)]
    async fn photos_changed(emitter: &SignalEmitter<'_>, event_id: &str, count: u32) -> zbus::Result<()>;
}

fn json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("serialization failed: {e}")))
}

/// Session errors carry the attendee-facing notice first.
fn engine_error(e: EngineError) -> fdo::Error {
    match e {
        EngineError::Session(ref s) => {
            let msg = format!("{} ({s})", s.notice());
            match s {
                SessionError::CameraUnavailable(CameraError::PermissionDenied) => fdo::Error::AccessDenied(msg),
                SessionError::SearchDisabled(_) => fdo::Error::NotSupported(msg),
                _ => fdo::Error::Failed(msg),
            }
        }
        EngineError::Gallery(GalleryError::EventNotFound(ref id)) => {
            fdo::Error::FileNotFound(format!("event not found: {id}"))
        }
        EngineError::Gallery(GalleryError::Store(e)) => store_error(e),
        EngineError::PhotoNotVisible(_) => fdo::Error::InvalidArgs(e.to_string()),
        EngineError::NoGallery | EngineError::ChannelClosed => fdo::Error::Failed(e.to_string()),
    }
}

fn store_error(e: StoreError) -> fdo::Error {
    match e {
        StoreError::NotFound { .. } => fdo::Error::FileNotFound(e.to_string()),
        StoreError::SlugTaken(_) | StoreError::InvalidDescriptor(_) => fdo::Error::InvalidArgs(e.to_string()),
        StoreError::Database(_) | StoreError::Corrupt { .. } | StoreError::DescriptorPresent(_) => {
            fdo::Error::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_maps_to_access_denied() {
        let e = EngineError::Session(SessionError::CameraUnavailable(CameraError::PermissionDenied));
        match engine_error(e) {
            fdo::Error::AccessDenied(msg) => assert!(msg.starts_with("Camera access denied.")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unavailable_model_maps_to_not_supported() {
        let e = EngineError::Session(SessionError::SearchDisabled("model file missing".into()));
        assert!(matches!(engine_error(e), fdo::Error::NotSupported(_)));
    }

    #[test]
    fn test_unknown_event_maps_to_file_not_found() {
        let e = EngineError::Gallery(GalleryError::EventNotFound("gala".into()));
        assert!(matches!(engine_error(e), fdo::Error::FileNotFound(_)));
    }

    #[test]
    fn test_store_errors() {
        assert!(matches!(
            store_error(StoreError::SlugTaken("gala".into())),
            fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(
            store_error(StoreError::DescriptorPresent("p1".into())),
            fdo::Error::Failed(_)
        ));
        assert!(matches!(
            store_error(StoreError::InvalidDescriptor("p1".into())),
            fdo::Error::InvalidArgs(_)
        ));
    }
}
