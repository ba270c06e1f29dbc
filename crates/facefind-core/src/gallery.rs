//! Gallery Store seam, event resolution, and the attendee gallery view.

use crate::matcher::{Candidate, GalleryFilter};
use crate::types::{Descriptor, Event, EventId, Photo, PhotoId, PhotoStatus, Pricing};
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("slug already in use: {0}")]
    SlugTaken(String),
    #[error("descriptor already populated for photo {0}")]
    DescriptorPresent(PhotoId),
    #[error("invalid descriptor for photo {0}: values must be finite and non-empty")]
    InvalidDescriptor(PhotoId),
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("event not found: {0}")]
    EventNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fields an operator supplies when creating an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub slug: Option<String>,
    pub date: NaiveDate,
    pub agency_id: String,
    pub pricing: Pricing,
}

/// Persistent event and photo inventory.
#[async_trait]
pub trait GalleryStore: Send + Sync {
    async fn create_event(&self, event: NewEvent) -> Result<Event, StoreError>;

    async fn update_pricing(&self, id: &EventId, pricing: Pricing) -> Result<(), StoreError>;

    async fn event_by_id(&self, id: &EventId) -> Result<Option<Event>, StoreError>;

    /// Single-field equality lookup on the slug.
    async fn event_by_slug(&self, slug: &str) -> Result<Option<Event>, StoreError>;

    /// One-shot read of every photo belonging to the event.
    async fn photos_for_event(&self, id: &EventId) -> Result<Vec<Photo>, StoreError>;

    async fn insert_photo(&self, photo: &Photo) -> Result<(), StoreError>;

    /// Remove the photo record. Returns false if it did not exist.
    async fn delete_photo(&self, id: &PhotoId) -> Result<bool, StoreError>;

    /// Populate a placeholder descriptor. Fails if one is already present.
    async fn attach_descriptor(&self, id: &PhotoId, descriptor: &Descriptor) -> Result<(), StoreError>;

    /// Live listing of an event's photos, refreshed on every insert or delete.
    async fn subscribe_photos(&self, id: &EventId) -> Result<watch::Receiver<Vec<Photo>>, StoreError>;
}

/// How the attendee names the event they want.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRef {
    Id(EventId),
    Slug(String),
}

/// The attendee's view of one event: photos loaded once, plus the current filter.
#[derive(Debug, Clone)]
pub struct GalleryView {
    event: Event,
    photos: Vec<Photo>,
    filter: Option<GalleryFilter>,
}

impl GalleryView {
    pub fn new(event: Event, photos: Vec<Photo>) -> Self {
        Self {
            event,
            photos,
            filter: None,
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    /// Every cached photo as matcher input.
    pub fn candidates(&self) -> Vec<Candidate<'_>> {
        self.photos.iter().map(Candidate::from).collect()
    }

    pub fn filter(&self) -> Option<&GalleryFilter> {
        self.filter.as_ref()
    }

    pub fn apply(&mut self, filter: GalleryFilter) {
        self.filter = Some(filter);
    }

    pub fn reset(&mut self) {
        self.filter = None;
    }

    /// True when the visible set is a strict subset of the gallery.
    pub fn is_filtered(&self) -> bool {
        self.filter.as_ref().is_some_and(GalleryFilter::is_narrowing)
    }

    /// Photos to render, in gallery order.
    pub fn visible(&self) -> Vec<&Photo> {
        match &self.filter {
            None => self.photos.iter().collect(),
            Some(f) => self
                .photos
                .iter()
                .filter(|p| f.photo_ids.contains(&p.id))
                .collect(),
        }
    }
}

/// Resolve an event and load its active photos once.
///
/// A slug or id that yields nothing is terminal; nothing is retried.
pub async fn resolve_gallery(store: &dyn GalleryStore, target: &EventRef) -> Result<GalleryView, GalleryError> {
    let found = match target {
        EventRef::Id(id) => store.event_by_id(id).await?,
        EventRef::Slug(slug) => store.event_by_slug(slug).await?,
    };

    let Some(event) = found else {
        let name = match target {
            EventRef::Id(id) => id.0.clone(),
            EventRef::Slug(slug) => slug.clone(),
        };
        tracing::warn!(event = %name, "event not found");
        return Err(GalleryError::EventNotFound(name));
    };

    let photos: Vec<Photo> = store
        .photos_for_event(&event.id)
        .await?
        .into_iter()
        .filter(|p| p.status == PhotoStatus::Active)
        .collect();

    tracing::info!(event_id = %event.id, photos = photos.len(), "gallery loaded");
    Ok(GalleryView::new(event, photos))
}
