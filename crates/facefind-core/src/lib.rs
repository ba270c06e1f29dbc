//! facefind-core: Selfie search over an event photo gallery.
//!
//! Matches one live query descriptor against the stored descriptors of an
//! event's photos, and drives the camera capture session that produces it.

pub mod camera;
pub mod cart;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod session;
pub mod types;

pub use camera::{CameraDevice, CameraError};
pub use cart::{Cart, CartLineItem, CartSink};
pub use extractor::{Extraction, ExtractorError, FaceExtractor, ModelGate, ModelStatus};
pub use gallery::{resolve_gallery, EventRef, GalleryError, GalleryStore, GalleryView, NewEvent, StoreError};
pub use matcher::{
    filter_gallery, Candidate, EuclideanMatcher, FilterKind, GalleryFilter, MatchConfig, MatchError, Matcher,
    UnresolvedPolicy,
};
pub use session::{CaptureOutcome, CaptureSession, DeviceStats, SessionError, SessionState};
pub use types::{Descriptor, Event, EventId, Frame, Photo, PhotoId, PhotoStatus, Price, Pricing, PurchaseTier};
