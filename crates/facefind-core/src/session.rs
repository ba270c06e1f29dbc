//! Capture session: one selfie search attempt, from camera start to result.
//!
//! The session is a single state value. Camera side effects happen only on
//! transitions, so at most one acquisition can be outstanding and every path
//! back to `Idle` releases the device exactly once. Callers serialize access
//! through `&mut self`; a cancel that arrives during processing is applied
//! after the in-flight extraction returns.

use crate::camera::{CameraDevice, CameraError};
use crate::extractor::{Extraction, FaceExtractor, ModelGate, ModelStatus};
use crate::gallery::GalleryView;
use crate::matcher::{filter_gallery, EuclideanMatcher, GalleryFilter, MatchConfig};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a capture session is already active")]
    Busy,
    #[error("face search disabled: {0}")]
    SearchDisabled(String),
    #[error("face models are still loading")]
    ModelLoading,
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[source] CameraError),
    #[error("no camera session in progress")]
    NotCapturing,
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),
}

impl SessionError {
    /// Message suitable for showing to the attendee.
    pub fn notice(&self) -> &'static str {
        match self {
            SessionError::Busy => "A search is already in progress.",
            SessionError::SearchDisabled(_) => "Face search is unavailable.",
            SessionError::ModelLoading => "Face models are still loading.",
            SessionError::CameraUnavailable(_) => "Camera access denied.",
            SessionError::NotCapturing => "Start the camera first.",
            SessionError::AnalysisFailed(_) => "Analysis failed.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// No camera held. `filtered` is true while a narrowing result is shown.
    Idle { filtered: bool },
    CameraActive,
    Processing,
}

/// Result of a capture attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// A face was found and the gallery was filtered.
    Matched(GalleryFilter),
    /// No face in frame; the camera stays on for another attempt.
    NoFace,
}

pub const NO_FACE_NOTICE: &str = "No face detected. Try again.";

/// Running acquire/release counters for the camera device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub acquired: u64,
    pub released: u64,
}

pub struct CaptureSession<C: CameraDevice> {
    state: SessionState,
    camera: C,
    extractor: Arc<dyn FaceExtractor>,
    model: ModelGate,
    matcher: EuclideanMatcher,
    stats: DeviceStats,
}

impl<C: CameraDevice> CaptureSession<C> {
    pub fn new(camera: C, extractor: Arc<dyn FaceExtractor>, model: ModelGate, config: MatchConfig) -> Self {
        Self {
            state: SessionState::Idle { filtered: false },
            camera,
            extractor,
            model,
            matcher: EuclideanMatcher::new(config),
            stats: DeviceStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn model_status(&self) -> ModelStatus {
        self.model.status()
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    /// `Idle → CameraActive`: acquire the camera.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Idle { .. }) {
            return Err(SessionError::Busy);
        }
        if let ModelStatus::Unavailable(reason) = self.model.status() {
            return Err(SessionError::SearchDisabled(reason));
        }

        if let Err(e) = self.camera.acquire().await {
            tracing::warn!(error = %e, "camera acquire failed");
            return Err(SessionError::CameraUnavailable(e));
        }
        self.stats.acquired += 1;
        self.state = SessionState::CameraActive;
        tracing::info!(acquired = self.stats.acquired, "camera acquired; session active");
        Ok(())
    }

    /// `CameraActive → Processing → {CameraActive | Idle}`: grab a frame and search.
    pub async fn capture(&mut self, view: &mut GalleryView) -> Result<CaptureOutcome, SessionError> {
        if self.state != SessionState::CameraActive {
            return Err(SessionError::NotCapturing);
        }
        match self.model.status() {
            ModelStatus::Ready => {}
            ModelStatus::Loading => {
                tracing::debug!("capture rejected; model still loading");
                return Err(SessionError::ModelLoading);
            }
            // The load failed after `start`; search is off for good.
            ModelStatus::Unavailable(reason) => {
                self.release_device();
                self.state = SessionState::Idle {
                    filtered: view.is_filtered(),
                };
                tracing::warn!(reason = %reason, "capture rejected; model unavailable");
                return Err(SessionError::SearchDisabled(reason));
            }
        }

        self.state = SessionState::Processing;
        tracing::debug!("processing capture");

        let frame = match self.camera.grab_frame().await {
            Ok(frame) => frame,
            Err(e) => return Err(self.abort(view, format!("frame capture: {e}"))),
        };

        let query = match self.extractor.extract(&frame).await {
            Ok(Extraction::Face(descriptor)) => descriptor,
            Ok(Extraction::NoFace) => {
                self.state = SessionState::CameraActive;
                tracing::info!("no face detected; camera stays active");
                return Ok(CaptureOutcome::NoFace);
            }
            Err(e) => return Err(self.abort(view, e.to_string())),
        };

        // The device goes back before matching starts.
        self.release_device();

        let filter = match filter_gallery(&self.matcher, &query, &view.candidates()) {
            Ok(filter) => filter,
            Err(e) => return Err(self.abort(view, e.to_string())),
        };
        view.apply(filter.clone());
        self.state = SessionState::Idle {
            filtered: view.is_filtered(),
        };
        Ok(CaptureOutcome::Matched(filter))
    }

    /// Abort from any state back to an unfiltered gallery.
    pub fn cancel(&mut self, view: &mut GalleryView) {
        self.release_device();
        view.reset();
        self.state = SessionState::Idle { filtered: false };
        tracing::info!("search cancelled");
    }

    /// Drop a shown result when the gallery it filtered is replaced.
    pub fn clear_result(&mut self) {
        if self.state == (SessionState::Idle { filtered: true }) {
            self.state = SessionState::Idle { filtered: false };
        }
    }

    fn abort(&mut self, view: &GalleryView, reason: String) -> SessionError {
        self.release_device();
        self.state = SessionState::Idle {
            filtered: view.is_filtered(),
        };
        tracing::warn!(reason = %reason, "capture aborted");
        SessionError::AnalysisFailed(reason)
    }

    fn release_device(&mut self) {
        if self.camera.is_acquired() {
            self.camera.release();
            self.stats.released += 1;
            tracing::info!(released = self.stats.released, "camera released");
        }
    }
}

impl<C: CameraDevice> Drop for CaptureSession<C> {
    fn drop(&mut self) {
        self.release_device();
    }
}
