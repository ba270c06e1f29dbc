//! Still-image camera: serves one image file as the capture stream.
//!
//! Used on kiosks without a webcam and for offline runs, where the
//! "camera device" is a selfie already on disk.

use crate::frame::load_image_frame;
use async_trait::async_trait;
use facefind_core::{CameraDevice, CameraError, Frame};
use std::path::PathBuf;

pub struct StillImageCamera {
    path: PathBuf,
    frame: Option<Frame>,
}

impl StillImageCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame: None,
        }
    }

    /// Whether a configured device path names an image file rather than a V4L2 node.
    pub fn handles(device_path: &str) -> bool {
        let lower = device_path.to_ascii_lowercase();
        [".jpg", ".jpeg", ".png", ".bmp", ".webp"]
            .iter()
            .any(|ext| lower.ends_with(ext))
    }
}

#[async_trait]
impl CameraDevice for StillImageCamera {
    async fn acquire(&mut self) -> Result<(), CameraError> {
        if self.frame.is_some() {
            return Err(CameraError::DeviceBusy);
        }
        if !self.path.exists() {
            return Err(CameraError::DeviceNotFound(self.path.display().to_string()));
        }
        let frame = load_image_frame(&self.path).map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        tracing::debug!(path = %self.path.display(), width = frame.width, height = frame.height, "still image loaded");
        self.frame = Some(frame);
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<Frame, CameraError> {
        self.frame.clone().ok_or(CameraError::NotAcquired)
    }

    fn release(&mut self) {
        self.frame = None;
    }

    fn is_acquired(&self) -> bool {
        self.frame.is_some()
    }
}
