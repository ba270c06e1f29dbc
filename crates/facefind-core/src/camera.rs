//! Camera device seam.

use crate::types::Frame;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("camera not acquired")]
    NotAcquired,
}

/// Exclusive access to one camera's media stream.
#[async_trait]
pub trait CameraDevice: Send {
    /// Acquire the device and start streaming.
    async fn acquire(&mut self) -> Result<(), CameraError>;

    /// Grab the current frame from an acquired device.
    async fn grab_frame(&mut self) -> Result<Frame, CameraError>;

    /// Stop every track and give the device back. Infallible.
    fn release(&mut self);

    fn is_acquired(&self) -> bool;
}
