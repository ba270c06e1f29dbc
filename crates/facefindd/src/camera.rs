use async_trait::async_trait;
use facefind_core::{CameraDevice, CameraError, Frame};
use facefind_hw::{StillImageCamera, V4lCamera};

/// The kiosk's configured camera: a V4L2 node or a still image on disk.
pub enum KioskCamera {
    V4l(V4lCamera),
    Still(StillImageCamera),
}

impl KioskCamera {
    pub fn from_config(device: &str, warmup_frames: usize) -> Self {
        if StillImageCamera::handles(device) {
            tracing::info!(path = device, "using still image as camera");
            KioskCamera::Still(StillImageCamera::new(device))
        } else {
            KioskCamera::V4l(V4lCamera::new(device, warmup_frames))
        }
    }

    fn inner(&mut self) -> &mut dyn CameraDevice {
        match self {
            KioskCamera::V4l(c) => c,
            KioskCamera::Still(c) => c,
        }
    }
}

#[async_trait]
impl CameraDevice for KioskCamera {
    async fn acquire(&mut self) -> Result<(), CameraError> {
        self.inner().acquire().await
    }

    async fn grab_frame(&mut self) -> Result<Frame, CameraError> {
        self.inner().grab_frame().await
    }

    fn release(&mut self) {
        self.inner().release()
    }

    fn is_acquired(&self) -> bool {
        match self {
            KioskCamera::V4l(c) => c.is_acquired(),
            KioskCamera::Still(c) => c.is_acquired(),
        }
    }
}
