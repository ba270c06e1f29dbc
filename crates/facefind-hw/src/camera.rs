//! V4L2 camera capture via the `v4l` crate.

use crate::frame;
use async_trait::async_trait;
use facefind_core::{CameraDevice, CameraError, Frame};
use std::io;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// Extra grabs allowed per capture while frames come back dark.
const MAX_DARK_SKIPS: usize = 3;
/// Frames darker than this share of black pixels are skipped.
const DARK_FRAME_LIMIT: f32 = 0.95;
const EBUSY: i32 = 16;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

/// Open device plus its running stream. Dropping it stops streaming.
struct ActiveStream {
    // Field order matters: the stream must drop before the device.
    stream: MmapStream<'static>,
    _device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

/// V4L2 webcam used by the kiosk for selfie capture.
pub struct V4lCamera {
    device_path: String,
    warmup_frames: usize,
    active: Option<ActiveStream>,
}

impl V4lCamera {
    /// Describe a camera by path (e.g., "/dev/video0"). Nothing is opened yet.
    pub fn new(device_path: &str, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.to_string(),
            warmup_frames,
            active: None,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    fn open(&self) -> Result<ActiveStream, CameraError> {
        if !Path::new(&self.device_path).exists() {
            return Err(CameraError::DeviceNotFound(self.device_path.clone()));
        }

        let device = Device::with_path(&self.device_path).map_err(|e| map_open_error(&self.device_path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureFailed("device cannot capture video".into()));
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;
        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to set format: {e}")))?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::CaptureFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        tracing::info!(
            device = %self.device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "camera streaming"
        );

        Ok(ActiveStream {
            stream,
            _device: device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    /// Probe `/dev/video0` through `/dev/video15` for capture-capable nodes.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).and_then(|dev| dev.query_caps()).ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                        path,
                    })
            })
            .collect()
    }
}

impl ActiveStream {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = CaptureStream::next(&mut self.stream)
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue failed: {e}")))?;

        let data = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(e.to_string()))?,
            PixelFormat::Grey => buf
                .get(..(self.width * self.height) as usize)
                .ok_or_else(|| CameraError::CaptureFailed(format!("short GREY buffer ({} bytes)", buf.len())))?
                .to_vec(),
        };

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            sequence: meta.sequence,
        })
    }
}

fn map_open_error(path: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CameraError::PermissionDenied,
        _ if e.raw_os_error() == Some(EBUSY) => CameraError::DeviceBusy,
        _ => CameraError::DeviceNotFound(format!("{path}: {e}")),
    }
}

#[async_trait]
impl CameraDevice for V4lCamera {
    async fn acquire(&mut self) -> Result<(), CameraError> {
        if self.active.is_some() {
            return Err(CameraError::DeviceBusy);
        }
        let mut active = self.open()?;

        // Let auto-exposure settle before the attendee captures.
        for _ in 0..self.warmup_frames {
            let _ = active.next_frame();
        }
        self.active = Some(active);
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<Frame, CameraError> {
        let active = self.active.as_mut().ok_or(CameraError::NotAcquired)?;

        let mut frame = active.next_frame()?;
        let mut skipped = 0;
        while skipped < MAX_DARK_SKIPS && frame::dark_fraction(&frame.data) > DARK_FRAME_LIMIT {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            frame = active.next_frame()?;
            skipped += 1;
        }
        Ok(frame)
    }

    fn release(&mut self) {
        if let Some(active) = self.active.take() {
            drop(active);
            tracing::debug!(device = %self.device_path, "stream stopped, device closed");
        }
    }

    fn is_acquired(&self) -> bool {
        self.active.is_some()
    }
}
