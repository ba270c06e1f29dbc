//! facefind-hw: Camera capture for the selfie kiosk.
//!
//! Provides a V4L2 webcam and a still-image stand-in, both implementing
//! the core `CameraDevice` seam.

pub mod camera;
pub mod frame;
pub mod still;

pub use camera::{DeviceInfo, PixelFormat, V4lCamera};
pub use frame::{load_image_frame, FrameError};
pub use still::StillImageCamera;
