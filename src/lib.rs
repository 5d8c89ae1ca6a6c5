//! Rawcam-Pipe: stream raw sensor frames from an astronomy-style camera to stdout
//!
//! This library provides trait-based abstractions over camera acquisition, a
//! typestate session handle, and the capture loop that writes headerless RAW8 or
//! RAW16 frames to any sink. The V4L2 backend drives real hardware; the mock
//! backend drives the unit tests.

pub mod capture;
pub mod config;
pub mod device;
pub mod output;
pub mod overlay;
pub mod session;
pub mod shutdown;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use capture::{CaptureLoop, FrameMetadata, LoopSummary};
pub use config::{Args, CaptureConfig, ConfigError, ControlMode, FrameRate};
pub use device::{list_devices, DeviceSummary, V4L2Device};
pub use session::{Camera, Configured, Opened, Streaming};
pub use shutdown::ShutdownFlag;
pub use traits::{
    CameraDevice, CameraError, DeviceInfo, FrameBuffer, FrameGeometry, PixelFormat, Result,
};
