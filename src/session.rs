//! Typestate wrapper around a [`CameraDevice`].
//!
//! A [`Camera`] moves `Opened → Configured → Streaming → Opened → closed`
//! by value, so configuring twice, starting twice, or fetching from an idle
//! device does not compile.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::traits::{
    CameraDevice, CameraError, DeviceInfo, DeviceState, FrameBuffer, FrameGeometry, Result,
    SensorReadings,
};

/// Device is open and idle.
#[derive(Debug)]
pub struct Opened;

/// Controls and region are applied.
#[derive(Debug)]
pub struct Configured {
    geometry: FrameGeometry,
}

/// Frames are being acquired.
#[derive(Debug)]
pub struct Streaming {
    geometry: FrameGeometry,
}

/// A capture device in lifecycle state `S`.
#[derive(Debug)]
pub struct Camera<D: CameraDevice, S> {
    device: D,
    state: S,
}

impl<D: CameraDevice, S> Camera<D, S> {
    /// Snapshot taken when the device was opened.
    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }
}

impl<D: CameraDevice> Camera<D, Opened> {
    /// Wrap a freshly opened backend.
    pub fn new(device: D) -> Result<Self> {
        match device.state() {
            DeviceState::Opened => Ok(Self {
                device,
                state: Opened,
            }),
            state => Err(CameraError::InvalidState {
                operation: "wrap",
                state,
            }),
        }
    }

    /// Apply `config` to the device.
    ///
    /// On failure the device is dropped, and with it released: a
    /// half-configured camera never reaches streaming.
    pub fn configure(mut self, config: &CaptureConfig) -> Result<Camera<D, Configured>> {
        let geometry = self.device.configure(config)?;
        if geometry.format != config.format() {
            return Err(CameraError::UnsupportedFormat(format!(
                "requested {}, device delivers {}",
                config.format(),
                geometry.format
            )));
        }

        info!(
            width = geometry.width,
            height = geometry.height,
            format = %geometry.format,
            frame_bytes = geometry.frame_size(),
            "camera configured"
        );

        Ok(Camera {
            device: self.device,
            state: Configured { geometry },
        })
    }

    /// Release the device.
    pub fn close(mut self) -> Result<()> {
        self.device.close()?;
        debug!("camera closed");
        Ok(())
    }
}

impl<D: CameraDevice> Camera<D, Configured> {
    /// Geometry every frame will have.
    pub const fn geometry(&self) -> FrameGeometry {
        self.state.geometry
    }

    /// Start streaming.
    pub fn start(mut self) -> Result<Camera<D, Streaming>> {
        self.device.start_capture()?;
        info!("capture started");
        Ok(Camera {
            device: self.device,
            state: Streaming {
                geometry: self.state.geometry,
            },
        })
    }
}

impl<D: CameraDevice> Camera<D, Streaming> {
    /// Geometry every frame has.
    pub const fn geometry(&self) -> FrameGeometry {
        self.state.geometry
    }

    /// Fetch the next frame into `buffer`, waiting at most `timeout`.
    pub fn fetch(&mut self, buffer: &mut FrameBuffer, timeout: Duration) -> Result<SensorReadings> {
        let expected = self.state.geometry;
        if buffer.geometry() != expected || buffer.len() != expected.frame_size() {
            return Err(CameraError::InvariantViolation(format!(
                "buffer sized for {:?}, session delivers {:?}",
                buffer.geometry(),
                expected
            )));
        }
        self.device.fetch_frame(buffer, timeout)
    }

    /// Stop streaming and return to the idle state.
    pub fn stop(mut self) -> Result<Camera<D, Opened>> {
        self.device.stop_capture()?;
        info!("capture stopped");
        Ok(Camera {
            device: self.device,
            state: Opened,
        })
    }
}
