//! Validation of a capture configuration against device limits, and of an
//! emitted raw stream against the session geometry.
//!
//! Backends call [`validate_controls`] from `configure` so that no value
//! outside a reported control range ever reaches the hardware.

use crate::config::{CaptureConfig, ControlMode};
use crate::traits::{CameraError, ControlKind, DeviceInfo, FrameGeometry, Result};

/// Checks every control value the configuration will write against the
/// ranges reported in `info`.
///
/// Controls the device does not expose are skipped; the backend decides
/// how to report them.
///
/// # Arguments
///
/// * `config` - The validated startup configuration
/// * `info` - Snapshot of the opened device
///
/// # Errors
///
/// Returns `InvalidParameter` for the first value outside its range, checked
/// in the order exposure, gain, auto bounds, bandwidth.
pub fn validate_controls(config: &CaptureConfig, info: &DeviceInfo) -> Result<()> {
    check(info, ControlKind::Exposure, config.exposure().value())?;
    check(info, ControlKind::Gain, config.gain().value())?;

    if let ControlMode::Auto { bound, .. } = config.gain() {
        check(info, ControlKind::AutoMaxGain, i64::from(bound.get()))?;
    }
    if let ControlMode::Auto { bound, .. } = config.exposure() {
        check(info, ControlKind::AutoMaxExposure, i64::from(bound.get()))?;
    }

    check(
        info,
        ControlKind::Bandwidth,
        i64::from(config.bandwidth_percent()),
    )
}

/// Checks that a geometry is non-empty and fits on the sensor.
///
/// # Errors
///
/// Returns `UnsupportedFormat` if either dimension is zero or exceeds the
/// device maximum.
pub fn validate_geometry(geometry: &FrameGeometry, info: &DeviceInfo) -> Result<()> {
    if geometry.width == 0 || geometry.height == 0 {
        return Err(CameraError::UnsupportedFormat(format!(
            "empty region {}x{}",
            geometry.width, geometry.height
        )));
    }
    if geometry.width > info.max_width || geometry.height > info.max_height {
        return Err(CameraError::UnsupportedFormat(format!(
            "region {}x{} exceeds sensor {}x{}",
            geometry.width, geometry.height, info.max_width, info.max_height
        )));
    }
    Ok(())
}

/// Counts the frames in a headerless raw stream.
///
/// The stream carries frames back-to-back with no delimiter, so its length
/// must be an exact multiple of the frame size.
///
/// # Arguments
///
/// * `stream` - Bytes as written to the output sink
/// * `geometry` - Session geometry the consumer knows out of band
///
/// # Returns
///
/// The number of whole frames in `stream`.
///
/// # Errors
///
/// Returns `InvariantViolation` if the geometry is empty or the stream ends
/// mid-frame.
pub fn count_frames(stream: &[u8], geometry: &FrameGeometry) -> Result<usize> {
    let frame_size = geometry.frame_size();
    if frame_size == 0 {
        return Err(CameraError::InvariantViolation(
            "cannot split a stream into zero-sized frames".to_owned(),
        ));
    }
    if stream.len() % frame_size != 0 {
        return Err(CameraError::InvariantViolation(format!(
            "stream of {} bytes is not a whole number of {frame_size}-byte frames",
            stream.len()
        )));
    }
    Ok(stream.len() / frame_size)
}

fn check(info: &DeviceInfo, kind: ControlKind, value: i64) -> Result<()> {
    match info.control(kind) {
        Some(range) if !range.contains(value) => Err(CameraError::InvalidParameter {
            control: kind,
            value,
            min: range.min,
            max: range.max,
        }),
        _ => Ok(()),
    }
}
