//! V4L2 device implementation using the v4l crate.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::control::{Control, Type as ControlType, Value};
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::config::{CaptureConfig, ControlMode};
use crate::traits::{
    BayerPattern, CameraDevice, CameraError, ControlKind, ControlRange, DeviceInfo, DeviceState,
    FrameBuffer, FrameGeometry, PixelFormat, Result, SensorReadings,
};
use crate::validation::{validate_controls, validate_geometry};

const CID_AUTOGAIN: u32 = 0x0098_0912;
const CID_GAIN: u32 = 0x0098_0913;
const CID_WHITE_BALANCE_TEMPERATURE_AUTO: u32 = 0x0098_090c;
const CID_WHITE_BALANCE_TEMPERATURE: u32 = 0x0098_091a;
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// `exposure_absolute` counts in units of 100 µs.
const EXPOSURE_UNIT_US: i64 = 100;

/// Number of mmap buffers queued with the driver.
const BUFFER_COUNT: u32 = 4;

/// A V4L2 control the backend drives, with its unit conversion.
#[derive(Debug, Clone, Copy)]
struct Mapped {
    id: u32,
    boolean: bool,
    /// Core units per device unit.
    scale: i64,
}

impl Mapped {
    fn to_device(self, value: i64) -> Value {
        let raw = value / self.scale;
        if self.boolean {
            Value::Boolean(raw != 0)
        } else {
            Value::Integer(raw)
        }
    }

    fn to_core(self, value: &Value) -> Option<i64> {
        match *value {
            Value::Integer(raw) => Some(raw.saturating_mul(self.scale)),
            Value::Boolean(raw) => Some(i64::from(raw)),
            _ => None,
        }
    }
}

/// Core units per device unit for a control.
const fn unit_scale(kind: Option<ControlKind>) -> i64 {
    match kind {
        Some(ControlKind::Exposure) => EXPOSURE_UNIT_US,
        _ => 1,
    }
}

/// Attached video device as found by enumeration.
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    /// Index to pass to [`V4L2Device::open`].
    pub index: u32,
    /// Driver-reported name.
    pub name: String,
    /// Device node.
    pub path: PathBuf,
}

/// Enumerate attached V4L2 devices, ordered by index.
pub fn list_devices() -> Vec<DeviceSummary> {
    let mut devices: Vec<DeviceSummary> = v4l::context::enum_devices()
        .into_iter()
        .filter_map(|node| {
            Some(DeviceSummary {
                index: u32::try_from(node.index()).ok()?,
                name: node.name().unwrap_or_else(|| "unknown".to_owned()),
                path: node.path().to_path_buf(),
            })
        })
        .collect();
    devices.sort_by_key(|device| device.index);
    devices
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    info: DeviceInfo,
    state: DeviceState,
    controls: HashMap<ControlKind, Mapped>,
    auto_controls: Vec<u32>,
    geometry: Option<FrameGeometry>,
    stride: usize,
    stream: Option<Stream<'static>>,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize).map_err(|err| open_error(index, &err))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} cannot capture video",
                caps.card
            )));
        }

        let descriptions = device.query_controls().unwrap_or_else(|err| {
            warn!(error = %err, "control enumeration failed");
            Vec::new()
        });
        let auto_controls: Vec<u32> = descriptions
            .iter()
            .map(|desc| desc.id)
            .filter(|id| *id == CID_AUTOGAIN || *id == CID_EXPOSURE_AUTO)
            .collect();

        let mut controls = HashMap::new();
        let mut ranges = Vec::with_capacity(descriptions.len());
        for desc in &descriptions {
            if matches!(desc.typ, ControlType::CtrlClass) {
                continue;
            }
            let kind = classify(desc.id, &desc.name);
            let scale = unit_scale(kind);
            if let Some(kind) = kind {
                controls.entry(kind).or_insert(Mapped {
                    id: desc.id,
                    boolean: matches!(desc.typ, ControlType::Boolean),
                    scale,
                });
            }
            ranges.push(ControlRange {
                name: desc.name.clone(),
                kind,
                min: desc.minimum.saturating_mul(scale),
                max: desc.maximum.saturating_mul(scale),
                default: desc.default.saturating_mul(scale),
                auto_supported: match kind {
                    Some(ControlKind::Exposure) => auto_controls.contains(&CID_EXPOSURE_AUTO),
                    Some(ControlKind::Gain) => auto_controls.contains(&CID_AUTOGAIN),
                    _ => false,
                },
            });
        }

        let (max_width, max_height, bayer) = query_sensor(&device)?;

        let info = DeviceInfo {
            index,
            name: caps.card,
            max_width,
            max_height,
            is_color: bayer.is_some(),
            bayer,
            trigger_capable: false,
            controls: ranges,
        };
        info!(index, name = %info.name, driver = %caps.driver, "camera opened");

        Ok(Self {
            device,
            info,
            state: DeviceState::Opened,
            controls,
            auto_controls,
            geometry: None,
            stride: 0,
            stream: None,
        })
    }

    fn expect_state(&self, operation: &'static str, allowed: &[DeviceState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CameraError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn write_raw(&self, id: u32, value: Value) -> io::Result<()> {
        self.device.set_control(Control { id, value })
    }

    /// Write a core control, skipping it when the device lacks it.
    fn write(&self, kind: ControlKind, value: i64) -> Result<()> {
        let Some(mapped) = self.controls.get(&kind) else {
            warn!(control = %kind, "camera has no such control, leaving driver setting");
            return Ok(());
        };
        let value = mapped.to_device(value);
        debug!(control = %kind, ?value, "setting control");
        self.write_raw(mapped.id, value).map_err(|source| CameraError::ControlWrite {
            control: kind.to_string(),
            source,
        })
    }

    fn read(&self, kind: ControlKind) -> Option<i64> {
        let mapped = self.controls.get(&kind)?;
        match self.device.control(mapped.id) {
            Ok(control) => mapped.to_core(&control.value),
            Err(err) => {
                debug!(control = %kind, error = %err, "control read failed");
                None
            }
        }
    }

    fn apply_exposure(&self, mode: ControlMode) -> Result<()> {
        if self.auto_controls.contains(&CID_EXPOSURE_AUTO) {
            let auto = if mode.is_auto() {
                // Aperture priority is the auto mode UVC sensors implement;
                // fall back to full auto for drivers without it.
                self.write_raw(CID_EXPOSURE_AUTO, Value::Integer(EXPOSURE_APERTURE_PRIORITY))
                    .or_else(|_| self.write_raw(CID_EXPOSURE_AUTO, Value::Integer(0)))
            } else {
                self.write_raw(CID_EXPOSURE_AUTO, Value::Integer(EXPOSURE_MANUAL))
            };
            auto.map_err(|source| CameraError::ControlWrite {
                control: "exposure mode".to_owned(),
                source,
            })?;
        } else if mode.is_auto() {
            warn!("camera has no auto exposure, using the seed as a fixed value");
        }

        match mode {
            ControlMode::Manual(us) => self.write(ControlKind::Exposure, us),
            ControlMode::Auto { seed, bound } => {
                // Some drivers refuse absolute writes while in auto mode.
                if let Err(err) = self.write(ControlKind::Exposure, seed) {
                    debug!(error = %err, "exposure seed not accepted in auto mode");
                }
                self.write(ControlKind::AutoMaxExposure, i64::from(bound.get()))
            }
        }
    }

    fn apply_gain(&self, mode: ControlMode) -> Result<()> {
        if self.auto_controls.contains(&CID_AUTOGAIN) {
            self.write_raw(CID_AUTOGAIN, Value::Boolean(mode.is_auto()))
                .map_err(|source| CameraError::ControlWrite {
                    control: "gain mode".to_owned(),
                    source,
                })?;
        } else if mode.is_auto() {
            warn!("camera has no auto gain, using the seed as a fixed value");
        }

        self.write(ControlKind::Gain, mode.value())?;
        if let Some(bound) = mode.bound() {
            self.write(ControlKind::AutoMaxGain, i64::from(bound.get()))?;
        }
        Ok(())
    }
}

impl CameraDevice for V4L2Device {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn configure(&mut self, config: &CaptureConfig) -> Result<FrameGeometry> {
        self.expect_state("configure", &[DeviceState::Opened])?;
        validate_controls(config, &self.info)?;

        self.apply_exposure(config.exposure())?;
        self.apply_gain(config.gain())?;
        if self.controls.contains_key(&ControlKind::Bandwidth) {
            self.write(ControlKind::Bandwidth, i64::from(config.bandwidth_percent()))?;
        }

        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::UnsupportedFormat(err.to_string()))?;
        fmt.width = self.info.max_width;
        fmt.height = self.info.max_height;
        fmt.fourcc = FourCC::new(&config.format().fourcc());

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::UnsupportedFormat(err.to_string()))?;

        if PixelFormat::from_fourcc(fmt.fourcc.repr) != Some(config.format()) {
            return Err(CameraError::UnsupportedFormat(format!(
                "driver substituted {} for {}",
                fmt.fourcc,
                config.format()
            )));
        }

        let geometry = FrameGeometry::new(fmt.width, fmt.height, config.format());
        validate_geometry(&geometry, &self.info)?;

        self.stride = (fmt.stride as usize).max(geometry.row_bytes());
        self.geometry = Some(geometry);
        self.state = DeviceState::Configured;
        Ok(geometry)
    }

    fn start_capture(&mut self) -> Result<()> {
        self.expect_state("start capture", &[DeviceState::Configured])?;
        let stream = Stream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)?;
        self.stream = Some(stream);
        self.state = DeviceState::Streaming;
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<()> {
        self.expect_state("stop capture", &[DeviceState::Streaming])?;
        // Dropping the stream issues STREAMOFF and frees the buffers.
        self.stream = None;
        self.state = DeviceState::Opened;
        Ok(())
    }

    fn fetch_frame(
        &mut self,
        buffer: &mut FrameBuffer,
        timeout: Duration,
    ) -> Result<SensorReadings> {
        self.expect_state("fetch frame", &[DeviceState::Streaming])?;
        if Some(buffer.geometry()) != self.geometry {
            return Err(CameraError::InvariantViolation(
                "buffer does not match configured geometry".to_owned(),
            ));
        }

        let stride = self.stride;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CameraError::Acquisition("stream not started".to_owned()))?;
        stream.set_timeout(timeout);

        let (data, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                return Err(CameraError::AcquisitionTimeout(timeout));
            }
            Err(err) => return Err(CameraError::Acquisition(err.to_string())),
        };

        let used = data.get(..meta.bytesused as usize).unwrap_or(data);
        copy_rows(used, stride, buffer)?;

        #[allow(clippy::cast_precision_loss)]
        let temperature_c = self
            .read(ControlKind::Temperature)
            .map(|tenths| tenths as f64 / 10.0);

        Ok(SensorReadings {
            gain: self.read(ControlKind::Gain),
            exposure_us: self.read(ControlKind::Exposure),
            temperature_c,
        })
    }

    fn close(&mut self) -> Result<()> {
        self.expect_state("close", &[DeviceState::Opened, DeviceState::Configured])?;
        self.stream = None;
        self.geometry = None;
        self.state = DeviceState::Closed;
        Ok(())
    }
}

/// Copy a possibly padded driver frame into the tightly packed buffer.
fn copy_rows(src: &[u8], stride: usize, buffer: &mut FrameBuffer) -> Result<()> {
    let row_bytes = buffer.geometry().row_bytes();
    let expected = buffer.len();

    if stride == row_bytes {
        let frame = src.get(..expected).ok_or_else(|| short_frame(src.len(), expected))?;
        buffer.as_mut_bytes().copy_from_slice(frame);
        return Ok(());
    }

    for (row, out) in buffer.as_mut_bytes().chunks_exact_mut(row_bytes).enumerate() {
        let start = row * stride;
        let line = src
            .get(start..start + row_bytes)
            .ok_or_else(|| short_frame(src.len(), expected))?;
        out.copy_from_slice(line);
    }
    Ok(())
}

fn short_frame(got: usize, expected: usize) -> CameraError {
    CameraError::Acquisition(format!("short frame: {got} bytes, expected {expected}"))
}

fn open_error(index: u32, err: &io::Error) -> CameraError {
    match err.kind() {
        io::ErrorKind::NotFound => CameraError::DeviceUnavailable(index),
        io::ErrorKind::PermissionDenied => CameraError::PermissionDenied(err.to_string()),
        _ => CameraError::DeviceOpenFailed(err.to_string()),
    }
}

/// Identify the core controls among a driver's controls.
///
/// Vendor controls are matched by name. White balance "temperature"
/// controls are colour settings, not sensor readouts.
fn classify(id: u32, name: &str) -> Option<ControlKind> {
    match id {
        CID_EXPOSURE_ABSOLUTE => return Some(ControlKind::Exposure),
        CID_GAIN => return Some(ControlKind::Gain),
        CID_WHITE_BALANCE_TEMPERATURE_AUTO | CID_WHITE_BALANCE_TEMPERATURE => return None,
        _ => {}
    }
    let name = name.to_lowercase();
    if name.contains("white balance") {
        None
    } else if name.contains("temperature") {
        Some(ControlKind::Temperature)
    } else if name.contains("bandwidth") {
        Some(ControlKind::Bandwidth)
    } else if name.contains("max") && name.contains("gain") {
        Some(ControlKind::AutoMaxGain)
    } else if name.contains("max") && name.contains("exp") {
        Some(ControlKind::AutoMaxExposure)
    } else {
        None
    }
}

/// Largest raw frame size and Bayer arrangement the sensor offers.
fn query_sensor(device: &Device) -> Result<(u32, u32, Option<BayerPattern>)> {
    let formats = device.enum_formats().unwrap_or_default();
    let bayer = formats
        .iter()
        .find_map(|desc| BayerPattern::from_fourcc(desc.fourcc.repr));

    let mut max = (0u32, 0u32);
    for desc in &formats {
        let raw = PixelFormat::from_fourcc(desc.fourcc.repr).is_some()
            || BayerPattern::from_fourcc(desc.fourcc.repr).is_some();
        if !raw {
            continue;
        }
        for size in device.enum_framesizes(desc.fourcc).unwrap_or_default() {
            let (width, height) = match size.size {
                FrameSizeEnum::Discrete(discrete) => (discrete.width, discrete.height),
                FrameSizeEnum::Stepwise(stepwise) => (stepwise.max_width, stepwise.max_height),
            };
            if u64::from(width) * u64::from(height) > u64::from(max.0) * u64::from(max.1) {
                max = (width, height);
            }
        }
    }

    if max.0 == 0 || max.1 == 0 {
        let current = device
            .format()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;
        max = (current.width, current.height);
    }

    Ok((max.0, max.1, bayer))
}
