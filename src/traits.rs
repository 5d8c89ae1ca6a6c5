//! Core traits and types for raw sensor capture.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::config::{CaptureConfig, ConfigError};

/// Raw sensor sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit single-channel raw samples.
    Raw8,
    /// 16-bit little-endian single-channel raw samples.
    Raw16,
}

impl PixelFormat {
    /// Number of bytes one pixel occupies in a frame.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Raw8 => 1,
            Self::Raw16 => 2,
        }
    }

    /// Human-readable name, as accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Raw8 => "RAW8",
            Self::Raw16 => "RAW16",
        }
    }

    /// V4L2 fourcc carrying this format (`GREY` / `Y16 `).
    #[must_use]
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Raw8 => *b"GREY",
            Self::Raw16 => *b"Y16 ",
        }
    }

    /// Map a V4L2 fourcc back to a supported format.
    #[must_use]
    pub fn from_fourcc(code: [u8; 4]) -> Option<Self> {
        [Self::Raw8, Self::Raw16]
            .into_iter()
            .find(|format| format.fourcc() == code)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("RAW8") {
            Ok(Self::Raw8)
        } else if s.eq_ignore_ascii_case("RAW16") {
            Ok(Self::Raw16)
        } else {
            Err(ConfigError::InvalidPixelFormat(s.to_owned()))
        }
    }
}

/// Resolution and pixel format of every frame in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Sample encoding.
    pub format: PixelFormat,
}

impl FrameGeometry {
    /// Create a new geometry.
    #[must_use]
    pub const fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Bytes in one row of pixels.
    #[must_use]
    pub const fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Bytes in one frame: width × height × bytes-per-pixel.
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

/// Fixed-size pixel buffer reused for every frame of a session.
///
/// The backing storage is allocated once and can never be resized.
#[derive(Debug)]
pub struct FrameBuffer {
    geometry: FrameGeometry,
    data: Box<[u8]>,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer sized for `geometry`.
    #[must_use]
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            data: vec![0u8; geometry.frame_size()].into_boxed_slice(),
        }
    }

    /// Geometry the buffer was sized for.
    #[must_use]
    pub const fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    /// Frame bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable frame bytes.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Size of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Colour filter array arrangement of a colour sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayerPattern {
    /// Red-green first row.
    Rg,
    /// Blue-green first row.
    Bg,
    /// Green-red first row.
    Gr,
    /// Green-blue first row.
    Gb,
}

impl BayerPattern {
    /// Recognise an 8- or 16-bit Bayer fourcc.
    #[must_use]
    pub fn from_fourcc(code: [u8; 4]) -> Option<Self> {
        match &code {
            b"RGGB" | b"RG16" => Some(Self::Rg),
            b"BGGR" | b"BYR2" => Some(Self::Bg),
            b"GRBG" | b"GR16" => Some(Self::Gr),
            b"GBRG" | b"GB16" => Some(Self::Gb),
            _ => None,
        }
    }
}

impl fmt::Display for BayerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rg => "RG",
            Self::Bg => "BG",
            Self::Gr => "GR",
            Self::Gb => "GB",
        })
    }
}

/// Controls the capture core knows how to drive or read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// Exposure time in microseconds.
    Exposure,
    /// Analogue gain.
    Gain,
    /// Upper gain limit while auto gain is active.
    AutoMaxGain,
    /// Upper exposure limit in milliseconds while auto exposure is active.
    AutoMaxExposure,
    /// USB bandwidth share in percent.
    Bandwidth,
    /// Sensor temperature in tenths of a degree Celsius (read-only).
    Temperature,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exposure => "exposure",
            Self::Gain => "gain",
            Self::AutoMaxGain => "auto max gain",
            Self::AutoMaxExposure => "auto max exposure",
            Self::Bandwidth => "bandwidth",
            Self::Temperature => "temperature",
        })
    }
}

/// Range of one device control, in the units the core uses for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRange {
    /// Driver-reported control name.
    pub name: String,
    /// Which core control this is, if any.
    pub kind: Option<ControlKind>,
    /// Minimum accepted value.
    pub min: i64,
    /// Maximum accepted value.
    pub max: i64,
    /// Driver default.
    pub default: i64,
    /// Whether the device can manage the value itself.
    pub auto_supported: bool,
}

impl ControlRange {
    /// Whether `value` lies within `[min, max]`.
    #[must_use]
    pub const fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Read-only snapshot of a device, taken once at open.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Index the device was opened at.
    pub index: u32,
    /// Device name.
    pub name: String,
    /// Maximum sensor width in pixels.
    pub max_width: u32,
    /// Maximum sensor height in pixels.
    pub max_height: u32,
    /// Whether the sensor carries a colour filter array.
    pub is_color: bool,
    /// Bayer arrangement for colour sensors.
    pub bayer: Option<BayerPattern>,
    /// Whether the device supports external trigger modes.
    pub trigger_capable: bool,
    /// Every control the device exposes.
    pub controls: Vec<ControlRange>,
}

impl DeviceInfo {
    /// Look up a core control by kind.
    #[must_use]
    pub fn control(&self, kind: ControlKind) -> Option<&ControlRange> {
        self.controls
            .iter()
            .find(|control| control.kind == Some(kind))
    }
}

/// Multi-line device report, one control per line.
impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Camera {}: {}", self.index, self.name)?;
        writeln!(f, "  Max resolution: {}x{}", self.max_width, self.max_height)?;
        match self.bayer {
            Some(bayer) if self.is_color => writeln!(f, "  Colour sensor, bayer {bayer}")?,
            _ if self.is_color => writeln!(f, "  Colour sensor")?,
            _ => writeln!(f, "  Mono sensor")?,
        }
        writeln!(
            f,
            "  Trigger: {}",
            if self.trigger_capable { "supported" } else { "none" }
        )?;
        for control in &self.controls {
            writeln!(
                f,
                "  {} [{},{}] default={} ({})",
                control.name,
                control.min,
                control.max,
                control.default,
                if control.auto_supported {
                    "Auto supported"
                } else {
                    "Manual only"
                }
            )?;
        }
        Ok(())
    }
}

/// Lifecycle state of a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Released, no further calls are legal.
    Closed,
    /// Open and idle, not yet configured.
    Opened,
    /// Controls and region applied, idle.
    Configured,
    /// Frames are being acquired.
    Streaming,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Configured => "configured",
            Self::Streaming => "streaming",
        })
    }
}

/// Sensor values observed alongside a fetched frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReadings {
    /// Current gain.
    pub gain: Option<i64>,
    /// Current exposure in microseconds.
    pub exposure_us: Option<i64>,
    /// Sensor temperature in degrees Celsius.
    pub temperature_c: Option<f64>,
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No device present at the given index.
    #[error("no camera found at index {0}")]
    DeviceUnavailable(u32),
    /// The device exists but could not be opened for lack of privilege.
    #[error("permission denied opening camera: {0} (are you in the video group?)")]
    PermissionDenied(String),
    /// Opening or initialising the device failed.
    #[error("failed to open camera: {0}")]
    DeviceOpenFailed(String),
    /// The device refused the requested pixel format or region.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// A configuration value lies outside the device's control range.
    #[error("{control} value {value} outside device range [{min}, {max}]")]
    InvalidParameter {
        /// Control being set.
        control: ControlKind,
        /// Requested value.
        value: i64,
        /// Device minimum.
        min: i64,
        /// Device maximum.
        max: i64,
    },
    /// The device rejected a control write while being configured.
    #[error("failed to configure camera: setting {control}: {source}")]
    ControlWrite {
        /// Control being written.
        control: String,
        /// Driver error.
        #[source]
        source: std::io::Error,
    },
    /// The operation is not legal in the device's current state.
    #[error("cannot {operation} while camera is {state}")]
    InvalidState {
        /// Rejected operation.
        operation: &'static str,
        /// State the device was in.
        state: DeviceState,
    },
    /// No frame arrived within the fetch timeout.
    #[error("no frame within {0:?}")]
    AcquisitionTimeout(Duration),
    /// The driver reported an error for a single fetch.
    #[error("acquisition failed: {0}")]
    Acquisition(String),
    /// An internal size or state invariant was broken.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Startup configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Stdout is a terminal and would receive binary frame data.
    #[error("stdout is a terminal, refusing to write raw video data (pipe it to a consumer)")]
    OutputIsTerminal,
    /// The termination signal handler could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    /// Writing a frame to the output sink failed.
    #[error("output write failed: {0}")]
    Output(#[source] std::io::Error),
    /// Other device I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Whether the capture loop should report this error and carry on.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout(_) | Self::Acquisition(_))
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over one hardware capture session.
///
/// Backends are opened by their own constructor and track their
/// [`DeviceState`], rejecting out-of-order calls with
/// [`CameraError::InvalidState`].
pub trait CameraDevice {
    /// Snapshot taken when the device was opened.
    fn info(&self) -> &DeviceInfo;

    /// Current lifecycle state.
    fn state(&self) -> DeviceState;

    /// Apply exposure, gain, bandwidth and region settings.
    ///
    /// Returns the frame geometry the device will deliver.
    fn configure(&mut self, config: &CaptureConfig) -> Result<FrameGeometry>;

    /// Move from configured to streaming.
    fn start_capture(&mut self) -> Result<()>;

    /// Move from streaming back to opened.
    fn stop_capture(&mut self) -> Result<()>;

    /// Block until a frame is copied into `buffer`, `timeout` passes, or the
    /// driver reports an error.
    ///
    /// On failure the buffer contents are unspecified and must not be used.
    fn fetch_frame(&mut self, buffer: &mut FrameBuffer, timeout: Duration)
        -> Result<SensorReadings>;

    /// Release the device. Further calls are rejected.
    fn close(&mut self) -> Result<()>;
}
