//! Startup configuration: command-line surface and the validated
//! [`CaptureConfig`] derived from it.

use std::num::NonZeroU32;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::traits::PixelFormat;

/// Lower bound on how long a single fetch may block.
pub const MIN_FETCH_TIMEOUT: Duration = Duration::from_millis(2000);

/// Slack added on top of twice the exposure when sizing the fetch timeout.
const EXPOSURE_TIMEOUT_SLACK: Duration = Duration::from_millis(500);

/// Error type for configuration validation.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Frame rate is zero, negative, or not a finite number.
    #[error("frame rate must be a positive number, got {0}")]
    InvalidFrameRate(f64),
    /// Pixel format string is not one of the supported formats.
    #[error("invalid pixel format '{0}' (expected RAW8 or RAW16)")]
    InvalidPixelFormat(String),
    /// An auto mode was requested with a zero bound.
    #[error("auto {0} requires a positive maximum")]
    MissingAutoBound(&'static str),
    /// Bandwidth share outside 1..=100 percent.
    #[error("bandwidth must be between 1 and 100 percent, got {0}")]
    InvalidBandwidth(u8),
}

/// Stream raw frames from an attached camera to stdout.
#[derive(Parser, Debug, Clone)]
#[command(name = "rawcam-pipe")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Index of the camera to open
    #[arg(short = 'n', long = "camera", default_value_t = 0)]
    pub camera: u32,

    /// Pixel format for the camera and the output stream (RAW8 or RAW16)
    #[arg(short = 'p', long, default_value = "RAW8")]
    pub format: String,

    /// Target output frame rate
    #[arg(short = 'f', long, default_value_t = 10.0, allow_negative_numbers = true)]
    pub fps: f64,

    /// Exposure time in milliseconds (initial value when auto exposure is on)
    #[arg(short = 'e', long = "exposure-ms", default_value_t = 500)]
    pub exposure_ms: u32,

    /// Enable auto exposure
    #[arg(short = 'E', long = "auto-exposure")]
    pub auto_exposure: bool,

    /// Maximum exposure in milliseconds for auto exposure
    #[arg(short = 'm', long = "max-exposure-ms", default_value_t = 100)]
    pub max_exposure_ms: u32,

    /// Gain (initial value when auto gain is on)
    #[arg(short = 'g', long, default_value_t = 50)]
    pub gain: u32,

    /// Enable auto gain
    #[arg(short = 'G', long = "auto-gain")]
    pub auto_gain: bool,

    /// Maximum gain for auto gain
    #[arg(short = 'M', long = "max-gain", default_value_t = 100)]
    pub max_gain: u32,

    /// USB bandwidth share in percent, when the camera supports it
    #[arg(short = 'b', long, default_value_t = 40)]
    pub bandwidth: u8,

    /// Burn a status line (time, gain, exposure, frame, temperature) into each frame
    #[arg(short = 'c', long)]
    pub overlay: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// List attached cameras and exit
    #[arg(short, long)]
    pub list: bool,
}

/// Target frame rate, guaranteed finite and positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FrameRate {
    fps: f64,
    period: Duration,
}

impl FrameRate {
    /// Frames per second.
    #[must_use]
    pub const fn fps(self) -> f64 {
        self.fps
    }

    /// Minimum spacing between two emitted frames.
    #[must_use]
    pub const fn period(self) -> Duration {
        self.period
    }
}

impl TryFrom<f64> for FrameRate {
    type Error = ConfigError;

    fn try_from(fps: f64) -> Result<Self, Self::Error> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(ConfigError::InvalidFrameRate(fps));
        }
        let period = Duration::try_from_secs_f64(fps.recip())
            .map_err(|_| ConfigError::InvalidFrameRate(fps))?;
        Ok(Self { fps, period })
    }
}

/// How one device control is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Fixed value set once at startup.
    Manual(i64),
    /// Device-managed; `seed` is the starting value, `bound` the maximum
    /// the device may reach.
    Auto {
        /// Initial value handed to the device.
        seed: i64,
        /// Upper limit for the device's adjustments.
        bound: NonZeroU32,
    },
}

impl ControlMode {
    /// Build a mode from the flat value / auto flag / bound triple of the
    /// command line.
    pub fn from_flags(
        value: i64,
        auto: bool,
        bound: u32,
        control: &'static str,
    ) -> Result<Self, ConfigError> {
        if !auto {
            return Ok(Self::Manual(value));
        }
        let bound = NonZeroU32::new(bound).ok_or(ConfigError::MissingAutoBound(control))?;
        Ok(Self::Auto { seed: value, bound })
    }

    /// Value written to the device at configure time.
    #[must_use]
    pub const fn value(self) -> i64 {
        match self {
            Self::Manual(value) | Self::Auto { seed: value, .. } => value,
        }
    }

    /// Whether the device manages this control.
    #[must_use]
    pub const fn is_auto(self) -> bool {
        matches!(self, Self::Auto { .. })
    }

    /// Auto-mode upper limit.
    #[must_use]
    pub const fn bound(self) -> Option<NonZeroU32> {
        match self {
            Self::Manual(_) => None,
            Self::Auto { bound, .. } => Some(bound),
        }
    }
}

/// Validated capture configuration, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    camera_index: u32,
    format: PixelFormat,
    frame_rate: FrameRate,
    exposure: ControlMode,
    gain: ControlMode,
    bandwidth_percent: u8,
    overlay: bool,
}

impl CaptureConfig {
    /// Create a configuration with manual 500 ms exposure, manual gain 50,
    /// 40 % bandwidth and no overlay.
    #[must_use]
    pub const fn new(camera_index: u32, format: PixelFormat, frame_rate: FrameRate) -> Self {
        Self {
            camera_index,
            format,
            frame_rate,
            exposure: ControlMode::Manual(500_000),
            gain: ControlMode::Manual(50),
            bandwidth_percent: 40,
            overlay: false,
        }
    }

    /// Set the exposure mode. Values are in microseconds; an auto bound is
    /// in milliseconds.
    #[must_use]
    pub const fn with_exposure(mut self, exposure: ControlMode) -> Self {
        self.exposure = exposure;
        self
    }

    /// Set the gain mode.
    #[must_use]
    pub const fn with_gain(mut self, gain: ControlMode) -> Self {
        self.gain = gain;
        self
    }

    /// Set the bandwidth share in percent.
    pub fn with_bandwidth(mut self, percent: u8) -> Result<Self, ConfigError> {
        if percent == 0 || percent > 100 {
            return Err(ConfigError::InvalidBandwidth(percent));
        }
        self.bandwidth_percent = percent;
        Ok(self)
    }

    /// Enable or disable the status overlay.
    #[must_use]
    pub const fn with_overlay(mut self, overlay: bool) -> Self {
        self.overlay = overlay;
        self
    }

    /// Camera index to open.
    #[must_use]
    pub const fn camera_index(&self) -> u32 {
        self.camera_index
    }

    /// Pixel format for capture and output.
    #[must_use]
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    /// Target frame rate.
    #[must_use]
    pub const fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    /// Exposure mode (microseconds).
    #[must_use]
    pub const fn exposure(&self) -> ControlMode {
        self.exposure
    }

    /// Gain mode.
    #[must_use]
    pub const fn gain(&self) -> ControlMode {
        self.gain
    }

    /// Bandwidth share in percent.
    #[must_use]
    pub const fn bandwidth_percent(&self) -> u8 {
        self.bandwidth_percent
    }

    /// Whether the status overlay is burnt into frames.
    #[must_use]
    pub const fn overlay(&self) -> bool {
        self.overlay
    }

    /// How long one fetch may block: long enough for a full exposure and
    /// frame period, short enough to notice shutdown promptly.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        let exposure_us = match self.exposure {
            ControlMode::Manual(us) => u64::try_from(us).unwrap_or(0),
            ControlMode::Auto { seed, bound } => {
                u64::try_from(seed).unwrap_or(0).max(u64::from(bound.get()) * 1000)
            }
        };
        let exposure_wait = Duration::from_micros(exposure_us)
            .saturating_mul(2)
            .saturating_add(EXPOSURE_TIMEOUT_SLACK);

        MIN_FETCH_TIMEOUT
            .max(self.frame_rate.period().saturating_mul(2))
            .max(exposure_wait)
    }
}

impl TryFrom<&Args> for CaptureConfig {
    type Error = ConfigError;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let format: PixelFormat = args.format.parse()?;
        let frame_rate = FrameRate::try_from(args.fps)?;

        let exposure = ControlMode::from_flags(
            i64::from(args.exposure_ms) * 1000,
            args.auto_exposure,
            args.max_exposure_ms,
            "exposure",
        )?;
        let gain = ControlMode::from_flags(
            i64::from(args.gain),
            args.auto_gain,
            args.max_gain,
            "gain",
        )?;

        Self::new(args.camera, format, frame_rate)
            .with_exposure(exposure)
            .with_gain(gain)
            .with_overlay(args.overlay)
            .with_bandwidth(args.bandwidth)
    }
}
