//! The capture loop: fetch, annotate, emit, pace, until shutdown.

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::output::write_frame;
use crate::overlay;
use crate::session::{Camera, Streaming};
use crate::shutdown::ShutdownFlag;
use crate::traits::{CameraDevice, CameraError, FrameBuffer, Result, SensorReadings};

/// Longest single sleep while pacing.
const PACE_SLICE: Duration = Duration::from_millis(50);

/// Per-frame values, rebuilt on every successful fetch.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Successful fetches so far in this session, this one included.
    pub sequence: u64,
    /// Gain, exposure and temperature observed with the frame.
    pub readings: SensorReadings,
    /// Wall-clock time the frame was fetched.
    pub timestamp: DateTime<Local>,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Frames written to the sink.
    pub frames: u64,
    /// Fetches that timed out.
    pub timeouts: u64,
    /// Fetches the driver failed.
    pub errors: u64,
}

/// Drives a streaming camera and writes every good frame to a sink.
///
/// The loop owns the only frame buffer. It checks the shutdown flag before
/// every fetch and while pacing, so the worst-case exit latency is one fetch
/// timeout.
pub struct CaptureLoop<'a, D: CameraDevice, W: Write> {
    camera: &'a mut Camera<D, Streaming>,
    sink: W,
    shutdown: ShutdownFlag,
    buffer: FrameBuffer,
    timeout: Duration,
    fps: f64,
    period: Duration,
    overlay: bool,
    sequence: u64,
}

impl<'a, D: CameraDevice, W: Write> CaptureLoop<'a, D, W> {
    /// Prepare a loop for `camera`, sizing the frame buffer once from its
    /// geometry.
    pub fn new(
        camera: &'a mut Camera<D, Streaming>,
        config: &CaptureConfig,
        sink: W,
        shutdown: ShutdownFlag,
    ) -> Self {
        let buffer = FrameBuffer::new(camera.geometry());
        Self {
            camera,
            sink,
            shutdown,
            buffer,
            timeout: config.fetch_timeout(),
            fps: config.frame_rate().fps(),
            period: config.frame_rate().period(),
            overlay: config.overlay(),
            sequence: 0,
        }
    }

    /// Successful fetches so far.
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Run until shutdown is requested.
    ///
    /// Timeouts and driver errors are logged and skipped. Any other error,
    /// including a failed write to the sink, ends the loop.
    pub fn run(&mut self) -> Result<LoopSummary> {
        let mut summary = LoopSummary::default();
        info!(
            timeout_ms = self.timeout.as_millis(),
            period_ms = self.period.as_secs_f64() * 1000.0,
            fps = self.fps,
            overlay = self.overlay,
            "capture loop running"
        );

        while !self.shutdown.is_requested() {
            match self.camera.fetch(&mut self.buffer, self.timeout) {
                Ok(readings) => {
                    self.emit(readings)?;
                    summary.frames += 1;
                    self.pace();
                }
                Err(err @ CameraError::AcquisitionTimeout(_)) => {
                    summary.timeouts += 1;
                    warn!(error = %err, "frame skipped");
                }
                Err(err) if err.is_transient() => {
                    summary.errors += 1;
                    warn!(error = %err, "frame skipped");
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            frames = summary.frames,
            timeouts = summary.timeouts,
            errors = summary.errors,
            "shutdown requested, capture loop finished"
        );
        Ok(summary)
    }

    /// Wait out one frame period, returning early once shutdown is requested.
    fn pace(&self) {
        let deadline = Instant::now().checked_add(self.period);
        while !self.shutdown.is_requested() {
            let remaining = deadline.map_or(PACE_SLICE, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(PACE_SLICE));
        }
    }

    fn emit(&mut self, readings: SensorReadings) -> Result<()> {
        self.sequence += 1;
        let metadata = FrameMetadata {
            sequence: self.sequence,
            readings,
            timestamp: Local::now(),
        };

        if self.overlay {
            overlay::render_status(&mut self.buffer, &metadata)?;
        }
        write_frame(&mut self.sink, self.buffer.as_bytes())?;

        debug!(
            sequence = metadata.sequence,
            gain = ?readings.gain,
            exposure_us = ?readings.exposure_us,
            temperature_c = ?readings.temperature_c,
            "frame written"
        );
        Ok(())
    }
}
