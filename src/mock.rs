//! Scripted device implementation for testing without hardware.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::config::CaptureConfig;
use crate::shutdown::ShutdownFlag;
use crate::traits::{
    CameraDevice, CameraError, ControlKind, ControlRange, DeviceInfo, DeviceState, FrameBuffer,
    FrameGeometry, Result, SensorReadings,
};
use crate::validation::{validate_controls, validate_geometry};

/// Outcome of one scripted `fetch_frame` call.
#[derive(Debug, Clone)]
pub enum MockFetch {
    /// Deliver a frame with every byte set to the value.
    Frame(u8),
    /// Time out without touching the buffer.
    Timeout,
    /// Report a driver error.
    Error(&'static str),
    /// Request shutdown while "blocked", then time out.
    Interrupt(ShutdownFlag),
}

/// Calls observed by a [`MockDevice`].
#[derive(Debug, Default, Clone)]
pub struct MockLog {
    /// Successful `configure` calls.
    pub configures: u32,
    /// Successful `start_capture` calls.
    pub starts: u32,
    /// Successful `stop_capture` calls.
    pub stops: u32,
    /// Times the device was released (close or drop).
    pub releases: u32,
    /// `fetch_frame` calls, in any outcome.
    pub fetches: u32,
    /// Controls written by `configure`: kind, value, auto flag.
    pub applied: Vec<(ControlKind, i64, bool)>,
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    info: DeviceInfo,
    state: DeviceState,
    geometry: Option<FrameGeometry>,
    script: VecDeque<MockFetch>,
    readings: SensorReadings,
    shutdown_when_exhausted: Option<ShutdownFlag>,
    log: Rc<RefCell<MockLog>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create an opened mono 640x480 mock with typical control ranges.
    #[must_use]
    pub fn new() -> Self {
        let control = |name: &str, kind, min, max, default, auto_supported| ControlRange {
            name: name.to_owned(),
            kind: Some(kind),
            min,
            max,
            default,
            auto_supported,
        };

        Self {
            info: DeviceInfo {
                index: 0,
                name: "Mock Camera".to_owned(),
                max_width: 640,
                max_height: 480,
                is_color: false,
                bayer: None,
                trigger_capable: false,
                controls: vec![
                    control("Exposure", ControlKind::Exposure, 32, 2_000_000_000, 10_000, true),
                    control("Gain", ControlKind::Gain, 0, 510, 0, true),
                    control("AutoExpMaxGain", ControlKind::AutoMaxGain, 0, 510, 255, false),
                    control("AutoExpMaxExpMS", ControlKind::AutoMaxExposure, 1, 60_000, 100, false),
                    control("BandWidth", ControlKind::Bandwidth, 40, 100, 50, true),
                    control("Temperature", ControlKind::Temperature, -500, 1000, 20, false),
                ],
            },
            state: DeviceState::Opened,
            geometry: None,
            script: VecDeque::new(),
            readings: SensorReadings {
                gain: Some(50),
                exposure_us: Some(500_000),
                temperature_c: Some(21.5),
            },
            shutdown_when_exhausted: None,
            log: Rc::new(RefCell::new(MockLog::default())),
        }
    }

    /// Set the sensor resolution.
    #[must_use]
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.info.max_width = width;
        self.info.max_height = height;
        self
    }

    /// Replace the device snapshot.
    #[must_use]
    pub fn with_info(mut self, info: DeviceInfo) -> Self {
        self.info = info;
        self
    }

    /// Queue fetch outcomes, consumed in order.
    #[must_use]
    pub fn with_script<I: IntoIterator<Item = MockFetch>>(mut self, script: I) -> Self {
        self.script.extend(script);
        self
    }

    /// Set the readings returned with every frame.
    #[must_use]
    pub const fn with_readings(mut self, readings: SensorReadings) -> Self {
        self.readings = readings;
        self
    }

    /// Request shutdown on `flag` once the script runs out.
    #[must_use]
    pub fn with_shutdown_when_exhausted(mut self, flag: ShutdownFlag) -> Self {
        self.shutdown_when_exhausted = Some(flag);
        self
    }

    /// Shared handle to the call log; stays readable after the device is dropped.
    #[must_use]
    pub fn log(&self) -> Rc<RefCell<MockLog>> {
        Rc::clone(&self.log)
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
}

impl CameraDevice for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn configure(&mut self, config: &CaptureConfig) -> Result<FrameGeometry> {
        self.expect_state("configure", &[DeviceState::Opened])?;
        validate_controls(config, &self.info)?;

        let geometry =
            FrameGeometry::new(self.info.max_width, self.info.max_height, config.format());
        validate_geometry(&geometry, &self.info)?;

        let mut log = self.log.borrow_mut();
        log.applied.push((
            ControlKind::Exposure,
            config.exposure().value(),
            config.exposure().is_auto(),
        ));
        log.applied
            .push((ControlKind::Gain, config.gain().value(), config.gain().is_auto()));
        if let Some(bound) = config.gain().bound() {
            log.applied
                .push((ControlKind::AutoMaxGain, i64::from(bound.get()), true));
        }
        if let Some(bound) = config.exposure().bound() {
            log.applied
                .push((ControlKind::AutoMaxExposure, i64::from(bound.get()), true));
        }
        log.applied.push((
            ControlKind::Bandwidth,
            i64::from(config.bandwidth_percent()),
            true,
        ));
        log.configures += 1;
        drop(log);

        self.geometry = Some(geometry);
        self.state = DeviceState::Configured;
        Ok(geometry)
    }

    fn start_capture(&mut self) -> Result<()> {
        self.expect_state("start capture", &[DeviceState::Configured])?;
        self.state = DeviceState::Streaming;
        self.log.borrow_mut().starts += 1;
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<()> {
        self.expect_state("stop capture", &[DeviceState::Streaming])?;
        self.state = DeviceState::Opened;
        self.log.borrow_mut().stops += 1;
        Ok(())
    }

    fn fetch_frame(
        &mut self,
        buffer: &mut FrameBuffer,
        timeout: Duration,
    ) -> Result<SensorReadings> {
        self.expect_state("fetch frame", &[DeviceState::Streaming])?;
        self.log.borrow_mut().fetches += 1;

        if Some(buffer.geometry()) != self.geometry {
            return Err(CameraError::InvariantViolation(
                "buffer does not match configured geometry".to_owned(),
            ));
        }

        match self.script.pop_front() {
            Some(MockFetch::Frame(value)) => {
                buffer.as_mut_bytes().fill(value);
                Ok(self.readings)
            }
            Some(MockFetch::Timeout) => Err(CameraError::AcquisitionTimeout(timeout)),
            Some(MockFetch::Error(msg)) => Err(CameraError::Acquisition(msg.to_owned())),
            Some(MockFetch::Interrupt(flag)) => {
                flag.request();
                Err(CameraError::AcquisitionTimeout(timeout))
            }
            None => {
                if let Some(flag) = &self.shutdown_when_exhausted {
                    flag.request();
                }
                Err(CameraError::AcquisitionTimeout(timeout))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.expect_state("close", &[DeviceState::Opened, DeviceState::Configured])?;
        self.state = DeviceState::Closed;
        self.geometry = None;
        self.log.borrow_mut().releases += 1;
        Ok(())
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if self.state != DeviceState::Closed {
            self.log.borrow_mut().releases += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameRate;
    use crate::traits::PixelFormat;

    fn config() -> CaptureConfig {
        let rate = FrameRate::try_from(30.0).expect("valid rate");
        CaptureConfig::new(0, PixelFormat::Raw8, rate)
    }

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.info().name, "Mock Camera");
        assert_eq!(device.state(), DeviceState::Opened);
        assert!(device.info().control(ControlKind::Gain).is_some());
    }

    #[test]
    fn test_double_start_rejected() {
        let mut device = MockDevice::new();
        device.configure(&config()).expect("configure should succeed");
        device.start_capture().expect("first start should succeed");

        let result = device.start_capture();
        assert!(matches!(
            result,
            Err(CameraError::InvalidState {
                state: DeviceState::Streaming,
                ..
            })
        ));
    }

    #[test]
    fn test_fetch_requires_streaming() {
        let mut device = MockDevice::new().with_script([MockFetch::Frame(1)]);
        let geometry = device.configure(&config()).expect("configure should succeed");
        let mut buffer = FrameBuffer::new(geometry);

        let result = device.fetch_frame(&mut buffer, Duration::from_millis(5));
        assert!(matches!(result, Err(CameraError::InvalidState { .. })));
    }

    #[test]
    fn test_configure_twice_rejected() {
        let mut device = MockDevice::new();
        device.configure(&config()).expect("configure should succeed");
        assert!(device.configure(&config()).is_err());
    }

    #[test]
    fn test_scripted_fetches() {
        let mut device = MockDevice::new().with_script([
            MockFetch::Timeout,
            MockFetch::Error("usb busy"),
            MockFetch::Frame(9),
        ]);
        let geometry = device.configure(&config()).expect("configure should succeed");
        device.start_capture().expect("start should succeed");
        let mut buffer = FrameBuffer::new(geometry);
        let timeout = Duration::from_millis(5);

        assert!(matches!(
            device.fetch_frame(&mut buffer, timeout),
            Err(CameraError::AcquisitionTimeout(_))
        ));
        assert!(matches!(
            device.fetch_frame(&mut buffer, timeout),
            Err(CameraError::Acquisition(_))
        ));
        let readings = device
            .fetch_frame(&mut buffer, timeout)
            .expect("frame expected");
        assert_eq!(readings.gain, Some(50));
        assert!(buffer.as_bytes().iter().all(|&byte| byte == 9));
        assert_eq!(device.log().borrow().fetches, 3);
    }

    #[test]
    fn test_configure_records_auto_bounds() {
        let bound = std::num::NonZeroU32::new(200).expect("non-zero");
        let mut device = MockDevice::new();
        let config = config().with_gain(crate::config::ControlMode::Auto { seed: 50, bound });
        device.configure(&config).expect("configure should succeed");

        let log = device.log();
        let log = log.borrow();
        assert!(log.applied.contains(&(ControlKind::Gain, 50, true)));
        assert!(log.applied.contains(&(ControlKind::AutoMaxGain, 200, true)));
        assert!(!log
            .applied
            .iter()
            .any(|(kind, _, _)| *kind == ControlKind::AutoMaxExposure));
    }

    #[test]
    fn test_drop_without_close_releases() {
        let device = MockDevice::new();
        let log = device.log();
        drop(device);
        assert_eq!(log.borrow().releases, 1);
    }
}
