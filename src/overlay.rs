//! Status text overlay burnt into raw frames in place.
//!
//! Text is drawn with a built-in 5x7 bitmap font, scaled ×2, anchored at a
//! fixed position near the top-left corner. Each glyph gets a dark outline
//! first and a light fill on top so it stays legible over any scene.
//! Lowercase letters are drawn as capitals.

use crate::capture::FrameMetadata;
use crate::traits::{CameraError, FrameBuffer, FrameGeometry, PixelFormat, Result};

/// Left edge of the first glyph, in pixels.
const ORIGIN_X: i64 = 10;
/// Baseline of the text row, in pixels.
const BASELINE_Y: i64 = 40;
/// Size of one font pixel on screen.
const SCALE: i64 = 2;
/// Outline thickness around every font pixel.
const STROKE: i64 = 1;
const GLYPH_WIDTH: i64 = 5;
const GLYPH_HEIGHT: i64 = 7;
/// Horizontal distance between glyph origins.
const ADVANCE: i64 = (GLYPH_WIDTH + 1) * SCALE;

/// 8-bit level of the outline.
const DARK: u8 = 0;
/// 8-bit level of the fill.
const LIGHT: u8 = 200;

/// Render the status line for one frame into `frame`.
pub fn render_status(frame: &mut FrameBuffer, metadata: &FrameMetadata) -> Result<()> {
    let text = status_line(metadata);
    render(frame, &text)
}

/// Burn `text` into `frame`.
pub fn render(frame: &mut FrameBuffer, text: &str) -> Result<()> {
    let geometry = frame.geometry();
    draw_text(frame.as_mut_bytes(), geometry, text)
}

/// Burn `text` into raw `pixels` laid out as `geometry`.
///
/// Only pixel values change; drawing is clipped to the frame.
pub fn draw_text(pixels: &mut [u8], geometry: FrameGeometry, text: &str) -> Result<()> {
    if pixels.len() != geometry.frame_size() {
        return Err(CameraError::InvariantViolation(format!(
            "overlay target holds {} bytes, geometry needs {}",
            pixels.len(),
            geometry.frame_size()
        )));
    }

    let mut canvas = Canvas { pixels, geometry };
    let top = BASELINE_Y - GLYPH_HEIGHT * SCALE;

    for (pass_level, grow) in [(DARK, STROKE), (LIGHT, 0)] {
        let mut left = ORIGIN_X;
        for ch in text.chars() {
            for (row, bits) in (0i64..).zip(glyph(ch)) {
                for col in 0..GLYPH_WIDTH {
                    if bits & (0x10 >> col) == 0 {
                        continue;
                    }
                    let x = left + col * SCALE;
                    let y = top + row * SCALE;
                    let side = SCALE + 2 * grow;
                    canvas.fill_rect(x - grow, y - grow, side, side, pass_level);
                }
            }
            left += ADVANCE;
        }
    }

    Ok(())
}

/// Format the status line: time, gain, exposure, frame number, temperature.
pub fn status_line(metadata: &FrameMetadata) -> String {
    let readings = &metadata.readings;
    let gain = readings
        .gain
        .map_or_else(|| "--".to_owned(), |gain| gain.to_string());
    let exposure = readings
        .exposure_us
        .map_or_else(|| "--".to_owned(), format_exposure);
    let temperature = readings
        .temperature_c
        .map_or_else(|| "--".to_owned(), |celsius| format!("{celsius:.0}"));

    format!(
        "{} Gain:{gain} Exp:{exposure} Frame:{} Temp:{temperature}C",
        metadata.timestamp.format("%d%m%y %H:%M:%S"),
        metadata.sequence,
    )
}

/// Microseconds below 1000, whole milliseconds otherwise.
fn format_exposure(us: i64) -> String {
    if us < 1000 {
        format!("{us}us")
    } else {
        format!("{}ms", us / 1000)
    }
}

struct Canvas<'a> {
    pixels: &'a mut [u8],
    geometry: FrameGeometry,
}

impl Canvas<'_> {
    fn fill_rect(&mut self, x: i64, y: i64, width: i64, height: i64, level: u8) {
        for py in y..y + height {
            for px in x..x + width {
                self.put(px, py, level);
            }
        }
    }

    fn put(&mut self, x: i64, y: i64, level: u8) {
        let (Ok(x), Ok(y)) = (usize::try_from(x), usize::try_from(y)) else {
            return;
        };
        if x >= self.geometry.width as usize || y >= self.geometry.height as usize {
            return;
        }
        let bpp = self.geometry.format.bytes_per_pixel();
        let offset = (y * self.geometry.width as usize + x) * bpp;

        match self.geometry.format {
            PixelFormat::Raw8 => {
                if let Some(sample) = self.pixels.get_mut(offset) {
                    *sample = level;
                }
            }
            PixelFormat::Raw16 => {
                let value = u16::from(level) * 257;
                if let Some(sample) = self.pixels.get_mut(offset..offset + 2) {
                    sample.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
    }
}

#[rustfmt::skip]
const fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        ' ' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SensorReadings;
    use chrono::{Local, TimeZone};

    fn metadata(readings: SensorReadings) -> FrameMetadata {
        FrameMetadata {
            sequence: 7,
            readings,
            timestamp: Local
                .with_ymd_and_hms(2024, 3, 5, 21, 7, 9)
                .single()
                .expect("unambiguous local time"),
        }
    }

    #[test]
    fn test_status_line_format() {
        let line = status_line(&metadata(SensorReadings {
            gain: Some(120),
            exposure_us: Some(25_400),
            temperature_c: Some(23.4),
        }));
        assert_eq!(line, "050324 21:07:09 Gain:120 Exp:25ms Frame:7 Temp:23C");
    }

    #[test]
    fn test_status_line_short_exposure_and_missing_values() {
        let line = status_line(&metadata(SensorReadings {
            gain: None,
            exposure_us: Some(640),
            temperature_c: None,
        }));
        assert_eq!(line, "050324 21:07:09 Gain:-- Exp:640us Frame:7 Temp:--C");
    }

    #[test]
    fn test_render_keeps_size_and_changes_text_area() {
        let geometry = FrameGeometry::new(320, 64, PixelFormat::Raw8);
        let mut frame = FrameBuffer::new(geometry);
        frame.as_mut_bytes().fill(100);

        render(&mut frame, "GAIN:50").expect("render should succeed");

        assert_eq!(frame.len(), geometry.frame_size());
        let bytes = frame.as_bytes();
        assert!(bytes.contains(&DARK));
        assert!(bytes.contains(&LIGHT));
        // Below the text row nothing changes.
        let untouched = &bytes[50 * 320..];
        assert!(untouched.iter().all(|&byte| byte == 100));
    }

    #[test]
    fn test_render_raw16_writes_little_endian_samples() {
        let geometry = FrameGeometry::new(128, 48, PixelFormat::Raw16);
        let mut frame = FrameBuffer::new(geometry);
        frame.as_mut_bytes().fill(0x11);

        render(&mut frame, "8").expect("render should succeed");

        let light = (u16::from(LIGHT) * 257).to_le_bytes();
        let samples: Vec<[u8; 2]> = frame
            .as_bytes()
            .chunks_exact(2)
            .map(|pair| [pair[0], pair[1]])
            .collect();
        assert!(samples.contains(&light));
        assert!(samples.contains(&[0, 0]));
        assert_eq!(frame.len(), 128 * 48 * 2);
    }

    #[test]
    fn test_render_clips_to_small_frames() {
        let geometry = FrameGeometry::new(16, 16, PixelFormat::Raw8);
        let mut frame = FrameBuffer::new(geometry);
        render(&mut frame, "LONG STATUS TEXT THAT DOES NOT FIT").expect("clipped render");
        assert_eq!(frame.len(), 256);
    }

    #[test]
    fn test_size_mismatch_is_invariant_violation() {
        let geometry = FrameGeometry::new(64, 64, PixelFormat::Raw16);
        let mut pixels = vec![0u8; 64 * 64];
        let result = draw_text(&mut pixels, geometry, "X");
        assert!(matches!(result, Err(CameraError::InvariantViolation(_))));
    }

    #[test]
    fn test_lowercase_matches_uppercase() {
        assert_eq!(glyph('g'), glyph('G'));
        assert_eq!(glyph('m'), glyph('M'));
    }
}
