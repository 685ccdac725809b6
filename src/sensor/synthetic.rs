//! Synthetic sensor.
//!
//! Produces frames in every native format without camera hardware: scrolling
//! colour bars, or a flat frame whose level changes with every capture so
//! tests can tell two frames apart.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::time::Duration;

use super::{CaptureError, Sensor, SensorModel, DEFAULT_JPEG_QUALITY};
use crate::codec::{color565, join_pixel_pair};
use crate::frame::{FrameBuffer, FrameGeometry};
use crate::PixelFormat;

type Rgb = (u8, u8, u8);

const BARS: [Rgb; 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

/// Picture produced by [`SyntheticSensor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pattern {
    /// Eight vertical colour bars, scrolling four pixels per capture.
    ColorBars,
    /// One gray level over the whole frame, `37 * capture` modulo 256.
    Flat,
}

pub struct SyntheticSensor {
    model: SensorModel,
    pattern: Pattern,
    jpeg_quality: u8,
    capture_delay: Duration,
    frame_count: u64,
}

impl SyntheticSensor {
    pub fn new(model: SensorModel) -> Self {
        Self {
            model,
            pattern: Pattern::ColorBars,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            capture_delay: Duration::ZERO,
            frame_count: 0,
        }
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Simulated exposure time per capture.
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    /// Gray level of the flat pattern for capture number `capture`.
    pub fn flat_level(capture: u64) -> u8 {
        (capture.wrapping_mul(37) % 256) as u8
    }

    fn rgb_at(&self, x: usize, width: usize) -> Rgb {
        match self.pattern {
            Pattern::ColorBars => {
                let phase = (self.frame_count as usize * 4) % width;
                BARS[((x + phase) % width) * BARS.len() / width]
            }
            Pattern::Flat => {
                let level = Self::flat_level(self.frame_count);
                (level, level, level)
            }
        }
    }

    fn render(&self, geometry: FrameGeometry, buf: &mut [u8]) -> Result<usize, CaptureError> {
        match geometry.format {
            PixelFormat::Rgb565 => self.render_pairs(geometry, buf, |a, b| {
                join_pixel_pair(pack565(a), pack565(b))
            }),
            PixelFormat::Rgb555 => self.render_pairs(geometry, buf, |a, b| {
                join_pixel_pair(pack555(a), pack555(b))
            }),
            PixelFormat::Rgb444 => self.render_pairs(geometry, buf, |a, b| {
                join_pixel_pair(pack444(a), pack444(b))
            }),
            PixelFormat::Yuv422 => {
                let chroma = geometry.chroma;
                self.render_pairs(geometry, buf, move |a, b| {
                    let (y1, u1, v1) = rgb_to_yuv(a);
                    let (y2, u2, v2) = rgb_to_yuv(b);
                    chroma.pack(y1, average(u1, u2), y2, average(v1, v2))
                })
            }
            PixelFormat::Grayscale => {
                let width = geometry.width();
                let len = width * geometry.height();
                for (index, byte) in buf[..len].iter_mut().enumerate() {
                    *byte = luma(self.rgb_at(index % width, width));
                }
                Ok(len)
            }
            PixelFormat::Jpeg => self.render_jpeg(geometry, buf),
        }
    }

    fn render_pairs<F>(
        &self,
        geometry: FrameGeometry,
        buf: &mut [u8],
        encode: F,
    ) -> Result<usize, CaptureError>
    where
        F: Fn(Rgb, Rgb) -> u32,
    {
        let width = geometry.width();
        let pairs_per_row = width / 2;
        let len = width * geometry.height() * 2;
        for (index, chunk) in buf[..len].chunks_exact_mut(4).enumerate() {
            let x = (index % pairs_per_row) * 2;
            let word = encode(self.rgb_at(x, width), self.rgb_at(x + 1, width));
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(len)
    }

    fn render_jpeg(&self, geometry: FrameGeometry, buf: &mut [u8]) -> Result<usize, CaptureError> {
        let (width, height) = (geometry.width(), geometry.height());
        let mut rgb = Vec::with_capacity(width * height * 3);
        for _ in 0..height {
            for x in 0..width {
                let (r, g, b) = self.rgb_at(x, width);
                rgb.extend([r, g, b]);
            }
        }
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality)
            .encode(&rgb, width as u32, height as u32, ExtendedColorType::Rgb8)
            .map_err(|e| CaptureError::Unresponsive(format!("jpeg encode failed: {}", e)))?;
        if jpeg.len() > buf.len() {
            return Err(CaptureError::Overflow {
                len: jpeg.len(),
                capacity: buf.len(),
            });
        }
        buf[..jpeg.len()].copy_from_slice(&jpeg);
        Ok(jpeg.len())
    }
}

impl Sensor for SyntheticSensor {
    fn model(&self) -> SensorModel {
        self.model
    }

    fn capture(&mut self, frame: &mut FrameBuffer) -> Result<(), CaptureError> {
        if !self.capture_delay.is_zero() {
            std::thread::sleep(self.capture_delay);
        }
        self.frame_count += 1;
        let geometry = frame.geometry();
        let len = frame.refill(|buf| self.render(geometry, buf))?;
        log::trace!(
            "{} synthetic capture #{}: {} bytes",
            self.model,
            self.frame_count,
            len
        );
        Ok(())
    }
}

fn pack565((r, g, b): Rgb) -> u16 {
    color565(r, g, b)
}

fn pack555((r, g, b): Rgb) -> u16 {
    (u16::from(r >> 3) << 10) | (u16::from(g >> 3) << 5) | u16::from(b >> 3)
}

fn pack444((r, g, b): Rgb) -> u16 {
    (u16::from(r >> 4) << 8) | (u16::from(g >> 4) << 4) | u16::from(b >> 4)
}

/// Studio-range BT.601, the inverse of the codec's transform.
fn rgb_to_yuv((r, g, b): Rgb) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}

fn luma((r, g, b): Rgb) -> u8 {
    ((77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b)) >> 8) as u8
}

fn average(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b)) / 2) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{convert_scanline, gray_to_rgb565};
    use crate::FrameSize;

    fn capture(format: PixelFormat, pattern: Pattern) -> FrameBuffer {
        let mut frame = FrameBuffer::new(FrameGeometry::new(FrameSize::Qqvga, format));
        let mut sensor = SyntheticSensor::new(SensorModel::Ov7670).with_pattern(pattern);
        sensor.capture(&mut frame).expect("synthetic capture");
        frame
    }

    #[test]
    fn fills_every_uncompressed_format_completely() {
        for format in PixelFormat::ALL.into_iter().filter(|f| !f.is_compressed()) {
            let frame = capture(format, Pattern::ColorBars);
            assert_eq!(Some(frame.total_size()), frame.geometry().raw_len());
            assert_eq!(frame.sequence(), 1);
        }
    }

    #[test]
    fn rgb565_bars_decode_to_the_bar_colours() {
        let frame = capture(PixelFormat::Rgb565, Pattern::ColorBars);
        let words = frame.scanline_words(0).unwrap();
        let pixels = convert_scanline(&words, 160, PixelFormat::Rgb565).unwrap();
        // First capture scrolls by four pixels; the first bar is still white
        // and the last four columns wrap around to it.
        assert_eq!(pixels[0], 0xFFFF);
        assert_eq!(pixels[150], 0x0000);
        assert_eq!(pixels[159], 0xFFFF);
    }

    #[test]
    fn flat_pattern_changes_level_per_capture() {
        let mut frame = FrameBuffer::new(FrameGeometry::new(FrameSize::Qqvga, PixelFormat::Grayscale));
        let mut sensor = SyntheticSensor::new(SensorModel::Ov7725).with_pattern(Pattern::Flat);
        sensor.capture(&mut frame).unwrap();
        assert!(frame.as_bytes().iter().all(|&b| b == SyntheticSensor::flat_level(1)));
        sensor.capture(&mut frame).unwrap();
        assert!(frame.as_bytes().iter().all(|&b| b == SyntheticSensor::flat_level(2)));
        assert_eq!(sensor.frames_captured(), 2);

        let words = frame.scanline_words(5).unwrap();
        let pixels = convert_scanline(&words, 160, PixelFormat::Grayscale).unwrap();
        assert!(pixels
            .iter()
            .all(|&p| p == gray_to_rgb565(SyntheticSensor::flat_level(2))));
    }

    #[test]
    fn yuv_white_bar_is_near_white() {
        let frame = capture(PixelFormat::Yuv422, Pattern::ColorBars);
        let words = frame.scanline_words(0).unwrap();
        let pixels = convert_scanline(&words, 160, PixelFormat::Yuv422).unwrap();
        let (r, g, b) = crate::codec::channels565(pixels[0]);
        assert!(r >= 30 && g >= 61 && b >= 30, "{:#06x}", pixels[0]);
    }

    #[test]
    fn jpeg_frames_decode() {
        let mut frame = FrameBuffer::new(FrameGeometry::new(FrameSize::Vga, PixelFormat::Jpeg));
        let mut sensor = SyntheticSensor::new(SensorModel::Ov2640);
        sensor.capture(&mut frame).unwrap();
        let bytes = frame.as_bytes();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(bytes).expect("decode jpeg");
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }
}
