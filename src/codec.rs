//! Sensor sample words to RGB565.
//!
//! Every uncompressed source format is read from the framebuffer as packed
//! little-endian 32-bit words. Two-byte formats carry two pixels per word,
//! grayscale carries four. The output is one RGB565 value per pixel; on the
//! wire each value is written little-endian.
//!
//! The production YUV path is integer-only. `yuv_to_rgb565_reference` is the
//! floating-point formula it approximates and is only used for checking.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::PixelFormat;

/// Position of the chroma samples inside a YUV422 word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromaOrder {
    /// `(Y1, V, Y2, U)` in memory order.
    #[default]
    Vu,
    /// `(Y1, U, Y2, V)` in memory order.
    Uv,
}

impl ChromaOrder {
    /// Splits a YUV422 word into `(y1, u, y2, v)`.
    pub fn unpack(self, word: u32) -> (u8, u8, u8, u8) {
        let (y1, c1, y2, c2) = (
            unpack(0, word),
            unpack(1, word),
            unpack(2, word),
            unpack(3, word),
        );
        match self {
            ChromaOrder::Vu => (y1, c2, y2, c1),
            ChromaOrder::Uv => (y1, c1, y2, c2),
        }
    }

    /// Inverse of [`ChromaOrder::unpack`].
    pub fn pack(self, y1: u8, u: u8, y2: u8, v: u8) -> u32 {
        match self {
            ChromaOrder::Vu => u32::from_le_bytes([y1, v, y2, u]),
            ChromaOrder::Uv => u32::from_le_bytes([y1, u, y2, v]),
        }
    }
}

impl FromStr for ChromaOrder {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vu" => Ok(ChromaOrder::Vu),
            "uv" => Ok(ChromaOrder::Uv),
            other => Err(anyhow::anyhow!(
                "unknown chroma order '{}'; expected vu or uv",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// The format has no scanline representation (JPEG).
    Unsupported(PixelFormat),
    /// Fewer source words than the requested width needs.
    ShortScanline { expected: usize, actual: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Unsupported(format) => {
                write!(f, "{} frames cannot be converted to RGB565", format)
            }
            CodecError::ShortScanline { expected, actual } => write!(
                f,
                "scanline too short: need {} words, got {}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for CodecError {}

#[inline]
fn unpack(byte: u32, word: u32) -> u8 {
    (word >> (byte * 8)) as u8
}

#[inline]
fn clamp_channel(n: i32) -> u8 {
    n.clamp(0, 255) as u8
}

/// Packs 8-bit channels into RGB565 by truncation.
#[inline]
pub fn color565(r: u8, g: u8, b: u8) -> u16 {
    ((u16::from(r) & 0xF8) << 8) | ((u16::from(g) & 0xFC) << 3) | (u16::from(b) >> 3)
}

/// Splits an RGB565 value into its `(r5, g6, b5)` fields.
pub fn channels565(pixel: u16) -> (u8, u8, u8) {
    (
        (pixel >> 11) as u8,
        ((pixel >> 5) & 0x3F) as u8,
        (pixel & 0x1F) as u8,
    )
}

/// Fixed-point YUV to RGB565, coefficients scaled by 1024.
#[inline]
pub fn yuv_to_rgb565(y: u8, u: u8, v: u8) -> u16 {
    let a0 = 1192 * (i32::from(y) - 16);
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;
    let r = (a0 + 1634 * v) >> 10;
    let g = (a0 - 832 * v - 400 * u) >> 10;
    let b = (a0 + 2066 * u) >> 10;
    color565(clamp_channel(r), clamp_channel(g), clamp_channel(b))
}

/// Floating-point form of [`yuv_to_rgb565`]. Not used on the serving path.
pub fn yuv_to_rgb565_reference(y: u8, u: u8, v: u8) -> u16 {
    let y = f64::from(y) - 16.0;
    let u = f64::from(u) - 128.0;
    let v = f64::from(v) - 128.0;
    let r = 1.164 * y + 1.596 * v;
    let g = 1.164 * y - 0.392 * u - 0.813 * v;
    let b = 1.164 * y + 2.017 * u;
    color565(
        clamp_channel(r as i32),
        clamp_channel(g as i32),
        clamp_channel(b as i32),
    )
}

/// Replicates an intensity into all three fields.
#[inline]
pub fn gray_to_rgb565(level: u8) -> u16 {
    color565(level, level, level)
}

#[inline]
pub fn rgb555_to_rgb565(pixel: u16) -> u16 {
    let r5 = (pixel >> 10) & 0x1F;
    let g5 = (pixel >> 5) & 0x1F;
    let b5 = pixel & 0x1F;
    let g6 = (g5 << 1) | (g5 >> 4);
    (r5 << 11) | (g6 << 5) | b5
}

#[inline]
pub fn rgb444_to_rgb565(pixel: u16) -> u16 {
    let r4 = (pixel >> 8) & 0x0F;
    let g4 = (pixel >> 4) & 0x0F;
    let b4 = pixel & 0x0F;
    let r5 = (r4 << 1) | (r4 >> 3);
    let g6 = (g4 << 2) | (g4 >> 2);
    let b5 = (b4 << 1) | (b4 >> 3);
    (r5 << 11) | (g6 << 5) | b5
}

/// Splits a two-pixel word into its samples in display order.
///
/// The capture DMA stores each pair with its halves swapped and each sample
/// big-endian: memory bytes `[b0, b1, b2, b3]` hold `b2:b3` first, `b0:b1`
/// second.
#[inline]
pub fn split_pixel_pair(word: u32) -> (u16, u16) {
    let first = (u16::from(unpack(2, word)) << 8) | u16::from(unpack(3, word));
    let second = (u16::from(unpack(0, word)) << 8) | u16::from(unpack(1, word));
    (first, second)
}

/// Inverse of [`split_pixel_pair`].
#[inline]
pub fn join_pixel_pair(first: u16, second: u16) -> u32 {
    let [first_hi, first_lo] = first.to_be_bytes();
    let [second_hi, second_lo] = second.to_be_bytes();
    u32::from_le_bytes([second_hi, second_lo, first_hi, first_lo])
}

/// Scanline converter for one source format.
///
/// Construction rejects formats without a scanline layout, so conversion
/// itself only fails on a short input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanlineCodec {
    format: PixelFormat,
    chroma: ChromaOrder,
}

impl ScanlineCodec {
    pub fn new(format: PixelFormat, chroma: ChromaOrder) -> Result<Self, CodecError> {
        if format.is_compressed() {
            return Err(CodecError::Unsupported(format));
        }
        Ok(Self { format, chroma })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Number of 32-bit source words holding `width` pixels.
    pub fn words_for(&self, width: usize) -> usize {
        let bytes_per_pixel = self.format.bytes_per_pixel().unwrap_or(2);
        (width * bytes_per_pixel).div_ceil(4)
    }

    /// Converts one scanline into `out`, replacing its contents.
    pub fn convert_into(
        &self,
        src: &[u32],
        width: usize,
        out: &mut Vec<u16>,
    ) -> Result<(), CodecError> {
        let needed = self.words_for(width);
        if src.len() < needed {
            return Err(CodecError::ShortScanline {
                expected: needed,
                actual: src.len(),
            });
        }
        out.clear();
        out.reserve(width + 3);
        for &word in &src[..needed] {
            match self.format {
                PixelFormat::Rgb565 => {
                    let (first, second) = split_pixel_pair(word);
                    out.extend([first, second]);
                }
                PixelFormat::Rgb555 => {
                    let (first, second) = split_pixel_pair(word);
                    out.extend([rgb555_to_rgb565(first), rgb555_to_rgb565(second)]);
                }
                PixelFormat::Rgb444 => {
                    let (first, second) = split_pixel_pair(word);
                    out.extend([rgb444_to_rgb565(first), rgb444_to_rgb565(second)]);
                }
                PixelFormat::Yuv422 => {
                    let (y1, u, y2, v) = self.chroma.unpack(word);
                    out.extend([yuv_to_rgb565(y1, u, v), yuv_to_rgb565(y2, u, v)]);
                }
                PixelFormat::Grayscale => {
                    out.extend((0..4).map(|byte| gray_to_rgb565(unpack(byte, word))));
                }
                PixelFormat::Jpeg => return Err(CodecError::Unsupported(self.format)),
            }
        }
        out.truncate(width);
        Ok(())
    }

    pub fn convert(&self, src: &[u32], width: usize) -> Result<Vec<u16>, CodecError> {
        let mut out = Vec::with_capacity(width);
        self.convert_into(src, width, &mut out)?;
        Ok(out)
    }
}

/// Converts one scanline of `format` words to `width` RGB565 pixels.
///
/// YUV422 input is read in the default `(Y1, V, Y2, U)` order; use
/// [`ScanlineCodec`] to pick another.
pub fn convert_scanline(
    src: &[u32],
    width: usize,
    format: PixelFormat,
) -> Result<Vec<u16>, CodecError> {
    ScanlineCodec::new(format, ChromaOrder::default())?.convert(src, width)
}

/// Appends RGB565 pixels as little-endian bytes.
pub fn rgb565_to_wire(pixels: &[u16], out: &mut Vec<u8>) {
    out.reserve(pixels.len() * 2);
    for pixel in pixels {
        out.extend_from_slice(&pixel.to_le_bytes());
    }
}
