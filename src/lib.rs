//! espilicam - single-board camera appliance
//!
//! A sensor refills one fixed framebuffer in place. A single HTTP worker turns
//! that framebuffer into bitmaps, graymaps, raw dumps, or an endless
//! `multipart/x-mixed-replace` stream, pausing the background auto-capture
//! for as long as a response is reading the frame.
//!
//! # Module Structure
//!
//! - `codec`: packed sensor words to RGB565 scanlines
//! - `frame`: the framebuffer and the geometry it is bound to
//! - `sensor`: capture contract, sensor models, synthetic sensor
//! - `camera`: shared context, auto-capture flag and worker
//! - `http`: request parsing, response framing, the server loop
//! - `config`: file + environment configuration
//! - Core types: `PixelFormat`, `FrameSize`

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

pub mod camera;
pub mod codec;
pub mod config;
pub mod frame;
pub mod http;
pub mod sensor;

pub use camera::{AutoCapture, AutoCaptureFlag, AutoCaptureHandle, Camera, SuspendGuard};
pub use codec::{convert_scanline, ChromaOrder, CodecError, ScanlineCodec};
pub use frame::{FrameBuffer, FrameGeometry};
pub use http::{CameraServer, ConnectionOutcome, ServeError, ServerConfig, ServerHandle};
pub use sensor::{CaptureError, Sensor, SensorModel, SyntheticSensor};

// -------------------- Pixel Formats --------------------

/// Sample format of the framebuffer, fixed for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// RGB, 2 bytes per pixel.
    Rgb565,
    /// YUYV, 2 bytes per pixel, one chroma pair per two luma samples.
    Yuv422,
    /// 1 byte per pixel.
    Grayscale,
    /// JPEG compressed, variable length.
    Jpeg,
    /// RGB, 2 bytes per pixel, top bit unused.
    Rgb555,
    /// RGB, 2 bytes per pixel, top nibble unused.
    Rgb444,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 6] = [
        PixelFormat::Rgb565,
        PixelFormat::Yuv422,
        PixelFormat::Grayscale,
        PixelFormat::Jpeg,
        PixelFormat::Rgb555,
        PixelFormat::Rgb444,
    ];

    /// Framebuffer bytes per pixel, `None` for compressed formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Grayscale => Some(1),
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb565
            | PixelFormat::Yuv422
            | PixelFormat::Rgb555
            | PixelFormat::Rgb444 => Some(2),
        }
    }

    pub fn is_compressed(self) -> bool {
        self.bytes_per_pixel().is_none()
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgb565 => "RGB565",
            PixelFormat::Yuv422 => "YUV422",
            PixelFormat::Grayscale => "GRAYSCALE",
            PixelFormat::Jpeg => "JPEG",
            PixelFormat::Rgb555 => "RGB555",
            PixelFormat::Rgb444 => "RGB444",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        PixelFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| anyhow!("unknown pixel format '{}'", value))
    }
}

// -------------------- Frame Sizes --------------------

/// Sensor output resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    /// 160x120
    Qqvga,
    /// 176x144
    Qcif,
    /// 240x160
    Hqvga,
    /// 320x240
    Qvga,
    /// 640x480
    Vga,
    /// 800x600
    Svga,
}

impl FrameSize {
    pub const ALL: [FrameSize; 6] = [
        FrameSize::Qqvga,
        FrameSize::Qcif,
        FrameSize::Hqvga,
        FrameSize::Qvga,
        FrameSize::Vga,
        FrameSize::Svga,
    ];

    /// `(width, height)` in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qcif => (176, 144),
            FrameSize::Hqvga => (240, 160),
            FrameSize::Qvga => (320, 240),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameSize::Qqvga => "QQVGA",
            FrameSize::Qcif => "QCIF",
            FrameSize::Hqvga => "HQVGA",
            FrameSize::Qvga => "QVGA",
            FrameSize::Vga => "VGA",
            FrameSize::Svga => "SVGA",
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        write!(f, "{} ({}x{})", self.name(), width, height)
    }
}

impl FromStr for FrameSize {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        FrameSize::ALL
            .into_iter()
            .find(|size| size.name().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| anyhow!("unknown frame size '{}'", value))
    }
}
