//! Sensor capture contract.
//!
//! A `Sensor` performs one acquisition into the shared `FrameBuffer`. Probing,
//! register programming and bus wiring live behind this trait; the crate only
//! relies on `capture` filling a frame that matches the buffer's geometry.
//!
//! - `SensorModel`: detected sensor and the geometry it runs with
//! - `SyntheticSensor`: test-pattern sensor for hosts without camera hardware

pub mod synthetic;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::frame::{FrameBuffer, FrameGeometry};
use crate::{FrameSize, PixelFormat};

pub use synthetic::{Pattern, SyntheticSensor};

/// Default JPEG quality used by JPEG-only sensors.
pub const DEFAULT_JPEG_QUALITY: u8 = 15;

/// One-shot frame acquisition.
pub trait Sensor: Send {
    fn model(&self) -> SensorModel;

    /// Fills `frame` with a new acquisition. May take tens of milliseconds.
    fn capture(&mut self, frame: &mut FrameBuffer) -> Result<(), CaptureError>;
}

#[derive(Debug)]
pub enum CaptureError {
    /// The sensor is still busy with a previous acquisition.
    Busy,
    /// The sensor did not deliver a frame.
    Unresponsive(String),
    /// The sensor produced more bytes than the framebuffer holds.
    Overflow { len: usize, capacity: usize },
    /// An uncompressed frame did not fill the framebuffer.
    ShortFrame { len: usize, expected: usize },
    /// A previous capture panicked while holding the framebuffer.
    Poisoned,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Busy => write!(f, "sensor busy"),
            CaptureError::Unresponsive(reason) => write!(f, "sensor unresponsive: {}", reason),
            CaptureError::Overflow { len, capacity } => write!(
                f,
                "frame of {} bytes exceeds framebuffer capacity {}",
                len, capacity
            ),
            CaptureError::ShortFrame { len, expected } => {
                write!(f, "frame of {} bytes, expected {}", len, expected)
            }
            CaptureError::Poisoned => write!(f, "framebuffer lock poisoned"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Supported camera sensors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorModel {
    Ov7670,
    Ov7725,
    Ov2640,
}

impl SensorModel {
    pub fn name(self) -> &'static str {
        match self {
            SensorModel::Ov7670 => "OV7670",
            SensorModel::Ov7725 => "OV7725",
            SensorModel::Ov2640 => "OV2640",
        }
    }

    /// Whether the sensor only produces compressed frames.
    pub fn is_jpeg_only(self) -> bool {
        matches!(self, SensorModel::Ov2640)
    }

    /// Geometry the sensor runs with. Raw sensors use the configured format
    /// and size; the OV2640 always runs JPEG at VGA.
    pub fn geometry(self, format: PixelFormat, size: FrameSize) -> FrameGeometry {
        if self.is_jpeg_only() {
            FrameGeometry::new(FrameSize::Vga, PixelFormat::Jpeg)
        } else {
            FrameGeometry::new(size, format)
        }
    }
}

impl fmt::Display for SensorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SensorModel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ov7670" => Ok(SensorModel::Ov7670),
            "ov7725" => Ok(SensorModel::Ov7725),
            "ov2640" => Ok(SensorModel::Ov2640),
            other => Err(anyhow!("camera not supported: '{}'", other)),
        }
    }
}
