use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::ChromaOrder;
use crate::frame::FrameGeometry;
use crate::http::ServerConfig;
use crate::sensor::{SensorModel, DEFAULT_JPEG_QUALITY};
use crate::{FrameSize, PixelFormat};

const DEFAULT_ADDR: &str = "0.0.0.0:80";
const DEFAULT_FRAME_INTERVAL_MS: u64 = 30;
const DEFAULT_AUTO_CAPTURE_INTERVAL_MS: u64 = 100;

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    server: Option<ServerConfigFile>,
    sensor: Option<SensorConfigFile>,
    auto_capture: Option<AutoCaptureConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    frame_interval_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    model: Option<SensorModel>,
    pixel_format: Option<PixelFormat>,
    frame_size: Option<FrameSize>,
    chroma_order: Option<ChromaOrder>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct AutoCaptureConfigFile {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub server: ServerConfig,
    pub sensor: SensorSettings,
    pub auto_capture: AutoCaptureSettings,
}

#[derive(Debug, Clone)]
pub struct SensorSettings {
    pub model: SensorModel,
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    pub chroma_order: ChromaOrder,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct AutoCaptureSettings {
    pub enabled: bool,
    pub interval: Duration,
}

impl CameraConfig {
    /// Reads the file named by `ESPILICAM_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ESPILICAM_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Defaults, then `path`, then environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Geometry the configured sensor runs with.
    pub fn geometry(&self) -> FrameGeometry {
        self.sensor
            .model
            .geometry(self.sensor.pixel_format, self.sensor.frame_size)
            .with_chroma_order(self.sensor.chroma_order)
    }

    fn from_file(file: CameraConfigFile) -> Self {
        let server_file = file.server.unwrap_or_default();
        let server = ServerConfig {
            addr: server_file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            frame_interval: Duration::from_millis(
                server_file
                    .frame_interval_ms
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
            ),
            read_timeout: optional_millis(server_file.read_timeout_ms),
            write_timeout: optional_millis(server_file.write_timeout_ms),
        };

        let sensor_file = file.sensor.unwrap_or_default();
        let sensor = SensorSettings {
            model: sensor_file.model.unwrap_or(SensorModel::Ov7670),
            pixel_format: sensor_file.pixel_format.unwrap_or(PixelFormat::Rgb565),
            frame_size: sensor_file.frame_size.unwrap_or(FrameSize::Qqvga),
            chroma_order: sensor_file.chroma_order.unwrap_or_default(),
            jpeg_quality: sensor_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let auto_file = file.auto_capture.unwrap_or_default();
        let auto_capture = AutoCaptureSettings {
            enabled: auto_file.enabled.unwrap_or(false),
            interval: Duration::from_millis(
                auto_file
                    .interval_ms
                    .unwrap_or(DEFAULT_AUTO_CAPTURE_INTERVAL_MS),
            ),
        };

        Self {
            server,
            sensor,
            auto_capture,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("ESPILICAM_ADDR") {
            if !addr.trim().is_empty() {
                self.server.addr = addr;
            }
        }
        if let Ok(model) = std::env::var("ESPILICAM_SENSOR") {
            if !model.trim().is_empty() {
                self.sensor.model = model.parse()?;
            }
        }
        if let Ok(format) = std::env::var("ESPILICAM_PIXEL_FORMAT") {
            if !format.trim().is_empty() {
                self.sensor.pixel_format = format.parse()?;
            }
        }
        if let Ok(size) = std::env::var("ESPILICAM_FRAME_SIZE") {
            if !size.trim().is_empty() {
                self.sensor.frame_size = size.parse()?;
            }
        }
        if let Ok(enabled) = std::env::var("ESPILICAM_AUTO_CAPTURE") {
            self.auto_capture.enabled = parse_flag(&enabled).ok_or_else(|| {
                anyhow!("ESPILICAM_AUTO_CAPTURE must be one of 1, 0, true, false, on, off")
            })?;
        }
        if let Ok(interval) = std::env::var("ESPILICAM_FRAME_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("ESPILICAM_FRAME_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.server.frame_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.auto_capture.enabled && self.auto_capture.interval.is_zero() {
            return Err(anyhow!("auto_capture.interval_ms must be greater than zero"));
        }
        if !(1..=100).contains(&self.sensor.jpeg_quality) {
            return Err(anyhow!(
                "sensor.jpeg_quality must be between 1 and 100, got {}",
                self.sensor.jpeg_quality
            ));
        }
        let (width, _) = self.sensor.frame_size.dimensions();
        if width % 2 != 0 {
            return Err(anyhow!(
                "frame size {} has an odd width",
                self.sensor.frame_size
            ));
        }
        Ok(())
    }
}

fn optional_millis(millis: Option<u64>) -> Option<Duration> {
    millis.filter(|&ms| ms > 0).map(Duration::from_millis)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config_file(path: &Path) -> Result<CameraConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
