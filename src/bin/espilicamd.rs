//! espilicamd - camera appliance daemon
//!
//! This daemon:
//! 1. Loads configuration (file + environment)
//! 2. Allocates the framebuffer for the configured sensor
//! 3. Serves /bmp, /pgm, /get and /stream over HTTP
//! 4. Optionally captures in the background while no response is running

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use espilicam::config::CameraConfig;
use espilicam::{AutoCapture, Camera, CameraServer, SyntheticSensor};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "ESPILICAM_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address, overrides the configured one.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = CameraConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }

    let geometry = config.geometry();
    let sensor = SyntheticSensor::new(config.sensor.model)
        .with_jpeg_quality(config.sensor.jpeg_quality);
    let camera = Arc::new(
        Camera::new(geometry, Box::new(sensor)).with_auto_capture(config.auto_capture.enabled),
    );
    let (width, height) = geometry.dimensions();
    log::info!(
        "{} sensor: {} {}x{} ({} byte framebuffer)",
        camera.sensor_model(),
        geometry.format,
        width,
        height,
        geometry.capacity()
    );

    let auto_capture = if config.auto_capture.enabled {
        Some(AutoCapture::new(camera.clone(), config.auto_capture.interval).spawn())
    } else {
        None
    };

    let server = CameraServer::new(config.server.clone(), camera).spawn()?;
    for path in ["bmp", "stream", "get"] {
        log::info!("http://{}/{}", server.addr, path);
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("espilicamd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping camera server...");
    server.stop()?;
    if let Some(handle) = auto_capture {
        handle.stop()?;
    }

    Ok(())
}
