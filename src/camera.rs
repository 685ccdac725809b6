//! Shared camera context.
//!
//! `Camera` owns the framebuffer, the sensor and the auto-capture flag. It is
//! passed to the server and the auto-capture worker as an `Arc`; nothing here
//! is a process global.
//!
//! Framebuffer discipline:
//! - a capture holds the sensor mutex and the framebuffer write lock;
//! - a response holds the framebuffer read lock for its whole body, so a
//!   capture can never land in the middle of one response;
//! - the server suspends auto-capture for the duration of every response.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::codec::ScanlineCodec;
use crate::frame::{FrameBuffer, FrameGeometry};
use crate::sensor::{CaptureError, Sensor, SensorModel};

// ----------------------------------------------------------------------------
// AutoCaptureFlag: movie mode on/off
// ----------------------------------------------------------------------------

/// Whether the background worker may capture.
#[derive(Debug, Default)]
pub struct AutoCaptureFlag {
    enabled: AtomicBool,
}

impl AutoCaptureFlag {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Sets the flag and returns the previous value. Setting the current
    /// value is a no-op.
    pub fn set(&self, enabled: bool) -> bool {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            log::debug!(
                "auto-capture {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        previous
    }

    /// Disables auto-capture until the returned guard drops.
    pub fn suspend(&self) -> SuspendGuard<'_> {
        let previous = self.set(false);
        SuspendGuard {
            flag: self,
            previous,
        }
    }
}

/// Restores the flag to its pre-suspend value on drop.
#[must_use = "auto-capture resumes as soon as the guard is dropped"]
pub struct SuspendGuard<'a> {
    flag: &'a AutoCaptureFlag,
    previous: bool,
}

impl SuspendGuard<'_> {
    /// Value the flag had before the suspend.
    pub fn previous(&self) -> bool {
        self.previous
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

// ----------------------------------------------------------------------------
// Camera: framebuffer + sensor + flag
// ----------------------------------------------------------------------------

pub struct Camera {
    geometry: FrameGeometry,
    model: SensorModel,
    frame: RwLock<FrameBuffer>,
    sensor: Mutex<Box<dyn Sensor>>,
    auto_capture: AutoCaptureFlag,
}

impl Camera {
    /// Allocates the framebuffer for `geometry`. Auto-capture starts disabled.
    pub fn new(geometry: FrameGeometry, sensor: Box<dyn Sensor>) -> Self {
        Self {
            geometry,
            model: sensor.model(),
            frame: RwLock::new(FrameBuffer::new(geometry)),
            sensor: Mutex::new(sensor),
            auto_capture: AutoCaptureFlag::new(false),
        }
    }

    pub fn with_auto_capture(self, enabled: bool) -> Self {
        self.auto_capture.set(enabled);
        self
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn sensor_model(&self) -> SensorModel {
        self.model
    }

    /// Scanline converter for the active format, `None` for JPEG.
    pub fn codec(&self) -> Option<ScanlineCodec> {
        self.geometry.codec()
    }

    pub fn auto_capture(&self) -> &AutoCaptureFlag {
        &self.auto_capture
    }

    /// One acquisition into the framebuffer. Returns the new frame sequence.
    pub fn capture(&self) -> Result<u64, CaptureError> {
        let mut sensor = self.sensor.lock().map_err(|_| CaptureError::Poisoned)?;
        self.capture_locked(sensor.as_mut())
    }

    /// Captures only while auto-capture is enabled. The flag is checked with
    /// the sensor held, so a capture never starts after a suspend returned.
    pub fn capture_if_auto(&self) -> Option<Result<u64, CaptureError>> {
        let mut sensor = match self.sensor.lock() {
            Ok(sensor) => sensor,
            Err(_) => return Some(Err(CaptureError::Poisoned)),
        };
        if !self.auto_capture.is_enabled() {
            return None;
        }
        Some(self.capture_locked(sensor.as_mut()))
    }

    fn capture_locked(&self, sensor: &mut dyn Sensor) -> Result<u64, CaptureError> {
        let mut frame = self.frame.write().map_err(|_| CaptureError::Poisoned)?;
        sensor.capture(&mut frame)?;
        Ok(frame.sequence())
    }

    /// Read access to the current frame. Captures wait until it is dropped.
    pub fn frame(&self) -> RwLockReadGuard<'_, FrameBuffer> {
        self.frame.read().unwrap_or_else(PoisonError::into_inner)
    }
}

// ----------------------------------------------------------------------------
// AutoCapture: background movie-mode worker
// ----------------------------------------------------------------------------

/// Periodic background capture while the flag is enabled.
pub struct AutoCapture {
    camera: Arc<Camera>,
    interval: Duration,
}

impl AutoCapture {
    pub fn new(camera: Arc<Camera>, interval: Duration) -> Self {
        Self { camera, interval }
    }

    pub fn spawn(self) -> AutoCaptureHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            run_auto_capture(&self.camera, self.interval, &shutdown_thread)
        });
        AutoCaptureHandle {
            shutdown,
            join: Some(join),
        }
    }
}

#[derive(Debug)]
pub struct AutoCaptureHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl AutoCaptureHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("auto-capture thread panicked"))?;
        }
        Ok(())
    }
}

fn run_auto_capture(camera: &Camera, interval: Duration, shutdown: &AtomicBool) {
    log::info!("auto-capture worker started ({} ms)", interval.as_millis());
    let mut captured = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        match camera.capture_if_auto() {
            Some(Ok(_)) => captured += 1,
            Some(Err(err)) => log::warn!("auto-capture failed: {}", err),
            None => {}
        }
        std::thread::sleep(interval);
    }
    log::info!("auto-capture worker stopped after {} frames", captured);
}
