//! Minimal HTTP/1.1 camera server.
//!
//! One blocking worker thread serves connections strictly one at a time.
//! A request is a single read; its first bytes pick the route and every
//! response is written until the connection closes. `/stream` keeps
//! writing multipart frames until a write fails.
//!
//! - `request`: route lookahead
//! - `response`: headers, body selection and framing

pub mod request;
pub mod response;

use anyhow::{anyhow, Result};
use std::fmt;
use std::io::{self, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::camera::Camera;
use request::{parse_route, ProtocolError, Route};
use response::Body;

/// Bytes taken from the first read of a connection.
const REQUEST_BUFFER_BYTES: usize = 1024;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    /// Pause between stream frames.
    pub frame_interval: Duration,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:80".to_string(),
            frame_interval: Duration::from_millis(30),
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// How a connection finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// A single-shot response was written completely.
    Served { route: Route, bytes: usize },
    /// The stream ended because the client went away.
    StreamEnded { parts: u64, bytes: usize },
}

#[derive(Debug)]
pub enum ServeError {
    /// Nothing was written.
    Protocol(ProtocolError),
    Read(io::Error),
    Write(io::Error),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::Protocol(err) => write!(f, "malformed request: {}", err),
            ServeError::Read(err) => write!(f, "request read failed: {}", err),
            ServeError::Write(err) => write!(f, "response write failed: {}", err),
        }
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServeError::Protocol(err) => Some(err),
            ServeError::Read(err) | ServeError::Write(err) => Some(err),
        }
    }
}

impl From<ProtocolError> for ServeError {
    fn from(err: ProtocolError) -> Self {
        ServeError::Protocol(err)
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stops accepting and waits for the worker. An open stream is served
    /// until its client disconnects.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("camera server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct CameraServer {
    cfg: ServerConfig,
    camera: Arc<Camera>,
}

impl CameraServer {
    pub fn new(cfg: ServerConfig, camera: Arc<Camera>) -> Self {
        Self { cfg, camera }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("camera server listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let camera = self.camera;
        let join = std::thread::spawn(move || {
            let accept = || listener.accept().map(|(stream, _)| stream);
            run_server(accept, &cfg, &camera, &shutdown_thread);
            log::info!("camera server on {} stopped", addr);
        });

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

/// Accept loop. Only `shutdown` ends it; a failed accept is logged and
/// retried after the poll interval.
fn run_server<A>(mut accept: A, cfg: &ServerConfig, camera: &Camera, shutdown: &AtomicBool)
where
    A: FnMut() -> io::Result<TcpStream>,
{
    while !shutdown.load(Ordering::SeqCst) {
        match accept() {
            Ok(stream) => {
                if let Err(err) = handle_connection(stream, camera, cfg) {
                    log::warn!("camera request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                log::warn!("accept failed, retrying: {}", err);
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, camera: &Camera, cfg: &ServerConfig) -> Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(cfg.read_timeout)?;
    stream.set_write_timeout(cfg.write_timeout)?;

    let outcome = serve_connection(&mut stream, camera, cfg);
    if let Err(err) = stream.shutdown(Shutdown::Both) {
        log::debug!("{}: shutdown: {}", peer, err);
    }
    match outcome? {
        ConnectionOutcome::Served { route, bytes } => {
            log::info!("{} /{}: {} bytes", peer, route, bytes);
        }
        ConnectionOutcome::StreamEnded { parts, bytes } => {
            log::info!("{} stream closed after {} frames ({} bytes)", peer, parts, bytes);
        }
    }
    Ok(())
}

/// Serves one connection: reads the request, then writes the response or
/// the stream. Auto-capture is suspended until this returns.
pub fn serve_connection<S: Read + Write>(
    stream: &mut S,
    camera: &Camera,
    cfg: &ServerConfig,
) -> Result<ConnectionOutcome, ServeError> {
    let mut request = [0u8; REQUEST_BUFFER_BYTES];
    let len = stream.read(&mut request).map_err(ServeError::Read)?;
    let route = parse_route(&request[..len])?;

    let _suspended = camera.auto_capture().suspend();
    let body = Body::select(route, camera.geometry().format);
    if route.is_stream() {
        return Ok(write_stream(stream, camera, body, cfg.frame_interval));
    }

    if body.reads_frame() {
        refresh(camera);
    }
    let frame = camera.frame();
    let mut out = BufWriter::new(stream);
    let head = response::write_head(&mut out, body.content_type()).map_err(ServeError::Write)?;
    let written = response::write_body(&mut out, body, &frame).map_err(ServeError::Write)?;
    out.flush().map_err(ServeError::Write)?;
    Ok(ConnectionOutcome::Served {
        route,
        bytes: head + written,
    })
}

fn write_stream<W: Write>(
    stream: &mut W,
    camera: &Camera,
    body: Body,
    frame_interval: Duration,
) -> ConnectionOutcome {
    let mut out = BufWriter::new(stream);
    let mut parts = 0u64;
    let mut bytes = 0usize;

    match response::write_stream_head(&mut out).and_then(|n| out.flush().map(|_| n)) {
        Ok(n) => bytes += n,
        Err(err) => {
            log::debug!("stream head not delivered: {}", err);
            return ConnectionOutcome::StreamEnded { parts, bytes };
        }
    }

    loop {
        refresh(camera);
        let sent = {
            let frame = camera.frame();
            response::write_part(&mut out, body, &frame).and_then(|n| out.flush().map(|_| n))
        };
        match sent {
            Ok(n) => {
                bytes += n;
                parts += 1;
            }
            Err(err) => {
                log::debug!("stream write failed after {} frames: {}", parts, err);
                return ConnectionOutcome::StreamEnded { parts, bytes };
            }
        }
        std::thread::sleep(frame_interval);
    }
}

/// Captures a new frame. On failure the previous frame is served.
fn refresh(camera: &Camera) {
    if let Err(err) = camera.capture() {
        log::warn!("capture failed, serving previous frame: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuffer, FrameGeometry};
    use crate::sensor::{CaptureError, Sensor, SensorModel, SyntheticSensor};
    use crate::{FrameSize, PixelFormat};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    /// Request bytes in, response bytes out; writes fail past `limit`.
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        limit: usize,
    }

    impl MockStream {
        fn new(request: &[u8]) -> Self {
            Self {
                input: Cursor::new(request.to_vec()),
                output: Vec::new(),
                limit: usize::MAX,
            }
        }

        fn with_limit(mut self, limit: usize) -> Self {
            self.limit = limit;
            self
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.limit - self.output.len();
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            let n = buf.len().min(room);
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BusySensor;

    impl Sensor for BusySensor {
        fn model(&self) -> SensorModel {
            SensorModel::Ov7670
        }

        fn capture(&mut self, _frame: &mut FrameBuffer) -> Result<(), CaptureError> {
            Err(CaptureError::Busy)
        }
    }

    fn qqvga_camera() -> Camera {
        Camera::new(
            FrameGeometry::new(FrameSize::Qqvga, PixelFormat::Rgb565),
            Box::new(SyntheticSensor::new(SensorModel::Ov7670)),
        )
    }

    fn quick() -> ServerConfig {
        ServerConfig {
            frame_interval: Duration::ZERO,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn malformed_request_writes_nothing() {
        let camera = qqvga_camera();
        let requests: [&[u8]; 3] = [b"GET", b"POST /bmp HTTP/1.1\r\n\r\n", b""];
        for request in requests {
            let mut stream = MockStream::new(request);
            let err = serve_connection(&mut stream, &camera, &quick()).unwrap_err();
            assert!(matches!(err, ServeError::Protocol(_)), "{}", err);
            assert!(stream.output.is_empty());
        }
        assert_eq!(camera.frame().sequence(), 0);
    }

    #[test]
    fn bitmap_response_is_complete() {
        let camera = qqvga_camera();
        let mut stream = MockStream::new(b"GET /bmp HTTP/1.1\r\n\r\n");
        let outcome = serve_connection(&mut stream, &camera, &quick()).unwrap();
        let head = b"HTTP/1.1 200 OK\r\nContent-type: image/bitmap\r\n\r\n";
        assert_eq!(
            outcome,
            ConnectionOutcome::Served {
                route: Route::Bitmap,
                bytes: head.len() + 54 + 160 * 120 * 2,
            }
        );
        assert!(stream.output.starts_with(head));
        assert_eq!(stream.output.len(), head.len() + 54 + 160 * 120 * 2);
        assert_eq!(camera.frame().sequence(), 1);
    }

    #[test]
    fn info_route_does_not_capture() {
        let camera = qqvga_camera();
        let mut stream = MockStream::new(b"GET /index.html HTTP/1.1\r\n\r\n");
        serve_connection(&mut stream, &camera, &quick()).unwrap();
        let text = String::from_utf8(stream.output).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\nContent-type: text/plain\r\n\r\n"));
        assert!(text.contains("RGB565"));
        assert_eq!(camera.frame().sequence(), 0);
    }

    #[test]
    fn capture_failure_serves_previous_frame() {
        let camera = Camera::new(
            FrameGeometry::new(FrameSize::Qqvga, PixelFormat::Grayscale),
            Box::new(BusySensor),
        );
        let mut stream = MockStream::new(b"GET /get HTTP/1.1\r\n\r\n");
        let outcome = serve_connection(&mut stream, &camera, &quick()).unwrap();
        assert!(matches!(outcome, ConnectionOutcome::Served { route: Route::Raw, .. }));
        let head = b"HTTP/1.1 200 OK\r\nContent-type: application/octet-stream\r\n\r\n";
        assert_eq!(stream.output.len(), head.len() + 160 * 120);
    }

    #[test]
    fn stream_ends_on_write_failure_and_restores_auto_capture() {
        let camera = qqvga_camera().with_auto_capture(true);
        let head = 135;
        let part = 30 + 54 + 160 * 120 * 2 + 36;
        let mut stream = MockStream::new(b"GET /stream HTTP/1.1\r\n\r\n").with_limit(200_000);
        let outcome = serve_connection(&mut stream, &camera, &quick()).unwrap();
        assert_eq!(
            outcome,
            ConnectionOutcome::StreamEnded {
                parts: 5,
                bytes: head + 5 * part,
            }
        );
        assert!(camera.auto_capture().is_enabled());
    }

    #[test]
    fn auto_capture_is_suspended_while_serving() {
        let camera = qqvga_camera().with_auto_capture(true);
        let flag_seen = std::cell::Cell::new(false);
        struct Probe<'a> {
            inner: MockStream,
            camera: &'a Camera,
            seen: &'a std::cell::Cell<bool>,
        }
        impl Read for Probe<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.inner.read(buf)
            }
        }
        impl Write for Probe<'_> {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.camera.auto_capture().is_enabled() {
                    self.seen.set(true);
                }
                self.inner.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut probe = Probe {
            inner: MockStream::new(b"GET /get HTTP/1.1\r\n\r\n"),
            camera: &camera,
            seen: &flag_seen,
        };
        serve_connection(&mut probe, &camera, &quick()).unwrap();
        assert!(!flag_seen.get());
        assert!(camera.auto_capture().is_enabled());
    }

    #[test]
    fn accept_failures_do_not_stop_the_server() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let camera = qqvga_camera();
        let shutdown = AtomicBool::new(false);
        let failures = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let accept = || {
                    // Out of descriptors twice, then accept normally.
                    if failures.load(Ordering::SeqCst) < 2 {
                        failures.fetch_add(1, Ordering::SeqCst);
                        return Err(io::Error::from_raw_os_error(24));
                    }
                    listener.accept().map(|(stream, _)| stream)
                };
                run_server(accept, &quick(), &camera, &shutdown);
            });

            let served = (|| -> Result<Vec<u8>> {
                let mut client = TcpStream::connect(addr)?;
                client.set_read_timeout(Some(Duration::from_secs(10)))?;
                client.write_all(b"GET /get HTTP/1.1\r\n\r\n")?;
                let mut response = Vec::new();
                client.read_to_end(&mut response)?;
                Ok(response)
            })();
            shutdown.store(true, Ordering::SeqCst);

            let response = served?;
            let head = b"HTTP/1.1 200 OK\r\nContent-type: application/octet-stream\r\n\r\n";
            assert!(response.starts_with(head));
            assert_eq!(response.len(), head.len() + 160 * 120 * 2);
            assert_eq!(failures.load(Ordering::SeqCst), 2);
            Ok(())
        })
    }
}
