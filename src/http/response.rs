//! Response framing.
//!
//! Every response is `HTTP/1.1 200 OK`, one `Content-type` line and a body
//! delimited by connection close. `Body::select` is the single table that
//! maps a route and the active pixel format to a body; single-shot
//! responses and stream parts both go through it.
//!
//! Bitmap rows are emitted top-to-bottom as stored, with a positive height
//! in the header.

use std::io::{self, Write};

use super::request::Route;
use crate::codec::{rgb565_to_wire, CodecError};
use crate::frame::{FrameBuffer, FrameGeometry};
use crate::PixelFormat;

pub const HTTP_OK: &[u8] = b"HTTP/1.1 200 OK\r\n";

/// Multipart boundary token, reused verbatim at every boundary.
pub const STREAM_BOUNDARY: &str = "123456789000000000000987654321";

/// Size of the informational text buffer, terminator included.
pub const MIME_INFO_CAPACITY: usize = 120;

pub const BMP_HEADER_LEN: usize = 54;

const BMP_INFO_HEADER_LEN: u32 = 40;
const BMP_BITS_PER_PIXEL: u16 = 16;
/// 72 dpi.
const BMP_PIXELS_PER_METER: i32 = 2835;

/// What a response (or stream part) carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Body {
    /// BMP header followed by RGB565 rows.
    Bitmap,
    /// RGB565 rows without a header.
    Rgb565Rows,
    /// PGM header followed by the grayscale framebuffer.
    Graymap,
    /// PGM header followed by the luma samples of a YUV422 frame.
    LumaGraymap,
    /// The framebuffer bytes as captured.
    NativeBytes,
    /// The compressed framebuffer, verbatim.
    Jpeg,
    /// Short text naming the active format.
    Info,
}

impl Body {
    pub fn select(route: Route, format: PixelFormat) -> Body {
        match (route, format) {
            (Route::Info, _) => Body::Info,
            (_, PixelFormat::Jpeg) => Body::Jpeg,
            (Route::Stream | Route::Bitmap, _) => Body::Bitmap,
            (Route::Graymap, PixelFormat::Grayscale) => Body::Graymap,
            (Route::Graymap, PixelFormat::Yuv422) => Body::LumaGraymap,
            (Route::Graymap, _) => Body::Info,
            (Route::Raw, PixelFormat::Grayscale) => Body::NativeBytes,
            (Route::Raw, _) => Body::Rgb565Rows,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Body::Bitmap => "image/bitmap",
            Body::Rgb565Rows | Body::NativeBytes => "application/octet-stream",
            Body::Graymap | Body::LumaGraymap => "image/x-portable-graymap",
            Body::Jpeg => "image/jpg",
            Body::Info => "text/plain",
        }
    }

    /// Whether the body is taken from the framebuffer.
    pub fn reads_frame(self) -> bool {
        self != Body::Info
    }
}

/// 54-byte Windows bitmap header for a 16 bpp image.
///
/// Compression is `BI_RGB` with no bit masks, which generic viewers decode as
/// X1R5G5B5; the header assumes the camera's own viewers, which read RGB565.
pub fn bmp_header(width: u32, height: u32) -> [u8; BMP_HEADER_LEN] {
    let image_size = width * height * u32::from(BMP_BITS_PER_PIXEL / 8);
    let file_size = BMP_HEADER_LEN as u32 + image_size;

    let mut header = [0u8; BMP_HEADER_LEN];
    header[0..2].copy_from_slice(b"BM");
    header[2..6].copy_from_slice(&file_size.to_le_bytes());
    // 6..10 reserved
    header[10..14].copy_from_slice(&(BMP_HEADER_LEN as u32).to_le_bytes());
    header[14..18].copy_from_slice(&BMP_INFO_HEADER_LEN.to_le_bytes());
    header[18..22].copy_from_slice(&(width as i32).to_le_bytes());
    header[22..26].copy_from_slice(&(height as i32).to_le_bytes());
    header[26..28].copy_from_slice(&1u16.to_le_bytes());
    header[28..30].copy_from_slice(&BMP_BITS_PER_PIXEL.to_le_bytes());
    // 30..34 compression: none
    header[34..38].copy_from_slice(&image_size.to_le_bytes());
    header[38..42].copy_from_slice(&BMP_PIXELS_PER_METER.to_le_bytes());
    header[42..46].copy_from_slice(&BMP_PIXELS_PER_METER.to_le_bytes());
    // 46..54 palette counts: none
    header
}

pub fn pgm_header(width: u32, height: u32) -> String {
    format!("P5 {} {} {}\n", width, height, 255)
}

/// Informational text for unknown paths, always shorter than
/// `MIME_INFO_CAPACITY`.
pub fn describe_format(geometry: &FrameGeometry) -> String {
    let (width, height) = geometry.dimensions();
    let mime = match geometry.format {
        PixelFormat::Jpeg => "image/jpg",
        PixelFormat::Grayscale => "image/x-portable-graymap",
        _ => "image/bitmap",
    };
    let mut text = format!(
        "{} {}x{} ({}); paths: /bmp /pgm /get /stream\n",
        geometry.format, width, height, mime
    );
    text.truncate(MIME_INFO_CAPACITY - 1);
    text
}

/// Status line and content type.
pub fn write_head<W: Write>(out: &mut W, content_type: &str) -> io::Result<usize> {
    let header = format!("Content-type: {}\r\n\r\n", content_type);
    out.write_all(HTTP_OK)?;
    out.write_all(header.as_bytes())?;
    Ok(HTTP_OK.len() + header.len())
}

/// Status line, multipart content type and the opening boundary.
pub fn write_stream_head<W: Write>(out: &mut W) -> io::Result<usize> {
    let header = format!(
        "Content-type: multipart/x-mixed-replace; boundary={}\r\n\r\n--{}\r\n",
        STREAM_BOUNDARY, STREAM_BOUNDARY
    );
    out.write_all(HTTP_OK)?;
    out.write_all(header.as_bytes())?;
    Ok(HTTP_OK.len() + header.len())
}

/// One multipart part followed by the next boundary.
pub fn write_part<W: Write>(out: &mut W, body: Body, frame: &FrameBuffer) -> io::Result<usize> {
    let part_header = format!("Content-type: {}\r\n\r\n", body.content_type());
    let boundary = format!("\r\n--{}\r\n", STREAM_BOUNDARY);
    out.write_all(part_header.as_bytes())?;
    let written = write_body(out, body, frame)?;
    out.write_all(boundary.as_bytes())?;
    Ok(part_header.len() + written + boundary.len())
}

/// Writes `body` for the frame currently in `frame`.
pub fn write_body<W: Write>(out: &mut W, body: Body, frame: &FrameBuffer) -> io::Result<usize> {
    let geometry = frame.geometry();
    let (width, height) = geometry.dimensions();
    match body {
        Body::Bitmap => {
            let header = bmp_header(width, height);
            out.write_all(&header)?;
            Ok(header.len() + write_rgb565_rows(out, frame)?)
        }
        Body::Rgb565Rows => write_rgb565_rows(out, frame),
        Body::Graymap => {
            let header = pgm_header(width, height);
            out.write_all(header.as_bytes())?;
            out.write_all(frame.as_bytes())?;
            Ok(header.len() + frame.total_size())
        }
        Body::LumaGraymap => {
            let header = pgm_header(width, height);
            out.write_all(header.as_bytes())?;
            Ok(header.len() + write_luma_rows(out, frame)?)
        }
        Body::NativeBytes | Body::Jpeg => {
            out.write_all(frame.as_bytes())?;
            Ok(frame.total_size())
        }
        Body::Info => {
            let text = describe_format(&geometry);
            out.write_all(text.as_bytes())?;
            Ok(text.len())
        }
    }
}

fn write_rgb565_rows<W: Write>(out: &mut W, frame: &FrameBuffer) -> io::Result<usize> {
    let geometry = frame.geometry();
    let codec = geometry.codec().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            CodecError::Unsupported(geometry.format),
        )
    })?;
    let width = geometry.width();
    let mut pixels = Vec::with_capacity(width);
    let mut line = Vec::with_capacity(width * 2);
    let mut written = 0;
    for row in 0..geometry.height() {
        let words = frame.scanline_words(row).ok_or_else(|| missing_row(row))?;
        codec
            .convert_into(&words, width, &mut pixels)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.clear();
        rgb565_to_wire(&pixels, &mut line);
        out.write_all(&line)?;
        written += line.len();
    }
    Ok(written)
}

/// Luma is every other byte of a YUV422 row in either chroma order.
fn write_luma_rows<W: Write>(out: &mut W, frame: &FrameBuffer) -> io::Result<usize> {
    let geometry = frame.geometry();
    let mut luma = Vec::with_capacity(geometry.width());
    let mut written = 0;
    for row in 0..geometry.height() {
        let line = frame.scanline(row).ok_or_else(|| missing_row(row))?;
        luma.clear();
        luma.extend(line.iter().step_by(2));
        out.write_all(&luma)?;
        written += luma.len();
    }
    Ok(written)
}

fn missing_row(row: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("framebuffer has no scanline {}", row),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ChromaOrder;
    use crate::FrameSize;

    #[test]
    fn bmp_header_for_qqvga() {
        let header = bmp_header(160, 120);
        assert_eq!(header.len(), 54);
        assert_eq!(&header[0..2], b"BM");
        assert_eq!(
            u32::from_le_bytes(header[2..6].try_into().unwrap()),
            54 + 160 * 120 * 2
        );
        assert_eq!(u32::from_le_bytes(header[10..14].try_into().unwrap()), 54);
        assert_eq!(u32::from_le_bytes(header[14..18].try_into().unwrap()), 40);
        assert_eq!(i32::from_le_bytes(header[18..22].try_into().unwrap()), 160);
        assert_eq!(i32::from_le_bytes(header[22..26].try_into().unwrap()), 120);
        assert_eq!(u16::from_le_bytes(header[26..28].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(header[28..30].try_into().unwrap()), 16);
        assert_eq!(u32::from_le_bytes(header[30..34].try_into().unwrap()), 0);
        assert_eq!(
            u32::from_le_bytes(header[34..38].try_into().unwrap()),
            160 * 120 * 2
        );
    }

    #[test]
    fn pgm_header_text() {
        assert_eq!(pgm_header(160, 120), "P5 160 120 255\n");
    }

    #[test]
    fn info_text_fits_buffer_for_every_format() {
        for format in PixelFormat::ALL {
            for size in FrameSize::ALL {
                let geometry = FrameGeometry::new(size, format);
                let text = describe_format(&geometry);
                assert!(text.len() < MIME_INFO_CAPACITY, "{}", text);
                assert!(text.contains(format.name()));
            }
        }
    }

    #[test]
    fn boundary_token_matches_existing_viewers() {
        assert_eq!(STREAM_BOUNDARY.len(), 30);
        assert!(STREAM_BOUNDARY.bytes().all(|b| b.is_ascii_digit()));
        // Delimiter written between parts.
        assert_eq!(format!("\r\n--{}\r\n", STREAM_BOUNDARY).len(), 36);
    }

    #[test]
    fn selection_table() {
        use Body::*;
        use PixelFormat::*;
        let cases = [
            (Route::Bitmap, Rgb565, Bitmap),
            (Route::Bitmap, Yuv422, Bitmap),
            (Route::Bitmap, Grayscale, Bitmap),
            (Route::Bitmap, PixelFormat::Jpeg, Body::Jpeg),
            (Route::Stream, Rgb444, Bitmap),
            (Route::Stream, PixelFormat::Jpeg, Body::Jpeg),
            (Route::Graymap, Grayscale, Graymap),
            (Route::Graymap, Yuv422, LumaGraymap),
            (Route::Graymap, Rgb565, Info),
            (Route::Raw, Rgb565, Rgb565Rows),
            (Route::Raw, Grayscale, NativeBytes),
            (Route::Raw, PixelFormat::Jpeg, Body::Jpeg),
            (Route::Info, PixelFormat::Jpeg, Info),
        ];
        for (route, format, body) in cases {
            assert_eq!(Body::select(route, format), body, "{} {}", route, format);
        }
    }

    #[test]
    fn luma_graymap_takes_every_other_byte() {
        let geometry = FrameGeometry::new(FrameSize::Qqvga, PixelFormat::Yuv422)
            .with_chroma_order(ChromaOrder::Uv);
        let mut frame = FrameBuffer::new(geometry);
        frame
            .refill(|buf| {
                for pair in buf.chunks_exact_mut(2) {
                    pair.copy_from_slice(&[200, 128]);
                }
                Ok(buf.len())
            })
            .unwrap();
        let mut out = Vec::new();
        let written = write_body(&mut out, Body::LumaGraymap, &frame).unwrap();
        let header = pgm_header(160, 120);
        assert_eq!(written, out.len());
        assert_eq!(out.len(), header.len() + 160 * 120);
        assert!(out[header.len()..].iter().all(|&b| b == 200));
    }

    #[test]
    fn bitmap_body_is_header_plus_rows() {
        let frame = FrameBuffer::new(FrameGeometry::new(FrameSize::Qqvga, PixelFormat::Rgb565));
        let mut out = Vec::new();
        let written = write_body(&mut out, Body::Bitmap, &frame).unwrap();
        assert_eq!(written, 54 + 160 * 120 * 2);
        assert_eq!(out.len(), written);
    }

    #[test]
    fn part_ends_with_boundary() {
        let frame = FrameBuffer::new(FrameGeometry::new(FrameSize::Qqvga, PixelFormat::Grayscale));
        let mut out = Vec::new();
        write_part(&mut out, Body::Bitmap, &frame).unwrap();
        assert!(out.starts_with(b"Content-type: image/bitmap\r\n\r\nBM"));
        let tail = format!("\r\n--{}\r\n", STREAM_BOUNDARY);
        assert!(out.ends_with(tail.as_bytes()));
    }
}
