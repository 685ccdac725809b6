//! The framebuffer and the geometry it was allocated for.
//!
//! - `FrameGeometry`: frame size, pixel format and chroma order, bound together
//!   so every scanline computation uses the same values the buffer was sized by.
//! - `FrameBuffer`: fixed-size byte region refilled in place by each capture.
//!
//! The buffer never grows or shrinks after allocation. Readers borrow it
//! through the `Camera` lock; captures take it exclusively.

use crate::codec::{ChromaOrder, ScanlineCodec};
use crate::sensor::CaptureError;
use crate::{FrameSize, PixelFormat};

/// Frame size and sample layout, fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    pub size: FrameSize,
    pub format: PixelFormat,
    pub chroma: ChromaOrder,
}

impl FrameGeometry {
    pub fn new(size: FrameSize, format: PixelFormat) -> Self {
        Self {
            size,
            format,
            chroma: ChromaOrder::default(),
        }
    }

    pub fn with_chroma_order(mut self, chroma: ChromaOrder) -> Self {
        self.chroma = chroma;
        self
    }

    pub fn width(&self) -> usize {
        self.size.dimensions().0 as usize
    }

    pub fn height(&self) -> usize {
        self.size.dimensions().1 as usize
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.size.dimensions()
    }

    /// Bytes per scanline, `None` for compressed formats.
    pub fn row_bytes(&self) -> Option<usize> {
        self.format
            .bytes_per_pixel()
            .map(|bytes_per_pixel| self.width() * bytes_per_pixel)
    }

    /// Exact byte length of an uncompressed frame.
    pub fn raw_len(&self) -> Option<usize> {
        self.row_bytes().map(|row| row * self.height())
    }

    /// Framebuffer allocation size. Compressed frames get the two-byte budget.
    pub fn capacity(&self) -> usize {
        self.raw_len().unwrap_or(self.width() * self.height() * 2)
    }

    /// Scanline converter for this layout, `None` for JPEG.
    pub fn codec(&self) -> Option<ScanlineCodec> {
        ScanlineCodec::new(self.format, self.chroma).ok()
    }
}

/// The most recently captured frame.
pub struct FrameBuffer {
    geometry: FrameGeometry,
    data: Box<[u8]>,
    len: usize,
    sequence: u64,
}

impl FrameBuffer {
    /// Allocates a zeroed buffer for `geometry`. Uncompressed buffers start
    /// out as a full black frame; compressed buffers start empty.
    pub fn new(geometry: FrameGeometry) -> Self {
        let data = vec![0u8; geometry.capacity()].into_boxed_slice();
        let len = geometry.raw_len().unwrap_or(0);
        Self {
            geometry,
            data,
            len,
            sequence: 0,
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn format(&self) -> PixelFormat {
        self.geometry.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.geometry.dimensions()
    }

    /// Valid bytes of the current frame.
    pub fn total_size(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of completed captures into this buffer.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Row `index` of an uncompressed frame. Row `i` starts at
    /// `i * width * bytes_per_pixel`.
    pub fn scanline(&self, index: usize) -> Option<&[u8]> {
        let row = self.geometry.row_bytes()?;
        if index >= self.geometry.height() {
            return None;
        }
        let start = index * row;
        self.data.get(start..start + row)
    }

    /// Row `index` as packed little-endian 32-bit words.
    pub fn scanline_words(&self, index: usize) -> Option<Vec<u32>> {
        let line = self.scanline(index)?;
        Some(
            line.chunks_exact(4)
                .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        )
    }

    /// Refills the buffer in place.
    ///
    /// `fill` receives the whole allocation and returns the number of bytes
    /// it produced. Uncompressed frames must fill exactly one frame. On error
    /// the previous length is kept; the bytes may be partially overwritten.
    pub fn refill<F>(&mut self, fill: F) -> Result<usize, CaptureError>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, CaptureError>,
    {
        let capacity = self.data.len();
        let used = fill(&mut self.data)?;
        if used > capacity {
            return Err(CaptureError::Overflow {
                len: used,
                capacity,
            });
        }
        if let Some(expected) = self.geometry.raw_len() {
            if used != expected {
                return Err(CaptureError::ShortFrame {
                    len: used,
                    expected,
                });
            }
        }
        self.len = used;
        self.sequence += 1;
        Ok(used)
    }
}
