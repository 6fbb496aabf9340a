//! Render surfaces and the frames they hand to the host.

pub mod pixels;
pub mod surface;
pub mod target;
mod viewport;

pub use surface::RenderSurface;
pub use target::software::live_pixel_buffers;
pub use viewport::Viewport;

use crate::errors::{KitError, KitResult};
use serde::{Deserialize, Serialize};

/// Size of a surface in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels, or `None` on overflow.
    pub fn area(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }
}

/// Byte layout of frames handed to the host after a software present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostPixelLayout {
    /// `[r, g, b, a]` bytes, straight alpha.
    #[default]
    Rgba8,
    /// `[b, g, r, a]` bytes, straight alpha.
    Bgra8,
    /// Native-endian `u32` of `A<<24 | R<<16 | G<<8 | B`, premultiplied.
    PreMulArgb32,
}

/// CPU frame in a host layout.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    pub format: HostPixelLayout,
}

impl RgbaImage {
    pub fn from_raw(pixels: Vec<u8>, width: u32, height: u32, stride: u32, format: HostPixelLayout) -> KitResult<Self> {
        let needed = (height as usize).checked_mul(stride as usize);
        if stride < width.saturating_mul(4) || needed.map_or(true, |n| pixels.len() < n) {
            return Err(KitError::InvalidDimensions { width, height });
        }
        Ok(Self { pixels, width, height, stride, format })
    }

    /// Pixel at `(x, y)` as straight `[r, g, b, a]`.
    pub fn rgba_at(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = y as usize * self.stride as usize + x as usize * 4;
        let px: [u8; 4] = self.pixels.get(at..at + 4)?.try_into().ok()?;
        Some(pixels::to_straight_rgba(px, self.format))
    }

    /// Tightly packed straight RGBA bytes.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                out.extend_from_slice(&self.rgba_at(x, y).unwrap_or_default());
            }
        }
        out
    }

    /// Encodes the frame as an 8-bit RGBA PNG.
    pub fn to_png(&self) -> KitResult<Vec<u8>> {
        let mut data = Vec::new();
        let mut encoder = png::Encoder::new(&mut data, self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&self.to_rgba8())?;
        writer.finish()?;
        Ok(data)
    }
}

impl std::fmt::Debug for RgbaImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbaImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("len", &self.pixels.len())
            .finish()
    }
}

/// Receives every frame a software surface presents.
pub trait PresentSink {
    fn submit_frame(&mut self, frame_id: u64, frame: &RgbaImage);
}
