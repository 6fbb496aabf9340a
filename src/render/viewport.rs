//! Visible region of a render surface.
//!
//! A [`Viewport`] restricts drawing on a [`RenderSurface`](crate::render::RenderSurface)
//! to a rectangle given by its top-left corner `(x, y)` and its `width`/`height` in
//! pixels. `(0, 0)` is the top-left of the surface.
//!
//! # Examples
//!
//! ```
//! use canvaskit::render::Viewport;
//!
//! let mut vp = Viewport::new(0, 0, 800, 600);
//! vp.resize(1024, 768);
//! vp.translate(10, 20);
//! assert_eq!(vp.width, 1024);
//! assert_eq!(vp.x, 10);
//! assert_eq!(vp.aspect_ratio(), 1024.0 / 768.0);
//! ```

use crate::render::SurfaceSize;

#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct Viewport {
    /// Horizontal offset in pixels from the origin.
    pub x: i32,

    /// Vertical offset in pixels from the origin.
    pub y: i32,

    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Viewport {{ x: {}, y: {}, width: {}, height: {} }}",
            self.x, self.y, self.width, self.height
        )
    }
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Viewport covering a whole surface of `size`.
    pub fn full(size: SurfaceSize) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Moves the viewport’s origin to `(x, y)` in pixels.
    pub fn translate(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    /// Returns `width / height`, or `0.0` when `height` is `0`.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Width and height as the signed integers the native engine expects.
    pub(crate) fn native_extent(&self) -> Option<(i32, i32)> {
        Some((i32::try_from(self.width).ok()?, i32::try_from(self.height).ok()?))
    }
}
