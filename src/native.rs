//! Native engine function table.
//!
//! The rendering engine itself (path filling, anti-aliasing, font shaping, image and
//! animation decoding) lives on the other side of [`NativeApi`]. The binding layer only
//! forwards opaque [`NativeHandle`]s and primitive arguments and inspects the returned
//! [`NativeStatus`]. Implementations share the table between every wrapper of one
//! [`CanvasKit`](crate::CanvasKit), so all entry points take `&self`.
//!
//! Semantics the binding layer relies on:
//! - a new paint carries a reference count of zero; the binding takes one claim with
//!   [`NativeApi::paint_ref`] per wrapper and gives it back with
//!   [`NativeApi::paint_unref`], which frees the paint once the count reaches zero;
//! - pushing a paint into a canvas or scene takes a native reference, removing it (or
//!   deleting the container) drops that reference;
//! - [`NativeApi::shape_set_gradient`] takes ownership of the gradient passed in;
//! - [`NativeApi::animation_get_picture`] returns a picture owned by the animation.

pub mod headless;

use crate::backend::platform::{GlContextId, WgDevice, WgInstance, WgSurface};
use crate::errors::{KitError, KitResult};
use std::fmt;
use std::ptr::NonNull;

/// Opaque address-sized reference to an object inside the native engine.
///
/// Zero is the universal "no object" sentinel. The value is never dereferenced on the
/// host side and equality is identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(usize);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Status code returned by every native entry point. Zero means success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum NativeStatus {
    Success = 0,
    InvalidArgument = 1,
    InsufficientCondition = 2,
    FailedAllocation = 3,
    MemoryCorruption = 4,
    NotSupported = 5,
    Unknown = 255,
}

impl NativeStatus {
    #[inline]
    pub fn is_success(&self) -> bool {
        *self == NativeStatus::Success
    }

    pub fn code(&self) -> i32 {
        *self as i32
    }
}

impl From<i32> for NativeStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => NativeStatus::Success,
            1 => NativeStatus::InvalidArgument,
            2 => NativeStatus::InsufficientCondition,
            3 => NativeStatus::FailedAllocation,
            4 => NativeStatus::MemoryCorruption,
            5 => NativeStatus::NotSupported,
            _ => NativeStatus::Unknown,
        }
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NativeStatus::Success => "success",
            NativeStatus::InvalidArgument => "invalid argument",
            NativeStatus::InsufficientCondition => "insufficient condition",
            NativeStatus::FailedAllocation => "failed allocation",
            NativeStatus::MemoryCorruption => "memory corruption",
            NativeStatus::NotSupported => "not supported",
            NativeStatus::Unknown => "unknown",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Converts a native status into a typed error carrying the operation and handle.
pub(crate) fn check(op: &'static str, handle: NativeHandle, status: NativeStatus) -> KitResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(KitError::NativeCall { op, handle, status })
    }
}

/// Converts a constructor result into an error when the engine returned null.
pub(crate) fn non_null(op: &'static str, handle: NativeHandle) -> KitResult<NativeHandle> {
    if handle.is_null() {
        Err(KitError::NullHandle { op })
    } else {
        Ok(handle)
    }
}

/// Channel order of 32-bit pixels written by the native rasterizer.
///
/// The `S` variants carry straight (non-premultiplied) alpha.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    /// `A<<24 | B<<16 | G<<8 | R`, premultiplied.
    Abgr8888,
    /// `A<<24 | R<<16 | G<<8 | B`, premultiplied.
    Argb8888,
    /// `A<<24 | B<<16 | G<<8 | R`, straight alpha.
    Abgr8888S,
    /// `A<<24 | R<<16 | G<<8 | B`, straight alpha.
    Argb8888S,
}

impl ColorSpace {
    pub fn is_premultiplied(&self) -> bool {
        matches!(self, ColorSpace::Abgr8888 | ColorSpace::Argb8888)
    }

    /// Splits a native pixel into `[r, g, b, a]` in the channel order of this color space.
    #[inline]
    pub fn unpack(&self, px: u32) -> [u8; 4] {
        let a = (px >> 24) as u8;
        let hi = (px >> 16) as u8;
        let g = (px >> 8) as u8;
        let lo = px as u8;
        match self {
            ColorSpace::Abgr8888 | ColorSpace::Abgr8888S => [lo, g, hi, a],
            ColorSpace::Argb8888 | ColorSpace::Argb8888S => [hi, g, lo, a],
        }
    }

    #[inline]
    pub fn pack(&self, [r, g, b, a]: [u8; 4]) -> u32 {
        let (hi, lo) = match self {
            ColorSpace::Abgr8888 | ColorSpace::Abgr8888S => (b, r),
            ColorSpace::Argb8888 | ColorSpace::Argb8888S => (r, b),
        };
        (a as u32) << 24 | (hi as u32) << 16 | (g as u32) << 8 | lo as u32
    }
}

/// One gradient color stop in the memory layout the native engine reads.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ColorStop {
    pub offset: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl ColorStop {
    pub fn new(offset: f32, r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { offset, r, g, b, a }
    }
}

/// How a gradient continues outside of its defined range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GradientSpread {
    #[default]
    Pad,
    Reflect,
    Repeat,
}

/// Axis-aligned bounding box reported by the native engine.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// CPU pixel buffer handed to a software canvas.
///
/// The buffer stays owned by the binding layer. It must remain valid, and must not be
/// written by the host, until the canvas is re-targeted or deleted.
#[derive(Clone, Copy, Debug)]
pub struct PixelTarget {
    pub ptr: NonNull<u32>,
    /// Number of `u32` pixels addressable from `ptr`.
    pub len: usize,
    /// Pixels per row.
    pub stride: u32,
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
}

/// C-style function table of the native rendering engine.
pub trait NativeApi {
    // ** Engine lifecycle
    fn engine_init(&self) -> NativeStatus;
    fn engine_term(&self) -> NativeStatus;

    // ** Canvases
    fn sw_canvas_new(&self) -> NativeHandle;
    fn gl_canvas_new(&self) -> NativeHandle;
    fn wg_canvas_new(&self) -> NativeHandle;
    fn canvas_del(&self, canvas: NativeHandle) -> NativeStatus;
    fn sw_canvas_target(&self, canvas: NativeHandle, target: PixelTarget) -> NativeStatus;
    #[allow(clippy::too_many_arguments)]
    fn gl_canvas_target(&self, canvas: NativeHandle, context: GlContextId, fbo: i32, w: u32, h: u32, cs: ColorSpace) -> NativeStatus;
    #[allow(clippy::too_many_arguments)]
    fn wg_canvas_target(&self, canvas: NativeHandle, device: WgDevice, instance: WgInstance, surface: WgSurface, w: u32, h: u32, cs: ColorSpace) -> NativeStatus;
    fn canvas_push(&self, canvas: NativeHandle, paint: NativeHandle) -> NativeStatus;
    /// Removes one paint, or every paint when `paint` is `None`.
    fn canvas_remove(&self, canvas: NativeHandle, paint: Option<NativeHandle>) -> NativeStatus;
    fn canvas_update(&self, canvas: NativeHandle) -> NativeStatus;
    fn canvas_draw(&self, canvas: NativeHandle, clear: bool) -> NativeStatus;
    fn canvas_sync(&self, canvas: NativeHandle) -> NativeStatus;
    fn canvas_set_viewport(&self, canvas: NativeHandle, x: i32, y: i32, w: i32, h: i32) -> NativeStatus;

    // ** Paint (shared by shapes, scenes, text and pictures)
    fn paint_ref(&self, paint: NativeHandle) -> NativeStatus;
    fn paint_unref(&self, paint: NativeHandle, free: bool) -> NativeStatus;
    fn paint_get_ref(&self, paint: NativeHandle) -> u16;
    /// Frees a paint nobody holds a reference to.
    fn paint_del(&self, paint: NativeHandle) -> NativeStatus;
    fn paint_translate(&self, paint: NativeHandle, x: f32, y: f32) -> NativeStatus;
    fn paint_rotate(&self, paint: NativeHandle, degree: f32) -> NativeStatus;
    fn paint_scale(&self, paint: NativeHandle, factor: f32) -> NativeStatus;
    fn paint_set_opacity(&self, paint: NativeHandle, opacity: u8) -> NativeStatus;
    fn paint_set_visible(&self, paint: NativeHandle, visible: bool) -> NativeStatus;
    fn paint_get_aabb(&self, paint: NativeHandle, out: &mut Bounds) -> NativeStatus;

    // ** Shapes
    fn shape_new(&self) -> NativeHandle;
    #[allow(clippy::too_many_arguments)]
    fn shape_append_rect(&self, shape: NativeHandle, x: f32, y: f32, w: f32, h: f32, rx: f32, ry: f32) -> NativeStatus;
    fn shape_append_circle(&self, shape: NativeHandle, cx: f32, cy: f32, rx: f32, ry: f32) -> NativeStatus;
    fn shape_reset(&self, shape: NativeHandle) -> NativeStatus;
    fn shape_set_fill_color(&self, shape: NativeHandle, r: u8, g: u8, b: u8, a: u8) -> NativeStatus;
    /// Takes ownership of `gradient`, replacing any previous fill.
    fn shape_set_gradient(&self, shape: NativeHandle, gradient: NativeHandle) -> NativeStatus;
    fn shape_set_stroke_width(&self, shape: NativeHandle, width: f32) -> NativeStatus;
    fn shape_set_stroke_color(&self, shape: NativeHandle, r: u8, g: u8, b: u8, a: u8) -> NativeStatus;

    // ** Scenes
    fn scene_new(&self) -> NativeHandle;
    fn scene_push(&self, scene: NativeHandle, paint: NativeHandle) -> NativeStatus;
    fn scene_remove(&self, scene: NativeHandle, paint: Option<NativeHandle>) -> NativeStatus;

    // ** Gradients
    fn linear_gradient_new(&self) -> NativeHandle;
    fn linear_gradient_set(&self, gradient: NativeHandle, x1: f32, y1: f32, x2: f32, y2: f32) -> NativeStatus;
    fn radial_gradient_new(&self) -> NativeHandle;
    fn radial_gradient_set(&self, gradient: NativeHandle, cx: f32, cy: f32, r: f32) -> NativeStatus;
    /// `stops` is a packed array of [`ColorStop`].
    fn gradient_set_color_stops(&self, gradient: NativeHandle, stops: &[u8]) -> NativeStatus;
    fn gradient_set_spread(&self, gradient: NativeHandle, spread: GradientSpread) -> NativeStatus;
    fn gradient_duplicate(&self, gradient: NativeHandle) -> NativeHandle;
    fn gradient_del(&self, gradient: NativeHandle) -> NativeStatus;

    // ** Text and fonts
    fn text_new(&self) -> NativeHandle;
    fn text_set_font(&self, text: NativeHandle, name: &str) -> NativeStatus;
    fn text_set_size(&self, text: NativeHandle, size: f32) -> NativeStatus;
    fn text_set_text(&self, text: NativeHandle, utf8: &str) -> NativeStatus;
    fn text_set_fill_color(&self, text: NativeHandle, r: u8, g: u8, b: u8) -> NativeStatus;
    fn font_load(&self, name: &str, data: &[u8], format: &str) -> NativeStatus;
    fn font_unload(&self, name: &str) -> NativeStatus;

    // ** Pictures and animations
    fn picture_new(&self) -> NativeHandle;
    fn picture_load(&self, picture: NativeHandle, data: &[u8], format: &str) -> NativeStatus;
    fn picture_get_size(&self, picture: NativeHandle, w: &mut f32, h: &mut f32) -> NativeStatus;
    fn picture_set_size(&self, picture: NativeHandle, w: f32, h: f32) -> NativeStatus;
    fn animation_new(&self) -> NativeHandle;
    /// Returns the picture embedded in `animation`. The animation owns it.
    fn animation_get_picture(&self, animation: NativeHandle) -> NativeHandle;
    fn animation_set_frame(&self, animation: NativeHandle, frame: f32) -> NativeStatus;
    fn animation_get_frame(&self, animation: NativeHandle, out: &mut f32) -> NativeStatus;
    fn animation_get_total_frame(&self, animation: NativeHandle, out: &mut f32) -> NativeStatus;
    fn animation_get_duration(&self, animation: NativeHandle, out: &mut f32) -> NativeStatus;
    fn animation_del(&self, animation: NativeHandle) -> NativeStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_stop_packs_into_eight_bytes() {
        let stops = [ColorStop::new(0.0, 255, 0, 0, 255), ColorStop::new(1.0, 0, 0, 255, 128)];
        let bytes: &[u8] = bytemuck::cast_slice(&stops);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[4..8], &[255, 0, 0, 255]);
        assert_eq!(&bytes[12..16], &[0, 0, 255, 128]);
        assert_eq!(f32::from_ne_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 1.0);
    }

    #[test]
    fn abgr_and_argb_disagree_on_channel_positions() {
        let red = [255, 0, 0, 255];
        assert_eq!(ColorSpace::Abgr8888S.pack(red), 0xff0000ff);
        assert_eq!(ColorSpace::Argb8888S.pack(red), 0xffff0000);
        assert_eq!(ColorSpace::Abgr8888S.unpack(0xff0000ff), red);
        assert_eq!(ColorSpace::Argb8888.unpack(0xffff0000), red);
    }

    #[test]
    fn status_codes_round_trip_through_integers() {
        assert_eq!(NativeStatus::from(0), NativeStatus::Success);
        assert_eq!(NativeStatus::from(3), NativeStatus::FailedAllocation);
        assert_eq!(NativeStatus::from(42), NativeStatus::Unknown);
        assert_eq!(NativeStatus::NotSupported.code(), 5);
    }

    #[test]
    fn check_maps_failures_to_native_call_errors() {
        assert!(check("canvas_draw", NativeHandle::from_raw(7), NativeStatus::Success).is_ok());
        match check("canvas_draw", NativeHandle::from_raw(7), NativeStatus::InsufficientCondition) {
            Err(KitError::NativeCall { op, handle, status }) => {
                assert_eq!(op, "canvas_draw");
                assert_eq!(handle.as_raw(), 7);
                assert_eq!(status, NativeStatus::InsufficientCondition);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(non_null("shape_new", NativeHandle::NULL), Err(KitError::NullHandle { .. })));
    }
}
