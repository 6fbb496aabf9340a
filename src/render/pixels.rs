//! Channel mapping between the native pixel buffer and host layouts.
//!
//! The native rasterizer and the host rarely agree on channel order or on whether
//! alpha is premultiplied, so every conversion goes through explicit straight RGBA.

use crate::native::ColorSpace;
use crate::render::HostPixelLayout;

#[inline]
fn premultiply(c: u8, a: u8) -> u8 {
    ((c as u16 * a as u16 + 127) / 255) as u8
}

#[inline]
fn unpremultiply(c: u8, a: u8) -> u8 {
    if a == 0 {
        0
    } else {
        ((c as u16 * 255 + a as u16 / 2) / a as u16).min(255) as u8
    }
}

/// Native pixel to straight `[r, g, b, a]`.
#[inline]
pub fn native_to_straight(px: u32, cs: ColorSpace) -> [u8; 4] {
    let [r, g, b, a] = cs.unpack(px);
    if cs.is_premultiplied() {
        [unpremultiply(r, a), unpremultiply(g, a), unpremultiply(b, a), a]
    } else {
        [r, g, b, a]
    }
}

/// Straight `[r, g, b, a]` to the four bytes of `layout`.
#[inline]
pub fn straight_to_host([r, g, b, a]: [u8; 4], layout: HostPixelLayout) -> [u8; 4] {
    match layout {
        HostPixelLayout::Rgba8 => [r, g, b, a],
        HostPixelLayout::Bgra8 => [b, g, r, a],
        HostPixelLayout::PreMulArgb32 => {
            let v = (a as u32) << 24
                | (premultiply(r, a) as u32) << 16
                | (premultiply(g, a) as u32) << 8
                | premultiply(b, a) as u32;
            v.to_ne_bytes()
        }
    }
}

/// Host bytes back to straight `[r, g, b, a]`.
#[inline]
pub fn to_straight_rgba(px: [u8; 4], layout: HostPixelLayout) -> [u8; 4] {
    match layout {
        HostPixelLayout::Rgba8 => px,
        HostPixelLayout::Bgra8 => [px[2], px[1], px[0], px[3]],
        HostPixelLayout::PreMulArgb32 => {
            let v = u32::from_ne_bytes(px);
            let a = (v >> 24) as u8;
            [
                unpremultiply((v >> 16) as u8, a),
                unpremultiply((v >> 8) as u8, a),
                unpremultiply(v as u8, a),
                a,
            ]
        }
    }
}

/// Converts `height` rows of `width` native pixels (row pitch `stride` pixels) into a
/// tightly packed host frame.
pub fn convert(src: &[u32], width: u32, height: u32, stride: u32, cs: ColorSpace, layout: HostPixelLayout) -> Vec<u8> {
    let (width, stride) = (width as usize, stride as usize);
    let mut out = Vec::with_capacity(width * height as usize * 4);
    for row in src.chunks(stride.max(1)).take(height as usize) {
        for &px in row.iter().take(width) {
            out.extend_from_slice(&straight_to_host(native_to_straight(px, cs), layout));
        }
    }
    out
}
