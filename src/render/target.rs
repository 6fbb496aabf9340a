//! Backend-specific target binding.
//!
//! A [`RenderTarget`] owns the backend resource a native canvas draws into (a CPU pixel
//! buffer, a graphics context or a negotiated presentation surface) and knows how to
//! attach it to the canvas at a given size.

pub mod gl;
pub mod software;
pub mod webgpu;

use crate::backend::{BackendKind, BackendSession};
use crate::engine::KitShared;
use crate::errors::{KitError, KitResult};
use crate::native::{ColorSpace, NativeApi, NativeHandle};
use crate::render::SurfaceSize;
use std::rc::Rc;

pub trait RenderTarget {
    fn kind(&self) -> BackendKind;

    /// Creates the native canvas matching this target's backend.
    fn new_canvas(&self, native: &dyn NativeApi) -> NativeHandle;

    /// Binds (or re-binds at a new size) the backend resource to `canvas`.
    ///
    /// On failure the previous binding, if any, stays in place.
    fn bind(&mut self, native: &dyn NativeApi, canvas: NativeHandle, size: SurfaceSize, cs: ColorSpace) -> KitResult<()>;

    /// Fails when the backend resource was invalidated behind this target's back.
    fn ensure_current(&self) -> KitResult<()> {
        Ok(())
    }

    /// Releases the backend resource. Idempotent.
    fn release(&mut self);

    /// Raw native pixels, software targets only.
    fn pixels(&self) -> Option<&[u32]> {
        None
    }

    /// Address of the current pixel buffer, software targets only.
    fn buffer_identity(&self) -> Option<usize> {
        None
    }
}

/// Builds the target for a ready `session`. `descriptor` identifies the on-screen
/// element the GPU backends bind to.
pub(crate) fn for_session(kit: &KitShared, session: &BackendSession, descriptor: &str) -> KitResult<Box<dyn RenderTarget>> {
    match session.kind() {
        BackendKind::Software => Ok(Box::new(software::SoftwareTarget::new())),
        BackendKind::Gl => {
            let platform = kit.gl.as_ref().ok_or(KitError::Unsupported(BackendKind::Gl))?;
            Ok(Box::new(gl::GlTarget::new(
                Rc::clone(platform),
                descriptor,
                kit.config.gl_attributes,
            )))
        }
        BackendKind::WebGpu => {
            let ctx = session
                .wg_context()
                .filter(|ctx| ctx.platform().is_some())
                .ok_or(KitError::Unsupported(BackendKind::WebGpu))?;
            Ok(Box::new(webgpu::WebGpuTarget::new(Rc::clone(ctx), descriptor)))
        }
    }
}
