use crate::backend::negotiation::{WgBinding, WgContext};
use crate::backend::platform::WgSurface;
use crate::backend::BackendKind;
use crate::errors::{KitError, KitResult};
use crate::native::{self, ColorSpace, NativeApi, NativeHandle};
use crate::render::target::RenderTarget;
use crate::render::SurfaceSize;
use log::debug;
use std::rc::Rc;

/// Negotiated-GPU target: a presentation surface created from the shared instance and
/// bound together with the shared device.
///
/// The target stays tied to the negotiation it was first bound against. Once that
/// negotiation is terminated it reports [`KitError::BackendNotReady`] instead of
/// touching the released device.
pub struct WebGpuTarget {
    ctx: Rc<WgContext>,
    descriptor: String,
    surface: Option<WgSurface>,
    bound: Option<WgBinding>,
}

impl WebGpuTarget {
    pub fn new(ctx: Rc<WgContext>, descriptor: &str) -> Self {
        Self {
            ctx,
            descriptor: descriptor.to_string(),
            surface: None,
            bound: None,
        }
    }
}

impl RenderTarget for WebGpuTarget {
    fn kind(&self) -> BackendKind {
        BackendKind::WebGpu
    }

    fn new_canvas(&self, native: &dyn NativeApi) -> NativeHandle {
        native.wg_canvas_new()
    }

    fn bind(&mut self, native: &dyn NativeApi, canvas: NativeHandle, size: SurfaceSize, cs: ColorSpace) -> KitResult<()> {
        let binding = self.ctx.binding().ok_or(KitError::BackendNotReady(BackendKind::WebGpu))?;
        self.ensure_current()?;

        let surface = match self.surface {
            Some(surface) => surface,
            None => {
                let surface = self
                    .ctx
                    .create_surface(binding, &self.descriptor)
                    .ok_or(KitError::ResourceCreation { kind: BackendKind::WebGpu, resource: "presentation surface" })?;
                debug!("presentation surface {surface:?} created for '{}'", self.descriptor);
                self.surface = Some(surface);
                self.bound = Some(binding);
                surface
            }
        };

        let status = native.wg_canvas_target(canvas, binding.device, binding.instance, surface, size.width, size.height, cs);
        native::check("wg_canvas_target", canvas, status)
    }

    fn ensure_current(&self) -> KitResult<()> {
        match self.bound {
            Some(bound) if self.ctx.binding() != Some(bound) => Err(KitError::BackendNotReady(BackendKind::WebGpu)),
            _ => Ok(()),
        }
    }

    fn release(&mut self) {
        self.bound = None;
        if let Some(surface) = self.surface.take() {
            if self.ctx.release_surface(surface) {
                debug!("presentation surface {surface:?} released");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessPlatform;
    use crate::backend::platform::PowerPreference;
    use crate::backend::InitStatus;
    use crate::native::headless::HeadlessEngine;

    fn ready_context(platform: &HeadlessPlatform) -> Rc<WgContext> {
        let ctx = Rc::new(WgContext::new(
            Some(Rc::new(platform.clone())),
            PowerPreference::HighPerformance,
            "dev",
        ));
        while ctx.poll() == InitStatus::Pending {}
        ctx
    }

    #[test]
    fn surface_is_created_once_and_released() {
        let engine = HeadlessEngine::new();
        let platform = HeadlessPlatform::new();
        let mut target = WebGpuTarget::new(ready_context(&platform), "#wg");
        let canvas = target.new_canvas(&engine);

        target.bind(&engine, canvas, SurfaceSize::new(5, 5), ColorSpace::Abgr8888S).unwrap();
        target.bind(&engine, canvas, SurfaceSize::new(6, 6), ColorSpace::Abgr8888S).unwrap();
        assert_eq!(platform.live_surfaces(), 1);

        target.release();
        assert_eq!(platform.live_surfaces(), 0);
        engine.canvas_del(canvas);
    }

    #[test]
    fn terminated_negotiation_invalidates_the_target() {
        let engine = HeadlessEngine::new();
        let platform = HeadlessPlatform::new();
        let ctx = ready_context(&platform);
        let mut target = WebGpuTarget::new(Rc::clone(&ctx), "#wg");
        let canvas = target.new_canvas(&engine);
        target.bind(&engine, canvas, SurfaceSize::new(5, 5), ColorSpace::Abgr8888S).unwrap();
        assert!(target.ensure_current().is_ok());

        ctx.term();
        assert_eq!(platform.live_surfaces(), 0);
        assert!(matches!(target.ensure_current(), Err(KitError::BackendNotReady(BackendKind::WebGpu))));

        // Even after a fresh negotiation the old surface is not reused.
        while ctx.poll() == InitStatus::Pending {}
        let err = target.bind(&engine, canvas, SurfaceSize::new(6, 6), ColorSpace::Abgr8888S).unwrap_err();
        assert!(matches!(err, KitError::BackendNotReady(BackendKind::WebGpu)));

        target.release();
        assert_eq!(platform.live_surfaces(), 0);
        engine.canvas_del(canvas);
    }

    #[test]
    fn binding_requires_a_negotiated_device() {
        let engine = HeadlessEngine::new();
        let platform = HeadlessPlatform::new();
        let ctx = Rc::new(WgContext::new(Some(Rc::new(platform)), PowerPreference::HighPerformance, "dev"));
        let mut target = WebGpuTarget::new(ctx, "#wg");
        let canvas = target.new_canvas(&engine);
        let err = target.bind(&engine, canvas, SurfaceSize::new(5, 5), ColorSpace::Abgr8888S).unwrap_err();
        assert!(matches!(err, KitError::BackendNotReady(BackendKind::WebGpu)));
        engine.canvas_del(canvas);
    }
}
