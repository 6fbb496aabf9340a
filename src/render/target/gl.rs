use crate::backend::platform::{GlContextAttributes, GlContextId, GlPlatform};
use crate::backend::BackendKind;
use crate::errors::{KitError, KitResult};
use crate::native::{self, ColorSpace, NativeApi, NativeHandle};
use crate::render::target::RenderTarget;
use crate::render::SurfaceSize;
use log::debug;
use std::rc::Rc;

/// Default framebuffer of the context.
const DEFAULT_FBO: i32 = 0;

/// Immediate-GPU target: one graphics context bound to an on-screen element.
///
/// The context is created on the first bind and reused when the canvas is re-targeted
/// at a new size.
pub struct GlTarget {
    platform: Rc<dyn GlPlatform>,
    descriptor: String,
    attributes: GlContextAttributes,
    context: Option<GlContextId>,
}

impl GlTarget {
    pub fn new(platform: Rc<dyn GlPlatform>, descriptor: &str, attributes: GlContextAttributes) -> Self {
        Self {
            platform,
            descriptor: descriptor.to_string(),
            attributes,
            context: None,
        }
    }

    fn context(&mut self) -> KitResult<GlContextId> {
        if let Some(ctx) = self.context {
            return Ok(ctx);
        }
        let ctx = self
            .platform
            .create_context(&self.descriptor, &self.attributes)
            .ok_or(KitError::ResourceCreation { kind: BackendKind::Gl, resource: "graphics context" })?;
        debug!("gl context {ctx:?} created for '{}'", self.descriptor);
        self.context = Some(ctx);
        Ok(ctx)
    }
}

impl RenderTarget for GlTarget {
    fn kind(&self) -> BackendKind {
        BackendKind::Gl
    }

    fn new_canvas(&self, native: &dyn NativeApi) -> NativeHandle {
        native.gl_canvas_new()
    }

    fn bind(&mut self, native: &dyn NativeApi, canvas: NativeHandle, size: SurfaceSize, cs: ColorSpace) -> KitResult<()> {
        let ctx = self.context()?;
        if !self.platform.make_current(ctx) {
            return Err(KitError::ResourceCreation { kind: BackendKind::Gl, resource: "current context" });
        }
        let status = native.gl_canvas_target(canvas, ctx, DEFAULT_FBO, size.width, size.height, cs);
        native::check("gl_canvas_target", canvas, status)
    }

    fn release(&mut self) {
        if let Some(ctx) = self.context.take() {
            self.platform.destroy_context(ctx);
            debug!("gl context {ctx:?} destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessPlatform;
    use crate::native::headless::HeadlessEngine;

    #[test]
    fn context_is_reused_across_rebinds_and_destroyed_once() {
        let engine = HeadlessEngine::new();
        let platform = HeadlessPlatform::new();
        let mut target = GlTarget::new(Rc::new(platform.clone()), "#gl", GlContextAttributes::default());
        let canvas = target.new_canvas(&engine);

        target.bind(&engine, canvas, SurfaceSize::new(10, 10), ColorSpace::Abgr8888S).unwrap();
        target.bind(&engine, canvas, SurfaceSize::new(20, 10), ColorSpace::Abgr8888S).unwrap();
        assert_eq!(platform.live_contexts(), 1);
        assert!(platform.current_context().is_some());
        assert_eq!(engine.canvas_target_size(canvas), Some((20, 10)));
        assert_eq!(platform.last_gl_attributes(), Some(GlContextAttributes::default()));

        target.release();
        target.release();
        assert_eq!(platform.live_contexts(), 0);
        engine.canvas_del(canvas);
    }

    #[test]
    fn context_creation_failure_is_typed() {
        let engine = HeadlessEngine::new();
        let platform = HeadlessPlatform::new();
        platform.fail_context_creation(true);
        let mut target = GlTarget::new(Rc::new(platform), "#gl", GlContextAttributes::default());
        let canvas = target.new_canvas(&engine);
        let err = target.bind(&engine, canvas, SurfaceSize::new(1, 1), ColorSpace::Abgr8888S).unwrap_err();
        assert!(matches!(err, KitError::ResourceCreation { resource: "graphics context", .. }));
        engine.canvas_del(canvas);
    }
}
