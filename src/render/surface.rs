//! Render surface adapter.
//!
//! A [`RenderSurface`] pairs one native canvas with one backend target. It makes the
//! three backends interchangeable: the caller adds paints, presents, resizes and
//! destroys without caring which kind of target is bound underneath.
//!
//! Presenting always runs update, draw and sync on the native canvas in that order. For
//! the software backend the rasterized buffer is then converted to the configured
//! [`HostPixelLayout`](crate::render::HostPixelLayout), kept as
//! [`RenderSurface::last_frame`] and handed to the [`PresentSink`], if one is set.

use crate::backend::{BackendKind, BackendSession};
use crate::engine::KitShared;
use crate::errors::{KitError, KitResult};
use crate::lifetime::HandleCell;
use crate::native::{self, NativeHandle};
use crate::paint::Paint;
use crate::render::target::{self, RenderTarget};
use crate::render::{pixels, PresentSink, RgbaImage, SurfaceSize, Viewport};
use log::{debug, error, info};
use std::rc::Rc;

pub struct RenderSurface {
    kit: Rc<KitShared>,
    kind: BackendKind,
    canvas: NativeHandle,
    target: Box<dyn RenderTarget>,
    size: SurfaceSize,
    viewport: Viewport,
    /// Cells of every paint pushed into the canvas, kept alive while the canvas holds them.
    retained: Vec<Rc<HandleCell>>,
    sink: Option<Box<dyn PresentSink>>,
    last_frame: Option<RgbaImage>,
    frame_id: u64,
    destroyed: bool,
}

impl RenderSurface {
    pub(crate) fn create(
        kit: &Rc<KitShared>,
        session: &BackendSession,
        descriptor: &str,
        width: u32,
        height: u32,
    ) -> KitResult<Self> {
        validate_size(kit, width, height)?;
        session.require_ready()?;

        let kind = session.kind();
        let native = kit.native.as_ref();
        let mut target = target::for_session(kit, session, descriptor)?;

        let canvas = target.new_canvas(native);
        if canvas.is_null() {
            target.release();
            return Err(KitError::ResourceCreation { kind, resource: "native canvas" });
        }

        let size = SurfaceSize::new(width, height);
        if let Err(e) = target.bind(native, canvas, size, kit.config.color_space) {
            target.release();
            let status = native.canvas_del(canvas);
            if !status.is_success() {
                error!("canvas_del after failed {kind} bind returned {status}");
            }
            return Err(e);
        }

        info!("created {kind} surface {width}x{height} for '{descriptor}'");
        Ok(Self {
            kit: Rc::clone(kit),
            kind,
            canvas,
            target,
            size,
            viewport: Viewport::full(size),
            retained: Vec::new(),
            sink: None,
            last_frame: None,
            frame_id: 0,
            destroyed: false,
        })
    }

    fn live_canvas(&self) -> KitResult<NativeHandle> {
        if self.destroyed {
            Err(KitError::SurfaceDestroyed)
        } else {
            Ok(self.canvas)
        }
    }

    /// Pushes `paint` into the canvas. The surface keeps the wrapper's cell alive until
    /// it is removed or the surface is cleared.
    pub fn add(&mut self, paint: &dyn Paint) -> KitResult<()> {
        let canvas = self.live_canvas()?;
        let handle = paint.handle()?;
        native::check("canvas_push", canvas, self.kit.native.canvas_push(canvas, handle))?;
        self.retained.push(Rc::clone(paint.cell()));
        Ok(())
    }

    pub fn add_all(&mut self, paints: &[&dyn Paint]) -> KitResult<()> {
        paints.iter().try_for_each(|p| self.add(*p))
    }

    /// Removes one paint, or every paint when `paint` is `None`.
    pub fn remove(&mut self, paint: Option<&dyn Paint>) -> KitResult<()> {
        let Some(paint) = paint else {
            return self.clear();
        };
        let canvas = self.live_canvas()?;
        let id = paint.cell().id();
        let handle = match self.retained.iter().position(|c| c.id() == id) {
            // The canvas still holds a native reference, so the handle is valid even if
            // the wrapper was disposed.
            Some(_) => paint.cell().raw_handle(),
            None => paint.handle()?,
        };
        native::check("canvas_remove", canvas, self.kit.native.canvas_remove(canvas, Some(handle)))?;
        if let Some(idx) = self.retained.iter().position(|c| c.id() == id) {
            self.retained.remove(idx);
        }
        Ok(())
    }

    /// Removes every paint from the canvas.
    pub fn clear(&mut self) -> KitResult<()> {
        let canvas = self.live_canvas()?;
        native::check("canvas_remove", canvas, self.kit.native.canvas_remove(canvas, None))?;
        self.retained.clear();
        Ok(())
    }

    /// Number of paints currently pushed.
    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    /// Renders one frame.
    pub fn present(&mut self) -> KitResult<()> {
        let canvas = self.live_canvas()?;
        self.target.ensure_current()?;
        let native = self.kit.native.as_ref();
        native::check("canvas_update", canvas, native.canvas_update(canvas))?;
        native::check("canvas_draw", canvas, native.canvas_draw(canvas, true))?;
        native::check("canvas_sync", canvas, native.canvas_sync(canvas))?;
        self.frame_id += 1;

        if self.kind == BackendKind::Software {
            let Some(src) = self.target.pixels() else {
                return Err(KitError::ResourceCreation { kind: self.kind, resource: "pixel buffer" });
            };
            let layout = self.kit.config.host_layout;
            let SurfaceSize { width, height } = self.size;
            let bytes = pixels::convert(src, width, height, width, self.kit.config.color_space, layout);
            let frame = RgbaImage::from_raw(bytes, width, height, width * 4, layout)?;
            if let Some(sink) = self.sink.as_mut() {
                sink.submit_frame(self.frame_id, &frame);
            }
            self.last_frame = Some(frame);
        }
        debug!("presented frame {} on {} surface", self.frame_id, self.kind);
        Ok(())
    }

    /// Re-binds the target at a new size. Same size is a no-op.
    pub fn resize(&mut self, width: u32, height: u32) -> KitResult<()> {
        let canvas = self.live_canvas()?;
        self.target.ensure_current()?;
        if self.size == SurfaceSize::new(width, height) {
            return Ok(());
        }
        validate_size(&self.kit, width, height)?;

        let native = self.kit.native.as_ref();
        native::check("canvas_sync", canvas, native.canvas_sync(canvas))?;
        let size = SurfaceSize::new(width, height);
        self.target.bind(native, canvas, size, self.kit.config.color_space)?;
        debug!("{} surface resized {}x{} -> {width}x{height}", self.kind, self.size.width, self.size.height);
        self.size = size;
        Ok(())
    }

    /// Clears the canvas, releases the backend target and deletes the canvas.
    ///
    /// Idempotent: the second call does nothing. Every step runs even if an earlier
    /// one failed; the first error is returned.
    pub fn destroy(&mut self) -> KitResult<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        let native = self.kit.native.as_ref();
        let cleared = native::check("canvas_remove", self.canvas, native.canvas_remove(self.canvas, None));
        self.retained.clear();
        self.target.release();
        let deleted = native::check("canvas_del", self.canvas, native.canvas_del(self.canvas));
        self.last_frame = None;

        info!("destroyed {} surface {}x{}", self.kind, self.size.width, self.size.height);
        cleared.and(deleted)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Limits drawing to `viewport`.
    pub fn set_viewport(&mut self, viewport: Viewport) -> KitResult<()> {
        let canvas = self.live_canvas()?;
        let (w, h) = viewport.native_extent().ok_or(KitError::InvalidDimensions {
            width: viewport.width,
            height: viewport.height,
        })?;
        let status = self.kit.native.canvas_set_viewport(canvas, viewport.x, viewport.y, w, h);
        native::check("canvas_set_viewport", canvas, status)?;
        self.viewport = viewport;
        Ok(())
    }

    /// Drawing area back to the whole surface.
    pub fn reset_viewport(&mut self) -> KitResult<()> {
        self.set_viewport(Viewport::full(self.size))
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_present_sink(&mut self, sink: Box<dyn PresentSink>) {
        self.sink = Some(sink);
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn canvas_handle(&self) -> NativeHandle {
        self.canvas
    }

    /// Native pixel buffer of a software surface.
    pub fn pixels(&self) -> Option<&[u32]> {
        if self.destroyed {
            None
        } else {
            self.target.pixels()
        }
    }

    /// Address of the current software pixel buffer. Changes only when the buffer is
    /// reallocated.
    pub fn buffer_identity(&self) -> Option<usize> {
        self.target.buffer_identity()
    }

    /// Frame produced by the latest software present.
    pub fn last_frame(&self) -> Option<&RgbaImage> {
        self.last_frame.as_ref()
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            error!("failed to destroy {} surface on drop: {e}", self.kind);
        }
    }
}

impl std::fmt::Debug for RenderSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSurface")
            .field("kind", &self.kind)
            .field("canvas", &self.canvas)
            .field("size", &self.size)
            .field("paints", &self.retained.len())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

fn validate_size(kit: &KitShared, width: u32, height: u32) -> KitResult<()> {
    let max = kit.config.max_surface_dim;
    if width == 0 || height == 0 || width > max || height > max {
        return Err(KitError::InvalidDimensions { width, height });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessPlatform, RequestScript};
    use crate::backend::InitStatus;
    use crate::native::headless::{HeadlessEngine, HeadlessKind};
    use crate::native::NativeStatus;
    use crate::paint::{Gradient, LinearGradient, Scene, Shape};
    use crate::render::{live_pixel_buffers, HostPixelLayout};
    use crate::{CanvasKit, KitConfig, Platforms};
    use std::cell::RefCell;

    struct Fixture {
        engine: HeadlessEngine,
        platform: HeadlessPlatform,
        kit: CanvasKit,
    }

    fn fixture(config: Option<KitConfig>) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let engine = HeadlessEngine::new();
        let platform = HeadlessPlatform::new();
        let kit = CanvasKit::new(config, Box::new(engine.clone()), Platforms::headless(&platform)).unwrap();
        Fixture { engine, platform, kit }
    }

    fn ready(kit: &CanvasKit, kind: BackendKind) -> BackendSession {
        let mut session = kit.initialize_backend(kind);
        for _ in 0..10 {
            if session.poll() == InitStatus::Ready {
                return session;
            }
        }
        panic!("{kind} backend never became ready");
    }

    fn red_rect(kit: &CanvasKit, w: f32, h: f32) -> Shape {
        let shape = Shape::new(kit).unwrap();
        shape.append_rect(0.0, 0.0, w, h, 0.0, 0.0).unwrap();
        shape.set_fill_color(255, 0, 0, 255).unwrap();
        shape
    }

    #[test]
    fn full_red_rect_fills_every_pixel() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 100, 100).unwrap();
        surface.add(&red_rect(&f.kit, 100.0, 100.0)).unwrap();
        surface.present().unwrap();

        let frame = surface.last_frame().unwrap();
        assert_eq!((frame.width, frame.height), (100, 100));
        assert!(frame.pixels.chunks(4).all(|px| px == [255, 0, 0, 255]));
    }

    #[test]
    fn present_runs_update_draw_sync_in_order() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 8, 8).unwrap();
        f.engine.clear_calls();
        surface.present().unwrap();
        let calls: Vec<_> = f
            .engine
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("canvas_"))
            .collect();
        assert_eq!(calls, ["canvas_update", "canvas_draw", "canvas_sync"]);
    }

    #[test]
    fn frames_follow_the_host_layout() {
        let config = KitConfig::builder().host_layout(HostPixelLayout::Bgra8).build().unwrap();
        let f = fixture(Some(config));
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 2, 2).unwrap();
        surface.add(&red_rect(&f.kit, 2.0, 2.0)).unwrap();
        surface.present().unwrap();

        let frame = surface.last_frame().unwrap();
        assert_eq!(&frame.pixels[..4], &[0, 0, 255, 255]);
        assert_eq!(frame.rgba_at(1, 1), Some([255, 0, 0, 255]));
    }

    #[test]
    fn create_then_destroy_leaves_nothing_behind() {
        let f = fixture(None);
        let buffers = live_pixel_buffers();
        for kind in BackendKind::ALL {
            let session = ready(&f.kit, kind);
            let mut surface = f.kit.create_surface(&session, "#canvas", 16, 16).unwrap();
            surface.destroy().unwrap();
            surface.destroy().unwrap();
        }
        assert_eq!(live_pixel_buffers(), buffers);
        assert_eq!(f.platform.live_contexts(), 0);
        assert_eq!(f.platform.live_surfaces(), 0);
        assert_eq!(f.engine.live(HeadlessKind::Canvas), 0);
    }

    #[test]
    fn destroy_clears_before_releasing_the_target() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 4, 4).unwrap();
        surface.add(&red_rect(&f.kit, 4.0, 4.0)).unwrap();
        f.engine.clear_calls();
        drop(surface);
        let calls = f.engine.calls();
        let remove = calls.iter().position(|c| *c == "canvas_remove").unwrap();
        let del = calls.iter().position(|c| *c == "canvas_del").unwrap();
        assert!(remove < del);
        assert_eq!(f.engine.live(HeadlessKind::Shape), 0);
    }

    #[test]
    fn operations_after_destroy_fail_loudly() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 4, 4).unwrap();
        surface.destroy().unwrap();
        assert!(matches!(surface.present(), Err(KitError::SurfaceDestroyed)));
        assert!(matches!(surface.resize(8, 8), Err(KitError::SurfaceDestroyed)));
        assert!(surface.pixels().is_none());
    }

    #[test]
    fn resize_reallocates_only_on_change() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 10, 10).unwrap();
        let identity = surface.buffer_identity();

        surface.resize(10, 10).unwrap();
        assert_eq!(surface.buffer_identity(), identity);

        let buffers = live_pixel_buffers();
        surface.resize(30, 20).unwrap();
        assert_eq!(live_pixel_buffers(), buffers);
        surface.present().unwrap();
        assert_eq!(surface.size(), SurfaceSize::new(30, 20));
        assert_eq!(surface.pixels().unwrap().len(), 600);
        let frame = surface.last_frame().unwrap();
        assert_eq!(frame.pixels.len(), 30 * 20 * 4);
    }

    #[test]
    fn invalid_dimensions_are_rejected() {
        let config = KitConfig::builder().max_surface_dim(64).build().unwrap();
        let f = fixture(Some(config));
        let session = ready(&f.kit, BackendKind::Software);
        assert!(matches!(
            f.kit.create_surface(&session, "#c", 0, 10),
            Err(KitError::InvalidDimensions { width: 0, height: 10 })
        ));
        assert!(f.kit.create_surface(&session, "#c", 65, 10).is_err());
        let mut surface = f.kit.create_surface(&session, "#c", 64, 64).unwrap();
        assert!(surface.resize(128, 1).is_err());
        assert_eq!(surface.size(), SurfaceSize::new(64, 64));
    }

    #[test]
    fn failed_creation_tears_down_partial_state() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Gl);
        f.platform.fail_context_creation(true);
        let err = f.kit.create_surface(&session, "#gl", 8, 8).unwrap_err();
        assert!(matches!(err, KitError::ResourceCreation { kind: BackendKind::Gl, .. }));
        assert_eq!(f.engine.live(HeadlessKind::Canvas), 0);

        let session = ready(&f.kit, BackendKind::Software);
        f.engine.fail_on("sw_canvas_new", NativeStatus::FailedAllocation);
        let err = f.kit.create_surface(&session, "#sw", 8, 8).unwrap_err();
        assert!(matches!(err, KitError::ResourceCreation { resource: "native canvas", .. }));
    }

    #[test]
    fn surfaces_need_a_ready_session() {
        let f = fixture(None);
        f.platform.script_adapter(RequestScript::Defer);
        let mut session = f.kit.initialize_backend(BackendKind::WebGpu);
        assert_eq!(session.poll(), InitStatus::Pending);
        assert!(matches!(
            f.kit.create_surface(&session, "#wg", 8, 8),
            Err(KitError::BackendNotReady(BackendKind::WebGpu))
        ));
    }

    #[test]
    fn scene_keeps_a_disposed_child_visible() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 4, 4).unwrap();

        let scene = Scene::new(&f.kit).unwrap();
        let rect = red_rect(&f.kit, 4.0, 4.0);
        scene.add(&rect).unwrap();
        surface.add(&scene).unwrap();
        rect.dispose().unwrap();
        assert!(rect.is_disposed());

        surface.present().unwrap();
        assert_eq!(surface.last_frame().unwrap().rgba_at(2, 2), Some([255, 0, 0, 255]));
    }

    #[test]
    fn reapplied_gradient_reflects_only_the_final_stops() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 4, 1).unwrap();

        let gradient = LinearGradient::new(&f.kit, 0.0, 0.0, 4.0, 0.0).unwrap();
        gradient.set_color_stops(&[(0.0, [255, 0, 0, 255]), (1.0, [255, 0, 0, 255])]).unwrap();
        let shape = Shape::new(&f.kit).unwrap();
        shape.append_rect(0.0, 0.0, 4.0, 1.0, 0.0, 0.0).unwrap();
        shape.set_fill_gradient(&gradient).unwrap();
        surface.add(&shape).unwrap();
        surface.present().unwrap();
        assert_eq!(surface.last_frame().unwrap().rgba_at(0, 0), Some([255, 0, 0, 255]));

        gradient.set_color_stops(&[(0.0, [0, 0, 255, 255]), (1.0, [0, 0, 255, 255])]).unwrap();
        shape.set_fill_gradient(&gradient).unwrap();
        surface.present().unwrap();
        let frame = surface.last_frame().unwrap();
        for x in 0..4 {
            assert_eq!(frame.rgba_at(x, 0), Some([0, 0, 255, 255]));
        }
        // Only the shape's current copy and the wrapper's own gradient remain.
        assert_eq!(f.engine.live(HeadlessKind::Gradient), 2);
    }

    #[test]
    fn viewport_limits_drawing() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 4, 4).unwrap();
        surface.set_viewport(Viewport::new(0, 0, 2, 4)).unwrap();
        surface.add(&red_rect(&f.kit, 4.0, 4.0)).unwrap();
        surface.present().unwrap();
        let frame = surface.last_frame().unwrap();
        assert_eq!(frame.rgba_at(1, 0), Some([255, 0, 0, 255]));
        assert_eq!(frame.rgba_at(3, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn reset_viewport_covers_the_resized_surface() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 4, 4).unwrap();
        assert_eq!(surface.viewport(), Viewport::new(0, 0, 4, 4));
        surface.set_viewport(Viewport::new(0, 0, 2, 4)).unwrap();
        surface.resize(6, 4).unwrap();
        surface.reset_viewport().unwrap();
        assert_eq!(surface.viewport(), Viewport::new(0, 0, 6, 4));

        surface.add(&red_rect(&f.kit, 6.0, 4.0)).unwrap();
        surface.present().unwrap();
        assert_eq!(surface.last_frame().unwrap().rgba_at(5, 3), Some([255, 0, 0, 255]));
    }

    #[test]
    fn remove_drops_one_paint() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 4, 4).unwrap();
        let a = red_rect(&f.kit, 4.0, 4.0);
        let b = red_rect(&f.kit, 2.0, 2.0);
        surface.add_all(&[&a, &b]).unwrap();
        assert_eq!(surface.len(), 2);

        surface.remove(Some(&a)).unwrap();
        assert_eq!(surface.len(), 1);
        assert_eq!(f.engine.canvas_paints(surface.canvas_handle()), vec![b.handle().unwrap()]);
        surface.remove(None).unwrap();
        assert!(surface.is_empty());
    }

    #[test]
    fn native_failure_aborts_only_that_call() {
        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 2, 2).unwrap();
        surface.add(&red_rect(&f.kit, 2.0, 2.0)).unwrap();
        surface.present().unwrap();

        f.engine.fail_on("canvas_draw", NativeStatus::InsufficientCondition);
        let err = surface.present().unwrap_err();
        assert!(matches!(err, KitError::NativeCall { op: "canvas_draw", .. }));
        assert_eq!(surface.len(), 1);
        assert_eq!(surface.last_frame().unwrap().rgba_at(0, 0), Some([255, 0, 0, 255]));
        surface.present().unwrap();
    }

    #[test]
    fn sink_receives_every_software_frame() {
        struct Recorder(Rc<RefCell<Vec<u64>>>);
        impl PresentSink for Recorder {
            fn submit_frame(&mut self, frame_id: u64, frame: &RgbaImage) {
                assert_eq!(frame.width, 3);
                self.0.borrow_mut().push(frame_id);
            }
        }

        let f = fixture(None);
        let session = ready(&f.kit, BackendKind::Software);
        let mut surface = f.kit.create_surface(&session, "#canvas", 3, 3).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        surface.set_present_sink(Box::new(Recorder(Rc::clone(&seen))));
        surface.present().unwrap();
        surface.present().unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn gpu_surfaces_present_without_a_frame() {
        let f = fixture(None);
        for kind in [BackendKind::Gl, BackendKind::WebGpu] {
            let session = ready(&f.kit, kind);
            let mut surface = f.kit.create_surface(&session, "#gpu", 8, 8).unwrap();
            surface.add(&red_rect(&f.kit, 8.0, 8.0)).unwrap();
            surface.present().unwrap();
            assert!(surface.last_frame().is_none());
            assert!(surface.pixels().is_none());
            surface.resize(16, 8).unwrap();
            assert_eq!(f.engine.canvas_target_size(surface.canvas_handle()), Some((16, 8)));
        }
    }

    #[test]
    fn terminated_negotiation_stops_gpu_surfaces() {
        let f = fixture(None);
        let mut session = ready(&f.kit, BackendKind::WebGpu);
        let mut surface = f.kit.create_surface(&session, "#gpu", 8, 8).unwrap();
        surface.present().unwrap();

        session.term();
        assert_eq!(f.platform.live_surfaces(), 0);
        assert_eq!(f.platform.live_devices(), 0);
        assert_eq!(f.platform.live_instances(), 0);
        assert!(matches!(surface.present(), Err(KitError::BackendNotReady(BackendKind::WebGpu))));
        assert!(matches!(surface.resize(8, 8), Err(KitError::BackendNotReady(BackendKind::WebGpu))));

        // Renegotiating does not revive the old surface, and destroying it stays clean.
        let session = ready(&f.kit, BackendKind::WebGpu);
        assert!(surface.present().is_err());
        surface.destroy().unwrap();
        assert_eq!(f.platform.live_surfaces(), 0);

        let mut fresh = f.kit.create_surface(&session, "#gpu", 8, 8).unwrap();
        fresh.present().unwrap();
        assert_eq!(f.platform.live_surfaces(), 1);
    }
}
