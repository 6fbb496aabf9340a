//! Typed wrapper objects.
//!
//! Each wrapper holds exactly one [`HandleCell`] and forwards its operations to the
//! native engine. Mutators return `&Self` so calls can be chained:
//!
//! ```
//! # use canvaskit::native::headless::HeadlessEngine;
//! # use canvaskit::paint::{Paint, Shape};
//! # use canvaskit::{CanvasKit, Platforms};
//! # let kit = CanvasKit::new(None, Box::new(HeadlessEngine::new()), Platforms::none()).unwrap();
//! let badge = Shape::new(&kit).unwrap();
//! badge
//!     .append_circle(16.0, 16.0, 12.0, 12.0).unwrap()
//!     .set_fill_color(40, 120, 220, 255).unwrap()
//!     .translate(100.0, 40.0).unwrap();
//! ```
//!
//! Dropping the last wrapper (and every container holding it) releases the native
//! object. [`Paint::dispose`] releases it early; later operations on that wrapper fail
//! with [`KitError::Disposed`](crate::KitError::Disposed).

mod animation;
mod gradient;
mod picture;
mod scene;
mod shape;
mod text;

pub use animation::Animation;
pub use gradient::{Gradient, LinearGradient, RadialGradient};
pub use picture::Picture;
pub use scene::Scene;
pub use shape::Shape;
pub use text::Text;

use crate::engine::CanvasKit;
use crate::errors::KitResult;
use crate::lifetime::{HandleCell, ObjectKind, Ownership, WrapperId};
use crate::native::{self, Bounds, NativeHandle};
use log::warn;
use std::rc::Rc;

/// Operations shared by every object that can be drawn.
pub trait Paint {
    fn cell(&self) -> &Rc<HandleCell>;

    fn id(&self) -> WrapperId {
        self.cell().id()
    }

    fn handle(&self) -> KitResult<NativeHandle> {
        self.cell().handle()
    }

    /// Releases this wrapper's claim now. Returns `false` if it was already released.
    fn dispose(&self) -> KitResult<bool> {
        self.cell().dispose()
    }

    fn is_disposed(&self) -> bool {
        self.cell().is_disposed()
    }

    fn translate(&self, x: f32, y: f32) -> KitResult<&Self>
    where
        Self: Sized,
    {
        self.cell().forward("paint_translate", |n, h| n.paint_translate(h, x, y))?;
        Ok(self)
    }

    fn rotate(&self, degrees: f32) -> KitResult<&Self>
    where
        Self: Sized,
    {
        self.cell().forward("paint_rotate", |n, h| n.paint_rotate(h, degrees))?;
        Ok(self)
    }

    fn scale(&self, factor: f32) -> KitResult<&Self>
    where
        Self: Sized,
    {
        self.cell().forward("paint_scale", |n, h| n.paint_scale(h, factor))?;
        Ok(self)
    }

    fn set_opacity(&self, opacity: u8) -> KitResult<&Self>
    where
        Self: Sized,
    {
        self.cell().forward("paint_set_opacity", |n, h| n.paint_set_opacity(h, opacity))?;
        Ok(self)
    }

    fn set_visible(&self, visible: bool) -> KitResult<&Self>
    where
        Self: Sized,
    {
        self.cell().forward("paint_set_visible", |n, h| n.paint_set_visible(h, visible))?;
        Ok(self)
    }

    /// Axis-aligned bounds after this paint's own transform.
    fn bounds(&self) -> KitResult<Bounds> {
        let mut bounds = Bounds::default();
        self.cell().forward("paint_get_aabb", |n, h| n.paint_get_aabb(h, &mut bounds))?;
        Ok(bounds)
    }

    /// Native reference count, including claims held by containers.
    fn ref_count(&self) -> KitResult<u16> {
        let handle = self.handle()?;
        Ok(self.cell().kit().native.paint_get_ref(handle))
    }
}

/// Registers a freshly constructed paint and takes the wrapper's claim on it.
pub(crate) fn adopt_paint(kit: &CanvasKit, kind: ObjectKind, op: &'static str, handle: NativeHandle) -> KitResult<Rc<HandleCell>> {
    let handle = native::non_null(op, handle)?;
    let shared = kit.shared();
    if let Err(e) = native::check("paint_ref", handle, shared.native.paint_ref(handle)) {
        let status = shared.native.paint_del(handle);
        if !status.is_success() {
            warn!("unclaimed {kind} {handle} could not be freed: paint_del returned {status}");
        }
        return Err(e);
    }
    HandleCell::new(shared, kind, handle, Ownership::Owned)
}

/// Takes one more claim on the handle behind `cell` and wraps it in a new cell.
pub(crate) fn share_paint(cell: &HandleCell) -> KitResult<Rc<HandleCell>> {
    cell.forward("paint_ref", |n, h| n.paint_ref(h))?;
    HandleCell::new(cell.kit(), cell.kind(), cell.raw_handle(), Ownership::Owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::headless::{HeadlessEngine, HeadlessKind};
    use crate::native::NativeStatus;
    use crate::{KitError, Platforms};

    fn kit() -> (HeadlessEngine, CanvasKit) {
        let engine = HeadlessEngine::new();
        let kit = CanvasKit::new(None, Box::new(engine.clone()), Platforms::none()).unwrap();
        (engine, kit)
    }

    #[test]
    fn dispose_twice_releases_once() {
        let (engine, kit) = kit();
        let shape = Shape::new(&kit).unwrap();
        assert!(shape.dispose().unwrap());
        assert!(!shape.dispose().unwrap());
        drop(shape);

        let stats = kit.lifetime_stats();
        assert_eq!(stats.released, 1);
        assert_eq!(stats.refused, 0);
        assert_eq!(engine.over_releases(), 0);
        assert_eq!(engine.live(HeadlessKind::Shape), 0);
    }

    #[test]
    fn disposed_wrappers_fail_loudly() {
        let (_engine, kit) = kit();
        let shape = Shape::new(&kit).unwrap();
        shape.dispose().unwrap();
        let err = shape.translate(1.0, 1.0).unwrap_err();
        assert!(matches!(err, KitError::Disposed { kind: ObjectKind::Shape, .. }));
        assert!(err.is_misuse());
        assert!(shape.append_rect(0.0, 0.0, 1.0, 1.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn dropping_the_wrapper_releases_the_paint() {
        let (engine, kit) = kit();
        let handle = {
            let shape = Shape::new(&kit).unwrap();
            shape.handle().unwrap()
        };
        assert!(!engine.is_live(handle));
        assert_eq!(kit.lifetime_stats().releases_of(ObjectKind::Shape), 1);
    }

    #[test]
    fn duplicates_balance_the_reference_count() {
        let (engine, kit) = kit();
        let original = Shape::new(&kit).unwrap();
        let copies: Vec<Shape> = (0..5).map(|_| original.duplicate().unwrap()).collect();
        assert_eq!(original.ref_count().unwrap(), 6);
        let handle = original.handle().unwrap();

        original.dispose().unwrap();
        assert!(engine.is_live(handle));
        drop(copies);

        let stats = kit.lifetime_stats();
        assert_eq!(stats.releases_of(ObjectKind::Shape), 6);
        assert_eq!(stats.refused, 0);
        assert_eq!(engine.over_releases(), 0);
        assert!(!engine.is_live(handle));
    }

    #[test]
    fn native_failures_name_the_operation() {
        let (engine, kit) = kit();
        let shape = Shape::new(&kit).unwrap();
        engine.fail_on("paint_rotate", NativeStatus::InvalidArgument);
        match shape.rotate(45.0) {
            Err(KitError::NativeCall { op, handle, status }) => {
                assert_eq!(op, "paint_rotate");
                assert_eq!(handle, shape.handle().unwrap());
                assert_eq!(status, NativeStatus::InvalidArgument);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(shape.rotate(45.0).is_ok());
    }

    #[test]
    fn failed_construction_registers_nothing() {
        let (engine, kit) = kit();
        engine.fail_on("shape_new", NativeStatus::FailedAllocation);
        assert!(matches!(Shape::new(&kit), Err(KitError::NullHandle { op: "shape_new" })));
        assert_eq!(kit.lifetime_stats().registered, 0);
    }

    #[test]
    fn unclaimed_paint_is_freed_when_the_claim_fails() {
        let (engine, kit) = kit();
        engine.fail_on("paint_ref", NativeStatus::FailedAllocation);
        assert!(matches!(
            Shape::new(&kit),
            Err(KitError::NativeCall { op: "paint_ref", .. })
        ));
        assert_eq!(engine.live(HeadlessKind::Shape), 0);
        assert_eq!(engine.over_releases(), 0);
        assert_eq!(kit.lifetime_stats().live, 0);
    }

    #[test]
    fn bounds_follow_the_transform() {
        let (_engine, kit) = kit();
        let shape = Shape::new(&kit).unwrap();
        shape.append_rect(0.0, 0.0, 10.0, 5.0, 0.0, 0.0).unwrap();
        shape.translate(3.0, 4.0).unwrap();
        let b = shape.bounds().unwrap();
        assert_eq!((b.x, b.y, b.w, b.h), (3.0, 4.0, 10.0, 5.0));
    }
}
