use crate::engine::CanvasKit;
use crate::errors::KitResult;
use crate::lifetime::{HandleCell, ObjectKind};
use crate::native;
use crate::paint::{adopt_paint, share_paint, Gradient, Paint};
use std::rc::Rc;

/// Path-based drawable.
#[derive(Debug)]
pub struct Shape {
    cell: Rc<HandleCell>,
}

impl Shape {
    pub fn new(kit: &CanvasKit) -> KitResult<Self> {
        let handle = kit.shared().native.shape_new();
        Ok(Self { cell: adopt_paint(kit, ObjectKind::Shape, "shape_new", handle)? })
    }

    /// Appends a rectangle with optional corner radii.
    pub fn append_rect(&self, x: f32, y: f32, w: f32, h: f32, rx: f32, ry: f32) -> KitResult<&Self> {
        self.cell.forward("shape_append_rect", |n, s| n.shape_append_rect(s, x, y, w, h, rx, ry))?;
        Ok(self)
    }

    /// Appends an ellipse centred on `(cx, cy)`.
    pub fn append_circle(&self, cx: f32, cy: f32, rx: f32, ry: f32) -> KitResult<&Self> {
        self.cell.forward("shape_append_circle", |n, s| n.shape_append_circle(s, cx, cy, rx, ry))?;
        Ok(self)
    }

    /// Drops all geometry, keeping fill and stroke.
    pub fn reset(&self) -> KitResult<&Self> {
        self.cell.forward("shape_reset", |n, s| n.shape_reset(s))?;
        Ok(self)
    }

    pub fn set_fill_color(&self, r: u8, g: u8, b: u8, a: u8) -> KitResult<&Self> {
        self.cell.forward("shape_set_fill_color", |n, s| n.shape_set_fill_color(s, r, g, b, a))?;
        Ok(self)
    }

    /// Fills with a snapshot of `gradient`.
    ///
    /// The shape receives its own native copy, so later changes to `gradient` only show
    /// up after it is applied again, and disposing `gradient` does not affect the shape.
    pub fn set_fill_gradient(&self, gradient: &dyn Gradient) -> KitResult<&Self> {
        let shape = self.cell.handle()?;
        let source = gradient.handle()?;
        let native = &self.cell.kit().native;
        let copy = native::non_null("gradient_duplicate", native.gradient_duplicate(source))?;
        if let Err(e) = native::check("shape_set_gradient", shape, native.shape_set_gradient(shape, copy)) {
            let status = native.gradient_del(copy);
            if !status.is_success() {
                log::error!("gradient_del of unused copy {copy} returned {status}");
            }
            return Err(e);
        }
        Ok(self)
    }

    pub fn set_stroke_width(&self, width: f32) -> KitResult<&Self> {
        self.cell.forward("shape_set_stroke_width", |n, s| n.shape_set_stroke_width(s, width))?;
        Ok(self)
    }

    pub fn set_stroke_color(&self, r: u8, g: u8, b: u8, a: u8) -> KitResult<&Self> {
        self.cell.forward("shape_set_stroke_color", |n, s| n.shape_set_stroke_color(s, r, g, b, a))?;
        Ok(self)
    }

    /// New wrapper sharing the same native shape. Each wrapper holds its own claim.
    pub fn duplicate(&self) -> KitResult<Shape> {
        Ok(Self { cell: share_paint(&self.cell)? })
    }
}

impl Paint for Shape {
    fn cell(&self) -> &Rc<HandleCell> {
        &self.cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::headless::{HeadlessEngine, HeadlessKind};
    use crate::native::NativeStatus;
    use crate::paint::LinearGradient;
    use crate::{KitError, Platforms};

    #[test]
    fn gradient_fill_uses_a_private_copy() {
        let engine = HeadlessEngine::new();
        let kit = CanvasKit::new(None, Box::new(engine.clone()), Platforms::none()).unwrap();
        let shape = Shape::new(&kit).unwrap();
        let gradient = LinearGradient::new(&kit, 0.0, 0.0, 1.0, 0.0).unwrap();

        shape.set_fill_gradient(&gradient).unwrap();
        let copy = engine.shape_gradient(shape.handle().unwrap()).unwrap();
        assert_ne!(copy, gradient.handle().unwrap());

        gradient.dispose().unwrap();
        assert!(engine.is_live(copy));
        assert!(matches!(shape.set_fill_gradient(&gradient), Err(KitError::Disposed { .. })));
    }

    #[test]
    fn rejected_gradient_copy_is_deleted() {
        let engine = HeadlessEngine::new();
        let kit = CanvasKit::new(None, Box::new(engine.clone()), Platforms::none()).unwrap();
        let shape = Shape::new(&kit).unwrap();
        let gradient = LinearGradient::new(&kit, 0.0, 0.0, 1.0, 0.0).unwrap();

        engine.fail_on("shape_set_gradient", NativeStatus::InvalidArgument);
        assert!(shape.set_fill_gradient(&gradient).is_err());
        assert_eq!(engine.live(HeadlessKind::Gradient), 1);
    }
}
