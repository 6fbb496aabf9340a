use crate::engine::CanvasKit;
use crate::errors::{KitError, KitResult};
use crate::lifetime::{HandleCell, ObjectKind, Ownership, WrapperId};
use crate::native::{self, ColorStop, GradientSpread, NativeHandle};
use std::rc::Rc;

/// Operations shared by linear and radial gradients.
///
/// A gradient is not drawn by itself; [`Shape::set_fill_gradient`](crate::paint::Shape::set_fill_gradient)
/// applies a copy of it.
pub trait Gradient {
    fn cell(&self) -> &Rc<HandleCell>;

    fn id(&self) -> WrapperId {
        self.cell().id()
    }

    fn handle(&self) -> KitResult<NativeHandle> {
        self.cell().handle()
    }

    fn dispose(&self) -> KitResult<bool> {
        self.cell().dispose()
    }

    fn is_disposed(&self) -> bool {
        self.cell().is_disposed()
    }

    /// Replaces the color stops. Each stop is `(offset, [r, g, b, a])` with the offset
    /// in `0.0..=1.0`.
    fn set_color_stops(&self, stops: &[(f32, [u8; 4])]) -> KitResult<()> {
        let packed = stops
            .iter()
            .map(|&(offset, [r, g, b, a])| {
                if (0.0..=1.0).contains(&offset) {
                    Ok(ColorStop::new(offset, r, g, b, a))
                } else {
                    Err(KitError::InvalidGradientStop(offset))
                }
            })
            .collect::<KitResult<Vec<_>>>()?;
        let bytes: &[u8] = bytemuck::cast_slice(&packed);
        self.cell().forward("gradient_set_color_stops", |n, g| n.gradient_set_color_stops(g, bytes))
    }

    fn set_spread(&self, spread: GradientSpread) -> KitResult<()> {
        self.cell().forward("gradient_set_spread", |n, g| n.gradient_set_spread(g, spread))
    }
}

fn adopt(kit: &CanvasKit, op: &'static str, handle: NativeHandle) -> KitResult<Rc<HandleCell>> {
    let handle = native::non_null(op, handle)?;
    HandleCell::new(kit.shared(), ObjectKind::Gradient, handle, Ownership::Owned)
}

/// Native deep copy registered as an independent gradient.
fn duplicate(cell: &HandleCell) -> KitResult<Rc<HandleCell>> {
    let source = cell.handle()?;
    let copy = native::non_null("gradient_duplicate", cell.kit().native.gradient_duplicate(source))?;
    HandleCell::new(cell.kit(), ObjectKind::Gradient, copy, Ownership::Owned)
}

/// Gradient along the line from `(x1, y1)` to `(x2, y2)`.
#[derive(Debug)]
pub struct LinearGradient {
    cell: Rc<HandleCell>,
}

impl LinearGradient {
    pub fn new(kit: &CanvasKit, x1: f32, y1: f32, x2: f32, y2: f32) -> KitResult<Self> {
        let handle = kit.shared().native.linear_gradient_new();
        let gradient = Self { cell: adopt(kit, "linear_gradient_new", handle)? };
        gradient.set_points(x1, y1, x2, y2)?;
        Ok(gradient)
    }

    pub fn set_points(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> KitResult<&Self> {
        self.cell.forward("linear_gradient_set", |n, g| n.linear_gradient_set(g, x1, y1, x2, y2))?;
        Ok(self)
    }

    pub fn duplicate(&self) -> KitResult<LinearGradient> {
        Ok(Self { cell: duplicate(&self.cell)? })
    }
}

impl Gradient for LinearGradient {
    fn cell(&self) -> &Rc<HandleCell> {
        &self.cell
    }
}

/// Gradient radiating from `(cx, cy)` out to radius `r`.
#[derive(Debug)]
pub struct RadialGradient {
    cell: Rc<HandleCell>,
}

impl RadialGradient {
    pub fn new(kit: &CanvasKit, cx: f32, cy: f32, r: f32) -> KitResult<Self> {
        let handle = kit.shared().native.radial_gradient_new();
        let gradient = Self { cell: adopt(kit, "radial_gradient_new", handle)? };
        gradient.set_circle(cx, cy, r)?;
        Ok(gradient)
    }

    pub fn set_circle(&self, cx: f32, cy: f32, r: f32) -> KitResult<&Self> {
        self.cell.forward("radial_gradient_set", |n, g| n.radial_gradient_set(g, cx, cy, r))?;
        Ok(self)
    }

    pub fn duplicate(&self) -> KitResult<RadialGradient> {
        Ok(Self { cell: duplicate(&self.cell)? })
    }
}

impl Gradient for RadialGradient {
    fn cell(&self) -> &Rc<HandleCell> {
        &self.cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::headless::{HeadlessEngine, HeadlessKind};
    use crate::Platforms;

    fn kit() -> (HeadlessEngine, CanvasKit) {
        let engine = HeadlessEngine::new();
        let kit = CanvasKit::new(None, Box::new(engine.clone()), Platforms::none()).unwrap();
        (engine, kit)
    }

    #[test]
    fn stops_reach_the_engine_packed() {
        let (engine, kit) = kit();
        let g = LinearGradient::new(&kit, 0.0, 0.0, 10.0, 0.0).unwrap();
        g.set_color_stops(&[(0.0, [255, 0, 0, 255]), (1.0, [0, 0, 255, 128])]).unwrap();
        let stops = engine.gradient_stops(g.handle().unwrap());
        assert_eq!(stops, vec![ColorStop::new(0.0, 255, 0, 0, 255), ColorStop::new(1.0, 0, 0, 255, 128)]);
    }

    #[test]
    fn out_of_range_stop_is_rejected_before_the_engine() {
        let (engine, kit) = kit();
        let g = RadialGradient::new(&kit, 5.0, 5.0, 5.0).unwrap();
        engine.clear_calls();
        let err = g.set_color_stops(&[(0.0, [0; 4]), (1.5, [0; 4])]).unwrap_err();
        assert!(matches!(err, KitError::InvalidGradientStop(o) if o == 1.5));
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn duplicate_is_an_independent_native_copy() {
        let (engine, kit) = kit();
        let g = LinearGradient::new(&kit, 0.0, 0.0, 1.0, 1.0).unwrap();
        g.set_color_stops(&[(0.0, [1, 2, 3, 4])]).unwrap();
        let copy = g.duplicate().unwrap();
        assert_ne!(copy.handle().unwrap(), g.handle().unwrap());
        assert_eq!(engine.gradient_stops(copy.handle().unwrap()).len(), 1);

        g.dispose().unwrap();
        assert!(!copy.is_disposed());
        drop(copy);
        assert_eq!(engine.live(HeadlessKind::Gradient), 0);
        assert_eq!(kit.lifetime_stats().releases_of(ObjectKind::Gradient), 2);
    }
}
