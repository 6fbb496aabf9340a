//! In-process reference engine.
//!
//! [`HeadlessEngine`] implements [`NativeApi`] with plain Rust data structures. It keeps
//! the reference-count semantics of the real engine (paints start at zero, containers
//! take a reference, gradients are owned by the shape they are set on) and rasterizes
//! rectangles, ellipses and their strokes with solid or gradient fills into software
//! targets. Text and picture content are tracked but not rasterized.
//!
//! Besides serving as the engine for headless rendering, it records every call and can
//! be told to fail the next invocation of an operation, which is how the binding's
//! error paths are tested.

use crate::backend::platform::{GlContextId, WgDevice, WgInstance, WgSurface};
use crate::native::{Bounds, ColorSpace, ColorStop, GradientSpread, NativeApi, NativeHandle, NativeStatus, PixelTarget};
use log::{trace, warn};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

const FIRST_HANDLE: usize = 0x1000;
const HANDLE_STEP: usize = 0x10;

/// Object families tracked by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeadlessKind {
    Canvas,
    Shape,
    Scene,
    Text,
    Picture,
    Gradient,
    Animation,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Affine {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Affine {
    const IDENTITY: Affine = Affine { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    /// `outer ∘ self`
    fn then(self, o: Affine) -> Affine {
        Affine {
            a: o.a * self.a + o.c * self.b,
            b: o.b * self.a + o.d * self.b,
            c: o.a * self.c + o.c * self.d,
            d: o.b * self.c + o.d * self.d,
            e: o.a * self.e + o.c * self.f + o.e,
            f: o.b * self.e + o.d * self.f + o.f,
        }
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    fn invert(&self) -> Option<Affine> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let (a, b, c, d) = (self.d / det, -self.b / det, -self.c / det, self.a / det);
        Some(Affine {
            a,
            b,
            c,
            d,
            e: -(a * self.e + c * self.f),
            f: -(b * self.e + d * self.f),
        })
    }
}

#[derive(Clone, Debug)]
struct PaintProps {
    tx: f32,
    ty: f32,
    degrees: f32,
    scale: f32,
    opacity: u8,
    visible: bool,
}

impl Default for PaintProps {
    fn default() -> Self {
        Self { tx: 0.0, ty: 0.0, degrees: 0.0, scale: 1.0, opacity: 255, visible: true }
    }
}

impl PaintProps {
    /// Scale, then rotate, then translate.
    fn transform(&self) -> Affine {
        let (sin, cos) = self.degrees.to_radians().sin_cos();
        Affine {
            a: self.scale * cos,
            b: self.scale * sin,
            c: -self.scale * sin,
            d: self.scale * cos,
            e: self.tx,
            f: self.ty,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Geom {
    Rect { x: f32, y: f32, w: f32, h: f32, rx: f32, ry: f32 },
    Ellipse { cx: f32, cy: f32, rx: f32, ry: f32 },
}

impl Geom {
    fn contains(&self, px: f32, py: f32) -> bool {
        match *self {
            Geom::Rect { x, y, w, h, rx, ry } => {
                if px < x || py < y || px > x + w || py > y + h {
                    return false;
                }
                let rx = rx.min(w / 2.0);
                let ry = ry.min(h / 2.0);
                if rx <= 0.0 || ry <= 0.0 {
                    return true;
                }
                let cx = px.clamp(x + rx, x + w - rx);
                let cy = py.clamp(y + ry, y + h - ry);
                let dx = (px - cx) / rx;
                let dy = (py - cy) / ry;
                dx * dx + dy * dy <= 1.0
            }
            Geom::Ellipse { cx, cy, rx, ry } => {
                if rx <= 0.0 || ry <= 0.0 {
                    return false;
                }
                let dx = (px - cx) / rx;
                let dy = (py - cy) / ry;
                dx * dx + dy * dy <= 1.0
            }
        }
    }

    /// Grows (or with negative `d` shrinks) the outline. `None` once it degenerates.
    fn inflate(&self, d: f32) -> Option<Geom> {
        match *self {
            Geom::Rect { x, y, w, h, rx, ry } => {
                let (w, h) = (w + 2.0 * d, h + 2.0 * d);
                if w <= 0.0 || h <= 0.0 {
                    return None;
                }
                let round = |r: f32| if r > 0.0 { (r + d).max(0.0) } else { 0.0 };
                Some(Geom::Rect { x: x - d, y: y - d, w, h, rx: round(rx), ry: round(ry) })
            }
            Geom::Ellipse { cx, cy, rx, ry } => {
                let (rx, ry) = (rx + d, ry + d);
                (rx > 0.0 && ry > 0.0).then_some(Geom::Ellipse { cx, cy, rx, ry })
            }
        }
    }

    fn extent(&self) -> (f32, f32, f32, f32) {
        match *self {
            Geom::Rect { x, y, w, h, .. } => (x, y, x + w, y + h),
            Geom::Ellipse { cx, cy, rx, ry } => (cx - rx, cy - ry, cx + rx, cy + ry),
        }
    }
}

#[derive(Clone, Debug)]
enum Fill {
    None,
    Solid([u8; 4]),
    /// Owned gradient object.
    Gradient(NativeHandle),
}

#[derive(Clone, Debug)]
struct ShapeBody {
    paint: PaintProps,
    geometry: Vec<Geom>,
    fill: Fill,
    stroke_width: f32,
    stroke_color: [u8; 4],
}

#[derive(Clone, Debug)]
struct SceneBody {
    paint: PaintProps,
    children: Vec<NativeHandle>,
}

#[derive(Clone, Debug)]
struct TextBody {
    paint: PaintProps,
    font: Option<String>,
    size: f32,
    text: String,
    color: [u8; 3],
}

#[derive(Clone, Debug)]
struct PictureBody {
    paint: PaintProps,
    loaded: bool,
    size: (f32, f32),
    /// `(total frames, frame rate)` for animated content.
    timeline: Option<(f32, f32)>,
    /// Animation that embeds and owns this picture.
    owner: Option<NativeHandle>,
}

#[derive(Clone, Copy, Debug)]
enum GradientShape {
    Linear { x1: f32, y1: f32, x2: f32, y2: f32 },
    Radial { cx: f32, cy: f32, r: f32 },
}

#[derive(Clone, Debug)]
struct GradientBody {
    shape: GradientShape,
    stops: Vec<ColorStop>,
    spread: GradientSpread,
}

impl GradientBody {
    fn color_at(&self, x: f32, y: f32) -> Option<[u8; 4]> {
        let t = match self.shape {
            GradientShape::Linear { x1, y1, x2, y2 } => {
                let (dx, dy) = (x2 - x1, y2 - y1);
                let len2 = dx * dx + dy * dy;
                if len2 <= f32::EPSILON {
                    0.0
                } else {
                    ((x - x1) * dx + (y - y1) * dy) / len2
                }
            }
            GradientShape::Radial { cx, cy, r } => {
                if r <= 0.0 {
                    return None;
                }
                ((x - cx).powi(2) + (y - cy).powi(2)).sqrt() / r
            }
        };
        let t = match self.spread {
            GradientSpread::Pad => t.clamp(0.0, 1.0),
            GradientSpread::Repeat => t - t.floor(),
            GradientSpread::Reflect => {
                let m = t.rem_euclid(2.0);
                if m > 1.0 { 2.0 - m } else { m }
            }
        };

        let first = self.stops.first()?;
        if t <= first.offset {
            return Some([first.r, first.g, first.b, first.a]);
        }
        for pair in self.stops.windows(2) {
            let (s0, s1) = (pair[0], pair[1]);
            if t <= s1.offset {
                let span = s1.offset - s0.offset;
                let k = if span <= f32::EPSILON { 1.0 } else { (t - s0.offset) / span };
                let lerp = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * k).round() as u8;
                return Some([lerp(s0.r, s1.r), lerp(s0.g, s1.g), lerp(s0.b, s1.b), lerp(s0.a, s1.a)]);
            }
        }
        self.stops.last().map(|s| [s.r, s.g, s.b, s.a])
    }
}

#[derive(Clone, Copy, Debug)]
enum CanvasKind {
    Sw,
    Gl,
    Wg,
}

#[derive(Clone, Copy, Debug)]
enum Target {
    Sw(PixelTarget),
    Gl { width: u32, height: u32 },
    Wg { width: u32, height: u32 },
}

#[derive(Clone, Debug)]
struct CanvasBody {
    kind: CanvasKind,
    paints: Vec<NativeHandle>,
    target: Option<Target>,
    viewport: Option<(i32, i32, i32, i32)>,
}

#[derive(Clone, Debug)]
struct AnimationBody {
    picture: NativeHandle,
    frame: f32,
}

#[derive(Clone, Debug)]
enum Body {
    Canvas(CanvasBody),
    Shape(ShapeBody),
    Scene(SceneBody),
    Text(TextBody),
    Picture(PictureBody),
    Gradient(GradientBody),
    Animation(AnimationBody),
}

impl Body {
    fn kind(&self) -> HeadlessKind {
        match self {
            Body::Canvas(_) => HeadlessKind::Canvas,
            Body::Shape(_) => HeadlessKind::Shape,
            Body::Scene(_) => HeadlessKind::Scene,
            Body::Text(_) => HeadlessKind::Text,
            Body::Picture(_) => HeadlessKind::Picture,
            Body::Gradient(_) => HeadlessKind::Gradient,
            Body::Animation(_) => HeadlessKind::Animation,
        }
    }

    fn paint(&self) -> Option<&PaintProps> {
        match self {
            Body::Shape(s) => Some(&s.paint),
            Body::Scene(s) => Some(&s.paint),
            Body::Text(t) => Some(&t.paint),
            Body::Picture(p) => Some(&p.paint),
            _ => None,
        }
    }

    fn paint_mut(&mut self) -> Option<&mut PaintProps> {
        match self {
            Body::Shape(s) => Some(&mut s.paint),
            Body::Scene(s) => Some(&mut s.paint),
            Body::Text(t) => Some(&mut t.paint),
            Body::Picture(p) => Some(&mut p.paint),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct Object {
    refs: u16,
    body: Body,
}

#[derive(Default)]
struct State {
    next_handle: usize,
    objects: HashMap<NativeHandle, Object>,
    fonts: HashSet<String>,
    engine_refs: u32,
    calls: Vec<&'static str>,
    faults: HashMap<&'static str, NativeStatus>,
    frees: usize,
    over_releases: usize,
}

type Op<T = ()> = Result<T, NativeStatus>;

impl State {
    fn alloc(&mut self, body: Body) -> NativeHandle {
        if self.next_handle == 0 {
            self.next_handle = FIRST_HANDLE;
        }
        let handle = NativeHandle::from_raw(self.next_handle);
        self.next_handle += HANDLE_STEP;
        self.objects.insert(handle, Object { refs: 0, body });
        handle
    }

    fn object_mut(&mut self, h: NativeHandle) -> Op<&mut Object> {
        self.objects.get_mut(&h).ok_or(NativeStatus::InvalidArgument)
    }

    fn paint_mut(&mut self, h: NativeHandle) -> Op<&mut PaintProps> {
        self.object_mut(h)?.body.paint_mut().ok_or(NativeStatus::InvalidArgument)
    }

    fn is_paint(&self, h: NativeHandle) -> bool {
        self.objects.get(&h).is_some_and(|o| o.body.paint().is_some())
    }

    fn canvas_mut(&mut self, h: NativeHandle) -> Op<&mut CanvasBody> {
        match &mut self.object_mut(h)?.body {
            Body::Canvas(c) => Ok(c),
            _ => Err(NativeStatus::InvalidArgument),
        }
    }

    fn shape_mut(&mut self, h: NativeHandle) -> Op<&mut ShapeBody> {
        match &mut self.object_mut(h)?.body {
            Body::Shape(s) => Ok(s),
            _ => Err(NativeStatus::InvalidArgument),
        }
    }

    fn scene_mut(&mut self, h: NativeHandle) -> Op<&mut SceneBody> {
        match &mut self.object_mut(h)?.body {
            Body::Scene(s) => Ok(s),
            _ => Err(NativeStatus::InvalidArgument),
        }
    }

    fn text_mut(&mut self, h: NativeHandle) -> Op<&mut TextBody> {
        match &mut self.object_mut(h)?.body {
            Body::Text(t) => Ok(t),
            _ => Err(NativeStatus::InvalidArgument),
        }
    }

    fn picture_mut(&mut self, h: NativeHandle) -> Op<&mut PictureBody> {
        match &mut self.object_mut(h)?.body {
            Body::Picture(p) => Ok(p),
            _ => Err(NativeStatus::InvalidArgument),
        }
    }

    fn gradient_mut(&mut self, h: NativeHandle) -> Op<&mut GradientBody> {
        match &mut self.object_mut(h)?.body {
            Body::Gradient(g) => Ok(g),
            _ => Err(NativeStatus::InvalidArgument),
        }
    }

    fn animation_mut(&mut self, h: NativeHandle) -> Op<&mut AnimationBody> {
        match &mut self.object_mut(h)?.body {
            Body::Animation(a) => Ok(a),
            _ => Err(NativeStatus::InvalidArgument),
        }
    }

    fn retain(&mut self, h: NativeHandle) -> Op {
        if !self.is_paint(h) {
            return Err(NativeStatus::InvalidArgument);
        }
        let obj = self.object_mut(h)?;
        obj.refs = obj.refs.checked_add(1).ok_or(NativeStatus::FailedAllocation)?;
        Ok(())
    }

    fn unref(&mut self, h: NativeHandle, free: bool) -> Op {
        let obj = self.object_mut(h)?;
        if obj.body.paint().is_none() {
            return Err(NativeStatus::InvalidArgument);
        }
        if obj.refs == 0 {
            self.over_releases += 1;
            warn!("headless: unref of {h} with no outstanding references");
            return Err(NativeStatus::MemoryCorruption);
        }
        obj.refs -= 1;
        let owned = matches!(&obj.body, Body::Picture(p) if p.owner.is_some());
        if obj.refs == 0 && free && !owned {
            self.free(h);
        }
        Ok(())
    }

    fn free(&mut self, h: NativeHandle) {
        let Some(obj) = self.objects.remove(&h) else {
            return;
        };
        self.frees += 1;
        trace!("headless: freed {:?} {h}", obj.body.kind());
        match obj.body {
            Body::Canvas(c) => self.release_children(&c.paints),
            Body::Scene(s) => self.release_children(&s.children),
            Body::Shape(ShapeBody { fill: Fill::Gradient(g), .. }) => self.free(g),
            Body::Animation(a) => {
                let picture_refs = self.objects.get(&a.picture).map(|o| o.refs);
                match picture_refs {
                    Some(0) => self.free(a.picture),
                    Some(_) => {
                        if let Ok(p) = self.picture_mut(a.picture) {
                            p.owner = None;
                        }
                    }
                    None => {}
                }
            }
            _ => {}
        }
    }

    fn release_children(&mut self, children: &[NativeHandle]) {
        for &child in children {
            let _ = self.unref(child, true);
        }
    }

    fn bounds(&self, h: NativeHandle, parent: Affine) -> Option<(f32, f32, f32, f32)> {
        let obj = self.objects.get(&h)?;
        let m = obj.body.paint()?.transform().then(parent);
        let local: Vec<(f32, f32, f32, f32)> = match &obj.body {
            Body::Shape(s) => s
                .geometry
                .iter()
                .map(|g| {
                    let pad = s.stroke_width / 2.0;
                    let (x0, y0, x1, y1) = g.extent();
                    (x0 - pad, y0 - pad, x1 + pad, y1 + pad)
                })
                .collect(),
            Body::Scene(s) => return union(s.children.iter().filter_map(|&c| self.bounds(c, m))),
            Body::Picture(p) if p.loaded => vec![(0.0, 0.0, p.size.0, p.size.1)],
            _ => Vec::new(),
        };
        union(local.into_iter().map(|(x0, y0, x1, y1)| {
            let corners = [m.apply(x0, y0), m.apply(x1, y0), m.apply(x0, y1), m.apply(x1, y1)];
            let xs = corners.map(|c| c.0);
            let ys = corners.map(|c| c.1);
            (
                xs.iter().copied().fold(f32::INFINITY, f32::min),
                ys.iter().copied().fold(f32::INFINITY, f32::min),
                xs.iter().copied().fold(f32::NEG_INFINITY, f32::max),
                ys.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            )
        }))
    }
}

fn union(boxes: impl Iterator<Item = (f32, f32, f32, f32)>) -> Option<(f32, f32, f32, f32)> {
    boxes.reduce(|a, b| (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3)))
}

struct Raster<'a> {
    pixels: &'a mut [u32],
    stride: usize,
    cs: ColorSpace,
    clip: (u32, u32, u32, u32),
}

impl Raster<'_> {
    fn clear(&mut self) {
        let (x0, y0, x1, y1) = self.clip;
        for y in y0..y1 {
            let row = y as usize * self.stride;
            self.pixels[row + x0 as usize..row + x1 as usize].fill(0);
        }
    }

    fn blend(&mut self, x: u32, y: u32, [r, g, b, a]: [u8; 4], opacity: f32) {
        let sa = a as f32 / 255.0 * opacity;
        if sa <= 0.0 {
            return;
        }
        let idx = y as usize * self.stride + x as usize;
        let dst = self.cs.unpack(self.pixels[idx]);
        let da = dst[3] as f32 / 255.0;
        let straight = |c: u8| {
            if self.cs.is_premultiplied() && da > 0.0 { c as f32 / 255.0 / da } else { c as f32 / 255.0 }
        };
        let out_a = sa + da * (1.0 - sa);
        let mix = |s: u8, d: u8| {
            let v = (s as f32 / 255.0 * sa + straight(d) * da * (1.0 - sa)) / out_a;
            let v = if self.cs.is_premultiplied() { v * out_a } else { v };
            (v * 255.0).round().clamp(0.0, 255.0) as u8
        };
        let px = [mix(r, dst[0]), mix(g, dst[1]), mix(b, dst[2]), (out_a * 255.0).round() as u8];
        self.pixels[idx] = self.cs.pack(px);
    }
}

fn render_paint(state: &State, h: NativeHandle, parent: Affine, opacity: f32, raster: &mut Raster<'_>) {
    let Some(obj) = state.objects.get(&h) else {
        return;
    };
    let Some(props) = obj.body.paint() else {
        return;
    };
    if !props.visible || props.opacity == 0 {
        return;
    }
    let m = props.transform().then(parent);
    let opacity = opacity * props.opacity as f32 / 255.0;

    match &obj.body {
        Body::Scene(scene) => {
            for &child in &scene.children {
                render_paint(state, child, m, opacity, raster);
            }
        }
        Body::Shape(shape) => render_shape(state, shape, m, opacity, raster),
        _ => {}
    }
}

fn render_shape(state: &State, shape: &ShapeBody, m: Affine, opacity: f32, raster: &mut Raster<'_>) {
    let Some(inv) = m.invert() else {
        return;
    };
    let gradient = match shape.fill {
        Fill::Gradient(g) => match state.objects.get(&g).map(|o| &o.body) {
            Some(Body::Gradient(body)) => Some(body),
            _ => None,
        },
        _ => None,
    };
    let half = shape.stroke_width / 2.0;
    let strokes: Vec<(Option<Geom>, Option<Geom>)> = if half > 0.0 {
        shape.geometry.iter().map(|g| (g.inflate(half), g.inflate(-half))).collect()
    } else {
        Vec::new()
    };

    let (x0, y0, x1, y1) = raster.clip;
    for y in y0..y1 {
        for x in x0..x1 {
            let (lx, ly) = inv.apply(x as f32 + 0.5, y as f32 + 0.5);
            if shape.geometry.iter().any(|g| g.contains(lx, ly)) {
                let color = match (&shape.fill, gradient) {
                    (Fill::Solid(c), _) => Some(*c),
                    (Fill::Gradient(_), Some(g)) => g.color_at(lx, ly),
                    _ => None,
                };
                if let Some(color) = color {
                    raster.blend(x, y, color, opacity);
                }
            }
            let on_stroke = strokes.iter().any(|(outer, inner)| {
                outer.is_some_and(|o| o.contains(lx, ly)) && !inner.is_some_and(|i| i.contains(lx, ly))
            });
            if on_stroke {
                raster.blend(x, y, shape.stroke_color, opacity);
            }
        }
    }
}

/// Parses `attr="123"` from markup, tolerating a unit suffix.
fn markup_dimension(text: &str, attr: &str) -> Option<f32> {
    let key = format!("{attr}=\"");
    let start = text.find(&key)? + key.len();
    let value: String = text[start..].chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    value.parse().ok()
}

/// Reference engine with inspectable state. Clones share the same engine.
#[derive(Clone, Default)]
pub struct HeadlessEngine {
    state: Rc<RefCell<State>>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `op` return `status` (or a null handle for constructors).
    pub fn fail_on(&self, op: &'static str, status: NativeStatus) {
        self.state.borrow_mut().faults.insert(op, status);
    }

    /// Names of the entry points invoked so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn live(&self, kind: HeadlessKind) -> usize {
        self.state.borrow().objects.values().filter(|o| o.body.kind() == kind).count()
    }

    pub fn live_objects(&self) -> usize {
        self.state.borrow().objects.len()
    }

    pub fn is_live(&self, handle: NativeHandle) -> bool {
        self.state.borrow().objects.contains_key(&handle)
    }

    /// Number of objects freed so far.
    pub fn frees(&self) -> usize {
        self.state.borrow().frees
    }

    /// Number of unrefs rejected because the paint had no outstanding references.
    pub fn over_releases(&self) -> usize {
        self.state.borrow().over_releases
    }

    pub fn engine_refs(&self) -> u32 {
        self.state.borrow().engine_refs
    }

    pub fn font_loaded(&self, name: &str) -> bool {
        self.state.borrow().fonts.contains(name)
    }

    /// Paints currently pushed into `canvas`.
    pub fn canvas_paints(&self, canvas: NativeHandle) -> Vec<NativeHandle> {
        match self.state.borrow().objects.get(&canvas).map(|o| &o.body) {
            Some(Body::Canvas(c)) => c.paints.clone(),
            _ => Vec::new(),
        }
    }

    /// Size of the target currently bound to `canvas`.
    pub fn canvas_target_size(&self, canvas: NativeHandle) -> Option<(u32, u32)> {
        match self.state.borrow().objects.get(&canvas).map(|o| &o.body) {
            Some(Body::Canvas(CanvasBody { target: Some(t), .. })) => Some(match *t {
                Target::Sw(p) => (p.width, p.height),
                Target::Gl { width, height } | Target::Wg { width, height } => (width, height),
            }),
            _ => None,
        }
    }

    /// Gradient currently owned by `shape`.
    pub fn shape_gradient(&self, shape: NativeHandle) -> Option<NativeHandle> {
        match self.state.borrow().objects.get(&shape).map(|o| &o.body) {
            Some(Body::Shape(ShapeBody { fill: Fill::Gradient(g), .. })) => Some(*g),
            _ => None,
        }
    }

    pub fn gradient_stops(&self, gradient: NativeHandle) -> Vec<ColorStop> {
        match self.state.borrow().objects.get(&gradient).map(|o| &o.body) {
            Some(Body::Gradient(g)) => g.stops.clone(),
            _ => Vec::new(),
        }
    }

    pub fn text_content(&self, text: NativeHandle) -> Option<String> {
        match self.state.borrow().objects.get(&text).map(|o| &o.body) {
            Some(Body::Text(t)) => Some(t.text.clone()),
            _ => None,
        }
    }

    fn call(&self, op: &'static str, f: impl FnOnce(&mut State) -> Op) -> NativeStatus {
        let mut state = self.state.borrow_mut();
        state.calls.push(op);
        if let Some(status) = state.faults.remove(op) {
            return status;
        }
        match f(&mut state) {
            Ok(()) => NativeStatus::Success,
            Err(status) => status,
        }
    }

    fn create(&self, op: &'static str, f: impl FnOnce(&mut State) -> NativeHandle) -> NativeHandle {
        let mut state = self.state.borrow_mut();
        state.calls.push(op);
        if state.faults.remove(op).is_some() {
            return NativeHandle::NULL;
        }
        f(&mut state)
    }

    fn new_canvas(&self, op: &'static str, kind: CanvasKind) -> NativeHandle {
        self.create(op, |s| {
            s.alloc(Body::Canvas(CanvasBody { kind, paints: Vec::new(), target: None, viewport: None }))
        })
    }

    fn read<T>(&self, op: &'static str, out: &mut T, f: impl FnOnce(&mut State) -> Op<T>) -> NativeStatus {
        self.call(op, |s| {
            *out = f(s)?;
            Ok(())
        })
    }
}

impl NativeApi for HeadlessEngine {
    fn engine_init(&self) -> NativeStatus {
        self.call("engine_init", |s| {
            s.engine_refs += 1;
            Ok(())
        })
    }

    fn engine_term(&self) -> NativeStatus {
        self.call("engine_term", |s| {
            s.engine_refs = s.engine_refs.checked_sub(1).ok_or(NativeStatus::InsufficientCondition)?;
            Ok(())
        })
    }

    fn sw_canvas_new(&self) -> NativeHandle {
        self.new_canvas("sw_canvas_new", CanvasKind::Sw)
    }

    fn gl_canvas_new(&self) -> NativeHandle {
        self.new_canvas("gl_canvas_new", CanvasKind::Gl)
    }

    fn wg_canvas_new(&self) -> NativeHandle {
        self.new_canvas("wg_canvas_new", CanvasKind::Wg)
    }

    fn canvas_del(&self, canvas: NativeHandle) -> NativeStatus {
        self.call("canvas_del", |s| {
            s.canvas_mut(canvas)?;
            s.free(canvas);
            Ok(())
        })
    }

    fn sw_canvas_target(&self, canvas: NativeHandle, target: PixelTarget) -> NativeStatus {
        self.call("sw_canvas_target", |s| {
            let c = s.canvas_mut(canvas)?;
            if !matches!(c.kind, CanvasKind::Sw) {
                return Err(NativeStatus::NotSupported);
            }
            let needed = (target.stride as usize).checked_mul(target.height as usize);
            if target.width == 0
                || target.height == 0
                || target.stride < target.width
                || needed.map_or(true, |n| n > target.len)
            {
                return Err(NativeStatus::InvalidArgument);
            }
            c.target = Some(Target::Sw(target));
            Ok(())
        })
    }

    fn gl_canvas_target(&self, canvas: NativeHandle, _context: GlContextId, _fbo: i32, w: u32, h: u32, _cs: ColorSpace) -> NativeStatus {
        self.call("gl_canvas_target", |s| {
            let c = s.canvas_mut(canvas)?;
            if !matches!(c.kind, CanvasKind::Gl) {
                return Err(NativeStatus::NotSupported);
            }
            if w == 0 || h == 0 {
                return Err(NativeStatus::InvalidArgument);
            }
            c.target = Some(Target::Gl { width: w, height: h });
            Ok(())
        })
    }

    fn wg_canvas_target(
        &self,
        canvas: NativeHandle,
        _device: WgDevice,
        _instance: WgInstance,
        _surface: WgSurface,
        w: u32,
        h: u32,
        _cs: ColorSpace,
    ) -> NativeStatus {
        self.call("wg_canvas_target", |s| {
            let c = s.canvas_mut(canvas)?;
            if !matches!(c.kind, CanvasKind::Wg) {
                return Err(NativeStatus::NotSupported);
            }
            if w == 0 || h == 0 {
                return Err(NativeStatus::InvalidArgument);
            }
            c.target = Some(Target::Wg { width: w, height: h });
            Ok(())
        })
    }

    fn canvas_push(&self, canvas: NativeHandle, paint: NativeHandle) -> NativeStatus {
        self.call("canvas_push", |s| {
            s.canvas_mut(canvas)?;
            s.retain(paint)?;
            s.canvas_mut(canvas)?.paints.push(paint);
            Ok(())
        })
    }

    fn canvas_remove(&self, canvas: NativeHandle, paint: Option<NativeHandle>) -> NativeStatus {
        self.call("canvas_remove", |s| {
            let c = s.canvas_mut(canvas)?;
            let removed = match paint {
                Some(p) => {
                    let idx = c.paints.iter().position(|&x| x == p).ok_or(NativeStatus::InvalidArgument)?;
                    vec![c.paints.remove(idx)]
                }
                None => std::mem::take(&mut c.paints),
            };
            s.release_children(&removed);
            Ok(())
        })
    }

    fn canvas_update(&self, canvas: NativeHandle) -> NativeStatus {
        self.call("canvas_update", |s| s.canvas_mut(canvas).map(|_| ()))
    }

    fn canvas_draw(&self, canvas: NativeHandle, clear: bool) -> NativeStatus {
        self.call("canvas_draw", |s| {
            let c = s.canvas_mut(canvas)?;
            let target = c.target.ok_or(NativeStatus::InsufficientCondition)?;
            let Target::Sw(pt) = target else {
                return Ok(());
            };
            let viewport = c.viewport;
            let paints = c.paints.clone();

            let mut clip = (0, 0, pt.width, pt.height);
            if let Some((x, y, w, h)) = viewport {
                let clamp = |v: i32, max: u32| (v.max(0) as u32).min(max);
                clip = (
                    clamp(x, pt.width),
                    clamp(y, pt.height),
                    clamp(x.saturating_add(w), pt.width),
                    clamp(y.saturating_add(h), pt.height),
                );
            }

            // SAFETY: `sw_canvas_target` checked that `len` covers `stride * height`, and the
            // caller keeps the buffer alive and unaliased until the canvas is re-targeted or
            // deleted.
            let pixels = unsafe { std::slice::from_raw_parts_mut(pt.ptr.as_ptr(), pt.len) };
            let mut raster = Raster { pixels, stride: pt.stride as usize, cs: pt.color_space, clip };
            if clear {
                raster.clear();
            }
            for paint in paints {
                render_paint(s, paint, Affine::IDENTITY, 1.0, &mut raster);
            }
            Ok(())
        })
    }

    fn canvas_sync(&self, canvas: NativeHandle) -> NativeStatus {
        self.call("canvas_sync", |s| s.canvas_mut(canvas).map(|_| ()))
    }

    fn canvas_set_viewport(&self, canvas: NativeHandle, x: i32, y: i32, w: i32, h: i32) -> NativeStatus {
        self.call("canvas_set_viewport", |s| {
            if w <= 0 || h <= 0 {
                return Err(NativeStatus::InvalidArgument);
            }
            s.canvas_mut(canvas)?.viewport = Some((x, y, w, h));
            Ok(())
        })
    }

    fn paint_ref(&self, paint: NativeHandle) -> NativeStatus {
        self.call("paint_ref", |s| s.retain(paint))
    }

    fn paint_unref(&self, paint: NativeHandle, free: bool) -> NativeStatus {
        self.call("paint_unref", |s| s.unref(paint, free))
    }

    fn paint_get_ref(&self, paint: NativeHandle) -> u16 {
        let state = self.state.borrow();
        state.objects.get(&paint).map_or(0, |o| o.refs)
    }

    fn paint_del(&self, paint: NativeHandle) -> NativeStatus {
        self.call("paint_del", |s| {
            let obj = s.object_mut(paint)?;
            match &obj.body {
                Body::Picture(p) if p.owner.is_some() => return Err(NativeStatus::InsufficientCondition),
                body if body.paint().is_none() => return Err(NativeStatus::InvalidArgument),
                _ => {}
            }
            if obj.refs > 0 {
                return Err(NativeStatus::InsufficientCondition);
            }
            s.free(paint);
            Ok(())
        })
    }

    fn paint_translate(&self, paint: NativeHandle, x: f32, y: f32) -> NativeStatus {
        self.call("paint_translate", |s| {
            let p = s.paint_mut(paint)?;
            p.tx = x;
            p.ty = y;
            Ok(())
        })
    }

    fn paint_rotate(&self, paint: NativeHandle, degree: f32) -> NativeStatus {
        self.call("paint_rotate", |s| {
            s.paint_mut(paint)?.degrees = degree;
            Ok(())
        })
    }

    fn paint_scale(&self, paint: NativeHandle, factor: f32) -> NativeStatus {
        self.call("paint_scale", |s| {
            if !factor.is_finite() {
                return Err(NativeStatus::InvalidArgument);
            }
            s.paint_mut(paint)?.scale = factor;
            Ok(())
        })
    }

    fn paint_set_opacity(&self, paint: NativeHandle, opacity: u8) -> NativeStatus {
        self.call("paint_set_opacity", |s| {
            s.paint_mut(paint)?.opacity = opacity;
            Ok(())
        })
    }

    fn paint_set_visible(&self, paint: NativeHandle, visible: bool) -> NativeStatus {
        self.call("paint_set_visible", |s| {
            s.paint_mut(paint)?.visible = visible;
            Ok(())
        })
    }

    fn paint_get_aabb(&self, paint: NativeHandle, out: &mut Bounds) -> NativeStatus {
        self.read("paint_get_aabb", out, |s| {
            if !s.is_paint(paint) {
                return Err(NativeStatus::InvalidArgument);
            }
            let (x0, y0, x1, y1) = s.bounds(paint, Affine::IDENTITY).ok_or(NativeStatus::InsufficientCondition)?;
            Ok(Bounds { x: x0, y: y0, w: x1 - x0, h: y1 - y0 })
        })
    }

    fn shape_new(&self) -> NativeHandle {
        self.create("shape_new", |s| {
            s.alloc(Body::Shape(ShapeBody {
                paint: PaintProps::default(),
                geometry: Vec::new(),
                fill: Fill::None,
                stroke_width: 0.0,
                stroke_color: [0, 0, 0, 0],
            }))
        })
    }

    fn shape_append_rect(&self, shape: NativeHandle, x: f32, y: f32, w: f32, h: f32, rx: f32, ry: f32) -> NativeStatus {
        self.call("shape_append_rect", |s| {
            if w < 0.0 || h < 0.0 {
                return Err(NativeStatus::InvalidArgument);
            }
            s.shape_mut(shape)?.geometry.push(Geom::Rect { x, y, w, h, rx, ry });
            Ok(())
        })
    }

    fn shape_append_circle(&self, shape: NativeHandle, cx: f32, cy: f32, rx: f32, ry: f32) -> NativeStatus {
        self.call("shape_append_circle", |s| {
            if rx < 0.0 || ry < 0.0 {
                return Err(NativeStatus::InvalidArgument);
            }
            s.shape_mut(shape)?.geometry.push(Geom::Ellipse { cx, cy, rx, ry });
            Ok(())
        })
    }

    fn shape_reset(&self, shape: NativeHandle) -> NativeStatus {
        self.call("shape_reset", |s| {
            s.shape_mut(shape)?.geometry.clear();
            Ok(())
        })
    }

    fn shape_set_fill_color(&self, shape: NativeHandle, r: u8, g: u8, b: u8, a: u8) -> NativeStatus {
        self.call("shape_set_fill_color", |s| {
            let old = std::mem::replace(&mut s.shape_mut(shape)?.fill, Fill::Solid([r, g, b, a]));
            if let Fill::Gradient(old) = old {
                s.free(old);
            }
            Ok(())
        })
    }

    fn shape_set_gradient(&self, shape: NativeHandle, gradient: NativeHandle) -> NativeStatus {
        self.call("shape_set_gradient", |s| {
            s.gradient_mut(gradient)?;
            let old = std::mem::replace(&mut s.shape_mut(shape)?.fill, Fill::Gradient(gradient));
            if let Fill::Gradient(old) = old {
                if old != gradient {
                    s.free(old);
                }
            }
            Ok(())
        })
    }

    fn shape_set_stroke_width(&self, shape: NativeHandle, width: f32) -> NativeStatus {
        self.call("shape_set_stroke_width", |s| {
            if width < 0.0 {
                return Err(NativeStatus::InvalidArgument);
            }
            s.shape_mut(shape)?.stroke_width = width;
            Ok(())
        })
    }

    fn shape_set_stroke_color(&self, shape: NativeHandle, r: u8, g: u8, b: u8, a: u8) -> NativeStatus {
        self.call("shape_set_stroke_color", |s| {
            s.shape_mut(shape)?.stroke_color = [r, g, b, a];
            Ok(())
        })
    }

    fn scene_new(&self) -> NativeHandle {
        self.create("scene_new", |s| {
            s.alloc(Body::Scene(SceneBody { paint: PaintProps::default(), children: Vec::new() }))
        })
    }

    fn scene_push(&self, scene: NativeHandle, paint: NativeHandle) -> NativeStatus {
        self.call("scene_push", |s| {
            if scene == paint {
                return Err(NativeStatus::InvalidArgument);
            }
            s.scene_mut(scene)?;
            s.retain(paint)?;
            s.scene_mut(scene)?.children.push(paint);
            Ok(())
        })
    }

    fn scene_remove(&self, scene: NativeHandle, paint: Option<NativeHandle>) -> NativeStatus {
        self.call("scene_remove", |s| {
            let sc = s.scene_mut(scene)?;
            let removed = match paint {
                Some(p) => {
                    let idx = sc.children.iter().position(|&x| x == p).ok_or(NativeStatus::InvalidArgument)?;
                    vec![sc.children.remove(idx)]
                }
                None => std::mem::take(&mut sc.children),
            };
            s.release_children(&removed);
            Ok(())
        })
    }

    fn linear_gradient_new(&self) -> NativeHandle {
        self.create("linear_gradient_new", |s| {
            s.alloc(Body::Gradient(GradientBody {
                shape: GradientShape::Linear { x1: 0.0, y1: 0.0, x2: 0.0, y2: 0.0 },
                stops: Vec::new(),
                spread: GradientSpread::Pad,
            }))
        })
    }

    fn linear_gradient_set(&self, gradient: NativeHandle, x1: f32, y1: f32, x2: f32, y2: f32) -> NativeStatus {
        self.call("linear_gradient_set", |s| {
            let g = s.gradient_mut(gradient)?;
            if !matches!(g.shape, GradientShape::Linear { .. }) {
                return Err(NativeStatus::InvalidArgument);
            }
            g.shape = GradientShape::Linear { x1, y1, x2, y2 };
            Ok(())
        })
    }

    fn radial_gradient_new(&self) -> NativeHandle {
        self.create("radial_gradient_new", |s| {
            s.alloc(Body::Gradient(GradientBody {
                shape: GradientShape::Radial { cx: 0.0, cy: 0.0, r: 0.0 },
                stops: Vec::new(),
                spread: GradientSpread::Pad,
            }))
        })
    }

    fn radial_gradient_set(&self, gradient: NativeHandle, cx: f32, cy: f32, r: f32) -> NativeStatus {
        self.call("radial_gradient_set", |s| {
            if r < 0.0 {
                return Err(NativeStatus::InvalidArgument);
            }
            let g = s.gradient_mut(gradient)?;
            if !matches!(g.shape, GradientShape::Radial { .. }) {
                return Err(NativeStatus::InvalidArgument);
            }
            g.shape = GradientShape::Radial { cx, cy, r };
            Ok(())
        })
    }

    fn gradient_set_color_stops(&self, gradient: NativeHandle, stops: &[u8]) -> NativeStatus {
        self.call("gradient_set_color_stops", |s| {
            let stops: &[ColorStop] = bytemuck::try_cast_slice(stops).map_err(|_| NativeStatus::InvalidArgument)?;
            let mut stops = stops.to_vec();
            stops.sort_by(|a, b| a.offset.total_cmp(&b.offset));
            s.gradient_mut(gradient)?.stops = stops;
            Ok(())
        })
    }

    fn gradient_set_spread(&self, gradient: NativeHandle, spread: GradientSpread) -> NativeStatus {
        self.call("gradient_set_spread", |s| {
            s.gradient_mut(gradient)?.spread = spread;
            Ok(())
        })
    }

    fn gradient_duplicate(&self, gradient: NativeHandle) -> NativeHandle {
        self.create("gradient_duplicate", |s| {
            let copy = match s.gradient_mut(gradient) {
                Ok(g) => g.clone(),
                Err(_) => return NativeHandle::NULL,
            };
            s.alloc(Body::Gradient(copy))
        })
    }

    fn gradient_del(&self, gradient: NativeHandle) -> NativeStatus {
        self.call("gradient_del", |s| {
            s.gradient_mut(gradient)?;
            s.free(gradient);
            Ok(())
        })
    }

    fn text_new(&self) -> NativeHandle {
        self.create("text_new", |s| {
            s.alloc(Body::Text(TextBody {
                paint: PaintProps::default(),
                font: None,
                size: 12.0,
                text: String::new(),
                color: [0, 0, 0],
            }))
        })
    }

    fn text_set_font(&self, text: NativeHandle, name: &str) -> NativeStatus {
        self.call("text_set_font", |s| {
            if !s.fonts.contains(name) {
                return Err(NativeStatus::InsufficientCondition);
            }
            s.text_mut(text)?.font = Some(name.to_string());
            Ok(())
        })
    }

    fn text_set_size(&self, text: NativeHandle, size: f32) -> NativeStatus {
        self.call("text_set_size", |s| {
            if size <= 0.0 {
                return Err(NativeStatus::InvalidArgument);
            }
            s.text_mut(text)?.size = size;
            Ok(())
        })
    }

    fn text_set_text(&self, text: NativeHandle, utf8: &str) -> NativeStatus {
        self.call("text_set_text", |s| {
            s.text_mut(text)?.text = utf8.to_string();
            Ok(())
        })
    }

    fn text_set_fill_color(&self, text: NativeHandle, r: u8, g: u8, b: u8) -> NativeStatus {
        self.call("text_set_fill_color", |s| {
            s.text_mut(text)?.color = [r, g, b];
            Ok(())
        })
    }

    fn font_load(&self, name: &str, data: &[u8], format: &str) -> NativeStatus {
        self.call("font_load", |s| {
            if name.is_empty() || data.is_empty() {
                return Err(NativeStatus::InvalidArgument);
            }
            if !matches!(format, "ttf" | "otf" | "ttc" | "") {
                return Err(NativeStatus::NotSupported);
            }
            s.fonts.insert(name.to_string());
            Ok(())
        })
    }

    fn font_unload(&self, name: &str) -> NativeStatus {
        self.call("font_unload", |s| {
            if s.fonts.remove(name) {
                Ok(())
            } else {
                Err(NativeStatus::InsufficientCondition)
            }
        })
    }

    fn picture_new(&self) -> NativeHandle {
        self.create("picture_new", |s| {
            s.alloc(Body::Picture(PictureBody {
                paint: PaintProps::default(),
                loaded: false,
                size: (0.0, 0.0),
                timeline: None,
                owner: None,
            }))
        })
    }

    fn picture_load(&self, picture: NativeHandle, data: &[u8], format: &str) -> NativeStatus {
        self.call("picture_load", |s| {
            if data.is_empty() {
                return Err(NativeStatus::InvalidArgument);
            }
            let (size, timeline) = match format {
                "svg" => {
                    let text = std::str::from_utf8(data).map_err(|_| NativeStatus::InvalidArgument)?;
                    let w = markup_dimension(text, "width").unwrap_or(100.0);
                    let h = markup_dimension(text, "height").unwrap_or(100.0);
                    ((w, h), None)
                }
                "lottie" | "lottie+json" | "json" => {
                    let doc: serde_json::Value =
                        serde_json::from_slice(data).map_err(|_| NativeStatus::InvalidArgument)?;
                    let num = |key: &str| doc.get(key).and_then(serde_json::Value::as_f64).map(|v| v as f32);
                    let (w, h) = (num("w").unwrap_or(0.0), num("h").unwrap_or(0.0));
                    let frames = num("op").unwrap_or(0.0) - num("ip").unwrap_or(0.0);
                    let rate = num("fr").unwrap_or(0.0);
                    ((w, h), Some((frames.max(0.0), rate)))
                }
                "png" | "jpg" | "jpeg" | "webp" | "raw" => ((100.0, 100.0), None),
                _ => return Err(NativeStatus::NotSupported),
            };
            let p = s.picture_mut(picture)?;
            p.loaded = true;
            p.size = size;
            p.timeline = timeline;
            Ok(())
        })
    }

    fn picture_get_size(&self, picture: NativeHandle, w: &mut f32, h: &mut f32) -> NativeStatus {
        let mut size = (*w, *h);
        let status = self.read("picture_get_size", &mut size, |s| {
            let p = s.picture_mut(picture)?;
            if !p.loaded {
                return Err(NativeStatus::InsufficientCondition);
            }
            Ok(p.size)
        });
        (*w, *h) = size;
        status
    }

    fn picture_set_size(&self, picture: NativeHandle, w: f32, h: f32) -> NativeStatus {
        self.call("picture_set_size", |s| {
            let p = s.picture_mut(picture)?;
            if !p.loaded {
                return Err(NativeStatus::InsufficientCondition);
            }
            p.size = (w, h);
            Ok(())
        })
    }

    fn animation_new(&self) -> NativeHandle {
        self.create("animation_new", |s| {
            let picture = s.alloc(Body::Picture(PictureBody {
                paint: PaintProps::default(),
                loaded: false,
                size: (0.0, 0.0),
                timeline: None,
                owner: None,
            }));
            let animation = s.alloc(Body::Animation(AnimationBody { picture, frame: 0.0 }));
            if let Ok(p) = s.picture_mut(picture) {
                p.owner = Some(animation);
            }
            animation
        })
    }

    fn animation_get_picture(&self, animation: NativeHandle) -> NativeHandle {
        self.create("animation_get_picture", |s| {
            s.animation_mut(animation).map_or(NativeHandle::NULL, |a| a.picture)
        })
    }

    fn animation_set_frame(&self, animation: NativeHandle, frame: f32) -> NativeStatus {
        self.call("animation_set_frame", |s| {
            let picture = s.animation_mut(animation)?.picture;
            let (total, _) = s.picture_mut(picture)?.timeline.ok_or(NativeStatus::InsufficientCondition)?;
            if !(0.0..=total).contains(&frame) {
                return Err(NativeStatus::InvalidArgument);
            }
            let a = s.animation_mut(animation)?;
            if a.frame == frame {
                return Err(NativeStatus::InsufficientCondition);
            }
            a.frame = frame;
            Ok(())
        })
    }

    fn animation_get_frame(&self, animation: NativeHandle, out: &mut f32) -> NativeStatus {
        self.read("animation_get_frame", out, |s| Ok(s.animation_mut(animation)?.frame))
    }

    fn animation_get_total_frame(&self, animation: NativeHandle, out: &mut f32) -> NativeStatus {
        self.read("animation_get_total_frame", out, |s| {
            let picture = s.animation_mut(animation)?.picture;
            Ok(s.picture_mut(picture)?.timeline.map_or(0.0, |(total, _)| total))
        })
    }

    fn animation_get_duration(&self, animation: NativeHandle, out: &mut f32) -> NativeStatus {
        self.read("animation_get_duration", out, |s| {
            let picture = s.animation_mut(animation)?.picture;
            Ok(match s.picture_mut(picture)?.timeline {
                Some((total, rate)) if rate > 0.0 => total / rate,
                _ => 0.0,
            })
        })
    }

    fn animation_del(&self, animation: NativeHandle) -> NativeStatus {
        self.call("animation_del", |s| {
            s.animation_mut(animation)?;
            s.free(animation);
            Ok(())
        })
    }
}
