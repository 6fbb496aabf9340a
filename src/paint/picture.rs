use crate::engine::CanvasKit;
use crate::errors::KitResult;
use crate::lifetime::{HandleCell, ObjectKind};
use crate::paint::{adopt_paint, share_paint, Paint};
use std::rc::Rc;

/// Image or vector document loaded from memory.
#[derive(Debug)]
pub struct Picture {
    cell: Rc<HandleCell>,
}

impl Picture {
    pub fn new(kit: &CanvasKit) -> KitResult<Self> {
        let handle = kit.shared().native.picture_new();
        Ok(Self { cell: adopt_paint(kit, ObjectKind::Picture, "picture_new", handle)? })
    }

    pub(crate) fn from_cell(cell: Rc<HandleCell>) -> Self {
        Self { cell }
    }

    /// Loads `data`. `format` is passed to the engine as is (`"svg"`, `"png"`, `"lottie"`, ...).
    pub fn load(&self, data: &[u8], format: &str) -> KitResult<&Self> {
        self.cell.forward("picture_load", |n, p| n.picture_load(p, data, format))?;
        Ok(self)
    }

    /// Current `(width, height)`.
    pub fn size(&self) -> KitResult<(f32, f32)> {
        let (mut w, mut h) = (0.0, 0.0);
        self.cell.forward("picture_get_size", |n, p| n.picture_get_size(p, &mut w, &mut h))?;
        Ok((w, h))
    }

    pub fn set_size(&self, w: f32, h: f32) -> KitResult<&Self> {
        self.cell.forward("picture_set_size", |n, p| n.picture_set_size(p, w, h))?;
        Ok(self)
    }

    pub fn duplicate(&self) -> KitResult<Picture> {
        Ok(Self { cell: share_paint(&self.cell)? })
    }
}

impl Paint for Picture {
    fn cell(&self) -> &Rc<HandleCell> {
        &self.cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::headless::HeadlessEngine;
    use crate::Platforms;

    #[test]
    fn svg_load_and_resize() {
        let kit = CanvasKit::new(None, Box::new(HeadlessEngine::new()), Platforms::none()).unwrap();
        let picture = Picture::new(&kit).unwrap();
        picture.load(br#"<svg width="40" height="30"/>"#, "svg").unwrap();
        assert_eq!(picture.size().unwrap(), (40.0, 30.0));
        picture.set_size(80.0, 60.0).unwrap();
        assert_eq!(picture.size().unwrap(), (80.0, 60.0));
    }

    #[test]
    fn unsupported_format_fails() {
        let kit = CanvasKit::new(None, Box::new(HeadlessEngine::new()), Platforms::none()).unwrap();
        let picture = Picture::new(&kit).unwrap();
        assert!(picture.load(b"GIF89a", "gif").is_err());
    }
}
