use crate::engine::CanvasKit;
use crate::errors::KitResult;
use crate::lifetime::{HandleCell, ObjectKind};
use crate::paint::{adopt_paint, share_paint, Paint};
use std::rc::Rc;

/// Single run of text drawn with a loaded font.
///
/// New text objects use the kit's default font when one is configured.
#[derive(Debug)]
pub struct Text {
    cell: Rc<HandleCell>,
}

impl Text {
    pub fn new(kit: &CanvasKit) -> KitResult<Self> {
        let handle = kit.shared().native.text_new();
        let text = Self { cell: adopt_paint(kit, ObjectKind::Text, "text_new", handle)? };
        if let Some(font) = kit.shared().default_font.as_deref() {
            text.set_font(font)?;
        }
        Ok(text)
    }

    /// Selects a font previously loaded with [`CanvasKit::load_font`].
    pub fn set_font(&self, name: &str) -> KitResult<&Self> {
        self.cell.forward("text_set_font", |n, t| n.text_set_font(t, name))?;
        Ok(self)
    }

    pub fn set_size(&self, size: f32) -> KitResult<&Self> {
        self.cell.forward("text_set_size", |n, t| n.text_set_size(t, size))?;
        Ok(self)
    }

    pub fn set_text(&self, utf8: &str) -> KitResult<&Self> {
        self.cell.forward("text_set_text", |n, t| n.text_set_text(t, utf8))?;
        Ok(self)
    }

    pub fn set_fill_color(&self, r: u8, g: u8, b: u8) -> KitResult<&Self> {
        self.cell.forward("text_set_fill_color", |n, t| n.text_set_fill_color(t, r, g, b))?;
        Ok(self)
    }

    pub fn duplicate(&self) -> KitResult<Text> {
        Ok(Self { cell: share_paint(&self.cell)? })
    }
}

impl Paint for Text {
    fn cell(&self) -> &Rc<HandleCell> {
        &self.cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::headless::HeadlessEngine;
    use crate::native::NativeStatus;
    use crate::{KitConfig, KitError, Platforms};

    #[test]
    fn default_font_is_applied_and_unloaded_with_the_kit() {
        let engine = HeadlessEngine::new();
        let config = KitConfig::builder()
            .default_font("sans", vec![0u8; 32], "ttf")
            .build()
            .unwrap();
        let kit = CanvasKit::new(Some(config), Box::new(engine.clone()), Platforms::none()).unwrap();
        assert!(engine.font_loaded("sans"));

        let text = Text::new(&kit).unwrap();
        text.set_text("hello").unwrap().set_size(24.0).unwrap();
        assert_eq!(engine.text_content(text.handle().unwrap()).as_deref(), Some("hello"));

        drop(text);
        drop(kit);
        assert!(!engine.font_loaded("sans"));
        assert_eq!(engine.engine_refs(), 0);
    }

    #[test]
    fn unknown_font_is_a_native_failure() {
        let engine = HeadlessEngine::new();
        let kit = CanvasKit::new(None, Box::new(engine), Platforms::none()).unwrap();
        let text = Text::new(&kit).unwrap();
        match text.set_font("missing") {
            Err(KitError::NativeCall { op: "text_set_font", status, .. }) => {
                assert_eq!(status, NativeStatus::InsufficientCondition)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
