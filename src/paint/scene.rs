use crate::engine::CanvasKit;
use crate::errors::KitResult;
use crate::lifetime::{HandleCell, ObjectKind};
use crate::paint::{adopt_paint, share_paint, Paint};
use std::rc::Rc;

/// Group of paints drawn with a shared transform and opacity.
///
/// A scene keeps every member's wrapper cell alive while the native scene holds the
/// member, so a member dropped or disposed by the caller keeps rendering inside it.
#[derive(Debug)]
pub struct Scene {
    cell: Rc<HandleCell>,
}

impl Scene {
    pub fn new(kit: &CanvasKit) -> KitResult<Self> {
        let handle = kit.shared().native.scene_new();
        Ok(Self { cell: adopt_paint(kit, ObjectKind::Scene, "scene_new", handle)? })
    }

    pub fn add(&self, paint: &dyn Paint) -> KitResult<&Self> {
        let child = paint.handle()?;
        self.cell.forward("scene_push", |n, s| n.scene_push(s, child))?;
        self.cell.retain(Rc::clone(paint.cell()));
        Ok(self)
    }

    /// Removes one member, or every member when `paint` is `None`.
    pub fn remove(&self, paint: Option<&dyn Paint>) -> KitResult<&Self> {
        match paint {
            Some(paint) => {
                let id = paint.cell().id();
                let child = match self.cell.member(id) {
                    Some(member) => member.raw_handle(),
                    None => paint.handle()?,
                };
                self.cell.forward("scene_remove", |n, s| n.scene_remove(s, Some(child)))?;
                self.cell.release_member(id);
            }
            None => {
                self.cell.forward("scene_remove", |n, s| n.scene_remove(s, None))?;
                self.cell.release_members();
            }
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.cell.member_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duplicate(&self) -> KitResult<Scene> {
        Ok(Self { cell: share_paint(&self.cell)? })
    }
}

impl Paint for Scene {
    fn cell(&self) -> &Rc<HandleCell> {
        &self.cell
    }
}
