use crate::engine::CanvasKit;
use crate::errors::{KitError, KitResult};
use crate::lifetime::{HandleCell, ObjectKind, Ownership, WrapperId};
use crate::native::{self, NativeHandle, NativeStatus};
use crate::paint::Picture;
use std::rc::Rc;

/// Frame-based animation with an embedded picture.
///
/// The embedded picture belongs to the animation: it is never released on its own and
/// becomes disposed when the animation is released. As long as any clone of
/// [`Animation::picture`] is alive (directly or inside a container) the animation is
/// kept alive too.
#[derive(Debug)]
pub struct Animation {
    cell: Rc<HandleCell>,
    picture: Picture,
}

impl Animation {
    pub fn new(kit: &CanvasKit) -> KitResult<Self> {
        let shared = kit.shared();
        let handle = native::non_null("animation_new", shared.native.animation_new())?;
        let cell = HandleCell::new(shared, ObjectKind::Animation, handle, Ownership::Owned)?;

        let picture = native::non_null("animation_get_picture", shared.native.animation_get_picture(handle))?;
        let picture = HandleCell::new(shared, ObjectKind::Picture, picture, Ownership::Borrowed { owner: cell.id() })?;
        picture.retain(Rc::clone(&cell));

        Ok(Self {
            cell,
            picture: Picture::from_cell(picture),
        })
    }

    pub fn id(&self) -> WrapperId {
        self.cell.id()
    }

    pub fn handle(&self) -> KitResult<NativeHandle> {
        self.cell.handle()
    }

    /// Embedded picture, for drawing and for loading the animation document.
    pub fn picture(&self) -> &Picture {
        &self.picture
    }

    /// Loads an animation document into the embedded picture.
    pub fn load(&self, data: &[u8], format: &str) -> KitResult<&Self> {
        self.handle()?;
        self.picture.load(data, format)?;
        Ok(self)
    }

    /// Moves to `frame`. Returns `Ok(false)` when nothing changed, i.e. the frame is
    /// already current or no timeline has been loaded.
    pub fn set_frame(&self, frame: f32) -> KitResult<bool> {
        match self.cell.forward("animation_set_frame", |n, a| n.animation_set_frame(a, frame)) {
            Ok(()) => Ok(true),
            Err(KitError::NativeCall { status: NativeStatus::InsufficientCondition, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn frame(&self) -> KitResult<f32> {
        let mut frame = 0.0;
        self.cell.forward("animation_get_frame", |n, a| n.animation_get_frame(a, &mut frame))?;
        Ok(frame)
    }

    pub fn total_frames(&self) -> KitResult<f32> {
        let mut total = 0.0;
        self.cell.forward("animation_get_total_frame", |n, a| n.animation_get_total_frame(a, &mut total))?;
        Ok(total)
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> KitResult<f32> {
        let mut seconds = 0.0;
        self.cell.forward("animation_get_duration", |n, a| n.animation_get_duration(a, &mut seconds))?;
        Ok(seconds)
    }

    /// Releases the animation and its embedded picture now.
    pub fn dispose(&self) -> KitResult<bool> {
        self.cell.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.cell.is_disposed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::headless::{HeadlessEngine, HeadlessKind};
    use crate::paint::Paint;
    use crate::Platforms;

    const DOC: &[u8] = br#"{"w": 64, "h": 32, "ip": 0, "op": 60, "fr": 30}"#;

    fn kit() -> (HeadlessEngine, CanvasKit) {
        let engine = HeadlessEngine::new();
        let kit = CanvasKit::new(None, Box::new(engine.clone()), Platforms::none()).unwrap();
        (engine, kit)
    }

    #[test]
    fn timeline_comes_from_the_loaded_document() {
        let (_engine, kit) = kit();
        let anim = Animation::new(&kit).unwrap();
        anim.load(DOC, "lottie").unwrap();

        assert_eq!(anim.total_frames().unwrap(), 60.0);
        assert_eq!(anim.duration().unwrap(), 2.0);
        assert_eq!(anim.picture().size().unwrap(), (64.0, 32.0));

        assert!(anim.set_frame(12.0).unwrap());
        assert!(!anim.set_frame(12.0).unwrap());
        assert_eq!(anim.frame().unwrap(), 12.0);
        assert!(anim.set_frame(120.0).is_err());
    }

    #[test]
    fn embedded_picture_is_released_with_the_animation() {
        let (engine, kit) = kit();
        let anim = Animation::new(&kit).unwrap();
        let picture = anim.picture().handle().unwrap();

        assert!(anim.dispose().unwrap());
        assert!(anim.picture().is_disposed());
        assert!(!engine.is_live(picture));

        drop(anim);
        let stats = kit.lifetime_stats();
        assert_eq!(stats.releases_of(ObjectKind::Animation), 1);
        assert_eq!(stats.releases_of(ObjectKind::Picture), 0);
        assert_eq!(engine.over_releases(), 0);
    }

    #[test]
    fn embedded_picture_cannot_be_disposed_on_its_own() {
        let (engine, kit) = kit();
        let anim = Animation::new(&kit).unwrap();
        assert!(!anim.picture().dispose().unwrap());
        assert!(!anim.picture().is_disposed());
        assert!(!anim.is_disposed());

        anim.load(DOC, "lottie").unwrap();
        let scene = crate::paint::Scene::new(&kit).unwrap();
        scene.add(anim.picture()).unwrap();
        assert_eq!(scene.len(), 1);
        assert_eq!(engine.over_releases(), 0);
    }

    #[test]
    fn dropping_releases_everything_once() {
        let (engine, kit) = kit();
        drop(Animation::new(&kit).unwrap());
        assert_eq!(engine.live(HeadlessKind::Animation), 0);
        assert_eq!(engine.live(HeadlessKind::Picture), 0);
        assert_eq!(kit.lifetime_stats().live, 0);
    }
}
