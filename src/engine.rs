//! Kit entry point.
//!
//! A [`CanvasKit`] owns the connection to the native engine. It initializes the engine
//! once, holds the configuration, the lifetime registries and the negotiation context
//! shared by every negotiated-GPU session, and creates backend sessions and render
//! surfaces. Wrapper objects and surfaces keep the kit state alive through an `Rc`, so
//! the engine is only shut down after the last of them is gone.

use crate::backend::headless::HeadlessPlatform;
use crate::backend::negotiation::WgContext;
use crate::backend::platform::{GlPlatform, WgPlatform};
use crate::backend::{BackendKind, BackendSession, BackendSet};
use crate::config::KitConfig;
use crate::errors::KitResult;
use crate::lifetime::{LifetimeManager, LifetimeStats};
use crate::native::{self, NativeApi, NativeHandle};
use crate::render::RenderSurface;
use log::{debug, error, info};
use std::rc::Rc;

/// Host services used by the GPU backends. Either may be absent, in which case the
/// corresponding backend reports itself unavailable.
#[derive(Clone, Default)]
pub struct Platforms {
    pub gl: Option<Rc<dyn GlPlatform>>,
    pub wg: Option<Rc<dyn WgPlatform>>,
}

impl Platforms {
    /// No GPU services. Only the software backend can be brought up.
    pub fn none() -> Self {
        Self::default()
    }

    /// Both GPU services backed by the same in-memory platform.
    pub fn headless(platform: &HeadlessPlatform) -> Self {
        Self {
            gl: Some(Rc::new(platform.clone())),
            wg: Some(Rc::new(platform.clone())),
        }
    }
}

/// State shared by the kit and everything it creates.
pub(crate) struct KitShared {
    pub(crate) native: Box<dyn NativeApi>,
    pub(crate) lifetimes: LifetimeManager,
    pub(crate) config: KitConfig,
    pub(crate) gl: Option<Rc<dyn GlPlatform>>,
    pub(crate) wg: Rc<WgContext>,
    /// Name of the font loaded at start-up, unloaded at shutdown.
    pub(crate) default_font: Option<String>,
}

impl Drop for KitShared {
    fn drop(&mut self) {
        if let Some(name) = self.default_font.take() {
            let status = self.native.font_unload(&name);
            if !status.is_success() {
                error!("font_unload('{name}') returned {status}");
            }
        }
        self.wg.term();
        let status = self.native.engine_term();
        if !status.is_success() {
            error!("engine_term returned {status}");
        }
        debug!("kit shut down");
    }
}

pub struct CanvasKit {
    shared: Rc<KitShared>,
}

impl CanvasKit {
    /// Initializes the native engine.
    ///
    /// If `config` is `None`, [`KitConfig::default`] is used. A configured default font
    /// is loaded before this returns.
    ///
    /// ```
    /// # use canvaskit::native::headless::HeadlessEngine;
    /// # use canvaskit::{CanvasKit, Platforms};
    /// let kit = CanvasKit::new(None, Box::new(HeadlessEngine::new()), Platforms::none()).unwrap();
    /// assert_eq!(kit.lifetime_stats().live, 0);
    /// ```
    pub fn new(config: Option<KitConfig>, native: Box<dyn NativeApi>, platforms: Platforms) -> KitResult<Self> {
        let config = config.unwrap_or_default();
        config.validate()?;

        native::check("engine_init", NativeHandle::NULL, native.engine_init())?;

        let wg = Rc::new(WgContext::new(
            platforms.wg,
            config.power_preference,
            config.device_label.clone(),
        ));
        let font = config.default_font.clone();
        let mut shared = KitShared {
            native,
            lifetimes: LifetimeManager::new(),
            config,
            gl: platforms.gl,
            wg,
            default_font: None,
        };

        // Dropping `shared` on failure terminates the engine again.
        if let Some(font) = font {
            let status = shared.native.font_load(&font.name, &font.data, &font.format);
            native::check("font_load", NativeHandle::NULL, status)?;
            shared.default_font = Some(font.name);
        }

        info!("kit initialized, backends compiled in: {:?}", BackendSet::compiled());
        Ok(Self { shared: Rc::new(shared) })
    }

    /// Starts initialization of `kind`. Drive it with [`BackendSession::poll`].
    ///
    /// Every negotiated-GPU session shares the kit's negotiation context, so a second
    /// session is ready as soon as the first one is.
    pub fn initialize_backend(&self, kind: BackendKind) -> BackendSession {
        let wg = match kind {
            BackendKind::WebGpu => Some(Rc::clone(&self.shared.wg)),
            BackendKind::Software | BackendKind::Gl => None,
        };
        BackendSession::new(kind, wg)
    }

    /// Creates a surface bound to the target named by `descriptor` (a selector or id
    /// understood by the platform; ignored by the software backend).
    pub fn create_surface(&self, session: &BackendSession, descriptor: &str, width: u32, height: u32) -> KitResult<RenderSurface> {
        RenderSurface::create(&self.shared, session, descriptor, width, height)
    }

    /// Loads font data under `name` so text objects can select it.
    pub fn load_font(&self, name: &str, data: &[u8], format: &str) -> KitResult<()> {
        let status = self.shared.native.font_load(name, data, format);
        native::check("font_load", NativeHandle::NULL, status)?;
        debug!("font '{name}' loaded ({} bytes)", data.len());
        Ok(())
    }

    pub fn unload_font(&self, name: &str) -> KitResult<()> {
        native::check("font_unload", NativeHandle::NULL, self.shared.native.font_unload(name))
    }

    pub fn lifetime_stats(&self) -> LifetimeStats {
        self.shared.lifetimes.stats()
    }

    pub fn config(&self) -> &KitConfig {
        &self.shared.config
    }

    /// Backends compiled into this build.
    pub fn compiled_backends(&self) -> BackendSet {
        BackendSet::compiled()
    }

    pub(crate) fn shared(&self) -> &Rc<KitShared> {
        &self.shared
    }
}
