//! Kit configuration.
//!
//! `KitConfig` controls how a [`CanvasKit`](crate::CanvasKit) talks to the native
//! engine and to the host: the pixel layout the native rasterizer writes, the layout
//! frames are converted to for the host, limits on surface sizes, and the parameters
//! used when negotiating or creating GPU resources.
//!
//! `KitConfig` provides defaults via [`Default`] and a fluent
//! [`KitConfig::builder()`] with validation.
//!
//! # Examples
//!
//! ```rust
//! use canvaskit::config::KitConfig;
//! use canvaskit::render::HostPixelLayout;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = KitConfig::builder()
//!     .host_layout(HostPixelLayout::Bgra8)
//!     .max_surface_dim(4096)
//!     .device_label("Playground Device")
//!     .build()?;
//! assert_eq!(cfg.max_surface_dim, 4096);
//! # Ok(()) }
//! ```
//!
//! # Errors
//!
//! Builder validation returns [`KitConfigError`] when `max_surface_dim` is zero or
//! above [`MAX_SURFACE_DIM_LIMIT`], the device label is empty, the requested WebGL
//! major version is unknown, or the default font has no name or no data.

use crate::backend::platform::{GlContextAttributes, PowerPreference};
use crate::native::ColorSpace;
use crate::render::HostPixelLayout;
use std::fmt;

const DEFAULT_DEVICE_LABEL: &str = "ThorVG Device";
const DEFAULT_MAX_SURFACE_DIM: u32 = 16384;
/// Largest accepted `max_surface_dim`. Keeps row strides and viewport extents within
/// the integer ranges the native engine uses.
pub const MAX_SURFACE_DIM_LIMIT: u32 = 1 << 15;

/// Font bytes that are loaded into the native engine when the kit starts.
#[derive(Clone)]
pub struct FontSource {
    /// Name under which text objects refer to the font.
    pub name: String,
    pub data: Vec<u8>,
    /// Format tag forwarded verbatim to the native loader (e.g. `"ttf"`).
    pub format: String,
}

impl fmt::Debug for FontSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontSource")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct KitConfig {
    /// Channel order the native rasterizer writes into software buffers.
    pub color_space: ColorSpace,
    /// Channel order of frames handed to the host after a software present.
    pub host_layout: HostPixelLayout,
    /// Largest accepted width or height of a render surface.
    pub max_surface_dim: u32,
    pub power_preference: PowerPreference,
    /// Label passed with the device request of the negotiated backend.
    pub device_label: String,
    /// Attributes used when creating immediate-GPU contexts.
    pub gl_attributes: GlContextAttributes,
    /// Font loaded at start-up and unloaded when the kit shuts down.
    pub default_font: Option<FontSource>,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            color_space: ColorSpace::Abgr8888S,
            host_layout: HostPixelLayout::Rgba8,
            max_surface_dim: DEFAULT_MAX_SURFACE_DIM,
            power_preference: PowerPreference::HighPerformance,
            device_label: DEFAULT_DEVICE_LABEL.to_string(),
            gl_attributes: GlContextAttributes::default(),
            default_font: None,
        }
    }
}

impl KitConfig {
    pub fn builder() -> KitConfigBuilder {
        KitConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), KitConfigError> {
        validate(self)
    }
}

/// Builder for [`KitConfig`].
#[derive(Debug, Clone, Default)]
pub struct KitConfigBuilder {
    inner: KitConfig,
}

impl KitConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut KitConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn color_space(self, cs: ColorSpace) -> Self { self.map(|c| c.color_space = cs) }
    pub fn host_layout(self, layout: HostPixelLayout) -> Self { self.map(|c| c.host_layout = layout) }
    pub fn max_surface_dim(self, dim: u32) -> Self { self.map(|c| c.max_surface_dim = dim) }
    pub fn power_preference(self, pref: PowerPreference) -> Self { self.map(|c| c.power_preference = pref) }
    pub fn device_label<S: Into<String>>(self, label: S) -> Self { self.map(|c| c.device_label = label.into()) }
    pub fn gl_attributes(self, attrs: GlContextAttributes) -> Self { self.map(|c| c.gl_attributes = attrs) }

    pub fn default_font<N: Into<String>, F: Into<String>>(self, name: N, data: Vec<u8>, format: F) -> Self {
        self.map(|c| {
            c.default_font = Some(FontSource {
                name: name.into(),
                data,
                format: format.into(),
            })
        })
    }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut KitConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<KitConfig, KitConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum KitConfigError {
    ZeroSurfaceDim,
    SurfaceDimTooLarge(u32),
    EmptyDeviceLabel,
    UnknownWebGlVersion(u8),
    EmptyFontName,
    EmptyFontData(String),
}

impl fmt::Display for KitConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KitConfigError::ZeroSurfaceDim =>
                write!(f, "max_surface_dim must be at least 1"),
            KitConfigError::SurfaceDimTooLarge(dim) =>
                write!(f, "max_surface_dim {dim} exceeds {MAX_SURFACE_DIM_LIMIT}"),
            KitConfigError::EmptyDeviceLabel =>
                write!(f, "device_label must not be empty"),
            KitConfigError::UnknownWebGlVersion(v) =>
                write!(f, "WebGL major version {v} is not supported (expected 1 or 2)"),
            KitConfigError::EmptyFontName =>
                write!(f, "default font needs a name"),
            KitConfigError::EmptyFontData(name) =>
                write!(f, "default font '{name}' has no data"),
        }
    }
}
impl std::error::Error for KitConfigError {}

fn validate(c: &KitConfig) -> Result<(), KitConfigError> {
    if c.max_surface_dim == 0 {
        return Err(KitConfigError::ZeroSurfaceDim);
    }
    if c.max_surface_dim > MAX_SURFACE_DIM_LIMIT {
        return Err(KitConfigError::SurfaceDimTooLarge(c.max_surface_dim));
    }
    if c.device_label.trim().is_empty() {
        return Err(KitConfigError::EmptyDeviceLabel);
    }
    if !(1..=2).contains(&c.gl_attributes.major_version) {
        return Err(KitConfigError::UnknownWebGlVersion(c.gl_attributes.major_version));
    }
    if let Some(font) = &c.default_font {
        if font.name.is_empty() {
            return Err(KitConfigError::EmptyFontName);
        }
        if font.data.is_empty() {
            return Err(KitConfigError::EmptyFontData(font.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_native_expectations() {
        let cfg = KitConfig::default();
        assert_eq!(cfg.color_space, ColorSpace::Abgr8888S);
        assert_eq!(cfg.power_preference, PowerPreference::HighPerformance);
        assert_eq!(cfg.device_label, "ThorVG Device");
        assert_eq!(cfg.gl_attributes.major_version, 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builder_rejects_zero_dimension() {
        let err = KitConfig::builder().max_surface_dim(0).build().unwrap_err();
        assert_eq!(err, KitConfigError::ZeroSurfaceDim);
    }

    #[test]
    fn builder_caps_the_dimension() {
        assert!(KitConfig::builder().max_surface_dim(MAX_SURFACE_DIM_LIMIT).build().is_ok());
        let err = KitConfig::builder().max_surface_dim(1 << 30).build().unwrap_err();
        assert_eq!(err, KitConfigError::SurfaceDimTooLarge(1 << 30));
    }

    #[test]
    fn builder_rejects_empty_font() {
        let err = KitConfig::builder()
            .default_font("default", Vec::new(), "ttf")
            .build()
            .unwrap_err();
        assert_eq!(err, KitConfigError::EmptyFontData("default".into()));
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn builder_rejects_unknown_webgl_version() {
        let err = KitConfig::builder()
            .with(|c| c.gl_attributes.major_version = 3)
            .build()
            .unwrap_err();
        assert_eq!(err, KitConfigError::UnknownWebGlVersion(3));
    }
}
