//! Host platform services consumed by the GPU backends.
//!
//! The immediate-GPU backend needs a graphics context bound to an on-screen target;
//! the negotiated-GPU backend needs an instance, an adapter, a device and a
//! presentation surface. Both are provided by the host through these traits so the
//! binding layer never depends on a particular windowing or browser API.

use std::fmt;

/// Identifier of a graphics context created by a [`GlPlatform`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlContextId(pub usize);

/// Negotiation instance handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WgInstance(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WgAdapter(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WgDevice(pub u64);

/// Presentation surface created from an instance and a target descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WgSurface(pub u64);

/// Adapter selection hint passed with the adapter request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

/// Attributes for immediate-GPU context creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlContextAttributes {
    pub alpha: bool,
    pub depth: bool,
    pub stencil: bool,
    pub premultiplied_alpha: bool,
    pub fail_if_major_performance_caveat: bool,
    pub major_version: u8,
    pub minor_version: u8,
    pub enable_extensions_by_default: bool,
}

impl Default for GlContextAttributes {
    fn default() -> Self {
        Self {
            alpha: true,
            depth: false,
            stencil: false,
            premultiplied_alpha: true,
            fail_if_major_performance_caveat: false,
            major_version: 2,
            minor_version: 0,
            enable_extensions_by_default: true,
        }
    }
}

/// Single-shot completion of an adapter request. `Err` carries the platform message.
pub type AdapterCallback = Box<dyn FnOnce(Result<WgAdapter, String>) + Send>;

/// Single-shot completion of a device request. `Err` carries the platform message.
pub type DeviceCallback = Box<dyn FnOnce(Result<WgDevice, String>) + Send>;

/// Graphics context provider for the immediate-GPU backend.
pub trait GlPlatform {
    /// Creates a context bound to the element identified by `target`.
    fn create_context(&self, target: &str, attrs: &GlContextAttributes) -> Option<GlContextId>;
    fn make_current(&self, context: GlContextId) -> bool;
    fn destroy_context(&self, context: GlContextId);
}

/// Negotiation services for the negotiated-GPU backend.
///
/// Request callbacks may be invoked from inside the request call itself or at any
/// later point, from whatever queue the platform delivers them on.
pub trait WgPlatform {
    fn create_instance(&self) -> Option<WgInstance>;
    fn request_adapter(&self, instance: WgInstance, power: PowerPreference, callback: AdapterCallback);
    fn request_device(&self, adapter: WgAdapter, label: &str, callback: DeviceCallback);
    fn create_surface(&self, instance: WgInstance, target: &str) -> Option<WgSurface>;
    fn release_surface(&self, surface: WgSurface);
    fn release_device(&self, device: WgDevice);
    fn release_adapter(&self, adapter: WgAdapter);
    fn release_instance(&self, instance: WgInstance);
}

impl fmt::Display for PowerPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerPreference::LowPower => write!(f, "low-power"),
            PowerPreference::HighPerformance => write!(f, "high-performance"),
        }
    }
}
