use crate::backend::BackendKind;
use crate::config::KitConfigError;
use crate::lifetime::{ObjectKind, WrapperId};
use crate::native::{NativeHandle, NativeStatus};

/// Result type alias using [`KitError`].
pub type KitResult<T> = Result<T, KitError>;

#[derive(Debug, thiserror::Error)]
pub enum KitError {
    /// GPU adapter or device request was rejected. Sticky until the session is terminated.
    #[error("{kind} negotiation failed: {reason}")]
    Negotiation { kind: BackendKind, reason: String },

    #[error("{0} backend is not ready")]
    BackendNotReady(BackendKind),

    #[error("{0} backend is not supported by this build or platform")]
    Unsupported(BackendKind),

    /// Buffer allocation, context creation or surface creation failed.
    #[error("failed to create {resource} for {kind} surface")]
    ResourceCreation {
        kind: BackendKind,
        resource: &'static str,
    },

    /// A forwarded native call returned a non-zero status.
    #[error("native call {op} failed on handle {handle}: {status}")]
    NativeCall {
        op: &'static str,
        handle: NativeHandle,
        status: NativeStatus,
    },

    #[error("native {op} returned a null handle")]
    NullHandle { op: &'static str },

    #[error("{kind} {id} has already been disposed")]
    Disposed { kind: ObjectKind, id: WrapperId },

    #[error("release of handle {handle} exceeds the claims held by the binding")]
    OverRelease { handle: NativeHandle },

    #[error("render surface has been destroyed")]
    SurfaceDestroyed,

    #[error("Invalid dimensions: width={width}, height={height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid gradient stop offset: {0} (must be 0.0-1.0)")]
    InvalidGradientStop(f32),

    #[error("Invalid configuration: {0}")]
    Config(#[from] KitConfigError),

    #[error("PNG encoding error: {0}")]
    Png(#[from] png::EncodingError),
}

impl KitError {
    /// Returns true for programmer errors caught at the binding boundary (use after
    /// dispose, double release, null handles), as opposed to failures reported by
    /// the native engine or the platform.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            KitError::Disposed { .. }
                | KitError::OverRelease { .. }
                | KitError::NullHandle { .. }
                | KitError::SurfaceDestroyed
        )
    }
}
