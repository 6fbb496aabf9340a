//! Backend selection and non-blocking initialization.
//!
//! A [`BackendSession`] is created for one [`BackendKind`] and driven by calling
//! [`BackendSession::poll`] repeatedly (typically once per host animation frame) until it
//! reports [`InitStatus::Ready`] or [`InitStatus::Failed`]. Software and immediate-GPU
//! sessions are ready on the first poll. Negotiated-GPU sessions walk the
//! instance → adapter → device sequence in [`negotiation`].

pub mod headless;
pub mod negotiation;
pub mod platform;

use crate::errors::{KitError, KitResult};
use bitflags::bitflags;
use log::{debug, info, warn};
use negotiation::WgContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Rendering backend family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CPU rasterization into a host-visible pixel buffer.
    Software,
    /// Immediate-mode GPU context bound to an on-screen target.
    Gl,
    /// GPU API that needs asynchronous adapter and device negotiation.
    WebGpu,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Software, BackendKind::Gl, BackendKind::WebGpu];

    /// Short tag used by host bindings.
    pub fn tag(&self) -> &'static str {
        match self {
            BackendKind::Software => "sw",
            BackendKind::Gl => "gl",
            BackendKind::WebGpu => "wg",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Software => "software",
            BackendKind::Gl => "gl",
            BackendKind::WebGpu => "webgpu",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBackend(pub String);

impl fmt::Display for UnknownBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown backend '{}'", self.0)
    }
}
impl std::error::Error for UnknownBackend {}

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sw" | "software" => Ok(BackendKind::Software),
            "gl" | "webgl" => Ok(BackendKind::Gl),
            "wg" | "webgpu" => Ok(BackendKind::WebGpu),
            _ => Err(UnknownBackend(s.to_string())),
        }
    }
}

/// Result of one initialization poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitStatus {
    Ready,
    Failed,
    Pending,
}

impl InitStatus {
    /// Integer form returned to hosts: 0 ready, 1 failed, 2 pending.
    pub fn code(&self) -> i32 {
        match self {
            InitStatus::Ready => 0,
            InitStatus::Failed => 1,
            InitStatus::Pending => 2,
        }
    }
}

/// Sub-stage of a negotiated-GPU initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NegotiationStage {
    InstanceCreated,
    AdapterRequested,
    AdapterReady,
    DeviceRequested,
    DeviceReady,
}

/// Lifecycle state of a [`BackendSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Uninitialized,
    Negotiating(NegotiationStage),
    Ready,
    Failed,
}

bitflags! {
    /// Set of backends.
    #[derive(Serialize, Deserialize)]
    pub struct BackendSet: u8 {
        const SOFTWARE = 0b001;
        const GL       = 0b010;
        const WEBGPU   = 0b100;
    }
}

impl BackendSet {
    /// Backends compiled into this build.
    pub fn compiled() -> Self {
        let mut set = BackendSet::empty();
        if cfg!(feature = "backend_sw") {
            set |= BackendSet::SOFTWARE;
        }
        if cfg!(feature = "backend_gl") {
            set |= BackendSet::GL;
        }
        if cfg!(feature = "backend_wg") {
            set |= BackendSet::WEBGPU;
        }
        set
    }

    pub fn supports(&self, kind: BackendKind) -> bool {
        self.contains(BackendSet::from(kind))
    }
}

impl From<BackendKind> for BackendSet {
    fn from(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Software => BackendSet::SOFTWARE,
            BackendKind::Gl => BackendSet::GL,
            BackendKind::WebGpu => BackendSet::WEBGPU,
        }
    }
}

/// Initialization handle for one backend kind.
///
/// Sessions of the negotiated kind share the negotiation context of the kit that
/// created them; terminating one terminates that shared context.
pub struct BackendSession {
    kind: BackendKind,
    status: SessionStatus,
    wg: Option<Rc<WgContext>>,
}

impl BackendSession {
    pub(crate) fn new(kind: BackendKind, wg: Option<Rc<WgContext>>) -> Self {
        Self {
            kind,
            status: SessionStatus::Uninitialized,
            wg,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Advances initialization without blocking.
    pub fn poll(&mut self) -> InitStatus {
        if !BackendSet::compiled().supports(self.kind) {
            if self.status != SessionStatus::Failed {
                warn!("{} backend is not compiled into this build", self.kind);
            }
            self.status = SessionStatus::Failed;
            return InitStatus::Failed;
        }

        match self.kind {
            BackendKind::Software | BackendKind::Gl => {
                if self.status != SessionStatus::Ready {
                    info!("{} backend ready", self.kind);
                }
                self.status = SessionStatus::Ready;
                InitStatus::Ready
            }
            BackendKind::WebGpu => {
                let Some(ctx) = self.wg.as_ref() else {
                    self.status = SessionStatus::Failed;
                    return InitStatus::Failed;
                };
                let result = ctx.poll();
                let next = match result {
                    InitStatus::Ready => SessionStatus::Ready,
                    InitStatus::Failed => SessionStatus::Failed,
                    InitStatus::Pending => ctx
                        .stage()
                        .map(SessionStatus::Negotiating)
                        .unwrap_or(SessionStatus::Uninitialized),
                };
                if next != self.status {
                    match next {
                        SessionStatus::Ready => info!("{} backend ready", self.kind),
                        SessionStatus::Failed => warn!(
                            "{} backend failed: {}",
                            self.kind,
                            ctx.failure().unwrap_or_default()
                        ),
                        _ => debug!("{} backend: {next:?}", self.kind),
                    }
                }
                self.status = next;
                result
            }
        }
    }

    /// Last observed status. For negotiated sessions this reflects the shared context,
    /// so a `term` through another session is visible here.
    pub fn status(&self) -> SessionStatus {
        match (&self.wg, self.status) {
            (Some(ctx), SessionStatus::Ready) if !ctx.is_ready() => SessionStatus::Uninitialized,
            (Some(ctx), SessionStatus::Failed) if ctx.failure().is_none() => SessionStatus::Uninitialized,
            (_, status) => status,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status() == SessionStatus::Ready
    }

    /// Succeeds only when the session has reached `Ready`.
    pub fn require_ready(&self) -> KitResult<()> {
        match self.status() {
            SessionStatus::Ready => Ok(()),
            SessionStatus::Failed => Err(KitError::Negotiation {
                kind: self.kind,
                reason: self
                    .wg
                    .as_ref()
                    .and_then(|ctx| ctx.failure())
                    .unwrap_or_else(|| format!("{} backend unavailable", self.kind)),
            }),
            _ => Err(KitError::BackendNotReady(self.kind)),
        }
    }

    /// Releases backend resources and returns the session to `Uninitialized`.
    pub fn term(&mut self) {
        if let Some(ctx) = self.wg.as_ref() {
            ctx.term();
        }
        self.status = SessionStatus::Uninitialized;
        debug!("{} backend terminated", self.kind);
    }

    pub(crate) fn wg_context(&self) -> Option<&Rc<WgContext>> {
        self.wg.as_ref()
    }
}

impl fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSession")
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessPlatform, RequestScript};
    use crate::backend::platform::PowerPreference;

    #[test]
    fn parses_host_tags() {
        assert_eq!("sw".parse::<BackendKind>().unwrap(), BackendKind::Software);
        assert_eq!("WebGL".parse::<BackendKind>().unwrap(), BackendKind::Gl);
        assert_eq!("wg".parse::<BackendKind>().unwrap(), BackendKind::WebGpu);
        assert!("vulkan".parse::<BackendKind>().is_err());
        for kind in BackendKind::ALL {
            assert_eq!(kind.tag().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn init_status_codes() {
        assert_eq!(InitStatus::Ready.code(), 0);
        assert_eq!(InitStatus::Failed.code(), 1);
        assert_eq!(InitStatus::Pending.code(), 2);
    }

    #[test]
    fn default_build_compiles_every_backend() {
        let set = BackendSet::compiled();
        for kind in BackendKind::ALL {
            assert!(set.supports(kind), "{kind}");
        }
    }

    #[test]
    fn software_is_ready_on_first_poll() {
        let mut session = BackendSession::new(BackendKind::Software, None);
        assert_eq!(session.status(), SessionStatus::Uninitialized);
        assert!(matches!(session.require_ready(), Err(KitError::BackendNotReady(_))));
        assert_eq!(session.poll(), InitStatus::Ready);
        assert!(session.require_ready().is_ok());
        session.term();
        assert_eq!(session.status(), SessionStatus::Uninitialized);
    }

    #[test]
    fn negotiated_session_reports_stages() {
        let platform = HeadlessPlatform::new();
        platform.script_adapter(RequestScript::Defer);
        let ctx = Rc::new(WgContext::new(
            Some(Rc::new(platform.clone())),
            PowerPreference::HighPerformance,
            "dev",
        ));
        let mut session = BackendSession::new(BackendKind::WebGpu, Some(ctx));

        assert_eq!(session.poll(), InitStatus::Pending);
        assert_eq!(session.status(), SessionStatus::Negotiating(NegotiationStage::AdapterRequested));
        platform.deliver_pending();
        assert_eq!(session.poll(), InitStatus::Pending);
        assert_eq!(session.poll(), InitStatus::Ready);
        assert!(session.is_ready());
    }

    #[test]
    fn failed_negotiation_reports_reason() {
        let platform = HeadlessPlatform::new();
        platform.script_adapter(RequestScript::Fail);
        let ctx = Rc::new(WgContext::new(
            Some(Rc::new(platform.clone())),
            PowerPreference::HighPerformance,
            "dev",
        ));
        let mut session = BackendSession::new(BackendKind::WebGpu, Some(ctx));
        assert_eq!(session.poll(), InitStatus::Failed);
        assert_eq!(session.poll(), InitStatus::Failed);
        match session.require_ready() {
            Err(KitError::Negotiation { kind, reason }) => {
                assert_eq!(kind, BackendKind::WebGpu);
                assert!(reason.contains("adapter"), "{reason}");
            }
            other => panic!("unexpected: {other:?}"),
        }
        session.term();
        assert_eq!(session.status(), SessionStatus::Uninitialized);
    }
}
