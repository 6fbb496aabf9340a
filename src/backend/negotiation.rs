//! Instance → adapter → device negotiation for the negotiated-GPU backend.
//!
//! [`WgContext`] is the process-scoped owner of the negotiation resources. Every
//! [`BackendSession`](crate::backend::BackendSession) of the negotiated kind created by
//! one [`CanvasKit`](crate::CanvasKit) shares the same context, so a second surface
//! against a ready backend reuses the device instead of renegotiating.
//!
//! Platform callbacks only write into the shared [`Negotiation`] record; [`WgContext::poll`]
//! reads that record and issues the next request. Each sub-stage has a `Requested`
//! marker that is set before the request is issued and only left when the callback
//! resolves it, so repeated polls never duplicate an in-flight request.

use crate::backend::platform::{PowerPreference, WgAdapter, WgDevice, WgInstance, WgPlatform, WgSurface};
use crate::backend::{InitStatus, NegotiationStage};
use log::{debug, warn};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One negotiation sub-stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Slot<T> {
    #[default]
    Idle,
    Requested,
    Ready(T),
}

/// Resources delivered by a callback that belonged to a terminated negotiation.
#[derive(Debug, Clone, Copy)]
enum Orphan {
    Adapter(WgAdapter),
    Device(WgDevice),
}

/// State shared between [`WgContext`] and the callbacks it hands to the platform.
#[derive(Debug, Default)]
struct Negotiation {
    /// Bumped by `term`, so callbacks of an earlier negotiation can be recognised.
    generation: u64,
    instance: Option<WgInstance>,
    adapter: Slot<WgAdapter>,
    device: Slot<WgDevice>,
    /// Sticky failure reason. Cleared only by `term`.
    failure: Option<String>,
    orphans: Vec<Orphan>,
    /// Presentation surfaces created from `instance` and not yet released.
    surfaces: Vec<WgSurface>,
}

/// Instance and device of a completed negotiation, tagged with the negotiation that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WgBinding {
    pub(crate) generation: u64,
    pub(crate) instance: WgInstance,
    pub(crate) device: WgDevice,
}

impl Negotiation {
    fn stage(&self) -> Option<NegotiationStage> {
        self.instance?;
        Some(match (self.adapter, self.device) {
            (Slot::Idle, _) => NegotiationStage::InstanceCreated,
            (Slot::Requested, _) => NegotiationStage::AdapterRequested,
            (Slot::Ready(_), Slot::Idle) => NegotiationStage::AdapterReady,
            (Slot::Ready(_), Slot::Requested) => NegotiationStage::DeviceRequested,
            (Slot::Ready(_), Slot::Ready(_)) => NegotiationStage::DeviceReady,
        })
    }
}

fn lock(shared: &Mutex<Negotiation>) -> MutexGuard<'_, Negotiation> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-scoped negotiation context.
pub struct WgContext {
    platform: Option<Rc<dyn WgPlatform>>,
    power: PowerPreference,
    device_label: String,
    shared: Arc<Mutex<Negotiation>>,
}

impl WgContext {
    pub fn new(platform: Option<Rc<dyn WgPlatform>>, power: PowerPreference, device_label: impl Into<String>) -> Self {
        Self {
            platform,
            power,
            device_label: device_label.into(),
            shared: Arc::new(Mutex::new(Negotiation::default())),
        }
    }

    /// Advances the negotiation by at most one request and reports where it stands.
    pub fn poll(&self) -> InitStatus {
        let Some(platform) = self.platform.as_ref() else {
            let mut n = lock(&self.shared);
            if n.failure.is_none() {
                n.failure = Some("no negotiation platform available".to_string());
            }
            return InitStatus::Failed;
        };

        self.release_orphans(platform.as_ref());

        let mut n = lock(&self.shared);
        if n.failure.is_some() {
            return InitStatus::Failed;
        }

        let instance = match n.instance {
            Some(instance) => instance,
            None => match platform.create_instance() {
                Some(instance) => {
                    debug!("negotiation: instance {instance:?} created");
                    n.instance = Some(instance);
                    instance
                }
                None => {
                    n.failure = Some("instance creation failed".to_string());
                    return InitStatus::Failed;
                }
            },
        };

        let adapter = match n.adapter {
            Slot::Idle => {
                n.adapter = Slot::Requested;
                let generation = n.generation;
                drop(n);

                let shared = Arc::clone(&self.shared);
                debug!("negotiation: requesting {} adapter", self.power);
                platform.request_adapter(
                    instance,
                    self.power,
                    Box::new(move |result| on_adapter(&shared, generation, result)),
                );
                return self.status_after_request();
            }
            Slot::Requested => return InitStatus::Pending,
            Slot::Ready(adapter) => adapter,
        };

        match n.device {
            Slot::Idle => {
                n.device = Slot::Requested;
                let generation = n.generation;
                drop(n);

                let shared = Arc::clone(&self.shared);
                debug!("negotiation: requesting device '{}' from {adapter:?}", self.device_label);
                platform.request_device(
                    adapter,
                    &self.device_label,
                    Box::new(move |result| on_device(&shared, generation, result)),
                );
                self.status_after_request()
            }
            Slot::Requested => InitStatus::Pending,
            Slot::Ready(_) => InitStatus::Ready,
        }
    }

    /// A request was just issued. A spontaneous callback may already have failed it.
    fn status_after_request(&self) -> InitStatus {
        if lock(&self.shared).failure.is_some() {
            InitStatus::Failed
        } else {
            InitStatus::Pending
        }
    }

    /// Current status without advancing the negotiation.
    pub fn status(&self) -> InitStatus {
        let n = lock(&self.shared);
        if n.failure.is_some() {
            InitStatus::Failed
        } else if matches!(n.device, Slot::Ready(_)) {
            InitStatus::Ready
        } else {
            InitStatus::Pending
        }
    }

    /// Sub-stage reached so far, or `None` before the instance exists.
    pub fn stage(&self) -> Option<NegotiationStage> {
        lock(&self.shared).stage()
    }

    pub fn failure(&self) -> Option<String> {
        lock(&self.shared).failure.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == InitStatus::Ready
    }

    /// Instance and device of a completed negotiation.
    pub(crate) fn binding(&self) -> Option<WgBinding> {
        let n = lock(&self.shared);
        match (n.instance, n.device) {
            (Some(instance), Slot::Ready(device)) => Some(WgBinding {
                generation: n.generation,
                instance,
                device,
            }),
            _ => None,
        }
    }

    /// Creates a presentation surface on the instance of `binding`. The surface is
    /// released by [`WgContext::release_surface`] or, at the latest, by `term` before
    /// the instance goes away.
    pub(crate) fn create_surface(&self, binding: WgBinding, descriptor: &str) -> Option<WgSurface> {
        let platform = self.platform.as_ref()?;
        if self.binding() != Some(binding) {
            return None;
        }
        let surface = platform.create_surface(binding.instance, descriptor)?;
        lock(&self.shared).surfaces.push(surface);
        Some(surface)
    }

    /// Releases `surface` unless `term` already did. Returns whether it was released here.
    pub(crate) fn release_surface(&self, surface: WgSurface) -> bool {
        let owned = {
            let mut n = lock(&self.shared);
            match n.surfaces.iter().position(|&s| s == surface) {
                Some(idx) => {
                    n.surfaces.swap_remove(idx);
                    true
                }
                None => false,
            }
        };
        match (owned, self.platform.as_ref()) {
            (true, Some(platform)) => {
                platform.release_surface(surface);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn platform(&self) -> Option<&Rc<dyn WgPlatform>> {
        self.platform.as_ref()
    }

    /// Releases whatever the negotiation created and returns it to the uninitialized
    /// state. Safe from any sub-stage; requests still in flight resolve into orphans
    /// that are released on the next poll or term.
    ///
    /// Presentation surfaces still held by render surfaces are released first. Those
    /// render surfaces refuse to present until they are destroyed.
    pub fn term(&self) {
        let (instance, adapter, device, orphans, surfaces) = {
            let mut n = lock(&self.shared);
            n.generation = n.generation.wrapping_add(1);
            n.failure = None;
            (
                n.instance.take(),
                std::mem::take(&mut n.adapter),
                std::mem::take(&mut n.device),
                std::mem::take(&mut n.orphans),
                std::mem::take(&mut n.surfaces),
            )
        };

        let Some(platform) = self.platform.as_ref() else {
            return;
        };

        if !surfaces.is_empty() {
            warn!("negotiation: releasing {} presentation surfaces still in use", surfaces.len());
        }
        for surface in surfaces {
            platform.release_surface(surface);
        }
        if let Slot::Ready(device) = device {
            platform.release_device(device);
        }
        if let Slot::Ready(adapter) = adapter {
            platform.release_adapter(adapter);
        }
        if let Some(instance) = instance {
            platform.release_instance(instance);
        }
        release_all(platform.as_ref(), orphans);
        debug!("negotiation: terminated");
    }

    fn release_orphans(&self, platform: &dyn WgPlatform) {
        let orphans = std::mem::take(&mut lock(&self.shared).orphans);
        release_all(platform, orphans);
    }
}

impl Drop for WgContext {
    fn drop(&mut self) {
        self.term();
    }
}

fn release_all(platform: &dyn WgPlatform, orphans: Vec<Orphan>) {
    for orphan in orphans {
        match orphan {
            Orphan::Adapter(adapter) => platform.release_adapter(adapter),
            Orphan::Device(device) => platform.release_device(device),
        }
    }
}

fn on_adapter(shared: &Mutex<Negotiation>, generation: u64, result: Result<WgAdapter, String>) {
    let mut n = lock(shared);
    if n.generation != generation {
        warn!("negotiation: adapter callback arrived after term");
        if let Ok(adapter) = result {
            n.orphans.push(Orphan::Adapter(adapter));
        }
        return;
    }
    match result {
        Ok(adapter) => {
            debug!("negotiation: adapter {adapter:?} ready");
            n.adapter = Slot::Ready(adapter);
        }
        Err(reason) => {
            warn!("negotiation: adapter request failed: {reason}");
            n.adapter = Slot::Idle;
            n.failure = Some(format!("adapter request failed: {reason}"));
        }
    }
}

fn on_device(shared: &Mutex<Negotiation>, generation: u64, result: Result<WgDevice, String>) {
    let mut n = lock(shared);
    if n.generation != generation {
        warn!("negotiation: device callback arrived after term");
        if let Ok(device) = result {
            n.orphans.push(Orphan::Device(device));
        }
        return;
    }
    match result {
        Ok(device) => {
            debug!("negotiation: device {device:?} ready");
            n.device = Slot::Ready(device);
        }
        Err(reason) => {
            warn!("negotiation: device request failed: {reason}");
            n.device = Slot::Idle;
            n.failure = Some(format!("device request failed: {reason}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessPlatform, RequestScript};

    fn context(platform: &HeadlessPlatform) -> WgContext {
        WgContext::new(Some(Rc::new(platform.clone())), PowerPreference::HighPerformance, "test device")
    }

    #[test]
    fn deferred_requests_are_issued_once_per_stage() {
        let platform = HeadlessPlatform::new();
        platform.script_adapter(RequestScript::Defer);
        platform.script_device(RequestScript::Defer);
        let ctx = context(&platform);

        for _ in 0..10 {
            assert_eq!(ctx.poll(), InitStatus::Pending);
        }
        assert_eq!(platform.adapter_requests(), 1);
        assert_eq!(ctx.stage(), Some(NegotiationStage::AdapterRequested));

        assert_eq!(platform.deliver_pending(), 1);
        assert_eq!(ctx.stage(), Some(NegotiationStage::AdapterReady));

        // The same poll that observes the adapter issues the device request.
        assert_eq!(ctx.poll(), InitStatus::Pending);
        assert_eq!(platform.device_requests(), 1);
        for _ in 0..10 {
            assert_eq!(ctx.poll(), InitStatus::Pending);
        }
        assert_eq!(platform.device_requests(), 1);

        platform.deliver_pending();
        assert_eq!(ctx.poll(), InitStatus::Ready);
        assert_eq!(ctx.stage(), Some(NegotiationStage::DeviceReady));
        assert_eq!(platform.adapter_requests(), 1);
        assert_eq!(platform.device_requests(), 1);
    }

    #[test]
    fn spontaneous_success_still_reports_pending_on_the_issuing_poll() {
        let platform = HeadlessPlatform::new();
        let ctx = context(&platform);

        assert_eq!(ctx.poll(), InitStatus::Pending);
        assert_eq!(ctx.poll(), InitStatus::Pending);
        assert_eq!(ctx.poll(), InitStatus::Ready);
        assert!(ctx.binding().is_some());
    }

    #[test]
    fn failure_is_sticky_until_term() {
        let platform = HeadlessPlatform::new();
        platform.script_adapter(RequestScript::Fail);
        let ctx = context(&platform);

        assert_eq!(ctx.poll(), InitStatus::Failed);
        for _ in 0..5 {
            assert_eq!(ctx.poll(), InitStatus::Failed);
        }
        assert_eq!(platform.adapter_requests(), 1);
        assert!(ctx.failure().unwrap().contains("adapter"));

        ctx.term();
        assert_eq!(ctx.stage(), None);
        assert_eq!(platform.live_instances(), 0);

        platform.script_adapter(RequestScript::Succeed);
        assert_eq!(ctx.poll(), InitStatus::Pending);
        assert_eq!(platform.adapter_requests(), 2);
    }

    #[test]
    fn deferred_device_failure_surfaces_on_next_poll() {
        let platform = HeadlessPlatform::new();
        platform.script_device(RequestScript::Defer);
        let ctx = context(&platform);

        assert_eq!(ctx.poll(), InitStatus::Pending); // adapter resolves spontaneously
        assert_eq!(ctx.poll(), InitStatus::Pending); // device deferred
        platform.fail_pending("device lost");
        assert_eq!(ctx.poll(), InitStatus::Failed);
        assert!(ctx.failure().unwrap().contains("device lost"));
    }

    #[test]
    fn term_mid_negotiation_releases_created_resources_and_late_callbacks() {
        let platform = HeadlessPlatform::new();
        platform.script_device(RequestScript::Defer);
        let ctx = context(&platform);

        ctx.poll();
        ctx.poll();
        assert_eq!(ctx.stage(), Some(NegotiationStage::DeviceRequested));
        assert_eq!(platform.live_adapters(), 1);

        ctx.term();
        assert_eq!(platform.live_instances(), 0);
        assert_eq!(platform.live_adapters(), 0);

        // The device callback of the old negotiation arrives late.
        platform.deliver_pending();
        assert_eq!(platform.live_devices(), 1);
        assert_eq!(ctx.stage(), None);

        // The next poll starts a fresh negotiation and releases the orphan.
        platform.script_device(RequestScript::Succeed);
        assert_eq!(ctx.poll(), InitStatus::Pending);
        assert_eq!(platform.live_devices(), 0);
    }

    #[test]
    fn term_releases_surfaces_before_the_instance() {
        let platform = HeadlessPlatform::new();
        let ctx = context(&platform);
        while ctx.poll() == InitStatus::Pending {}
        let binding = ctx.binding().unwrap();
        let surface = ctx.create_surface(binding, "#wg").unwrap();
        assert_eq!(platform.live_surfaces(), 1);

        ctx.term();
        assert_eq!(platform.live_surfaces(), 0);
        assert_eq!(platform.live_instances(), 0);
        assert!(!ctx.release_surface(surface));

        // A binding from before the term cannot create surfaces on the new negotiation.
        while ctx.poll() == InitStatus::Pending {}
        assert_ne!(ctx.binding(), Some(binding));
        assert!(ctx.create_surface(binding, "#wg").is_none());
    }

    #[test]
    fn missing_platform_fails() {
        let ctx = WgContext::new(None, PowerPreference::LowPower, "none");
        assert_eq!(ctx.poll(), InitStatus::Failed);
        assert!(ctx.failure().is_some());
    }
}
