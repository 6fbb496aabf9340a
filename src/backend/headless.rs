//! Scripted in-process platform.
//!
//! [`HeadlessPlatform`] implements both [`GlPlatform`] and [`WgPlatform`] without a GPU.
//! Adapter and device requests follow a [`RequestScript`], which makes it possible to
//! drive every negotiation path deterministically, including callbacks that arrive after
//! the session was terminated. It also counts live resources so leaks show up in tests.

use crate::backend::platform::{
    AdapterCallback, DeviceCallback, GlContextAttributes, GlContextId, GlPlatform, PowerPreference,
    WgAdapter, WgDevice, WgInstance, WgPlatform, WgSurface,
};
use log::trace;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// How the platform answers the next adapter or device requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestScript {
    /// Invoke the callback with a new resource before the request call returns.
    #[default]
    Succeed,
    /// Invoke the callback with an error before the request call returns.
    Fail,
    /// Hold the callback until [`HeadlessPlatform::deliver_pending`] or
    /// [`HeadlessPlatform::fail_pending`].
    Defer,
}

enum Pending {
    Adapter(AdapterCallback),
    Device(DeviceCallback),
}

#[derive(Default)]
struct State {
    next_id: u64,
    adapter_script: RequestScript,
    device_script: RequestScript,
    pending: Vec<Pending>,

    adapter_requests: usize,
    device_requests: usize,
    last_power: Option<PowerPreference>,
    last_device_label: Option<String>,

    instances: HashSet<WgInstance>,
    adapters: HashSet<WgAdapter>,
    devices: HashSet<WgDevice>,
    surfaces: HashSet<WgSurface>,
    contexts: HashSet<GlContextId>,
    current_context: Option<GlContextId>,
    last_gl_attributes: Option<GlContextAttributes>,

    fail_instances: bool,
    fail_surfaces: bool,
    fail_contexts: bool,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// GPU-less platform. Clones share state.
#[derive(Clone, Default)]
pub struct HeadlessPlatform {
    state: Rc<RefCell<State>>,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_adapter(&self, script: RequestScript) {
        self.state.borrow_mut().adapter_script = script;
    }

    pub fn script_device(&self, script: RequestScript) {
        self.state.borrow_mut().device_script = script;
    }

    pub fn fail_instance_creation(&self, fail: bool) {
        self.state.borrow_mut().fail_instances = fail;
    }

    pub fn fail_surface_creation(&self, fail: bool) {
        self.state.borrow_mut().fail_surfaces = fail;
    }

    pub fn fail_context_creation(&self, fail: bool) {
        self.state.borrow_mut().fail_contexts = fail;
    }

    /// Resolves every deferred request successfully. Returns how many were delivered.
    pub fn deliver_pending(&self) -> usize {
        let pending = std::mem::take(&mut self.state.borrow_mut().pending);
        let count = pending.len();
        for p in pending {
            match p {
                Pending::Adapter(cb) => {
                    let adapter = self.new_adapter();
                    cb(Ok(adapter));
                }
                Pending::Device(cb) => {
                    let device = self.new_device();
                    cb(Ok(device));
                }
            }
        }
        count
    }

    /// Resolves every deferred request with `reason`. Returns how many were failed.
    pub fn fail_pending(&self, reason: &str) -> usize {
        let pending = std::mem::take(&mut self.state.borrow_mut().pending);
        let count = pending.len();
        for p in pending {
            match p {
                Pending::Adapter(cb) => cb(Err(reason.to_string())),
                Pending::Device(cb) => cb(Err(reason.to_string())),
            }
        }
        count
    }

    pub fn pending_requests(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn adapter_requests(&self) -> usize {
        self.state.borrow().adapter_requests
    }

    pub fn device_requests(&self) -> usize {
        self.state.borrow().device_requests
    }

    pub fn last_power_preference(&self) -> Option<PowerPreference> {
        self.state.borrow().last_power
    }

    pub fn last_device_label(&self) -> Option<String> {
        self.state.borrow().last_device_label.clone()
    }

    pub fn last_gl_attributes(&self) -> Option<GlContextAttributes> {
        self.state.borrow().last_gl_attributes
    }

    pub fn current_context(&self) -> Option<GlContextId> {
        self.state.borrow().current_context
    }

    pub fn live_instances(&self) -> usize {
        self.state.borrow().instances.len()
    }

    pub fn live_adapters(&self) -> usize {
        self.state.borrow().adapters.len()
    }

    pub fn live_devices(&self) -> usize {
        self.state.borrow().devices.len()
    }

    pub fn live_surfaces(&self) -> usize {
        self.state.borrow().surfaces.len()
    }

    pub fn live_contexts(&self) -> usize {
        self.state.borrow().contexts.len()
    }

    fn new_adapter(&self) -> WgAdapter {
        let mut s = self.state.borrow_mut();
        let adapter = WgAdapter(s.next());
        s.adapters.insert(adapter);
        adapter
    }

    fn new_device(&self) -> WgDevice {
        let mut s = self.state.borrow_mut();
        let device = WgDevice(s.next());
        s.devices.insert(device);
        device
    }
}

impl GlPlatform for HeadlessPlatform {
    fn create_context(&self, target: &str, attrs: &GlContextAttributes) -> Option<GlContextId> {
        let mut s = self.state.borrow_mut();
        s.last_gl_attributes = Some(*attrs);
        if s.fail_contexts || target.is_empty() {
            return None;
        }
        let ctx = GlContextId(s.next() as usize);
        s.contexts.insert(ctx);
        trace!("headless: context {ctx:?} for '{target}'");
        Some(ctx)
    }

    fn make_current(&self, context: GlContextId) -> bool {
        let mut s = self.state.borrow_mut();
        if s.contexts.contains(&context) {
            s.current_context = Some(context);
            true
        } else {
            false
        }
    }

    fn destroy_context(&self, context: GlContextId) {
        let mut s = self.state.borrow_mut();
        s.contexts.remove(&context);
        if s.current_context == Some(context) {
            s.current_context = None;
        }
    }
}

impl WgPlatform for HeadlessPlatform {
    fn create_instance(&self) -> Option<WgInstance> {
        let mut s = self.state.borrow_mut();
        if s.fail_instances {
            return None;
        }
        let instance = WgInstance(s.next());
        s.instances.insert(instance);
        Some(instance)
    }

    fn request_adapter(&self, _instance: WgInstance, power: PowerPreference, callback: AdapterCallback) {
        let script = {
            let mut s = self.state.borrow_mut();
            s.adapter_requests += 1;
            s.last_power = Some(power);
            s.adapter_script
        };
        match script {
            RequestScript::Succeed => {
                let adapter = self.new_adapter();
                callback(Ok(adapter));
            }
            RequestScript::Fail => callback(Err("no suitable adapter".to_string())),
            RequestScript::Defer => self.state.borrow_mut().pending.push(Pending::Adapter(callback)),
        }
    }

    fn request_device(&self, _adapter: WgAdapter, label: &str, callback: DeviceCallback) {
        let script = {
            let mut s = self.state.borrow_mut();
            s.device_requests += 1;
            s.last_device_label = Some(label.to_string());
            s.device_script
        };
        match script {
            RequestScript::Succeed => {
                let device = self.new_device();
                callback(Ok(device));
            }
            RequestScript::Fail => callback(Err("device creation rejected".to_string())),
            RequestScript::Defer => self.state.borrow_mut().pending.push(Pending::Device(callback)),
        }
    }

    fn create_surface(&self, instance: WgInstance, target: &str) -> Option<WgSurface> {
        let mut s = self.state.borrow_mut();
        if s.fail_surfaces || target.is_empty() || !s.instances.contains(&instance) {
            return None;
        }
        let surface = WgSurface(s.next());
        s.surfaces.insert(surface);
        Some(surface)
    }

    fn release_surface(&self, surface: WgSurface) {
        self.state.borrow_mut().surfaces.remove(&surface);
    }

    fn release_device(&self, device: WgDevice) {
        self.state.borrow_mut().devices.remove(&device);
    }

    fn release_adapter(&self, adapter: WgAdapter) {
        self.state.borrow_mut().adapters.remove(&adapter);
    }

    fn release_instance(&self, instance: WgInstance) {
        self.state.borrow_mut().instances.remove(&instance);
    }
}
