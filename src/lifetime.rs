//! Exactly-once release of native handles.
//!
//! Every wrapper object holds one [`HandleCell`]. The cell is registered with the kit's
//! [`LifetimeManager`] under a fresh [`WrapperId`] in the registry of its
//! [`ObjectKind`]. The release function of that kind runs exactly once for the entry,
//! triggered by whichever happens first:
//!
//! - an explicit [`HandleCell::dispose`];
//! - the last `Rc` to the cell being dropped.
//!
//! Containers (scenes, render surfaces) keep `Rc` clones of their children's cells, so a
//! child wrapper dropped by the host stays registered while it is still a member.
//!
//! Borrowed entries (an animation's embedded picture) never call a release function;
//! they are invalidated together with the entry that owns them.
//!
//! The manager also counts the claims the binding holds on each native handle. A
//! release that would exceed them is refused with [`KitError::OverRelease`] instead of
//! reaching native code.

use crate::engine::KitShared;
use crate::errors::{KitError, KitResult};
use crate::native::{self, NativeApi, NativeHandle, NativeStatus};
use log::{debug, error, trace};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use uuid::Uuid;

/// Identity of one wrapper object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WrapperId(Uuid);

impl WrapperId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WrapperId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WrapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wrapper families, each with its own registry and release function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Shape,
    Scene,
    Text,
    Picture,
    Gradient,
    Animation,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 6] = [
        ObjectKind::Shape,
        ObjectKind::Scene,
        ObjectKind::Text,
        ObjectKind::Picture,
        ObjectKind::Gradient,
        ObjectKind::Animation,
    ];

    /// Kinds that live in the native paint tree and follow the paint reference count.
    pub fn is_paint(&self) -> bool {
        matches!(self, ObjectKind::Shape | ObjectKind::Scene | ObjectKind::Text | ObjectKind::Picture)
    }

    fn release_op(&self) -> &'static str {
        match self {
            ObjectKind::Gradient => "gradient_del",
            ObjectKind::Animation => "animation_del",
            _ => "paint_unref",
        }
    }

    fn release(&self, native: &dyn NativeApi, handle: NativeHandle) -> NativeStatus {
        match self {
            ObjectKind::Gradient => native.gradient_del(handle),
            ObjectKind::Animation => native.animation_del(handle),
            _ => native.paint_unref(handle, true),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Shape => "shape",
            ObjectKind::Scene => "scene",
            ObjectKind::Text => "text",
            ObjectKind::Picture => "picture",
            ObjectKind::Gradient => "gradient",
            ObjectKind::Animation => "animation",
        };
        f.write_str(name)
    }
}

/// Who is responsible for releasing a registered handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// The entry holds one claim and releases it.
    Owned,
    /// The handle belongs to another entry and is released with it.
    Borrowed { owner: WrapperId },
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    handle: NativeHandle,
    ownership: Ownership,
}

/// Counters kept by the [`LifetimeManager`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeStats {
    pub registered: usize,
    /// Release function invocations.
    pub released: usize,
    /// Borrowed entries dropped without a release call.
    pub detached: usize,
    /// Releases refused because no claim was outstanding.
    pub refused: usize,
    pub live: usize,
    pub releases_by_kind: BTreeMap<ObjectKind, usize>,
}

impl LifetimeStats {
    pub fn releases_of(&self, kind: ObjectKind) -> usize {
        self.releases_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Per-kind registries of live wrappers.
#[derive(Default)]
pub struct LifetimeManager {
    registries: RefCell<HashMap<ObjectKind, HashMap<WrapperId, Entry>>>,
    claims: RefCell<HashMap<NativeHandle, u32>>,
    stats: RefCell<LifetimeStats>,
}

impl LifetimeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under a new identity. Owned entries take one claim.
    pub fn register(&self, kind: ObjectKind, handle: NativeHandle, ownership: Ownership) -> KitResult<WrapperId> {
        if handle.is_null() {
            return Err(KitError::NullHandle { op: "register" });
        }
        let id = WrapperId::new();
        self.registries
            .borrow_mut()
            .entry(kind)
            .or_default()
            .insert(id, Entry { handle, ownership });
        if ownership == Ownership::Owned {
            *self.claims.borrow_mut().entry(handle).or_insert(0) += 1;
        }
        self.stats.borrow_mut().registered += 1;
        trace!("registered {kind} {id} -> {handle} ({ownership:?})");
        Ok(id)
    }

    /// Handle of a live entry.
    pub fn handle(&self, kind: ObjectKind, id: WrapperId) -> Option<NativeHandle> {
        self.registries.borrow().get(&kind)?.get(&id).map(|e| e.handle)
    }

    pub fn is_live(&self, kind: ObjectKind, id: WrapperId) -> bool {
        self.handle(kind, id).is_some()
    }

    /// Claims the binding currently holds on `handle`.
    pub fn claims(&self, handle: NativeHandle) -> u32 {
        self.claims.borrow().get(&handle).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> LifetimeStats {
        let mut stats = self.stats.borrow().clone();
        stats.live = self.registries.borrow().values().map(HashMap::len).sum();
        stats
    }

    /// Releases the entry if it is still registered.
    ///
    /// Returns `Ok(false)` when the entry was already released, which makes every
    /// release path idempotent. A native failure is reported once; the entry is gone
    /// afterwards either way.
    pub fn release(&self, native: &dyn NativeApi, kind: ObjectKind, id: WrapperId) -> KitResult<bool> {
        let Some(entry) = self.take(kind, id) else {
            return Ok(false);
        };

        if let Ownership::Borrowed { owner } = entry.ownership {
            self.stats.borrow_mut().detached += 1;
            trace!("detached borrowed {kind} {id} (owner {owner})");
            return Ok(true);
        }

        self.detach_borrowers(id);

        let claimed = {
            let mut claims = self.claims.borrow_mut();
            match claims.get(&entry.handle).copied().unwrap_or(0) {
                0 => false,
                1 => claims.remove(&entry.handle).is_some(),
                n => claims.insert(entry.handle, n - 1).is_some(),
            }
        };
        if !claimed {
            self.stats.borrow_mut().refused += 1;
            error!("refusing release of {kind} {id}: no claim outstanding on {}", entry.handle);
            return Err(KitError::OverRelease { handle: entry.handle });
        }

        let status = kind.release(native, entry.handle);
        {
            let mut stats = self.stats.borrow_mut();
            stats.released += 1;
            *stats.releases_by_kind.entry(kind).or_insert(0) += 1;
        }
        debug!("released {kind} {id} ({})", entry.handle);
        native::check(kind.release_op(), entry.handle, status).map(|_| true)
    }

    /// Explicit disposal. Same as [`LifetimeManager::release`], except that a borrowed
    /// entry whose owner is still registered is left alone and `Ok(false)` is returned;
    /// it goes away together with its owner.
    pub fn dispose(&self, native: &dyn NativeApi, kind: ObjectKind, id: WrapperId) -> KitResult<bool> {
        let ownership = self.registries.borrow().get(&kind).and_then(|r| r.get(&id)).map(|e| e.ownership);
        if let Some(Ownership::Borrowed { owner }) = ownership {
            if self.is_registered(owner) {
                debug!("dispose of borrowed {kind} {id} deferred to its owner {owner}");
                return Ok(false);
            }
        }
        self.release(native, kind, id)
    }

    fn is_registered(&self, id: WrapperId) -> bool {
        self.registries.borrow().values().any(|r| r.contains_key(&id))
    }

    fn take(&self, kind: ObjectKind, id: WrapperId) -> Option<Entry> {
        self.registries.borrow_mut().get_mut(&kind)?.remove(&id)
    }

    fn detach_borrowers(&self, owner_id: WrapperId) {
        let mut detached = 0;
        for registry in self.registries.borrow_mut().values_mut() {
            registry.retain(|_, e| {
                let borrowed = e.ownership == Ownership::Borrowed { owner: owner_id };
                detached += borrowed as usize;
                !borrowed
            });
        }
        if detached > 0 {
            self.stats.borrow_mut().detached += detached;
            debug!("detached {detached} borrowed entries of {owner_id}");
        }
    }
}

/// Host-side holder of one registered native handle.
///
/// The handle is fixed at construction. Once released, every access through
/// [`HandleCell::handle`] fails with [`KitError::Disposed`].
pub struct HandleCell {
    id: WrapperId,
    kind: ObjectKind,
    handle: NativeHandle,
    kit: Rc<KitShared>,
    members: RefCell<Vec<Rc<HandleCell>>>,
}

impl HandleCell {
    pub(crate) fn new(kit: &Rc<KitShared>, kind: ObjectKind, handle: NativeHandle, ownership: Ownership) -> KitResult<Rc<Self>> {
        let id = kit.lifetimes.register(kind, handle, ownership)?;
        Ok(Rc::new(Self {
            id,
            kind,
            handle,
            kit: Rc::clone(kit),
            members: RefCell::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> WrapperId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Native handle, or [`KitError::Disposed`] once released.
    pub fn handle(&self) -> KitResult<NativeHandle> {
        if self.kit.lifetimes.is_live(self.kind, self.id) {
            Ok(self.handle)
        } else {
            Err(KitError::Disposed { kind: self.kind, id: self.id })
        }
    }

    /// Handle without the liveness check, for containers that hold their own native
    /// reference on it.
    pub(crate) fn raw_handle(&self) -> NativeHandle {
        self.handle
    }

    pub fn is_disposed(&self) -> bool {
        !self.kit.lifetimes.is_live(self.kind, self.id)
    }

    /// Releases the handle now. Returns `false` if it was already released, or if the
    /// handle is borrowed from an owner that is still alive.
    pub fn dispose(&self) -> KitResult<bool> {
        let released = self.kit.lifetimes.dispose(self.kit.native.as_ref(), self.kind, self.id);
        if self.is_disposed() {
            self.members.borrow_mut().clear();
        }
        released
    }

    pub(crate) fn kit(&self) -> &Rc<KitShared> {
        &self.kit
    }

    /// Runs a native call against the live handle and checks its status.
    pub(crate) fn forward(&self, op: &'static str, f: impl FnOnce(&dyn NativeApi, NativeHandle) -> NativeStatus) -> KitResult<()> {
        let handle = self.handle()?;
        native::check(op, handle, f(self.kit.native.as_ref(), handle))
    }

    /// Keeps `member` alive for as long as this cell holds it.
    pub(crate) fn retain(&self, member: Rc<HandleCell>) {
        self.members.borrow_mut().push(member);
    }

    /// Drops the first retained member with `id`.
    pub(crate) fn release_member(&self, id: WrapperId) -> bool {
        let mut members = self.members.borrow_mut();
        match members.iter().position(|m| m.id == id) {
            Some(idx) => {
                members.remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn release_members(&self) {
        self.members.borrow_mut().clear();
    }

    pub(crate) fn member(&self, id: WrapperId) -> Option<Rc<HandleCell>> {
        self.members.borrow().iter().find(|m| m.id == id).cloned()
    }

    pub fn member_count(&self) -> usize {
        self.members.borrow().len()
    }
}

impl Drop for HandleCell {
    fn drop(&mut self) {
        if let Err(e) = self.kit.lifetimes.release(self.kit.native.as_ref(), self.kind, self.id) {
            error!("release of {} {} on drop failed: {e}", self.kind, self.id);
        }
    }
}

impl fmt::Debug for HandleCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCell")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
