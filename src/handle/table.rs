//! Handle arena
//!
//! Every native resource wrapped by a proxy has one entry here. Entries are
//! addressed by [`HandleId`] (slot index plus generation), hold the share
//! count of the proxies pointing at them and the parent/child edges of the
//! ownership chain.
//!
//! The table never calls into the native layer itself: operations that end a
//! resource's life return [`PendingRelease`] values which the caller runs
//! once the table lock has been dropped.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::native::{HandleKind, NativeApi, RawHandle, Status};

/// Native release routine of an entry
///
/// Invoked at most once, with the environment's error descriptor.
pub(crate) type ReleaseFn = Box<dyn FnOnce(&dyn NativeApi, RawHandle) -> Status + Send>;

pub(crate) fn release_fn<F>(release: F) -> ReleaseFn
where
    F: FnOnce(&dyn NativeApi, RawHandle) -> Status + Send + 'static,
{
    Box::new(release)
}

/// Typed data attached to an entry so a proxy can be rebuilt from its id
pub(crate) type Payload = Arc<dyn Any + Send + Sync>;

/// Stable identifier of a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    /// Slot index
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Lifecycle state of a native resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Created by the application, released natively with its last share
    Allocated,
    /// Produced by a parent operation and not modified
    FetchedClean,
    /// Produced by a parent operation and modified through its proxy
    FetchedDirty,
    /// Released; any use fails
    Released,
}

impl HandleState {
    /// Check whether the resource is still usable
    pub fn is_live(self) -> bool {
        self != HandleState::Released
    }

    /// Check whether the resource was produced by a parent operation
    pub fn is_fetched(self) -> bool {
        matches!(self, HandleState::FetchedClean | HandleState::FetchedDirty)
    }
}

/// How a resource came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Allocated by the application
    Allocated,
    /// Handed out by a parent (result set value, pinned object, dequeued message)
    Fetched,
}

/// Description of a new entry
pub(crate) struct NewEntry {
    pub raw: RawHandle,
    pub kind: HandleKind,
    pub origin: Origin,
    pub parent: Option<HandleId>,
    pub release: Option<ReleaseFn>,
    pub payload: Option<Payload>,
}

impl NewEntry {
    pub(crate) fn allocated(raw: RawHandle, kind: HandleKind, release: ReleaseFn) -> Self {
        Self {
            raw,
            kind,
            origin: Origin::Allocated,
            parent: None,
            release: Some(release),
            payload: None,
        }
    }

    pub(crate) fn fetched(raw: RawHandle, kind: HandleKind, parent: HandleId) -> Self {
        Self {
            raw,
            kind,
            origin: Origin::Fetched,
            parent: Some(parent),
            release: None,
            payload: None,
        }
    }

    pub(crate) fn child_of(mut self, parent: HandleId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Native release for a fetched resource the binding must hand back
    pub(crate) fn with_release(mut self, release: ReleaseFn) -> Self {
        self.release = Some(release);
        self
    }

    pub(crate) fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A native release that must run outside the table lock
pub(crate) struct PendingRelease {
    pub id: HandleId,
    pub kind: HandleKind,
    pub raw: RawHandle,
    release: Option<ReleaseFn>,
    // dropped with the pending release, outside the table lock
    _payload: Option<Payload>,
}

impl PendingRelease {
    /// Run the native release, if the entry owned one
    pub(crate) fn run(self, native: &dyn NativeApi, err: RawHandle) -> Status {
        match self.release {
            Some(release) => {
                tracing::trace!(kind = %self.kind, raw = %self.raw, id = %self.id, "Releasing native handle");
                release(native, err)
            }
            None => Status::Success,
        }
    }
}

impl fmt::Debug for PendingRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRelease")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("raw", &self.raw)
            .field("native", &self.release.is_some())
            .finish()
    }
}

/// Insert rejected because the environment or the parent is gone
///
/// Carries the release routine back so the caller can still free the
/// native resource it just obtained.
pub(crate) struct Rejected {
    pub reason: RejectReason,
    pub release: Option<ReleaseFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RejectReason {
    Closed,
    ParentReleased(HandleKind),
}

struct Entry {
    raw: RawHandle,
    kind: HandleKind,
    state: HandleState,
    parent: Option<HandleId>,
    children: Vec<HandleId>,
    shares: usize,
    release: Option<ReleaseFn>,
    payload: Option<Payload>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Arena of native resources
#[derive(Default)]
pub(crate) struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_raw: HashMap<RawHandle, HandleId>,
    closed: bool,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: HandleId) -> Option<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: HandleId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Add an entry with one share
    pub(crate) fn insert(&mut self, new: NewEntry) -> std::result::Result<HandleId, Rejected> {
        if self.closed {
            return Err(Rejected {
                reason: RejectReason::Closed,
                release: new.release,
            });
        }

        if let Some(parent) = new.parent {
            match self.entry(parent) {
                Some(entry) if entry.state.is_live() => {}
                Some(entry) => {
                    return Err(Rejected {
                        reason: RejectReason::ParentReleased(entry.kind),
                        release: new.release,
                    })
                }
                None => {
                    return Err(Rejected {
                        reason: RejectReason::ParentReleased(new.kind),
                        release: new.release,
                    })
                }
            }
        }

        let state = match new.origin {
            Origin::Allocated => HandleState::Allocated,
            Origin::Fetched => HandleState::FetchedClean,
        };
        let entry = Entry {
            raw: new.raw,
            kind: new.kind,
            state,
            parent: new.parent,
            children: Vec::new(),
            shares: 1,
            release: new.release,
            payload: new.payload,
        };

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                HandleId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                HandleId {
                    index,
                    generation: 0,
                }
            }
        };

        if let Some(parent) = new.parent {
            if let Some(parent) = self.entry_mut(parent) {
                parent.children.push(id);
            }
        }
        if !new.raw.is_null() {
            self.by_raw.insert(new.raw, id);
        }

        tracing::trace!(kind = %new.kind, raw = %new.raw, id = %id, ?state, "Handle registered");
        Ok(id)
    }

    /// Add a share for a cloned proxy
    pub(crate) fn acquire(&mut self, id: HandleId) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.shares += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one share; the last share releases the entry and its subtree
    pub(crate) fn drop_share(&mut self, id: HandleId) -> Vec<PendingRelease> {
        let mut pending = Vec::new();
        let remaining = match self.entry_mut(id) {
            Some(entry) => {
                entry.shares = entry.shares.saturating_sub(1);
                entry.shares
            }
            None => return pending,
        };

        if remaining == 0 {
            self.collect_subtree(id, &mut pending);
            self.remove(id);
        }
        pending
    }

    /// Release an entry and its subtree now, regardless of outstanding shares
    ///
    /// Returns `None` if the entry was already released.
    pub(crate) fn release(&mut self, id: HandleId) -> Option<Vec<PendingRelease>> {
        match self.entry(id) {
            Some(entry) if entry.state.is_live() => {}
            _ => return None,
        }
        let mut pending = Vec::new();
        self.collect_subtree(id, &mut pending);
        Some(pending)
    }

    /// Invalidate fetched children after the parent recycled its buffers
    pub(crate) fn invalidate_fetched_children(&mut self, id: HandleId) -> Vec<PendingRelease> {
        let fetched: Vec<HandleId> = match self.entry(id) {
            Some(entry) => entry
                .children
                .iter()
                .copied()
                .filter(|child| {
                    self.entry(*child)
                        .map(|e| e.state.is_fetched())
                        .unwrap_or(false)
                })
                .collect(),
            None => return Vec::new(),
        };

        let mut pending = Vec::new();
        for child in fetched {
            self.collect_subtree(child, &mut pending);
        }
        pending
    }

    /// Mark a fetched entry as modified
    pub(crate) fn mark_dirty(&mut self, id: HandleId) {
        if let Some(entry) = self.entry_mut(id) {
            if entry.state == HandleState::FetchedClean {
                entry.state = HandleState::FetchedDirty;
            }
        }
    }

    /// Release everything still live; children precede their parents
    pub(crate) fn close_all(&mut self) -> Vec<PendingRelease> {
        self.closed = true;
        let roots: Vec<HandleId> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let entry = slot.entry.as_ref()?;
                let live_parent = entry
                    .parent
                    .and_then(|p| self.entry(p))
                    .map(|p| p.state.is_live())
                    .unwrap_or(false);
                (entry.state.is_live() && !live_parent).then_some(HandleId {
                    index: index as u32,
                    generation: slot.generation,
                })
            })
            .collect();

        let mut pending = Vec::new();
        for root in roots.into_iter().rev() {
            self.collect_subtree(root, &mut pending);
        }
        pending
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Raw handle of a live entry
    pub(crate) fn raw(&self, id: HandleId) -> Option<RawHandle> {
        self.entry(id)
            .filter(|entry| entry.state.is_live())
            .map(|entry| entry.raw)
    }

    pub(crate) fn state(&self, id: HandleId) -> HandleState {
        self.entry(id)
            .map(|entry| entry.state)
            .unwrap_or(HandleState::Released)
    }

    pub(crate) fn kind(&self, id: HandleId) -> Option<HandleKind> {
        self.entry(id).map(|entry| entry.kind)
    }

    pub(crate) fn parent(&self, id: HandleId) -> Option<HandleId> {
        self.entry(id).and_then(|entry| entry.parent)
    }

    pub(crate) fn shares(&self, id: HandleId) -> usize {
        self.entry(id).map(|entry| entry.shares).unwrap_or(0)
    }

    pub(crate) fn payload(&self, id: HandleId) -> Option<Payload> {
        self.entry(id)
            .filter(|entry| entry.state.is_live())
            .and_then(|entry| entry.payload.clone())
    }

    /// Find the live entry wrapping a raw handle
    pub(crate) fn find_by_raw(&self, raw: RawHandle) -> Option<HandleId> {
        let id = *self.by_raw.get(&raw)?;
        self.entry(id)
            .filter(|entry| entry.state.is_live() && entry.raw == raw)
            .map(|_| id)
    }

    /// Number of live (unreleased) entries
    pub(crate) fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref())
            .filter(|entry| entry.state.is_live())
            .count()
    }

    /// Mark `id` and all its live descendants released, children first
    fn collect_subtree(&mut self, id: HandleId, pending: &mut Vec<PendingRelease>) {
        let children = match self.entry(id) {
            Some(entry) if entry.state.is_live() => entry.children.clone(),
            _ => return,
        };
        for child in children {
            self.collect_subtree(child, pending);
        }

        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        if entry.state == HandleState::FetchedDirty {
            tracing::warn!(kind = %entry.kind, raw = %entry.raw, "Discarding modified fetched resource");
        }
        entry.state = HandleState::Released;
        let payload = entry.payload.take();
        let release = entry.release.take();
        let (kind, raw) = (entry.kind, entry.raw);
        if self.by_raw.get(&raw) == Some(&id) {
            self.by_raw.remove(&raw);
        }
        pending.push(PendingRelease {
            id,
            kind,
            raw,
            release,
            _payload: payload,
        });
    }

    /// Free the slot of an entry without shares
    fn remove(&mut self, id: HandleId) {
        let Some(slot) = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
        else {
            return;
        };
        let Some(entry) = slot.entry.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        if let Some(parent) = entry.parent.and_then(|p| self.entry_mut(p)) {
            parent.children.retain(|child| *child != id);
        }
        // children outliving their parent entry lose the edge
        for child in entry.children {
            if let Some(child) = self.entry_mut(child) {
                child.parent = None;
            }
        }
    }
}
