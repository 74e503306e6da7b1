//! Reference-counted handle proxies
//!
//! A [`Handle`] is the value every veneer type (connection, statement, LOB,
//! ...) is built on. All clones of a handle share one entry of the
//! environment's handle table: cloning adds a share, dropping removes one,
//! and the last drop runs the native release of the resource and of every
//! dependent resource still registered under it.
//!
//! Once the native resource is gone (explicit close, parent teardown,
//! environment cleanup) every remaining clone fails fast with
//! [`Error::InvalidHandle`](crate::Error::InvalidHandle).

pub(crate) mod table;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::environment::EnvShared;
use crate::error::{Error, Result};
use crate::native::{HandleKind, RawHandle};

pub use table::{HandleId, HandleState, Origin};
pub(crate) use table::{release_fn, NewEntry, RejectReason};

/// Shared proxy for one native resource
pub struct Handle {
    env: Arc<EnvShared>,
    id: HandleId,
    kind: HandleKind,
}

impl Handle {
    /// Register a freshly obtained native resource
    ///
    /// If the environment or the parent is already gone the resource is
    /// released immediately and the error is returned.
    pub(crate) fn register(env: &Arc<EnvShared>, entry: NewEntry) -> Result<Handle> {
        let kind = entry.kind;
        let inserted = env.table.lock().insert(entry);

        match inserted {
            Ok(id) => Ok(Handle {
                env: Arc::clone(env),
                id,
                kind,
            }),
            Err(rejected) => {
                if let Some(release) = rejected.release {
                    let status = release(env.native(), env.err);
                    if !status.is_success() {
                        tracing::warn!(%kind, ?status, "Failed to release rejected handle");
                    }
                }
                Err(match rejected.reason {
                    RejectReason::Closed => Error::NotInitialized,
                    RejectReason::ParentReleased(parent) => Error::InvalidHandle { kind: parent },
                })
            }
        }
    }

    /// Rebuild a proxy from a table id, if the entry is still live
    pub(crate) fn revive(env: &Arc<EnvShared>, id: HandleId) -> Option<Handle> {
        let mut table = env.table.lock();
        if !table.state(id).is_live() {
            return None;
        }
        let kind = table.kind(id)?;
        table.acquire(id).then(|| Handle {
            env: Arc::clone(env),
            id,
            kind,
        })
    }

    /// Raw native handle, or [`Error::InvalidHandle`] once released
    pub(crate) fn raw(&self) -> Result<RawHandle> {
        self.env
            .table
            .lock()
            .raw(self.id)
            .ok_or(Error::InvalidHandle { kind: self.kind })
    }

    pub(crate) fn env(&self) -> &Arc<EnvShared> {
        &self.env
    }

    /// Table id of the shared entry
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Kind of native resource
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Current lifecycle state
    pub fn state(&self) -> HandleState {
        self.env.table.lock().state(self.id)
    }

    /// Check whether the native resource is still live
    pub fn is_valid(&self) -> bool {
        self.state().is_live()
    }

    /// Number of proxies sharing the entry
    pub fn share_count(&self) -> usize {
        self.env.table.lock().shares(self.id)
    }

    /// Parent entry in the ownership chain
    pub fn parent_id(&self) -> Option<HandleId> {
        self.env.table.lock().parent(self.id)
    }

    /// Release the resource now, even while other proxies exist
    pub(crate) fn release(&self, call: &'static str) -> Result<()> {
        let pending = self.env.table.lock().release(self.id);
        match pending {
            Some(pending) => self.env.finish(pending, call),
            None => Err(Error::InvalidHandle { kind: self.kind }),
        }
    }

    /// Record a modification of a fetched resource
    pub(crate) fn mark_dirty(&self) {
        self.env.table.lock().mark_dirty(self.id);
    }

    /// Drop the fetched resources handed out by this resource
    pub(crate) fn invalidate_fetched_children(&self) {
        let pending = self.env.table.lock().invalidate_fetched_children(self.id);
        if pending.is_empty() {
            return;
        }
        tracing::trace!(parent = %self.id, count = pending.len(), "Invalidated fetched children");
        if let Err(e) = self.env.finish(pending, "invalidate") {
            tracing::warn!(error = %e, "Releasing fetched children failed");
        }
    }

    /// Typed payload attached at registration
    pub(crate) fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let payload = self.env.table.lock().payload(self.id)?;
        payload.downcast::<T>().ok()
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        // a released entry keeps its slot until the last share is gone
        self.env.table.lock().acquire(self.id);
        Handle {
            env: Arc::clone(&self.env),
            id: self.id,
            kind: self.kind,
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let pending = self.env.table.lock().drop_share(self.id);
        if pending.is_empty() {
            return;
        }
        if let Err(e) = self.env.finish(pending, "release") {
            tracing::warn!(kind = %self.kind, id = %self.id, error = %e, "Native release failed");
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.env, &other.env) && self.id == other.id
    }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
