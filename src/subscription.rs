//! Database change notification
//!
//! A [`Subscription`] asks the server to report changes to the objects
//! touched by the queries it watches. Notifications arrive on native threads
//! and are queued; the handler runs when the application dispatches them
//! (see [`Environment::dispatch_pending`](crate::Environment::dispatch_pending)).

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use crate::callback::{ContextKey, Handler};
use crate::connection::{Connection, SessionRef};
use crate::environment::EnvShared;
use crate::error::Result;
use crate::handle::{release_fn, Handle, HandleId, NewEntry};
use crate::native::{HandleKind, Namespace, RawHandle, SubscriptionSpec};
use crate::status::{check, CallContext, Translator};

/// Kind of change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Database started
    DatabaseStart,
    /// Database shut down
    DatabaseShutdown,
    /// Any instance of a cluster shut down
    DatabaseShutdownAny,
    /// Database dropped
    DatabaseDrop,
    /// The subscription was unregistered by the server
    Unregister,
    /// A watched object changed
    ObjectChanged,
}

/// Operation behind an [`EventType::ObjectChanged`] event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectEvent {
    /// Rows inserted
    Inserted,
    /// Rows updated
    Updated,
    /// Rows deleted
    Deleted,
    /// Object altered
    Altered,
    /// Object dropped
    Dropped,
    /// Unspecified change
    Generic,
}

/// Which changes a subscription reports
///
/// ```rust
/// use ocibind::ChangeTypes;
///
/// let types = ChangeTypes::OBJECT | ChangeTypes::ROWS;
/// assert!(types.contains(ChangeTypes::ROWS));
/// assert!(!types.contains(ChangeTypes::DATABASE));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChangeTypes(u32);

impl ChangeTypes {
    /// Object level changes
    pub const OBJECT: ChangeTypes = ChangeTypes(1);
    /// Row level changes, with row ids
    pub const ROWS: ChangeTypes = ChangeTypes(2);
    /// Database startup, shutdown and drop
    pub const DATABASE: ChangeTypes = ChangeTypes(4);
    /// Everything
    pub const ALL: ChangeTypes = ChangeTypes(7);

    /// Raw flag bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Check whether all flags in `other` are set
    pub fn contains(self, other: ChangeTypes) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ChangeTypes {
    type Output = ChangeTypes;

    fn bitor(self, rhs: ChangeTypes) -> ChangeTypes {
        ChangeTypes(self.0 | rhs.0)
    }
}

/// Change notification passed to a subscription handler
#[derive(Debug, Clone)]
pub struct Event {
    pub(crate) kind: EventType,
    pub(crate) object_event: Option<ObjectEvent>,
    pub(crate) database: String,
    pub(crate) object: Option<String>,
    pub(crate) rowid: Option<String>,
    pub(crate) subscription: Subscription,
}

impl Event {
    /// Event type
    pub fn kind(&self) -> EventType {
        self.kind
    }

    /// Operation on the changed object
    pub fn object_event(&self) -> Option<ObjectEvent> {
        self.object_event
    }

    /// Database the event comes from
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Changed object, as `OWNER.NAME` or bare table name
    pub fn object(&self) -> Option<&str> {
        self.object.as_deref()
    }

    /// Changed row
    pub fn rowid(&self) -> Option<&str> {
        self.rowid.as_deref()
    }

    /// Subscription that received the event
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}

struct SubscriptionInner {
    name: String,
    port: u32,
    timeout: u32,
    key: ContextKey,
    session: SessionRef,
}

/// Registered change notification
#[derive(Clone)]
pub struct Subscription {
    handle: Handle,
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    /// Register a subscription on a connection
    ///
    /// Requires an environment initialized with
    /// [`EnvMode::EVENTS`](crate::EnvMode::EVENTS). `port` 0 lets the
    /// client pick one; `timeout` 0 keeps the registration until
    /// [`Subscription::unregister`].
    pub fn register<F>(
        conn: &Connection,
        name: &str,
        types: ChangeTypes,
        handler: F,
        port: u32,
        timeout: u32,
    ) -> Result<Subscription>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let env = conn.shared();
        env.ensure_events("database change notification")?;
        let session = conn.raw()?;

        let registry = &env.hub.registry;
        let key = registry.register(None, Handler::Change(Arc::new(handler)));
        let spec = SubscriptionSpec {
            name: name.to_string(),
            namespace: Namespace::DatabaseChange {
                change_types: types.bits(),
            },
            port,
            timeout,
        };

        let mut raw = RawHandle::NULL;
        let status = env
            .native()
            .subscription_register(env.raw, session, conn.err(), &spec, key, &mut raw);
        if let Err(e) = Translator::check(&conn.ctx("subscription_register"), status) {
            registry.unregister(key);
            return Err(e);
        }

        let inner = Arc::new(SubscriptionInner {
            name: spec.name,
            port,
            timeout,
            key,
            session: conn.session_ref(),
        });
        let release = release_fn(move |api, err| api.subscription_unregister(raw, err));
        let entry = NewEntry::allocated(raw, HandleKind::Subscription, release)
            .child_of(conn.handle().id())
            .with_payload(inner.clone());
        let handle = match Handle::register(env, entry) {
            Ok(handle) => handle,
            Err(e) => {
                registry.unregister(key);
                return Err(e);
            }
        };
        registry.set_owner(key, handle.id());

        tracing::debug!(name = %inner.name, %key, "Subscription registered");
        Ok(Subscription { handle, inner })
    }

    pub(crate) fn revive(env: &Arc<EnvShared>, id: HandleId) -> Option<Subscription> {
        let handle = Handle::revive(env, id)?;
        if handle.kind() != HandleKind::Subscription {
            return None;
        }
        let inner = handle.payload::<SubscriptionInner>()?;
        Some(Subscription { handle, inner })
    }

    fn ctx(&self, call: &'static str) -> CallContext<'_> {
        self.inner.session.ctx(self.handle.env(), call).on(HandleKind::Subscription)
    }

    /// Watch the objects a query reads
    pub fn watch(&self, sql: &str) -> Result<()> {
        let raw = self.handle.raw()?;
        let env = self.handle.env();
        let session = self.inner.session.raw(env)?;
        check!(
            self.ctx("subscription_watch"),
            env.native()
                .subscription_watch(session, raw, self.inner.session.err(), sql)
        );
        tracing::trace!(name = %self.inner.name, sql = sql, "Query watched");
        Ok(())
    }

    /// Unregister now; the handler is dropped and clones become invalid
    pub fn unregister(&self) -> Result<()> {
        tracing::debug!(name = %self.inner.name, "Unregistering subscription");
        self.handle.release("subscription_unregister")
    }

    /// Check whether the subscription is still registered
    pub fn is_registered(&self) -> bool {
        self.handle.is_valid()
    }

    /// Subscription name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Notification port (0 = chosen by the client)
    pub fn port(&self) -> u32 {
        self.inner.port
    }

    /// Registration timeout in seconds (0 = none)
    pub fn timeout(&self) -> u32 {
        self.inner.timeout
    }

    /// Connection the subscription was registered on
    pub fn connection(&self) -> Result<Connection> {
        self.inner.session.connection(self.handle.env())
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.inner.name)
            .field("key", &self.inner.key)
            .field("handle", &self.handle.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_types_flags() {
        assert_eq!((ChangeTypes::OBJECT | ChangeTypes::ROWS | ChangeTypes::DATABASE), ChangeTypes::ALL);
        assert!(ChangeTypes::ALL.contains(ChangeTypes::ROWS));
        assert!(!ChangeTypes::OBJECT.contains(ChangeTypes::ROWS));
        assert_eq!(ChangeTypes::default().bits(), 0);
    }
}
