//! Callback registry and notification queue
//!
//! The native layer reports asynchronous events on its own threads and only
//! knows the opaque [`ContextKey`] it was given when a handler was enabled.
//! The registry maps keys back to typed handlers. Native threads never run
//! application code for asynchronous notifications: they enqueue a
//! [`PendingEvent`] on a bounded queue which the application drains with
//! [`Environment::dispatch_pending`](crate::Environment::dispatch_pending) or
//! [`Environment::dispatch_next`](crate::Environment::dispatch_next).
//!
//! Failover callbacks are the exception: the native layer waits for the
//! handler's decision, so they run synchronously on the notifying thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::aq::Dequeue;
use crate::connection::{Connection, FailoverEvent, FailoverRequest, FailoverResult};
use crate::environment::{EnvShared, HaEvent};
use crate::handle::HandleId;
use crate::native::{NativeNotification, NotificationSink, RawHandle};
use crate::subscription::{Event, Subscription};

/// Opaque key handed to the native layer in place of a callback pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey(u64);

impl ContextKey {
    /// Rebuild a key from the value the native layer passed back
    pub fn from_raw(value: u64) -> Self {
        ContextKey(value)
    }

    /// Numeric value
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// HA event handler
pub type HaHandler = Arc<dyn Fn(&HaEvent) + Send + Sync>;

/// Failover handler
pub type FailoverHandler =
    Arc<dyn Fn(&Connection, FailoverRequest, FailoverEvent) -> FailoverResult + Send + Sync>;

/// Change notification handler
pub type ChangeHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Message availability handler
pub type MessageHandler = Arc<dyn Fn(&Dequeue) + Send + Sync>;

/// Typed handler stored in the registry
#[derive(Clone)]
pub enum Handler {
    /// Instance or service up/down events
    HighAvailability(HaHandler),
    /// Transparent application failover steps
    Failover(FailoverHandler),
    /// Database change notification
    Change(ChangeHandler),
    /// Message available on a queue
    Message(MessageHandler),
}

impl Handler {
    fn name(&self) -> &'static str {
        match self {
            Handler::HighAvailability(_) => "high availability",
            Handler::Failover(_) => "failover",
            Handler::Change(_) => "change",
            Handler::Message(_) => "message",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({})", self.name())
    }
}

struct Registration {
    owner: Option<HandleId>,
    handler: Handler,
}

/// Context key to handler map
///
/// Lookups may come from any thread.
pub struct CallbackRegistry {
    next_key: AtomicU64,
    entries: Mutex<HashMap<ContextKey, Registration>>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_key: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler owned by `owner` and return its key
    ///
    /// Registrations owned by a handle are dropped when the handle is released.
    pub(crate) fn register(&self, owner: Option<HandleId>, handler: Handler) -> ContextKey {
        let key = ContextKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(%key, handler = handler.name(), "Callback registered");
        self.entries
            .lock()
            .insert(key, Registration { owner, handler });
        key
    }

    /// Attach a registration to the handle created after its key was handed
    /// to the native layer
    pub(crate) fn set_owner(&self, key: ContextKey, owner: HandleId) {
        if let Some(reg) = self.entries.lock().get_mut(&key) {
            reg.owner = Some(owner);
        }
    }

    /// Look up a handler and its owner
    pub(crate) fn lookup(&self, key: ContextKey) -> Option<(Option<HandleId>, Handler)> {
        self.entries
            .lock()
            .get(&key)
            .map(|reg| (reg.owner, reg.handler.clone()))
    }

    /// Remove a registration
    pub(crate) fn unregister(&self, key: ContextKey) -> bool {
        let removed = self.entries.lock().remove(&key);
        // handler closures may own proxies; drop them outside the lock
        removed.is_some()
    }

    /// Remove every registration owned by one of `owners`
    pub(crate) fn remove_owned(&self, owners: &[HandleId]) {
        let removed: Vec<Registration> = {
            let mut entries = self.entries.lock();
            let keys: Vec<ContextKey> = entries
                .iter()
                .filter(|(_, reg)| reg.owner.map(|o| owners.contains(&o)).unwrap_or(false))
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };
        if !removed.is_empty() {
            tracing::trace!(count = removed.len(), "Callbacks dropped with their owner");
        }
    }

    /// Remove every registration
    pub(crate) fn clear(&self) {
        let removed: Vec<Registration> = self.entries.lock().drain().map(|(_, reg)| reg).collect();
        drop(removed);
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if no handler is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Notification waiting to be dispatched
#[derive(Debug, Clone)]
pub struct PendingEvent {
    /// Key the notification was delivered under
    pub key: ContextKey,
    /// Notification data
    pub notification: NativeNotification,
}

/// Notification sink handed to the native layer
pub(crate) struct EventHub {
    pub(crate) registry: CallbackRegistry,
    sender: Mutex<Option<mpsc::Sender<PendingEvent>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<PendingEvent>>,
    env: OnceLock<Weak<EnvShared>>,
    dropped: AtomicU64,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            registry: CallbackRegistry::new(),
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            env: OnceLock::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn attach(&self, env: &Arc<EnvShared>) {
        let _ = self.env.set(Arc::downgrade(env));
    }

    fn env(&self) -> Option<Arc<EnvShared>> {
        self.env.get().and_then(Weak::upgrade)
    }

    /// Notifications dropped because the queue was full
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Dispatch everything queued right now, returns the number of handlers run
    pub(crate) fn dispatch_pending(&self) -> usize {
        let Some(env) = self.env() else {
            return 0;
        };
        let mut dispatched = 0;
        loop {
            // an async dispatcher currently owns the queue
            let Ok(mut receiver) = self.receiver.try_lock() else {
                return dispatched;
            };
            let Ok(event) = receiver.try_recv() else {
                return dispatched;
            };
            drop(receiver);
            if self.dispatch(&env, event) {
                dispatched += 1;
            }
        }
    }

    /// Wait for the next notification and dispatch it
    ///
    /// Returns `false` once the queue is closed and drained.
    pub(crate) async fn dispatch_next(&self) -> bool {
        loop {
            let event = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };
            let Some(event) = event else {
                return false;
            };
            let Some(env) = self.env() else {
                return false;
            };
            if self.dispatch(&env, event) {
                return true;
            }
        }
    }

    /// Stop accepting notifications and discard queued ones
    pub(crate) fn close(&self) {
        self.sender.lock().take();
        if let Ok(mut receiver) = self.receiver.try_lock() {
            receiver.close();
            let mut discarded = 0usize;
            while receiver.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                tracing::debug!(discarded, "Discarded pending notifications");
            }
        }
    }

    /// Resolve the key again and run the handler with a rebuilt typed wrapper
    fn dispatch(&self, env: &Arc<EnvShared>, event: PendingEvent) -> bool {
        let Some((owner, handler)) = self.registry.lookup(event.key) else {
            tracing::trace!(key = %event.key, "Dropping notification for unregistered key");
            return false;
        };

        match (handler, event.notification) {
            (
                Handler::HighAvailability(handler),
                NativeNotification::HighAvailability {
                    session,
                    source,
                    event,
                    time,
                },
            ) => {
                let ha = HaEvent {
                    connection: Connection::from_raw(env, session),
                    source,
                    event,
                    time,
                };
                handler(&ha);
                true
            }
            (
                Handler::Change(handler),
                NativeNotification::DatabaseChange {
                    kind,
                    object_event,
                    database,
                    object,
                    rowid,
                },
            ) => {
                let Some(subscription) = owner.and_then(|id| Subscription::revive(env, id)) else {
                    tracing::trace!(key = %event.key, "Subscription gone, dropping change event");
                    return false;
                };
                let event = Event {
                    kind,
                    object_event,
                    database,
                    object,
                    rowid,
                    subscription,
                };
                handler(&event);
                true
            }
            (Handler::Message(handler), NativeNotification::MessageAvailable { queue }) => {
                let Some(dequeue) = owner.and_then(|id| Dequeue::revive(env, id)) else {
                    tracing::trace!(%queue, "Dequeue gone, dropping message notification");
                    return false;
                };
                handler(&dequeue);
                true
            }
            (handler, notification) => {
                tracing::warn!(key = %event.key, handler = handler.name(), ?notification, "Notification does not match handler");
                false
            }
        }
    }
}

impl NotificationSink for EventHub {
    fn notify(&self, key: ContextKey, notification: NativeNotification) {
        if self.registry.lookup(key).is_none() {
            tracing::trace!(%key, "Notification for unknown key ignored");
            return;
        }

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            tracing::trace!(%key, "Notification after cleanup ignored");
            return;
        };
        match sender.try_send(PendingEvent { key, notification }) {
            Ok(()) => tracing::trace!(%key, "Notification queued"),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%key, "Notification queue full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(%key, "Notification queue closed");
            }
        }
    }

    fn failover(
        &self,
        key: ContextKey,
        session: RawHandle,
        request: FailoverRequest,
        event: FailoverEvent,
    ) -> FailoverResult {
        let Some((_, Handler::Failover(handler))) = self.registry.lookup(key) else {
            tracing::trace!(%key, "No failover handler, continuing");
            return FailoverResult::Ok;
        };
        let Some(connection) = self.env().and_then(|env| Connection::from_raw(&env, session)) else {
            return FailoverResult::Ok;
        };
        handler(&connection, request, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change_handler() -> Handler {
        Handler::Change(Arc::new(|_event: &Event| {}))
    }

    #[test]
    fn test_register_lookup_unregister() {
        let registry = CallbackRegistry::new();
        let key = registry.register(None, change_handler());
        assert!(matches!(registry.lookup(key), Some((None, Handler::Change(_)))));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(key));
        assert!(!registry.unregister(key));
        assert!(registry.lookup(key).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_keys_are_distinct() {
        let registry = CallbackRegistry::new();
        let a = registry.register(None, change_handler());
        let b = registry.register(None, change_handler());
        assert_ne!(a, b);
        assert_eq!(ContextKey::from_raw(a.value()), a);
    }

    #[test]
    fn test_unknown_key_is_ignored() {
        let hub = EventHub::new(4);
        hub.notify(
            ContextKey::from_raw(42),
            NativeNotification::MessageAvailable {
                queue: "Q".to_string(),
            },
        );
        assert_eq!(hub.dropped(), 0);
        // no environment attached: nothing to dispatch
        assert_eq!(hub.dispatch_pending(), 0);
    }

    #[test]
    fn test_full_queue_drops_events() {
        let hub = EventHub::new(1);
        let key = hub.registry.register(None, change_handler());
        for _ in 0..3 {
            hub.notify(
                key,
                NativeNotification::MessageAvailable {
                    queue: "Q".to_string(),
                },
            );
        }
        assert_eq!(hub.dropped(), 2);
    }

    #[test]
    fn test_failover_defaults_to_ok() {
        let hub = EventHub::new(1);
        let result = hub.failover(
            ContextKey::from_raw(7),
            RawHandle(1),
            FailoverRequest::Session,
            FailoverEvent::Begin,
        );
        assert_eq!(result, FailoverResult::Ok);
    }
}
