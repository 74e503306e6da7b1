//! Environment
//!
//! The [`Environment`] is the explicit root of everything the binding does.
//! It owns the native environment handle, the handle table shared by every
//! proxy, and the callback registry with its notification queue.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ocibind::native::memory::MemoryClient;
//! use ocibind::{Connection, ConnectParams, Environment, EnvironmentConfig};
//!
//! # fn main() -> ocibind::Result<()> {
//! let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(MemoryClient::new()))?;
//! let conn = Connection::open(&env, &"scott/tiger@db".parse::<ConnectParams>()?)?;
//! conn.close()?;
//! env.cleanup()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;

use crate::callback::{ContextKey, EventHub, Handler};
use crate::config::{EnvMode, EnvironmentConfig};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::handle::table::{HandleTable, PendingRelease};
use crate::handle::HandleId;
use crate::native::{HandleKind, NativeApi, NotificationSink, RawHandle, Status};
use crate::status::{CallContext, Translator};
use crate::sync::{self, ThreadKey};

/// Origin of a high availability event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaSource {
    /// An instance
    Instance,
    /// A database
    Database,
    /// A cluster node
    Node,
    /// A service
    Service,
    /// A service member
    ServiceMember,
    /// An ASM instance
    AsmInstance,
    /// Service pre-connect stage
    PreConnect,
}

/// Kind of high availability event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaEventType {
    /// The source went down
    Down,
    /// The source came up
    Up,
}

/// High availability event, as passed to the handler set with
/// [`Environment::set_ha_handler`]
#[derive(Debug, Clone)]
pub struct HaEvent {
    pub(crate) connection: Option<Connection>,
    pub(crate) source: HaSource,
    pub(crate) event: HaEventType,
    pub(crate) time: NaiveDateTime,
}

impl HaEvent {
    /// Connection affected by the event, if it is still open
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Event source
    pub fn source(&self) -> HaSource {
        self.source
    }

    /// Up or down
    pub fn event_type(&self) -> HaEventType {
        self.event
    }

    /// When the event was generated
    pub fn time(&self) -> NaiveDateTime {
        self.time
    }
}

/// State shared by the environment and every proxy created from it
pub(crate) struct EnvShared {
    native: Arc<dyn NativeApi>,
    pub(crate) raw: RawHandle,
    pub(crate) err: RawHandle,
    mode: EnvMode,
    warnings: AtomicBool,
    active: AtomicBool,
    pub(crate) table: Mutex<HandleTable>,
    pub(crate) hub: Arc<EventHub>,
    ha_key: Mutex<Option<ContextKey>>,
    thread_keys: Arc<sync::KeyNames>,
}

impl EnvShared {
    pub(crate) fn native(&self) -> &dyn NativeApi {
        self.native.as_ref()
    }

    pub(crate) fn warnings_enabled(&self) -> bool {
        self.warnings.load(Ordering::Relaxed)
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    pub(crate) fn ensure_events(&self, feature: &str) -> Result<()> {
        self.ensure_active()?;
        if self.mode.contains(EnvMode::EVENTS) {
            Ok(())
        } else {
            Err(Error::NotAvailable(format!(
                "{} requires an environment initialized with EnvMode::EVENTS",
                feature
            )))
        }
    }

    /// Context for a call reporting on the environment's error descriptor
    pub(crate) fn ctx(self: &Arc<Self>, call: &'static str) -> CallContext<'_> {
        CallContext::new(self, call, self.err)
    }

    /// Run native releases collected from the table and drop the callbacks
    /// their owners registered
    pub(crate) fn finish(self: &Arc<Self>, pending: Vec<PendingRelease>, call: &'static str) -> Result<()> {
        let owners: Vec<HandleId> = pending.iter().map(|p| p.id).collect();
        let mut first_error = None;

        for release in pending {
            let (kind, raw) = (release.kind, release.raw);
            let status = release.run(self.native(), self.err);
            if let Err(e) = Translator::check(&self.ctx(call), status) {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    tracing::warn!(%kind, %raw, error = %e, "Native release failed");
                }
            }
        }

        self.hub.registry.remove_owned(&owners);
        first_error.map_or(Ok(()), Err)
    }

    fn cleanup(self: &Arc<Self>) -> Result<usize> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(0);
        }

        let mut result = Ok(());
        if self.ha_key.lock().take().is_some() {
            let status = self.native.set_ha_callback(self.raw, self.err, None);
            result = Translator::check(&self.ctx("set_ha_callback"), status).map(|_| ());
        }

        let pending = self.table.lock().close_all();
        let released = pending.len();
        let released_result = self.finish(pending, "cleanup");
        if result.is_ok() {
            result = released_result;
        }

        self.hub.registry.clear();
        self.hub.close();

        let status = self.native.handle_free(self.err, HandleKind::Error);
        if status != Status::Success {
            tracing::warn!(?status, "Failed to free environment error handle");
        }
        let status = self.native.handle_free(self.raw, HandleKind::Environment);
        if status != Status::Success {
            tracing::warn!(?status, "Failed to free environment handle");
        }

        if released > 0 {
            tracing::warn!(released, "Environment cleaned up with handles still open");
        } else {
            tracing::debug!("Environment cleaned up");
        }
        result.map(|_| released)
    }
}

impl fmt::Debug for EnvShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvShared")
            .field("raw", &self.raw)
            .field("mode", &self.mode)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

/// Root object of the binding
///
/// Everything else is created from an environment. Dropping it cleans up
/// like [`Environment::cleanup`]: every native resource still alive is
/// released and remaining proxies fail with
/// [`Error::InvalidHandle`](crate::Error::InvalidHandle).
pub struct Environment {
    shared: Arc<EnvShared>,
}

impl Environment {
    /// Create the native environment
    pub fn initialize(config: EnvironmentConfig, native: Arc<dyn NativeApi>) -> Result<Environment> {
        let hub = Arc::new(EventHub::new(config.event_queue_capacity));
        let sink: Arc<dyn NotificationSink> = hub.clone();

        let mut raw = RawHandle::NULL;
        let status = native.env_create(config.mode, config.lib_path.as_deref(), sink, &mut raw);
        if !status.is_success() || raw.is_null() {
            return Err(Error::EnvironmentCreation(format!(
                "env_create returned {:?}",
                status
            )));
        }

        let mut err = RawHandle::NULL;
        let status = native.handle_alloc(raw, HandleKind::Error, &mut err);
        if !status.is_success() {
            native.handle_free(raw, HandleKind::Environment);
            return Err(Error::EnvironmentCreation(format!(
                "cannot allocate error handle: {:?}",
                status
            )));
        }

        let shared = Arc::new(EnvShared {
            native,
            raw,
            err,
            mode: config.mode,
            warnings: AtomicBool::new(config.warnings),
            active: AtomicBool::new(true),
            table: Mutex::new(HandleTable::new()),
            hub,
            ha_key: Mutex::new(None),
            thread_keys: Arc::new(Mutex::new(HashSet::new())),
        });
        shared.hub.attach(&shared);

        tracing::debug!(
            mode = config.mode.bits(),
            client_version = shared.native.client_version(),
            "Environment initialized"
        );
        Ok(Environment { shared })
    }

    /// Release every native resource still alive and the environment itself
    ///
    /// Returns how many handles were still open, i.e. leaked by the
    /// application. Calling it more than once is a no-op returning 0.
    pub fn cleanup(&self) -> Result<usize> {
        self.shared.cleanup()
    }

    pub(crate) fn shared(&self) -> &Arc<EnvShared> {
        &self.shared
    }

    /// Check whether the environment is usable
    pub fn is_initialized(&self) -> bool {
        self.shared.ensure_active().is_ok()
    }

    /// Mode flags the environment was created with
    pub fn mode(&self) -> EnvMode {
        self.shared.mode
    }

    /// Check whether threading primitives are enabled
    pub fn is_threaded(&self) -> bool {
        self.shared.mode.contains(EnvMode::THREADED)
    }

    /// Raise native warnings as errors
    pub fn enable_warnings(&self, enabled: bool) {
        self.shared.warnings.store(enabled, Ordering::Relaxed);
    }

    /// Check whether native warnings are raised as errors
    pub fn warnings_enabled(&self) -> bool {
        self.shared.warnings_enabled()
    }

    /// Version of the native client library
    pub fn client_version(&self) -> u32 {
        self.shared.native.client_version()
    }

    /// Number of native resources currently tracked
    pub fn live_handles(&self) -> usize {
        self.shared.table.lock().live_count()
    }

    /// Install the handler for instance / service HA events
    ///
    /// Requires [`EnvMode::EVENTS`]. Replaces any previous handler.
    pub fn set_ha_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&HaEvent) + Send + Sync + 'static,
    {
        self.shared.ensure_events("HA events")?;
        let registry = &self.shared.hub.registry;
        let key = registry.register(None, Handler::HighAvailability(Arc::new(handler)));

        let status = self
            .shared
            .native
            .set_ha_callback(self.shared.raw, self.shared.err, Some(key));
        if let Err(e) = Translator::check(&self.shared.ctx("set_ha_callback"), status) {
            registry.unregister(key);
            return Err(e);
        }

        if let Some(previous) = self.shared.ha_key.lock().replace(key) {
            registry.unregister(previous);
        }
        Ok(())
    }

    /// Remove the HA event handler
    pub fn clear_ha_handler(&self) -> Result<()> {
        self.shared.ensure_active()?;
        let Some(key) = self.shared.ha_key.lock().take() else {
            return Ok(());
        };
        self.shared.hub.registry.unregister(key);
        let status = self
            .shared
            .native
            .set_ha_callback(self.shared.raw, self.shared.err, None);
        Translator::check(&self.shared.ctx("set_ha_callback"), status)?;
        Ok(())
    }

    /// Run the handlers of every queued notification on the calling thread
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch_pending(&self) -> usize {
        self.shared.hub.dispatch_pending()
    }

    /// Wait for the next notification and run its handler
    ///
    /// Returns `false` once the environment has been cleaned up.
    pub async fn dispatch_next(&self) -> bool {
        self.shared.hub.dispatch_next().await
    }

    /// Number of notifications dropped because the queue was full
    pub fn dropped_events(&self) -> u64 {
        self.shared.hub.dropped()
    }

    /// Number of registered notification handlers
    pub fn registered_handlers(&self) -> usize {
        self.shared.hub.registry.len()
    }

    /// Create an application mutex
    ///
    /// Requires [`EnvMode::THREADED`].
    pub fn mutex(&self) -> Result<sync::Mutex> {
        self.ensure_threaded("mutex")?;
        Ok(sync::Mutex::new())
    }

    /// Create a named thread-local slot
    ///
    /// Requires [`EnvMode::THREADED`]. Names are unique per environment
    /// while a clone of the key is alive.
    pub fn thread_key<T: Clone + Send + 'static>(&self, name: &str) -> Result<ThreadKey<T>> {
        self.ensure_threaded("thread key")?;
        if !self.shared.thread_keys.lock().insert(name.to_string()) {
            return Err(Error::InvalidArgument(format!(
                "thread key '{}' already exists",
                name
            )));
        }
        Ok(ThreadKey::new(name, Arc::downgrade(&self.shared.thread_keys)))
    }

    fn ensure_threaded(&self, feature: &str) -> Result<()> {
        self.shared.ensure_active()?;
        if self.is_threaded() {
            Ok(())
        } else {
            Err(Error::NotAvailable(format!(
                "{} requires an environment initialized with EnvMode::THREADED",
                feature
            )))
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(e) = self.shared.cleanup() {
            tracing::warn!(error = %e, "Environment cleanup failed");
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("mode", &self.shared.mode)
            .field("initialized", &self.is_initialized())
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::memory::MemoryClient;

    fn make_env(mode: EnvMode) -> Environment {
        Environment::initialize(EnvironmentConfig::new().mode(mode), Arc::new(MemoryClient::new()))
            .unwrap()
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let env = make_env(EnvMode::DEFAULT);
        assert!(env.is_initialized());
        assert_eq!(env.cleanup().unwrap(), 0);
        assert!(!env.is_initialized());
        assert_eq!(env.cleanup().unwrap(), 0);
    }

    #[test]
    fn test_threading_primitives_require_threaded_mode() {
        let env = make_env(EnvMode::DEFAULT);
        assert!(matches!(env.mutex(), Err(Error::NotAvailable(_))));
        assert!(matches!(env.thread_key::<u32>("k"), Err(Error::NotAvailable(_))));

        let env = make_env(EnvMode::THREADED);
        assert!(env.mutex().is_ok());
        let key = env.thread_key::<u32>("k").unwrap();
        assert!(matches!(env.thread_key::<u32>("k"), Err(Error::InvalidArgument(_))));
        drop(key);
        assert!(env.thread_key::<u32>("k").is_ok());
    }

    #[test]
    fn test_ha_handler_requires_events_mode() {
        let env = make_env(EnvMode::DEFAULT);
        assert!(matches!(
            env.set_ha_handler(|_| {}),
            Err(Error::NotAvailable(_))
        ));

        let env = make_env(EnvMode::EVENTS);
        env.set_ha_handler(|_| {}).unwrap();
        env.set_ha_handler(|_| {}).unwrap();
        assert_eq!(env.registered_handlers(), 1);
        env.clear_ha_handler().unwrap();
        assert_eq!(env.registered_handlers(), 0);
    }

    #[test]
    fn test_warnings_toggle() {
        let env = make_env(EnvMode::DEFAULT);
        assert!(!env.warnings_enabled());
        env.enable_warnings(true);
        assert!(env.warnings_enabled());
    }
}
