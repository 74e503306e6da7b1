//! Session pools
//!
//! Sessions taken from a [`Pool`] are children of the pool: returning them is
//! a matter of dropping the last [`Connection`] clone, and closing the pool
//! invalidates every session still checked out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConnectParams, PoolConfig};
use crate::connection::Connection;
use crate::environment::{EnvShared, Environment};
use crate::error::{Error, Result};
use crate::handle::{release_fn, Handle, NewEntry};
use crate::native::{Attr, AttrValue, HandleKind, RawHandle};
use crate::status::{check, CallContext, Translator};

struct PoolInner {
    err: RawHandle,
    params: ConnectParams,
}

/// Shared proxy for a native session pool
#[derive(Clone)]
pub struct Pool {
    handle: Handle,
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool and open its initial sessions
    pub fn create(env: &Environment, params: &ConnectParams, config: &PoolConfig) -> Result<Pool> {
        config.validate()?;
        let shared = env.shared();
        shared.ensure_active()?;
        let native = shared.native();

        let mut err = RawHandle::NULL;
        check!(
            shared.ctx("handle_alloc"),
            native.handle_alloc(shared.raw, HandleKind::Error, &mut err)
        );

        let mut raw = RawHandle::NULL;
        let status = native.pool_create(
            shared.raw,
            err,
            &params.database,
            &params.user,
            params.password(),
            config.min,
            config.max,
            config.increment,
            &mut raw,
        );
        if let Err(e) = Translator::check(&CallContext::new(shared, "pool_create", err), status) {
            native.handle_free(err, HandleKind::Error);
            return Err(e);
        }

        let release = release_fn(move |api, env_err| {
            let status = api.pool_destroy(raw, env_err);
            api.handle_free(err, HandleKind::Error);
            status
        });
        let handle = Handle::register(shared, NewEntry::allocated(raw, HandleKind::Pool, release))?;
        let pool = Pool {
            handle,
            inner: Arc::new(PoolInner {
                err,
                params: params.clone(),
            }),
        };

        pool.set_timeout(config.timeout)?;
        pool.set_no_wait(config.no_wait)?;
        pool.set_statement_cache_size(config.stmt_cache_size)?;

        tracing::debug!(
            database = %params.database,
            min = config.min,
            max = config.max,
            "Session pool created"
        );
        Ok(pool)
    }

    fn shared(&self) -> &Arc<EnvShared> {
        self.handle.env()
    }

    fn ctx(&self, call: &'static str) -> CallContext<'_> {
        CallContext::new(self.shared(), call, self.inner.err).on(HandleKind::Pool)
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Take a session from the pool
    ///
    /// `tag` selects a session previously returned with the same tag.
    pub fn connection(&self, tag: Option<&str>) -> Result<Connection> {
        let raw = self.handle.raw()?;
        let shared = self.shared();
        let native = shared.native();

        let mut err = RawHandle::NULL;
        check!(
            shared.ctx("handle_alloc"),
            native.handle_alloc(shared.raw, HandleKind::Error, &mut err)
        );

        let mut session = RawHandle::NULL;
        let status = native.pool_get_session(raw, err, tag.unwrap_or(""), &mut session);
        if let Err(e) = Translator::check(&CallContext::new(shared, "pool_get_session", err), status) {
            native.handle_free(err, HandleKind::Error);
            return Err(e);
        }

        Connection::register(shared, session, err, &self.inner.params, Some(self.handle.id()))
    }

    /// Destroy the pool now; sessions still checked out become invalid
    pub fn close(&self) -> Result<()> {
        self.handle.release("pool_destroy")
    }

    /// Check whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        !self.handle.is_valid()
    }

    /// Sessions currently checked out
    pub fn busy_count(&self) -> Result<u32> {
        self.uint(Attr::PoolBusyCount)
    }

    /// Sessions currently open
    pub fn open_count(&self) -> Result<u32> {
        self.uint(Attr::PoolOpenCount)
    }

    /// Minimum number of sessions
    pub fn min(&self) -> Result<u32> {
        self.uint(Attr::PoolMin)
    }

    /// Maximum number of sessions
    pub fn max(&self) -> Result<u32> {
        self.uint(Attr::PoolMax)
    }

    /// Number of sessions opened each time the pool grows
    pub fn increment(&self) -> Result<u32> {
        self.uint(Attr::PoolIncrement)
    }

    /// Idle timeout of pooled sessions
    pub fn timeout(&self) -> Result<Duration> {
        Ok(Duration::from_secs(u64::from(self.uint(Attr::PoolTimeout)?)))
    }

    /// Set the idle timeout of pooled sessions
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        let secs = u32::try_from(timeout.as_secs())
            .map_err(|_| Error::InvalidArgument(format!("pool timeout too large: {:?}", timeout)))?;
        self.set_attr(Attr::PoolTimeout, AttrValue::UInt(secs))
    }

    /// Check whether an exhausted pool fails instead of waiting
    pub fn no_wait(&self) -> Result<bool> {
        let value = self.attr(Attr::PoolNoWait)?;
        value.as_bool().ok_or_else(|| Error::type_mismatch("boolean", value))
    }

    /// Fail instead of waiting when the pool is exhausted
    pub fn set_no_wait(&self, no_wait: bool) -> Result<()> {
        self.set_attr(Attr::PoolNoWait, AttrValue::Bool(no_wait))
    }

    /// Statement cache size of pooled sessions
    pub fn statement_cache_size(&self) -> Result<u32> {
        self.uint(Attr::StmtCacheSize)
    }

    /// Set the statement cache size of pooled sessions
    pub fn set_statement_cache_size(&self, size: u32) -> Result<()> {
        self.set_attr(Attr::StmtCacheSize, AttrValue::UInt(size))
    }

    fn uint(&self, attr: Attr) -> Result<u32> {
        let value = self.attr(attr)?;
        value
            .as_u32()
            .ok_or_else(|| Error::type_mismatch("unsigned integer", value))
    }

    fn attr(&self, attr: Attr) -> Result<AttrValue> {
        let raw = self.handle.raw()?;
        let mut value = AttrValue::None;
        check!(
            self.ctx("attr_get"),
            self.shared()
                .native()
                .attr_get(raw, HandleKind::Pool, attr, self.inner.err, &mut value)
        );
        Ok(value)
    }

    fn set_attr(&self, attr: Attr, value: AttrValue) -> Result<()> {
        let raw = self.handle.raw()?;
        check!(
            self.ctx("attr_set"),
            self.shared()
                .native()
                .attr_set(raw, HandleKind::Pool, attr, &value, self.inner.err)
        );
        Ok(())
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("params", &self.inner.params)
            .field("handle", &self.handle.id())
            .finish()
    }
}
