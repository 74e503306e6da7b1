//! Database connections
//!
//! A [`Connection`] is a proxy for one native user session. Clones share the
//! session; it is logged off when the last clone is dropped or when
//! [`Connection::close`] is called. Statements, LOBs, objects and
//! subscriptions created from a connection are its children in the
//! ownership chain and become invalid once the session is gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::callback::{ContextKey, Handler};
use crate::config::ConnectParams;
use crate::environment::{EnvShared, Environment};
use crate::error::{Error, Result};
use crate::handle::{release_fn, Handle, HandleId, NewEntry};
use crate::native::{Attr, AttrValue, HandleKind, RawHandle};
use crate::statement::Statement;
use crate::status::{check, CallContext, Translator};
use crate::types::TypeInfo;

/// What the application asked to fail over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailoverRequest {
    /// Session failover only
    Session,
    /// Session and open cursors
    Select,
}

/// Step of a failover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailoverEvent {
    /// Failover completed
    End,
    /// Failover failed, no retry allowed
    Abort,
    /// The user was re-authenticated
    Reauthenticate,
    /// Connection lost, failover starting
    Begin,
    /// Failover failed, retry allowed
    Error,
}

/// Reply of a failover handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FailoverResult {
    /// Acknowledge the event
    #[default]
    Ok,
    /// Ask for another failover attempt
    Retry,
}

pub(crate) struct ConnectionInner {
    pub(crate) err: RawHandle,
    user: String,
    database: String,
    auto_commit: AtomicBool,
    server_output: AtomicBool,
    failover_key: Mutex<Option<ContextKey>>,
    // described object types, by upper-case name
    pub(crate) types: Mutex<HashMap<String, TypeInfo>>,
}

/// Non-owning link from a dependent resource to its session
///
/// Dependents do not keep the session alive; once it is gone every call
/// through the link fails with [`Error::InvalidHandle`].
#[derive(Clone)]
pub(crate) struct SessionRef {
    pub(crate) id: HandleId,
    pub(crate) inner: Arc<ConnectionInner>,
}

impl SessionRef {
    pub(crate) fn raw(&self, env: &EnvShared) -> Result<RawHandle> {
        env.table.lock().raw(self.id).ok_or(Error::InvalidHandle {
            kind: HandleKind::Session,
        })
    }

    pub(crate) fn err(&self) -> RawHandle {
        self.inner.err
    }

    pub(crate) fn auto_commit(&self) -> bool {
        self.inner.auto_commit.load(Ordering::Relaxed)
    }

    pub(crate) fn connection(&self, env: &Arc<EnvShared>) -> Result<Connection> {
        Connection::revive(env, self.id).ok_or(Error::InvalidHandle {
            kind: HandleKind::Session,
        })
    }

    pub(crate) fn ctx<'a>(&self, env: &'a Arc<EnvShared>, call: &'static str) -> CallContext<'a> {
        CallContext::new(env, call, self.inner.err).session(self.id)
    }
}

/// Shared proxy for a user session
#[derive(Clone)]
pub struct Connection {
    handle: Handle,
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Log on a new session
    pub fn open(env: &Environment, params: &ConnectParams) -> Result<Connection> {
        let shared = env.shared();
        shared.ensure_active()?;
        let native = shared.native();

        let mut err = RawHandle::NULL;
        check!(
            shared.ctx("handle_alloc"),
            native.handle_alloc(shared.raw, HandleKind::Error, &mut err)
        );

        let mut raw = RawHandle::NULL;
        let status = native.session_begin(
            shared.raw,
            err,
            &params.database,
            &params.user,
            params.password(),
            params.mode,
            &mut raw,
        );
        if let Err(e) = Translator::check(&CallContext::new(shared, "session_begin", err), status) {
            // a raised warning still leaves an open session behind
            if !raw.is_null() {
                native.session_end(raw, err);
            }
            native.handle_free(err, HandleKind::Error);
            return Err(e);
        }

        tracing::debug!(user = %params.user, database = %params.database, session = %raw, "Session opened");
        Self::register(shared, raw, err, params, None)
    }

    /// Wrap a session obtained from the native layer; `pool` makes it a
    /// child of that pool
    pub(crate) fn register(
        shared: &Arc<EnvShared>,
        raw: RawHandle,
        err: RawHandle,
        params: &ConnectParams,
        pool: Option<HandleId>,
    ) -> Result<Connection> {
        let inner = Arc::new(ConnectionInner {
            err,
            user: params.user.clone(),
            database: params.database.clone(),
            auto_commit: AtomicBool::new(false),
            server_output: AtomicBool::new(false),
            failover_key: Mutex::new(None),
            types: Mutex::new(HashMap::new()),
        });

        let release = release_fn(move |api, env_err| {
            let status = api.session_end(raw, env_err);
            api.handle_free(err, HandleKind::Error);
            status
        });
        let mut entry = NewEntry::allocated(raw, HandleKind::Session, release).with_payload(inner.clone());
        if let Some(pool) = pool {
            entry = entry.child_of(pool);
        }

        let handle = Handle::register(shared, entry)?;
        Ok(Connection { handle, inner })
    }

    /// Rebuild a proxy for a session the native layer reported
    pub(crate) fn from_raw(env: &Arc<EnvShared>, raw: RawHandle) -> Option<Connection> {
        let id = env.table.lock().find_by_raw(raw)?;
        Self::revive(env, id)
    }

    pub(crate) fn revive(env: &Arc<EnvShared>, id: HandleId) -> Option<Connection> {
        let handle = Handle::revive(env, id)?;
        if handle.kind() != HandleKind::Session {
            return None;
        }
        let inner = handle.payload::<ConnectionInner>()?;
        Some(Connection { handle, inner })
    }

    pub(crate) fn raw(&self) -> Result<RawHandle> {
        self.handle.raw()
    }

    pub(crate) fn err(&self) -> RawHandle {
        self.inner.err
    }

    pub(crate) fn shared(&self) -> &Arc<EnvShared> {
        self.handle.env()
    }

    pub(crate) fn session_ref(&self) -> SessionRef {
        SessionRef {
            id: self.handle.id(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Call context reporting on this connection's error descriptor
    pub(crate) fn ctx(&self, call: &'static str) -> CallContext<'_> {
        CallContext::new(self.shared(), call, self.inner.err).connection(self)
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Log off now; remaining clones become invalid
    pub fn close(&self) -> Result<()> {
        tracing::debug!(user = %self.inner.user, "Closing session");
        self.handle.release("session_end")
    }

    /// Check whether the session has been closed
    pub fn is_closed(&self) -> bool {
        !self.handle.is_valid()
    }

    /// Commit the current transaction
    pub fn commit(&self) -> Result<()> {
        let raw = self.raw()?;
        check!(self.ctx("trans_commit"), self.shared().native().trans_commit(raw, self.err()));
        Ok(())
    }

    /// Roll back the current transaction
    pub fn rollback(&self) -> Result<()> {
        let raw = self.raw()?;
        check!(self.ctx("trans_rollback"), self.shared().native().trans_rollback(raw, self.err()));
        Ok(())
    }

    /// Start a transaction scope that rolls back unless committed
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        self.raw()?;
        Ok(Transaction {
            connection: self,
            finished: false,
        })
    }

    /// Commit after each successful execution
    pub fn set_auto_commit(&self, enabled: bool) {
        self.inner.auto_commit.store(enabled, Ordering::Relaxed);
    }

    /// Check whether auto commit is enabled
    pub fn auto_commit(&self) -> bool {
        self.inner.auto_commit.load(Ordering::Relaxed)
    }

    /// Server round trip
    pub fn ping(&self) -> Result<()> {
        let raw = self.raw()?;
        check!(self.ctx("ping"), self.shared().native().ping(raw, self.err()));
        Ok(())
    }

    /// Check whether the server answers
    pub fn is_server_alive(&self) -> bool {
        self.ping().is_ok()
    }

    /// Interrupt the call currently running on this session
    ///
    /// Safe to call from another thread; the interrupted call fails with
    /// ORA-01013.
    pub fn break_call(&self) -> Result<()> {
        let raw = self.raw()?;
        // the interrupted call owns the session descriptor
        let shared = self.shared();
        check!(
            CallContext::new(shared, "break_call", shared.err).connection(self),
            shared.native().break_call(raw, shared.err)
        );
        Ok(())
    }

    /// Server version banner
    pub fn server_version(&self) -> Result<String> {
        let raw = self.raw()?;
        let mut version = String::new();
        check!(
            self.ctx("server_version"),
            self.shared().native().server_version(raw, self.err(), &mut version)
        );
        Ok(version)
    }

    /// User name the session was opened with
    pub fn user(&self) -> &str {
        &self.inner.user
    }

    /// Database the session is connected to
    pub fn database(&self) -> &str {
        &self.inner.database
    }

    /// Check whether the session supports transparent application failover
    pub fn is_taf_capable(&self) -> Result<bool> {
        let value = self.attr(Attr::TafCapable)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Size of the session's statement cache
    pub fn statement_cache_size(&self) -> Result<u32> {
        let value = self.attr(Attr::StmtCacheSize)?;
        value
            .as_u32()
            .ok_or_else(|| Error::type_mismatch("unsigned integer", value))
    }

    /// Resize the session's statement cache
    pub fn set_statement_cache_size(&self, size: u32) -> Result<()> {
        self.set_attr(Attr::StmtCacheSize, AttrValue::UInt(size))
    }

    /// Install the failover handler, replacing any previous one
    pub fn set_failover_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Connection, FailoverRequest, FailoverEvent) -> FailoverResult + Send + Sync + 'static,
    {
        let raw = self.raw()?;
        let registry = &self.shared().hub.registry;
        let key = registry.register(Some(self.handle.id()), Handler::Failover(Arc::new(handler)));

        let status = self
            .shared()
            .native()
            .set_failover_callback(raw, self.err(), Some(key));
        if let Err(e) = Translator::check(&self.ctx("set_failover_callback"), status) {
            registry.unregister(key);
            return Err(e);
        }

        if let Some(previous) = self.inner.failover_key.lock().replace(key) {
            registry.unregister(previous);
        }
        Ok(())
    }

    /// Remove the failover handler
    pub fn clear_failover_handler(&self) -> Result<()> {
        let raw = self.raw()?;
        let Some(key) = self.inner.failover_key.lock().take() else {
            return Ok(());
        };
        self.shared().hub.registry.unregister(key);
        check!(
            self.ctx("set_failover_callback"),
            self.shared().native().set_failover_callback(raw, self.err(), None)
        );
        Ok(())
    }

    /// Create a statement on this connection
    pub fn statement(&self) -> Result<Statement> {
        Statement::new(self)
    }

    /// Prepare and execute one SQL statement, returning the affected row count
    pub fn execute(&self, sql: &str) -> Result<u64> {
        let stmt = Statement::new(self)?;
        stmt.execute_sql(sql)?;
        stmt.affected_rows()
    }

    /// Start collecting `DBMS_OUTPUT` lines written by server code
    ///
    /// `buffer_size` caps the bytes buffered between reads; `None` leaves the
    /// buffer unbounded.
    pub fn enable_server_output(&self, buffer_size: Option<u32>) -> Result<()> {
        let stmt = self.statement()?;
        stmt.prepare("BEGIN DBMS_OUTPUT.ENABLE(:size); END;")?;
        stmt.bind(":size", buffer_size)?;
        stmt.execute()?;
        self.inner.server_output.store(true, Ordering::Relaxed);
        tracing::debug!(?buffer_size, "Server output enabled");
        Ok(())
    }

    /// Stop collecting server output, discarding buffered lines
    pub fn disable_server_output(&self) -> Result<()> {
        self.statement()?.execute_sql("BEGIN DBMS_OUTPUT.DISABLE; END;")?;
        self.inner.server_output.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Check whether server output is being collected
    pub fn is_server_output_enabled(&self) -> bool {
        self.inner.server_output.load(Ordering::Relaxed)
    }

    /// Read the next buffered server output line
    ///
    /// Returns `None` when nothing is buffered or server output is disabled.
    pub fn server_output(&self) -> Result<Option<String>> {
        if !self.is_server_output_enabled() {
            return Ok(None);
        }
        let stmt = self.statement()?;
        stmt.prepare("BEGIN DBMS_OUTPUT.GET_LINE(:line, :status); END;")?;
        stmt.bind_out(":line")?;
        stmt.bind_out(":status")?;
        stmt.execute()?;
        if stmt.out_value_as::<i64>(":status")? != 0 {
            return Ok(None);
        }
        // an empty line comes back as NULL
        Ok(Some(stmt.out_value_as::<Option<String>>(":line")?.unwrap_or_default()))
    }

    /// Drain every buffered server output line
    pub fn server_output_lines(&self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.server_output()? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Read a session attribute
    pub fn attr(&self, attr: Attr) -> Result<AttrValue> {
        let raw = self.raw()?;
        let mut value = AttrValue::None;
        check!(
            self.ctx("attr_get"),
            self.shared()
                .native()
                .attr_get(raw, HandleKind::Session, attr, self.err(), &mut value)
        );
        Ok(value)
    }

    /// Write a session attribute
    pub fn set_attr(&self, attr: Attr, value: AttrValue) -> Result<()> {
        let raw = self.raw()?;
        check!(
            self.ctx("attr_set"),
            self.shared()
                .native()
                .attr_set(raw, HandleKind::Session, attr, &value, self.err())
        );
        Ok(())
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("user", &self.inner.user)
            .field("database", &self.inner.database)
            .field("handle", &self.handle.id())
            .finish()
    }
}

/// Transaction scope created by [`Connection::transaction`]
///
/// Rolls back on drop unless [`Transaction::commit`] was called.
pub struct Transaction<'a> {
    connection: &'a Connection,
    finished: bool,
}

impl<'a> Transaction<'a> {
    /// Connection the transaction runs on
    pub fn connection(&self) -> &'a Connection {
        self.connection
    }

    /// Commit and end the scope
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.connection.commit()
    }

    /// Roll back and end the scope
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.connection.rollback()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished || self.connection.is_closed() {
            return;
        }
        if let Err(e) = self.connection.rollback() {
            tracing::warn!(error = %e, "Rollback of abandoned transaction failed");
        }
    }
}
