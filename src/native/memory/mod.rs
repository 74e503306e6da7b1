//! In-process emulation of the native client
//!
//! [`MemoryClient`] implements [`NativeApi`] on plain data structures so the
//! binding can run without a vendor library: sessions, pools, a small SQL
//! dialect over in-memory tables, LOBs, object types, queues and
//! notifications. Handles are tracked the way the native library tracks
//! them, which lets tests check for leaks and double frees.
//!
//! Notifications are delivered from a separate thread, like the native
//! client's own notification threads.
//!
//! ```rust
//! use std::sync::Arc;
//! use ocibind::native::memory::MemoryClient;
//! use ocibind::{Connection, ConnectParams, Environment, EnvironmentConfig};
//!
//! # fn main() -> ocibind::Result<()> {
//! let client = Arc::new(MemoryClient::new());
//! let env = Environment::initialize(EnvironmentConfig::new(), client.clone())?;
//! let conn = Connection::open(&env, &"scott/tiger@db".parse::<ConnectParams>()?)?;
//!
//! client.fail_next("ping", 3113, "end-of-file on communication channel");
//! assert!(conn.ping().is_err());
//! assert!(conn.ping().is_ok());
//! # Ok(())
//! # }
//! ```

mod engine;
mod sql;
mod state;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use self::engine::Binds;
use self::sql::{PlStmt, Scope, Sql, SqlResult};
use self::state::{
    Body, Delivery, EnvBody, Fault, Injected, OutputBuffer, Payload, PoolBody, QMessage, Res, SessionBody, State,
    StmtBody, SubBody,
};
use super::{
    Attr, AttrDesc, AttrValue, BindDirection, CollectionDesc, ColumnDesc, Datum, Diagnostic, ExecMode,
    FetchOrientation, HandleKind, LobKind, NativeApi, NativeNotification, NotificationSink, RawHandle, Status,
    SubscriptionSpec,
};
use crate::callback::ContextKey;
use crate::config::{EnvMode, SessionMode};
use crate::connection::{FailoverEvent, FailoverRequest, FailoverResult};
use crate::constants::{self, ora as code};
use crate::environment::{HaEventType, HaSource};
use crate::subscription::{EventType, ObjectEvent};

const CLIENT_VERSION: u32 = 2300;
const SERVER_BANNER: &str = "Oracle Database 23ai Memory Emulation Release 23.0.0.0.0";
const DATABASE_NAME: &str = "MEMDB";
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Diagnostic with the usual `ORA-nnnnn: text` message
pub(crate) fn ora(code: i32, text: impl fmt::Display) -> Diagnostic {
    Diagnostic::new(code, format!("ORA-{:05}: {}", code, text))
}

fn cancelled() -> Diagnostic {
    ora(code::USER_REQUESTED_CANCEL, "user requested cancel of current operation")
}

/// In-process native client
pub struct MemoryClient {
    state: Mutex<State>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClient")
            .field("live_handles", &self.live_handles())
            .finish()
    }
}

impl MemoryClient {
    /// Create an empty client with no tables, types or queues
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
        }
    }

    // ------------------------------------------------------------------ test hooks

    /// Make the next call of the named entry point fail with `code`
    ///
    /// `call` is the [`NativeApi`] method name, e.g. `"stmt_execute"`.
    pub fn fail_next(&self, call: &str, code: i32, message: &str) {
        self.state.lock().injected.insert(
            call.to_string(),
            Injected {
                fail: true,
                diagnostic: ora(code, message),
            },
        );
    }

    /// Make the next successful call of the named entry point report a warning
    pub fn warn_next(&self, call: &str, code: i32, message: &str) {
        self.state.lock().injected.insert(
            call.to_string(),
            Injected {
                fail: false,
                diagnostic: ora(code, message),
            },
        );
    }

    /// How many times a handle has been freed
    pub fn free_count(&self, handle: RawHandle) -> usize {
        self.state.lock().frees.get(&handle.0).copied().unwrap_or(0)
    }

    /// Number of frees of handles that were not (or no longer) allocated
    pub fn double_frees(&self) -> usize {
        self.state.lock().double_frees
    }

    /// Native resources currently allocated, environments and error
    /// descriptors excluded
    pub fn live_handles(&self) -> usize {
        self.state
            .lock()
            .nodes
            .values()
            .filter(|n| !matches!(n.kind, HandleKind::Environment | HandleKind::Error))
            .count()
    }

    /// Declare an object type
    pub fn define_type(&self, name: &str, attrs: Vec<AttrDesc>) {
        let attrs = attrs
            .into_iter()
            .map(|mut a| {
                a.name = a.name.to_uppercase();
                a.type_name = a.type_name.map(|t| t.to_uppercase());
                a
            })
            .collect();
        self.state.lock().types.insert(name.to_uppercase(), attrs);
    }

    /// Declare a VARRAY or nested table type
    pub fn define_collection(&self, name: &str, mut desc: CollectionDesc) {
        desc.element.type_name = desc.element.type_name.map(|t| t.to_uppercase());
        self.state.lock().coll_types.insert(name.to_uppercase(), desc);
    }

    /// Create an empty queue
    pub fn create_queue(&self, name: &str) {
        self.state.lock().queues.entry(name.to_uppercase()).or_default();
    }

    /// Messages waiting on a queue
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        self.state.lock().queues.get(&name.to_uppercase()).map(Vec::len)
    }

    /// Send an HA event for every open session of environments with an HA
    /// callback, returning the number of events sent
    pub fn raise_ha_event(&self, source: HaSource, event: HaEventType) -> usize {
        let batch: Vec<Delivery> = {
            let state = self.state.lock();
            let time = sql::now_seconds();
            state
                .nodes
                .iter()
                .filter_map(|(raw, node)| match &node.body {
                    Body::Session(s) => state.env(s.env).ok().and_then(|env| {
                        env.ha_key.map(|key| {
                            (
                                Arc::clone(&env.sink),
                                key,
                                NativeNotification::HighAvailability {
                                    session: RawHandle(*raw),
                                    source,
                                    event,
                                    time,
                                },
                            )
                        })
                    }),
                    _ => None,
                })
                .collect()
        };
        let sent = batch.len();
        deliver(batch);
        sent
    }

    /// Simulate a connection loss on every session with a failover callback
    ///
    /// Each session sees `Begin`, then one `Error` per failed attempt while
    /// the application answers [`FailoverResult::Retry`], then `End` (or
    /// `Abort` when the application gives up). Returns the last event of
    /// each session.
    pub fn trigger_failover(&self, request: FailoverRequest, failed_attempts: u32) -> Vec<FailoverEvent> {
        let targets: Vec<(Arc<dyn NotificationSink>, ContextKey, RawHandle)> = {
            let state = self.state.lock();
            state
                .nodes
                .iter()
                .filter_map(|(raw, node)| match &node.body {
                    Body::Session(s) => s.failover_key.and_then(|key| {
                        state
                            .env(s.env)
                            .ok()
                            .map(|env| (Arc::clone(&env.sink), key, RawHandle(*raw)))
                    }),
                    _ => None,
                })
                .collect()
        };
        if targets.is_empty() {
            return Vec::new();
        }

        let worker = thread::Builder::new()
            .name("memory-failover".to_string())
            .spawn(move || {
                targets
                    .into_iter()
                    .map(|(sink, key, session)| {
                        sink.failover(key, session, request, FailoverEvent::Begin);
                        for _ in 0..failed_attempts {
                            if sink.failover(key, session, request, FailoverEvent::Error) != FailoverResult::Retry {
                                sink.failover(key, session, request, FailoverEvent::Abort);
                                return FailoverEvent::Abort;
                            }
                        }
                        sink.failover(key, session, request, FailoverEvent::End);
                        FailoverEvent::End
                    })
                    .collect::<Vec<_>>()
            });
        match worker {
            Ok(handle) => handle.join().unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot spawn failover thread");
                Vec::new()
            }
        }
    }

    /// Send a database change event to every change subscription,
    /// returning the number of events sent
    pub fn fire_change_event(
        &self,
        kind: EventType,
        object_event: Option<ObjectEvent>,
        object: Option<&str>,
        rowid: Option<&str>,
    ) -> usize {
        let batch: Vec<Delivery> = self
            .state
            .lock()
            .change_subscribers()
            .into_iter()
            .map(|(sink, key)| {
                (
                    sink,
                    key,
                    NativeNotification::DatabaseChange {
                        kind,
                        object_event,
                        database: DATABASE_NAME.to_string(),
                        object: object.map(str::to_string),
                        rowid: rowid.map(str::to_string),
                    },
                )
            })
            .collect();
        let sent = batch.len();
        deliver(batch);
        sent
    }

    // ------------------------------------------------------------------ call plumbing

    fn call(&self, name: &str, err: RawHandle, f: impl FnOnce(&mut State) -> Res<Status>) -> Status {
        if let Some(status) = self.inject(name, err) {
            return status;
        }
        let result = f(&mut *self.state.lock());
        self.complete(name, err, result)
    }

    fn inject(&self, name: &str, err: RawHandle) -> Option<Status> {
        let mut state = self.state.lock();
        if !state.injected.get(name).map_or(false, |i| i.fail) {
            return None;
        }
        let injected = state.injected.remove(name)?;
        state.record(err.0, injected.diagnostic);
        Some(Status::Error)
    }

    fn complete(&self, name: &str, err: RawHandle, result: Res<Status>) -> Status {
        let mut state = self.state.lock();
        match result {
            Ok(Status::Success) => match state.injected.remove(name) {
                Some(warning) if !warning.fail => {
                    state.record(err.0, warning.diagnostic);
                    Status::SuccessWithInfo
                }
                Some(failure) => {
                    state.injected.insert(name.to_string(), failure);
                    Status::Success
                }
                None => Status::Success,
            },
            Ok(status) => status,
            Err(Fault::Diag(d)) => {
                state.record(err.0, d);
                Status::Error
            }
            Err(Fault::Invalid) => Status::InvalidHandle,
        }
    }

    /// Sleep in small steps, giving up when the session is interrupted
    fn sleep(seconds: f64, cancel: &AtomicBool) -> Res<()> {
        let total = Duration::try_from_secs_f64(seconds.max(0.0))
            .map_err(|_| ora(6502, "PL/SQL: numeric or value error"))?;
        let deadline = Instant::now() + total;
        loop {
            if cancel.swap(false, Ordering::AcqRel) {
                return Err(cancelled().into());
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn execute(&self, session: u64, stmt: u64, iters: u32, mode: ExecMode) -> Res<Status> {
        let (sql, cancel, binds) = {
            let mut state = self.state.lock();
            state.clear_scratch(stmt)?;
            let cancel = Arc::clone(&state.session(session)?.cancel);
            cancel.store(false, Ordering::Release);

            let body = state.stmt_mut(stmt)?;
            body.result = None;
            body.outs.clear();
            body.batch_errors.clear();
            body.row_count = 0;
            body.scrollable = mode.scrollable;
            if let Some(d) = &body.parse_error {
                return Err(d.clone().into());
            }
            let sql = body
                .sql
                .clone()
                .ok_or_else(|| ora(code::STMT_NOT_PREPARED, "statement handle not prepared"))?;
            if let Some(missing) = sql.binds().into_iter().find(|n| !body.binds.contains_key(n)) {
                return Err(engine::not_bound(&missing).into());
            }
            (sql, cancel, body.binds.clone())
        };

        let Sql::Block(block) = &sql else {
            let mut out = Vec::new();
            let result = {
                let mut state = self.state.lock();
                let result = state.execute_sql(session, stmt, &sql, iters, mode, &mut out);
                if result.is_ok() && mode.commit_on_success && !sql.is_query() {
                    state.commit(session, &mut out)?;
                }
                result
            };
            deliver(out);
            return result;
        };

        // PL/SQL runs without the state lock so that it can be interrupted
        let mut outs: HashMap<String, Datum> = HashMap::new();
        for step in block {
            let scope = BlockScope {
                binds: Binds {
                    values: &binds,
                    iteration: 0,
                },
                outs: &outs,
            };
            match step {
                PlStmt::Assign(target, expr) => {
                    let value = match expr {
                        sql::Expr::Bind(name) => scope.bind(name)?,
                        other => sql::eval(other, &scope)?,
                    };
                    outs.insert(target.clone(), value);
                }
                PlStmt::Sleep(expr) => {
                    let seconds = sql::as_f64(&sql::eval(expr, &scope)?)?;
                    Self::sleep(seconds, &cancel)?;
                }
                PlStmt::Raise(number, expr) => {
                    let message = sql::to_text(&sql::eval(expr, &scope)?)?;
                    return Err(ora(-number, message).into());
                }
                PlStmt::OutputEnable(size) => {
                    let limit = match size {
                        Some(expr) => match sql::eval(expr, &scope)? {
                            Datum::Null => None,
                            value => Some(sql::as_f64(&value)?.max(0.0) as usize),
                        },
                        None => Some(constants::DEFAULT_SERVER_OUTPUT_BUFFER),
                    };
                    let mut state = self.state.lock();
                    state
                        .session_mut(session)?
                        .output
                        .get_or_insert_with(|| OutputBuffer::new(limit))
                        .set_limit(limit);
                }
                PlStmt::OutputDisable => {
                    self.state.lock().session_mut(session)?.output = None;
                }
                PlStmt::PutLine(expr) => {
                    let line = sql::to_text(&sql::eval(expr, &scope)?)?;
                    if let Some(buffer) = &mut self.state.lock().session_mut(session)?.output {
                        buffer.put_line(line)?;
                    }
                }
                PlStmt::GetLine { line, status } => {
                    let next = self
                        .state
                        .lock()
                        .session_mut(session)?
                        .output
                        .as_mut()
                        .and_then(OutputBuffer::get_line);
                    let (text, flag) = match next {
                        Some(text) if text.is_empty() => (Datum::Null, 0),
                        Some(text) => (Datum::Text(text), 0),
                        None => (Datum::Null, 1),
                    };
                    outs.insert(line.clone(), text);
                    outs.insert(status.clone(), Datum::Integer(flag));
                }
                PlStmt::Null => {}
            }
        }

        let mut out = Vec::new();
        {
            let mut state = self.state.lock();
            let body = state.stmt_mut(stmt)?;
            body.outs = outs;
            body.row_count = 1;
            if mode.commit_on_success {
                state.commit(session, &mut out)?;
            }
        }
        deliver(out);
        Ok(Status::Success)
    }

    fn dequeue(&self, session: u64, queue: &str, options: u64, message: u64, payload: &mut Datum) -> Res<Status> {
        let started = Instant::now();
        loop {
            let cancel = {
                let mut state = self.state.lock();
                if let Some(status) = Self::try_dequeue(&mut state, session, queue, options, message, payload)? {
                    return Ok(status);
                }
                let wait = state
                    .node(options, HandleKind::Dequeue)?
                    .attrs
                    .get(&Attr::WaitTime)
                    .and_then(AttrValue::as_i32)
                    .unwrap_or(-1);
                if wait >= 0 && started.elapsed() >= Duration::from_secs(wait as u64) {
                    return Ok(Status::NoData);
                }
                Arc::clone(&state.session(session)?.cancel)
            };
            if cancel.swap(false, Ordering::AcqRel) {
                return Err(cancelled().into());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn try_dequeue(
        state: &mut State,
        session: u64,
        queue: &str,
        options: u64,
        message: u64,
        payload: &mut Datum,
    ) -> Res<Option<Status>> {
        state.session(session)?;
        state.node(message, HandleKind::Message)?;
        let name = queue.to_uppercase();
        let opts = state.node(options, HandleKind::Dequeue)?;
        let option = |attr: Attr| {
            opts.attrs
                .get(&attr)
                .cloned()
                .or_else(|| State::attr_default(HandleKind::Dequeue, attr))
                .unwrap_or_default()
        };
        let mode = option(Attr::DequeueMode).as_u32().unwrap_or(3);
        let navigation = option(Attr::Navigation).as_u32().unwrap_or(3);
        let correlation = option(Attr::Correlation).as_text().unwrap_or_default().to_string();
        let browsed = match &opts.body {
            Body::Dequeue { browsed } if navigation != 1 => browsed.clone(),
            _ => HashSet::new(),
        };

        let now = sql::now_seconds();
        let messages = state
            .queues
            .get_mut(&name)
            .ok_or_else(|| ora(code::QUEUE_NOT_FOUND, "specified queue does not exist"))?;
        messages.retain(|m| {
            m.expiration < 0 || m.enqueue_time + chrono::Duration::seconds(i64::from(m.delay + m.expiration)) > now
        });
        let candidate = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.enqueue_time + chrono::Duration::seconds(i64::from(m.delay)) <= now)
            .filter(|(_, m)| correlation.is_empty() || like(&correlation, &m.correlation))
            .filter(|(_, m)| !browsed.contains(&m.id))
            .min_by_key(|(_, m)| (m.priority, m.seq))
            .map(|(i, _)| i);
        let Some(index) = candidate else {
            return Ok(None);
        };

        let browse = mode == 1;
        let msg = if browse {
            let m = &messages[index];
            QMessage {
                id: m.id,
                seq: m.seq,
                payload: match &m.payload {
                    Payload::Null => Payload::Null,
                    Payload::Raw(b) => Payload::Raw(b.clone()),
                    Payload::Object(oid) => Payload::Object(*oid),
                },
                priority: m.priority,
                correlation: m.correlation.clone(),
                delay: m.delay,
                expiration: m.expiration,
                exception_queue: m.exception_queue.clone(),
                enqueue_time: m.enqueue_time,
                attempts: m.attempts,
                sender: m.sender.clone(),
            }
        } else {
            messages.remove(index)
        };

        if let Some(Body::Dequeue { browsed }) = state.nodes.get_mut(&options).map(|n| &mut n.body) {
            if navigation == 1 {
                browsed.clear();
            }
            if browse {
                browsed.insert(msg.id);
            }
        }

        // message properties
        let sender = msg.sender.as_ref().map(|(name, address)| {
            let raw = state.alloc(HandleKind::Agent, Some(message), Body::Plain);
            if let Some(node) = state.nodes.get_mut(&raw) {
                node.attrs.insert(Attr::AgentName, AttrValue::Text(name.clone()));
                node.attrs.insert(Attr::AgentAddress, AttrValue::Text(address.clone()));
            }
            raw
        });
        *payload = match (&msg.payload, mode) {
            (_, 5) | (Payload::Null, _) => Datum::Null,
            (Payload::Raw(bytes), _) => Datum::Raw(bytes.clone()),
            (Payload::Object(oid), _) => {
                let oid = if browse { state.copy_object(*oid)? } else { *oid };
                let raw = state.alloc(HandleKind::Object, Some(message), Body::Object { oid, pinned: false });
                Datum::Object(RawHandle(raw))
            }
        };
        let node = state.node_mut(message, HandleKind::Message)?;
        let attrs = &mut node.attrs;
        attrs.insert(Attr::MessageId, AttrValue::Raw(msg.id.to_vec()));
        attrs.insert(Attr::Priority, AttrValue::Int(msg.priority));
        attrs.insert(Attr::Correlation, AttrValue::Text(msg.correlation));
        attrs.insert(Attr::Delay, AttrValue::Int(msg.delay));
        attrs.insert(Attr::Expiration, AttrValue::Int(msg.expiration));
        attrs.insert(Attr::ExceptionQueue, AttrValue::Text(msg.exception_queue));
        attrs.insert(Attr::EnqueueTime, AttrValue::Date(msg.enqueue_time));
        attrs.insert(Attr::Attempts, AttrValue::UInt(msg.attempts));
        attrs.insert(Attr::MessageState, AttrValue::UInt(0));
        if let Some(sender) = sender {
            attrs.insert(Attr::Sender, AttrValue::Handle(RawHandle(sender)));
        }
        tracing::trace!(queue = %name, id = %hex::encode(msg.id), "Message dequeued");
        Ok(Some(Status::Success))
    }
}

/// `%` and `_` wildcard match used by correlation filters
fn like(pattern: &str, text: &str) -> bool {
    fn matches(p: &[char], t: &[char]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some('%'), _) => matches(&p[1..], t) || (!t.is_empty() && matches(p, &t[1..])),
            (Some('_'), Some(_)) => matches(&p[1..], &t[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &t[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    matches(&p, &t)
}

/// Hand notifications to their sinks from a notification thread
fn deliver(batch: Vec<Delivery>) {
    if batch.is_empty() {
        return;
    }
    let worker = thread::Builder::new()
        .name("memory-notify".to_string())
        .spawn(move || {
            for (sink, key, notification) in batch {
                sink.notify(key, notification);
            }
        });
    match worker {
        Ok(handle) => {
            if handle.join().is_err() {
                tracing::warn!("Notification thread panicked");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Cannot spawn notification thread"),
    }
}

struct BlockScope<'a> {
    binds: Binds<'a>,
    outs: &'a HashMap<String, Datum>,
}

impl Scope for BlockScope<'_> {
    fn bind(&self, name: &str) -> SqlResult<Datum> {
        match self.outs.get(name) {
            Some(value) => Ok(value.clone()),
            None => self.binds.get(name),
        }
    }

    fn column(&self, name: &str) -> SqlResult<Datum> {
        Err(ora(
            6550,
            format!("PLS-00201: identifier '{}' must be declared", name),
        ))
    }
}

fn credentials(user: &str, password: &str) -> Res<()> {
    if !user.is_empty() && password.is_empty() {
        return Err(ora(code::INVALID_USERNAME_PASSWORD, "invalid username/password; logon denied").into());
    }
    Ok(())
}

fn read_attr(state: &State, raw: u64, kind: HandleKind, attr: Attr) -> Res<AttrValue> {
    let node = state.node(raw, kind)?;
    let computed = match (&node.body, attr) {
        (Body::Statement(s), Attr::RowCount) => Some(AttrValue::UInt(u32::try_from(s.row_count).unwrap_or(u32::MAX))),
        (Body::Statement(s), Attr::ColumnCount) => Some(AttrValue::UInt(
            s.result.as_ref().map_or(0, |r| r.columns.len() as u32),
        )),
        (Body::Session(s), Attr::UserName) => Some(AttrValue::Text(s.user.clone())),
        (Body::Session(s), Attr::DatabaseName) => Some(AttrValue::Text(s.database.clone())),
        (Body::Pool(p), Attr::PoolBusyCount) => Some(AttrValue::UInt(p.busy)),
        (Body::Pool(p), Attr::PoolOpenCount) => Some(AttrValue::UInt(p.open)),
        (Body::Lob { temporary, .. }, Attr::LobIsTemporary) => Some(AttrValue::Bool(*temporary)),
        (Body::Object { oid, .. }, Attr::TypeName) => Some(AttrValue::Text(state.object_type(*oid)?.to_string())),
        (Body::Ref { type_name, .. }, Attr::TypeName) => Some(AttrValue::Text(type_name.clone())),
        (Body::Collection { cid }, Attr::TypeName) => Some(AttrValue::Text(state.collection_type(*cid)?.to_string())),
        (Body::Subscription(sub), Attr::SubscriptionName) => Some(AttrValue::Text(sub.spec.name.clone())),
        (Body::Subscription(sub), Attr::SubscriptionPort) => Some(AttrValue::UInt(sub.spec.port)),
        (Body::Subscription(sub), Attr::SubscriptionTimeout) => Some(AttrValue::UInt(sub.spec.timeout)),
        _ => None,
    };
    if let Some(value) = computed {
        return Ok(value);
    }
    if let Some(value) = node.attrs.get(&attr) {
        return Ok(value.clone());
    }
    State::attr_default(kind, attr).ok_or_else(|| ora(code::ILLEGAL_ATTRIBUTE, "illegal attribute type").into())
}

fn is_read_only(attr: Attr) -> bool {
    matches!(
        attr,
        Attr::RowCount
            | Attr::ColumnCount
            | Attr::UserName
            | Attr::DatabaseName
            | Attr::TafCapable
            | Attr::PoolBusyCount
            | Attr::PoolOpenCount
            | Attr::LobIsTemporary
            | Attr::TypeName
            | Attr::MessageId
            | Attr::EnqueueTime
            | Attr::Attempts
            | Attr::MessageState
    )
}

impl NativeApi for MemoryClient {
    fn env_create(
        &self,
        _mode: EnvMode,
        lib_path: Option<&Path>,
        sink: Arc<dyn NotificationSink>,
        env: &mut RawHandle,
    ) -> Status {
        if lib_path.map_or(false, |p| !p.exists()) {
            return Status::Error;
        }
        let raw = self
            .state
            .lock()
            .alloc(HandleKind::Environment, None, Body::Env(EnvBody { sink, ha_key: None }));
        *env = RawHandle(raw);
        Status::Success
    }

    fn client_version(&self) -> u32 {
        CLIENT_VERSION
    }

    fn error_get(&self, err: RawHandle) -> Option<Diagnostic> {
        self.state.lock().diags.get_mut(&err.0).and_then(Vec::pop)
    }

    fn handle_alloc(&self, parent: RawHandle, kind: HandleKind, out: &mut RawHandle) -> Status {
        let mut state = self.state.lock();
        let parent_kind = match kind {
            HandleKind::Error | HandleKind::Enqueue | HandleKind::Dequeue | HandleKind::Message | HandleKind::Agent => {
                HandleKind::Environment
            }
            HandleKind::Statement => HandleKind::Session,
            _ => return Status::InvalidHandle,
        };
        if state.node(parent.0, parent_kind).is_err() {
            return Status::InvalidHandle;
        }
        let body = match kind {
            HandleKind::Statement => Body::Statement(Box::new(StmtBody {
                session: parent.0,
                ..StmtBody::default()
            })),
            HandleKind::Dequeue => Body::Dequeue {
                browsed: HashSet::new(),
            },
            _ => Body::Plain,
        };
        *out = RawHandle(state.alloc(kind, Some(parent.0), body));
        Status::Success
    }

    fn handle_free(&self, handle: RawHandle, kind: HandleKind) -> Status {
        match self.state.lock().free(handle.0, kind) {
            Ok(()) => Status::Success,
            Err(_) => Status::InvalidHandle,
        }
    }

    fn attr_get(&self, handle: RawHandle, kind: HandleKind, attr: Attr, err: RawHandle, out: &mut AttrValue) -> Status {
        self.call("attr_get", err, |state| {
            *out = read_attr(state, handle.0, kind, attr)?;
            Ok(Status::Success)
        })
    }

    fn attr_set(&self, handle: RawHandle, kind: HandleKind, attr: Attr, value: &AttrValue, err: RawHandle) -> Status {
        self.call("attr_set", err, |state| {
            let node = state.node(handle.0, kind)?;
            let known = node.attrs.contains_key(&attr) || State::attr_default(kind, attr).is_some();
            if is_read_only(attr) || !known {
                return Err(ora(code::ILLEGAL_ATTRIBUTE, "illegal attribute type").into());
            }
            let previous = node.attrs.get(&Attr::Sender).and_then(AttrValue::as_handle);

            let value = match (attr, value) {
                (Attr::Sender, AttrValue::Handle(agent)) => {
                    let source = state.node(agent.0, HandleKind::Agent)?;
                    let copied: Vec<(Attr, AttrValue)> = source
                        .attrs
                        .iter()
                        .map(|(a, v)| (*a, v.clone()))
                        .collect();
                    if let Some(previous) = previous {
                        state.remove(previous.0);
                    }
                    let copy = state.alloc(HandleKind::Agent, Some(handle.0), Body::Plain);
                    if let Some(node) = state.nodes.get_mut(&copy) {
                        node.attrs.extend(copied);
                    }
                    AttrValue::Handle(RawHandle(copy))
                }
                _ => value.clone(),
            };
            state.node_mut(handle.0, kind)?.attrs.insert(attr, value);
            Ok(Status::Success)
        })
    }

    fn set_ha_callback(&self, env: RawHandle, err: RawHandle, key: Option<ContextKey>) -> Status {
        self.call("set_ha_callback", err, |state| {
            match state.nodes.get_mut(&env.0).map(|n| &mut n.body) {
                Some(Body::Env(body)) => body.ha_key = key,
                _ => return Err(Fault::Invalid),
            }
            Ok(Status::Success)
        })
    }

    fn session_begin(
        &self,
        env: RawHandle,
        err: RawHandle,
        database: &str,
        user: &str,
        password: &str,
        _mode: SessionMode,
        out: &mut RawHandle,
    ) -> Status {
        self.call("session_begin", err, |state| {
            state.env(env.0)?;
            credentials(user, password)?;
            let raw = state.alloc(
                HandleKind::Session,
                Some(env.0),
                Body::Session(SessionBody {
                    env: env.0,
                    database: database.to_string(),
                    user: user.to_string(),
                    pool: None,
                    undo: Vec::new(),
                    changes: Vec::new(),
                    cancel: Arc::new(AtomicBool::new(false)),
                    failover_key: None,
                    output: None,
                }),
            );
            *out = RawHandle(raw);
            Ok(Status::Success)
        })
    }

    fn session_end(&self, session: RawHandle, err: RawHandle) -> Status {
        self.call("session_end", err, |state| {
            if let Ok(pool) = state.session(session.0).map(|s| s.pool) {
                state.rollback(session.0)?;
                if let Some(pool) = pool.and_then(|p| state.pool_mut(p).ok()) {
                    pool.busy = pool.busy.saturating_sub(1);
                }
            }
            state.free(session.0, HandleKind::Session)?;
            Ok(Status::Success)
        })
    }

    fn pool_create(
        &self,
        env: RawHandle,
        err: RawHandle,
        database: &str,
        user: &str,
        password: &str,
        min: u32,
        max: u32,
        increment: u32,
        out: &mut RawHandle,
    ) -> Status {
        self.call("pool_create", err, |state| {
            state.env(env.0)?;
            credentials(user, password)?;
            if max == 0 || min > max {
                return Err(ora(24413, "Invalid number of sessions specified").into());
            }
            let raw = state.alloc(
                HandleKind::Pool,
                Some(env.0),
                Body::Pool(PoolBody {
                    env: env.0,
                    database: database.to_string(),
                    user: user.to_string(),
                    busy: 0,
                    open: min,
                }),
            );
            let node = state.node_mut(raw, HandleKind::Pool)?;
            node.attrs.insert(Attr::PoolMin, AttrValue::UInt(min));
            node.attrs.insert(Attr::PoolMax, AttrValue::UInt(max));
            node.attrs.insert(Attr::PoolIncrement, AttrValue::UInt(increment));
            *out = RawHandle(raw);
            Ok(Status::Success)
        })
    }

    fn pool_get_session(&self, pool: RawHandle, err: RawHandle, _tag: &str, out: &mut RawHandle) -> Status {
        self.call("pool_get_session", err, |state| {
            let node = state.node(pool.0, HandleKind::Pool)?;
            let setting = |attr: Attr| node.attrs.get(&attr).and_then(AttrValue::as_u32).unwrap_or(0);
            let (max, increment) = (setting(Attr::PoolMax), setting(Attr::PoolIncrement).max(1));

            let body = state.pool_mut(pool.0)?;
            if body.busy >= max {
                return Err(ora(code::POOL_EXHAUSTED, "Cannot open further sessions").into());
            }
            body.busy += 1;
            if body.busy > body.open {
                body.open = (body.open + increment).min(max).max(body.busy);
            }
            let session = SessionBody {
                env: body.env,
                database: body.database.clone(),
                user: body.user.clone(),
                pool: Some(pool.0),
                undo: Vec::new(),
                changes: Vec::new(),
                cancel: Arc::new(AtomicBool::new(false)),
                failover_key: None,
                output: None,
            };
            let raw = state.alloc(HandleKind::Session, Some(pool.0), Body::Session(session));
            *out = RawHandle(raw);
            Ok(Status::Success)
        })
    }

    fn pool_destroy(&self, pool: RawHandle, err: RawHandle) -> Status {
        self.call("pool_destroy", err, |state| {
            state.free(pool.0, HandleKind::Pool)?;
            Ok(Status::Success)
        })
    }

    fn trans_commit(&self, session: RawHandle, err: RawHandle) -> Status {
        let mut out = Vec::new();
        let status = self.call("trans_commit", err, |state| {
            state.commit(session.0, &mut out)?;
            Ok(Status::Success)
        });
        deliver(out);
        status
    }

    fn trans_rollback(&self, session: RawHandle, err: RawHandle) -> Status {
        self.call("trans_rollback", err, |state| {
            state.rollback(session.0)?;
            Ok(Status::Success)
        })
    }

    fn ping(&self, session: RawHandle, err: RawHandle) -> Status {
        self.call("ping", err, |state| {
            state.session(session.0)?;
            Ok(Status::Success)
        })
    }

    fn break_call(&self, session: RawHandle, err: RawHandle) -> Status {
        self.call("break_call", err, |state| {
            state.session(session.0)?.cancel.store(true, Ordering::Release);
            Ok(Status::Success)
        })
    }

    fn server_version(&self, session: RawHandle, err: RawHandle, out: &mut String) -> Status {
        self.call("server_version", err, |state| {
            state.session(session.0)?;
            *out = SERVER_BANNER.to_string();
            Ok(Status::Success)
        })
    }

    fn set_failover_callback(&self, session: RawHandle, err: RawHandle, key: Option<ContextKey>) -> Status {
        self.call("set_failover_callback", err, |state| {
            state.session_mut(session.0)?.failover_key = key;
            Ok(Status::Success)
        })
    }

    fn stmt_prepare(&self, session: RawHandle, stmt: RawHandle, err: RawHandle, text: &str) -> Status {
        self.call("stmt_prepare", err, |state| {
            state.session(session.0)?;
            state.clear_scratch(stmt.0)?;
            let body = state.stmt_mut(stmt.0)?;
            let (sql, parse_error) = match sql::parse(text) {
                Ok(sql) => (Some(sql), None),
                Err(d) => (None, Some(d)),
            };
            *body = StmtBody {
                session: session.0,
                sql,
                parse_error,
                ..StmtBody::default()
            };
            Ok(Status::Success)
        })
    }

    fn stmt_bind(&self, stmt: RawHandle, err: RawHandle, name: &str, values: &[Datum], _direction: BindDirection) -> Status {
        self.call("stmt_bind", err, |state| {
            state.stmt_mut(stmt.0)?.binds.insert(name.to_string(), values.to_vec());
            Ok(Status::Success)
        })
    }

    fn stmt_execute(&self, session: RawHandle, stmt: RawHandle, err: RawHandle, iters: u32, mode: ExecMode) -> Status {
        if let Some(status) = self.inject("stmt_execute", err) {
            return status;
        }
        let result = self.execute(session.0, stmt.0, iters, mode);
        self.complete("stmt_execute", err, result)
    }

    fn stmt_fetch(&self, stmt: RawHandle, err: RawHandle) -> Status {
        self.call("stmt_fetch", err, |state| {
            state.clear_scratch(stmt.0)?;
            let body = state.stmt_mut(stmt.0)?;
            let result = body
                .result
                .as_mut()
                .ok_or_else(|| ora(code::STMT_NOT_EXECUTED, "statement handle not executed"))?;
            let target = result.position.min(result.rows.len()) as i64 + 1;
            if result.seek(target) {
                body.row_count += 1;
                Ok(Status::Success)
            } else {
                Ok(Status::NoData)
            }
        })
    }

    fn stmt_fetch_scroll(
        &self,
        stmt: RawHandle,
        err: RawHandle,
        orientation: FetchOrientation,
        offset: i64,
        position: &mut u64,
    ) -> Status {
        self.call("stmt_fetch_scroll", err, |state| {
            state.clear_scratch(stmt.0)?;
            let body = state.stmt_mut(stmt.0)?;
            if !body.scrollable && orientation != FetchOrientation::Next {
                return Err(ora(code::INVALID_FETCH, "invalid fetch operation on a non-scrollable cursor").into());
            }
            let result = body
                .result
                .as_mut()
                .ok_or_else(|| ora(code::STMT_NOT_EXECUTED, "statement handle not executed"))?;
            let current = result.position as i64;
            let target = match orientation {
                FetchOrientation::Next => current.saturating_add(1),
                FetchOrientation::Prior => current.saturating_sub(1),
                FetchOrientation::First => 1,
                FetchOrientation::Last => result.rows.len() as i64,
                FetchOrientation::Absolute => offset,
                FetchOrientation::Relative => current.saturating_add(offset),
            };
            let found = result.seek(target);
            *position = result.position as u64;
            if found {
                body.row_count = body.row_count.max(*position);
                Ok(Status::Success)
            } else {
                Ok(Status::NoData)
            }
        })
    }

    fn stmt_describe(&self, stmt: RawHandle, err: RawHandle, position: u32, out: &mut ColumnDesc) -> Status {
        self.call("stmt_describe", err, |state| {
            let body = state.stmt(stmt.0)?;
            let desc = body
                .result
                .as_ref()
                .and_then(|r| r.columns.get((position as usize).wrapping_sub(1)))
                .ok_or_else(|| ora(code::NOT_IN_SELECT_LIST, "variable not in select list"))?;
            *out = desc.clone();
            Ok(Status::Success)
        })
    }

    fn stmt_column_value(&self, stmt: RawHandle, err: RawHandle, position: u32, out: &mut Datum) -> Status {
        self.call("stmt_column_value", err, |state| {
            let cell = {
                let body = state.stmt(stmt.0)?;
                let row = body
                    .result
                    .as_ref()
                    .and_then(|r| r.current.as_ref())
                    .ok_or_else(|| ora(code::FETCH_OUT_OF_SEQUENCE, "fetch out of sequence"))?;
                row.get((position as usize).wrapping_sub(1))
                    .cloned()
                    .ok_or_else(|| ora(code::NOT_IN_SELECT_LIST, "variable not in select list"))?
            };
            let (datum, raw) = state.cell_datum(&cell, stmt.0, true)?;
            if let Some(raw) = raw {
                state.stmt_mut(stmt.0)?.scratch.push(raw);
            }
            *out = datum;
            Ok(Status::Success)
        })
    }

    fn stmt_out_value(&self, stmt: RawHandle, err: RawHandle, name: &str, out: &mut Datum) -> Status {
        self.call("stmt_out_value", err, |state| {
            let body = state.stmt(stmt.0)?;
            *out = match body.outs.get(name) {
                Some(value) => value.clone(),
                None if body.binds.contains_key(name) => Datum::Null,
                None => return Err(ora(code::ILLEGAL_VARIABLE, "illegal variable name/number").into()),
            };
            Ok(Status::Success)
        })
    }

    fn stmt_batch_errors(&self, stmt: RawHandle, err: RawHandle, out: &mut Vec<Diagnostic>) -> Status {
        self.call("stmt_batch_errors", err, |state| {
            *out = state.stmt(stmt.0)?.batch_errors.clone();
            Ok(Status::Success)
        })
    }

    fn lob_create_temporary(&self, session: RawHandle, err: RawHandle, kind: LobKind, out: &mut RawHandle) -> Status {
        self.call("lob_create_temporary", err, |state| {
            state.session(session.0)?;
            let id = state.new_lob(kind);
            let raw = state.alloc(
                HandleKind::Lob,
                Some(session.0),
                Body::Lob {
                    kind,
                    id,
                    temporary: true,
                },
            );
            *out = RawHandle(raw);
            Ok(Status::Success)
        })
    }

    fn lob_read(
        &self,
        session: RawHandle,
        err: RawHandle,
        lob: RawHandle,
        offset: u64,
        amount: u64,
        out: &mut Vec<u8>,
    ) -> Status {
        self.call("lob_read", err, |state| {
            state.session(session.0)?;
            *out = state.lob_read(lob.0, offset, amount)?;
            Ok(Status::Success)
        })
    }

    fn lob_write(
        &self,
        session: RawHandle,
        err: RawHandle,
        lob: RawHandle,
        offset: u64,
        data: &[u8],
        written: &mut u64,
    ) -> Status {
        self.call("lob_write", err, |state| {
            state.session(session.0)?;
            *written = state.lob_write(lob.0, offset, data)?;
            Ok(Status::Success)
        })
    }

    fn lob_append(&self, session: RawHandle, err: RawHandle, lob: RawHandle, data: &[u8]) -> Status {
        self.call("lob_append", err, |state| {
            state.session(session.0)?;
            state.lob_append(lob.0, data)?;
            Ok(Status::Success)
        })
    }

    fn lob_trim(&self, session: RawHandle, err: RawHandle, lob: RawHandle, length: u64) -> Status {
        self.call("lob_trim", err, |state| {
            state.session(session.0)?;
            state.lob_trim(lob.0, length)?;
            Ok(Status::Success)
        })
    }

    fn lob_length(&self, session: RawHandle, err: RawHandle, lob: RawHandle, out: &mut u64) -> Status {
        self.call("lob_length", err, |state| {
            state.session(session.0)?;
            *out = state.lob_length(lob.0)?;
            Ok(Status::Success)
        })
    }

    fn lob_free_temporary(&self, _session: RawHandle, err: RawHandle, lob: RawHandle) -> Status {
        self.call("lob_free_temporary", err, |state| {
            if let Some(Body::Lob { temporary: false, .. }) = state.nodes.get(&lob.0).map(|n| &n.body) {
                return Err(ora(code::INVALID_LOB_LOCATOR, "invalid LOB locator specified").into());
            }
            state.free(lob.0, HandleKind::Lob)?;
            Ok(Status::Success)
        })
    }

    fn type_describe(
        &self,
        session: RawHandle,
        err: RawHandle,
        name: &str,
        tdo: &mut RawHandle,
        attrs: &mut Vec<AttrDesc>,
        collection: &mut Option<CollectionDesc>,
    ) -> Status {
        self.call("type_describe", err, |state| {
            state.session(session.0)?;
            let name = name.to_uppercase();
            match state.coll_types.get(&name) {
                Some(desc) => {
                    *collection = Some(desc.clone());
                    attrs.clear();
                }
                None => {
                    *attrs = state.type_attrs(&name)?;
                    *collection = None;
                }
            }
            *tdo = RawHandle(state.alloc(HandleKind::TypeInfo, Some(session.0), Body::Type(name)));
            Ok(Status::Success)
        })
    }

    fn object_new(&self, session: RawHandle, err: RawHandle, tdo: RawHandle, out: &mut RawHandle) -> Status {
        self.call("object_new", err, |state| {
            state.session(session.0)?;
            let type_name = match &state.node(tdo.0, HandleKind::TypeInfo)?.body {
                Body::Type(name) => name.clone(),
                _ => return Err(Fault::Invalid),
            };
            if state.coll_types.contains_key(&type_name) {
                return Err(sql::inconsistent().into());
            }
            let oid = state.new_object(&type_name)?;
            let raw = state.alloc(HandleKind::Object, Some(session.0), Body::Object { oid, pinned: false });
            *out = RawHandle(raw);
            Ok(Status::Success)
        })
    }

    fn object_get(&self, err: RawHandle, object: RawHandle, attr: &str, out: &mut Datum) -> Status {
        self.call("object_get", err, |state| {
            let oid = state.object_oid(object.0)?;
            let cell = state
                .objects
                .get(&oid)
                .and_then(|o| o.attrs.iter().find(|(d, _)| d.name.eq_ignore_ascii_case(attr)))
                .map(|(_, cell)| cell.clone())
                .ok_or_else(|| ora(code::INVALID_IDENTIFIER, format!("\"{}\": invalid identifier", attr)))?;
            *out = state.cell_datum(&cell, object.0, false)?.0;
            Ok(Status::Success)
        })
    }

    fn object_set(&self, err: RawHandle, object: RawHandle, attr: &str, value: &Datum) -> Status {
        self.call("object_set", err, |state| {
            let oid = state.object_oid(object.0)?;
            let (index, desc) = state
                .objects
                .get(&oid)
                .and_then(|o| {
                    o.attrs
                        .iter()
                        .enumerate()
                        .find(|(_, (d, _))| d.name.eq_ignore_ascii_case(attr))
                        .map(|(i, (d, _))| (i, d.clone()))
                })
                .ok_or_else(|| ora(code::INVALID_IDENTIFIER, format!("\"{}\": invalid identifier", attr)))?;
            let cell = state.datum_cell(value, desc.data_type, desc.type_name.as_deref())?;
            if let Some(data) = state.objects.get_mut(&oid) {
                data.attrs[index].1 = cell;
            }
            Ok(Status::Success)
        })
    }

    fn object_get_ref(&self, session: RawHandle, err: RawHandle, object: RawHandle, out: &mut RawHandle) -> Status {
        self.call("object_get_ref", err, |state| {
            state.session(session.0)?;
            let oid = state.object_oid(object.0)?;
            let type_name = state.object_type(oid)?.to_string();
            let raw = state.alloc(
                HandleKind::Reference,
                Some(session.0),
                Body::Ref {
                    type_name,
                    target: Some(oid),
                },
            );
            *out = RawHandle(raw);
            Ok(Status::Success)
        })
    }

    fn ref_new(&self, session: RawHandle, err: RawHandle, tdo: RawHandle, out: &mut RawHandle) -> Status {
        self.call("ref_new", err, |state| {
            state.session(session.0)?;
            let type_name = match &state.node(tdo.0, HandleKind::TypeInfo)?.body {
                Body::Type(name) => name.clone(),
                _ => return Err(Fault::Invalid),
            };
            let raw = state.alloc(
                HandleKind::Reference,
                Some(session.0),
                Body::Ref {
                    type_name,
                    target: None,
                },
            );
            *out = RawHandle(raw);
            Ok(Status::Success)
        })
    }

    fn ref_is_null(&self, reference: RawHandle) -> bool {
        !matches!(
            self.state.lock().nodes.get(&reference.0).map(|n| &n.body),
            Some(Body::Ref { target: Some(_), .. })
        )
    }

    fn ref_clear(&self, err: RawHandle, reference: RawHandle) -> Status {
        self.call("ref_clear", err, |state| {
            match state.nodes.get_mut(&reference.0).map(|n| &mut n.body) {
                Some(Body::Ref { target, .. }) => *target = None,
                _ => return Err(Fault::Invalid),
            }
            Ok(Status::Success)
        })
    }

    fn ref_assign(&self, err: RawHandle, source: RawHandle, target: RawHandle) -> Status {
        self.call("ref_assign", err, |state| {
            let (type_name, oid) = match state.nodes.get(&source.0).map(|n| &n.body) {
                Some(Body::Ref { type_name, target }) => (type_name.clone(), *target),
                _ => return Err(Fault::Invalid),
            };
            match state.nodes.get_mut(&target.0).map(|n| &mut n.body) {
                Some(Body::Ref {
                    type_name: name,
                    target,
                }) => {
                    *name = type_name;
                    *target = oid;
                }
                _ => return Err(Fault::Invalid),
            }
            Ok(Status::Success)
        })
    }

    fn ref_pin(&self, session: RawHandle, err: RawHandle, reference: RawHandle, out: &mut RawHandle) -> Status {
        self.call("ref_pin", err, |state| {
            state.session(session.0)?;
            let oid = match state.nodes.get(&reference.0).map(|n| &n.body) {
                Some(Body::Ref { target: Some(oid), .. }) => *oid,
                Some(Body::Ref { target: None, .. }) => {
                    return Err(ora(code::NULL_REFERENCE, "cannot pin a null reference").into())
                }
                _ => return Err(Fault::Invalid),
            };
            if !state.objects.contains_key(&oid) {
                return Err(ora(21700, "object does not exist or is marked for delete").into());
            }
            let raw = state.alloc(HandleKind::Object, Some(reference.0), Body::Object { oid, pinned: true });
            *out = RawHandle(raw);
            Ok(Status::Success)
        })
    }

    fn ref_unpin(&self, err: RawHandle, object: RawHandle) -> Status {
        self.call("ref_unpin", err, |state| {
            if let Some(Body::Object { pinned: false, .. }) = state.nodes.get(&object.0).map(|n| &n.body) {
                return Err(ora(21710, "argument is expecting a pinned object").into());
            }
            state.free(object.0, HandleKind::Object)?;
            Ok(Status::Success)
        })
    }

    fn ref_to_hex(&self, err: RawHandle, reference: RawHandle, out: &mut String) -> Status {
        self.call("ref_to_hex", err, |state| {
            *out = match state.nodes.get(&reference.0).map(|n| &n.body) {
                Some(Body::Ref { target: Some(oid), .. }) => hex::encode_upper(u128::from(*oid).to_be_bytes()),
                Some(Body::Ref { target: None, .. }) => String::new(),
                _ => return Err(Fault::Invalid),
            };
            Ok(Status::Success)
        })
    }

    fn coll_new(&self, session: RawHandle, err: RawHandle, tdo: RawHandle, out: &mut RawHandle) -> Status {
        self.call("coll_new", err, |state| {
            state.session(session.0)?;
            let type_name = match &state.node(tdo.0, HandleKind::TypeInfo)?.body {
                Body::Type(name) => name.clone(),
                _ => return Err(Fault::Invalid),
            };
            let cid = state.new_collection(&type_name)?;
            *out = RawHandle(state.alloc(HandleKind::Collection, Some(session.0), Body::Collection { cid }));
            Ok(Status::Success)
        })
    }

    fn coll_size(&self, err: RawHandle, coll: RawHandle, out: &mut u32) -> Status {
        self.call("coll_size", err, |state| {
            *out = state.collection_mut(coll.0)?.elements.len() as u32;
            Ok(Status::Success)
        })
    }

    fn coll_count(&self, err: RawHandle, coll: RawHandle, out: &mut u32) -> Status {
        self.call("coll_count", err, |state| {
            *out = state.collection_mut(coll.0)?.elements.iter().flatten().count() as u32;
            Ok(Status::Success)
        })
    }

    fn coll_get(&self, err: RawHandle, coll: RawHandle, index: u32, out: &mut Datum) -> Status {
        self.call("coll_get", err, |state| {
            let element = {
                let data = state.collection_mut(coll.0)?;
                let i = State::coll_index(data, index)?;
                data.elements[i].clone()
            };
            match element {
                Some(cell) => {
                    *out = state.cell_datum(&cell, coll.0, false)?.0;
                    Ok(Status::Success)
                }
                None => {
                    *out = Datum::Null;
                    Ok(Status::NoData)
                }
            }
        })
    }

    fn coll_set(&self, err: RawHandle, coll: RawHandle, index: u32, value: &Datum) -> Status {
        self.call("coll_set", err, |state| {
            let i = State::coll_index(state.collection_mut(coll.0)?, index)?;
            let cell = state.element_cell(coll.0, value)?;
            state.collection_mut(coll.0)?.elements[i] = Some(cell);
            Ok(Status::Success)
        })
    }

    fn coll_append(&self, err: RawHandle, coll: RawHandle, value: &Datum) -> Status {
        self.call("coll_append", err, |state| {
            let cell = state.element_cell(coll.0, value)?;
            state.coll_append(coll.0, cell)?;
            Ok(Status::Success)
        })
    }

    fn coll_trim(&self, err: RawHandle, coll: RawHandle, count: u32) -> Status {
        self.call("coll_trim", err, |state| {
            let data = state.collection_mut(coll.0)?;
            let len = data.elements.len();
            if count as usize > len {
                return Err(ora(
                    code::COLL_TRIM_TOO_LARGE,
                    format!("given trim size [{}] must be less than or equal to [{}]", count, len),
                )
                .into());
            }
            data.elements.truncate(len - count as usize);
            Ok(Status::Success)
        })
    }

    fn coll_delete(&self, err: RawHandle, coll: RawHandle, index: u32) -> Status {
        self.call("coll_delete", err, |state| {
            state.coll_delete(coll.0, index)?;
            Ok(Status::Success)
        })
    }

    fn aq_enqueue(
        &self,
        session: RawHandle,
        err: RawHandle,
        queue: &str,
        options: RawHandle,
        message: RawHandle,
        payload: &Datum,
        msg_id: &mut Vec<u8>,
    ) -> Status {
        let mut out = Vec::new();
        let status = self.call("aq_enqueue", err, |state| {
            state.session(session.0)?;
            let name = queue.to_uppercase();
            if !state.queues.contains_key(&name) {
                return Err(ora(code::QUEUE_NOT_FOUND, "specified queue does not exist").into());
            }
            let opts = state.node(options.0, HandleKind::Enqueue)?;
            let deviation = opts
                .attrs
                .get(&Attr::SequenceDeviation)
                .and_then(AttrValue::as_u32)
                .unwrap_or(0);
            let relative = opts
                .attrs
                .get(&Attr::RelativeMsgId)
                .and_then(|v| v.as_raw().map(<[u8]>::to_vec));

            let props = state.node(message.0, HandleKind::Message)?;
            let int = |attr: Attr| {
                props
                    .attrs
                    .get(&attr)
                    .and_then(AttrValue::as_i32)
                    .or_else(|| State::attr_default(HandleKind::Message, attr).and_then(|v| v.as_i32()))
                    .unwrap_or(0)
            };
            let text = |attr: Attr| {
                props
                    .attrs
                    .get(&attr)
                    .and_then(|v| v.as_text().map(str::to_string))
                    .unwrap_or_default()
            };
            let (priority, delay, expiration) = (int(Attr::Priority), int(Attr::Delay), int(Attr::Expiration));
            let (correlation, exception_queue) = (text(Attr::Correlation), text(Attr::ExceptionQueue));
            let sender = props
                .attrs
                .get(&Attr::Sender)
                .and_then(AttrValue::as_handle)
                .and_then(|agent| state.nodes.get(&agent.0))
                .map(|agent| {
                    let field = |attr: Attr| {
                        agent
                            .attrs
                            .get(&attr)
                            .and_then(|v| v.as_text().map(str::to_string))
                            .unwrap_or_default()
                    };
                    (field(Attr::AgentName), field(Attr::AgentAddress))
                });

            let payload = match payload {
                Datum::Null => Payload::Null,
                Datum::Raw(bytes) => Payload::Raw(bytes.clone()),
                Datum::Object(raw) => {
                    let oid = state.object_oid(raw.0)?;
                    Payload::Object(state.copy_object(oid)?)
                }
                _ => return Err(sql::inconsistent().into()),
            };

            let seq = state.next_id();
            let mut id = [0u8; 16];
            id[..4].copy_from_slice(b"MEMQ");
            id[8..].copy_from_slice(&seq.to_be_bytes());
            let enqueue_time = sql::now_seconds();
            let entry = QMessage {
                id,
                seq,
                payload,
                priority,
                correlation,
                delay,
                expiration,
                exception_queue,
                enqueue_time,
                attempts: 0,
                sender,
            };

            let messages = state.queues.entry(name.clone()).or_default();
            match deviation {
                // top of the queue
                3 => {
                    let first = messages.iter().map(|m| m.priority).min().unwrap_or(entry.priority);
                    let mut entry = entry;
                    entry.priority = entry.priority.min(first);
                    entry.seq = messages.iter().map(|m| m.seq).min().map_or(seq, |s| s.saturating_sub(1));
                    messages.push(entry);
                }
                // before the relative message
                2 => {
                    let mut entry = entry;
                    if let Some(target) = relative.and_then(|r| messages.iter().find(|m| m.id[..] == r[..])) {
                        entry.priority = target.priority;
                        entry.seq = target.seq.saturating_sub(1);
                    }
                    messages.push(entry);
                }
                _ => messages.push(entry),
            }

            let node = state.node_mut(message.0, HandleKind::Message)?;
            node.attrs.insert(Attr::MessageId, AttrValue::Raw(id.to_vec()));
            node.attrs.insert(Attr::EnqueueTime, AttrValue::Date(enqueue_time));
            node.attrs
                .insert(Attr::MessageState, AttrValue::UInt(if delay > 0 { 1 } else { 0 }));
            *msg_id = id.to_vec();
            out = state.queue_subscribers(&name);
            Ok(Status::Success)
        });
        deliver(out);
        status
    }

    fn aq_dequeue(
        &self,
        session: RawHandle,
        err: RawHandle,
        queue: &str,
        options: RawHandle,
        message: RawHandle,
        payload: &mut Datum,
    ) -> Status {
        if let Some(status) = self.inject("aq_dequeue", err) {
            return status;
        }
        let result = self.dequeue(session.0, queue, options.0, message.0, payload);
        self.complete("aq_dequeue", err, result)
    }

    fn subscription_register(
        &self,
        env: RawHandle,
        session: RawHandle,
        err: RawHandle,
        spec: &SubscriptionSpec,
        key: ContextKey,
        out: &mut RawHandle,
    ) -> Status {
        self.call("subscription_register", err, |state| {
            state.env(env.0)?;
            state.session(session.0)?;
            if let super::Namespace::Queue { queue, .. } = &spec.namespace {
                if !state.queues.contains_key(&queue.to_uppercase()) {
                    return Err(ora(code::QUEUE_NOT_FOUND, "specified queue does not exist").into());
                }
            }
            let raw = state.alloc(
                HandleKind::Subscription,
                Some(env.0),
                Body::Subscription(SubBody {
                    env: env.0,
                    spec: spec.clone(),
                    key,
                    tables: HashSet::new(),
                }),
            );
            *out = RawHandle(raw);
            Ok(Status::Success)
        })
    }

    fn subscription_unregister(&self, subscription: RawHandle, err: RawHandle) -> Status {
        self.call("subscription_unregister", err, |state| {
            state.free(subscription.0, HandleKind::Subscription)?;
            Ok(Status::Success)
        })
    }

    fn subscription_watch(&self, session: RawHandle, subscription: RawHandle, err: RawHandle, text: &str) -> Status {
        self.call("subscription_watch", err, |state| {
            state.session(session.0)?;
            let table = match sql::parse(text)? {
                Sql::Select(select) => select.table,
                _ => return Err(ora(29970, "specified registration id does not exist or query is not a SELECT").into()),
            };
            if let Some(table) = table {
                if !state.tables.contains_key(&table) {
                    return Err(ora(code::TABLE_NOT_FOUND, "table or view does not exist").into());
                }
                match state.nodes.get_mut(&subscription.0).map(|n| &mut n.body) {
                    Some(Body::Subscription(sub)) => {
                        sub.tables.insert(table);
                    }
                    _ => return Err(Fault::Invalid),
                }
            }
            Ok(Status::Success)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like() {
        assert!(like("ORDER%", "ORDER-42"));
        assert!(like("A_C", "ABC"));
        assert!(!like("A_C", "ABBC"));
        assert!(like("%", ""));
    }

    #[test]
    fn test_handle_free_counts() {
        let client = MemoryClient::new();
        let mut err = RawHandle::NULL;
        assert_eq!(client.handle_alloc(RawHandle(1), HandleKind::Error, &mut err), Status::InvalidHandle);

        let mut raw = RawHandle::NULL;
        let mut state = client.state.lock();
        raw.0 = state.alloc(HandleKind::Environment, None, Body::Plain);
        drop(state);

        assert_eq!(client.handle_alloc(raw, HandleKind::Error, &mut err), Status::Success);
        assert_eq!(client.handle_free(err, HandleKind::Error), Status::Success);
        assert_eq!(client.handle_free(err, HandleKind::Error), Status::InvalidHandle);
        assert_eq!(client.free_count(err), 1);
        assert_eq!(client.double_frees(), 1);
    }

    #[test]
    fn test_injected_failure_is_consumed() {
        let client = MemoryClient::new();
        client.fail_next("ping", 3113, "end-of-file on communication channel");
        let status = client.ping(RawHandle(0x42), RawHandle(0x43));
        assert_eq!(status, Status::Error);
        let diagnostic = client.error_get(RawHandle(0x43)).unwrap();
        assert_eq!(diagnostic.code, 3113);
        assert!(diagnostic.message.starts_with("ORA-03113"));
        assert_eq!(client.ping(RawHandle(0x42), RawHandle(0x43)), Status::InvalidHandle);
    }
}
