//! Native call interface
//!
//! The vendor client library is an opaque, external dependency. This module
//! describes the slice of its call interface the binding uses: every entry
//! point returns a [`Status`] and writes its results through `&mut` out
//! parameters, exactly like the C interface it models. Failure details are
//! read back from the error descriptor passed to the call with
//! [`NativeApi::error_get`]; callers never interpret statuses themselves but
//! go through the status translator.
//!
//! [`memory::MemoryClient`] is an in-process emulation of the native client.

pub mod memory;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDateTime};

use crate::callback::ContextKey;
use crate::config::{EnvMode, SessionMode};
use crate::connection::{FailoverEvent, FailoverRequest, FailoverResult};
use crate::environment::{HaEventType, HaSource};
use crate::subscription::{EventType, ObjectEvent};
use crate::types::Interval;

/// Opaque native resource handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct RawHandle(pub u64);

impl RawHandle {
    /// The null handle
    pub const NULL: RawHandle = RawHandle(0);

    /// Check if this is the null handle
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Kind of native resource behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Environment
    Environment,
    /// Error descriptor
    Error,
    /// User session (connection)
    Session,
    /// Session pool
    Pool,
    /// Prepared statement
    Statement,
    /// Result set cursor (binding-side only)
    Resultset,
    /// LOB locator
    Lob,
    /// Type descriptor
    TypeInfo,
    /// Object instance
    Object,
    /// Object reference
    Reference,
    /// VARRAY or nested table instance
    Collection,
    /// Change notification subscription
    Subscription,
    /// Enqueue options
    Enqueue,
    /// Dequeue options
    Dequeue,
    /// AQ message properties
    Message,
    /// AQ agent
    Agent,
}

impl HandleKind {
    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            HandleKind::Environment => "environment",
            HandleKind::Error => "error",
            HandleKind::Session => "connection",
            HandleKind::Pool => "pool",
            HandleKind::Statement => "statement",
            HandleKind::Resultset => "resultset",
            HandleKind::Lob => "lob",
            HandleKind::TypeInfo => "type info",
            HandleKind::Object => "object",
            HandleKind::Reference => "reference",
            HandleKind::Collection => "collection",
            HandleKind::Subscription => "subscription",
            HandleKind::Enqueue => "enqueue",
            HandleKind::Dequeue => "dequeue",
            HandleKind::Message => "message",
            HandleKind::Agent => "agent",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Return status of a native entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    /// Call completed
    Success = 0,
    /// Call completed with a warning attached to the error descriptor
    SuccessWithInfo = 1,
    /// Call needs more data (piecewise operation)
    NeedData = 99,
    /// No (more) data: end of fetch, dequeue timeout
    NoData = 100,
    /// Call failed, details on the error descriptor
    Error = -1,
    /// A handle argument was invalid
    InvalidHandle = -2,
    /// Non-blocking call still in progress
    StillExecuting = -3123,
}

impl Status {
    /// Numeric status code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Success or success with info
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success | Status::SuccessWithInfo)
    }
}

/// One diagnostic record read from an error descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Native error code
    pub code: i32,
    /// Message text
    pub message: String,
    /// 1-based row index for array operations
    pub row: Option<u32>,
}

impl Diagnostic {
    /// Create a diagnostic without row information
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            row: None,
        }
    }

    /// Attach a row index
    pub fn at_row(mut self, row: u32) -> Self {
        self.row = Some(row);
        self
    }
}

/// Column / attribute data type as described by the native layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// VARCHAR2, CHAR
    Text,
    /// NUMBER
    Numeric,
    /// BINARY_DOUBLE / BINARY_FLOAT
    Double,
    /// RAW
    Raw,
    /// BOOLEAN
    Boolean,
    /// DATE
    Date,
    /// TIMESTAMP
    Timestamp,
    /// TIMESTAMP WITH TIME ZONE
    TimestampTz,
    /// INTERVAL
    Interval,
    /// CLOB
    Clob,
    /// BLOB
    Blob,
    /// Object type instance
    Object,
    /// REF to an object
    Reference,
    /// VARRAY or nested table
    Collection,
}

/// Data cell exchanged with the native layer for binds, fetches and
/// object attributes
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    /// NULL
    Null,
    /// Character data
    Text(String),
    /// Integral number
    Integer(i64),
    /// Floating point number
    Double(f64),
    /// Binary data
    Raw(Vec<u8>),
    /// Boolean
    Boolean(bool),
    /// DATE
    Date(NaiveDateTime),
    /// TIMESTAMP
    Timestamp(NaiveDateTime),
    /// TIMESTAMP WITH TIME ZONE
    TimestampTz(DateTime<FixedOffset>),
    /// INTERVAL
    Interval(Interval),
    /// LOB locator
    Lob(LobKind, RawHandle),
    /// Object instance
    Object(RawHandle),
    /// Object reference
    Reference(RawHandle),
    /// Collection instance
    Collection(RawHandle),
}

impl Datum {
    /// Check for NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

/// Direction of a bind variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindDirection {
    /// Input only
    #[default]
    In,
    /// Output only
    Out,
    /// Input and output
    InOut,
}

/// Kind of large object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LobKind {
    /// Character LOB
    Clob,
    /// Binary LOB
    Blob,
}

/// Execution flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecMode {
    /// Commit when the execution succeeds
    pub commit_on_success: bool,
    /// Continue array DML after row errors, collecting them
    pub batch_errors: bool,
    /// Only describe a query, do not execute it
    pub describe_only: bool,
    /// Let the result set move backwards and jump to arbitrary rows
    pub scrollable: bool,
}

/// Direction of a scrollable fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrientation {
    /// Row after the current one
    Next,
    /// Row before the current one
    Prior,
    /// First row
    First,
    /// Last row
    Last,
    /// Row at a 1-based position
    Absolute,
    /// Row at an offset from the current one
    Relative,
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Maximum size in bytes
    pub size: u32,
    /// Numeric precision
    pub precision: i16,
    /// Numeric scale
    pub scale: i16,
    /// NULL allowed
    pub nullable: bool,
    /// Object type name for object and REF columns
    pub type_name: Option<String>,
}

impl ColumnDesc {
    /// Create a nullable column description
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            size: 0,
            precision: 0,
            scale: 0,
            nullable: true,
            type_name: None,
        }
    }
}

impl Default for ColumnDesc {
    fn default() -> Self {
        Self::new("", DataType::Text)
    }
}

/// Object type attribute metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDesc {
    /// Attribute name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Nested object type name
    pub type_name: Option<String>,
}

impl AttrDesc {
    /// Create a scalar attribute
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            type_name: None,
        }
    }

    /// Create an attribute holding another object type
    pub fn object(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Object,
            type_name: Some(type_name.into()),
        }
    }

    /// Create an attribute holding a collection type
    pub fn collection(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Collection,
            type_name: Some(type_name.into()),
        }
    }
}

/// Kind of collection type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Bounded, dense array
    Varray,
    /// Unbounded table whose elements can be deleted individually
    NestedTable,
}

/// Collection type metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDesc {
    /// VARRAY or nested table
    pub kind: CollectionKind,
    /// Maximum number of elements of a VARRAY, 0 for nested tables
    pub max: u32,
    /// Element type; the name is unused
    pub element: AttrDesc,
}

impl CollectionDesc {
    /// Describe a VARRAY of at most `max` elements
    pub fn varray(max: u32, element: AttrDesc) -> Self {
        Self {
            kind: CollectionKind::Varray,
            max,
            element,
        }
    }

    /// Describe a nested table
    pub fn nested_table(element: AttrDesc) -> Self {
        Self {
            kind: CollectionKind::NestedTable,
            max: 0,
            element,
        }
    }
}

/// Handle attribute identifiers for [`NativeApi::attr_get`] / [`NativeApi::attr_set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Attr {
    // statement
    RowCount,
    ColumnCount,
    PrefetchRows,
    // session
    StmtCacheSize,
    UserName,
    DatabaseName,
    TafCapable,
    // pool
    PoolBusyCount,
    PoolOpenCount,
    PoolMin,
    PoolMax,
    PoolIncrement,
    PoolTimeout,
    PoolNoWait,
    // lob
    LobIsTemporary,
    LobChunkSize,
    // object / reference
    TypeName,
    // enqueue / dequeue options
    Visibility,
    SequenceDeviation,
    RelativeMsgId,
    Consumer,
    Correlation,
    DequeueMode,
    Navigation,
    WaitTime,
    // message properties
    Priority,
    Expiration,
    Delay,
    Attempts,
    MessageState,
    MessageId,
    EnqueueTime,
    ExceptionQueue,
    Sender,
    // agent
    AgentName,
    AgentAddress,
    // subscription
    SubscriptionName,
    SubscriptionPort,
    SubscriptionTimeout,
}

/// Attribute value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum AttrValue {
    #[default]
    None,
    UInt(u32),
    Int(i32),
    Bool(bool),
    Text(String),
    Raw(Vec<u8>),
    Date(NaiveDateTime),
    Handle(RawHandle),
}

impl AttrValue {
    /// Read as unsigned integer
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            AttrValue::UInt(v) => Some(*v),
            AttrValue::Int(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Read as signed integer
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::UInt(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Read as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Read as raw bytes
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            AttrValue::Raw(v) => Some(v),
            _ => None,
        }
    }

    /// Read as date
    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            AttrValue::Date(v) => Some(*v),
            _ => None,
        }
    }

    /// Read as handle
    pub fn as_handle(&self) -> Option<RawHandle> {
        match self {
            AttrValue::Handle(v) => Some(*v),
            _ => None,
        }
    }
}

/// What a subscription listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Namespace {
    /// Database / object / row change notification
    DatabaseChange {
        /// Bit set of [`ChangeTypes`](crate::subscription::ChangeTypes)
        change_types: u32,
    },
    /// Message availability on a queue
    Queue {
        /// Queue name
        queue: String,
        /// Consumer name for multi-consumer queues
        consumer: Option<String>,
    },
}

/// Parameters of a subscription registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Subscription name
    pub name: String,
    /// What to listen to
    pub namespace: Namespace,
    /// Client port for notifications (0 = any)
    pub port: u32,
    /// Registration timeout in seconds (0 = none)
    pub timeout: u32,
}

/// Notification delivered by the native layer on one of its own threads
#[derive(Debug, Clone, PartialEq)]
pub enum NativeNotification {
    /// Instance / service state change
    HighAvailability {
        /// Session affected by the event
        session: RawHandle,
        /// Origin of the event
        source: HaSource,
        /// Up or down
        event: HaEventType,
        /// When the event was generated
        time: NaiveDateTime,
    },
    /// Database change notification
    DatabaseChange {
        /// Event type
        kind: EventType,
        /// Object level operation, for object change events
        object_event: Option<ObjectEvent>,
        /// Database name
        database: String,
        /// Changed object name
        object: Option<String>,
        /// Changed row
        rowid: Option<String>,
    },
    /// A message became available on a queue
    MessageAvailable {
        /// Queue name
        queue: String,
    },
}

/// Receiver of native notifications, handed to the native layer at
/// environment creation
///
/// The native layer only passes the opaque context key it was given at
/// registration time; the sink maps it back to the typed handler.
pub trait NotificationSink: Send + Sync {
    /// Deliver an asynchronous notification
    fn notify(&self, key: ContextKey, notification: NativeNotification);

    /// Deliver a failover (TAF) callback and return the application's decision
    fn failover(
        &self,
        key: ContextKey,
        session: RawHandle,
        request: FailoverRequest,
        event: FailoverEvent,
    ) -> FailoverResult;
}

/// The native call interface
///
/// Parameter conventions follow the native library: `err` is the error
/// descriptor that receives diagnostics, outputs are `&mut` parameters and the
/// return value is a [`Status`].
#[allow(clippy::too_many_arguments)]
pub trait NativeApi: Send + Sync {
    // ---------------------------------------------------------------- environment

    /// Create the native environment
    fn env_create(
        &self,
        mode: EnvMode,
        lib_path: Option<&Path>,
        sink: Arc<dyn NotificationSink>,
        env: &mut RawHandle,
    ) -> Status;

    /// Version of the native client library (major * 100 + minor)
    fn client_version(&self) -> u32;

    /// Pop the most recent diagnostic recorded on an error descriptor
    fn error_get(&self, err: RawHandle) -> Option<Diagnostic>;

    /// Allocate a handle or descriptor under `parent`
    fn handle_alloc(&self, parent: RawHandle, kind: HandleKind, out: &mut RawHandle) -> Status;

    /// Free a handle or descriptor
    fn handle_free(&self, handle: RawHandle, kind: HandleKind) -> Status;

    /// Read a handle attribute
    fn attr_get(
        &self,
        handle: RawHandle,
        kind: HandleKind,
        attr: Attr,
        err: RawHandle,
        out: &mut AttrValue,
    ) -> Status;

    /// Write a handle attribute
    fn attr_set(
        &self,
        handle: RawHandle,
        kind: HandleKind,
        attr: Attr,
        value: &AttrValue,
        err: RawHandle,
    ) -> Status;

    /// Enable or disable HA event delivery for the environment
    fn set_ha_callback(&self, env: RawHandle, err: RawHandle, key: Option<ContextKey>) -> Status;

    // ---------------------------------------------------------------- sessions

    /// Log on a new session
    fn session_begin(
        &self,
        env: RawHandle,
        err: RawHandle,
        database: &str,
        user: &str,
        password: &str,
        mode: SessionMode,
        out: &mut RawHandle,
    ) -> Status;

    /// Log off a session (or return it to its pool) and free its handle
    fn session_end(&self, session: RawHandle, err: RawHandle) -> Status;

    /// Create a session pool
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
    ) -> Status;

    /// Get a session from a pool
    fn pool_get_session(&self, pool: RawHandle, err: RawHandle, tag: &str, out: &mut RawHandle) -> Status;

    /// Destroy a session pool
    fn pool_destroy(&self, pool: RawHandle, err: RawHandle) -> Status;

    /// Commit the session's transaction
    fn trans_commit(&self, session: RawHandle, err: RawHandle) -> Status;

    /// Roll back the session's transaction
    fn trans_rollback(&self, session: RawHandle, err: RawHandle) -> Status;

    /// Server round trip
    fn ping(&self, session: RawHandle, err: RawHandle) -> Status;

    /// Interrupt the call currently running on the session (any thread)
    fn break_call(&self, session: RawHandle, err: RawHandle) -> Status;

    /// Server version banner
    fn server_version(&self, session: RawHandle, err: RawHandle, out: &mut String) -> Status;

    /// Enable or disable failover callbacks for a session
    fn set_failover_callback(&self, session: RawHandle, err: RawHandle, key: Option<ContextKey>) -> Status;

    // ---------------------------------------------------------------- statements

    /// Prepare SQL text on an allocated statement handle
    fn stmt_prepare(&self, session: RawHandle, stmt: RawHandle, err: RawHandle, sql: &str) -> Status;

    /// Bind values (one per iteration) to a named placeholder
    fn stmt_bind(
        &self,
        stmt: RawHandle,
        err: RawHandle,
        name: &str,
        values: &[Datum],
        direction: BindDirection,
    ) -> Status;

    /// Execute a prepared statement `iters` times
    fn stmt_execute(
        &self,
        session: RawHandle,
        stmt: RawHandle,
        err: RawHandle,
        iters: u32,
        mode: ExecMode,
    ) -> Status;

    /// Fetch the next row, [`Status::NoData`] at the end
    fn stmt_fetch(&self, stmt: RawHandle, err: RawHandle) -> Status;

    /// Move a scrollable cursor, [`Status::NoData`] when the target row does
    /// not exist
    ///
    /// `offset` is used by [`FetchOrientation::Absolute`] and
    /// [`FetchOrientation::Relative`]. `position` receives the 1-based
    /// position of the cursor afterwards: 0 before the first row, one past
    /// the last row after it.
    fn stmt_fetch_scroll(
        &self,
        stmt: RawHandle,
        err: RawHandle,
        orientation: FetchOrientation,
        offset: i64,
        position: &mut u64,
    ) -> Status;

    /// Describe a select-list column (1-based)
    fn stmt_describe(&self, stmt: RawHandle, err: RawHandle, position: u32, out: &mut ColumnDesc) -> Status;

    /// Read a column of the current row (1-based)
    fn stmt_column_value(&self, stmt: RawHandle, err: RawHandle, position: u32, out: &mut Datum) -> Status;

    /// Read an output bind value after execution
    fn stmt_out_value(&self, stmt: RawHandle, err: RawHandle, name: &str, out: &mut Datum) -> Status;

    /// Row errors collected by the last batch-errors execution
    fn stmt_batch_errors(&self, stmt: RawHandle, err: RawHandle, out: &mut Vec<Diagnostic>) -> Status;

    // ---------------------------------------------------------------- lobs

    /// Create a temporary LOB
    fn lob_create_temporary(&self, session: RawHandle, err: RawHandle, kind: LobKind, out: &mut RawHandle) -> Status;

    /// Read up to `amount` units starting at `offset` (0-based)
    ///
    /// Units are characters for CLOBs and bytes for BLOBs; CLOB data is
    /// exchanged as UTF-8.
    fn lob_read(
        &self,
        session: RawHandle,
        err: RawHandle,
        lob: RawHandle,
        offset: u64,
        amount: u64,
        out: &mut Vec<u8>,
    ) -> Status;

    /// Write at `offset` (0-based), reporting the units written
    fn lob_write(
        &self,
        session: RawHandle,
        err: RawHandle,
        lob: RawHandle,
        offset: u64,
        data: &[u8],
        written: &mut u64,
    ) -> Status;

    /// Append at the end
    fn lob_append(&self, session: RawHandle, err: RawHandle, lob: RawHandle, data: &[u8]) -> Status;

    /// Truncate to `length` units
    fn lob_trim(&self, session: RawHandle, err: RawHandle, lob: RawHandle, length: u64) -> Status;

    /// Current length in units
    fn lob_length(&self, session: RawHandle, err: RawHandle, lob: RawHandle, out: &mut u64) -> Status;

    /// Free a temporary LOB and its locator
    fn lob_free_temporary(&self, session: RawHandle, err: RawHandle, lob: RawHandle) -> Status;

    // ---------------------------------------------------------------- objects

    /// Describe an object or collection type
    ///
    /// Collection types have no attributes and fill `collection`.
    fn type_describe(
        &self,
        session: RawHandle,
        err: RawHandle,
        name: &str,
        tdo: &mut RawHandle,
        attrs: &mut Vec<AttrDesc>,
        collection: &mut Option<CollectionDesc>,
    ) -> Status;

    /// Create a new object instance
    fn object_new(&self, session: RawHandle, err: RawHandle, tdo: RawHandle, out: &mut RawHandle) -> Status;

    /// Read an object attribute
    fn object_get(&self, err: RawHandle, object: RawHandle, attr: &str, out: &mut Datum) -> Status;

    /// Write an object attribute
    fn object_set(&self, err: RawHandle, object: RawHandle, attr: &str, value: &Datum) -> Status;

    /// Allocate a reference pointing to an object
    fn object_get_ref(&self, session: RawHandle, err: RawHandle, object: RawHandle, out: &mut RawHandle) -> Status;

    /// Allocate a null reference for the given type
    fn ref_new(&self, session: RawHandle, err: RawHandle, tdo: RawHandle, out: &mut RawHandle) -> Status;

    /// Check whether a reference is null
    fn ref_is_null(&self, reference: RawHandle) -> bool;

    /// Make a reference null
    fn ref_clear(&self, err: RawHandle, reference: RawHandle) -> Status;

    /// Copy `source` into `target`
    fn ref_assign(&self, err: RawHandle, source: RawHandle, target: RawHandle) -> Status;

    /// Pin the referenced object; the object handle is owned by the reference
    fn ref_pin(&self, session: RawHandle, err: RawHandle, reference: RawHandle, out: &mut RawHandle) -> Status;

    /// Unpin an object obtained with [`NativeApi::ref_pin`]
    fn ref_unpin(&self, err: RawHandle, object: RawHandle) -> Status;

    /// Hexadecimal text form of a reference
    fn ref_to_hex(&self, err: RawHandle, reference: RawHandle, out: &mut String) -> Status;

    // ---------------------------------------------------------------- collections

    /// Create a new, empty collection instance
    fn coll_new(&self, session: RawHandle, err: RawHandle, tdo: RawHandle, out: &mut RawHandle) -> Status;

    /// Number of element slots, deleted nested table elements included
    fn coll_size(&self, err: RawHandle, coll: RawHandle, out: &mut u32) -> Status;

    /// Number of elements that exist
    fn coll_count(&self, err: RawHandle, coll: RawHandle, out: &mut u32) -> Status;

    /// Read the element at a 0-based index, [`Status::NoData`] for a
    /// deleted element
    ///
    /// Objects, LOBs and collections are owned by the collection.
    fn coll_get(&self, err: RawHandle, coll: RawHandle, index: u32, out: &mut Datum) -> Status;

    /// Overwrite the element at a 0-based index
    fn coll_set(&self, err: RawHandle, coll: RawHandle, index: u32, value: &Datum) -> Status;

    /// Add an element at the end
    fn coll_append(&self, err: RawHandle, coll: RawHandle, value: &Datum) -> Status;

    /// Remove `count` elements from the end
    fn coll_trim(&self, err: RawHandle, coll: RawHandle, count: u32) -> Status;

    /// Delete the element at a 0-based index of a nested table, leaving a gap
    fn coll_delete(&self, err: RawHandle, coll: RawHandle, index: u32) -> Status;

    // ---------------------------------------------------------------- advanced queuing

    /// Enqueue a message
    fn aq_enqueue(
        &self,
        session: RawHandle,
        err: RawHandle,
        queue: &str,
        options: RawHandle,
        message: RawHandle,
        payload: &Datum,
        msg_id: &mut Vec<u8>,
    ) -> Status;

    /// Dequeue a message, [`Status::NoData`] when the wait time expires
    fn aq_dequeue(
        &self,
        session: RawHandle,
        err: RawHandle,
        queue: &str,
        options: RawHandle,
        message: RawHandle,
        payload: &mut Datum,
    ) -> Status;

    // ---------------------------------------------------------------- subscriptions

    /// Register a subscription delivering notifications under `key`
    fn subscription_register(
        &self,
        env: RawHandle,
        session: RawHandle,
        err: RawHandle,
        spec: &SubscriptionSpec,
        key: ContextKey,
        out: &mut RawHandle,
    ) -> Status;

    /// Unregister a subscription and free its handle
    fn subscription_unregister(&self, subscription: RawHandle, err: RawHandle) -> Status;

    /// Add a query whose objects are watched by the subscription
    fn subscription_watch(&self, session: RawHandle, subscription: RawHandle, err: RawHandle, sql: &str) -> Status;
}
