//! Binding constants
//!
//! Error codes raised by the binding itself, native error numbers the binding
//! reacts to, and library-wide defaults.

// =============================================================================
// Binding Error Codes
// =============================================================================

/// Stable codes attached to binding-level errors
#[allow(missing_docs)]
pub mod binding_code {
    pub const NONE: u32 = 0;
    pub const NOT_INITIALIZED: u32 = 1;
    pub const CREATE_ENVIRONMENT: u32 = 2;
    pub const INVALID_HANDLE: u32 = 3;
    pub const NOT_AVAILABLE: u32 = 4;
    pub const INVALID_ARGUMENT: u32 = 5;
    pub const TYPE_MISMATCH: u32 = 6;
    pub const COLUMN_NOT_FOUND: u32 = 7;
    pub const ITEM_NOT_FOUND: u32 = 8;
    pub const OUT_OF_BOUNDS: u32 = 9;
    pub const STATEMENT_STATE: u32 = 10;
    pub const NOT_COMPATIBLE: u32 = 11;
    pub const NOT_SUPPORTED: u32 = 12;
    pub const INTERNAL: u32 = 13;
}

// =============================================================================
// Native Error Numbers
// =============================================================================

/// Native error numbers the binding or the emulated client refer to
#[allow(missing_docs)]
pub mod ora {
    pub const UNIQUE_CONSTRAINT: i32 = 1;
    pub const USER_REQUESTED_CANCEL: i32 = 1013;
    pub const INVALID_USERNAME_PASSWORD: i32 = 1017;
    pub const NO_DATA_FOUND: i32 = 1403;
    pub const NOT_CONNECTED: i32 = 3114;
    pub const INVALID_IDENTIFIER: i32 = 904;
    pub const SQL_NOT_PROPERLY_ENDED: i32 = 933;
    pub const TABLE_NOT_FOUND: i32 = 942;
    pub const NAME_ALREADY_USED: i32 = 955;
    pub const VALUES_MISMATCH: i32 = 947;
    pub const INVALID_SQL: i32 = 900;
    pub const NOT_ALL_VARIABLES_BOUND: i32 = 1008;
    pub const TYPE_NOT_FOUND: i32 = 4043;
    pub const DEQUEUE_TIMEOUT: i32 = 25228;
    pub const POOL_EXHAUSTED: i32 = 24418;
    pub const INVALID_LOB_LOCATOR: i32 = 22275;
    pub const NULL_REFERENCE: i32 = 22805;
    pub const INCONSISTENT_DATATYPES: i32 = 932;
    pub const INVALID_DATATYPE: i32 = 902;
    pub const MISSING_KEYWORD: i32 = 905;
    pub const MISSING_EXPRESSION: i32 = 936;
    pub const NOT_SINGLE_GROUP: i32 = 937;
    pub const FETCH_OUT_OF_SEQUENCE: i32 = 1002;
    pub const NOT_IN_SELECT_LIST: i32 = 1007;
    pub const ILLEGAL_VARIABLE: i32 = 1036;
    pub const CANNOT_INSERT_NULL: i32 = 1400;
    pub const DIVISOR_IS_ZERO: i32 = 1476;
    pub const VALUE_TOO_LARGE: i32 = 12899;
    pub const QUEUE_NOT_FOUND: i32 = 24010;
    pub const ILLEGAL_ATTRIBUTE: i32 = 24315;
    pub const STMT_NOT_PREPARED: i32 = 24337;
    pub const STMT_NOT_EXECUTED: i32 = 24338;
    pub const INVALID_FETCH: i32 = 24391;
    pub const SUBSCRIPT_OUTSIDE_LIMIT: i32 = 6532;
    pub const COLL_ELEMENT_MISSING: i32 = 22160;
    pub const COLL_INDEX_OUT_OF_RANGE: i32 = 22165;
    pub const COLL_TRIM_TOO_LARGE: i32 = 22167;
    pub const SERVER_OUTPUT_OVERFLOW: i32 = 20000;
}

// =============================================================================
// Defaults
// =============================================================================

/// Default capacity of the notification queue
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 64;

/// Default number of rows fetched per round trip
pub const DEFAULT_FETCH_SIZE: u32 = 20;

/// Default statement cache size for new sessions
pub const DEFAULT_STMT_CACHE_SIZE: u32 = 20;

/// Default chunk size reported for LOB locators
pub const DEFAULT_LOB_CHUNK_SIZE: u32 = 8132;

/// Server output buffer enabled by a bare `DBMS_OUTPUT.ENABLE`, in bytes
pub const DEFAULT_SERVER_OUTPUT_BUFFER: usize = 20_000;

/// Maximum length of a bind placeholder name
pub const MAX_BIND_NAME_LENGTH: usize = 30;
