//! Error types for the binding
//!
//! Every failure surfaced by this crate is an [`Error`]. Failures reported by
//! the native client (server rejections and warnings) arrive as
//! [`Error::Database`] carrying a [`DbError`]; everything else is raised by the
//! binding itself when the API is misused or a handle is no longer valid.

use std::fmt;

use thiserror::Error;

use crate::connection::Connection;
use crate::constants::binding_code;
use crate::native::HandleKind;
use crate::statement::Statement;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an error, mirroring where it originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reported by the database or the native client library
    Vendor,
    /// Raised by the binding (misuse, invalid handle state, exhaustion)
    Binding,
    /// The operation succeeded but the native client attached a warning
    Warning,
}

/// Structured description of a failure reported by the native client
///
/// Besides the native code and message, the error keeps the connection and
/// statement the failing call was issued against, so callers can diagnose the
/// failure without re-querying native state.
pub struct DbError {
    pub(crate) kind: ErrorKind,
    pub(crate) code: i32,
    pub(crate) message: String,
    pub(crate) call: &'static str,
    pub(crate) row: Option<u32>,
    pub(crate) connection: Option<Connection>,
    pub(crate) statement: Option<Statement>,
}

impl DbError {
    pub(crate) fn new(kind: ErrorKind, code: i32, message: impl Into<String>, call: &'static str) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            call,
            row: None,
            connection: None,
            statement: None,
        }
    }

    /// Vendor error or warning
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Native error code (e.g. 942 for ORA-00942)
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Error message text as reported by the native client
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name of the native entry point that reported the failure
    pub fn call(&self) -> &'static str {
        self.call
    }

    /// 1-based index of the offending row for array operations
    pub fn row(&self) -> Option<u32> {
        self.row
    }

    /// Connection the failing call was issued on
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Statement the failing call was issued on
    pub fn statement(&self) -> Option<&Statement> {
        self.statement.as_ref()
    }
}

impl fmt::Debug for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbError")
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("call", &self.call)
            .field("row", &self.row)
            .field("has_connection", &self.connection.is_some())
            .field("has_statement", &self.statement.is_some())
            .finish()
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            ErrorKind::Warning => "warning ",
            _ => "",
        };
        // native messages usually carry their own ORA- prefix
        if self.message.starts_with("ORA-") {
            write!(f, "{}{}", prefix, self.message)?;
        } else {
            write!(f, "{}ORA-{:05}: {}", prefix, self.code, self.message)?;
        }
        if let Some(row) = self.row {
            write!(f, " (row {})", row)?;
        }
        Ok(())
    }
}

/// Main error type for the binding
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Vendor Errors
    // =========================================================================
    /// Error or warning reported by the native client
    #[error("{0}")]
    Database(Box<DbError>),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// The environment has not been initialized or was already cleaned up
    #[error("environment not initialized")]
    NotInitialized,

    /// The native environment could not be created
    #[error("cannot create native environment: {0}")]
    EnvironmentCreation(String),

    /// The proxy refers to a native resource that was already released
    #[error("invalid {kind} handle: resource already released")]
    InvalidHandle { kind: HandleKind },

    /// Feature requires an environment mode that was not enabled
    #[error("feature not available: {0}")]
    NotAvailable(String),

    // =========================================================================
    // API Misuse
    // =========================================================================
    /// Invalid argument supplied by the caller
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid connect string
    #[error("invalid connect string: {0}")]
    InvalidConnectString(String),

    /// A value could not be converted to the requested type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: &'static str, actual: String },

    /// Column name not found in the result set
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// Bind placeholder not found on the statement
    #[error("bind not found: {0}")]
    BindNotFound(String),

    /// Index outside the valid range
    #[error("index {index} out of bounds (1..={max})")]
    OutOfBounds { index: usize, max: usize },

    /// Operation not allowed in the current statement state
    #[error("invalid statement state: {0}")]
    StatementState(String),

    /// Two objects of incompatible types were combined
    #[error("incompatible objects: {0}")]
    NotCompatible(String),

    /// Operation is not supported by this binding
    #[error("not supported: {0}")]
    NotSupported(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn database(err: DbError) -> Self {
        Error::Database(Box::new(err))
    }

    pub(crate) fn type_mismatch(expected: &'static str, actual: impl fmt::Debug) -> Self {
        Error::TypeMismatch {
            expected,
            actual: format!("{:?}", actual),
        }
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(db) => db.kind,
            _ => ErrorKind::Binding,
        }
    }

    /// Human readable message
    pub fn message(&self) -> String {
        match self {
            Error::Database(db) => db.message.clone(),
            other => other.to_string(),
        }
    }

    /// Native error code, 0 for binding errors
    pub fn native_code(&self) -> i32 {
        match self {
            Error::Database(db) => db.code,
            _ => 0,
        }
    }

    /// Binding error code, [`binding_code::NONE`] for vendor errors
    pub fn binding_code(&self) -> u32 {
        match self {
            Error::Database(_) => binding_code::NONE,
            Error::NotInitialized => binding_code::NOT_INITIALIZED,
            Error::EnvironmentCreation(_) => binding_code::CREATE_ENVIRONMENT,
            Error::InvalidHandle { .. } => binding_code::INVALID_HANDLE,
            Error::NotAvailable(_) => binding_code::NOT_AVAILABLE,
            Error::InvalidArgument(_) => binding_code::INVALID_ARGUMENT,
            Error::InvalidConnectString(_) => binding_code::INVALID_ARGUMENT,
            Error::TypeMismatch { .. } => binding_code::TYPE_MISMATCH,
            Error::ColumnNotFound(_) => binding_code::COLUMN_NOT_FOUND,
            Error::BindNotFound(_) => binding_code::ITEM_NOT_FOUND,
            Error::OutOfBounds { .. } => binding_code::OUT_OF_BOUNDS,
            Error::StatementState(_) => binding_code::STATEMENT_STATE,
            Error::NotCompatible(_) => binding_code::NOT_COMPATIBLE,
            Error::NotSupported(_) => binding_code::NOT_SUPPORTED,
            Error::Internal(_) => binding_code::INTERNAL,
        }
    }

    /// Connection associated with a vendor error
    pub fn connection(&self) -> Option<&Connection> {
        match self {
            Error::Database(db) => db.connection(),
            _ => None,
        }
    }

    /// Statement associated with a vendor error
    pub fn statement(&self) -> Option<&Statement> {
        match self {
            Error::Database(db) => db.statement(),
            _ => None,
        }
    }

    /// Offending row index (1-based) for array DML errors
    pub fn row(&self) -> Option<u32> {
        match self {
            Error::Database(db) => db.row,
            _ => None,
        }
    }

    /// Check if this is a warning rather than a failure
    pub fn is_warning(&self) -> bool {
        self.kind() == ErrorKind::Warning
    }

    /// Check if this error was raised because a handle was already released
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Error::InvalidHandle { .. })
    }

    /// Check if this error carries the given native error code
    pub fn is_native(&self, code: i32) -> bool {
        matches!(self, Error::Database(db) if db.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_display() {
        let err = Error::database(DbError::new(
            ErrorKind::Vendor,
            942,
            "table or view does not exist",
            "stmt_execute",
        ));
        assert_eq!(err.to_string(), "ORA-00942: table or view does not exist");
        assert_eq!(err.kind(), ErrorKind::Vendor);
        assert_eq!(err.native_code(), 942);
        assert_eq!(err.binding_code(), binding_code::NONE);
        assert!(err.is_native(942));
    }

    #[test]
    fn test_warning_display_includes_row() {
        let mut db = DbError::new(ErrorKind::Warning, 24347, "null column in aggregate", "stmt_fetch");
        db.row = Some(3);
        let err = Error::database(db);
        assert!(err.is_warning());
        assert_eq!(
            err.to_string(),
            "warning ORA-24347: null column in aggregate (row 3)"
        );
        assert_eq!(err.row(), Some(3));
    }

    #[test]
    fn test_prefixed_native_message_not_doubled() {
        let err = Error::database(DbError::new(
            ErrorKind::Vendor,
            1017,
            "ORA-01017: invalid username/password; logon denied",
            "session_begin",
        ));
        assert_eq!(err.to_string(), "ORA-01017: invalid username/password; logon denied");
    }

    #[test]
    fn test_binding_errors_have_codes() {
        let err = Error::InvalidHandle {
            kind: HandleKind::Statement,
        };
        assert!(err.is_invalid_handle());
        assert_eq!(err.kind(), ErrorKind::Binding);
        assert_eq!(err.binding_code(), binding_code::INVALID_HANDLE);
        assert_eq!(err.native_code(), 0);
        assert!(!err.message().is_empty());

        assert_eq!(
            Error::ColumnNotFound("X".into()).binding_code(),
            binding_code::COLUMN_NOT_FOUND
        );
    }
}
