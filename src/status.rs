//! Status translation
//!
//! Every native entry point returns a [`Status`]. The translator turns that
//! status, together with the diagnostic left on the call's error descriptor,
//! into the crate's result type. Callers never branch on raw statuses.

use std::sync::Arc;

use crate::connection::Connection;
use crate::environment::EnvShared;
use crate::error::{DbError, Error, ErrorKind, Result};
use crate::handle::HandleId;
use crate::native::{HandleKind, RawHandle, Status};
use crate::statement::Statement;

/// Everything the translator needs to know about one native call
pub(crate) struct CallContext<'a> {
    pub shared: &'a Arc<EnvShared>,
    pub call: &'static str,
    pub err: RawHandle,
    pub session: Option<HandleId>,
    pub statement: Option<&'a Statement>,
    pub target: Option<HandleKind>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(shared: &'a Arc<EnvShared>, call: &'static str, err: RawHandle) -> Self {
        Self {
            shared,
            call,
            err,
            session: None,
            statement: None,
            target: None,
        }
    }

    pub(crate) fn connection(self, connection: &Connection) -> Self {
        self.session(connection.handle().id())
    }

    pub(crate) fn session(mut self, session: HandleId) -> Self {
        self.session = Some(session);
        self
    }

    pub(crate) fn statement(mut self, statement: &'a Statement) -> Self {
        self.statement = Some(statement);
        self
    }

    /// Kind of the handle the call operates on
    pub(crate) fn on(mut self, kind: HandleKind) -> Self {
        self.target = Some(kind);
        self
    }
}

/// Maps native statuses to results
pub(crate) struct Translator;

impl Translator {
    /// Translate a status
    ///
    /// Returns the status itself on success so callers can distinguish
    /// [`Status::NoData`] from [`Status::Success`].
    pub(crate) fn check(ctx: &CallContext<'_>, status: Status) -> Result<Status> {
        match status {
            Status::Success | Status::NoData => Ok(status),
            Status::SuccessWithInfo => {
                let err = Self::db_error(ctx, ErrorKind::Warning);
                if ctx.shared.warnings_enabled() {
                    Err(Error::database(err))
                } else {
                    tracing::warn!(call = ctx.call, code = err.code, message = %err.message, "Native warning");
                    Ok(Status::Success)
                }
            }
            Status::Error => Err(Error::database(Self::db_error(ctx, ErrorKind::Vendor))),
            Status::InvalidHandle => Err(Error::InvalidHandle {
                kind: Self::failing_kind(ctx),
            }),
            Status::NeedData => Err(Error::NotSupported(format!(
                "{}: piecewise operations",
                ctx.call
            ))),
            Status::StillExecuting => Err(Error::NotSupported(format!(
                "{}: non-blocking calls",
                ctx.call
            ))),
        }
    }

    fn db_error(ctx: &CallContext<'_>, kind: ErrorKind) -> DbError {
        let diagnostic = ctx.shared.native().error_get(ctx.err);
        let (code, message, row) = match diagnostic {
            Some(d) if !d.message.is_empty() => (d.code, d.message, d.row),
            Some(d) => (
                d.code,
                format!("{} failed with native code {}", ctx.call, d.code),
                d.row,
            ),
            None => (
                0,
                format!("{} returned {:?} without diagnostic", ctx.call, kind),
                None,
            ),
        };

        let mut err = DbError::new(kind, code, message, ctx.call);
        err.row = row;
        err.connection = ctx
            .session
            .and_then(|id| Connection::revive(ctx.shared, id));
        err.statement = ctx.statement.cloned();
        err
    }

    fn failing_kind(ctx: &CallContext<'_>) -> HandleKind {
        if let Some(kind) = ctx.target {
            kind
        } else if ctx.statement.is_some() {
            HandleKind::Statement
        } else if ctx.session.is_some() {
            HandleKind::Session
        } else {
            HandleKind::Environment
        }
    }
}

/// Invoke a native entry point and translate its status, returning early on
/// failure
///
/// ```ignore
/// let status = check!(ctx, native.stmt_fetch(stmt, err));
/// ```
macro_rules! check {
    ($ctx:expr, $call:expr) => {
        $crate::status::Translator::check(&$ctx, $call)?
    };
}

pub(crate) use check;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::memory::MemoryClient;
    use crate::{ConnectParams, Environment, EnvironmentConfig};

    fn invalid_kind(ctx: CallContext<'_>) -> HandleKind {
        match Translator::check(&ctx, Status::InvalidHandle) {
            Err(Error::InvalidHandle { kind }) => kind,
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_handle_reports_target_kind() {
        let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(MemoryClient::new())).unwrap();
        let conn = Connection::open(&env, &ConnectParams::new("db", "scott", "tiger")).unwrap();

        assert_eq!(invalid_kind(env.shared().ctx("env_call")), HandleKind::Environment);
        assert_eq!(invalid_kind(conn.ctx("session_call")), HandleKind::Session);
        assert_eq!(invalid_kind(conn.ctx("lob_read").on(HandleKind::Lob)), HandleKind::Lob);
        assert_eq!(invalid_kind(conn.ctx("object_set").on(HandleKind::Object)), HandleKind::Object);
    }

    #[test]
    fn test_piecewise_status_not_supported() {
        let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(MemoryClient::new())).unwrap();
        let err = Translator::check(&env.shared().ctx("lob_read"), Status::NeedData).unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }
}
