//! Error translation tests
//!
//! Native failures must surface as [`Error::Database`] with the native code,
//! message and the connection / statement of the failing call; warnings are
//! logged unless the environment raises them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ocibind::constants::{binding_code, ora};
use ocibind::native::memory::MemoryClient;
use ocibind::native::HandleKind;
use ocibind::{ConnectParams, Connection, Environment, EnvironmentConfig, Error, ErrorKind, Statement};

fn setup() -> (Arc<MemoryClient>, Environment, Connection) {
    let client = Arc::new(MemoryClient::new());
    let env = Environment::initialize(EnvironmentConfig::new(), client.clone()).unwrap();
    let conn = Connection::open(&env, &ConnectParams::new("memdb", "scott", "tiger")).unwrap();
    (client, env, conn)
}

mod vendor_error_tests {
    use super::*;

    #[test]
    fn test_unknown_table() {
        let (_client, _env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        let err = stmt.execute_sql("SELECT * FROM missing").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Vendor);
        assert!(err.is_native(ora::TABLE_NOT_FOUND));
        assert_eq!(err.native_code(), ora::TABLE_NOT_FOUND);
        assert_eq!(err.binding_code(), binding_code::NONE);
        assert_eq!(err.to_string(), "ORA-00942: table or view does not exist");
        assert_eq!(err.statement(), Some(&stmt));
        assert_eq!(err.connection().map(Connection::user), Some("scott"));
        assert_eq!(err.row(), None);
    }

    #[test]
    fn test_injected_failure_carries_call_name() {
        let (client, _env, conn) = setup();
        client.fail_next("ping", ora::NOT_CONNECTED, "not connected to ORACLE");

        match conn.ping().unwrap_err() {
            Error::Database(db) => {
                assert_eq!(db.code(), ora::NOT_CONNECTED);
                assert_eq!(db.call(), "ping");
                assert_eq!(db.message(), "ORA-03114: not connected to ORACLE");
                assert!(db.connection().is_some());
                assert!(db.statement().is_none());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // the failure is consumed
        assert!(conn.ping().is_ok());
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_parse_error_reported_at_execute() {
        let (_client, _env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("SELEKT 1 FROM dual").unwrap();
        let err = stmt.execute().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Vendor);
        assert!(err.native_code() > 0);
    }

    #[test]
    fn test_constraint_violation_keeps_session_usable() {
        let (_client, _env, conn) = setup();
        conn.execute("CREATE TABLE t (id NUMBER PRIMARY KEY)").unwrap();
        conn.execute("INSERT INTO t VALUES (1)").unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)").unwrap_err();
        assert!(err.is_native(ora::UNIQUE_CONSTRAINT));
        assert_eq!(conn.execute("INSERT INTO t VALUES (2)").unwrap(), 1);
    }
}

mod warning_tests {
    use super::*;

    #[test]
    fn test_warning_logged_by_default() {
        let (client, env, conn) = setup();
        assert!(!env.warnings_enabled());
        client.warn_next("ping", 28002, "the password will expire within 7 days");
        assert!(conn.ping().is_ok());
    }

    #[test]
    fn test_warning_raised_when_enabled() {
        let (client, env, conn) = setup();
        env.enable_warnings(true);
        client.warn_next("ping", 28002, "the password will expire within 7 days");

        let err = conn.ping().unwrap_err();
        assert!(err.is_warning());
        assert_eq!(err.kind(), ErrorKind::Warning);
        assert_eq!(err.native_code(), 28002);
        assert!(err.to_string().starts_with("warning ORA-28002"));
        assert!(conn.ping().is_ok());
    }

    #[test]
    fn test_warning_on_open_from_config() {
        let client = Arc::new(MemoryClient::new());
        let env = Environment::initialize(EnvironmentConfig::new().warnings(true), client.clone()).unwrap();
        assert!(env.warnings_enabled());
        client.warn_next("session_begin", 28002, "the password will expire within 7 days");
        let err = Connection::open(&env, &ConnectParams::new("memdb", "scott", "tiger")).unwrap_err();
        assert!(err.is_warning());
    }
}

mod binding_error_tests {
    use super::*;

    #[test]
    fn test_invalid_handle_names_kind() {
        let (_client, _env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.close().unwrap();

        match stmt.execute_sql("SELECT 1 FROM dual") {
            Err(Error::InvalidHandle { kind }) => assert_eq!(kind, HandleKind::Statement),
            other => panic!("unexpected result: {:?}", other.err()),
        }
        let err = stmt.execute_sql("SELECT 1 FROM dual").unwrap_err();
        assert_eq!(err.binding_code(), binding_code::INVALID_HANDLE);
        assert_eq!(err.kind(), ErrorKind::Binding);
        assert_eq!(err.native_code(), 0);
    }

    #[test]
    fn test_invalid_connect_string() {
        let err = "/tiger@memdb".parse::<ConnectParams>().unwrap_err();
        assert!(matches!(err, Error::InvalidConnectString(_)));
    }

    #[test]
    fn test_invalid_credentials() {
        let (_client, env, _conn) = setup();
        let err = Connection::open(&env, &ConnectParams::new("memdb", "scott", "")).unwrap_err();
        assert!(err.is_native(ora::INVALID_USERNAME_PASSWORD));
        assert!(err.connection().is_none());
    }
}

mod interrupt_tests {
    use super::*;

    #[test]
    fn test_break_interrupts_running_call() {
        let (_client, _env, conn) = setup();
        let done = Arc::new(AtomicBool::new(false));

        let breaker = {
            let conn = conn.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(20));
                    let _ = conn.break_call();
                }
            })
        };

        let stmt = Statement::new(&conn).unwrap();
        let result = stmt.execute_sql("BEGIN DBMS_SESSION.SLEEP(10); END;");
        done.store(true, Ordering::Release);
        breaker.join().unwrap();

        let err = result.unwrap_err();
        assert!(err.is_native(ora::USER_REQUESTED_CANCEL));
        assert!(conn.ping().is_ok());
    }
}
