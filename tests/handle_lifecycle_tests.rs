//! Ownership chain tests
//!
//! Native resources must be released exactly once, children before their
//! parents, however the proxies are cloned, closed or dropped.

use std::sync::Arc;

use ocibind::native::memory::MemoryClient;
use ocibind::{
    ConnectParams, Connection, Environment, EnvironmentConfig, Error, HandleState, Lob, LobKind,
    Statement,
};

fn setup() -> (Arc<MemoryClient>, Environment, Connection) {
    let client = Arc::new(MemoryClient::new());
    let env = Environment::initialize(EnvironmentConfig::new(), client.clone()).unwrap();
    let conn = Connection::open(&env, &ConnectParams::new("memdb", "scott", "tiger")).unwrap();
    conn.execute("CREATE TABLE docs (id NUMBER PRIMARY KEY, body CLOB)").unwrap();
    (client, env, conn)
}

mod close_tests {
    use super::*;

    #[test]
    fn test_closing_connection_closes_children() {
        let (client, env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        let lob = Lob::temporary(&conn, LobKind::Clob).unwrap();
        stmt.execute_sql("SELECT id FROM docs").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(client.live_handles() >= 3);

        conn.close().unwrap();
        assert!(stmt.is_closed());
        assert!(!lob.handle().is_valid());
        assert_eq!(rs.handle().state(), HandleState::Released);
        assert!(matches!(
            stmt.execute_sql("SELECT id FROM docs"),
            Err(Error::InvalidHandle { .. })
        ));
        assert!(lob.length().unwrap_err().is_invalid_handle());

        assert_eq!(env.live_handles(), 0);
        assert_eq!(client.live_handles(), 0);
        assert_eq!(client.double_frees(), 0);
    }

    #[test]
    fn test_dropping_proxies_in_any_order() {
        let (client, env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        let lob = Lob::temporary(&conn, LobKind::Blob).unwrap();

        drop(conn);
        // children keep working only as long as their session is open
        assert!(stmt.is_closed());
        drop(lob);
        drop(stmt);

        assert_eq!(env.live_handles(), 0);
        assert_eq!(client.live_handles(), 0);
        assert_eq!(client.double_frees(), 0);
    }

    #[test]
    fn test_clones_share_one_native_resource() {
        let (client, env, conn) = setup();
        let before = client.live_handles();
        let stmt = Statement::new(&conn).unwrap();
        let copies: Vec<Statement> = (0..4).map(|_| stmt.clone()).collect();
        assert_eq!(stmt.handle().share_count(), 5);
        assert_eq!(client.live_handles(), before + 1);

        drop(stmt);
        assert!(!copies[0].is_closed());
        drop(copies);
        assert_eq!(client.live_handles(), before);
        assert_eq!(env.live_handles(), 1);
        assert_eq!(client.double_frees(), 0);
    }

    #[test]
    fn test_explicit_close_then_drop_releases_once() {
        let (client, _env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        let copy = stmt.clone();
        stmt.close().unwrap();
        assert!(copy.is_closed());
        assert!(copy.close().unwrap_err().is_invalid_handle());
        drop(stmt);
        drop(copy);
        assert_eq!(client.double_frees(), 0);
    }
}

mod fetched_tests {
    use super::*;

    fn insert_docs(conn: &Connection) {
        conn.execute("INSERT INTO docs VALUES (1, 'first body')").unwrap();
        conn.execute("INSERT INTO docs VALUES (2, 'second body')").unwrap();
    }

    #[test]
    fn test_fetched_lob_invalidated_by_next_row() {
        let (client, _env, conn) = setup();
        insert_docs(&conn);

        let stmt = Statement::new(&conn).unwrap();
        stmt.execute_sql("SELECT body FROM docs ORDER BY id").unwrap();
        let rs = stmt.resultset().unwrap();

        assert!(rs.next().unwrap());
        let first: Lob = rs.get(1).unwrap();
        assert_eq!(first.handle().state(), HandleState::FetchedClean);
        assert!(!first.is_temporary().unwrap());
        assert_eq!(first.read_string_all().unwrap(), "first body");

        assert!(rs.next().unwrap());
        assert!(!first.handle().is_valid());
        assert!(first.read_string_all().unwrap_err().is_invalid_handle());
        assert_eq!(rs.get::<String>(1).unwrap(), "second body");

        drop(first);
        drop(rs);
        stmt.close().unwrap();
        assert_eq!(client.double_frees(), 0);
    }

    #[test]
    fn test_written_fetched_lob_is_dirty() {
        let (_client, _env, conn) = setup();
        insert_docs(&conn);

        let stmt = Statement::new(&conn).unwrap();
        stmt.execute_sql("SELECT body FROM docs WHERE id = 1").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        let lob: Lob = rs.get("BODY").unwrap();
        lob.append(" appended").unwrap();
        assert_eq!(lob.handle().state(), HandleState::FetchedDirty);

        stmt.execute_sql("SELECT body FROM docs WHERE id = 1").unwrap();
        assert!(!lob.handle().is_valid());
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get::<String>(1).unwrap(), "first body appended");
    }

    #[test]
    fn test_fetched_parent_is_resultset() {
        let (_client, _env, conn) = setup();
        insert_docs(&conn);

        let stmt = Statement::new(&conn).unwrap();
        stmt.execute_sql("SELECT body FROM docs").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        let lob: Lob = rs.get(1).unwrap();
        assert_eq!(lob.handle().parent_id(), Some(rs.handle().id()));
        assert_eq!(rs.handle().parent_id(), Some(stmt.handle().id()));
        assert_eq!(stmt.handle().parent_id(), Some(conn.handle().id()));
        assert_eq!(conn.handle().parent_id(), None);
    }
}

mod environment_tests {
    use super::*;

    #[test]
    fn test_cleanup_releases_everything() {
        let (client, env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        let lob = Lob::temporary(&conn, LobKind::Clob).unwrap();
        let open = env.live_handles();
        assert!(open >= 3);

        assert_eq!(env.cleanup().unwrap(), open);
        assert!(!env.is_initialized());
        assert!(conn.is_closed());
        assert!(stmt.is_closed());
        assert!(!lob.handle().is_valid());
        assert_eq!(client.live_handles(), 0);

        assert!(matches!(
            Connection::open(&env, &ConnectParams::new("memdb", "scott", "tiger")),
            Err(Error::NotInitialized)
        ));
        drop((conn, stmt, lob));
        assert_eq!(client.double_frees(), 0);
    }

    #[test]
    fn test_dropping_environment_cleans_up() {
        let (client, env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        drop(env);
        assert!(conn.is_closed());
        assert!(stmt.is_closed());
        assert_eq!(client.live_handles(), 0);
        drop((conn, stmt));
        assert_eq!(client.double_frees(), 0);
    }

    #[test]
    fn test_missing_library_path() {
        let err = Environment::initialize(
            EnvironmentConfig::new().lib_path("/nonexistent/ocibind/lib"),
            Arc::new(MemoryClient::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EnvironmentCreation(_)));
    }

    #[test]
    fn test_connections_are_independent() {
        let (client, env, conn) = setup();
        let other = Connection::open(&env, &ConnectParams::new("memdb", "hr", "hr")).unwrap();
        conn.close().unwrap();
        assert!(!other.is_closed());
        assert!(other.ping().is_ok());
        drop(other);
        assert_eq!(client.live_handles(), 0);
    }
}
