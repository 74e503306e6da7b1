//! Session pool tests

use std::sync::Arc;
use std::time::Duration;

use ocibind::constants::ora;
use ocibind::native::memory::MemoryClient;
use ocibind::{ConnectParams, Environment, EnvironmentConfig, Error, Pool, PoolConfig, Statement};

fn setup() -> (Arc<MemoryClient>, Environment) {
    let client = Arc::new(MemoryClient::new());
    let env = Environment::initialize(EnvironmentConfig::new(), client.clone()).unwrap();
    (client, env)
}

fn params() -> ConnectParams {
    ConnectParams::new("memdb", "scott", "tiger")
}

mod pool_tests {
    use super::*;

    #[test]
    fn test_pool_settings() {
        let (_client, env) = setup();
        let config = PoolConfig::new(1, 4, 2)
            .timeout(Duration::from_secs(60))
            .no_wait(true)
            .stmt_cache_size(5);
        let pool = Pool::create(&env, &params(), &config).unwrap();

        assert_eq!(pool.min().unwrap(), 1);
        assert_eq!(pool.max().unwrap(), 4);
        assert_eq!(pool.increment().unwrap(), 2);
        assert_eq!(pool.timeout().unwrap(), Duration::from_secs(60));
        assert!(pool.no_wait().unwrap());
        assert_eq!(pool.statement_cache_size().unwrap(), 5);
        assert_eq!(pool.open_count().unwrap(), 1);
        assert_eq!(pool.busy_count().unwrap(), 0);
    }

    #[test]
    fn test_busy_count_follows_connections() {
        let (_client, env) = setup();
        let pool = Pool::create(&env, &params(), &PoolConfig::new(1, 3, 1)).unwrap();

        let first = pool.connection(None).unwrap();
        let second = pool.connection(None).unwrap();
        assert_eq!(pool.busy_count().unwrap(), 2);
        assert!(pool.open_count().unwrap() >= 2);
        assert_eq!(first.user(), "scott");

        let stmt = Statement::new(&second).unwrap();
        stmt.execute_sql("SELECT 1 FROM dual").unwrap();

        drop(first);
        assert_eq!(pool.busy_count().unwrap(), 1);
        let clone = second.clone();
        drop(second);
        assert_eq!(pool.busy_count().unwrap(), 1);
        drop(clone);
        assert_eq!(pool.busy_count().unwrap(), 0);
        // returning the session closes its statements
        assert!(stmt.is_closed());
    }

    #[test]
    fn test_exhausted_pool() {
        let (_client, env) = setup();
        let pool = Pool::create(&env, &params(), &PoolConfig::new(0, 1, 1)).unwrap();
        let _held = pool.connection(None).unwrap();
        let err = pool.connection(None).unwrap_err();
        assert!(err.is_native(ora::POOL_EXHAUSTED));
    }

    #[test]
    fn test_invalid_bounds() {
        let (_client, env) = setup();
        let err = Pool::create(&env, &params(), &PoolConfig::new(5, 2, 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = Pool::create(&env, &params(), &PoolConfig::new(0, 0, 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_closing_pool_invalidates_sessions() {
        let (client, env) = setup();
        let pool = Pool::create(&env, &params(), &PoolConfig::new(1, 2, 1)).unwrap();
        let conn = pool.connection(None).unwrap();
        let stmt = Statement::new(&conn).unwrap();

        pool.close().unwrap();
        assert!(pool.is_closed());
        assert!(conn.is_closed());
        assert!(stmt.is_closed());
        assert!(pool.connection(None).unwrap_err().is_invalid_handle());
        assert_eq!(client.live_handles(), 0);

        drop((conn, stmt));
        assert_eq!(client.double_frees(), 0);
    }
}
