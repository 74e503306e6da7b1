//! Notification tests
//!
//! Database change subscriptions, HA events and failover callbacks, with
//! notifications routed through the environment's event queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ocibind::native::memory::MemoryClient;
use ocibind::{
    ChangeTypes, ConnectParams, Connection, EnvMode, Environment, EnvironmentConfig, Error, Event,
    EventType, FailoverEvent, FailoverRequest, FailoverResult, HaEventType, HaSource, ObjectEvent,
    Subscription,
};

fn setup_with(config: EnvironmentConfig) -> (Arc<MemoryClient>, Environment, Connection) {
    let client = Arc::new(MemoryClient::new());
    let env = Environment::initialize(config, client.clone()).unwrap();
    let conn = Connection::open(&env, &ConnectParams::new("memdb", "scott", "tiger")).unwrap();
    conn.execute("CREATE TABLE t (id NUMBER PRIMARY KEY, name VARCHAR2(20))").unwrap();
    (client, env, conn)
}

fn setup() -> (Arc<MemoryClient>, Environment, Connection) {
    setup_with(EnvironmentConfig::new().mode(EnvMode::EVENTS))
}

type Seen = Arc<Mutex<Vec<(EventType, Option<ObjectEvent>, String, Option<String>, bool)>>>;

fn recording(conn: &Connection, types: ChangeTypes) -> (Subscription, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = Subscription::register(
        conn,
        "watch-t",
        types,
        move |event: &Event| {
            sink.lock().unwrap().push((
                event.kind(),
                event.object_event(),
                event.database().to_string(),
                event.object().map(str::to_string),
                event.rowid().is_some(),
            ));
        },
        0,
        0,
    )
    .unwrap();
    (subscription, seen)
}

mod change_tests {
    use super::*;

    #[test]
    fn test_requires_events_mode() {
        let (_client, env, conn) = setup_with(EnvironmentConfig::new());
        let err = Subscription::register(&conn, "watch-t", ChangeTypes::OBJECT, |_| {}, 0, 0).unwrap_err();
        assert!(matches!(err, Error::NotAvailable(_)));
        assert_eq!(env.registered_handlers(), 0);
    }

    #[test]
    fn test_commit_notifies_watched_table() {
        let (_client, env, conn) = setup();
        let (subscription, seen) = recording(&conn, ChangeTypes::OBJECT);
        assert_eq!(subscription.name(), "watch-t");
        subscription.watch("SELECT * FROM t").unwrap();

        conn.execute("INSERT INTO t VALUES (1, 'a')").unwrap();
        conn.execute("INSERT INTO t VALUES (2, 'b')").unwrap();
        // nothing is sent before commit
        assert_eq!(env.dispatch_pending(), 0);

        conn.commit().unwrap();
        assert_eq!(env.dispatch_pending(), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            (
                EventType::ObjectChanged,
                Some(ObjectEvent::Inserted),
                "memdb".to_string(),
                Some("SCOTT.T".to_string()),
                false
            )
        );
    }

    #[test]
    fn test_only_matching_subscription_is_invoked() {
        let (_client, env, conn) = setup();
        conn.execute("CREATE TABLE u (id NUMBER)").unwrap();

        let counter = |hits: &Arc<AtomicUsize>| {
            let hits = Arc::clone(hits);
            move |_: &Event| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        };
        let (t_hits, u_hits) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
        let on_t = Subscription::register(&conn, "watch-t", ChangeTypes::OBJECT, counter(&t_hits), 0, 0).unwrap();
        let on_u = Subscription::register(&conn, "watch-u", ChangeTypes::OBJECT, counter(&u_hits), 0, 0).unwrap();
        on_t.watch("SELECT * FROM t").unwrap();
        on_u.watch("SELECT * FROM u").unwrap();

        conn.execute("INSERT INTO u VALUES (1)").unwrap();
        conn.commit().unwrap();
        assert_eq!(env.dispatch_pending(), 1);
        assert_eq!(t_hits.load(Ordering::SeqCst), 0);
        assert_eq!(u_hits.load(Ordering::SeqCst), 1);

        conn.execute("INSERT INTO t VALUES (1, 'a')").unwrap();
        conn.commit().unwrap();
        assert_eq!(env.dispatch_pending(), 1);
        assert_eq!(t_hits.load(Ordering::SeqCst), 1);
        assert_eq!(u_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_row_level_changes_carry_rowids() {
        let (_client, env, conn) = setup();
        let (subscription, seen) = recording(&conn, ChangeTypes::ROWS);
        subscription.watch("SELECT id FROM t WHERE id > 0").unwrap();

        conn.execute("INSERT INTO t VALUES (1, 'a')").unwrap();
        conn.execute("INSERT INTO t VALUES (2, 'b')").unwrap();
        conn.commit().unwrap();

        assert_eq!(env.dispatch_pending(), 2);
        assert!(seen.lock().unwrap().iter().all(|event| event.4));
    }

    #[test]
    fn test_rolled_back_work_is_not_reported() {
        let (_client, env, conn) = setup();
        let (subscription, seen) = recording(&conn, ChangeTypes::OBJECT);
        subscription.watch("SELECT * FROM t").unwrap();

        conn.execute("INSERT INTO t VALUES (1, 'a')").unwrap();
        conn.rollback().unwrap();
        conn.commit().unwrap();
        assert_eq!(env.dispatch_pending(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_watch_rejects_unknown_table() {
        let (_client, _env, conn) = setup();
        let (subscription, _seen) = recording(&conn, ChangeTypes::OBJECT);
        let err = subscription.watch("SELECT * FROM missing").unwrap_err();
        assert!(err.is_native(ocibind::constants::ora::TABLE_NOT_FOUND));
    }

    #[test]
    fn test_database_event() {
        let (client, env, conn) = setup();
        let (subscription, seen) = recording(&conn, ChangeTypes::ALL);
        assert_eq!(client.fire_change_event(EventType::DatabaseShutdown, None, None, None), 1);
        assert_eq!(env.dispatch_pending(), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, EventType::DatabaseShutdown);
        assert_eq!(seen[0].2, "MEMDB");
        assert!(subscription.is_registered());
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let (client, env, conn) = setup();
        let (subscription, seen) = recording(&conn, ChangeTypes::ALL);
        let handlers = env.registered_handlers();

        client.fire_change_event(EventType::DatabaseStart, None, None, None);
        subscription.unregister().unwrap();
        assert!(!subscription.is_registered());
        assert_eq!(env.registered_handlers(), handlers - 1);

        // queued before unregistering, dropped at dispatch
        assert_eq!(env.dispatch_pending(), 0);
        assert_eq!(client.fire_change_event(EventType::DatabaseStart, None, None, None), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_closing_connection_unregisters() {
        let (client, env, conn) = setup();
        let (subscription, _seen) = recording(&conn, ChangeTypes::ALL);
        conn.close().unwrap();
        assert!(!subscription.is_registered());
        assert_eq!(env.registered_handlers(), 0);
        assert_eq!(client.fire_change_event(EventType::DatabaseDrop, None, None, None), 0);
    }

    #[test]
    fn test_full_queue_drops_events() {
        let (client, env, conn) =
            setup_with(EnvironmentConfig::new().mode(EnvMode::EVENTS).event_queue_capacity(1));
        let (_subscription, seen) = recording(&conn, ChangeTypes::ALL);

        client.fire_change_event(EventType::DatabaseStart, None, None, None);
        client.fire_change_event(EventType::DatabaseShutdown, None, None, None);
        assert_eq!(env.dropped_events(), 1);
        assert_eq!(env.dispatch_pending(), 1);
        assert_eq!(seen.lock().unwrap()[0].0, EventType::DatabaseStart);
    }

    #[tokio::test]
    async fn test_dispatch_next() {
        let (client, env, conn) = setup();
        let (_subscription, seen) = recording(&conn, ChangeTypes::ALL);
        client.fire_change_event(
            EventType::ObjectChanged,
            Some(ObjectEvent::Altered),
            Some("SCOTT.T"),
            None,
        );

        assert!(env.dispatch_next().await);
        assert_eq!(seen.lock().unwrap()[0].1, Some(ObjectEvent::Altered));

        env.cleanup().unwrap();
        assert!(!env.dispatch_next().await);
    }
}

mod ha_tests {
    use super::*;

    #[test]
    fn test_ha_handler_receives_connection() {
        let (client, env, conn) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        env.set_ha_handler(move |event| {
            sink.lock().unwrap().push((
                event.source(),
                event.event_type(),
                event.connection().map(|c| c.user().to_string()),
            ));
        })
        .unwrap();

        assert_eq!(client.raise_ha_event(HaSource::Instance, HaEventType::Down), 1);
        assert_eq!(env.dispatch_pending(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(HaSource::Instance, HaEventType::Down, Some("scott".to_string()))]
        );

        env.clear_ha_handler().unwrap();
        assert_eq!(client.raise_ha_event(HaSource::Instance, HaEventType::Up), 0);
        drop(conn);
    }

    #[test]
    fn test_ha_handler_requires_events_mode() {
        let (_client, env, _conn) = setup_with(EnvironmentConfig::new());
        assert!(matches!(env.set_ha_handler(|_| {}), Err(Error::NotAvailable(_))));
    }
}

mod failover_tests {
    use super::*;

    fn recording_handler(conn: &Connection, retry: bool) -> Arc<Mutex<Vec<FailoverEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conn.set_failover_handler(move |conn, request, event| {
            assert_eq!(conn.user(), "scott");
            assert_eq!(request, FailoverRequest::Select);
            sink.lock().unwrap().push(event);
            match (event, retry) {
                (FailoverEvent::Error, true) => FailoverResult::Retry,
                _ => FailoverResult::Ok,
            }
        })
        .unwrap();
        seen
    }

    #[test]
    fn test_retry_until_failover_ends() {
        let (client, _env, conn) = setup();
        let seen = recording_handler(&conn, true);

        let outcome = client.trigger_failover(FailoverRequest::Select, 2);
        assert_eq!(outcome, vec![FailoverEvent::End]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                FailoverEvent::Begin,
                FailoverEvent::Error,
                FailoverEvent::Error,
                FailoverEvent::End
            ]
        );
    }

    #[test]
    fn test_giving_up_aborts() {
        let (client, _env, conn) = setup();
        let seen = recording_handler(&conn, false);

        let outcome = client.trigger_failover(FailoverRequest::Select, 3);
        assert_eq!(outcome, vec![FailoverEvent::Abort]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![FailoverEvent::Begin, FailoverEvent::Error, FailoverEvent::Abort]
        );
    }

    #[test]
    fn test_cleared_handler() {
        let (client, _env, conn) = setup();
        let seen = recording_handler(&conn, true);
        conn.clear_failover_handler().unwrap();
        assert!(client.trigger_failover(FailoverRequest::Session, 1).is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }
}
