//! Advanced queuing tests
//!
//! Messages travel through queues created on the in-memory client; the
//! dequeue side covers ordering, filters, browse mode and notifications.

use std::sync::{Arc, Mutex};

use ocibind::aq::{NEVER_EXPIRE, WAIT_FOREVER};
use ocibind::constants::ora;
use ocibind::native::memory::MemoryClient;
use ocibind::native::{AttrDesc, DataType};
use ocibind::{
    Agent, ConnectParams, Connection, Dequeue, DequeueMode, EnvMode, Enqueue, Environment,
    EnvironmentConfig, Error, Message, Navigation, Object, TypeInfo,
};

fn setup(mode: EnvMode) -> (Arc<MemoryClient>, Environment, Connection) {
    let client = Arc::new(MemoryClient::new());
    client.create_queue("JOBS");
    client.define_type(
        "JOB_T",
        vec![
            AttrDesc::new("CODE", DataType::Numeric),
            AttrDesc::new("NOTE", DataType::Text),
        ],
    );
    let env = Environment::initialize(EnvironmentConfig::new().mode(mode), client.clone()).unwrap();
    let conn = Connection::open(&env, &ConnectParams::new("memdb", "scott", "tiger")).unwrap();
    (client, env, conn)
}

fn raw_message(info: &TypeInfo, data: &[u8], priority: i32) -> Message {
    let msg = Message::new(info).unwrap();
    msg.set_raw(data).unwrap();
    msg.set_priority(priority).unwrap();
    msg
}

fn no_wait_dequeue(info: &TypeInfo) -> Dequeue {
    let dequeue = Dequeue::new(info, "JOBS").unwrap();
    dequeue.set_wait_time(0).unwrap();
    dequeue
}

mod enqueue_dequeue_tests {
    use super::*;

    #[test]
    fn test_raw_payload_round_trip() {
        let (client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let msg = raw_message(&info, b"payload", 0);
        assert!(msg.id().unwrap().is_empty());
        assert_eq!(msg.expiration().unwrap(), NEVER_EXPIRE);

        let enqueue = Enqueue::new(&info, "JOBS").unwrap();
        let id = enqueue.put(&msg).unwrap();
        assert_eq!(msg.id().unwrap(), id);
        assert!(msg.enqueue_time().unwrap().is_some());
        assert_eq!(client.queue_depth("JOBS"), Some(1));

        let dequeue = no_wait_dequeue(&info);
        let got = dequeue.get().unwrap().unwrap();
        assert_eq!(got.raw().unwrap(), Some(b"payload".to_vec()));
        assert_eq!(got.id_hex().unwrap(), msg.id_hex().unwrap());
        assert_eq!(client.queue_depth("JOBS"), Some(0));
    }

    #[test]
    fn test_empty_queue_returns_none() {
        let (_client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let dequeue = Dequeue::new(&info, "JOBS").unwrap();
        assert_eq!(dequeue.wait_time().unwrap(), WAIT_FOREVER);
        dequeue.set_wait_time(0).unwrap();
        assert!(dequeue.get().unwrap().is_none());
    }

    #[test]
    fn test_object_payload() {
        let (_client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "JOB_T").unwrap();
        let job = Object::new(&info).unwrap();
        job.set("CODE", 7).unwrap();
        job.set("NOTE", "rebuild index").unwrap();

        let msg = Message::new(&info).unwrap();
        msg.set_object(&job).unwrap();
        assert!(msg.set_raw(b"nope").is_err());
        Enqueue::new(&info, "JOBS").unwrap().put(&msg).unwrap();

        // a dequeued message lives as long as its dequeue
        let dequeue = no_wait_dequeue(&info);
        let got = dequeue.get().unwrap().unwrap();
        let payload = got.object().unwrap().unwrap();
        assert_eq!(payload.get_as::<i64>("CODE").unwrap(), 7);
        assert_eq!(payload.get_as::<String>("NOTE").unwrap(), "rebuild index");
        assert_eq!(payload.handle().parent_id(), Some(got.handle().id()));
    }

    #[test]
    fn test_payload_type_must_match_queue() {
        let (_client, _env, conn) = setup(EnvMode::DEFAULT);
        let raw = TypeInfo::describe(&conn, "RAW").unwrap();
        let job = TypeInfo::describe(&conn, "JOB_T").unwrap();
        let enqueue = Enqueue::new(&job, "JOBS").unwrap();
        let err = enqueue.put(&raw_message(&raw, b"x", 0)).unwrap_err();
        assert!(matches!(err, Error::NotCompatible(_)));
    }

    #[test]
    fn test_unknown_queue() {
        let (_client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let enqueue = Enqueue::new(&info, "MISSING").unwrap();
        let err = enqueue.put(&raw_message(&info, b"x", 0)).unwrap_err();
        assert!(err.is_native(ora::QUEUE_NOT_FOUND));
    }

    #[test]
    fn test_next_get_invalidates_previous_message() {
        let (_client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let enqueue = Enqueue::new(&info, "JOBS").unwrap();
        enqueue.put(&raw_message(&info, b"one", 0)).unwrap();
        enqueue.put(&raw_message(&info, b"two", 0)).unwrap();

        let dequeue = no_wait_dequeue(&info);
        let first = dequeue.get().unwrap().unwrap();
        let second = dequeue.get().unwrap().unwrap();
        assert!(!first.handle().is_valid());
        assert!(first.raw().unwrap_err().is_invalid_handle());
        assert_eq!(second.raw().unwrap(), Some(b"two".to_vec()));
    }
}

mod ordering_tests {
    use super::*;

    #[test]
    fn test_lower_priority_first() {
        let (_client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let enqueue = Enqueue::new(&info, "JOBS").unwrap();
        for (data, priority) in [(b"low", 5), (b"top", 1), (b"mid", 3)] {
            enqueue.put(&raw_message(&info, data, priority)).unwrap();
        }

        let dequeue = no_wait_dequeue(&info);
        let mut order = Vec::new();
        while let Some(msg) = dequeue.get().unwrap() {
            order.push((msg.raw().unwrap().unwrap(), msg.priority().unwrap()));
        }
        assert_eq!(
            order,
            vec![(b"top".to_vec(), 1), (b"mid".to_vec(), 3), (b"low".to_vec(), 5)]
        );
    }

    #[test]
    fn test_correlation_filter() {
        let (client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let enqueue = Enqueue::new(&info, "JOBS").unwrap();
        for (data, correlation) in [(&b"order"[..], "ORDER-1"), (&b"invoice"[..], "INVOICE-9")] {
            let msg = raw_message(&info, data, 0);
            msg.set_correlation(correlation).unwrap();
            enqueue.put(&msg).unwrap();
        }

        let dequeue = no_wait_dequeue(&info);
        dequeue.set_correlation("INV%").unwrap();
        let got = dequeue.get().unwrap().unwrap();
        assert_eq!(got.correlation().unwrap(), "INVOICE-9");
        assert!(dequeue.get().unwrap().is_none());
        assert_eq!(client.queue_depth("JOBS"), Some(1));
    }

    #[test]
    fn test_browse_leaves_messages_in_place() {
        let (client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let enqueue = Enqueue::new(&info, "JOBS").unwrap();
        enqueue.put(&raw_message(&info, b"a", 0)).unwrap();
        enqueue.put(&raw_message(&info, b"b", 0)).unwrap();

        let dequeue = no_wait_dequeue(&info);
        dequeue.set_mode(DequeueMode::Browse).unwrap();
        assert_eq!(dequeue.mode().unwrap(), DequeueMode::Browse);
        let seen: Vec<Vec<u8>> = std::iter::from_fn(|| dequeue.get().unwrap())
            .map(|msg| msg.raw().unwrap().unwrap())
            .collect();
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(client.queue_depth("JOBS"), Some(2));

        // starting over from the first message sees everything again
        dequeue.set_navigation(Navigation::FirstMessage).unwrap();
        let again = dequeue.get().unwrap().unwrap();
        assert_eq!(again.raw().unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn test_sender_agent() {
        let (_client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let agent = Agent::new(&conn, "PRODUCER", "JOBS").unwrap();
        let msg = raw_message(&info, b"from producer", 0);
        msg.set_sender(&agent).unwrap();
        Enqueue::new(&info, "JOBS").unwrap().put(&msg).unwrap();

        let dequeue = no_wait_dequeue(&info);
        let got = dequeue.get().unwrap().unwrap();
        let sender = got.sender().unwrap().unwrap();
        assert_eq!(sender.name().unwrap(), "PRODUCER");
        assert_eq!(sender.address().unwrap(), "JOBS");
        assert_eq!(sender.handle().parent_id(), Some(got.handle().id()));

        drop(dequeue);
        assert!(got.raw().unwrap_err().is_invalid_handle());
        assert!(sender.name().unwrap_err().is_invalid_handle());
    }
}

mod notification_tests {
    use super::*;

    #[test]
    fn test_subscribe_requires_events_mode() {
        let (_client, _env, conn) = setup(EnvMode::DEFAULT);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let dequeue = no_wait_dequeue(&info);
        let err = dequeue.subscribe(0, 0, |_| {}).unwrap_err();
        assert!(matches!(err, Error::NotAvailable(_)));
        assert!(!dequeue.is_subscribed());
    }

    #[test]
    fn test_handler_runs_for_enqueued_message() {
        let (_client, env, conn) = setup(EnvMode::EVENTS);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let dequeue = no_wait_dequeue(&info);
        let sink = Arc::clone(&received);
        dequeue
            .subscribe(0, 0, move |dequeue| {
                if let Ok(Some(msg)) = dequeue.get() {
                    if let Ok(Some(data)) = msg.raw() {
                        sink.lock().unwrap().push(data);
                    }
                }
            })
            .unwrap();
        assert!(dequeue.is_subscribed());

        Enqueue::new(&info, "JOBS").unwrap().put(&raw_message(&info, b"ping", 0)).unwrap();
        assert_eq!(env.dispatch_pending(), 1);
        assert_eq!(*received.lock().unwrap(), vec![b"ping".to_vec()]);

        dequeue.unsubscribe().unwrap();
        assert!(!dequeue.is_subscribed());
        Enqueue::new(&info, "JOBS").unwrap().put(&raw_message(&info, b"pong", 0)).unwrap();
        assert_eq!(env.dispatch_pending(), 0);
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_subscribe_to_missing_queue() {
        let (_client, env, conn) = setup(EnvMode::EVENTS);
        let info = TypeInfo::describe(&conn, "RAW").unwrap();
        let handlers = env.registered_handlers();
        let dequeue = Dequeue::new(&info, "MISSING").unwrap();
        let err = dequeue.subscribe(0, 0, |_| {}).unwrap_err();
        assert!(err.is_native(ora::QUEUE_NOT_FOUND));
        assert_eq!(env.registered_handlers(), handlers);
    }
}
