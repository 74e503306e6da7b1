//! LOB and object type tests
//!
//! Covers LOB and object values travelling through binds and result sets,
//! nested object attributes, REF columns and collections.

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::Bytes;
use ocibind::native::memory::MemoryClient;
use ocibind::native::{AttrDesc, CollectionDesc, DataType};
use ocibind::{
    Collection, ConnectParams, Connection, Environment, EnvironmentConfig, HandleState, Lob, LobKind,
    Object, Reference, Statement, TypeInfo, Value,
};

fn setup() -> (Environment, Connection) {
    let client = MemoryClient::new();
    client.define_type(
        "ADDRESS_T",
        vec![
            AttrDesc::new("STREET", DataType::Text),
            AttrDesc::new("CITY", DataType::Text),
        ],
    );
    client.define_type(
        "PERSON_T",
        vec![
            AttrDesc::new("NAME", DataType::Text),
            AttrDesc::new("AGE", DataType::Numeric),
            AttrDesc::object("ADDR", "ADDRESS_T"),
        ],
    );
    client.define_collection("PHONES_T", CollectionDesc::varray(4, AttrDesc::new("", DataType::Text)));
    client.define_collection(
        "ADDRESSES_T",
        CollectionDesc::nested_table(AttrDesc::object("", "ADDRESS_T")),
    );
    client.define_type(
        "CONTACT_T",
        vec![
            AttrDesc::new("NAME", DataType::Text),
            AttrDesc::collection("PHONES", "PHONES_T"),
        ],
    );
    let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(client)).unwrap();
    let conn = Connection::open(&env, &ConnectParams::new("memdb", "scott", "tiger")).unwrap();
    (env, conn)
}

mod lob_column_tests {
    use super::*;

    #[test]
    fn test_temporary_clob_bound_into_table() {
        let (_env, conn) = setup();
        conn.execute("CREATE TABLE notes (id NUMBER, body CLOB)").unwrap();

        let lob = Lob::temporary(&conn, LobKind::Clob).unwrap();
        lob.write("draft").unwrap();
        lob.append(" text").unwrap();

        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO notes VALUES (:id, :body)").unwrap();
        stmt.bind("id", 1).unwrap();
        stmt.bind("body", lob.clone()).unwrap();
        stmt.execute().unwrap();

        // the stored value is a copy of the temporary LOB
        lob.truncate(0).unwrap();
        assert_eq!(lob.length().unwrap(), 0);

        stmt.execute_sql("SELECT body FROM notes WHERE id = 1").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        let stored: Lob = rs.get(1).unwrap();
        assert_eq!(stored.kind(), LobKind::Clob);
        assert_eq!(stored.length().unwrap(), 10);
        assert_eq!(stored.read_string(5).unwrap(), "draft");
        assert_eq!(stored.offset(), 5);
        assert_eq!(stored.read_string(100).unwrap(), " text");
    }

    #[test]
    fn test_blob_column_from_bytes() {
        let (_env, conn) = setup();
        conn.execute("CREATE TABLE images (id NUMBER, data BLOB)").unwrap();

        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO images VALUES (:id, :data)").unwrap();
        stmt.bind("id", 1).unwrap();
        stmt.bind("data", vec![0xCAu8, 0xFE, 0xBA, 0xBE]).unwrap();
        stmt.execute().unwrap();

        stmt.execute_sql("SELECT data FROM images").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        let data: Vec<u8> = rs.get("DATA").unwrap();
        assert_eq!(data, vec![0xCA, 0xFE, 0xBA, 0xBE]);

        let lob: Lob = rs.get(1).unwrap();
        lob.seek(SeekFrom::Start(2)).unwrap();
        assert_eq!(lob.read_bytes(2).unwrap(), Bytes::from_static(&[0xBA, 0xBE]));
    }

    #[test]
    fn test_temporary_lob_freed_on_last_drop() {
        let (env, conn) = setup();
        let before = env.live_handles();
        let lob = Lob::temporary(&conn, LobKind::Blob).unwrap();
        let copy = lob.clone();
        assert_eq!(env.live_handles(), before + 1);
        drop(lob);
        assert!(copy.is_temporary().unwrap());
        drop(copy);
        assert_eq!(env.live_handles(), before);
    }
}

mod object_column_tests {
    use super::*;

    fn person(conn: &Connection, name: &str, age: i64) -> Object {
        let info = TypeInfo::describe(conn, "PERSON_T").unwrap();
        let person = Object::new(&info).unwrap();
        person.set("NAME", name).unwrap();
        person.set("AGE", age).unwrap();
        person
    }

    #[test]
    fn test_object_round_trip_through_table() {
        let (_env, conn) = setup();
        conn.execute("CREATE TABLE people (id NUMBER, p PERSON_T)").unwrap();

        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO people VALUES (:id, :p)").unwrap();
        stmt.bind("id", 1).unwrap();
        stmt.bind("p", person(&conn, "Ada", 36)).unwrap();
        stmt.execute().unwrap();

        stmt.execute_sql("SELECT p FROM people").unwrap();
        assert_eq!(
            stmt.resultset().unwrap().column(1).unwrap().type_name(),
            Some("PERSON_T")
        );
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        let fetched: Object = rs.get(1).unwrap();
        assert_eq!(fetched.type_info().name(), "PERSON_T");
        assert_eq!(fetched.handle().state(), HandleState::FetchedClean);
        assert_eq!(fetched.get_as::<String>("name").unwrap(), "Ada");
        assert_eq!(fetched.get_as::<i64>("AGE").unwrap(), 36);
        assert!(fetched.is_null("ADDR").unwrap());

        // fetched instances are copies
        fetched.set("AGE", 99).unwrap();
        assert_eq!(fetched.handle().state(), HandleState::FetchedDirty);
        stmt.execute_sql("SELECT p FROM people").unwrap();
        assert!(!fetched.handle().is_valid());
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get::<Object>(1).unwrap().get_as::<i64>("AGE").unwrap(), 36);
    }

    #[test]
    fn test_nested_object_attribute() {
        let (_env, conn) = setup();
        let addr_info = TypeInfo::describe(&conn, "ADDRESS_T").unwrap();
        let addr = Object::new(&addr_info).unwrap();
        addr.set("CITY", "London").unwrap();

        let ada = person(&conn, "Ada", 36);
        ada.set("ADDR", addr.clone()).unwrap();

        let nested: Object = ada.get_as("ADDR").unwrap();
        assert_eq!(nested.type_info(), &addr_info);
        assert_eq!(nested.handle().parent_id(), Some(ada.handle().id()));
        assert_eq!(nested.get_as::<String>("CITY").unwrap(), "London");

        nested.set("CITY", "Oslo").unwrap();
        let again: Object = ada.get_as("ADDR").unwrap();
        assert_eq!(again.get_as::<String>("CITY").unwrap(), "Oslo");
        // the bound instance was copied into the attribute
        assert_eq!(addr.get_as::<String>("CITY").unwrap(), "London");

        drop(ada);
        assert!(nested.get("CITY").unwrap_err().is_invalid_handle());
        assert!(again.get("CITY").unwrap_err().is_invalid_handle());
        assert!(addr.get("CITY").is_ok());
    }

    #[test]
    fn test_object_attribute_set_by_value() {
        let (env, conn) = setup();
        let addr_info = TypeInfo::describe(&conn, "ADDRESS_T").unwrap();
        let ada = person(&conn, "Ada", 36);
        let before = env.live_handles();

        let addr = Object::new(&addr_info).unwrap();
        addr.set("CITY", "Oslo").unwrap();
        ada.set("ADDR", addr).unwrap();

        // the moved instance is released once the attribute holds its copy
        assert_eq!(env.live_handles(), before);
        let nested: Object = ada.get_as("ADDR").unwrap();
        assert_eq!(nested.get_as::<String>("CITY").unwrap(), "Oslo");
    }

    #[test]
    fn test_object_of_wrong_type_rejected() {
        let (_env, conn) = setup();
        let ada = person(&conn, "Ada", 36);
        let bob = person(&conn, "Bob", 41);
        let err = ada.set("ADDR", bob).unwrap_err();
        assert!(err.is_native(ocibind::constants::ora::INCONSISTENT_DATATYPES));
        assert!(ada.is_null("ADDR").unwrap());
    }

    #[test]
    fn test_ref_column() {
        let (_env, conn) = setup();
        conn.execute("CREATE TABLE links (id NUMBER, r REF PERSON_T)").unwrap();
        let ada = person(&conn, "Ada", 36);
        let reference = ada.reference().unwrap();

        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO links VALUES (:id, :r)").unwrap();
        stmt.bind("id", 1).unwrap();
        stmt.bind("r", reference.clone()).unwrap();
        stmt.execute().unwrap();
        stmt.prepare("INSERT INTO links VALUES (2, :r)").unwrap();
        stmt.bind("r", Value::Null).unwrap();
        stmt.execute().unwrap();

        stmt.execute_sql("SELECT r FROM links ORDER BY id").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        let fetched: Reference = rs.get(1).unwrap();
        assert_eq!(fetched.to_hex().unwrap(), reference.to_hex().unwrap());
        let pinned = fetched.object().unwrap();
        assert_eq!(pinned.get_as::<String>("NAME").unwrap(), "Ada");

        assert!(rs.next().unwrap());
        assert!(rs.is_null(1).unwrap());
        assert!(!pinned.handle().is_valid());
    }
}

mod collection_tests {
    use super::*;

    fn phones(conn: &Connection, numbers: &[&str]) -> Collection {
        let phones = Collection::new(&TypeInfo::describe(conn, "PHONES_T").unwrap()).unwrap();
        for number in numbers {
            phones.append(*number).unwrap();
        }
        phones
    }

    #[test]
    fn test_collection_column_round_trip() {
        let (_env, conn) = setup();
        conn.execute("CREATE TABLE directory (id NUMBER, phones PHONES_T)").unwrap();

        let bound = phones(&conn, &["555-0100", "555-0199"]);
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO directory VALUES (:id, :phones)").unwrap();
        stmt.bind("id", 1).unwrap();
        stmt.bind("phones", bound.clone()).unwrap();
        stmt.execute().unwrap();

        // the stored value is a copy
        bound.trim(2).unwrap();

        stmt.execute_sql("SELECT phones FROM directory").unwrap();
        let rs = stmt.resultset().unwrap();
        assert_eq!(rs.column(1).unwrap().type_name(), Some("PHONES_T"));
        assert!(rs.next().unwrap());
        let fetched: Collection = rs.get(1).unwrap();
        assert_eq!(fetched.handle().state(), HandleState::FetchedClean);
        assert_eq!(fetched.handle().parent_id(), Some(rs.handle().id()));
        assert_eq!(fetched.count().unwrap(), 2);
        assert_eq!(fetched.get_as::<String>(1).unwrap(), "555-0199");

        assert!(!rs.next().unwrap());
        assert!(!fetched.handle().is_valid());
    }

    #[test]
    fn test_collection_object_attribute() {
        let (_env, conn) = setup();
        let contact = Object::new(&TypeInfo::describe(&conn, "CONTACT_T").unwrap()).unwrap();
        contact.set("NAME", "Ada").unwrap();
        assert!(contact.is_null("PHONES").unwrap());

        contact.set("PHONES", phones(&conn, &["555-0100"])).unwrap();
        let nested: Collection = contact.get_as("PHONES").unwrap();
        assert_eq!(nested.handle().parent_id(), Some(contact.handle().id()));
        nested.append("555-0142").unwrap();

        let again: Collection = contact.get_as("PHONES").unwrap();
        assert_eq!(again.count().unwrap(), 2);

        drop(contact);
        assert!(nested.count().unwrap_err().is_invalid_handle());
    }

    #[test]
    fn test_element_objects_invalidated_by_trim() {
        let (env, conn) = setup();
        let addr_info = TypeInfo::describe(&conn, "ADDRESS_T").unwrap();
        let addresses = Collection::new(&TypeInfo::describe(&conn, "ADDRESSES_T").unwrap()).unwrap();
        for city in ["London", "Oslo"] {
            let addr = Object::new(&addr_info).unwrap();
            addr.set("CITY", city).unwrap();
            addresses.append(addr).unwrap();
        }
        let before = env.live_handles();

        let first: Object = addresses.get_as(0).unwrap();
        let second: Object = addresses.get_as(1).unwrap();
        assert_eq!(first.handle().parent_id(), Some(addresses.handle().id()));
        assert_eq!(second.get_as::<String>("CITY").unwrap(), "Oslo");
        assert_eq!(env.live_handles(), before + 2);

        addresses.trim(1).unwrap();
        assert!(!first.handle().is_valid());
        assert!(second.get("CITY").unwrap_err().is_invalid_handle());
        assert_eq!(addresses.count().unwrap(), 1);
        assert_eq!(
            addresses.get_as::<Object>(0).unwrap().get_as::<String>("CITY").unwrap(),
            "London"
        );
    }

    #[test]
    fn test_collection_of_wrong_type_rejected() {
        let (_env, conn) = setup();
        conn.execute("CREATE TABLE directory (id NUMBER, phones PHONES_T)").unwrap();
        let addresses = Collection::new(&TypeInfo::describe(&conn, "ADDRESSES_T").unwrap()).unwrap();

        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO directory VALUES (1, :phones)").unwrap();
        stmt.bind("phones", addresses).unwrap();
        let err = stmt.execute().unwrap_err();
        assert!(err.is_native(ocibind::constants::ora::INCONSISTENT_DATATYPES));
    }
}
