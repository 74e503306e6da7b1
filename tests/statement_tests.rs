//! Statement execution tests
//!
//! These run SQL through the in-memory client and check binds, result sets,
//! array DML, RETURNING INTO, PL/SQL out binds, scrollable cursors and
//! server output end to end.

use std::sync::Arc;

use ocibind::constants::ora;
use ocibind::native::memory::MemoryClient;
use ocibind::{
    BindDirection, ConnectParams, Connection, Environment, EnvironmentConfig, Error, FetchMode, SeekMode,
    Statement, StatementType, Value,
};

fn setup() -> (Environment, Connection) {
    let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(MemoryClient::new())).unwrap();
    let conn = Connection::open(&env, &ConnectParams::new("memdb", "scott", "tiger")).unwrap();
    conn.execute(
        "CREATE TABLE emp (id NUMBER(6) PRIMARY KEY, name VARCHAR2(20) NOT NULL, salary NUMBER(8,2))",
    )
    .unwrap();
    (env, conn)
}

fn insert(conn: &Connection, id: i64, name: &str, salary: f64) {
    let stmt = Statement::new(conn).unwrap();
    stmt.prepare("INSERT INTO emp (id, name, salary) VALUES (:id, :name, :salary)")
        .unwrap();
    stmt.bind("id", id).unwrap();
    stmt.bind("name", name).unwrap();
    stmt.bind("salary", salary).unwrap();
    stmt.execute().unwrap();
}

mod bind_tests {
    use super::*;

    #[test]
    fn test_named_binds_and_query() {
        let (_env, conn) = setup();
        insert(&conn, 1, "KING", 5000.0);
        insert(&conn, 2, "BLAKE", 2850.0);

        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("SELECT id, name, salary FROM emp WHERE id = :id").unwrap();
        stmt.bind(":ID", 2).unwrap();
        stmt.execute().unwrap();

        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get::<i64>(1).unwrap(), 2);
        assert_eq!(rs.get::<String>("name").unwrap(), "BLAKE");
        assert_eq!(rs.get::<f64>("SALARY").unwrap(), 2850.0);
        assert!(!rs.next().unwrap());
        assert!(rs.is_exhausted());
    }

    #[test]
    fn test_bind_unknown_placeholder() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("SELECT name FROM emp WHERE id = :id").unwrap();
        assert!(matches!(stmt.bind("missing", 1), Err(Error::BindNotFound(_))));
    }

    #[test]
    fn test_bind_before_prepare() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        assert!(matches!(stmt.bind("id", 1), Err(Error::StatementState(_))));
        assert!(matches!(stmt.execute(), Err(Error::StatementState(_))));
    }

    #[test]
    fn test_missing_bind_is_native_error() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO emp (id, name) VALUES (:id, :name)").unwrap();
        stmt.bind("id", 7).unwrap();
        let err = stmt.execute().unwrap_err();
        assert!(err.is_native(ora::NOT_ALL_VARIABLES_BOUND));
    }

    #[test]
    fn test_bind_info_reports_direction() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("BEGIN :a := :b * 2; END;").unwrap();
        stmt.bind_out("a").unwrap();

        let info = stmt.bind_info();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, "A");
        assert_eq!(info[0].direction, Some(BindDirection::Out));
        assert_eq!(info[1].direction, None);
    }
}

mod resultset_tests {
    use super::*;

    #[test]
    fn test_order_by_and_row_snapshot() {
        let (_env, conn) = setup();
        insert(&conn, 1, "KING", 5000.0);
        insert(&conn, 2, "BLAKE", 2850.0);
        insert(&conn, 3, "CLARK", 2450.0);

        let stmt = Statement::new(&conn).unwrap();
        stmt.execute_sql("SELECT name FROM emp ORDER BY salary DESC").unwrap();
        let rs = stmt.resultset().unwrap();
        let names: Vec<String> = rs
            .rows()
            .unwrap()
            .iter()
            .map(|row| row.get::<String>(1).unwrap())
            .collect();
        assert_eq!(names, vec!["KING", "BLAKE", "CLARK"]);
        assert_eq!(rs.current_row(), 3);
        assert_eq!(stmt.affected_rows().unwrap(), 3);
    }

    #[test]
    fn test_column_metadata() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.execute_sql("SELECT id, name AS ename FROM emp").unwrap();
        let rs = stmt.resultset().unwrap();

        assert_eq!(rs.column_count(), 2);
        assert_eq!(rs.column(1).unwrap().name(), "ID");
        assert_eq!(rs.column(2).unwrap().name(), "ENAME");
        assert_eq!(rs.column_index("ename").unwrap(), 2);
        assert!(matches!(rs.column(0), Err(Error::OutOfBounds { .. })));
        assert!(matches!(rs.column(3), Err(Error::OutOfBounds { .. })));
        assert!(matches!(rs.column_index("salary"), Err(Error::ColumnNotFound(_))));
    }

    #[test]
    fn test_null_values_and_count() {
        let (_env, conn) = setup();
        conn.execute("INSERT INTO emp (id, name) VALUES (10, 'SMITH')").unwrap();

        let stmt = Statement::new(&conn).unwrap();
        stmt.execute_sql("SELECT salary FROM emp WHERE salary IS NULL").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        assert!(rs.is_null(1).unwrap());
        assert_eq!(rs.value(1).unwrap(), Value::Null);

        stmt.execute_sql("SELECT COUNT(*) FROM emp").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get::<i64>(1).unwrap(), 1);
    }

    #[test]
    fn test_reexecute_invalidates_previous_resultset() {
        let (_env, conn) = setup();
        insert(&conn, 1, "KING", 5000.0);

        let stmt = Statement::new(&conn).unwrap();
        stmt.execute_sql("SELECT name FROM emp").unwrap();
        let first = stmt.resultset().unwrap();

        stmt.execute_sql("SELECT id FROM emp").unwrap();
        assert!(first.next().unwrap_err().is_invalid_handle());
        assert!(stmt.resultset().unwrap().next().unwrap());
    }

    #[test]
    fn test_resultset_of_non_query() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.execute_sql("INSERT INTO emp (id, name) VALUES (1, 'KING')").unwrap();
        assert!(matches!(stmt.resultset(), Err(Error::StatementState(_))));
        assert_eq!(stmt.affected_rows().unwrap(), 1);
    }

    #[test]
    fn test_select_from_dual() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.execute_sql("SELECT 6 * 7 AS answer FROM dual").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get::<i64>("ANSWER").unwrap(), 42);
    }
}

mod array_dml_tests {
    use super::*;

    #[test]
    fn test_array_insert() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO emp (id, name) VALUES (:id, :name)").unwrap();
        stmt.bind_array("id", vec![1, 2, 3]).unwrap();
        stmt.bind_array("name", vec!["A", "B", "C"]).unwrap();
        assert_eq!(stmt.bind_array_size(), 3);
        stmt.execute().unwrap();
        assert_eq!(stmt.affected_rows().unwrap(), 3);
    }

    #[test]
    fn test_empty_bind_array_rejected() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO emp (id, name) VALUES (:id, :name)").unwrap();
        assert!(matches!(
            stmt.bind_array::<i64>("id", Vec::new()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_array_insert_stops_at_failing_row() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO emp (id, name) VALUES (:id, :name)").unwrap();
        stmt.bind_array("id", vec![1, 1, 2]).unwrap();
        stmt.bind_array("name", vec!["A", "B", "C"]).unwrap();

        let err = stmt.execute().unwrap_err();
        assert!(err.is_native(ora::UNIQUE_CONSTRAINT));
        assert_eq!(err.row(), Some(2));
        assert_eq!(stmt.affected_rows().unwrap(), 1);
    }

    #[test]
    fn test_batch_errors_collects_failures() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.set_batch_errors(true);
        stmt.prepare("INSERT INTO emp (id, name) VALUES (:id, :name)").unwrap();
        stmt.bind_array("id", vec![1, 1, 2, 3]).unwrap();
        stmt.bind_array("name", vec![Value::from("A"), Value::from("B"), Value::Null, Value::from("D")])
            .unwrap();
        stmt.execute().unwrap();

        assert_eq!(stmt.affected_rows().unwrap(), 2);
        let errors = stmt.batch_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].row, 2);
        assert_eq!(errors[0].code, ora::UNIQUE_CONSTRAINT);
        assert_eq!(errors[1].row, 3);
        assert_eq!(errors[1].code, ora::CANNOT_INSERT_NULL);
    }
}

mod scroll_tests {
    use super::*;

    fn scrollable(conn: &Connection) -> Statement {
        for (id, name) in [(1, "KING"), (2, "BLAKE"), (3, "CLARK"), (4, "JONES")] {
            insert(conn, id, name, 1000.0);
        }
        let stmt = Statement::new(conn).unwrap();
        stmt.set_fetch_mode(FetchMode::Scrollable);
        stmt.execute_sql("SELECT name FROM emp ORDER BY id").unwrap();
        stmt
    }

    #[test]
    fn test_move_in_both_directions() {
        let (_env, conn) = setup();
        let stmt = scrollable(&conn);
        let rs = stmt.resultset().unwrap();
        assert!(rs.is_scrollable());

        assert!(rs.last().unwrap());
        assert_eq!(rs.current_row(), 4);
        assert_eq!(rs.get::<String>(1).unwrap(), "JONES");

        assert!(rs.prev().unwrap());
        assert_eq!(rs.get::<String>(1).unwrap(), "CLARK");

        assert!(rs.first().unwrap());
        assert_eq!(rs.get::<String>(1).unwrap(), "KING");
        assert!(!rs.prev().unwrap());
        assert_eq!(rs.current_row(), 0);
        assert!(!rs.is_exhausted());

        // before the first row, next starts over
        assert!(rs.next().unwrap());
        assert_eq!(rs.get::<String>(1).unwrap(), "KING");
    }

    #[test]
    fn test_seek_absolute_and_relative() {
        let (_env, conn) = setup();
        let stmt = scrollable(&conn);
        let rs = stmt.resultset().unwrap();

        assert!(rs.seek(SeekMode::Absolute, 3).unwrap());
        assert_eq!(rs.get::<String>(1).unwrap(), "CLARK");
        assert!(rs.seek(SeekMode::Relative, -2).unwrap());
        assert_eq!(rs.get::<String>(1).unwrap(), "KING");

        assert!(!rs.seek(SeekMode::Relative, 10).unwrap());
        assert!(rs.is_exhausted());
        assert_eq!(rs.current_row(), 5);
        assert!(matches!(rs.value(1), Err(Error::StatementState(_))));

        assert!(rs.seek(SeekMode::Absolute, 2).unwrap());
        assert!(!rs.is_exhausted());
        assert_eq!(rs.get::<String>(1).unwrap(), "BLAKE");
    }

    #[test]
    fn test_forward_only_cursor_rejects_scrolling() {
        let (_env, conn) = setup();
        insert(&conn, 1, "KING", 5000.0);
        let stmt = Statement::new(&conn).unwrap();
        assert_eq!(stmt.fetch_mode(), FetchMode::Forward);
        stmt.execute_sql("SELECT name FROM emp").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(!rs.is_scrollable());
        assert!(rs.next().unwrap());
        assert!(matches!(rs.prev(), Err(Error::StatementState(_))));
        assert!(matches!(rs.seek(SeekMode::Absolute, 1), Err(Error::StatementState(_))));
    }
}

mod server_output_tests {
    use super::*;

    #[test]
    fn test_lines_read_in_order() {
        let (_env, conn) = setup();
        conn.enable_server_output(None).unwrap();
        assert!(conn.is_server_output_enabled());

        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("BEGIN DBMS_OUTPUT.PUT_LINE('starting'); DBMS_OUTPUT.PUT_LINE(:msg); END;")
            .unwrap();
        stmt.bind("msg", "done").unwrap();
        stmt.execute().unwrap();

        assert_eq!(conn.server_output().unwrap().as_deref(), Some("starting"));
        assert_eq!(conn.server_output_lines().unwrap(), vec!["done"]);
        assert_eq!(conn.server_output().unwrap(), None);
    }

    #[test]
    fn test_disabled_output_is_discarded() {
        let (_env, conn) = setup();
        conn.execute("BEGIN DBMS_OUTPUT.PUT_LINE('lost'); END;").unwrap();
        assert_eq!(conn.server_output().unwrap(), None);

        conn.enable_server_output(Some(1000)).unwrap();
        conn.execute("BEGIN DBMS_OUTPUT.PUT_LINE('kept'); END;").unwrap();
        conn.disable_server_output().unwrap();
        assert!(!conn.is_server_output_enabled());
        assert!(conn.server_output_lines().unwrap().is_empty());
    }

    #[test]
    fn test_buffer_overflow() {
        let (_env, conn) = setup();
        conn.enable_server_output(Some(10)).unwrap();
        conn.execute("BEGIN DBMS_OUTPUT.PUT_LINE('12345678'); END;").unwrap();
        let err = conn
            .execute("BEGIN DBMS_OUTPUT.PUT_LINE('12345678'); END;")
            .unwrap_err();
        assert!(err.is_native(ora::SERVER_OUTPUT_OVERFLOW));

        // reading frees space
        assert_eq!(conn.server_output_lines().unwrap(), vec!["12345678"]);
        conn.execute("BEGIN DBMS_OUTPUT.PUT_LINE('12345678'); END;").unwrap();
    }
}

mod out_bind_tests {
    use super::*;

    #[test]
    fn test_plsql_out_bind() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("BEGIN :a := :b * 2; END;").unwrap();
        assert!(stmt.is_plsql());
        stmt.bind_out("a").unwrap();
        stmt.bind("b", 21).unwrap();
        assert!(matches!(stmt.out_value("a"), Err(Error::StatementState(_))));

        stmt.execute().unwrap();
        assert_eq!(stmt.out_value_as::<i64>("a").unwrap(), 42);
        assert!(matches!(stmt.out_value("c"), Err(Error::BindNotFound(_))));
    }

    #[test]
    fn test_returning_into() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO emp (id, name) VALUES (:id, :name) RETURNING name INTO :out")
            .unwrap();
        assert!(stmt.is_dml());
        assert!(stmt.is_returning());
        stmt.bind("id", 5).unwrap();
        stmt.bind("name", "WARD").unwrap();
        stmt.bind_out("out").unwrap();
        stmt.execute().unwrap();
        assert_eq!(stmt.out_value_as::<String>(":out").unwrap(), "WARD");
    }

    #[test]
    fn test_raise_application_error() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        let err = stmt
            .execute_sql("BEGIN RAISE_APPLICATION_ERROR(-20001, 'salary too high'); END;")
            .unwrap_err();
        assert!(err.is_native(20001));
        assert!(err.to_string().contains("salary too high"));
    }
}

mod transaction_tests {
    use super::*;

    fn count(conn: &Connection) -> i64 {
        let stmt = Statement::new(conn).unwrap();
        stmt.execute_sql("SELECT COUNT(*) FROM emp").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        rs.get(1).unwrap()
    }

    #[test]
    fn test_rollback_discards_work() {
        let (_env, conn) = setup();
        insert(&conn, 1, "KING", 5000.0);
        conn.commit().unwrap();
        insert(&conn, 2, "BLAKE", 2850.0);
        assert_eq!(count(&conn), 2);
        conn.rollback().unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_transaction_scope_rolls_back_on_drop() {
        let (_env, conn) = setup();
        {
            let _tx = conn.transaction().unwrap();
            insert(&conn, 1, "KING", 5000.0);
        }
        assert_eq!(count(&conn), 0);

        let tx = conn.transaction().unwrap();
        insert(&conn, 2, "BLAKE", 2850.0);
        tx.commit().unwrap();
        conn.rollback().unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_auto_commit() {
        let (_env, conn) = setup();
        conn.set_auto_commit(true);
        insert(&conn, 1, "KING", 5000.0);
        conn.rollback().unwrap();
        assert_eq!(count(&conn), 1);
    }
}

mod statement_type_tests {
    use super::*;

    #[test]
    fn test_statement_types() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        assert_eq!(stmt.statement_type(), StatementType::default());

        stmt.prepare("select * from emp").unwrap();
        assert!(stmt.is_query());
        stmt.prepare("UPDATE emp SET name = 'X'").unwrap();
        assert!(stmt.is_dml());
        stmt.prepare("DROP TABLE emp").unwrap();
        assert!(stmt.is_ddl());
        assert_eq!(stmt.sql().as_deref(), Some("DROP TABLE emp"));
    }
}

mod round_trip_tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
    use ocibind::Interval;

    #[test]
    fn test_insert_commit_select() {
        let (_env, conn) = setup();
        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO emp (id, name) VALUES (7, :name)").unwrap();
        stmt.bind("name", "CLARK").unwrap();
        stmt.execute().unwrap();
        assert_eq!(stmt.affected_rows().unwrap(), 1);
        conn.commit().unwrap();

        stmt.execute_sql("SELECT name FROM emp WHERE id = 7").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get::<String>(1).unwrap(), "CLARK");
    }

    #[test]
    fn test_scalar_and_datetime_values() {
        let (_env, conn) = setup();
        conn.execute(
            "CREATE TABLE kinds (s VARCHAR2(40), n NUMBER, f BINARY_DOUBLE, r RAW(16), b BOOLEAN, \
             d DATE, ts TIMESTAMP, tz TIMESTAMP WITH TIME ZONE, \
             ds INTERVAL DAY TO SECOND, ym INTERVAL YEAR TO MONTH)",
        )
        .unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let timestamp: NaiveDateTime = date.and_hms_nano_opt(13, 45, 10, 123_456_789).unwrap();
        let with_zone = DateTime::<FixedOffset>::parse_from_rfc3339("2024-02-29T13:45:10+02:00").unwrap();
        let day_second = Interval::day_second(1, 2, 3, 4, 500_000_000);
        let year_month = Interval::year_month(2, 3);

        let stmt = Statement::new(&conn).unwrap();
        stmt.prepare("INSERT INTO kinds VALUES (:s, :n, :f, :r, :b, :d, :ts, :tz, :ds, :ym)")
            .unwrap();
        stmt.bind("s", "héllo wörld").unwrap();
        stmt.bind("n", -42i64).unwrap();
        stmt.bind("f", 2.5f64).unwrap();
        stmt.bind("r", vec![0x01u8, 0x02, 0xFF]).unwrap();
        stmt.bind("b", true).unwrap();
        stmt.bind("d", date).unwrap();
        stmt.bind("ts", timestamp).unwrap();
        stmt.bind("tz", with_zone).unwrap();
        stmt.bind("ds", day_second).unwrap();
        stmt.bind("ym", year_month).unwrap();
        stmt.execute().unwrap();

        stmt.execute_sql("SELECT s, n, f, r, b, d, ts, tz, ds, ym FROM kinds").unwrap();
        let rs = stmt.resultset().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get::<String>("S").unwrap(), "héllo wörld");
        assert_eq!(rs.get::<i64>("N").unwrap(), -42);
        assert_eq!(rs.get::<f64>("F").unwrap(), 2.5);
        assert_eq!(rs.get::<Vec<u8>>("R").unwrap(), vec![0x01, 0x02, 0xFF]);
        assert!(rs.get::<bool>("B").unwrap());
        assert_eq!(rs.get::<NaiveDateTime>("D").unwrap(), date.and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(rs.get::<NaiveDateTime>("TS").unwrap(), timestamp);
        assert_eq!(rs.get::<DateTime<FixedOffset>>("TZ").unwrap(), with_zone);
        assert_eq!(rs.get::<Interval>("DS").unwrap(), day_second);
        assert_eq!(rs.get::<Interval>("YM").unwrap(), year_month);
    }
}
