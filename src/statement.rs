//! SQL statement handling
//!
//! A [`Statement`] is a proxy for a native statement handle. It is a child of
//! the connection it was created on: closing the connection invalidates it.
//! The SQL text is parsed on the client to classify the statement and to
//! learn its placeholder names, so bind errors are reported before any
//! native call is made.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::connection::{Connection, SessionRef};
use crate::constants::MAX_BIND_NAME_LENGTH;
use crate::environment::EnvShared;
use crate::error::{Error, Result};
use crate::handle::{release_fn, Handle, HandleId, NewEntry};
use crate::native::{Attr, AttrValue, BindDirection, ColumnDesc, Datum, ExecMode, HandleKind, RawHandle};
use crate::resultset::{Column, Resultset};
use crate::row::{FetchScope, FromValue, Value};
use crate::status::{check, CallContext};

/// Statement type determined by parsing the SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementType {
    /// Unknown or unparsed statement
    #[default]
    Unknown,
    /// SELECT query
    Query,
    /// DML: INSERT, UPDATE, DELETE, MERGE
    Dml,
    /// DDL: CREATE, ALTER, DROP, etc.
    Ddl,
    /// PL/SQL block: BEGIN, DECLARE, CALL
    PlSql,
}

/// How the result set of a query can be navigated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Rows are fetched once, in order
    #[default]
    Forward,
    /// The cursor can move backwards and jump to any row
    Scrollable,
}

/// Metadata for a bind placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindInfo {
    /// Placeholder name (without leading colon)
    pub name: String,
    /// Whether this is a RETURNING INTO bind
    pub is_return_bind: bool,
    /// Direction of the bound value, `None` while unbound
    pub direction: Option<BindDirection>,
    /// Number of values bound for array execution, `None` for scalars
    pub array_size: Option<u32>,
}

impl BindInfo {
    /// Create an unbound placeholder with the given name
    pub fn new(name: impl Into<String>, is_return_bind: bool) -> Self {
        Self {
            name: name.into(),
            is_return_bind,
            direction: None,
            array_size: None,
        }
    }
}

/// One row rejected by a batch-errors execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// 1-based index of the rejected row
    pub row: u32,
    /// Native error code
    pub code: i32,
    /// Error message
    pub message: String,
}

/// Client-side view of a SQL text
#[derive(Debug, Clone)]
pub(crate) struct ParsedSql {
    sql: String,
    statement_type: StatementType,
    binds: Vec<BindInfo>,
    is_returning: bool,
}

impl ParsedSql {
    /// Parse the SQL to determine statement type and extract bind names
    pub(crate) fn parse(sql: &str) -> Self {
        let mut parsed = Self {
            sql: sql.to_string(),
            statement_type: StatementType::Unknown,
            binds: Vec::new(),
            is_returning: false,
        };

        let sql_upper = sql.to_uppercase();
        if let Some(first_word) = sql_upper.split_whitespace().next() {
            parsed.statement_type = match first_word {
                "SELECT" | "WITH" => StatementType::Query,
                "INSERT" | "UPDATE" | "DELETE" | "MERGE" => StatementType::Dml,
                "CREATE" | "ALTER" | "DROP" | "GRANT" | "REVOKE" | "ANALYZE" | "AUDIT"
                | "COMMENT" | "TRUNCATE" => StatementType::Ddl,
                "DECLARE" | "BEGIN" | "CALL" => StatementType::PlSql,
                _ => StatementType::Unknown,
            };
        }

        // DDL has no binds
        if parsed.statement_type != StatementType::Ddl {
            parsed.parse_bind_variables();
        }
        parsed
    }

    fn parse_bind_variables(&mut self) {
        let chars: Vec<char> = self.sql.chars().collect();
        let chars_upper: Vec<char> = self.sql.to_uppercase().chars().collect();
        let len = chars.len();

        let mut i = 0;
        let mut in_string = false;
        let mut in_comment = false;
        let mut in_line_comment = false;
        let mut returning_found = false;
        let mut into_found = false;

        while i < len {
            let ch = chars[i];

            if ch == '\'' && !in_comment && !in_line_comment {
                in_string = !in_string;
                i += 1;
                continue;
            }
            if in_string {
                i += 1;
                continue;
            }

            if !in_comment && ch == '-' && i + 1 < len && chars[i + 1] == '-' {
                in_line_comment = true;
                i += 2;
                continue;
            }
            if in_line_comment {
                if ch == '\n' {
                    in_line_comment = false;
                }
                i += 1;
                continue;
            }

            if ch == '/' && i + 1 < len && chars[i + 1] == '*' {
                in_comment = true;
                i += 2;
                continue;
            }
            if in_comment {
                if ch == '*' && i + 1 < len && chars[i + 1] == '/' {
                    in_comment = false;
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }

            if self.statement_type == StatementType::Dml
                && !returning_found
                && match_keyword(&chars_upper, i, "RETURNING")
            {
                returning_found = true;
                i += 9;
                continue;
            }

            if returning_found && !into_found && match_keyword(&chars_upper, i, "INTO") {
                into_found = true;
                self.is_returning = true;
                i += 4;
                continue;
            }

            // `:=` is PL/SQL assignment, not a placeholder
            if ch == ':' && i + 1 < len && chars[i + 1] != '=' {
                let (bind_name, consumed) = extract_bind_name(&chars, i + 1);
                if !bind_name.is_empty() {
                    // PL/SQL binds by name, SQL by position
                    let should_add = self.statement_type != StatementType::PlSql
                        || !self.binds.iter().any(|b| b.name == bind_name);
                    if should_add {
                        self.binds.push(BindInfo::new(bind_name, into_found));
                    }
                    i += 1 + consumed;
                    continue;
                }
            }

            i += 1;
        }
    }

    fn has_bind(&self, name: &str) -> bool {
        self.binds.iter().any(|b| b.name == name)
    }
}

/// Check if keyword matches at position
fn match_keyword(chars: &[char], pos: usize, keyword: &str) -> bool {
    let keyword_len = keyword.chars().count();
    if pos + keyword_len > chars.len() {
        return false;
    }
    if pos > 0 && (chars[pos - 1].is_alphanumeric() || chars[pos - 1] == '_') {
        return false;
    }
    if !keyword
        .chars()
        .enumerate()
        .all(|(offset, kc)| chars[pos + offset] == kc)
    {
        return false;
    }
    let end_pos = pos + keyword_len;
    !(end_pos < chars.len() && (chars[end_pos].is_alphanumeric() || chars[end_pos] == '_'))
}

/// Extract a bind name starting at `start`, returning it with the number of
/// characters consumed
fn extract_bind_name(chars: &[char], start: usize) -> (String, usize) {
    let len = chars.len();
    let mut i = start;
    while i < len && chars[i].is_whitespace() {
        i += 1;
    }
    if i >= len {
        return (String::new(), 0);
    }

    let first_char = chars[i];

    // quoted names keep their case
    if first_char == '"' {
        i += 1;
        let name_start = i;
        while i < len && chars[i] != '"' {
            i += 1;
        }
        if i > name_start && i < len {
            let name: String = chars[name_start..i].iter().collect();
            return (name, i + 1 - start);
        }
        return (String::new(), 0);
    }

    if first_char.is_ascii_digit() {
        let name_start = i;
        while i < len && chars[i].is_ascii_digit() {
            i += 1;
        }
        return (chars[name_start..i].iter().collect(), i - start);
    }

    if !first_char.is_alphabetic() {
        return (String::new(), 0);
    }

    let name_start = i;
    while i < len && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '$' | '#')) {
        i += 1;
    }
    let name: String = chars[name_start..i].iter().collect();
    (name.to_uppercase(), i - start)
}

/// Normalize a user supplied placeholder name the way the parser stores it
pub(crate) fn normalize_bind_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let trimmed = trimmed.strip_prefix(':').unwrap_or(trimmed);
    let normalized = match trimmed.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
        Some(quoted) => quoted.to_string(),
        None => trimmed.to_uppercase(),
    };
    if normalized.is_empty() {
        return Err(Error::InvalidArgument("empty bind name".to_string()));
    }
    if normalized.chars().count() > MAX_BIND_NAME_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "bind name '{}' longer than {} characters",
            normalized, MAX_BIND_NAME_LENGTH
        )));
    }
    Ok(normalized)
}

struct Bound {
    direction: BindDirection,
    array_size: Option<u32>,
    // proxies referenced by the native bind must outlive the execution
    _values: Vec<Value>,
}

#[derive(Default)]
struct StmtState {
    parsed: Option<ParsedSql>,
    bound: IndexMap<String, Bound>,
    array_size: Option<u32>,
    executed: bool,
    batch_errors: bool,
    fetch_mode: FetchMode,
    errors: Vec<BatchError>,
    resultset: Option<Handle>,
}

pub(crate) struct StatementInner {
    session: SessionRef,
    state: Mutex<StmtState>,
}

/// Shared proxy for a native statement
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ocibind::native::memory::MemoryClient;
/// use ocibind::{Connection, ConnectParams, Environment, EnvironmentConfig};
///
/// # fn main() -> ocibind::Result<()> {
/// let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(MemoryClient::new()))?;
/// let conn = Connection::open(&env, &ConnectParams::new("db", "scott", "tiger"))?;
/// conn.execute("CREATE TABLE t (id NUMBER, name VARCHAR2(20))")?;
///
/// let stmt = conn.statement()?;
/// stmt.prepare("INSERT INTO t (id, name) VALUES (:id, :name)")?;
/// stmt.bind(":id", 1)?;
/// stmt.bind(":name", "one")?;
/// stmt.execute()?;
/// assert_eq!(stmt.affected_rows()?, 1);
///
/// stmt.execute_sql("SELECT name FROM t WHERE id = 1")?;
/// let rs = stmt.resultset()?;
/// assert!(rs.next()?);
/// assert_eq!(rs.get::<String>(1)?, "one");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Statement {
    handle: Handle,
    inner: Arc<StatementInner>,
}

impl Statement {
    /// Allocate a statement on a connection
    pub fn new(conn: &Connection) -> Result<Statement> {
        let session = conn.raw()?;
        let shared = conn.shared();
        let mut raw = RawHandle::NULL;
        check!(
            conn.ctx("handle_alloc"),
            shared.native().handle_alloc(session, HandleKind::Statement, &mut raw)
        );

        let inner = Arc::new(StatementInner {
            session: conn.session_ref(),
            state: Mutex::new(StmtState::default()),
        });
        let release = release_fn(move |api, _| api.handle_free(raw, HandleKind::Statement));
        let entry = NewEntry::allocated(raw, HandleKind::Statement, release)
            .child_of(conn.handle().id())
            .with_payload(inner.clone());
        let handle = Handle::register(shared, entry)?;
        Ok(Statement { handle, inner })
    }

    pub(crate) fn revive(env: &Arc<EnvShared>, id: HandleId) -> Option<Statement> {
        let handle = Handle::revive(env, id)?;
        if handle.kind() != HandleKind::Statement {
            return None;
        }
        let inner = handle.payload::<StatementInner>()?;
        Some(Statement { handle, inner })
    }

    fn env(&self) -> &Arc<EnvShared> {
        self.handle.env()
    }

    fn ctx(&self, call: &'static str) -> CallContext<'_> {
        self.inner.session.ctx(self.env(), call).statement(self)
    }

    fn err(&self) -> RawHandle {
        self.inner.session.err()
    }

    pub(crate) fn session(&self) -> &SessionRef {
        &self.inner.session
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Connection the statement was created on
    pub fn connection(&self) -> Result<Connection> {
        self.inner.session.connection(self.env())
    }

    /// Prepare SQL text, discarding binds and results of the previous one
    pub fn prepare(&self, sql: &str) -> Result<()> {
        let raw = self.handle.raw()?;
        let session = self.inner.session.raw(self.env())?;
        let parsed = ParsedSql::parse(sql);

        self.recycle();
        check!(
            self.ctx("stmt_prepare"),
            self.env().native().stmt_prepare(session, raw, self.err(), sql)
        );

        tracing::trace!(sql = sql, statement_type = ?parsed.statement_type, binds = parsed.binds.len(), "Statement prepared");
        let mut state = self.inner.state.lock();
        *state = StmtState {
            parsed: Some(parsed),
            batch_errors: state.batch_errors,
            fetch_mode: state.fetch_mode,
            ..StmtState::default()
        };
        Ok(())
    }

    /// Bind an input value to a placeholder
    ///
    /// `name` may carry the leading colon; unquoted names are
    /// case-insensitive.
    pub fn bind<V: Into<Value>>(&self, name: &str, value: V) -> Result<()> {
        self.bind_with(name, value, BindDirection::In)
    }

    /// Bind an output placeholder, read back with [`Statement::out_value`]
    pub fn bind_out(&self, name: &str) -> Result<()> {
        self.bind_with(name, Value::Null, BindDirection::Out)
    }

    /// Bind a value with an explicit direction
    pub fn bind_with<V: Into<Value>>(&self, name: &str, value: V, direction: BindDirection) -> Result<()> {
        let value = value.into();
        let datum = value.to_datum()?;
        self.bind_values(name, vec![value], vec![datum], direction, None)
    }

    /// Bind one value per row for array execution
    ///
    /// The first array bind fixes the bind array size unless
    /// [`Statement::set_bind_array_size`] was called before.
    pub fn bind_array<V: Into<Value>>(&self, name: &str, values: Vec<V>) -> Result<()> {
        if values.is_empty() {
            return Err(Error::InvalidArgument("empty bind array".to_string()));
        }
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let datums = values.iter().map(Value::to_datum).collect::<Result<Vec<Datum>>>()?;
        let size = u32::try_from(values.len())
            .map_err(|_| Error::InvalidArgument("bind array too large".to_string()))?;
        self.bind_values(name, values, datums, BindDirection::In, Some(size))
    }

    fn bind_values(
        &self,
        name: &str,
        values: Vec<Value>,
        datums: Vec<Datum>,
        direction: BindDirection,
        array_size: Option<u32>,
    ) -> Result<()> {
        let name = normalize_bind_name(name)?;
        let raw = self.handle.raw()?;

        {
            let mut state = self.inner.state.lock();
            let parsed = state
                .parsed
                .as_ref()
                .ok_or_else(|| Error::StatementState("bind before prepare".to_string()))?;
            if !parsed.has_bind(&name) {
                return Err(Error::BindNotFound(name));
            }
            if let Some(size) = array_size {
                match state.array_size {
                    Some(expected) if size < expected => {
                        return Err(Error::InvalidArgument(format!(
                            "bind array {} has {} values, bind array size is {}",
                            name, size, expected
                        )))
                    }
                    Some(_) => {}
                    None => state.array_size = Some(size),
                }
            }
        }

        check!(
            self.ctx("stmt_bind"),
            self.env()
                .native()
                .stmt_bind(raw, self.err(), &name, &datums, direction)
        );
        self.inner.state.lock().bound.insert(
            name,
            Bound {
                direction,
                array_size,
                _values: values,
            },
        );
        Ok(())
    }

    /// Set the number of rows an array execution processes
    pub fn set_bind_array_size(&self, size: u32) -> Result<()> {
        if size == 0 {
            return Err(Error::InvalidArgument("bind array size must be positive".to_string()));
        }
        let mut state = self.inner.state.lock();
        if let Some((name, bound)) = state
            .bound
            .iter()
            .find(|(_, b)| b.array_size.map(|n| n < size).unwrap_or(false))
        {
            return Err(Error::InvalidArgument(format!(
                "bind array {} has only {} values",
                name,
                bound.array_size.unwrap_or(0)
            )));
        }
        state.array_size = Some(size);
        Ok(())
    }

    /// Number of rows an array execution processes
    pub fn bind_array_size(&self) -> u32 {
        self.inner.state.lock().array_size.unwrap_or(1)
    }

    /// Placeholders of the prepared SQL, in order of appearance
    pub fn bind_info(&self) -> Vec<BindInfo> {
        let state = self.inner.state.lock();
        let Some(parsed) = state.parsed.as_ref() else {
            return Vec::new();
        };
        parsed
            .binds
            .iter()
            .map(|info| {
                let mut info = info.clone();
                if let Some(bound) = state.bound.get(&info.name) {
                    info.direction = Some(bound.direction);
                    info.array_size = bound.array_size;
                }
                info
            })
            .collect()
    }

    /// Execute the prepared statement
    ///
    /// Commits afterwards when the connection is in auto commit mode.
    pub fn execute(&self) -> Result<()> {
        let raw = self.handle.raw()?;
        let session = self.inner.session.raw(self.env())?;
        let (statement_type, iters, batch_errors, fetch_mode) = {
            let state = self.inner.state.lock();
            let parsed = state
                .parsed
                .as_ref()
                .ok_or_else(|| Error::StatementState("execute before prepare".to_string()))?;
            (
                parsed.statement_type,
                state.array_size.unwrap_or(1),
                state.batch_errors,
                state.fetch_mode,
            )
        };

        self.recycle();
        let scrollable = statement_type == StatementType::Query && fetch_mode == FetchMode::Scrollable;
        let mode = ExecMode {
            commit_on_success: self.inner.session.auto_commit() && statement_type != StatementType::Query,
            batch_errors,
            describe_only: false,
            scrollable,
        };
        let iters = if statement_type == StatementType::Query { 1 } else { iters };

        check!(
            self.ctx("stmt_execute"),
            self.env()
                .native()
                .stmt_execute(session, raw, self.err(), iters, mode)
        );

        let errors = if batch_errors {
            let mut diagnostics = Vec::new();
            check!(
                self.ctx("stmt_batch_errors"),
                self.env()
                    .native()
                    .stmt_batch_errors(raw, self.err(), &mut diagnostics)
            );
            diagnostics
                .into_iter()
                .map(|d| BatchError {
                    row: d.row.unwrap_or(0),
                    code: d.code,
                    message: d.message,
                })
                .collect()
        } else {
            Vec::new()
        };

        let resultset = if statement_type == StatementType::Query {
            Some(self.open_resultset(raw, scrollable)?)
        } else {
            None
        };

        tracing::trace!(?statement_type, iters, errors = errors.len(), "Statement executed");
        let mut state = self.inner.state.lock();
        state.executed = true;
        state.errors = errors;
        state.resultset = resultset;
        Ok(())
    }

    /// Prepare and execute in one call
    pub fn execute_sql(&self, sql: &str) -> Result<()> {
        self.prepare(sql)?;
        self.execute()
    }

    fn open_resultset(&self, raw: RawHandle, scrollable: bool) -> Result<Handle> {
        let count = self.attr(Attr::ColumnCount)?;
        let count = count
            .as_u32()
            .ok_or_else(|| Error::type_mismatch("unsigned integer", count))?;

        let mut columns = Vec::with_capacity(count as usize);
        for position in 1..=count {
            let mut desc = ColumnDesc::default();
            check!(
                self.ctx("stmt_describe"),
                self.env()
                    .native()
                    .stmt_describe(raw, self.err(), position, &mut desc)
            );
            columns.push(Column::from(desc));
        }

        Resultset::open(self, columns, scrollable)
    }

    /// Drop the results of the previous execution
    fn recycle(&self) {
        self.inner.state.lock().resultset = None;
        self.handle.invalidate_fetched_children();
    }

    /// Result set of the last executed query
    pub fn resultset(&self) -> Result<Resultset> {
        self.handle.raw()?;
        let handle = self
            .inner
            .state
            .lock()
            .resultset
            .clone()
            .ok_or_else(|| Error::StatementState("no result set: statement is not an executed query".to_string()))?;
        Resultset::from_handle(handle, self)
    }

    /// Rows processed by the last execution (rows fetched so far for queries)
    pub fn affected_rows(&self) -> Result<u64> {
        let value = self.attr(Attr::RowCount)?;
        value
            .as_u32()
            .map(u64::from)
            .ok_or_else(|| Error::type_mismatch("unsigned integer", value))
    }

    /// Value of an output placeholder after execution
    ///
    /// LOBs and objects returned this way belong to the statement and are
    /// invalidated by the next execution.
    pub fn out_value(&self, name: &str) -> Result<Value> {
        let name = normalize_bind_name(name)?;
        let raw = self.handle.raw()?;
        {
            let state = self.inner.state.lock();
            if !state.executed {
                return Err(Error::StatementState("statement not executed".to_string()));
            }
            if !state.bound.contains_key(&name) {
                return Err(Error::BindNotFound(name));
            }
        }

        let mut datum = Datum::Null;
        check!(
            self.ctx("stmt_out_value"),
            self.env()
                .native()
                .stmt_out_value(raw, self.err(), &name, &mut datum)
        );
        let type_name = match &datum {
            Datum::Object(obj) | Datum::Reference(obj) | Datum::Collection(obj) if !obj.is_null() => {
                let kind = match datum {
                    Datum::Object(_) => HandleKind::Object,
                    Datum::Reference(_) => HandleKind::Reference,
                    _ => HandleKind::Collection,
                };
                let mut value = AttrValue::None;
                check!(
                    self.ctx("attr_get").on(kind),
                    self.env()
                        .native()
                        .attr_get(*obj, kind, Attr::TypeName, self.err(), &mut value)
                );
                value.as_text().map(str::to_string)
            }
            _ => None,
        };
        let scope = FetchScope {
            env: self.env(),
            session: &self.inner.session,
            parent: self.handle.id(),
            type_name: type_name.as_deref(),
        };
        Value::from_datum(datum, &scope)
    }

    /// Value of an output placeholder, converted
    pub fn out_value_as<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(&self.out_value(name)?)
    }

    /// Statement type of the prepared SQL
    pub fn statement_type(&self) -> StatementType {
        self.inner
            .state
            .lock()
            .parsed
            .as_ref()
            .map(|p| p.statement_type)
            .unwrap_or_default()
    }

    /// Check if this is a query (SELECT)
    pub fn is_query(&self) -> bool {
        self.statement_type() == StatementType::Query
    }

    /// Check if this is a DML statement
    pub fn is_dml(&self) -> bool {
        self.statement_type() == StatementType::Dml
    }

    /// Check if this is a DDL statement
    pub fn is_ddl(&self) -> bool {
        self.statement_type() == StatementType::Ddl
    }

    /// Check if this is a PL/SQL block
    pub fn is_plsql(&self) -> bool {
        self.statement_type() == StatementType::PlSql
    }

    /// Check if this is a DML RETURNING statement
    pub fn is_returning(&self) -> bool {
        self.inner
            .state
            .lock()
            .parsed
            .as_ref()
            .map(|p| p.is_returning)
            .unwrap_or(false)
    }

    /// SQL text of the prepared statement
    pub fn sql(&self) -> Option<String> {
        self.inner.state.lock().parsed.as_ref().map(|p| p.sql.clone())
    }

    /// Continue array DML past failing rows, collecting their errors
    pub fn set_batch_errors(&self, enabled: bool) {
        self.inner.state.lock().batch_errors = enabled;
    }

    /// Rows rejected by the last batch-errors execution
    pub fn batch_errors(&self) -> Vec<BatchError> {
        self.inner.state.lock().errors.clone()
    }

    /// Choose how the result sets of later executions can be navigated
    ///
    /// Survives re-preparation, like the batch errors flag.
    pub fn set_fetch_mode(&self, mode: FetchMode) {
        self.inner.state.lock().fetch_mode = mode;
    }

    /// Navigation mode for result sets of later executions
    pub fn fetch_mode(&self) -> FetchMode {
        self.inner.state.lock().fetch_mode
    }

    /// Rows prefetched per round trip
    pub fn fetch_size(&self) -> Result<u32> {
        let value = self.attr(Attr::PrefetchRows)?;
        value
            .as_u32()
            .ok_or_else(|| Error::type_mismatch("unsigned integer", value))
    }

    /// Set the rows prefetched per round trip
    pub fn set_fetch_size(&self, rows: u32) -> Result<()> {
        let raw = self.handle.raw()?;
        check!(
            self.ctx("attr_set"),
            self.env().native().attr_set(
                raw,
                HandleKind::Statement,
                Attr::PrefetchRows,
                &AttrValue::UInt(rows),
                self.err()
            )
        );
        Ok(())
    }

    /// Free the statement now; clones and result sets become invalid
    pub fn close(&self) -> Result<()> {
        self.inner.state.lock().resultset = None;
        self.handle.release("handle_free")
    }

    /// Check whether the statement has been closed
    pub fn is_closed(&self) -> bool {
        !self.handle.is_valid()
    }

    fn attr(&self, attr: Attr) -> Result<AttrValue> {
        let raw = self.handle.raw()?;
        let mut value = AttrValue::None;
        check!(
            self.ctx("attr_get"),
            self.env()
                .native()
                .attr_get(raw, HandleKind::Statement, attr, self.err(), &mut value)
        );
        Ok(value)
    }
}

impl PartialEq for Statement {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sql = self.sql();
        f.debug_struct("Statement")
            .field("sql", &sql)
            .field("handle", &self.handle.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> ParsedSql {
        ParsedSql::parse(sql)
    }

    fn names(parsed: &ParsedSql) -> Vec<&str> {
        parsed.binds.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn test_statement_type_detection() {
        assert_eq!(parse("SELECT * FROM dual").statement_type, StatementType::Query);
        assert_eq!(parse("INSERT INTO t VALUES (1)").statement_type, StatementType::Dml);
        assert_eq!(parse("UPDATE t SET x = 1").statement_type, StatementType::Dml);
        assert_eq!(parse("DELETE FROM t").statement_type, StatementType::Dml);
        assert_eq!(parse("CREATE TABLE t (x NUMBER)").statement_type, StatementType::Ddl);
        assert_eq!(parse("BEGIN NULL; END;").statement_type, StatementType::PlSql);
        assert_eq!(
            parse("DECLARE x NUMBER; BEGIN NULL; END;").statement_type,
            StatementType::PlSql
        );
        assert_eq!(parse("  ").statement_type, StatementType::Unknown);
    }

    #[test]
    fn test_bind_variable_extraction() {
        let parsed = parse("SELECT * FROM t WHERE x = :x AND y = :y");
        assert_eq!(names(&parsed), vec!["X", "Y"]);
    }

    #[test]
    fn test_numeric_bind_variables() {
        let parsed = parse("SELECT * FROM t WHERE x = :1 AND y = :2");
        assert_eq!(names(&parsed), vec!["1", "2"]);
    }

    #[test]
    fn test_duplicate_binds_plsql() {
        let parsed = parse("BEGIN :x := :x + 1; END;");
        assert_eq!(names(&parsed), vec!["X"]);
    }

    #[test]
    fn test_duplicate_binds_sql() {
        let parsed = parse("SELECT * FROM t WHERE x = :x OR y = :x");
        assert_eq!(parsed.binds.len(), 2);
    }

    #[test]
    fn test_returning_into() {
        let parsed = parse("INSERT INTO t (x) VALUES (:val) RETURNING id INTO :id");
        assert!(parsed.is_returning);
        assert!(!parsed.binds[0].is_return_bind);
        assert!(parsed.binds[1].is_return_bind);
    }

    #[test]
    fn test_binds_in_comments_ignored() {
        let parsed = parse("SELECT * FROM t WHERE x = :x -- AND y = :y");
        assert_eq!(names(&parsed), vec!["X"]);
        let parsed = parse("SELECT /* :hidden */ * FROM t WHERE x = :x");
        assert_eq!(names(&parsed), vec!["X"]);
    }

    #[test]
    fn test_binds_in_strings_ignored() {
        let parsed = parse("SELECT * FROM t WHERE x = ':not_a_bind' AND y = :y");
        assert_eq!(names(&parsed), vec!["Y"]);
    }

    #[test]
    fn test_quoted_bind_name() {
        let parsed = parse("SELECT * FROM t WHERE x = :\"MyBind\" AND y = :z");
        assert_eq!(names(&parsed), vec!["MyBind", "Z"]);
    }

    #[test]
    fn test_assignment_is_not_a_bind() {
        let parsed = parse("BEGIN :out := :a || :b; END;");
        assert_eq!(names(&parsed), vec!["OUT", "A", "B"]);
    }

    #[test]
    fn test_case_insensitive_keywords() {
        assert_eq!(parse("select * from dual").statement_type, StatementType::Query);
        assert_eq!(parse("INSERT into t values (1)").statement_type, StatementType::Dml);
    }

    #[test]
    fn test_normalize_bind_name() {
        assert_eq!(normalize_bind_name(":id").unwrap(), "ID");
        assert_eq!(normalize_bind_name("name").unwrap(), "NAME");
        assert_eq!(normalize_bind_name(":\"Mixed\"").unwrap(), "Mixed");
        assert!(normalize_bind_name(":").is_err());
        assert!(normalize_bind_name(&"x".repeat(MAX_BIND_NAME_LENGTH + 1)).is_err());
    }
}
