//! Result set cursor over an executed query
//!
//! A [`Resultset`] is a fetched child of its statement: executing or
//! preparing the statement again, or closing it, invalidates every proxy of
//! the previous result set. Values of the current row that wrap native
//! resources (LOBs, objects, references) are fetched children of the result
//! set and are invalidated by the next fetch.
//!
//! Result sets of statements executed in [`FetchMode::Scrollable`] can also
//! move backwards and jump to arbitrary rows.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::environment::EnvShared;
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleId, NewEntry};
use crate::native::{ColumnDesc, DataType, Datum, FetchOrientation, HandleKind, RawHandle, Status};
use crate::row::{ColumnRef, FetchScope, FromValue, Row, Value};
use crate::statement::{FetchMode, Statement};
use crate::status::check;

/// Select-list column description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    data_type: DataType,
    size: u32,
    precision: i16,
    scale: i16,
    nullable: bool,
    type_name: Option<String>,
}

impl Column {
    /// Column name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Data type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Maximum size in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Numeric precision
    pub fn precision(&self) -> i16 {
        self.precision
    }

    /// Numeric scale
    pub fn scale(&self) -> i16 {
        self.scale
    }

    /// Whether NULL is allowed
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Object type name of object and REF columns
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }
}

impl From<ColumnDesc> for Column {
    fn from(desc: ColumnDesc) -> Self {
        Self {
            name: desc.name,
            data_type: desc.data_type,
            size: desc.size,
            precision: desc.precision,
            scale: desc.scale,
            nullable: desc.nullable,
            type_name: desc.type_name,
        }
    }
}

/// Reference point of [`Resultset::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Offset is a 1-based row position
    Absolute,
    /// Offset counts from the current row
    Relative,
}

#[derive(Default)]
struct Cursor {
    row: Option<Row>,
    // 1-based position of the current row
    position: u64,
    eof: bool,
}

struct ResultsetInner {
    statement: HandleId,
    scrollable: bool,
    columns: Vec<Column>,
    names: Arc<[String]>,
    by_name: IndexMap<String, usize>,
    cursor: Mutex<Cursor>,
}

/// Cursor over the rows of a query
#[derive(Clone)]
pub struct Resultset {
    handle: Handle,
    inner: Arc<ResultsetInner>,
    statement: Statement,
}

impl Resultset {
    /// Register the result set of a freshly executed query
    pub(crate) fn open(statement: &Statement, columns: Vec<Column>, scrollable: bool) -> Result<Handle> {
        let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();
        let by_name = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.to_uppercase(), i + 1))
            .collect();
        let inner = Arc::new(ResultsetInner {
            statement: statement.handle().id(),
            scrollable,
            columns,
            names,
            by_name,
            cursor: Mutex::new(Cursor::default()),
        });
        let entry = NewEntry::fetched(RawHandle::NULL, HandleKind::Resultset, statement.handle().id())
            .with_payload(inner);
        Handle::register(statement.handle().env(), entry)
    }

    pub(crate) fn from_handle(handle: Handle, statement: &Statement) -> Result<Resultset> {
        let inner = handle
            .payload::<ResultsetInner>()
            .ok_or(Error::InvalidHandle {
                kind: HandleKind::Resultset,
            })?;
        debug_assert_eq!(inner.statement, statement.handle().id());
        Ok(Resultset {
            handle,
            inner,
            statement: statement.clone(),
        })
    }

    fn env(&self) -> &Arc<EnvShared> {
        self.handle.env()
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Statement that produced the result set
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Check whether the cursor can move backwards and jump
    pub fn is_scrollable(&self) -> bool {
        self.inner.scrollable
    }

    /// Move to the next row
    ///
    /// Returns `false` once all rows have been fetched.
    pub fn next(&self) -> Result<bool> {
        if self.inner.scrollable {
            return self.scroll(FetchOrientation::Next, 0);
        }
        self.handle.raw()?;
        let stmt = self.statement.handle().raw()?;
        let session = self.statement.session();

        let mut cursor = self.inner.cursor.lock();
        if cursor.eof {
            return Ok(false);
        }
        cursor.row = None;
        self.handle.invalidate_fetched_children();

        let status = check!(
            session.ctx(self.env(), "stmt_fetch").statement(&self.statement),
            self.env().native().stmt_fetch(stmt, session.err())
        );
        if status == Status::NoData {
            cursor.eof = true;
            tracing::trace!(rows = cursor.position, "Result set exhausted");
            return Ok(false);
        }

        cursor.row = Some(self.load_row(stmt)?);
        cursor.position += 1;
        Ok(true)
    }

    /// Move to the previous row of a scrollable result set
    pub fn prev(&self) -> Result<bool> {
        self.scroll(FetchOrientation::Prior, 0)
    }

    /// Move to the first row of a scrollable result set
    pub fn first(&self) -> Result<bool> {
        self.scroll(FetchOrientation::First, 0)
    }

    /// Move to the last row of a scrollable result set
    pub fn last(&self) -> Result<bool> {
        self.scroll(FetchOrientation::Last, 0)
    }

    /// Jump to a row of a scrollable result set
    ///
    /// Returns `false` when the target row does not exist; the cursor is then
    /// left before the first or after the last row.
    pub fn seek(&self, mode: SeekMode, offset: i64) -> Result<bool> {
        let orientation = match mode {
            SeekMode::Absolute => FetchOrientation::Absolute,
            SeekMode::Relative => FetchOrientation::Relative,
        };
        self.scroll(orientation, offset)
    }

    fn scroll(&self, orientation: FetchOrientation, offset: i64) -> Result<bool> {
        if !self.inner.scrollable {
            return Err(Error::StatementState(format!(
                "result set is not scrollable; execute with {:?}",
                FetchMode::Scrollable
            )));
        }
        self.handle.raw()?;
        let stmt = self.statement.handle().raw()?;
        let session = self.statement.session();

        let mut cursor = self.inner.cursor.lock();
        cursor.row = None;
        self.handle.invalidate_fetched_children();

        let mut position = 0;
        let status = check!(
            session.ctx(self.env(), "stmt_fetch_scroll").statement(&self.statement),
            self.env()
                .native()
                .stmt_fetch_scroll(stmt, session.err(), orientation, offset, &mut position)
        );
        cursor.position = position;
        if status == Status::NoData {
            // before the first row is a valid place to scroll forward from
            cursor.eof = position > 0;
            tracing::trace!(?orientation, position, "Scroll target outside the result set");
            return Ok(false);
        }
        cursor.eof = false;
        cursor.row = Some(self.load_row(stmt)?);
        Ok(true)
    }

    /// Read every column of the row the native cursor is on
    fn load_row(&self, stmt: RawHandle) -> Result<Row> {
        let session = self.statement.session();
        let mut values = Vec::with_capacity(self.inner.columns.len());
        for (i, column) in self.inner.columns.iter().enumerate() {
            let mut datum = Datum::Null;
            check!(
                session.ctx(self.env(), "stmt_column_value").statement(&self.statement),
                self.env()
                    .native()
                    .stmt_column_value(stmt, session.err(), i as u32 + 1, &mut datum)
            );
            let scope = FetchScope {
                env: self.env(),
                session,
                parent: self.handle.id(),
                type_name: column.type_name(),
            };
            values.push(Value::from_datum(datum, &scope)?);
        }
        Ok(Row::new(values, Arc::clone(&self.inner.names)))
    }

    /// 1-based position of the current row, 0 before the first fetch
    ///
    /// For forward-only result sets this is also the number of rows fetched
    /// so far.
    pub fn current_row(&self) -> u64 {
        self.inner.cursor.lock().position
    }

    /// Check whether the cursor has moved past the last row
    pub fn is_exhausted(&self) -> bool {
        self.inner.cursor.lock().eof
    }

    /// Number of select-list columns
    pub fn column_count(&self) -> usize {
        self.inner.columns.len()
    }

    /// All column descriptions
    pub fn columns(&self) -> &[Column] {
        &self.inner.columns
    }

    /// Description of a column (1-based)
    pub fn column(&self, position: usize) -> Result<&Column> {
        position
            .checked_sub(1)
            .and_then(|i| self.inner.columns.get(i))
            .ok_or(Error::OutOfBounds {
                index: position,
                max: self.inner.columns.len(),
            })
    }

    /// 1-based position of a column by case-insensitive name
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.inner
            .by_name
            .get(&name.to_uppercase())
            .copied()
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    /// Snapshot of the current row
    pub fn row(&self) -> Result<Row> {
        self.handle.raw()?;
        self.inner
            .cursor
            .lock()
            .row
            .clone()
            .ok_or_else(|| Error::StatementState("no current row".to_string()))
    }

    /// Value of a column of the current row
    pub fn value(&self, column: impl Into<ColumnRef>) -> Result<Value> {
        let column = match column.into() {
            ColumnRef::Name(name) => ColumnRef::Index(self.column_index(&name)?),
            index => index,
        };
        self.handle.raw()?;
        let cursor = self.inner.cursor.lock();
        let row = cursor
            .row
            .as_ref()
            .ok_or_else(|| Error::StatementState("no current row".to_string()))?;
        row.value(column).cloned()
    }

    /// Value of a column of the current row, converted
    pub fn get<T: FromValue>(&self, column: impl Into<ColumnRef>) -> Result<T> {
        T::from_value(&self.value(column)?)
    }

    /// Check whether a column of the current row is NULL
    pub fn is_null(&self, column: impl Into<ColumnRef>) -> Result<bool> {
        Ok(self.value(column)?.is_null())
    }

    /// Fetch every remaining row
    pub fn rows(&self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while self.next()? {
            rows.push(self.row()?);
        }
        Ok(rows)
    }
}

impl PartialEq for Resultset {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for Resultset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resultset")
            .field("handle", &self.handle.id())
            .field("columns", &self.inner.names)
            .field("scrollable", &self.inner.scrollable)
            .field("current_row", &self.current_row())
            .finish()
    }
}
