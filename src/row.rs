//! Column and bind values
//!
//! This module provides:
//! - [`Value`], the type-safe representation of a column, bind or object
//!   attribute value
//! - [`FromValue`], conversion of values to Rust types
//! - [`ColumnRef`], addressing a result set column by position or name
//! - [`Row`], a detached snapshot of one fetched row

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

use crate::connection::SessionRef;
use crate::environment::EnvShared;
use crate::error::{Error, Result};
use crate::handle::HandleId;
use crate::native::{Datum, LobKind};
use crate::types::{Collection, Interval, Lob, Object, Reference, TypeInfo};

/// Represents a column, bind or attribute value.
///
/// Values can be accessed using the various `as_*` methods, or converted
/// with [`FromValue`].
///
/// # Example
///
/// ```rust
/// use ocibind::Value;
///
/// fn describe(value: &Value) -> String {
///     match value {
///         Value::Null => "NULL".to_string(),
///         Value::String(s) => format!("string {}", s),
///         Value::Integer(i) => format!("integer {}", i),
///         other => other.to_string(),
///     }
/// }
///
/// assert_eq!(describe(&Value::from(42)), "integer 42");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// String value (VARCHAR2, CHAR)
    String(String),
    /// Byte array (RAW)
    Bytes(Vec<u8>),
    /// Integer value (NUMBER that fits in i64)
    Integer(i64),
    /// Floating point value (NUMBER, BINARY_DOUBLE)
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// DATE value
    Date(NaiveDateTime),
    /// TIMESTAMP value
    Timestamp(NaiveDateTime),
    /// TIMESTAMP WITH TIME ZONE value
    TimestampTz(DateTime<FixedOffset>),
    /// INTERVAL value
    Interval(Interval),
    /// LOB locator (CLOB, BLOB)
    Lob(Lob),
    /// Object type instance
    Object(Object),
    /// Reference to an object
    Reference(Reference),
    /// VARRAY or nested table
    Collection(Collection),
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to get as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to get as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to get as a date / timestamp without time zone
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) | Value::Timestamp(d) => Some(*d),
            Value::TimestampTz(ts) => Some(ts.naive_local()),
            _ => None,
        }
    }

    /// Try to get as a timestamp with time zone
    pub fn as_timestamp_tz(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Value::TimestampTz(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Try to get as an interval
    pub fn as_interval(&self) -> Option<Interval> {
        match self {
            Value::Interval(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as a LOB
    pub fn as_lob(&self) -> Option<&Lob> {
        match self {
            Value::Lob(lob) => Some(lob),
            _ => None,
        }
    }

    /// Try to get as an object
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Try to get as a reference
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Try to get as a collection
    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Value::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Short name of the variant, used in conversion errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamp with time zone",
            Value::Interval(_) => "interval",
            Value::Lob(_) => "lob",
            Value::Object(_) => "object",
            Value::Reference(_) => "reference",
            Value::Collection(_) => "collection",
        }
    }

    /// Native data cell for binds and attribute writes
    pub(crate) fn to_datum(&self) -> Result<Datum> {
        Ok(match self {
            Value::Null => Datum::Null,
            Value::String(s) => Datum::Text(s.clone()),
            Value::Bytes(b) => Datum::Raw(b.clone()),
            Value::Integer(i) => Datum::Integer(*i),
            Value::Float(f) => Datum::Double(*f),
            Value::Boolean(b) => Datum::Boolean(*b),
            Value::Date(d) => Datum::Date(*d),
            Value::Timestamp(ts) => Datum::Timestamp(*ts),
            Value::TimestampTz(ts) => Datum::TimestampTz(*ts),
            Value::Interval(i) => Datum::Interval(*i),
            Value::Lob(lob) => Datum::Lob(lob.kind(), lob.handle().raw()?),
            Value::Object(obj) => Datum::Object(obj.handle().raw()?),
            Value::Reference(r) => Datum::Reference(r.handle().raw()?),
            Value::Collection(c) => Datum::Collection(c.handle().raw()?),
        })
    }

    /// Wrap a native data cell
    ///
    /// Locators and object instances become fetched children of
    /// `scope.parent`: valid until the parent recycles its buffers.
    pub(crate) fn from_datum(datum: Datum, scope: &FetchScope<'_>) -> Result<Value> {
        Ok(match datum {
            Datum::Null => Value::Null,
            Datum::Text(s) => Value::String(s),
            Datum::Integer(i) => Value::Integer(i),
            Datum::Double(f) => Value::Float(f),
            Datum::Raw(b) => Value::Bytes(b),
            Datum::Boolean(b) => Value::Boolean(b),
            Datum::Date(d) => Value::Date(d),
            Datum::Timestamp(ts) => Value::Timestamp(ts),
            Datum::TimestampTz(ts) => Value::TimestampTz(ts),
            Datum::Interval(i) => Value::Interval(i),
            Datum::Lob(_, raw) if raw.is_null() => Value::Null,
            Datum::Lob(kind, raw) => Value::Lob(Lob::fetched(scope.env, scope.session, raw, kind, scope.parent)?),
            Datum::Object(raw) if raw.is_null() => Value::Null,
            Datum::Object(raw) => {
                let info = scope.type_info()?;
                Value::Object(Object::fetched(scope.env, scope.session, raw, info, scope.parent)?)
            }
            Datum::Reference(raw) if raw.is_null() => Value::Null,
            Datum::Reference(raw) => {
                let info = scope.type_info()?;
                Value::Reference(Reference::fetched(scope.env, scope.session, raw, info, scope.parent)?)
            }
            Datum::Collection(raw) if raw.is_null() => Value::Null,
            Datum::Collection(raw) => {
                let info = scope.type_info()?;
                Value::Collection(Collection::fetched(scope.env, raw, info, scope.parent)?)
            }
        })
    }
}

/// Where a fetched native value comes from
pub(crate) struct FetchScope<'a> {
    pub env: &'a Arc<EnvShared>,
    pub session: &'a SessionRef,
    pub parent: HandleId,
    pub type_name: Option<&'a str>,
}

impl FetchScope<'_> {
    fn type_info(&self) -> Result<TypeInfo> {
        let name = self
            .type_name
            .ok_or_else(|| Error::Internal("object or collection value without type name".to_string()))?;
        TypeInfo::cached(self.env, self.session, name)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v.and_time(chrono::NaiveTime::MIN))
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::TimestampTz(v)
    }
}

impl From<Interval> for Value {
    fn from(v: Interval) -> Self {
        Value::Interval(v)
    }
}

impl From<Lob> for Value {
    fn from(v: Lob) -> Self {
        Value::Lob(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl From<Reference> for Value {
    fn from(v: Reference) -> Self {
        Value::Reference(v)
    }
}

impl From<Collection> for Value {
    fn from(v: Collection) -> Self {
        Value::Collection(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
            Value::TimestampTz(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f %:z")),
            Value::Interval(i) => write!(f, "{}", i),
            Value::Lob(lob) => write!(f, "<{:?} LOB>", lob.kind()),
            Value::Object(obj) => write!(f, "<OBJECT {}>", obj.type_info().name()),
            Value::Reference(r) => write!(f, "<REF {}>", r.type_info().name()),
            Value::Collection(c) => write!(f, "<COLLECTION {}>", c.type_info().name()),
        }
    }
}

/// Conversion from a [`Value`] to a Rust type
///
/// Implemented for the scalar types the binding maps, for `Option<T>`
/// (NULL becomes `None`) and for the handle-backed types.
pub trait FromValue: Sized {
    /// Convert, failing with [`Error::TypeMismatch`] when the value has
    /// another type
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::TypeMismatch {
        expected,
        actual: value.type_name().to_string(),
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Integer(_) | Value::Float(_) | Value::Interval(_) => Ok(value.to_string()),
            Value::Lob(lob) if lob.kind() == LobKind::Clob => lob.read_string_all(),
            other => Err(mismatch("string", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| mismatch("integer", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| mismatch("32-bit integer", value))
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        u32::try_from(wide).map_err(|_| mismatch("unsigned 32-bit integer", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("float", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("boolean", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Lob(lob) if lob.kind() == LobKind::Blob => lob.read_bytes_all().map(|b| b.to_vec()),
            other => Err(mismatch("bytes", other)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_datetime().ok_or_else(|| mismatch("date", value))
    }
}

impl FromValue for DateTime<FixedOffset> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_timestamp_tz()
            .ok_or_else(|| mismatch("timestamp with time zone", value))
    }
}

impl FromValue for Interval {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_interval().ok_or_else(|| mismatch("interval", value))
    }
}

impl FromValue for Lob {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_lob().cloned().ok_or_else(|| mismatch("lob", value))
    }
}

impl FromValue for Object {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_object().cloned().ok_or_else(|| mismatch("object", value))
    }
}

impl FromValue for Reference {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_reference()
            .cloned()
            .ok_or_else(|| mismatch("reference", value))
    }
}

impl FromValue for Collection {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_collection()
            .cloned()
            .ok_or_else(|| mismatch("collection", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// Column address: 1-based position or case-insensitive name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// 1-based column position
    Index(usize),
    /// Column name
    Name(String),
}

impl From<usize> for ColumnRef {
    fn from(index: usize) -> Self {
        ColumnRef::Index(index)
    }
}

impl From<u32> for ColumnRef {
    fn from(index: u32) -> Self {
        ColumnRef::Index(index as usize)
    }
}

impl From<i32> for ColumnRef {
    // negative positions are reported as out of bounds
    fn from(index: i32) -> Self {
        ColumnRef::Index(usize::try_from(index).unwrap_or(0))
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(name: String) -> Self {
        ColumnRef::Name(name)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Index(i) => write!(f, "#{}", i),
            ColumnRef::Name(n) => write!(f, "{}", n),
        }
    }
}

/// One fetched row
///
/// Scalars are copies; LOB, object and reference values keep pointing at the
/// resources fetched with the row and become invalid when the result set
/// moves on.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    names: Arc<[String]>,
}

impl Row {
    pub(crate) fn new(values: Vec<Value>, names: Arc<[String]>) -> Self {
        Self { values, names }
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check for a row without columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names in select-list order
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// All values in select-list order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consume the row, returning its values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// 1-based position of a column
    pub fn position(&self, column: &ColumnRef) -> Result<usize> {
        match column {
            ColumnRef::Index(index) if (1..=self.values.len()).contains(index) => Ok(*index),
            ColumnRef::Index(index) => Err(Error::OutOfBounds {
                index: *index,
                max: self.values.len(),
            }),
            ColumnRef::Name(name) => self
                .names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(name))
                .map(|i| i + 1)
                .ok_or_else(|| Error::ColumnNotFound(name.clone())),
        }
    }

    /// Value of a column
    pub fn value(&self, column: impl Into<ColumnRef>) -> Result<&Value> {
        let position = self.position(&column.into())?;
        Ok(&self.values[position - 1])
    }

    /// Value of a column, converted
    pub fn get<T: FromValue>(&self, column: impl Into<ColumnRef>) -> Result<T> {
        T::from_value(self.value(column)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_null() {
        let v = Value::Null;
        assert!(v.is_null());
        assert!(v.as_str().is_none());
        assert!(v.as_i64().is_none());
        assert_eq!(Option::<i64>::from_value(&v).unwrap(), None);
    }

    #[test]
    fn test_value_string() {
        let v = Value::from("hello");
        assert!(!v.is_null());
        assert_eq!(v.as_str(), Some("hello"));
        assert_eq!(format!("{}", v), "hello");
        assert_eq!(String::from_value(&v).unwrap(), "hello");
    }

    #[test]
    fn test_value_integer() {
        let v = Value::Integer(42);
        assert_eq!(v.as_i64(), Some(42));
        assert_eq!(v.as_f64(), Some(42.0));
        assert_eq!(i32::from_value(&v).unwrap(), 42);
        assert_eq!(String::from_value(&v).unwrap(), "42");
    }

    #[test]
    fn test_value_float() {
        let v = Value::Float(3.25);
        assert_eq!(v.as_f64(), Some(3.25));
        assert_eq!(v.as_i64(), Some(3));
    }

    #[test]
    fn test_value_boolean() {
        assert_eq!(Value::Boolean(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(0).as_bool(), Some(false));
    }

    #[test]
    fn test_conversion_mismatch() {
        let err = bool::from_value(&Value::from("yes")).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { expected: "boolean", .. }));
        assert!(u32::from_value(&Value::Integer(-1)).is_err());
    }

    #[test]
    fn test_dates() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let v = Value::from(d);
        assert_eq!(format!("{}", v), "2024-02-29 00:00:00");
        assert_eq!(NaiveDateTime::from_value(&v).unwrap().date(), d);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Null), "NULL");
        assert_eq!(format!("{}", Value::Integer(42)), "42");
        assert_eq!(format!("{}", Value::Float(3.5)), "3.5");
        assert_eq!(format!("{}", Value::Boolean(true)), "true");
        assert_eq!(format!("{}", Value::Bytes(vec![1, 2, 3])), "<3 bytes>");
        assert_eq!(
            format!("{}", Value::Interval(Interval::year_month(1, 2))),
            "+01-02"
        );
    }

    #[test]
    fn test_scalar_datum_round_trip() {
        let values = vec![
            Value::from("text"),
            Value::from(7i64),
            Value::from(0.5),
            Value::from(vec![0u8, 255]),
            Value::from(false),
        ];
        for value in values {
            let datum = value.to_datum().unwrap();
            assert!(!datum.is_null());
        }
        assert_eq!(Value::Null.to_datum().unwrap(), Datum::Null);
    }

    #[test]
    fn test_row_access() {
        let names: Arc<[String]> = vec!["ID".to_string(), "Name".to_string()].into();
        let row = Row::new(vec![Value::Integer(1), Value::from("one")], names);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get::<i64>(1).unwrap(), 1);
        assert_eq!(row.get::<String>("name").unwrap(), "one");
        assert!(matches!(row.value(3), Err(Error::OutOfBounds { index: 3, max: 2 })));
        assert!(matches!(row.value(0), Err(Error::OutOfBounds { .. })));
        assert!(matches!(row.value("missing"), Err(Error::ColumnNotFound(_))));
    }

    #[test]
    fn test_column_ref() {
        assert_eq!(ColumnRef::from(2), ColumnRef::Index(2));
        assert_eq!(ColumnRef::from(-1), ColumnRef::Index(0));
        assert_eq!(ColumnRef::from("ID").to_string(), "ID");
    }
}
