//! VARRAY and nested table instances
//!
//! A [`Collection`] is created by the application from a collection
//! [`TypeInfo`] (owned by the connection) or fetched from a result set, an
//! object attribute or an output bind (owned by that parent). Objects, LOBs
//! and nested collections read from a collection are fetched children of
//! it: trimming, deleting or clearing elements invalidates them.
//!
//! Element indexes are 0-based.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ocibind::native::memory::MemoryClient;
//! use ocibind::native::{AttrDesc, CollectionDesc, DataType};
//! use ocibind::{Collection, Connection, ConnectParams, Environment, EnvironmentConfig, TypeInfo};
//!
//! # fn main() -> ocibind::Result<()> {
//! let client = MemoryClient::new();
//! client.define_collection("NAMES_T", CollectionDesc::varray(3, AttrDesc::new("", DataType::Text)));
//! let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(client))?;
//! let conn = Connection::open(&env, &ConnectParams::new("db", "scott", "tiger"))?;
//!
//! let names = Collection::new(&TypeInfo::describe(&conn, "NAMES_T")?)?;
//! names.append("ada")?;
//! names.append("grace")?;
//! assert_eq!(names.count()?, 2);
//! assert_eq!(names.get_as::<String>(1)?, "grace");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use crate::environment::EnvShared;
use crate::error::{Error, Result};
use crate::handle::{release_fn, Handle, HandleId, NewEntry};
use crate::native::{CollectionDesc, CollectionKind, Datum, HandleKind, RawHandle, Status};
use crate::row::{FetchScope, FromValue, Value};
use crate::status::{check, CallContext};
use crate::types::TypeInfo;

/// Instance of a VARRAY or nested table type
#[derive(Clone)]
pub struct Collection {
    handle: Handle,
    type_info: TypeInfo,
}

impl Collection {
    /// Create a new, empty instance
    pub fn new(type_info: &TypeInfo) -> Result<Collection> {
        if !type_info.is_collection() {
            return Err(Error::NotCompatible(format!(
                "{} is not a collection type",
                type_info.name()
            )));
        }
        let (env, session, tdo) = type_info.resolve()?;
        let mut raw = RawHandle::NULL;
        check!(
            type_info.session().ctx(env, "coll_new").on(HandleKind::TypeInfo),
            env.native()
                .coll_new(session, type_info.session().err(), tdo, &mut raw)
        );

        let release = release_fn(move |api, _| api.handle_free(raw, HandleKind::Collection));
        let entry =
            NewEntry::allocated(raw, HandleKind::Collection, release).child_of(type_info.session().id);
        let handle = Handle::register(env, entry)?;
        Ok(Collection {
            handle,
            type_info: type_info.clone(),
        })
    }

    pub(crate) fn fetched(
        env: &Arc<EnvShared>,
        raw: RawHandle,
        type_info: TypeInfo,
        parent: HandleId,
    ) -> Result<Collection> {
        let handle = Handle::register(env, NewEntry::fetched(raw, HandleKind::Collection, parent))?;
        Ok(Collection { handle, type_info })
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Type of the instance
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    fn desc(&self) -> Result<&CollectionDesc> {
        self.type_info
            .collection()
            .ok_or_else(|| Error::Internal(format!("{} is not a collection type", self.type_info.name())))
    }

    /// VARRAY or nested table
    pub fn kind(&self) -> Result<CollectionKind> {
        Ok(self.desc()?.kind)
    }

    /// Maximum number of elements of a VARRAY, 0 for nested tables
    pub fn max(&self) -> Result<u32> {
        Ok(self.desc()?.max)
    }

    fn ctx(&self, call: &'static str) -> CallContext<'_> {
        self.type_info
            .session()
            .ctx(self.handle.env(), call)
            .on(HandleKind::Collection)
    }

    fn err(&self) -> RawHandle {
        self.type_info.session().err()
    }

    /// Number of element slots, deleted nested table elements included
    pub fn size(&self) -> Result<u32> {
        let raw = self.handle.raw()?;
        let mut size = 0;
        check!(
            self.ctx("coll_size"),
            self.handle.env().native().coll_size(self.err(), raw, &mut size)
        );
        Ok(size)
    }

    /// Number of elements that exist
    pub fn count(&self) -> Result<u32> {
        let raw = self.handle.raw()?;
        let mut count = 0;
        check!(
            self.ctx("coll_count"),
            self.handle.env().native().coll_count(self.err(), raw, &mut count)
        );
        Ok(count)
    }

    /// Check whether the collection has no elements
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    fn element(&self, index: u32) -> Result<Option<Value>> {
        let raw = self.handle.raw()?;
        let desc = self.desc()?;
        let env = self.handle.env();
        let mut datum = Datum::Null;
        let status = check!(
            self.ctx("coll_get"),
            env.native().coll_get(self.err(), raw, index, &mut datum)
        );
        if status == Status::NoData {
            return Ok(None);
        }
        let scope = FetchScope {
            env,
            session: self.type_info.session(),
            parent: self.handle.id(),
            type_name: desc.element.type_name.as_deref(),
        };
        Value::from_datum(datum, &scope).map(Some)
    }

    /// Read an element
    ///
    /// Deleted nested table elements read as NULL.
    pub fn get(&self, index: u32) -> Result<Value> {
        Ok(self.element(index)?.unwrap_or(Value::Null))
    }

    /// Read an element and convert it
    pub fn get_as<T: FromValue>(&self, index: u32) -> Result<T> {
        T::from_value(&self.get(index)?)
    }

    /// Check whether the element at `index` exists
    pub fn exists(&self, index: u32) -> Result<bool> {
        if index >= self.size()? {
            return Ok(false);
        }
        Ok(self.element(index)?.is_some())
    }

    /// Check whether an element is NULL
    pub fn is_null(&self, index: u32) -> Result<bool> {
        Ok(self.get(index)?.is_null())
    }

    /// Overwrite an element
    pub fn set<V: Into<Value>>(&self, index: u32, value: V) -> Result<()> {
        let raw = self.handle.raw()?;
        let value = value.into();
        let datum = value.to_datum()?;
        check!(
            self.ctx("coll_set"),
            self.handle.env().native().coll_set(self.err(), raw, index, &datum)
        );
        drop(value);
        self.handle.mark_dirty();
        Ok(())
    }

    /// Set an element to NULL
    pub fn set_null(&self, index: u32) -> Result<()> {
        self.set(index, Value::Null)
    }

    /// Add an element at the end
    ///
    /// A VARRAY refuses to grow past its maximum.
    pub fn append<V: Into<Value>>(&self, value: V) -> Result<()> {
        let raw = self.handle.raw()?;
        let value = value.into();
        let datum = value.to_datum()?;
        check!(
            self.ctx("coll_append"),
            self.handle.env().native().coll_append(self.err(), raw, &datum)
        );
        drop(value);
        self.handle.mark_dirty();
        Ok(())
    }

    /// Remove `count` elements from the end
    pub fn trim(&self, count: u32) -> Result<()> {
        let raw = self.handle.raw()?;
        self.handle.invalidate_fetched_children();
        check!(
            self.ctx("coll_trim"),
            self.handle.env().native().coll_trim(self.err(), raw, count)
        );
        self.handle.mark_dirty();
        Ok(())
    }

    /// Remove every element
    pub fn clear(&self) -> Result<()> {
        let size = self.size()?;
        self.trim(size)
    }

    /// Delete one element of a nested table
    ///
    /// The slot stays: [`size`](Self::size) is unchanged while
    /// [`count`](Self::count) drops by one.
    pub fn delete(&self, index: u32) -> Result<()> {
        if self.kind()? == CollectionKind::Varray {
            return Err(Error::NotSupported(format!(
                "cannot delete single elements of VARRAY {}",
                self.type_info.name()
            )));
        }
        let raw = self.handle.raw()?;
        self.handle.invalidate_fetched_children();
        check!(
            self.ctx("coll_delete"),
            self.handle.env().native().coll_delete(self.err(), raw, index)
        );
        self.handle.mark_dirty();
        Ok(())
    }

    /// Every existing element, in index order
    pub fn values(&self) -> Result<Vec<Value>> {
        let size = self.size()?;
        let mut values = Vec::with_capacity(size as usize);
        for index in 0..size {
            if let Some(value) = self.element(index)? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("type", &self.type_info.name())
            .field("handle", &self.handle.id())
            .field("state", &self.handle.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::native::memory::MemoryClient;
    use crate::native::{AttrDesc, DataType};
    use crate::{ConnectParams, Environment, EnvironmentConfig};

    fn setup() -> (Environment, Connection) {
        let client = MemoryClient::new();
        client.define_collection("NUMS_T", CollectionDesc::varray(3, AttrDesc::new("", DataType::Numeric)));
        client.define_collection("TAGS_T", CollectionDesc::nested_table(AttrDesc::new("", DataType::Text)));
        let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(client)).unwrap();
        let conn = Connection::open(&env, &ConnectParams::new("db", "scott", "tiger")).unwrap();
        (env, conn)
    }

    #[test]
    fn test_describe_collection_type() {
        let (_env, conn) = setup();
        let info = TypeInfo::describe(&conn, "nums_t").unwrap();
        assert!(info.is_collection());
        assert!(info.attributes().is_empty());
        let desc = info.collection().unwrap();
        assert_eq!(desc.kind, CollectionKind::Varray);
        assert_eq!(desc.max, 3);
        assert_eq!(desc.element.data_type, DataType::Numeric);
    }

    #[test]
    fn test_varray_elements() {
        let (_env, conn) = setup();
        let nums = Collection::new(&TypeInfo::describe(&conn, "NUMS_T").unwrap()).unwrap();
        assert!(nums.is_empty().unwrap());
        assert_eq!(nums.max().unwrap(), 3);

        nums.append(1).unwrap();
        nums.append(2).unwrap();
        nums.append(Value::Null).unwrap();
        assert_eq!(nums.count().unwrap(), 3);
        assert!(nums.is_null(2).unwrap());

        nums.set(2, 30).unwrap();
        assert_eq!(nums.get_as::<i64>(2).unwrap(), 30);
        assert!(nums.append(4).unwrap_err().is_native(crate::constants::ora::SUBSCRIPT_OUTSIDE_LIMIT));
        assert!(nums.get(3).unwrap_err().is_native(crate::constants::ora::COLL_INDEX_OUT_OF_RANGE));

        nums.trim(1).unwrap();
        assert_eq!(nums.size().unwrap(), 2);
        assert!(matches!(nums.delete(0), Err(Error::NotSupported(_))));
        nums.clear().unwrap();
        assert!(nums.is_empty().unwrap());
    }

    #[test]
    fn test_nested_table_delete_leaves_gap() {
        let (_env, conn) = setup();
        let tags = Collection::new(&TypeInfo::describe(&conn, "TAGS_T").unwrap()).unwrap();
        for tag in ["a", "b", "c"] {
            tags.append(tag).unwrap();
        }
        tags.delete(1).unwrap();
        assert_eq!(tags.size().unwrap(), 3);
        assert_eq!(tags.count().unwrap(), 2);
        assert!(!tags.exists(1).unwrap());
        assert!(tags.exists(2).unwrap());
        assert!(!tags.exists(7).unwrap());
        assert!(tags.get(1).unwrap().is_null());

        let values: Vec<String> = tags
            .values()
            .unwrap()
            .iter()
            .map(|v| String::from_value(v).unwrap())
            .collect();
        assert_eq!(values, vec!["a", "c"]);
    }

    #[test]
    fn test_object_type_is_not_a_collection() {
        let client = MemoryClient::new();
        client.define_type("POINT_T", vec![AttrDesc::new("X", DataType::Numeric)]);
        let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(client)).unwrap();
        let conn = Connection::open(&env, &ConnectParams::new("db", "scott", "tiger")).unwrap();
        let info = TypeInfo::describe(&conn, "POINT_T").unwrap();
        assert!(!info.is_collection());
        assert!(matches!(Collection::new(&info), Err(Error::NotCompatible(_))));
    }

    #[test]
    fn test_collection_dies_with_connection() {
        let (env, conn) = setup();
        let nums = Collection::new(&TypeInfo::describe(&conn, "NUMS_T").unwrap()).unwrap();
        nums.append(1).unwrap();
        conn.close().unwrap();
        assert!(nums.count().unwrap_err().is_invalid_handle());
        assert_eq!(env.live_handles(), 0);
    }
}
