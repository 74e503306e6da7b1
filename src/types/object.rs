//! Named object types, object instances and references
//!
//! [`TypeInfo`] describes a database object or collection type. Descriptions are cached
//! per connection, so describing the same type twice returns the same
//! descriptor. [`Object`] and [`Reference`] are instances of a type: created
//! by the application (owned by the connection) or fetched from a result
//! set, an object attribute or a dequeued message (owned by that parent).

use std::fmt;
use std::sync::Arc;

use crate::connection::{Connection, SessionRef};
use crate::environment::EnvShared;
use crate::error::{Error, Result};
use crate::handle::{release_fn, Handle, HandleId, NewEntry};
use crate::native::{AttrDesc, CollectionDesc, HandleKind, RawHandle};
use crate::row::{FetchScope, FromValue, Value};
use crate::status::check;

struct TypeInner {
    name: String,
    attributes: Vec<AttrDesc>,
    collection: Option<CollectionDesc>,
    session: SessionRef,
}

/// Descriptor of a named object type
#[derive(Clone)]
pub struct TypeInfo {
    handle: Handle,
    inner: Arc<TypeInner>,
}

impl TypeInfo {
    /// Describe an object type, e.g. `"ADDRESS_T"` or `"HR.ADDRESS_T"`
    ///
    /// The pseudo type `"RAW"` describes raw queue payloads.
    pub fn describe(conn: &Connection, name: &str) -> Result<TypeInfo> {
        conn.raw()?;
        Self::cached(conn.shared(), &conn.session_ref(), name)
    }

    pub(crate) fn cached(env: &Arc<EnvShared>, session: &SessionRef, name: &str) -> Result<TypeInfo> {
        let key = name.trim().to_uppercase();
        if let Some(info) = session.inner.types.lock().get(&key) {
            if info.handle.is_valid() {
                return Ok(info.clone());
            }
        }

        let session_raw = session.raw(env)?;
        let mut tdo = RawHandle::NULL;
        let mut attributes = Vec::new();
        let mut collection = None;
        check!(
            session.ctx(env, "type_describe"),
            env.native().type_describe(
                session_raw,
                session.err(),
                &key,
                &mut tdo,
                &mut attributes,
                &mut collection
            )
        );

        let release = release_fn(move |api, _| api.handle_free(tdo, HandleKind::TypeInfo));
        let entry = NewEntry::allocated(tdo, HandleKind::TypeInfo, release).child_of(session.id);
        let handle = Handle::register(env, entry)?;
        tracing::debug!(
            type_name = %key,
            attributes = attributes.len(),
            collection = collection.is_some(),
            "Object type described"
        );

        let info = TypeInfo {
            handle,
            inner: Arc::new(TypeInner {
                name: key.clone(),
                attributes,
                collection,
                session: session.clone(),
            }),
        };
        session.inner.types.lock().insert(key, info.clone());
        Ok(info)
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Upper-case type name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attribute descriptions, in declaration order
    pub fn attributes(&self) -> &[AttrDesc] {
        &self.inner.attributes
    }

    /// Look up an attribute by case-insensitive name
    pub fn attribute(&self, name: &str) -> Option<&AttrDesc> {
        self.inner
            .attributes
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
    }

    /// Check for the raw queue payload pseudo type
    pub fn is_raw(&self) -> bool {
        self.inner.name == "RAW"
    }

    /// Check whether this is a VARRAY or nested table type
    pub fn is_collection(&self) -> bool {
        self.inner.collection.is_some()
    }

    /// Collection kind, bound and element type of a collection type
    pub fn collection(&self) -> Option<&CollectionDesc> {
        self.inner.collection.as_ref()
    }

    /// Connection the type was described on
    pub fn connection(&self) -> Result<Connection> {
        self.inner.session.connection(self.handle.env())
    }

    pub(crate) fn session(&self) -> &SessionRef {
        &self.inner.session
    }

    pub(crate) fn resolve(&self) -> Result<(&Arc<EnvShared>, RawHandle, RawHandle)> {
        let tdo = self.handle.raw()?;
        let env = self.handle.env();
        let session = self.inner.session.raw(env)?;
        Ok((env, session, tdo))
    }

    pub(crate) fn same_type(&self, other: &TypeInfo) -> bool {
        self.inner.name == other.inner.name
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.inner.name)
            .field("attributes", &self.inner.attributes.len())
            .field("collection", &self.inner.collection)
            .finish()
    }
}

/// Instance of an object type
#[derive(Clone)]
pub struct Object {
    handle: Handle,
    type_info: TypeInfo,
}

impl Object {
    /// Create a new, atomically null instance
    pub fn new(type_info: &TypeInfo) -> Result<Object> {
        if type_info.is_collection() {
            return Err(Error::NotCompatible(format!(
                "{} is a collection type",
                type_info.name()
            )));
        }
        let (env, session, tdo) = type_info.resolve()?;
        let err = type_info.session().err();
        let mut raw = RawHandle::NULL;
        check!(
            type_info.session().ctx(env, "object_new").on(HandleKind::TypeInfo),
            env.native().object_new(session, err, tdo, &mut raw)
        );

        let release = release_fn(move |api, _| api.handle_free(raw, HandleKind::Object));
        let entry = NewEntry::allocated(raw, HandleKind::Object, release).child_of(type_info.session().id);
        let handle = Handle::register(env, entry)?;
        Ok(Object {
            handle,
            type_info: type_info.clone(),
        })
    }

    pub(crate) fn fetched(
        env: &Arc<EnvShared>,
        _session: &SessionRef,
        raw: RawHandle,
        type_info: TypeInfo,
        parent: HandleId,
    ) -> Result<Object> {
        let handle = Handle::register(env, NewEntry::fetched(raw, HandleKind::Object, parent))?;
        Ok(Object { handle, type_info })
    }

    fn pinned(env: &Arc<EnvShared>, raw: RawHandle, type_info: TypeInfo, parent: HandleId) -> Result<Object> {
        let release = release_fn(move |api, env_err| api.ref_unpin(env_err, raw));
        let entry = NewEntry::fetched(raw, HandleKind::Object, parent).with_release(release);
        let handle = Handle::register(env, entry)?;
        Ok(Object { handle, type_info })
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Type of the instance
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// Read an attribute
    ///
    /// Nested objects, LOBs and references are owned by this instance and
    /// stay valid as long as it does.
    pub fn get(&self, name: &str) -> Result<Value> {
        let attr = self.attribute(name)?;
        let raw = self.handle.raw()?;
        let env = self.handle.env();
        let session = self.type_info.session();

        let mut datum = crate::native::Datum::Null;
        check!(
            session.ctx(env, "object_get").on(HandleKind::Object),
            env.native().object_get(session.err(), raw, &attr.name, &mut datum)
        );
        let scope = FetchScope {
            env,
            session,
            parent: self.handle.id(),
            type_name: attr.type_name.as_deref(),
        };
        Value::from_datum(datum, &scope)
    }

    /// Read an attribute and convert it
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(&self.get(name)?)
    }

    /// Write an attribute
    pub fn set<V: Into<Value>>(&self, name: &str, value: V) -> Result<()> {
        let attr = self.attribute(name)?;
        let raw = self.handle.raw()?;
        // the value owns the handles the datum points at
        let value = value.into();
        let datum = value.to_datum()?;
        let env = self.handle.env();
        let session = self.type_info.session();
        check!(
            session.ctx(env, "object_set").on(HandleKind::Object),
            env.native().object_set(session.err(), raw, &attr.name, &datum)
        );
        drop(value);
        self.handle.mark_dirty();
        Ok(())
    }

    /// Check whether an attribute is NULL
    pub fn is_null(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_null())
    }

    /// Set an attribute to NULL
    pub fn set_null(&self, name: &str) -> Result<()> {
        self.set(name, Value::Null)
    }

    /// Create a reference pointing to this instance
    pub fn reference(&self) -> Result<Reference> {
        let raw = self.handle.raw()?;
        let (env, session, _) = self.type_info.resolve()?;
        let err = self.type_info.session().err();
        let mut reference = RawHandle::NULL;
        check!(
            self.type_info.session().ctx(env, "object_get_ref").on(HandleKind::Object),
            env.native().object_get_ref(session, err, raw, &mut reference)
        );
        Reference::allocated(env, reference, &self.type_info)
    }

    fn attribute(&self, name: &str) -> Result<AttrDesc> {
        self.type_info.attribute(name).cloned().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "type {} has no attribute {}",
                self.type_info.name(),
                name
            ))
        })
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.type_info.name())
            .field("handle", &self.handle.id())
            .field("state", &self.handle.state())
            .finish()
    }
}

/// Reference (REF) to an object instance
#[derive(Clone)]
pub struct Reference {
    handle: Handle,
    type_info: TypeInfo,
}

impl Reference {
    /// Create a null reference for the given type
    pub fn new(type_info: &TypeInfo) -> Result<Reference> {
        let (env, session, tdo) = type_info.resolve()?;
        let mut raw = RawHandle::NULL;
        check!(
            type_info.session().ctx(env, "ref_new").on(HandleKind::TypeInfo),
            env.native()
                .ref_new(session, type_info.session().err(), tdo, &mut raw)
        );
        Self::allocated(env, raw, type_info)
    }

    fn allocated(env: &Arc<EnvShared>, raw: RawHandle, type_info: &TypeInfo) -> Result<Reference> {
        let release = release_fn(move |api, _| api.handle_free(raw, HandleKind::Reference));
        let entry =
            NewEntry::allocated(raw, HandleKind::Reference, release).child_of(type_info.session().id);
        let handle = Handle::register(env, entry)?;
        Ok(Reference {
            handle,
            type_info: type_info.clone(),
        })
    }

    pub(crate) fn fetched(
        env: &Arc<EnvShared>,
        _session: &SessionRef,
        raw: RawHandle,
        type_info: TypeInfo,
        parent: HandleId,
    ) -> Result<Reference> {
        let handle = Handle::register(env, NewEntry::fetched(raw, HandleKind::Reference, parent))?;
        Ok(Reference { handle, type_info })
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Type of the referenced instance
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// Check whether the reference points nowhere
    pub fn is_null(&self) -> Result<bool> {
        let raw = self.handle.raw()?;
        Ok(self.handle.env().native().ref_is_null(raw))
    }

    /// Make the reference null
    pub fn set_null(&self) -> Result<()> {
        let raw = self.handle.raw()?;
        let env = self.handle.env();
        let session = self.type_info.session();
        check!(
            session.ctx(env, "ref_clear").on(HandleKind::Reference),
            env.native().ref_clear(session.err(), raw)
        );
        self.handle.invalidate_fetched_children();
        self.handle.mark_dirty();
        Ok(())
    }

    /// Pin the referenced instance
    ///
    /// The instance belongs to the reference: pinning again, clearing the
    /// reference or dropping it invalidates the previously pinned instance.
    pub fn object(&self) -> Result<Object> {
        let raw = self.handle.raw()?;
        let (env, session, _) = self.type_info.resolve()?;
        self.handle.invalidate_fetched_children();

        let mut object = RawHandle::NULL;
        check!(
            self.type_info.session().ctx(env, "ref_pin").on(HandleKind::Reference),
            env.native()
                .ref_pin(session, self.type_info.session().err(), raw, &mut object)
        );
        Object::pinned(env, object, self.type_info.clone(), self.handle.id())
    }

    /// Hexadecimal text form
    pub fn to_hex(&self) -> Result<String> {
        let raw = self.handle.raw()?;
        let env = self.handle.env();
        let session = self.type_info.session();
        let mut text = String::new();
        check!(
            session.ctx(env, "ref_to_hex").on(HandleKind::Reference),
            env.native().ref_to_hex(session.err(), raw, &mut text)
        );
        Ok(text)
    }

    /// Make this reference point where `other` points
    pub fn assign(&self, other: &Reference) -> Result<()> {
        if !self.type_info.same_type(&other.type_info) {
            return Err(Error::NotCompatible(format!(
                "cannot assign a REF {} to a REF {}",
                other.type_info.name(),
                self.type_info.name()
            )));
        }
        let (source, target) = (other.handle.raw()?, self.handle.raw()?);
        let env = self.handle.env();
        let session = self.type_info.session();
        check!(
            session.ctx(env, "ref_assign").on(HandleKind::Reference),
            env.native().ref_assign(session.err(), source, target)
        );
        self.handle.invalidate_fetched_children();
        self.handle.mark_dirty();
        Ok(())
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_hex() {
            Ok(hex) => f.write_str(&hex),
            Err(_) => f.write_str("<invalid reference>"),
        }
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("type", &self.type_info.name())
            .field("handle", &self.handle.id())
            .finish()
    }
}
