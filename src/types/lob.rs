//! LOB (Large Object) locators
//!
//! A [`Lob`] is either a temporary LOB created by the application, which
//! is freed when the last proxy goes away, or a locator fetched from a
//! result set, which belongs to the result set and becomes invalid when the
//! cursor moves on.
//!
//! CLOB offsets and amounts count characters, BLOB ones count bytes.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::connection::{Connection, SessionRef};
use crate::environment::EnvShared;
use crate::error::{Error, Result};
use crate::handle::{release_fn, Handle, HandleId, NewEntry};
use crate::native::{Attr, AttrValue, HandleKind, LobKind, RawHandle};
use crate::status::check;

/// Result of reading LOB data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobData {
    /// String data (from CLOB)
    String(String),
    /// Binary data (from BLOB)
    Bytes(Bytes),
}

impl LobData {
    /// Get as string (for CLOB)
    pub fn as_string(&self) -> Option<&String> {
        match self {
            LobData::String(s) => Some(s),
            LobData::Bytes(_) => None,
        }
    }

    /// Get as bytes (for BLOB)
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            LobData::Bytes(b) => Some(b),
            LobData::String(_) => None,
        }
    }

    /// Convert to string (consumes self)
    pub fn into_string(self) -> Option<String> {
        match self {
            LobData::String(s) => Some(s),
            LobData::Bytes(_) => None,
        }
    }

    /// Convert to bytes (consumes self)
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            LobData::Bytes(b) => Some(b),
            LobData::String(_) => None,
        }
    }

    /// Kind of LOB this data belongs in
    pub fn kind(&self) -> LobKind {
        match self {
            LobData::String(_) => LobKind::Clob,
            LobData::Bytes(_) => LobKind::Blob,
        }
    }

    /// Length in characters (CLOB) or bytes (BLOB)
    pub fn len(&self) -> usize {
        match self {
            LobData::String(s) => s.chars().count(),
            LobData::Bytes(b) => b.len(),
        }
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_raw(&self) -> &[u8] {
        match self {
            LobData::String(s) => s.as_bytes(),
            LobData::Bytes(b) => b,
        }
    }
}

impl From<&str> for LobData {
    fn from(s: &str) -> Self {
        LobData::String(s.to_string())
    }
}

impl From<String> for LobData {
    fn from(s: String) -> Self {
        LobData::String(s)
    }
}

impl From<&[u8]> for LobData {
    fn from(b: &[u8]) -> Self {
        LobData::Bytes(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for LobData {
    fn from(b: Vec<u8>) -> Self {
        LobData::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for LobData {
    fn from(b: Bytes) -> Self {
        LobData::Bytes(b)
    }
}

struct LobInner {
    session: SessionRef,
    kind: LobKind,
    offset: Mutex<u64>,
}

/// Shared proxy for a LOB locator
#[derive(Clone)]
pub struct Lob {
    handle: Handle,
    inner: Arc<LobInner>,
}

impl Lob {
    /// Create an empty temporary LOB, freed when the last proxy is dropped
    pub fn temporary(conn: &Connection, kind: LobKind) -> Result<Lob> {
        let session = conn.raw()?;
        let shared = conn.shared();
        let mut raw = RawHandle::NULL;
        check!(
            conn.ctx("lob_create_temporary"),
            shared
                .native()
                .lob_create_temporary(session, conn.err(), kind, &mut raw)
        );

        let release = release_fn(move |api, env_err| api.lob_free_temporary(session, env_err, raw));
        let entry = NewEntry::allocated(raw, HandleKind::Lob, release).child_of(conn.handle().id());
        let handle = Handle::register(shared, entry)?;
        tracing::trace!(lob = %raw, ?kind, "Temporary LOB created");
        Ok(Self::wrap(handle, conn.session_ref(), kind))
    }

    /// Wrap a locator handed out by `parent`
    pub(crate) fn fetched(
        env: &Arc<EnvShared>,
        session: &SessionRef,
        raw: RawHandle,
        kind: LobKind,
        parent: HandleId,
    ) -> Result<Lob> {
        let handle = Handle::register(env, NewEntry::fetched(raw, HandleKind::Lob, parent))?;
        Ok(Self::wrap(handle, session.clone(), kind))
    }

    fn wrap(handle: Handle, session: SessionRef, kind: LobKind) -> Lob {
        Lob {
            handle,
            inner: Arc::new(LobInner {
                session,
                kind,
                offset: Mutex::new(0),
            }),
        }
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// CLOB or BLOB
    pub fn kind(&self) -> LobKind {
        self.inner.kind
    }

    /// Connection the LOB belongs to
    pub fn connection(&self) -> Result<Connection> {
        self.inner.session.connection(self.handle.env())
    }

    /// Read up to `amount` characters (CLOB) or bytes (BLOB) at the current
    /// offset and advance it
    pub fn read(&self, amount: u64) -> Result<LobData> {
        let mut offset = self.inner.offset.lock();
        let data = self.read_at(*offset, amount)?;
        *offset += data.len() as u64;
        Ok(data)
    }

    /// Read from a CLOB
    pub fn read_string(&self, amount: u64) -> Result<String> {
        self.expect_kind(LobKind::Clob)?;
        self.read(amount)?
            .into_string()
            .ok_or_else(|| Error::Internal("CLOB read returned bytes".to_string()))
    }

    /// Read from a BLOB
    pub fn read_bytes(&self, amount: u64) -> Result<Bytes> {
        self.expect_kind(LobKind::Blob)?;
        self.read(amount)?
            .into_bytes()
            .ok_or_else(|| Error::Internal("BLOB read returned a string".to_string()))
    }

    /// Whole content of a CLOB; the offset is left alone
    pub fn read_string_all(&self) -> Result<String> {
        self.expect_kind(LobKind::Clob)?;
        let length = self.length()?;
        self.read_at(0, length)?
            .into_string()
            .ok_or_else(|| Error::Internal("CLOB read returned bytes".to_string()))
    }

    /// Whole content of a BLOB; the offset is left alone
    pub fn read_bytes_all(&self) -> Result<Bytes> {
        self.expect_kind(LobKind::Blob)?;
        let length = self.length()?;
        self.read_at(0, length)?
            .into_bytes()
            .ok_or_else(|| Error::Internal("BLOB read returned a string".to_string()))
    }

    fn read_at(&self, offset: u64, amount: u64) -> Result<LobData> {
        let (env, session, raw) = self.resolve()?;
        let mut buf = Vec::new();
        check!(
            self.inner.session.ctx(env, "lob_read").on(HandleKind::Lob),
            env.native()
                .lob_read(session, self.inner.session.err(), raw, offset, amount, &mut buf)
        );
        match self.inner.kind {
            LobKind::Clob => String::from_utf8(buf)
                .map(LobData::String)
                .map_err(|e| Error::Internal(format!("CLOB content is not UTF-8: {}", e))),
            LobKind::Blob => Ok(LobData::Bytes(Bytes::from(buf))),
        }
    }

    /// Write at the current offset and advance it, returning the amount written
    pub fn write<D: Into<LobData>>(&self, data: D) -> Result<u64> {
        let data = data.into();
        self.expect_kind(data.kind())?;
        let (env, session, raw) = self.resolve()?;

        let mut offset = self.inner.offset.lock();
        let mut written = 0u64;
        check!(
            self.inner.session.ctx(env, "lob_write").on(HandleKind::Lob),
            env.native().lob_write(
                session,
                self.inner.session.err(),
                raw,
                *offset,
                data.as_raw(),
                &mut written
            )
        );
        *offset += written;
        self.handle.mark_dirty();
        Ok(written)
    }

    /// Append at the end; the offset is left alone
    pub fn append<D: Into<LobData>>(&self, data: D) -> Result<()> {
        let data = data.into();
        self.expect_kind(data.kind())?;
        let (env, session, raw) = self.resolve()?;
        check!(
            self.inner.session.ctx(env, "lob_append").on(HandleKind::Lob),
            env.native()
                .lob_append(session, self.inner.session.err(), raw, data.as_raw())
        );
        self.handle.mark_dirty();
        Ok(())
    }

    /// Move the offset, returning the new position
    ///
    /// Seeking past the end is allowed; seeking before the start is not.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let mut offset = self.inner.offset.lock();
        let (base, delta) = match pos {
            SeekFrom::Start(n) => {
                *offset = n;
                return Ok(n);
            }
            SeekFrom::Current(delta) => (*offset, delta),
            SeekFrom::End(delta) => (self.length()?, delta),
        };
        let target = i128::from(base) + i128::from(delta);
        let target = u64::try_from(target)
            .map_err(|_| Error::InvalidArgument(format!("seek to negative offset {}", target)))?;
        *offset = target;
        Ok(target)
    }

    /// Current offset
    pub fn offset(&self) -> u64 {
        *self.inner.offset.lock()
    }

    /// Length in characters (CLOB) or bytes (BLOB)
    pub fn length(&self) -> Result<u64> {
        let (env, session, raw) = self.resolve()?;
        let mut length = 0u64;
        check!(
            self.inner.session.ctx(env, "lob_length").on(HandleKind::Lob),
            env.native()
                .lob_length(session, self.inner.session.err(), raw, &mut length)
        );
        Ok(length)
    }

    /// Truncate to `length`; the offset is clamped to the new end
    pub fn truncate(&self, length: u64) -> Result<()> {
        let (env, session, raw) = self.resolve()?;
        check!(
            self.inner.session.ctx(env, "lob_trim").on(HandleKind::Lob),
            env.native()
                .lob_trim(session, self.inner.session.err(), raw, length)
        );
        self.handle.mark_dirty();
        let mut offset = self.inner.offset.lock();
        *offset = (*offset).min(length);
        Ok(())
    }

    /// Check whether this is a temporary LOB
    pub fn is_temporary(&self) -> Result<bool> {
        let value = self.attr(Attr::LobIsTemporary)?;
        value.as_bool().ok_or_else(|| Error::type_mismatch("boolean", value))
    }

    /// Optimal read/write size
    pub fn chunk_size(&self) -> Result<u32> {
        let value = self.attr(Attr::LobChunkSize)?;
        value
            .as_u32()
            .ok_or_else(|| Error::type_mismatch("unsigned integer", value))
    }

    /// Free the LOB now; remaining clones become invalid
    pub fn close(&self) -> Result<()> {
        self.handle.release("lob_free_temporary")
    }

    fn attr(&self, attr: Attr) -> Result<AttrValue> {
        let (env, _, raw) = self.resolve()?;
        let mut value = AttrValue::None;
        check!(
            self.inner.session.ctx(env, "attr_get").on(HandleKind::Lob),
            env.native()
                .attr_get(raw, HandleKind::Lob, attr, self.inner.session.err(), &mut value)
        );
        Ok(value)
    }

    fn resolve(&self) -> Result<(&Arc<EnvShared>, RawHandle, RawHandle)> {
        let raw = self.handle.raw()?;
        let env = self.handle.env();
        let session = self.inner.session.raw(env)?;
        Ok((env, session, raw))
    }

    fn expect_kind(&self, kind: LobKind) -> Result<()> {
        if self.inner.kind == kind {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: match self.inner.kind {
                    LobKind::Clob => "character data",
                    LobKind::Blob => "binary data",
                },
                actual: format!("{:?} data", kind),
            })
        }
    }
}

impl PartialEq for Lob {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for Lob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lob")
            .field("kind", &self.inner.kind)
            .field("offset", &self.offset())
            .field("handle", &self.handle.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::memory::MemoryClient;
    use crate::{ConnectParams, Environment, EnvironmentConfig};

    fn setup() -> (Environment, Connection) {
        let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(MemoryClient::new())).unwrap();
        let conn = Connection::open(&env, &ConnectParams::new("db", "scott", "tiger")).unwrap();
        (env, conn)
    }

    #[test]
    fn test_lob_data_accessors() {
        let data = LobData::from("héllo");
        assert_eq!(data.len(), 5);
        assert_eq!(data.kind(), LobKind::Clob);
        assert_eq!(data.as_string().map(String::as_str), Some("héllo"));
        assert!(data.as_bytes().is_none());

        let data = LobData::from(vec![1u8, 2, 3]);
        assert_eq!(data.len(), 3);
        assert_eq!(data.clone().into_bytes(), Some(Bytes::from_static(&[1, 2, 3])));
        assert!(data.into_string().is_none());
    }

    #[test]
    fn test_clob_write_seek_read() {
        let (_env, conn) = setup();
        let lob = Lob::temporary(&conn, LobKind::Clob).unwrap();
        assert!(lob.is_temporary().unwrap());

        assert_eq!(lob.write("hello world").unwrap(), 11);
        assert_eq!(lob.offset(), 11);
        assert_eq!(lob.length().unwrap(), 11);

        lob.seek(SeekFrom::Start(6)).unwrap();
        assert_eq!(lob.read_string(5).unwrap(), "world");
        assert_eq!(lob.seek(SeekFrom::Current(-5)).unwrap(), 6);
        assert_eq!(lob.seek(SeekFrom::End(-11)).unwrap(), 0);
        assert!(lob.seek(SeekFrom::Current(-1)).is_err());
        assert_eq!(lob.read_string_all().unwrap(), "hello world");
    }

    #[test]
    fn test_blob_append_truncate() {
        let (_env, conn) = setup();
        let lob = Lob::temporary(&conn, LobKind::Blob).unwrap();
        lob.append(vec![1u8, 2, 3]).unwrap();
        lob.append(&[4u8, 5][..]).unwrap();
        assert_eq!(lob.length().unwrap(), 5);

        lob.seek(SeekFrom::End(0)).unwrap();
        lob.truncate(2).unwrap();
        assert_eq!(lob.offset(), 2);
        assert_eq!(lob.read_bytes_all().unwrap(), Bytes::from_static(&[1, 2]));
    }

    #[test]
    fn test_kind_mismatch() {
        let (_env, conn) = setup();
        let lob = Lob::temporary(&conn, LobKind::Blob).unwrap();
        assert!(matches!(lob.write("text"), Err(Error::TypeMismatch { .. })));
        assert!(matches!(lob.read_string(1), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_close_invalidates_clones() {
        let (env, conn) = setup();
        let lob = Lob::temporary(&conn, LobKind::Clob).unwrap();
        let copy = lob.clone();
        assert_eq!(env.live_handles(), 2);
        lob.close().unwrap();
        assert!(copy.length().unwrap_err().is_invalid_handle());
        assert_eq!(env.live_handles(), 1);
    }

    #[test]
    fn test_lob_dies_with_connection() {
        let (_env, conn) = setup();
        let lob = Lob::temporary(&conn, LobKind::Clob).unwrap();
        conn.close().unwrap();
        assert!(lob.write("x").unwrap_err().is_invalid_handle());
    }
}
