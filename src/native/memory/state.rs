//! Handles, tables, LOBs, objects and queues of the emulated client

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::NaiveDateTime;

use super::ora;
use super::sql::{self, ColumnDef, Sql};
use crate::callback::ContextKey;
use crate::constants::{self, ora as code};
use crate::native::{
    Attr, AttrDesc, AttrValue, CollectionDesc, CollectionKind, ColumnDesc, DataType, Datum, Diagnostic, HandleKind,
    LobKind, Namespace, NativeNotification, NotificationSink, RawHandle, SubscriptionSpec,
};
use crate::subscription::{ChangeTypes, EventType, ObjectEvent};

/// Failure of an emulated call
#[derive(Debug)]
pub(super) enum Fault {
    /// Recorded on the call's error descriptor, status `Error`
    Diag(Diagnostic),
    /// Status `InvalidHandle`, nothing recorded
    Invalid,
}

impl From<Diagnostic> for Fault {
    fn from(d: Diagnostic) -> Self {
        Fault::Diag(d)
    }
}

pub(super) type Res<T> = std::result::Result<T, Fault>;

/// Notification waiting to be handed to a sink
pub(super) type Delivery = (Arc<dyn NotificationSink>, ContextKey, NativeNotification);

pub(super) struct Node {
    pub kind: HandleKind,
    pub parent: Option<u64>,
    pub children: Vec<u64>,
    pub attrs: HashMap<Attr, AttrValue>,
    pub body: Body,
}

pub(super) enum Body {
    Plain,
    Env(EnvBody),
    Session(SessionBody),
    Pool(PoolBody),
    Statement(Box<StmtBody>),
    Lob { kind: LobKind, id: u64, temporary: bool },
    Type(String),
    Object { oid: u64, pinned: bool },
    Ref { type_name: String, target: Option<u64> },
    Collection { cid: u64 },
    Subscription(SubBody),
    Dequeue { browsed: HashSet<[u8; 16]> },
}

pub(super) struct EnvBody {
    pub sink: Arc<dyn NotificationSink>,
    pub ha_key: Option<ContextKey>,
}

pub(super) struct SessionBody {
    pub env: u64,
    pub database: String,
    pub user: String,
    pub pool: Option<u64>,
    pub undo: Vec<Undo>,
    pub changes: Vec<Change>,
    pub cancel: Arc<AtomicBool>,
    pub failover_key: Option<ContextKey>,
    /// DBMS_OUTPUT buffer, `None` while disabled
    pub output: Option<OutputBuffer>,
}

/// Lines written with DBMS_OUTPUT.PUT_LINE and not read back yet
pub(super) struct OutputBuffer {
    lines: VecDeque<String>,
    /// Byte limit, `None` for unlimited
    limit: Option<usize>,
    used: usize,
}

impl OutputBuffer {
    pub fn new(limit: Option<usize>) -> OutputBuffer {
        OutputBuffer {
            lines: VecDeque::new(),
            limit,
            used: 0,
        }
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn put_line(&mut self, line: String) -> Res<()> {
        if let Some(limit) = self.limit {
            if self.used + line.len() > limit {
                return Err(ora(
                    code::SERVER_OUTPUT_OVERFLOW,
                    format!("ORU-10027: buffer overflow, limit of {} bytes", limit),
                )
                .into());
            }
        }
        self.used += line.len();
        self.lines.push_back(line);
        Ok(())
    }

    pub fn get_line(&mut self) -> Option<String> {
        let line = self.lines.pop_front()?;
        self.used -= line.len();
        Some(line)
    }
}

pub(super) struct PoolBody {
    pub env: u64,
    pub database: String,
    pub user: String,
    pub busy: u32,
    pub open: u32,
}

#[derive(Default)]
pub(super) struct StmtBody {
    pub session: u64,
    pub sql: Option<Sql>,
    /// Parse failure of the prepared text, reported at execution
    pub parse_error: Option<Diagnostic>,
    pub binds: HashMap<String, Vec<Datum>>,
    pub outs: HashMap<String, Datum>,
    pub result: Option<Materialized>,
    pub row_count: u64,
    pub batch_errors: Vec<Diagnostic>,
    /// Locators and objects handed out for the current row or out binds
    pub scratch: Vec<u64>,
    /// The last execution asked for a scrollable cursor
    pub scrollable: bool,
}

pub(super) struct SubBody {
    pub env: u64,
    pub spec: SubscriptionSpec,
    pub key: ContextKey,
    pub tables: HashSet<String>,
}

/// Rows of an executed query
pub(super) struct Materialized {
    pub columns: Vec<ColumnDesc>,
    pub rows: Vec<Vec<Cell>>,
    /// 1-based position of the current row: 0 before the first row,
    /// `rows.len() + 1` after the last
    pub position: usize,
    pub current: Option<Vec<Cell>>,
}

impl Materialized {
    /// Move to a 1-based row position, returning false when it does not exist
    pub fn seek(&mut self, target: i64) -> bool {
        let len = self.rows.len();
        match usize::try_from(target) {
            Ok(pos) if (1..=len).contains(&pos) => {
                self.position = pos;
                self.current = Some(self.rows[pos - 1].clone());
                true
            }
            _ => {
                self.position = if target < 1 { 0 } else { len + 1 };
                self.current = None;
                false
            }
        }
    }
}

/// Stored column or attribute value
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Cell {
    Value(Datum),
    Lob(LobKind, u64),
    Object(u64),
    Ref(Option<u64>),
    Collection(u64),
}

impl Cell {
    pub fn null() -> Cell {
        Cell::Value(Datum::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Value(Datum::Null) | Cell::Ref(None))
    }
}

pub(super) struct Table {
    pub columns: Vec<ColumnDef>,
    pub rows: BTreeMap<u64, Vec<Cell>>,
}

pub(super) enum LobBody {
    Chars(Vec<char>),
    Bytes(Vec<u8>),
}

impl LobBody {
    fn empty(kind: LobKind) -> LobBody {
        match kind {
            LobKind::Clob => LobBody::Chars(Vec::new()),
            LobKind::Blob => LobBody::Bytes(Vec::new()),
        }
    }

    fn len(&self) -> u64 {
        match self {
            LobBody::Chars(c) => c.len() as u64,
            LobBody::Bytes(b) => b.len() as u64,
        }
    }

    fn clone_body(&self) -> LobBody {
        match self {
            LobBody::Chars(c) => LobBody::Chars(c.clone()),
            LobBody::Bytes(b) => LobBody::Bytes(b.clone()),
        }
    }
}

pub(super) struct ObjData {
    pub type_name: String,
    pub attrs: Vec<(AttrDesc, Cell)>,
}

pub(super) struct CollData {
    pub type_name: String,
    /// `None` marks a deleted nested table element
    pub elements: Vec<Option<Cell>>,
}

pub(super) enum Payload {
    Null,
    Raw(Vec<u8>),
    Object(u64),
}

pub(super) struct QMessage {
    pub id: [u8; 16],
    pub seq: u64,
    pub payload: Payload,
    pub priority: i32,
    pub correlation: String,
    pub delay: i32,
    pub expiration: i32,
    pub exception_queue: String,
    pub enqueue_time: NaiveDateTime,
    pub attempts: u32,
    pub sender: Option<(String, String)>,
}

pub(super) enum Undo {
    Insert { table: String, rowid: u64 },
    Update { table: String, rowid: u64, old: Vec<Cell> },
    Delete { table: String, rowid: u64, old: Vec<Cell> },
}

pub(super) struct Change {
    pub table: String,
    pub event: ObjectEvent,
    pub rowid: Option<u64>,
}

pub(super) fn rowid_text(rowid: u64) -> String {
    format!("AAAMEMAAB{:09X}", rowid)
}

/// Injected result for the next invocation of an entry point
pub(super) struct Injected {
    pub fail: bool,
    pub diagnostic: Diagnostic,
}

pub(super) struct State {
    next_raw: u64,
    next_id: u64,
    pub nodes: HashMap<u64, Node>,
    pub diags: HashMap<u64, Vec<Diagnostic>>,
    pub frees: HashMap<u64, usize>,
    pub double_frees: usize,
    pub injected: HashMap<String, Injected>,
    pub tables: HashMap<String, Table>,
    pub types: HashMap<String, Vec<AttrDesc>>,
    pub coll_types: HashMap<String, CollectionDesc>,
    pub lobs: HashMap<u64, LobBody>,
    pub objects: HashMap<u64, ObjData>,
    pub collections: HashMap<u64, CollData>,
    pub queues: HashMap<String, Vec<QMessage>>,
}

impl State {
    pub fn new() -> State {
        State {
            next_raw: 0x1000,
            next_id: 1,
            nodes: HashMap::new(),
            diags: HashMap::new(),
            frees: HashMap::new(),
            double_frees: 0,
            injected: HashMap::new(),
            tables: HashMap::new(),
            types: HashMap::new(),
            coll_types: HashMap::new(),
            lobs: HashMap::new(),
            objects: HashMap::new(),
            collections: HashMap::new(),
            queues: HashMap::new(),
        }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ------------------------------------------------------------------ nodes

    pub fn alloc(&mut self, kind: HandleKind, parent: Option<u64>, body: Body) -> u64 {
        let raw = self.next_raw;
        self.next_raw += 0x10;
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.push(raw);
        }
        self.nodes.insert(
            raw,
            Node {
                kind,
                parent,
                children: Vec::new(),
                attrs: HashMap::new(),
                body,
            },
        );
        raw
    }

    pub fn node(&self, raw: u64, kind: HandleKind) -> Res<&Node> {
        match self.nodes.get(&raw) {
            Some(node) if node.kind == kind => Ok(node),
            _ => Err(Fault::Invalid),
        }
    }

    pub fn node_mut(&mut self, raw: u64, kind: HandleKind) -> Res<&mut Node> {
        match self.nodes.get_mut(&raw) {
            Some(node) if node.kind == kind => Ok(node),
            _ => Err(Fault::Invalid),
        }
    }

    /// Remove a node and everything allocated under it
    pub fn remove(&mut self, raw: u64) {
        let Some(node) = self.nodes.remove(&raw) else {
            return;
        };
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != raw);
        }
        let mut stack = node.children.clone();
        self.dispose(raw, &node);
        while let Some(child) = stack.pop() {
            if let Some(node) = self.nodes.remove(&child) {
                stack.extend(node.children.iter().copied());
                self.dispose(child, &node);
            }
        }
    }

    fn dispose(&mut self, raw: u64, node: &Node) {
        match &node.body {
            Body::Lob {
                id, temporary: true, ..
            } => {
                self.lobs.remove(id);
            }
            Body::Plain if node.kind == HandleKind::Error => {
                self.diags.remove(&raw);
            }
            _ => {}
        }
    }

    /// Free a handle, counting frees for leak and double-free checks
    pub fn free(&mut self, raw: u64, kind: HandleKind) -> Res<()> {
        match self.nodes.get(&raw) {
            None => {
                self.double_frees += 1;
                Err(Fault::Invalid)
            }
            Some(node) if node.kind != kind => Err(Fault::Invalid),
            Some(_) => {
                self.remove(raw);
                *self.frees.entry(raw).or_insert(0) += 1;
                Ok(())
            }
        }
    }

    pub fn record(&mut self, err: u64, diagnostic: Diagnostic) {
        self.diags.insert(err, vec![diagnostic]);
    }

    pub fn env(&self, raw: u64) -> Res<&EnvBody> {
        match self.nodes.get(&raw).map(|n| &n.body) {
            Some(Body::Env(env)) => Ok(env),
            _ => Err(Fault::Invalid),
        }
    }

    pub fn session(&self, raw: u64) -> Res<&SessionBody> {
        match self.nodes.get(&raw).map(|n| &n.body) {
            Some(Body::Session(s)) => Ok(s),
            _ => Err(Fault::Invalid),
        }
    }

    pub fn session_mut(&mut self, raw: u64) -> Res<&mut SessionBody> {
        match self.nodes.get_mut(&raw).map(|n| &mut n.body) {
            Some(Body::Session(s)) => Ok(s),
            _ => Err(Fault::Invalid),
        }
    }

    pub fn pool_mut(&mut self, raw: u64) -> Res<&mut PoolBody> {
        match self.nodes.get_mut(&raw).map(|n| &mut n.body) {
            Some(Body::Pool(p)) => Ok(p),
            _ => Err(Fault::Invalid),
        }
    }

    pub fn stmt(&self, raw: u64) -> Res<&StmtBody> {
        match self.nodes.get(&raw).map(|n| &n.body) {
            Some(Body::Statement(s)) => Ok(s),
            _ => Err(Fault::Invalid),
        }
    }

    pub fn stmt_mut(&mut self, raw: u64) -> Res<&mut StmtBody> {
        match self.nodes.get_mut(&raw).map(|n| &mut n.body) {
            Some(Body::Statement(s)) => Ok(s),
            _ => Err(Fault::Invalid),
        }
    }

    /// Drop everything handed out by the previous fetch or execution
    pub fn clear_scratch(&mut self, stmt: u64) -> Res<()> {
        let scratch = std::mem::take(&mut self.stmt_mut(stmt)?.scratch);
        for raw in scratch {
            self.remove(raw);
        }
        Ok(())
    }

    pub fn attr_default(kind: HandleKind, attr: Attr) -> Option<AttrValue> {
        let value = match (kind, attr) {
            (HandleKind::Statement, Attr::PrefetchRows) => AttrValue::UInt(constants::DEFAULT_FETCH_SIZE),
            (HandleKind::Session, Attr::StmtCacheSize) | (HandleKind::Pool, Attr::StmtCacheSize) => {
                AttrValue::UInt(constants::DEFAULT_STMT_CACHE_SIZE)
            }
            (HandleKind::Session, Attr::TafCapable) => AttrValue::Bool(true),
            (HandleKind::Pool, Attr::PoolTimeout) => AttrValue::UInt(0),
            (HandleKind::Pool, Attr::PoolNoWait) => AttrValue::Bool(false),
            (HandleKind::Lob, Attr::LobChunkSize) => AttrValue::UInt(constants::DEFAULT_LOB_CHUNK_SIZE),
            (HandleKind::Enqueue, Attr::Visibility) | (HandleKind::Dequeue, Attr::Visibility) => AttrValue::UInt(2),
            (HandleKind::Enqueue, Attr::SequenceDeviation) => AttrValue::UInt(0),
            (HandleKind::Dequeue, Attr::DequeueMode) => AttrValue::UInt(3),
            (HandleKind::Dequeue, Attr::Navigation) => AttrValue::UInt(3),
            (HandleKind::Dequeue, Attr::WaitTime) => AttrValue::Int(-1),
            (HandleKind::Message, Attr::Priority) => AttrValue::Int(0),
            (HandleKind::Message, Attr::Expiration) => AttrValue::Int(-1),
            (HandleKind::Message, Attr::Delay) => AttrValue::Int(0),
            (HandleKind::Message, Attr::Attempts) => AttrValue::UInt(0),
            (HandleKind::Message, Attr::MessageState) => AttrValue::UInt(0),
            (HandleKind::Enqueue, Attr::RelativeMsgId)
            | (HandleKind::Dequeue, Attr::RelativeMsgId)
            | (HandleKind::Dequeue, Attr::Consumer)
            | (HandleKind::Dequeue, Attr::Correlation)
            | (HandleKind::Message, Attr::Correlation)
            | (HandleKind::Message, Attr::MessageId)
            | (HandleKind::Message, Attr::EnqueueTime)
            | (HandleKind::Message, Attr::ExceptionQueue)
            | (HandleKind::Message, Attr::Sender)
            | (HandleKind::Agent, Attr::AgentName)
            | (HandleKind::Agent, Attr::AgentAddress) => AttrValue::None,
            _ => return None,
        };
        Some(value)
    }

    // ------------------------------------------------------------------ transactions

    /// Make the session's work permanent and collect the change notifications
    pub fn commit(&mut self, session: u64, out: &mut Vec<Delivery>) -> Res<()> {
        let s = self.session_mut(session)?;
        s.undo.clear();
        let changes = std::mem::take(&mut s.changes);
        let owner = s.user.to_uppercase();
        let database = if s.database.is_empty() {
            "MEMDB".to_string()
        } else {
            s.database.clone()
        };
        if changes.is_empty() {
            return Ok(());
        }

        for node in self.nodes.values() {
            let Body::Subscription(sub) = &node.body else {
                continue;
            };
            let Namespace::DatabaseChange { change_types } = sub.spec.namespace else {
                continue;
            };
            let Ok(env) = self.env(sub.env) else {
                continue;
            };
            let types = ChangeTypes::OBJECT | ChangeTypes::ROWS;
            let wanted = types.bits() & change_types;
            if wanted == 0 {
                continue;
            }
            let per_row = wanted & ChangeTypes::ROWS.bits() != 0;

            let mut seen = HashSet::new();
            for change in changes.iter().filter(|c| sub.tables.contains(&c.table)) {
                let rowid = if per_row { change.rowid } else { None };
                if !per_row && !seen.insert((change.table.clone(), change.event)) {
                    continue;
                }
                let object = if owner.is_empty() {
                    change.table.clone()
                } else {
                    format!("{}.{}", owner, change.table)
                };
                out.push((
                    Arc::clone(&env.sink),
                    sub.key,
                    NativeNotification::DatabaseChange {
                        kind: EventType::ObjectChanged,
                        object_event: Some(change.event),
                        database: database.clone(),
                        object: Some(object),
                        rowid: rowid.map(rowid_text),
                    },
                ));
            }
        }
        Ok(())
    }

    /// Undo the session's uncommitted work
    pub fn rollback(&mut self, session: u64) -> Res<()> {
        let s = self.session_mut(session)?;
        let undo = std::mem::take(&mut s.undo);
        s.changes.clear();
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Insert { table, rowid } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.rows.remove(&rowid);
                    }
                }
                Undo::Update { table, rowid, old } | Undo::Delete { table, rowid, old } => {
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.rows.insert(rowid, old);
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------ lobs

    pub fn lob_ref(&self, raw: u64) -> Res<(LobKind, u64)> {
        match self.nodes.get(&raw).map(|n| &n.body) {
            Some(Body::Lob { kind, id, .. }) if self.lobs.contains_key(id) => Ok((*kind, *id)),
            Some(Body::Lob { .. }) => Err(ora(code::INVALID_LOB_LOCATOR, "invalid LOB locator specified").into()),
            _ => Err(Fault::Invalid),
        }
    }

    pub fn new_lob(&mut self, kind: LobKind) -> u64 {
        let id = self.next_id();
        self.lobs.insert(id, LobBody::empty(kind));
        id
    }

    fn copy_lob(&mut self, id: u64) -> Res<u64> {
        let body = self
            .lobs
            .get(&id)
            .map(LobBody::clone_body)
            .ok_or_else(|| ora(code::INVALID_LOB_LOCATOR, "invalid LOB locator specified"))?;
        let copy = self.next_id();
        self.lobs.insert(copy, body);
        Ok(copy)
    }

    fn lob_body(&mut self, raw: u64) -> Res<&mut LobBody> {
        let (_, id) = self.lob_ref(raw)?;
        self.lobs
            .get_mut(&id)
            .ok_or_else(|| ora(code::INVALID_LOB_LOCATOR, "invalid LOB locator specified").into())
    }

    pub fn lob_read(&mut self, raw: u64, offset: u64, amount: u64) -> Res<Vec<u8>> {
        let body = self.lob_body(raw)?;
        let start = offset.min(body.len()) as usize;
        let end = offset.saturating_add(amount).min(body.len()) as usize;
        Ok(match body {
            LobBody::Chars(chars) => chars[start..end].iter().collect::<String>().into_bytes(),
            LobBody::Bytes(bytes) => bytes[start..end].to_vec(),
        })
    }

    pub fn lob_write(&mut self, raw: u64, offset: u64, data: &[u8]) -> Res<u64> {
        let body = self.lob_body(raw)?;
        let offset = offset as usize;
        Ok(match body {
            LobBody::Chars(chars) => {
                let text = std::str::from_utf8(data).map_err(|_| ora(29275, "partial multibyte character"))?;
                let new: Vec<char> = text.chars().collect();
                if chars.len() < offset {
                    chars.resize(offset, ' ');
                }
                let end = (offset + new.len()).min(chars.len());
                chars.splice(offset..end, new.iter().copied());
                new.len() as u64
            }
            LobBody::Bytes(bytes) => {
                if bytes.len() < offset {
                    bytes.resize(offset, 0);
                }
                let end = (offset + data.len()).min(bytes.len());
                bytes.splice(offset..end, data.iter().copied());
                data.len() as u64
            }
        })
    }

    pub fn lob_append(&mut self, raw: u64, data: &[u8]) -> Res<()> {
        let len = self.lob_body(raw)?.len();
        self.lob_write(raw, len, data).map(|_| ())
    }

    pub fn lob_trim(&mut self, raw: u64, length: u64) -> Res<()> {
        let body = self.lob_body(raw)?;
        if length > body.len() {
            return Err(ora(22926, "specified trim length is greater than current LOB value's length").into());
        }
        match body {
            LobBody::Chars(chars) => chars.truncate(length as usize),
            LobBody::Bytes(bytes) => bytes.truncate(length as usize),
        }
        Ok(())
    }

    pub fn lob_length(&mut self, raw: u64) -> Res<u64> {
        Ok(self.lob_body(raw)?.len())
    }

    fn lob_from_datum(&mut self, kind: LobKind, datum: &Datum) -> Res<u64> {
        let id = self.next_id();
        let body = match (kind, datum) {
            (LobKind::Clob, d) => LobBody::Chars(sql::to_text(d)?.chars().collect()),
            (LobKind::Blob, Datum::Raw(bytes)) => LobBody::Bytes(bytes.clone()),
            _ => return Err(sql::inconsistent().into()),
        };
        self.lobs.insert(id, body);
        Ok(id)
    }

    // ------------------------------------------------------------------ objects

    pub fn type_attrs(&self, name: &str) -> Res<Vec<AttrDesc>> {
        if name == "RAW" {
            return Ok(Vec::new());
        }
        self.types.get(name).cloned().ok_or_else(|| {
            ora(code::TYPE_NOT_FOUND, format!("object {} does not exist", name)).into()
        })
    }

    pub fn new_object(&mut self, type_name: &str) -> Res<u64> {
        let attrs = self
            .type_attrs(type_name)?
            .into_iter()
            .map(|desc| (desc, Cell::null()))
            .collect();
        let oid = self.next_id();
        self.objects.insert(
            oid,
            ObjData {
                type_name: type_name.to_string(),
                attrs,
            },
        );
        Ok(oid)
    }

    pub fn object_oid(&self, raw: u64) -> Res<u64> {
        match self.nodes.get(&raw).map(|n| &n.body) {
            Some(Body::Object { oid, .. }) if self.objects.contains_key(oid) => Ok(*oid),
            _ => Err(Fault::Invalid),
        }
    }

    pub fn object_type(&self, oid: u64) -> Res<&str> {
        self.objects
            .get(&oid)
            .map(|o| o.type_name.as_str())
            .ok_or(Fault::Invalid)
    }

    /// Deep copy of an object, nested objects and LOBs included
    pub fn copy_object(&mut self, oid: u64) -> Res<u64> {
        let (type_name, attrs) = {
            let data = self.objects.get(&oid).ok_or(Fault::Invalid)?;
            (data.type_name.clone(), data.attrs.clone())
        };
        let mut copied = Vec::with_capacity(attrs.len());
        for (desc, cell) in attrs {
            copied.push((desc, self.copy_cell(cell)?));
        }
        let copy = self.next_id();
        self.objects.insert(
            copy,
            ObjData {
                type_name,
                attrs: copied,
            },
        );
        Ok(copy)
    }

    fn copy_cell(&mut self, cell: Cell) -> Res<Cell> {
        Ok(match cell {
            Cell::Object(nested) => Cell::Object(self.copy_object(nested)?),
            Cell::Collection(nested) => Cell::Collection(self.copy_collection(nested)?),
            Cell::Lob(kind, id) => Cell::Lob(kind, self.copy_lob(id)?),
            other => other,
        })
    }

    // ------------------------------------------------------------------ collections

    pub fn coll_type(&self, name: &str) -> Res<CollectionDesc> {
        self.coll_types
            .get(name)
            .cloned()
            .ok_or_else(|| sql::inconsistent().into())
    }

    pub fn new_collection(&mut self, type_name: &str) -> Res<u64> {
        self.coll_type(type_name)?;
        let cid = self.next_id();
        self.collections.insert(
            cid,
            CollData {
                type_name: type_name.to_string(),
                elements: Vec::new(),
            },
        );
        Ok(cid)
    }

    pub fn collection_cid(&self, raw: u64) -> Res<u64> {
        match self.nodes.get(&raw).map(|n| &n.body) {
            Some(Body::Collection { cid }) if self.collections.contains_key(cid) => Ok(*cid),
            _ => Err(Fault::Invalid),
        }
    }

    pub fn collection_type(&self, cid: u64) -> Res<&str> {
        self.collections
            .get(&cid)
            .map(|c| c.type_name.as_str())
            .ok_or(Fault::Invalid)
    }

    pub fn collection_mut(&mut self, raw: u64) -> Res<&mut CollData> {
        let cid = self.collection_cid(raw)?;
        self.collections.get_mut(&cid).ok_or(Fault::Invalid)
    }

    /// Deep copy of a collection and its elements
    pub fn copy_collection(&mut self, cid: u64) -> Res<u64> {
        let (type_name, elements) = {
            let data = self.collections.get(&cid).ok_or(Fault::Invalid)?;
            (data.type_name.clone(), data.elements.clone())
        };
        let mut copied = Vec::with_capacity(elements.len());
        for element in elements {
            copied.push(match element {
                Some(cell) => Some(self.copy_cell(cell)?),
                None => None,
            });
        }
        let copy = self.next_id();
        self.collections.insert(
            copy,
            CollData {
                type_name,
                elements: copied,
            },
        );
        Ok(copy)
    }

    /// Stored form of a value written into a collection
    pub fn element_cell(&mut self, raw: u64, datum: &Datum) -> Res<Cell> {
        let cid = self.collection_cid(raw)?;
        let desc = self.coll_type(self.collection_type(cid)?)?;
        self.datum_cell(datum, desc.element.data_type, desc.element.type_name.as_deref())
    }

    pub fn coll_index(data: &CollData, index: u32) -> Res<usize> {
        let len = data.elements.len();
        match index as usize {
            i if i < len => Ok(i),
            _ => Err(ora(
                code::COLL_INDEX_OUT_OF_RANGE,
                format!(
                    "given index [{}] must be in the range of [0] to [{}]",
                    index,
                    len.saturating_sub(1)
                ),
            )
            .into()),
        }
    }

    pub fn coll_append(&mut self, raw: u64, cell: Cell) -> Res<()> {
        let cid = self.collection_cid(raw)?;
        let desc = self.coll_type(self.collection_type(cid)?)?;
        let data = self.collections.get_mut(&cid).ok_or(Fault::Invalid)?;
        if desc.kind == CollectionKind::Varray && data.elements.len() >= desc.max as usize {
            return Err(ora(code::SUBSCRIPT_OUTSIDE_LIMIT, "PL/SQL: Subscript outside of limit").into());
        }
        data.elements.push(Some(cell));
        Ok(())
    }

    pub fn coll_delete(&mut self, raw: u64, index: u32) -> Res<()> {
        let cid = self.collection_cid(raw)?;
        let desc = self.coll_type(self.collection_type(cid)?)?;
        if desc.kind == CollectionKind::Varray {
            return Err(ora(code::COLL_ELEMENT_MISSING, "cannot delete an element of a VARRAY").into());
        }
        let data = self.collections.get_mut(&cid).ok_or(Fault::Invalid)?;
        let i = Self::coll_index(data, index)?;
        data.elements[i] = None;
        Ok(())
    }

    // ------------------------------------------------------------------ cells

    /// Hand a stored value out, allocating locators and objects under `parent`
    pub fn cell_datum(&mut self, cell: &Cell, parent: u64, copy_objects: bool) -> Res<(Datum, Option<u64>)> {
        Ok(match cell {
            Cell::Value(d) => (d.clone(), None),
            Cell::Lob(kind, id) => {
                let raw = self.alloc(
                    HandleKind::Lob,
                    Some(parent),
                    Body::Lob {
                        kind: *kind,
                        id: *id,
                        temporary: false,
                    },
                );
                (Datum::Lob(*kind, RawHandle(raw)), Some(raw))
            }
            Cell::Object(oid) => {
                let oid = if copy_objects { self.copy_object(*oid)? } else { *oid };
                let raw = self.alloc(HandleKind::Object, Some(parent), Body::Object { oid, pinned: false });
                (Datum::Object(RawHandle(raw)), Some(raw))
            }
            Cell::Ref(Some(target)) => {
                let type_name = self.object_type(*target)?.to_string();
                let raw = self.alloc(
                    HandleKind::Reference,
                    Some(parent),
                    Body::Ref {
                        type_name,
                        target: Some(*target),
                    },
                );
                (Datum::Reference(RawHandle(raw)), Some(raw))
            }
            Cell::Ref(None) => (Datum::Null, None),
            Cell::Collection(cid) => {
                let cid = if copy_objects { self.copy_collection(*cid)? } else { *cid };
                let raw = self.alloc(HandleKind::Collection, Some(parent), Body::Collection { cid });
                (Datum::Collection(RawHandle(raw)), Some(raw))
            }
        })
    }

    /// Convert a bound or computed value to its stored form
    pub fn datum_cell(&mut self, datum: &Datum, ty: DataType, type_name: Option<&str>) -> Res<Cell> {
        let lob_kind = match ty {
            DataType::Clob => Some(LobKind::Clob),
            DataType::Blob => Some(LobKind::Blob),
            _ => None,
        };
        Ok(match (datum, ty) {
            (Datum::Null, _) => Cell::null(),
            (Datum::Lob(kind, raw), _) => match lob_kind {
                Some(target) if target == *kind => {
                    let (_, id) = self.lob_ref(raw.0)?;
                    Cell::Lob(target, self.copy_lob(id)?)
                }
                _ => return Err(sql::inconsistent().into()),
            },
            (Datum::Object(raw), DataType::Object) => {
                let oid = self.object_oid(raw.0)?;
                if let Some(expected) = type_name {
                    if self.object_type(oid)? != expected {
                        return Err(sql::inconsistent().into());
                    }
                }
                Cell::Object(self.copy_object(oid)?)
            }
            (Datum::Reference(raw), DataType::Reference) => match self.nodes.get(&raw.0).map(|n| &n.body) {
                Some(Body::Ref { target, .. }) => Cell::Ref(*target),
                _ => return Err(Fault::Invalid),
            },
            (Datum::Collection(raw), DataType::Collection) => {
                let cid = self.collection_cid(raw.0)?;
                if let Some(expected) = type_name {
                    if self.collection_type(cid)? != expected {
                        return Err(sql::inconsistent().into());
                    }
                }
                Cell::Collection(self.copy_collection(cid)?)
            }
            (Datum::Object(_) | Datum::Reference(_) | Datum::Collection(_), _) => {
                return Err(sql::inconsistent().into())
            }
            (_, DataType::Object | DataType::Reference | DataType::Collection) => {
                return Err(sql::inconsistent().into())
            }
            (scalar, _) => match lob_kind {
                Some(kind) => Cell::Lob(kind, self.lob_from_datum(kind, scalar)?),
                None => Cell::Value(sql::coerce(scalar.clone(), ty)?),
            },
        })
    }

    /// Stored form of a value whose type is only known from the value itself
    pub fn free_cell(&mut self, datum: &Datum) -> Res<(Cell, ColumnDesc)> {
        let ty = sql::datum_type(datum);
        let type_name = match datum {
            Datum::Object(raw) => Some(self.object_type(self.object_oid(raw.0)?)?.to_string()),
            Datum::Reference(raw) => match self.nodes.get(&raw.0).map(|n| &n.body) {
                Some(Body::Ref { type_name, .. }) => Some(type_name.clone()),
                _ => return Err(Fault::Invalid),
            },
            Datum::Collection(raw) => Some(self.collection_type(self.collection_cid(raw.0)?)?.to_string()),
            _ => None,
        };
        let cell = self.datum_cell(datum, ty, type_name.as_deref())?;
        let mut desc = ColumnDesc::new("", ty);
        desc.type_name = type_name;
        Ok((cell, desc))
    }

    // ------------------------------------------------------------------ notifications

    pub fn queue_subscribers(&self, queue: &str) -> Vec<Delivery> {
        let mut out = Vec::new();
        for node in self.nodes.values() {
            let Body::Subscription(sub) = &node.body else {
                continue;
            };
            let Namespace::Queue { queue: name, .. } = &sub.spec.namespace else {
                continue;
            };
            if !name.eq_ignore_ascii_case(queue) {
                continue;
            }
            if let Ok(env) = self.env(sub.env) {
                out.push((
                    Arc::clone(&env.sink),
                    sub.key,
                    NativeNotification::MessageAvailable {
                        queue: queue.to_string(),
                    },
                ));
            }
        }
        out
    }

    pub fn change_subscribers(&self) -> Vec<(Arc<dyn NotificationSink>, ContextKey)> {
        self.nodes
            .values()
            .filter_map(|node| match &node.body {
                Body::Subscription(sub) if matches!(sub.spec.namespace, Namespace::DatabaseChange { .. }) => {
                    self.env(sub.env).ok().map(|env| (Arc::clone(&env.sink), sub.key))
                }
                _ => None,
            })
            .collect()
    }
}
