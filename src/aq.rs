//! Advanced queuing
//!
//! Messages carry either an object of the queue's payload type or raw bytes
//! (payload type `"RAW"`). [`Enqueue`] puts messages on a queue, [`Dequeue`]
//! takes them off, optionally notifying a handler when messages arrive.
//!
//! A message returned by [`Dequeue::get`] belongs to the dequeue object: the
//! next `get` invalidates it.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::Mutex;

use crate::callback::{ContextKey, Handler};
use crate::connection::{Connection, SessionRef};
use crate::environment::EnvShared;
use crate::error::{Error, Result};
use crate::handle::{release_fn, Handle, HandleId, NewEntry};
use crate::native::{Attr, AttrValue, Datum, HandleKind, Namespace, RawHandle, Status, SubscriptionSpec};
use crate::row::{FetchScope, Value};
use crate::status::{check, CallContext, Translator};
use crate::types::{Object, TypeInfo};

/// When an enqueue or dequeue becomes visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Part of the current transaction
    #[default]
    OnCommit,
    /// Immediately, in its own transaction
    Immediate,
}

/// Position of an enqueued message relative to others
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnqueueMode {
    /// Ordered by the queue's sort order
    #[default]
    Default,
    /// Before the message given by [`Enqueue::set_relative_msg_id`]
    Before,
    /// At the head of the queue
    OnTop,
}

/// What a dequeue does with the message it finds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DequeueMode {
    /// Read without locking
    Browse,
    /// Read and lock
    Locked,
    /// Read and remove
    #[default]
    Remove,
    /// Remove without returning the payload
    RemoveNoData,
}

/// Which message a dequeue looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Navigation {
    /// First available message
    FirstMessage,
    /// Next message after the last one read
    #[default]
    NextMessage,
    /// First message of the next transaction group
    NextTransaction,
}

/// State of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Ready to be dequeued
    Ready,
    /// Delay not yet expired
    Waiting,
    /// Dequeued by all consumers
    Processed,
    /// Moved to the exception queue
    Expired,
    /// Unknown state code
    Unknown,
}

impl MessageState {
    fn from_code(code: u32) -> Self {
        match code {
            0 => MessageState::Ready,
            1 => MessageState::Waiting,
            2 => MessageState::Processed,
            3 => MessageState::Expired,
            _ => MessageState::Unknown,
        }
    }
}

/// Wait forever in [`Dequeue::set_wait_time`]
pub const WAIT_FOREVER: i32 = -1;

/// Never expire in [`Message::set_expiration`]
pub const NEVER_EXPIRE: i32 = -1;

/// Attribute access shared by the descriptor-like AQ handles
struct Descriptor<'a> {
    handle: &'a Handle,
    session: &'a SessionRef,
}

impl Descriptor<'_> {
    fn ctx(&self, call: &'static str) -> CallContext<'_> {
        self.session.ctx(self.handle.env(), call).on(self.handle.kind())
    }

    fn get(&self, attr: Attr) -> Result<AttrValue> {
        let raw = self.handle.raw()?;
        let mut value = AttrValue::None;
        check!(
            self.ctx("attr_get"),
            self.handle
                .env()
                .native()
                .attr_get(raw, self.handle.kind(), attr, self.session.err(), &mut value)
        );
        Ok(value)
    }

    fn set(&self, attr: Attr, value: AttrValue) -> Result<()> {
        let raw = self.handle.raw()?;
        check!(
            self.ctx("attr_set"),
            self.handle
                .env()
                .native()
                .attr_set(raw, self.handle.kind(), attr, &value, self.session.err())
        );
        Ok(())
    }

    fn text(&self, attr: Attr) -> Result<String> {
        Ok(match self.get(attr)? {
            AttrValue::Text(text) => text,
            AttrValue::None => String::new(),
            other => return Err(Error::type_mismatch("text", other)),
        })
    }

    fn int(&self, attr: Attr) -> Result<i32> {
        let value = self.get(attr)?;
        value.as_i32().ok_or_else(|| Error::type_mismatch("integer", value))
    }

    fn uint(&self, attr: Attr) -> Result<u32> {
        let value = self.get(attr)?;
        value
            .as_u32()
            .ok_or_else(|| Error::type_mismatch("unsigned integer", value))
    }

    fn raw_bytes(&self, attr: Attr) -> Result<Vec<u8>> {
        Ok(match self.get(attr)? {
            AttrValue::Raw(bytes) => bytes,
            AttrValue::None => Vec::new(),
            other => return Err(Error::type_mismatch("raw", other)),
        })
    }
}

/// Allocate an AQ descriptor owned by `session`
fn alloc_descriptor(
    env: &Arc<EnvShared>,
    session: &SessionRef,
    kind: HandleKind,
    payload: Option<Arc<dyn std::any::Any + Send + Sync>>,
) -> Result<Handle> {
    session.raw(env)?;
    let mut raw = RawHandle::NULL;
    check!(
        session.ctx(env, "handle_alloc"),
        env.native().handle_alloc(env.raw, kind, &mut raw)
    );
    let release = release_fn(move |api, _| api.handle_free(raw, kind));
    let mut entry = NewEntry::allocated(raw, kind, release).child_of(session.id);
    if let Some(payload) = payload {
        entry = entry.with_payload(payload);
    }
    Handle::register(env, entry)
}

/// Sender or recipient of messages
#[derive(Clone)]
pub struct Agent {
    handle: Handle,
    session: SessionRef,
}

impl Agent {
    /// Create an agent
    pub fn new(conn: &Connection, name: &str, address: &str) -> Result<Agent> {
        let session = conn.session_ref();
        let handle = alloc_descriptor(conn.shared(), &session, HandleKind::Agent, None)?;
        let agent = Agent { handle, session };
        agent.set_name(name)?;
        agent.set_address(address)?;
        Ok(agent)
    }

    fn fetched(env: &Arc<EnvShared>, session: &SessionRef, raw: RawHandle, parent: HandleId) -> Result<Agent> {
        let handle = Handle::register(env, NewEntry::fetched(raw, HandleKind::Agent, parent))?;
        Ok(Agent {
            handle,
            session: session.clone(),
        })
    }

    fn descriptor(&self) -> Descriptor<'_> {
        Descriptor {
            handle: &self.handle,
            session: &self.session,
        }
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Agent name
    pub fn name(&self) -> Result<String> {
        self.descriptor().text(Attr::AgentName)
    }

    /// Set the agent name
    pub fn set_name(&self, name: &str) -> Result<()> {
        self.descriptor().set(Attr::AgentName, AttrValue::Text(name.to_string()))
    }

    /// Agent address (queue name, optionally with a database link)
    pub fn address(&self) -> Result<String> {
        self.descriptor().text(Attr::AgentAddress)
    }

    /// Set the agent address
    pub fn set_address(&self, address: &str) -> Result<()> {
        self.descriptor()
            .set(Attr::AgentAddress, AttrValue::Text(address.to_string()))
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("handle", &self.handle.id()).finish()
    }
}

struct MessageInner {
    type_info: TypeInfo,
    payload: Mutex<Value>,
}

/// Queue message: payload plus message properties
#[derive(Clone)]
pub struct Message {
    handle: Handle,
    inner: Arc<MessageInner>,
}

impl Message {
    /// Create an empty message for a payload type
    pub fn new(type_info: &TypeInfo) -> Result<Message> {
        let inner = Arc::new(MessageInner {
            type_info: type_info.clone(),
            payload: Mutex::new(Value::Null),
        });
        let handle = alloc_descriptor(
            type_info.handle().env(),
            type_info.session(),
            HandleKind::Message,
            Some(inner.clone()),
        )?;
        Ok(Message { handle, inner })
    }

    fn descriptor(&self) -> Descriptor<'_> {
        Descriptor {
            handle: &self.handle,
            session: self.inner.type_info.session(),
        }
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Payload type
    pub fn type_info(&self) -> &TypeInfo {
        &self.inner.type_info
    }

    /// Payload as stored: an object, raw bytes or NULL
    pub fn payload(&self) -> Result<Value> {
        self.handle.raw()?;
        Ok(self.inner.payload.lock().clone())
    }

    /// Object payload
    pub fn object(&self) -> Result<Option<Object>> {
        match self.payload()? {
            Value::Null => Ok(None),
            Value::Object(object) => Ok(Some(object)),
            other => Err(Error::type_mismatch("object", other)),
        }
    }

    /// Set an object payload
    pub fn set_object(&self, object: &Object) -> Result<()> {
        self.handle.raw()?;
        if self.inner.type_info.is_raw() || object.type_info().name() != self.inner.type_info.name() {
            return Err(Error::NotCompatible(format!(
                "object of type {} in a {} message",
                object.type_info().name(),
                self.inner.type_info.name()
            )));
        }
        *self.inner.payload.lock() = Value::Object(object.clone());
        Ok(())
    }

    /// Raw payload
    pub fn raw(&self) -> Result<Option<Vec<u8>>> {
        match self.payload()? {
            Value::Null => Ok(None),
            Value::Bytes(bytes) => Ok(Some(bytes)),
            other => Err(Error::type_mismatch("raw", other)),
        }
    }

    /// Set a raw payload
    pub fn set_raw(&self, data: &[u8]) -> Result<()> {
        self.handle.raw()?;
        if !self.inner.type_info.is_raw() {
            return Err(Error::NotCompatible(format!(
                "raw payload in a {} message",
                self.inner.type_info.name()
            )));
        }
        *self.inner.payload.lock() = Value::Bytes(data.to_vec());
        Ok(())
    }

    /// Priority; lower values are dequeued first
    pub fn priority(&self) -> Result<i32> {
        self.descriptor().int(Attr::Priority)
    }

    /// Set the priority
    pub fn set_priority(&self, priority: i32) -> Result<()> {
        self.descriptor().set(Attr::Priority, AttrValue::Int(priority))
    }

    /// Correlation identifier
    pub fn correlation(&self) -> Result<String> {
        self.descriptor().text(Attr::Correlation)
    }

    /// Set the correlation identifier
    pub fn set_correlation(&self, correlation: &str) -> Result<()> {
        self.descriptor()
            .set(Attr::Correlation, AttrValue::Text(correlation.to_string()))
    }

    /// Seconds the message stays available, [`NEVER_EXPIRE`] by default
    pub fn expiration(&self) -> Result<i32> {
        self.descriptor().int(Attr::Expiration)
    }

    /// Set the expiration in seconds
    pub fn set_expiration(&self, seconds: i32) -> Result<()> {
        self.descriptor().set(Attr::Expiration, AttrValue::Int(seconds))
    }

    /// Seconds before the message becomes available
    pub fn delay(&self) -> Result<i32> {
        self.descriptor().int(Attr::Delay)
    }

    /// Set the delay in seconds
    pub fn set_delay(&self, seconds: i32) -> Result<()> {
        self.descriptor().set(Attr::Delay, AttrValue::Int(seconds))
    }

    /// Number of dequeue attempts so far
    pub fn attempts(&self) -> Result<u32> {
        self.descriptor().uint(Attr::Attempts)
    }

    /// Message state
    pub fn state(&self) -> Result<MessageState> {
        Ok(MessageState::from_code(self.descriptor().uint(Attr::MessageState)?))
    }

    /// Message identifier, empty until enqueued or dequeued
    pub fn id(&self) -> Result<Vec<u8>> {
        self.descriptor().raw_bytes(Attr::MessageId)
    }

    /// Message identifier as hexadecimal text
    pub fn id_hex(&self) -> Result<String> {
        Ok(hex::encode_upper(self.id()?))
    }

    /// Time the message was enqueued
    pub fn enqueue_time(&self) -> Result<Option<NaiveDateTime>> {
        Ok(self.descriptor().get(Attr::EnqueueTime)?.as_date())
    }

    /// Queue expired messages are moved to
    pub fn exception_queue(&self) -> Result<String> {
        self.descriptor().text(Attr::ExceptionQueue)
    }

    /// Set the exception queue
    pub fn set_exception_queue(&self, queue: &str) -> Result<()> {
        self.descriptor()
            .set(Attr::ExceptionQueue, AttrValue::Text(queue.to_string()))
    }

    /// Sender of the message
    ///
    /// The agent belongs to the message.
    pub fn sender(&self) -> Result<Option<Agent>> {
        let value = self.descriptor().get(Attr::Sender)?;
        match value.as_handle() {
            Some(raw) if !raw.is_null() => {
                self.handle.invalidate_fetched_children();
                let agent = Agent::fetched(
                    self.handle.env(),
                    self.inner.type_info.session(),
                    raw,
                    self.handle.id(),
                )?;
                Ok(Some(agent))
            }
            _ => Ok(None),
        }
    }

    /// Set the sender; name and address are copied into the message
    pub fn set_sender(&self, agent: &Agent) -> Result<()> {
        let raw = agent.handle.raw()?;
        self.descriptor().set(Attr::Sender, AttrValue::Handle(raw))
    }

    fn payload_datum(&self) -> Result<Datum> {
        self.inner.payload.lock().to_datum()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.inner.type_info.name())
            .field("handle", &self.handle.id())
            .finish()
    }
}

/// Enqueue options bound to one queue
#[derive(Clone)]
pub struct Enqueue {
    handle: Handle,
    type_info: TypeInfo,
    queue: Arc<str>,
}

impl Enqueue {
    /// Create enqueue options for a queue with the given payload type
    pub fn new(type_info: &TypeInfo, queue: &str) -> Result<Enqueue> {
        let handle = alloc_descriptor(type_info.handle().env(), type_info.session(), HandleKind::Enqueue, None)?;
        Ok(Enqueue {
            handle,
            type_info: type_info.clone(),
            queue: Arc::from(queue),
        })
    }

    fn descriptor(&self) -> Descriptor<'_> {
        Descriptor {
            handle: &self.handle,
            session: self.type_info.session(),
        }
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Queue name
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Put a message on the queue, returning its identifier
    pub fn put(&self, message: &Message) -> Result<Vec<u8>> {
        if message.type_info().name() != self.type_info.name() {
            return Err(Error::NotCompatible(format!(
                "{} message on a {} queue",
                message.type_info().name(),
                self.type_info.name()
            )));
        }
        let options = self.handle.raw()?;
        let message_raw = message.handle.raw()?;
        let env = self.handle.env();
        let session = self.type_info.session();
        let session_raw = session.raw(env)?;
        let payload = message.payload_datum()?;

        let mut id = Vec::new();
        check!(
            session.ctx(env, "aq_enqueue").on(HandleKind::Enqueue),
            env.native().aq_enqueue(
                session_raw,
                session.err(),
                &self.queue,
                options,
                message_raw,
                &payload,
                &mut id
            )
        );
        tracing::trace!(queue = %self.queue, id = %hex::encode(&id), "Message enqueued");
        Ok(id)
    }

    /// Visibility of the enqueue
    pub fn visibility(&self) -> Result<Visibility> {
        visibility_from(self.descriptor().uint(Attr::Visibility)?)
    }

    /// Set the visibility
    pub fn set_visibility(&self, visibility: Visibility) -> Result<()> {
        self.descriptor()
            .set(Attr::Visibility, AttrValue::UInt(visibility_code(visibility)))
    }

    /// Position of the next enqueued message
    pub fn mode(&self) -> Result<EnqueueMode> {
        Ok(match self.descriptor().uint(Attr::SequenceDeviation)? {
            2 => EnqueueMode::Before,
            3 => EnqueueMode::OnTop,
            _ => EnqueueMode::Default,
        })
    }

    /// Set the position of the next enqueued message
    pub fn set_mode(&self, mode: EnqueueMode) -> Result<()> {
        let code = match mode {
            EnqueueMode::Default => 0,
            EnqueueMode::Before => 2,
            EnqueueMode::OnTop => 3,
        };
        self.descriptor().set(Attr::SequenceDeviation, AttrValue::UInt(code))
    }

    /// Message the next enqueue is placed before, for [`EnqueueMode::Before`]
    pub fn set_relative_msg_id(&self, id: &[u8]) -> Result<()> {
        self.descriptor().set(Attr::RelativeMsgId, AttrValue::Raw(id.to_vec()))
    }
}

impl fmt::Debug for Enqueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enqueue")
            .field("queue", &self.queue)
            .field("handle", &self.handle.id())
            .finish()
    }
}

fn visibility_code(visibility: Visibility) -> u32 {
    match visibility {
        Visibility::OnCommit => 2,
        Visibility::Immediate => 1,
    }
}

fn visibility_from(code: u32) -> Result<Visibility> {
    match code {
        1 => Ok(Visibility::Immediate),
        2 | 0 => Ok(Visibility::OnCommit),
        other => Err(Error::type_mismatch("visibility", other)),
    }
}

struct DequeueInner {
    type_info: TypeInfo,
    queue: String,
    // native subscription backing `subscribe`, with its handler key
    notification: Mutex<Option<(Handle, ContextKey)>>,
}

/// Dequeue options bound to one queue
#[derive(Clone)]
pub struct Dequeue {
    handle: Handle,
    inner: Arc<DequeueInner>,
}

impl Dequeue {
    /// Create dequeue options for a queue with the given payload type
    pub fn new(type_info: &TypeInfo, queue: &str) -> Result<Dequeue> {
        let inner = Arc::new(DequeueInner {
            type_info: type_info.clone(),
            queue: queue.to_string(),
            notification: Mutex::new(None),
        });
        let handle = alloc_descriptor(
            type_info.handle().env(),
            type_info.session(),
            HandleKind::Dequeue,
            Some(inner.clone()),
        )?;
        Ok(Dequeue { handle, inner })
    }

    pub(crate) fn revive(env: &Arc<EnvShared>, id: HandleId) -> Option<Dequeue> {
        let handle = Handle::revive(env, id)?;
        if handle.kind() != HandleKind::Dequeue {
            return None;
        }
        let inner = handle.payload::<DequeueInner>()?;
        Some(Dequeue { handle, inner })
    }

    fn env(&self) -> &Arc<EnvShared> {
        self.handle.env()
    }

    fn session(&self) -> &SessionRef {
        self.inner.type_info.session()
    }

    fn descriptor(&self) -> Descriptor<'_> {
        Descriptor {
            handle: &self.handle,
            session: self.session(),
        }
    }

    /// Underlying shared handle
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Queue name
    pub fn queue(&self) -> &str {
        &self.inner.queue
    }

    /// Payload type
    pub fn type_info(&self) -> &TypeInfo {
        &self.inner.type_info
    }

    /// Take the next message off the queue
    ///
    /// Waits up to the configured wait time and returns `None` when no
    /// message arrived. The previous message returned by this dequeue is
    /// invalidated.
    pub fn get(&self) -> Result<Option<Message>> {
        let options = self.handle.raw()?;
        let env = self.env();
        let session = self.session();
        let session_raw = session.raw(env)?;
        self.handle.invalidate_fetched_children();

        let mut raw = RawHandle::NULL;
        check!(
            session.ctx(env, "handle_alloc"),
            env.native().handle_alloc(env.raw, HandleKind::Message, &mut raw)
        );
        let inner = Arc::new(MessageInner {
            type_info: self.inner.type_info.clone(),
            payload: Mutex::new(Value::Null),
        });
        let release = release_fn(move |api, _| api.handle_free(raw, HandleKind::Message));
        let entry = NewEntry::fetched(raw, HandleKind::Message, self.handle.id())
            .with_release(release)
            .with_payload(inner.clone());
        let message = Message {
            handle: Handle::register(env, entry)?,
            inner,
        };

        let mut payload = Datum::Null;
        let status = check!(
            session.ctx(env, "aq_dequeue").on(HandleKind::Dequeue),
            env.native().aq_dequeue(
                session_raw,
                session.err(),
                &self.inner.queue,
                options,
                raw,
                &mut payload
            )
        );
        if status == Status::NoData {
            tracing::trace!(queue = %self.inner.queue, "Dequeue wait time expired");
            return Ok(None);
        }

        let type_name = (!self.inner.type_info.is_raw()).then(|| self.inner.type_info.name());
        let scope = FetchScope {
            env,
            session,
            parent: message.handle.id(),
            type_name,
        };
        *message.inner.payload.lock() = Value::from_datum(payload, &scope)?;
        Ok(Some(message))
    }

    /// Consumer name for multi-consumer queues
    pub fn consumer(&self) -> Result<String> {
        self.descriptor().text(Attr::Consumer)
    }

    /// Set the consumer name
    pub fn set_consumer(&self, consumer: &str) -> Result<()> {
        self.descriptor()
            .set(Attr::Consumer, AttrValue::Text(consumer.to_string()))
    }

    /// Correlation filter
    pub fn correlation(&self) -> Result<String> {
        self.descriptor().text(Attr::Correlation)
    }

    /// Only dequeue messages with this correlation identifier
    pub fn set_correlation(&self, correlation: &str) -> Result<()> {
        self.descriptor()
            .set(Attr::Correlation, AttrValue::Text(correlation.to_string()))
    }

    /// Dequeue mode
    pub fn mode(&self) -> Result<DequeueMode> {
        Ok(match self.descriptor().uint(Attr::DequeueMode)? {
            1 => DequeueMode::Browse,
            2 => DequeueMode::Locked,
            5 => DequeueMode::RemoveNoData,
            _ => DequeueMode::Remove,
        })
    }

    /// Set the dequeue mode
    pub fn set_mode(&self, mode: DequeueMode) -> Result<()> {
        let code = match mode {
            DequeueMode::Browse => 1,
            DequeueMode::Locked => 2,
            DequeueMode::Remove => 3,
            DequeueMode::RemoveNoData => 5,
        };
        self.descriptor().set(Attr::DequeueMode, AttrValue::UInt(code))
    }

    /// Navigation
    pub fn navigation(&self) -> Result<Navigation> {
        Ok(match self.descriptor().uint(Attr::Navigation)? {
            1 => Navigation::FirstMessage,
            2 => Navigation::NextTransaction,
            _ => Navigation::NextMessage,
        })
    }

    /// Set the navigation
    pub fn set_navigation(&self, navigation: Navigation) -> Result<()> {
        let code = match navigation {
            Navigation::FirstMessage => 1,
            Navigation::NextTransaction => 2,
            Navigation::NextMessage => 3,
        };
        self.descriptor().set(Attr::Navigation, AttrValue::UInt(code))
    }

    /// Visibility of the dequeue
    pub fn visibility(&self) -> Result<Visibility> {
        visibility_from(self.descriptor().uint(Attr::Visibility)?)
    }

    /// Set the visibility
    pub fn set_visibility(&self, visibility: Visibility) -> Result<()> {
        self.descriptor()
            .set(Attr::Visibility, AttrValue::UInt(visibility_code(visibility)))
    }

    /// Seconds [`Dequeue::get`] waits, [`WAIT_FOREVER`] by default
    pub fn wait_time(&self) -> Result<i32> {
        self.descriptor().int(Attr::WaitTime)
    }

    /// Set the wait time in seconds
    pub fn set_wait_time(&self, seconds: i32) -> Result<()> {
        self.descriptor().set(Attr::WaitTime, AttrValue::Int(seconds))
    }

    /// Dequeue a specific message
    pub fn set_relative_msg_id(&self, id: &[u8]) -> Result<()> {
        self.descriptor().set(Attr::RelativeMsgId, AttrValue::Raw(id.to_vec()))
    }

    /// Call `handler` whenever a message becomes available on the queue
    ///
    /// Requires an environment initialized with
    /// [`EnvMode::EVENTS`](crate::EnvMode::EVENTS). Replaces a previous
    /// subscription of this dequeue.
    pub fn subscribe<F>(&self, port: u32, timeout: u32, handler: F) -> Result<()>
    where
        F: Fn(&Dequeue) + Send + Sync + 'static,
    {
        let env = self.env();
        env.ensure_events("queue notification")?;
        self.handle.raw()?;
        let session = self.session();
        let session_raw = session.raw(env)?;
        self.unsubscribe()?;

        let consumer = self.consumer()?;
        let spec = SubscriptionSpec {
            name: match consumer.is_empty() {
                true => self.inner.queue.clone(),
                false => format!("{}:{}", self.inner.queue, consumer),
            },
            namespace: Namespace::Queue {
                queue: self.inner.queue.clone(),
                consumer: (!consumer.is_empty()).then_some(consumer),
            },
            port,
            timeout,
        };

        let registry = &env.hub.registry;
        let key = registry.register(Some(self.handle.id()), Handler::Message(Arc::new(handler)));
        let mut raw = RawHandle::NULL;
        let status = env
            .native()
            .subscription_register(env.raw, session_raw, session.err(), &spec, key, &mut raw);
        if let Err(e) = Translator::check(&session.ctx(env, "subscription_register"), status) {
            registry.unregister(key);
            return Err(e);
        }

        let release = release_fn(move |api, err| api.subscription_unregister(raw, err));
        let entry = NewEntry::allocated(raw, HandleKind::Subscription, release).child_of(self.handle.id());
        let subscription = match Handle::register(env, entry) {
            Ok(handle) => handle,
            Err(e) => {
                registry.unregister(key);
                return Err(e);
            }
        };
        tracing::debug!(queue = %self.inner.queue, %key, "Queue notification registered");
        *self.inner.notification.lock() = Some((subscription, key));
        Ok(())
    }

    /// Stop message notifications
    pub fn unsubscribe(&self) -> Result<()> {
        let Some((subscription, key)) = self.inner.notification.lock().take() else {
            return Ok(());
        };
        self.env().hub.registry.unregister(key);
        subscription.release("subscription_unregister")
    }

    /// Check whether a message handler is installed
    pub fn is_subscribed(&self) -> bool {
        self.inner
            .notification
            .lock()
            .as_ref()
            .map(|(subscription, _)| subscription.is_valid())
            .unwrap_or(false)
    }
}

impl fmt::Debug for Dequeue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dequeue")
            .field("queue", &self.inner.queue)
            .field("handle", &self.handle.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_codes() {
        for visibility in [Visibility::Immediate, Visibility::OnCommit] {
            assert_eq!(visibility_from(visibility_code(visibility)).unwrap(), visibility);
        }
        assert_eq!(visibility_from(0).unwrap(), Visibility::OnCommit);
        assert!(visibility_from(9).is_err());
    }

    #[test]
    fn test_message_state_codes() {
        assert_eq!(MessageState::from_code(0), MessageState::Ready);
        assert_eq!(MessageState::from_code(3), MessageState::Expired);
        assert_eq!(MessageState::from_code(42), MessageState::Unknown);
    }
}
