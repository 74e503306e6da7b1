#![warn(missing_docs)]

//! # ocibind
//!
//! A resource-managed binding over a native database call interface.
//!
//! Every native handle the binding touches is wrapped in a reference-counted
//! proxy registered in a per-environment handle table. Proxies record who
//! owns them: closing a connection closes its statements, a statement's
//! resultset, the rows' LOBs and objects, and so on down the chain. Native
//! resources are released exactly once, in child-before-parent order, no
//! matter how many clones of a proxy are alive or in what order they drop.
//!
//! Native status codes are translated into [`Error`] values carrying the
//! native diagnostic, and asynchronous native notifications (database
//! changes, queue messages, HA events, failover) are routed through a
//! callback registry to typed handlers.
//!
//! ## Features
//!
//! - **Ownership chain** - environment, connection, statement, resultset,
//!   LOB, object and queue handles released in dependency order
//! - **Error translation** - native diagnostics and warnings as [`Error`]
//! - **Pools** - session pools with busy/open counters and timeouts
//! - **Statements** - named and positional binds, array DML with batch
//!   errors, RETURNING INTO, PL/SQL out binds, interrupts, scrollable
//!   result sets, server output
//! - **Large objects and object types** - LOBs, objects, REFs, VARRAYs and
//!   nested tables
//! - **Advanced queuing** - enqueue, dequeue, browse and listen
//! - **Notifications** - change subscriptions delivered through a bounded
//!   event queue
//! - **In-memory client** - [`native::memory::MemoryClient`] emulates the
//!   native library for tests and examples
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ocibind::native::memory::MemoryClient;
//! use ocibind::{Connection, ConnectParams, Environment, EnvironmentConfig, Statement};
//!
//! # fn main() -> ocibind::Result<()> {
//! let env = Environment::initialize(EnvironmentConfig::new(), Arc::new(MemoryClient::new()))?;
//! let conn = Connection::open(&env, &"scott/tiger@memdb".parse::<ConnectParams>()?)?;
//!
//! let stmt = Statement::new(&conn)?;
//! stmt.execute_sql("CREATE TABLE users (id NUMBER PRIMARY KEY, name VARCHAR2(30))")?;
//! stmt.prepare("INSERT INTO users VALUES (:id, :name)")?;
//! stmt.bind("id", 1)?;
//! stmt.bind("name", "Alice")?;
//! stmt.execute()?;
//! conn.commit()?;
//!
//! stmt.execute_sql("SELECT id, name FROM users")?;
//! let rs = stmt.resultset()?;
//! while rs.next()? {
//!     let id: i64 = rs.get(1)?;
//!     let name: String = rs.get("NAME")?;
//!     println!("User {}: {}", id, name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Releasing resources
//!
//! Dropping the last clone of a proxy releases its native resource.
//! [`Environment::cleanup`] releases everything that is still open and
//! returns how many handles that was.

pub mod aq;
pub mod callback;
pub mod config;
pub mod connection;
pub mod constants;
pub mod environment;
pub mod error;
pub mod handle;
pub mod native;
pub mod pool;
pub mod resultset;
pub mod row;
pub mod statement;
mod status;
pub mod subscription;
pub mod sync;
pub mod types;

pub use aq::{
    Agent, Dequeue, DequeueMode, Enqueue, EnqueueMode, Message, MessageState, Navigation, Visibility,
};
pub use callback::ContextKey;
pub use config::{ConnectParams, EnvMode, EnvironmentConfig, PoolConfig, SessionMode};
pub use connection::{Connection, FailoverEvent, FailoverRequest, FailoverResult, Transaction};
pub use environment::{Environment, HaEvent, HaEventType, HaSource};
pub use error::{DbError, Error, ErrorKind, Result};
pub use handle::{Handle, HandleId, HandleState};
pub use native::{BindDirection, CollectionKind, LobKind};
pub use pool::Pool;
pub use resultset::{Column, Resultset, SeekMode};
pub use row::{ColumnRef, FromValue, Row, Value};
pub use statement::{BatchError, BindInfo, FetchMode, Statement, StatementType};
pub use subscription::{ChangeTypes, Event, EventType, ObjectEvent, Subscription};
pub use types::{Collection, Interval, IntervalKind, Lob, LobData, Object, Reference, TypeInfo};
