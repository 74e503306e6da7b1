//! Handle-backed and composite data types
//!
//! Scalars map directly onto [`Value`](crate::Value) variants; the types in
//! this module wrap native resources (LOB locators, object instances,
//! references and collections) or need their own representation (intervals).

mod collection;
mod interval;
mod lob;
mod object;

pub use collection::Collection;
pub use interval::{Interval, IntervalKind};
pub use lob::{Lob, LobData};
pub use object::{Object, Reference, TypeInfo};
