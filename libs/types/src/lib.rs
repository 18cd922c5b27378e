//! # Spindle Types
//!
//! Shared data types for the Spindle actor runtime.
//!
//! - [`Dict`] / [`Value`]: the hash-chained keyed value store used for message
//!   payloads, listen options and general actor state
//! - [`IdTable`]: generational slot table handing out small reusable ids
//! - [`ActorId`], [`TimerId`], [`DescriptorId`]: typed handles over table ids
//!
//! ```rust
//! use types::{Dict, Value};
//!
//! let mut payload = Dict::new(5);
//! payload.set("op", "ping").unwrap();
//! assert_eq!(payload.get("op").and_then(Value::as_str), Some("ping"));
//! ```

pub mod dict;
pub mod error;
pub mod handles;
pub mod id_table;
pub mod value;

pub use dict::{Dict, DictCursor, Iter as DictIter, DEFAULT_BUCKETS};
pub use error::{Result, StoreError};
pub use handles::{ActorId, DescriptorId, TimerId};
pub use id_table::{Id, IdTable, TableKey};
pub use value::{OpaqueHandle, Value};
