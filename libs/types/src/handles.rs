//! Typed handles
//!
//! Zero-cost wrappers over [`Id`] so actor, timer and descriptor handles can
//! never be mixed up. Each wrapper is a valid [`TableKey`] and packs into a
//! single `u64` for transport inside a [`Value::Opaque`](crate::Value).

use crate::id_table::{Id, TableKey};
use crate::value::OpaqueHandle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generates a typed id wrapper with a display prefix
macro_rules! define_typed_id {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(Id);

        impl $name {
            /// Wrap a raw table id
            #[inline(always)]
            pub const fn new(id: Id) -> Self {
                Self(id)
            }

            /// Extract the raw table id
            #[inline(always)]
            pub const fn inner(&self) -> Id {
                self.0
            }

            #[inline(always)]
            pub const fn to_bits(&self) -> u64 {
                self.0.to_bits()
            }

            #[inline(always)]
            pub const fn from_bits(bits: u64) -> Self {
                Self(Id::from_bits(bits))
            }

            /// Opaque form for embedding in payloads
            #[inline(always)]
            pub const fn to_opaque(&self) -> OpaqueHandle {
                OpaqueHandle(self.to_bits())
            }

            #[inline(always)]
            pub const fn from_opaque(handle: OpaqueHandle) -> Self {
                Self::from_bits(handle.0)
            }
        }

        impl TableKey for $name {
            #[inline(always)]
            fn from_id(id: Id) -> Self {
                Self(id)
            }

            #[inline(always)]
            fn id(&self) -> Id {
                self.0
            }
        }

        impl From<$name> for OpaqueHandle {
            fn from(id: $name) -> Self {
                id.to_opaque()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

define_typed_id!(
    /// Handle of a live actor
    ActorId, "actor"
);

define_typed_id!(
    /// Handle of a scheduled timer, local to one engine
    TimerId, "timer"
);

define_typed_id!(
    /// Handle of a network descriptor owned by an actor
    DescriptorId, "desc"
);
