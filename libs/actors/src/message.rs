//! Actor messages
//!
//! A message is an envelope around a [`Dict`] payload. The payload moves into
//! the destination's queue on send and out again on receive; nothing else ever
//! holds a reference to it.

use std::fmt;
use types::{ActorId, Dict};

/// Immutable message envelope
#[derive(Clone, PartialEq)]
pub struct Message {
    source: Option<ActorId>,
    destination: ActorId,
    payload: Dict,
}

impl Message {
    pub fn new(source: Option<ActorId>, destination: ActorId, payload: Dict) -> Self {
        Self {
            source,
            destination,
            payload,
        }
    }

    /// Sending actor; `None` for messages injected from outside the runtime
    pub fn source(&self) -> Option<ActorId> {
        self.source
    }

    pub fn destination(&self) -> ActorId {
        self.destination
    }

    pub fn payload(&self) -> &Dict {
        &self.payload
    }

    /// Discard the envelope and keep the payload
    pub fn into_payload(self) -> Dict {
        self.payload
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("entries", &self.payload.len())
            .finish()
    }
}
