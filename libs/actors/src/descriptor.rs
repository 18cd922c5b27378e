//! Network descriptors
//!
//! A descriptor wraps an OS-level handle (listen socket, accepted connection,
//! or a raw handle registered by an external I/O layer) and names the actor
//! that owns it. Each actor keeps the ids it owns in a [`DescriptorSet`]
//! guarded by its own short-lived lock; moving a descriptor between actors
//! only ever holds one of those locks at a time.
//!
//! Lock order: an actor's descriptor set, then a descriptor's owner cell.
//! The owner cell is a leaf and never held across another acquisition.

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use types::{ActorId, DescriptorId, IdTable, Result as StoreResult};

/// What the descriptor wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Listen socket driven by the owner's accept loop
    Listener,
    /// Accepted TCP connection
    Connection,
    /// Raw handle managed outside the runtime
    External(u64),
}

pub struct Descriptor {
    id: DescriptorId,
    kind: DescriptorKind,
    owner: Mutex<ActorId>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    stream: Mutex<Option<TcpStream>>,
}

impl Descriptor {
    pub fn id(&self) -> DescriptorId {
        self.id
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn owner(&self) -> ActorId {
        *self.owner.lock()
    }

    pub(crate) fn set_owner(&self, owner: ActorId) {
        *self.owner.lock() = owner;
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Move the connection stream out; only the first call gets it
    pub(crate) fn take_stream(&self) -> Option<TcpStream> {
        self.stream.lock().take()
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owner", &self.owner())
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Parameters for a new descriptor
#[derive(Debug)]
pub struct DescriptorSpec {
    pub kind: DescriptorKind,
    pub owner: ActorId,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
    pub stream: Option<TcpStream>,
}

impl DescriptorSpec {
    pub fn listener(owner: ActorId, local_addr: SocketAddr) -> Self {
        Self {
            kind: DescriptorKind::Listener,
            owner,
            local_addr: Some(local_addr),
            peer_addr: None,
            stream: None,
        }
    }

    pub fn connection(owner: ActorId, stream: TcpStream) -> Self {
        Self {
            kind: DescriptorKind::Connection,
            owner,
            local_addr: stream.local_addr().ok(),
            peer_addr: stream.peer_addr().ok(),
            stream: Some(stream),
        }
    }

    pub fn external(owner: ActorId, handle: u64) -> Self {
        Self {
            kind: DescriptorKind::External(handle),
            owner,
            local_addr: None,
            peer_addr: None,
            stream: None,
        }
    }
}

/// Process-wide table of live descriptors
#[derive(Debug, Default)]
pub struct DescriptorTable {
    table: RwLock<IdTable<DescriptorId, Arc<Descriptor>>>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, spec: DescriptorSpec) -> StoreResult<Arc<Descriptor>> {
        let mut table = self.table.write();
        let id = table.try_insert_with(|id| {
            Arc::new(Descriptor {
                id,
                kind: spec.kind,
                owner: Mutex::new(spec.owner),
                local_addr: spec.local_addr,
                peer_addr: spec.peer_addr,
                stream: Mutex::new(spec.stream),
            })
        })?;
        table
            .get(id)
            .cloned()
            .ok_or_else(|| types::StoreError::allocation_failed("descriptor slot"))
    }

    pub fn get(&self, id: DescriptorId) -> Option<Arc<Descriptor>> {
        self.table.read().get(id).cloned()
    }

    /// Drop the table's reference; the socket closes with the last reference
    pub fn remove(&self, id: DescriptorId) -> Option<Arc<Descriptor>> {
        self.table.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Descriptors owned by one actor
#[derive(Debug, Default)]
pub struct DescriptorSet {
    ids: Vec<DescriptorId>,
    /// Set once the actor is destroyed; nothing may be linked afterwards
    closed: bool,
}

impl DescriptorSet {
    /// Link a descriptor; refused once the owner is gone
    pub fn link(&mut self, id: DescriptorId) -> bool {
        if self.closed {
            return false;
        }
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
        true
    }

    /// Unlink a descriptor; false if it was not in the set
    pub fn unlink(&mut self, id: DescriptorId) -> bool {
        match self.ids.iter().position(|d| *d == id) {
            Some(pos) => {
                self.ids.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: DescriptorId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> &[DescriptorId] {
        &self.ids
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the set and hand back everything it held
    pub fn close(&mut self) -> Vec<DescriptorId> {
        self.closed = true;
        std::mem::take(&mut self.ids)
    }
}
