//! Actor Registry
//!
//! Maps live [`ActorId`]s to their shared entries. Ids come from a
//! generational [`IdTable`], so an id held past its actor's destruction never
//! resolves to a later actor that reused the slot.

use crate::descriptor::DescriptorSet;
use crate::mailbox::Mailbox;
use crate::net::ListenerSlot;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use types::{ActorId, IdTable, Result as StoreResult};

/// State of one actor shared across workers.
///
/// Everything reachable from another thread sits behind its own lock: the
/// mailbox for senders, the descriptor set for transfers.
#[derive(Debug)]
pub struct ActorEntry {
    id: ActorId,
    worker: usize,
    behavior: String,
    spawned_at: Instant,
    pub(crate) mailbox: Mailbox,
    pub(crate) descriptors: Mutex<DescriptorSet>,
    pub(crate) listener: Mutex<Option<ListenerSlot>>,
}

impl ActorEntry {
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Index of the worker the actor is bound to
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// `module.function` the actor runs
    pub fn behavior(&self) -> &str {
        &self.behavior
    }

    pub fn spawned_at(&self) -> Instant {
        self.spawned_at
    }

    pub fn queued_messages(&self) -> usize {
        self.mailbox.len()
    }
}

#[derive(Debug, Default)]
pub struct ActorRegistry {
    actors: RwLock<IdTable<ActorId, Arc<ActorEntry>>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and entry for a new actor
    pub fn register(&self, worker: usize, behavior: String) -> StoreResult<Arc<ActorEntry>> {
        let mut actors = self.actors.write();
        let id = actors.try_insert_with(|id| {
            Arc::new(ActorEntry {
                id,
                worker,
                behavior,
                spawned_at: Instant::now(),
                mailbox: Mailbox::new(),
                descriptors: Mutex::new(DescriptorSet::default()),
                listener: Mutex::new(None),
            })
        })?;
        tracing::debug!(actor_id = %id, worker, "Registered actor");
        actors
            .get(id)
            .cloned()
            .ok_or_else(|| types::StoreError::allocation_failed("actor slot"))
    }

    pub fn get(&self, id: ActorId) -> Option<Arc<ActorEntry>> {
        self.actors.read().get(id).cloned()
    }

    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.read().contains(id)
    }

    /// Unregister; the id is free for reuse under a new generation afterwards
    pub fn remove(&self, id: ActorId) -> Option<Arc<ActorEntry>> {
        let removed = self.actors.write().remove(id);
        if removed.is_some() {
            tracing::debug!(actor_id = %id, "Unregistered actor");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.actors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ActorId> {
        self.actors.read().keys().collect()
    }

    /// Ids of actors bound to one worker
    pub fn ids_on_worker(&self, worker: usize) -> Vec<ActorId> {
        self.actors
            .read()
            .iter()
            .filter(|(_, entry)| entry.worker == worker)
            .map(|(id, _)| id)
            .collect()
    }
}
