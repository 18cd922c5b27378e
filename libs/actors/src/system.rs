//! Actor System Core
//!
//! Owns the worker threads and the process-scoped state every worker shares:
//! the actor registry, the descriptor table, the behavior registry and the
//! metrics. Nothing here is global; each [`ActorSystem`] is self-contained,
//! so tests can run several side by side.
//!
//! # Lock Ordering
//!
//! 1. `registry` (read or write), never held across another acquisition
//! 2. one actor's `descriptors` set
//! 3. a descriptor's owner cell
//!
//! A descriptor transfer takes the source set, releases it, then takes the
//! target set. Two sets are never held at once, so transfers in opposite
//! directions between the same pair of actors cannot deadlock.

use crate::behavior::{Behavior, BehaviorRegistry};
use crate::descriptor::{Descriptor, DescriptorKind, DescriptorSpec, DescriptorTable};
use crate::error::{Result, RuntimeError};
use crate::message::Message;
use crate::registry::{ActorEntry, ActorRegistry};
use crate::worker::{self, WorkerCommand, WorkerHandle};
use config::RuntimeConfig;
use parking_lot::Mutex;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use types::{ActorId, DescriptorId, Dict};
use serde::Serialize;
use uuid::Uuid;

/// System-wide counters
#[derive(Debug, Default)]
pub struct SystemMetrics {
    pub actors_spawned: AtomicU64,
    pub actors_stopped: AtomicU64,
    pub spawn_failures: AtomicU64,
    pub behavior_failures: AtomicU64,

    // Messaging
    pub messages_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub messages_dropped: AtomicU64,

    // Descriptors
    pub descriptors_opened: AtomicU64,
    pub descriptors_closed: AtomicU64,
    pub descriptors_transferred: AtomicU64,
    pub connections_accepted: AtomicU64,
}

impl SystemMetrics {
    pub fn record_spawn(&self) {
        self.actors_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_behavior_failure(&self) {
        self.behavior_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an actor teardown and the messages discarded with it
    pub fn record_actor_stopped(&self, dropped_messages: usize) {
        self.actors_stopped.fetch_add(1, Ordering::Relaxed);
        self.messages_dropped
            .fetch_add(dropped_messages as u64, Ordering::Relaxed);
    }

    pub fn record_send(&self, delivered: bool) {
        if delivered {
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_descriptor_opened(&self) {
        self.descriptors_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_descriptors_closed(&self, count: usize) {
        self.descriptors_closed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_transfer(&self) {
        self.descriptors_transferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get metrics snapshot
    pub fn get_stats(&self) -> SystemStats {
        SystemStats {
            actors_spawned: self.actors_spawned.load(Ordering::Relaxed),
            actors_stopped: self.actors_stopped.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures.load(Ordering::Relaxed),
            behavior_failures: self.behavior_failures.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            descriptors_opened: self.descriptors_opened.load(Ordering::Relaxed),
            descriptors_closed: self.descriptors_closed.load(Ordering::Relaxed),
            descriptors_transferred: self.descriptors_transferred.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SystemMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemStats {
    pub actors_spawned: u64,
    pub actors_stopped: u64,
    pub spawn_failures: u64,
    pub behavior_failures: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub messages_dropped: u64,
    pub descriptors_opened: u64,
    pub descriptors_closed: u64,
    pub descriptors_transferred: u64,
    pub connections_accepted: u64,
}

impl SystemStats {
    /// Actors spawned and not yet torn down
    pub fn live_actors(&self) -> u64 {
        self.actors_spawned.saturating_sub(self.actors_stopped)
    }
}

/// State shared by the system handle and every worker
pub(crate) struct SystemCore {
    pub(crate) system_id: String,
    pub(crate) config: RuntimeConfig,
    pub(crate) behaviors: BehaviorRegistry,
    pub(crate) registry: ActorRegistry,
    pub(crate) descriptors: DescriptorTable,
    pub(crate) metrics: Arc<SystemMetrics>,
    pub(crate) workers: Vec<WorkerHandle>,
}

impl SystemCore {
    /// Empty payload sized for runtime messages
    pub(crate) fn new_payload(&self) -> Dict {
        Dict::new(self.config.payload_buckets)
    }

    /// Resolve the behavior and allocate the actor entry on `worker`
    pub(crate) fn register_actor(
        &self,
        worker: usize,
        module: &str,
        function: &str,
    ) -> Result<(Arc<ActorEntry>, Arc<dyn Behavior>)> {
        let behavior = self.behaviors.resolve(module, function).inspect_err(|e| {
            self.metrics.record_spawn_failure();
            warn!(module, function, error = %e, "Spawn failed");
        })?;

        let entry = self
            .registry
            .register(worker, format!("{}.{}", module, function))
            .inspect_err(|_| self.metrics.record_spawn_failure())?;
        Ok((entry, behavior))
    }

    /// Append a message to the destination's queue
    pub(crate) fn send(&self, source: Option<ActorId>, destination: ActorId, payload: Dict) -> Result<()> {
        let Some(entry) = self.registry.get(destination) else {
            self.metrics.record_send(false);
            debug!(destination = %destination, "Send to unknown actor");
            return Err(RuntimeError::actor_not_found(destination));
        };

        if entry
            .mailbox
            .push(Message::new(source, destination, payload))
            .is_err()
        {
            self.metrics.record_send(false);
            return Err(RuntimeError::actor_not_found(destination));
        }

        self.metrics.record_send(true);
        trace!(
            source = ?source,
            destination = %destination,
            worker = entry.worker(),
            "Message enqueued"
        );
        Ok(())
    }

    /// Unregister an actor and release everything it owns
    pub(crate) fn destroy_actor(&self, id: ActorId) {
        let Some(entry) = self.registry.remove(id) else {
            return;
        };

        let dropped = entry.mailbox.close();
        if let Some(listener) = entry.listener.lock().take() {
            listener.stop();
        }
        let owned = entry.descriptors.lock().close();
        for descriptor in &owned {
            self.descriptors.remove(*descriptor);
        }

        self.metrics.record_actor_stopped(dropped);
        self.metrics.record_descriptors_closed(owned.len());
        info!(
            actor_id = %id,
            behavior = entry.behavior(),
            dropped_messages = dropped,
            closed_descriptors = owned.len(),
            lifetime_ms = entry.spawned_at().elapsed().as_millis() as u64,
            "Actor destroyed"
        );
    }

    /// Create a descriptor and link it into its owner's set
    pub(crate) fn open_descriptor(&self, spec: DescriptorSpec) -> Result<DescriptorId> {
        let owner = spec.owner;
        let entry = self
            .registry
            .get(owner)
            .ok_or_else(|| RuntimeError::actor_not_found(owner))?;

        let descriptor = self.descriptors.insert(spec)?.id();
        if !entry.descriptors.lock().link(descriptor) {
            self.descriptors.remove(descriptor);
            return Err(RuntimeError::actor_not_found(owner));
        }

        self.metrics.record_descriptor_opened();
        debug!(actor_id = %owner, descriptor = %descriptor, "Descriptor opened");
        Ok(descriptor)
    }

    fn lookup_descriptor(&self, descriptor: DescriptorId) -> Result<Arc<Descriptor>> {
        self.descriptors
            .get(descriptor)
            .ok_or_else(|| RuntimeError::descriptor_not_found(descriptor))
    }

    /// Move a descriptor to `to`.
    ///
    /// With `caller` set, only the current owner may move it. Moving to the
    /// current owner is a no-op.
    pub(crate) fn transfer_descriptor(
        &self,
        descriptor: DescriptorId,
        to: ActorId,
        caller: Option<ActorId>,
    ) -> Result<()> {
        let desc = self.lookup_descriptor(descriptor)?;
        let from = desc.owner();
        if let Some(caller) = caller {
            if caller != from {
                return Err(RuntimeError::descriptor_not_owned(descriptor, caller));
            }
        }
        if from == to {
            return Ok(());
        }
        if desc.kind() == DescriptorKind::Listener {
            return Err(RuntimeError::invalid_descriptor(
                descriptor,
                "listen sockets stay with the actor running the accept loop",
            ));
        }

        let source = self
            .registry
            .get(from)
            .ok_or_else(|| RuntimeError::descriptor_not_found(descriptor))?;
        let target = self
            .registry
            .get(to)
            .ok_or_else(|| RuntimeError::actor_not_found(to))?;

        if !source.descriptors.lock().unlink(descriptor) {
            // lost a race with another transfer or a teardown
            return Err(RuntimeError::descriptor_not_owned(descriptor, from));
        }

        let linked = {
            let mut set = target.descriptors.lock();
            let linked = set.link(descriptor);
            if linked {
                desc.set_owner(to);
            }
            linked
        };

        if linked {
            self.metrics.record_transfer();
            debug!(descriptor = %descriptor, from = %from, to = %to, "Descriptor transferred");
            return Ok(());
        }

        // Target was destroyed mid-transfer: hand it back, or close it if the
        // source is gone too.
        if !source.descriptors.lock().link(descriptor) {
            self.descriptors.remove(descriptor);
            self.metrics.record_descriptors_closed(1);
        }
        Err(RuntimeError::actor_not_found(to))
    }

    /// Unlink a descriptor from its owner and drop it from the table
    pub(crate) fn release_descriptor(
        &self,
        descriptor: DescriptorId,
        caller: Option<ActorId>,
    ) -> Result<Arc<Descriptor>> {
        let desc = self.lookup_descriptor(descriptor)?;
        let owner = desc.owner();
        if let Some(caller) = caller {
            if caller != owner {
                return Err(RuntimeError::descriptor_not_owned(descriptor, caller));
            }
        }

        if let Some(entry) = self.registry.get(owner) {
            if !entry.descriptors.lock().unlink(descriptor) {
                return Err(RuntimeError::descriptor_not_owned(descriptor, owner));
            }
        }
        self.descriptors.remove(descriptor);
        self.metrics.record_descriptors_closed(1);
        debug!(actor_id = %owner, descriptor = %descriptor, "Descriptor released");
        Ok(desc)
    }

    /// Hand a connection's stream to an external I/O layer
    pub(crate) fn take_stream(&self, descriptor: DescriptorId, caller: Option<ActorId>) -> Result<TcpStream> {
        let desc = self.lookup_descriptor(descriptor)?;
        if desc.kind() != DescriptorKind::Connection {
            return Err(RuntimeError::invalid_descriptor(descriptor, "not a connection"));
        }
        let desc = self.release_descriptor(descriptor, caller)?;
        desc.take_stream()
            .ok_or_else(|| RuntimeError::invalid_descriptor(descriptor, "stream already taken"))
    }

    pub(crate) fn descriptors_of(&self, actor: ActorId) -> Result<Vec<DescriptorId>> {
        let entry = self
            .registry
            .get(actor)
            .ok_or_else(|| RuntimeError::actor_not_found(actor))?;
        let ids = entry.descriptors.lock().ids().to_vec();
        Ok(ids)
    }
}

/// Core actor system managing workers, actor lifecycles and routing
pub struct ActorSystem {
    core: Arc<SystemCore>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    next_worker: AtomicUsize,
    stopped: AtomicBool,
}

impl ActorSystem {
    /// Start `config.workers` worker threads
    pub fn new(config: RuntimeConfig, behaviors: BehaviorRegistry) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RuntimeError::configuration(format!("{:#}", e), None))?;

        let system_id = format!("system-{}", Uuid::new_v4());
        info!(
            system_id = %system_id,
            workers = config.workers,
            behaviors = behaviors.len(),
            "Creating new actor system"
        );

        let mut handles = Vec::with_capacity(config.workers);
        let mut receivers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let (commands, receiver) = mpsc::unbounded_channel();
            handles.push(WorkerHandle { index, commands });
            receivers.push(receiver);
        }

        let core = Arc::new(SystemCore {
            system_id,
            config,
            behaviors,
            registry: ActorRegistry::new(),
            descriptors: DescriptorTable::new(),
            metrics: Arc::new(SystemMetrics::default()),
            workers: handles,
        });

        let mut threads = Vec::with_capacity(receivers.len());
        for (index, receiver) in receivers.into_iter().enumerate() {
            match worker::spawn_worker(index, Arc::clone(&core), receiver) {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    error!(worker = index, error = %e, "Failed to start worker thread");
                    for worker in &core.workers {
                        let _ = worker.commands.send(WorkerCommand::Shutdown);
                    }
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(RuntimeError::io("failed to start worker thread", e));
                }
            }
        }

        Ok(Self {
            core,
            threads: Mutex::new(threads),
            next_worker: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn system_id(&self) -> &str {
        &self.core.system_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.core.config
    }

    pub fn worker_count(&self) -> usize {
        self.core.workers.len()
    }

    /// Spawn an actor on the next worker in round-robin order
    pub fn spawn(&self, module: &str, function: &str, args: Dict) -> Result<ActorId> {
        let worker = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_count();
        self.spawn_on(worker, module, function, args)
    }

    /// Spawn an actor bound to a specific worker
    pub fn spawn_on(&self, worker: usize, module: &str, function: &str, args: Dict) -> Result<ActorId> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(RuntimeError::Shutdown);
        }
        let handle = self
            .core
            .workers
            .get(worker)
            .ok_or_else(|| RuntimeError::worker_unavailable(worker))?;

        let (entry, behavior) = self.core.register_actor(worker, module, function)?;
        let id = entry.id();
        if handle
            .commands
            .send(WorkerCommand::Spawn { id, behavior, args })
            .is_err()
        {
            self.core.registry.remove(id);
            self.core.metrics.record_spawn_failure();
            return Err(RuntimeError::worker_unavailable(worker));
        }

        self.core.metrics.record_spawn();
        info!(
            actor_id = %id,
            system_id = %self.core.system_id,
            worker,
            behavior = entry.behavior(),
            "Actor spawned"
        );
        Ok(id)
    }

    /// Send a message from outside any actor
    pub fn send(&self, destination: ActorId, payload: Dict) -> Result<()> {
        self.core.send(None, destination, payload)
    }

    /// Empty payload dict using the configured bucket count
    pub fn new_payload(&self) -> Dict {
        self.core.new_payload()
    }

    pub fn is_alive(&self, actor: ActorId) -> bool {
        self.core.registry.contains(actor)
    }

    pub fn actor_count(&self) -> usize {
        self.core.registry.len()
    }

    pub fn list_actors(&self) -> Vec<ActorId> {
        self.core.registry.ids()
    }

    /// Track a raw handle managed by an external I/O layer
    pub fn register_descriptor(&self, owner: ActorId, handle: u64) -> Result<DescriptorId> {
        self.core.open_descriptor(DescriptorSpec::external(owner, handle))
    }

    /// Move a descriptor to another actor regardless of its current owner
    pub fn transfer_descriptor(&self, descriptor: DescriptorId, to: ActorId) -> Result<()> {
        self.core.transfer_descriptor(descriptor, to, None)
    }

    pub fn descriptor_owner(&self, descriptor: DescriptorId) -> Option<ActorId> {
        self.core.descriptors.get(descriptor).map(|d| d.owner())
    }

    pub fn descriptors_of(&self, actor: ActorId) -> Result<Vec<DescriptorId>> {
        self.core.descriptors_of(actor)
    }

    /// Close a descriptor regardless of its owner
    pub fn close_descriptor(&self, descriptor: DescriptorId) -> Result<()> {
        self.core.release_descriptor(descriptor, None).map(|_| ())
    }

    /// Take a connection's socket out of the runtime for byte-level I/O
    pub fn take_stream(&self, descriptor: DescriptorId) -> Result<TcpStream> {
        self.core.take_stream(descriptor, None)
    }

    /// Get system metrics
    pub fn metrics(&self) -> Arc<SystemMetrics> {
        Arc::clone(&self.core.metrics)
    }

    pub fn stats(&self) -> SystemStats {
        self.core.metrics.get_stats()
    }

    /// Stop every worker and wait for its thread; actors still running are
    /// torn down on their worker. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down actor system {}", self.core.system_id);

        for worker in &self.core.workers {
            let _ = worker.commands.send(WorkerCommand::Shutdown);
        }

        let threads = std::mem::take(&mut *self.threads.lock());
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                warn!("Shutdown requested from a worker thread; not joining it");
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }

        info!(
            system_id = %self.core.system_id,
            stats = ?self.core.metrics.get_stats(),
            "Actor system shutdown complete"
        );
    }
}

impl Drop for ActorSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
