//! Actor context
//!
//! The handle behavior code uses to talk to the runtime. It is bound to the
//! actor's worker (`!Send`), and every operation except [`ActorContext::recv`]
//! completes synchronously.

use crate::error::{Result, RuntimeError};
use crate::message::Message;
use crate::registry::ActorEntry;
use crate::system::SystemCore;
use crate::worker::{self, WorkerLocal};
use config::RuntimeConfig;
use std::fmt;
use std::net::TcpStream;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use timer::TimerScheduler;
use tracing::{info, warn};
use types::{ActorId, DescriptorId, Dict, TimerId};

/// Runtime handle passed to a behavior
#[derive(Clone)]
pub struct ActorContext {
    local: Rc<WorkerLocal>,
    entry: Arc<ActorEntry>,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ActorContext {
    pub(crate) fn new(local: Rc<WorkerLocal>, entry: Arc<ActorEntry>) -> Self {
        Self { local, entry }
    }

    pub(crate) fn core(&self) -> &SystemCore {
        &self.local.core
    }

    pub(crate) fn entry(&self) -> &ActorEntry {
        &self.entry
    }

    /// This actor's id
    pub fn id(&self) -> ActorId {
        self.entry.id()
    }

    /// Index of the worker running this actor
    pub fn worker(&self) -> usize {
        self.local.index
    }

    pub fn system_id(&self) -> &str {
        &self.local.core.system_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.local.core.config
    }

    /// Empty payload dict using the configured bucket count
    pub fn payload(&self) -> Dict {
        self.core().new_payload()
    }

    /// Spawn an actor on this actor's worker
    pub fn spawn(&self, module: &str, function: &str, args: Dict) -> Result<ActorId> {
        let (entry, behavior) = self.core().register_actor(self.worker(), module, function)?;
        let id = entry.id();
        worker::start_actor(&self.local, entry, behavior, args);

        self.core().metrics.record_spawn();
        info!(
            actor_id = %id,
            parent = %self.id(),
            worker = self.worker(),
            behavior = %format!("{}.{}", module, function),
            "Actor spawned"
        );
        Ok(id)
    }

    /// Fire-and-forget send; fails only if the destination does not exist
    pub fn send(&self, destination: ActorId, payload: Dict) -> Result<()> {
        self.core().send(Some(self.id()), destination, payload)
    }

    /// Wait for the next message and return its payload
    pub async fn recv(&self) -> Result<Dict> {
        self.recv_message().await.map(Message::into_payload)
    }

    /// Wait for the next message, keeping the envelope
    pub async fn recv_message(&self) -> Result<Message> {
        self.entry.mailbox.recv().await.ok_or(RuntimeError::Shutdown)
    }

    /// Take the next message if one is queued
    pub fn try_recv(&self) -> Option<Message> {
        self.entry.mailbox.try_recv()
    }

    /// Messages waiting in this actor's queue
    pub fn pending_messages(&self) -> usize {
        self.entry.mailbox.len()
    }

    /// Move a descriptor this actor owns to `destination`
    pub fn attach(&self, descriptor: DescriptorId, destination: ActorId) -> Result<()> {
        self.core()
            .transfer_descriptor(descriptor, destination, Some(self.id()))
            .inspect_err(|e| {
                warn!(actor_id = %self.id(), descriptor = %descriptor, error = %e, "Attach failed");
            })
    }

    /// Pull a descriptor from whichever actor owns it to this one. This is
    /// how a child takes over a connection its parent accepted. Listen
    /// sockets cannot be claimed.
    pub fn claim(&self, descriptor: DescriptorId) -> Result<()> {
        self.core()
            .transfer_descriptor(descriptor, self.id(), None)
            .inspect_err(|e| {
                warn!(actor_id = %self.id(), descriptor = %descriptor, error = %e, "Claim failed");
            })
    }

    /// Descriptors this actor currently owns
    pub fn descriptors(&self) -> Vec<DescriptorId> {
        self.entry.descriptors.lock().ids().to_vec()
    }

    /// Take a connection's socket for byte-level I/O
    pub fn take_stream(&self, descriptor: DescriptorId) -> Result<TcpStream> {
        self.core().take_stream(descriptor, Some(self.id()))
    }

    /// Close a descriptor this actor owns; closing the listen socket stops listening
    pub fn close_descriptor(&self, descriptor: DescriptorId) -> Result<()> {
        let is_listener = self
            .entry
            .listener
            .lock()
            .as_ref()
            .is_some_and(|slot| slot.descriptor() == descriptor);
        if is_listener {
            return self.stop_listening();
        }
        self.core().release_descriptor(descriptor, Some(self.id())).map(|_| ())
    }

    /// Schedule `callback` on this worker after `timeout`, then every `cycle`
    /// if non-zero.
    ///
    /// The callback runs inside the timer engine: it may add or cancel timers
    /// through the scheduler it is given, but calling timer methods on an
    /// `ActorContext` from inside it reports the engine as busy.
    pub fn add_timer<F>(&self, timeout: Duration, cycle: Duration, callback: F) -> Result<TimerId>
    where
        F: FnMut(&mut TimerScheduler, TimerId) + 'static,
    {
        self.local
            .add_actor_timer(self.id(), millis(timeout), millis(cycle), callback)
    }

    /// Cancel a timer this actor created
    pub fn cancel_timer(&self, timer: TimerId) -> Result<()> {
        self.local.cancel_actor_timer(self.id(), timer)
    }

    /// Deliver `payload` to `destination` once, after `timeout`
    pub fn send_after(&self, timeout: Duration, destination: ActorId, payload: Dict) -> Result<TimerId> {
        let core = Arc::clone(&self.local.core);
        let source = self.id();
        let mut payload = Some(payload);

        self.add_timer(timeout, Duration::ZERO, move |_, _| {
            if let Some(payload) = payload.take() {
                if let Err(e) = core.send(Some(source), destination, payload) {
                    warn!(actor_id = %source, error = %e, "Delayed send failed");
                }
            }
        })
    }

    /// Deliver a copy of `payload` to `destination` every `period`; stops on
    /// its own once the destination is gone
    pub fn send_every(&self, period: Duration, destination: ActorId, payload: Dict) -> Result<TimerId> {
        let core = Arc::clone(&self.local.core);
        let source = self.id();
        let period = period.max(Duration::from_millis(1));

        self.add_timer(period, period, move |timers, id| {
            if let Err(e) = core.send(Some(source), destination, payload.clone()) {
                warn!(actor_id = %source, timer = %id, error = %e, "Periodic send failed; stopping");
                let _ = timers.cancel(id);
            }
        })
    }
}

impl fmt::Debug for ActorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorContext")
            .field("id", &self.id())
            .field("worker", &self.worker())
            .field("behavior", &self.entry.behavior())
            .finish()
    }
}
