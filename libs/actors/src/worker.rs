//! Worker threads
//!
//! Each worker is an OS thread running a single-threaded tokio runtime with a
//! `LocalSet`. Actor behaviors run as local tasks, so only one actor executes
//! on a worker at a time and it keeps the thread until its next `.await`.
//! The worker also owns one timer [`Engine`]: its loop sleeps until the next
//! timer deadline, a command, or a local timer change, then fires every due
//! timer.
//!
//! ```text
//!   commands ──► ┌─────────────── worker loop ───────────────┐
//!                │ select! { command | timer_wake | sleep }  │
//!                │            └──► engine.tick()             │
//!                └───────────────────────────────────────────┘
//!   actor tasks (spawn_local) ── recv().await parks on the mailbox
//! ```

use crate::behavior::Behavior;
use crate::context::ActorContext;
use crate::error::{Result, RuntimeError};
use crate::registry::ActorEntry;
use crate::system::SystemCore;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use timer::{Engine, TimerError, TimerScheduler};
use tokio::sync::{mpsc, Notify};
use tokio::task::LocalSet;
use tracing::{debug, error, info, trace, warn};
use types::{ActorId, Dict, TimerId};

/// Requests delivered to a worker thread
pub(crate) enum WorkerCommand {
    /// Start an actor already registered on this worker
    Spawn {
        id: ActorId,
        behavior: Arc<dyn Behavior>,
        args: Dict,
    },
    Shutdown,
}

/// Sending side of a worker's command queue
pub(crate) struct WorkerHandle {
    pub(crate) index: usize,
    pub(crate) commands: mpsc::UnboundedSender<WorkerCommand>,
}

/// Per-worker state; never leaves the worker thread
pub(crate) struct WorkerLocal {
    pub(crate) index: usize,
    pub(crate) core: Arc<SystemCore>,
    engine: RefCell<Engine>,
    /// Wakes the loop so it recomputes its sleep after a timer change
    timer_wake: Notify,
}

impl WorkerLocal {
    fn new(index: usize, core: Arc<SystemCore>) -> Self {
        Self {
            index,
            core,
            engine: RefCell::new(Engine::default()),
            timer_wake: Notify::new(),
        }
    }

    /// Schedule a timer on this worker's engine on behalf of `owner`.
    ///
    /// The timer is tagged with the owner, and so is every timer its callback
    /// adds through the scheduler.
    pub(crate) fn add_actor_timer<F>(&self, owner: ActorId, timeout: u64, cycle: u64, callback: F) -> Result<TimerId>
    where
        F: FnMut(&mut TimerScheduler, TimerId) + 'static,
    {
        let mut engine = self
            .engine
            .try_borrow_mut()
            .map_err(|_| RuntimeError::from(TimerError::busy("add_timer")))?;
        let id = engine.add_tagged_timer(owner.to_bits(), timeout, cycle, callback)?;
        drop(engine);

        self.timer_wake.notify_one();
        trace!(actor_id = %owner, timer = %id, timeout, cycle, worker = self.index, "Timer added");
        Ok(id)
    }

    /// Cancel a timer `owner` created
    pub(crate) fn cancel_actor_timer(&self, owner: ActorId, id: TimerId) -> Result<()> {
        let mut engine = self
            .engine
            .try_borrow_mut()
            .map_err(|_| RuntimeError::from(TimerError::busy("cancel_timer")))?;
        if engine.timers().tag(id) != Some(owner.to_bits()) {
            return Err(TimerError::unknown_timer(id).into());
        }
        engine.cancel_timer(id)?;
        Ok(())
    }

    fn fire_timers(&self) {
        match self.engine.try_borrow_mut() {
            Ok(mut engine) => {
                let fired = engine.tick();
                if fired > 0 {
                    trace!(worker = self.index, fired, "Timers fired");
                }
            }
            Err(_) => warn!(worker = self.index, "Timer engine busy; skipping tick"),
        }
    }

    fn next_wait(&self) -> Option<Duration> {
        self.engine.try_borrow().ok().and_then(|engine| engine.next_wait())
    }

    /// Release everything an actor held on this worker and unregister it
    fn teardown(&self, id: ActorId) {
        match self.engine.try_borrow_mut() {
            Ok(mut engine) => {
                let cancelled = engine.timers_mut().cancel_tagged(id.to_bits());
                if cancelled > 0 {
                    trace!(actor_id = %id, cancelled, "Actor timers cancelled");
                }
            }
            Err(_) => warn!(actor_id = %id, "Timer engine busy; actor timers left to expire"),
        }
        self.core.destroy_actor(id);
    }
}

/// Tears the actor down when its task ends, including by panic or abort
struct ActorGuard {
    local: Rc<WorkerLocal>,
    id: ActorId,
}

impl Drop for ActorGuard {
    fn drop(&mut self) {
        self.local.teardown(self.id);
    }
}

/// Run an actor's behavior as a local task on this worker
pub(crate) fn start_actor(
    local: &Rc<WorkerLocal>,
    entry: Arc<ActorEntry>,
    behavior: Arc<dyn Behavior>,
    args: Dict,
) {
    let id = entry.id();
    let guard = ActorGuard {
        local: Rc::clone(local),
        id,
    };
    let ctx = ActorContext::new(Rc::clone(local), entry);

    tokio::task::spawn_local(async move {
        let guard = guard;
        match behavior.run(ctx, args).await {
            Ok(results) => {
                debug!(actor_id = %id, results = results.len(), "Actor behavior finished");
            }
            Err(e) => {
                guard.local.core.metrics.record_behavior_failure();
                error!(
                    actor_id = %id,
                    error = %e,
                    category = e.category(),
                    "Actor behavior failed"
                );
            }
        }
    });
}

/// Spawn the OS thread for worker `index`
pub(crate) fn spawn_worker(
    index: usize,
    core: Arc<SystemCore>,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("spindle-worker-{}", index))
        .spawn(move || run_worker(index, core, commands))
}

fn run_worker(index: usize, core: Arc<SystemCore>, commands: mpsc::UnboundedReceiver<WorkerCommand>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(worker = index, error = %e, "Failed to build worker runtime");
            return;
        }
    };

    let local = Rc::new(WorkerLocal::new(index, core));
    let tasks = LocalSet::new();
    info!(worker = index, "Worker started");

    tasks.block_on(&runtime, worker_loop(Rc::clone(&local), commands));

    // Dropping the set drops the remaining actor tasks, whose guards tear them down.
    drop(tasks);
    let stats = local.engine.borrow().stats();
    info!(worker = index, timers_fired = stats.fired, "Worker stopped");
    drop(local);
    drop(runtime);
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

async fn worker_loop(local: Rc<WorkerLocal>, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
    loop {
        let wait = local.next_wait();

        tokio::select! {
            command = commands.recv() => match command {
                Some(WorkerCommand::Spawn { id, behavior, args }) => {
                    match local.core.registry.get(id) {
                        Some(entry) => start_actor(&local, entry, behavior, args),
                        None => warn!(actor_id = %id, worker = local.index, "Actor removed before start"),
                    }
                }
                Some(WorkerCommand::Shutdown) | None => break,
            },
            _ = local.timer_wake.notified() => {}
            _ = sleep_for(wait) => {}
        }

        local.fire_timers();
    }

    debug!(
        worker = local.index,
        actors = local.core.registry.ids_on_worker(local.index).len(),
        "Worker loop exiting"
    );
}
