//! Spindle Actor Runtime
//!
//! Embedded actor runtime: lightweight actors bound to worker threads, each
//! with a FIFO mailbox of [`Dict`] payloads, cooperative receive, per-worker
//! timers, and ownership of network descriptors that can be moved between
//! actors.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── ActorSystem ────────────────────────────┐
//! │  BehaviorRegistry   ActorRegistry (IdTable)   DescriptorTable       │
//! │                                                                     │
//! │  ┌── worker 0 ───────────────┐   ┌── worker 1 ───────────────┐      │
//! │  │ LocalSet: actor tasks     │   │ LocalSet: actor tasks     │      │
//! │  │ Engine: TimerScheduler    │   │ Engine: TimerScheduler    │      │
//! │  │ accept loops              │   │ accept loops              │      │
//! │  └───────────────────────────┘   └───────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//!        send(dst, payload) ──► dst mailbox ──► wakes dst's recv()
//! ```
//!
//! An actor is created from a registered behavior, runs only on its worker,
//! and is destroyed when its behavior returns. Teardown drops its queued
//! messages, cancels its timers, stops its listener and closes every
//! descriptor it still owns.
//!
//! # Examples
//!
//! ```rust
//! use messaging_actors::{ActorSystem, BehaviorRegistry, RuntimeConfig};
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! let (done, results) = mpsc::channel();
//! let mut behaviors = BehaviorRegistry::new();
//! behaviors.register_fn("echo", "main", move |ctx, _args| {
//!     let done = done.clone();
//!     async move {
//!         let payload = ctx.recv().await?;
//!         let _ = done.send(payload.get_str("op").map(str::to_owned));
//!         Ok(vec![])
//!     }
//! });
//!
//! let config = RuntimeConfig { workers: 1, ..RuntimeConfig::default() };
//! let system = ActorSystem::new(config, behaviors).unwrap();
//! let echo = system.spawn("echo", "main", system.new_payload()).unwrap();
//!
//! let mut payload = system.new_payload();
//! payload.set("op", "ping").unwrap();
//! system.send(echo, payload).unwrap();
//!
//! let op = results.recv_timeout(Duration::from_secs(5)).unwrap();
//! assert_eq!(op.as_deref(), Some("ping"));
//! system.shutdown();
//! ```

pub mod behavior;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod net;
pub mod registry;
pub mod system;
mod worker;

pub use behavior::{Behavior, BehaviorRegistry, BehaviorResult, FnBehavior};
pub use context::ActorContext;
pub use descriptor::{Descriptor, DescriptorKind, DescriptorSet, DescriptorSpec, DescriptorTable};
pub use error::{Result, RuntimeError};
pub use mailbox::{Mailbox, MailboxClosed};
pub use message::Message;
pub use net::{Accepted, Listener};
pub use registry::{ActorEntry, ActorRegistry};
pub use system::{ActorSystem, SystemMetrics, SystemStats};

pub use config::{ListenOptions, RuntimeConfig};
pub use timer::{TimerError, TimerScheduler};
pub use types::{ActorId, DescriptorId, Dict, OpaqueHandle, TimerId, Value};
