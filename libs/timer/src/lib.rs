//! # Timer
//!
//! Millisecond timer scheduling for actor workers.
//!
//! - [`TimerScheduler`]: min-heap of one-shot and cyclic timers with O(log n)
//!   cancellation and slot reuse
//! - [`Engine`]: a scheduler bound to a [`Clock`], ticked by a worker loop
//!
//! Callbacks run on the thread that calls `process`, one at a time, and may
//! add or cancel timers (their own included) while running.

pub mod clock;
pub mod engine;
pub mod error;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::Engine;
pub use error::{Result, TimerError};
pub use scheduler::{TimerCallback, TimerScheduler, TimerStats};
