//! Timer engine
//!
//! Binds a [`TimerScheduler`] to a [`Clock`]. Each worker owns one engine and
//! calls [`Engine::tick`] whenever it wakes; [`Engine::next_wait`] tells the
//! worker how long it may sleep.

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::scheduler::{TimerScheduler, TimerStats};
use std::sync::Arc;
use std::time::Duration;
use types::TimerId;

#[derive(Debug)]
pub struct Engine {
    clock: Arc<dyn Clock>,
    timers: TimerScheduler,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}

impl Engine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let timers = TimerScheduler::with_now(clock.now_ms());
        Self { clock, timers }
    }

    /// Logical time as of the last update
    pub fn now(&self) -> u64 {
        self.timers.now()
    }

    /// Pull the current time from the clock
    pub fn update_time(&mut self) -> u64 {
        self.timers.advance_to(self.clock.now_ms());
        self.timers.now()
    }

    pub fn timers(&self) -> &TimerScheduler {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut TimerScheduler {
        &mut self.timers
    }

    pub fn add_timer<F>(&mut self, timeout: u64, cycle: u64, callback: F) -> Result<TimerId>
    where
        F: FnMut(&mut TimerScheduler, TimerId) + 'static,
    {
        self.update_time();
        self.timers.add(timeout, cycle, callback)
    }

    /// Add a timer owned by `tag`; see [`TimerScheduler::add_tagged`]
    pub fn add_tagged_timer<F>(&mut self, tag: u64, timeout: u64, cycle: u64, callback: F) -> Result<TimerId>
    where
        F: FnMut(&mut TimerScheduler, TimerId) + 'static,
    {
        self.update_time();
        self.timers.add_tagged(tag, timeout, cycle, callback)
    }

    pub fn cancel_timer(&mut self, id: TimerId) -> Result<()> {
        self.timers.cancel(id)
    }

    /// Time until the next deadline, measured against the live clock
    pub fn next_wait(&self) -> Option<Duration> {
        let wait = self.timers.next_wait()?;
        let drift = self.clock.now_ms().saturating_sub(self.timers.now());
        Some(Duration::from_millis(wait.saturating_sub(drift)))
    }

    /// Refresh the clock and fire every due timer
    pub fn tick(&mut self) -> usize {
        self.update_time();
        self.timers.process()
    }

    pub fn stats(&self) -> TimerStats {
        self.timers.stats()
    }
}
