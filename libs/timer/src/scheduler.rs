//! Timer Scheduler
//!
//! Min-heap of timers ordered by absolute deadline. Timer nodes live in an
//! [`IdTable`] keyed by [`TimerId`]; the heap stores ids and every node keeps
//! `heap_index` pointing at its current heap slot, which makes cancellation of
//! an interior timer O(log n).
//!
//! ```text
//! nodes (IdTable)                 heap (Vec<TimerId>)
//! ┌────────────────────────┐     ┌─────┬─────┬─────┐
//! │ t0 deadline=30 idx=2   │◄────│ t2  │ t1  │ t0  │
//! │ t1 deadline=20 idx=1   │     └─────┴─────┴─────┘
//! │ t2 deadline=10 idx=0   │        0     1     2
//! └────────────────────────┘
//! ```
//!
//! Vacated node slots are reused by later `add` calls (lowest slot first), so a
//! steady timer population stops allocating once warm.
//!
//! Ordering is by `(deadline, sequence)`; the sequence number is assigned on
//! every (re)insertion, which makes equal deadlines fire in insertion order and
//! keeps the schedule deterministic for a fixed sequence of calls.
//!
//! A timer may carry a tag naming its owner. Timers added from inside a tagged
//! timer's callback inherit that tag, so [`TimerScheduler::cancel_tagged`]
//! reaches everything an owner scheduled, directly or not.

use crate::error::{Result, TimerError};
use std::fmt;
use tracing::{debug, trace};
use types::{IdTable, TimerId};

/// Callback fired when a timer expires. It receives the scheduler so it can
/// add or cancel timers (including its own) while running.
pub type TimerCallback = Box<dyn FnMut(&mut TimerScheduler, TimerId)>;

const NOT_IN_HEAP: usize = usize::MAX;

/// First point on `deadline`'s cycle that lies after `now`
fn next_deadline(deadline: u64, cycle: u64, now: u64) -> u64 {
    let periods = now.saturating_sub(deadline) / cycle + 1;
    deadline.saturating_add(cycle.saturating_mul(periods))
}

struct TimerNode {
    deadline: u64,
    /// Period in ms; 0 for one-shot timers
    cycle: u64,
    seq: u64,
    heap_index: usize,
    tag: Option<u64>,
    /// Taken out while the callback runs
    callback: Option<TimerCallback>,
}

/// Counters kept by a scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub added: u64,
    pub fired: u64,
    pub cancelled: u64,
    /// Adds served from a vacated node slot
    pub recycled: u64,
}

/// Deadline-ordered timer scheduler driven by a logical millisecond clock
pub struct TimerScheduler {
    now: u64,
    nodes: IdTable<TimerId, TimerNode>,
    heap: Vec<TimerId>,
    next_seq: u64,
    /// Tag of the timer whose callback is running
    firing_tag: Option<u64>,
    stats: TimerStats,
}

impl Default for TimerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerScheduler")
            .field("now", &self.now)
            .field("scheduled", &self.heap.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl TimerScheduler {
    pub fn new() -> Self {
        Self::with_now(0)
    }

    /// Create a scheduler whose logical clock starts at `now`
    pub fn with_now(now: u64) -> Self {
        Self {
            now,
            nodes: IdTable::new(),
            heap: Vec::new(),
            next_seq: 0,
            firing_tag: None,
            stats: TimerStats::default(),
        }
    }

    /// Current logical time in ms
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Move the logical clock forward; it never goes backwards
    pub fn advance_to(&mut self, now: u64) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Schedule `callback` to fire `timeout` ms from now, then every `cycle`
    /// ms if `cycle > 0`.
    ///
    /// Called from a callback, the new timer takes the firing timer's tag.
    pub fn add<F>(&mut self, timeout: u64, cycle: u64, callback: F) -> Result<TimerId>
    where
        F: FnMut(&mut TimerScheduler, TimerId) + 'static,
    {
        let tag = self.firing_tag;
        self.insert(tag, timeout, cycle, Box::new(callback))
    }

    /// Like [`add`](Self::add), with the timer tagged as belonging to `tag`
    pub fn add_tagged<F>(&mut self, tag: u64, timeout: u64, cycle: u64, callback: F) -> Result<TimerId>
    where
        F: FnMut(&mut TimerScheduler, TimerId) + 'static,
    {
        self.insert(Some(tag), timeout, cycle, Box::new(callback))
    }

    fn insert(&mut self, tag: Option<u64>, timeout: u64, cycle: u64, callback: TimerCallback) -> Result<TimerId> {
        self.heap
            .try_reserve(1)
            .map_err(|_| TimerError::resource_exhausted("timer heap"))?;

        let slots_before = self.nodes.slot_count();
        let deadline = self.now.saturating_add(timeout);
        let seq = self.bump_seq();
        let id = self.nodes.try_insert_with(|_| TimerNode {
            deadline,
            cycle,
            seq,
            heap_index: NOT_IN_HEAP,
            tag,
            callback: Some(callback),
        })?;

        self.stats.added += 1;
        if self.nodes.slot_count() == slots_before {
            self.stats.recycled += 1;
        }
        self.push(id);
        trace!(timer = %id, deadline, cycle, ?tag, "timer added");
        Ok(id)
    }

    /// Cancel a scheduled timer.
    ///
    /// Cancelling from inside the timer's own callback stops any further
    /// cycles. Unknown, fired one-shot and already cancelled ids are errors.
    pub fn cancel(&mut self, id: TimerId) -> Result<()> {
        let heap_index = self
            .nodes
            .get(id)
            .map(|node| node.heap_index)
            .ok_or_else(|| TimerError::unknown_timer(id))?;

        if heap_index != NOT_IN_HEAP {
            self.remove_at(heap_index);
        }
        self.nodes.remove(id);
        self.stats.cancelled += 1;
        trace!(timer = %id, "timer cancelled");
        Ok(())
    }

    /// Cancel every timer carrying `tag`, including one whose callback is
    /// running. Returns how many were cancelled.
    pub fn cancel_tagged(&mut self, tag: u64) -> usize {
        let ids: Vec<TimerId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.tag == Some(tag))
            .map(|(id, _)| id)
            .collect();
        for id in &ids {
            let _ = self.cancel(*id);
        }
        ids.len()
    }

    /// Milliseconds until the earliest deadline: `Some(0)` when a timer is
    /// already due, `None` when nothing is scheduled.
    pub fn next_wait(&self) -> Option<u64> {
        let top = self.heap.first()?;
        let deadline = self.nodes.get(*top)?.deadline;
        Some(deadline.saturating_sub(self.now))
    }

    /// Fire every timer that was due when the call started, in non-decreasing
    /// deadline order. Returns the number of callbacks run.
    ///
    /// Timers added or re-armed while the pass runs wait for the next call,
    /// even when already due. A cyclic timer fires at most once per call: a
    /// late call folds the missed periods into one fire, and the next deadline
    /// stays on the timer's original phase.
    pub fn process(&mut self) -> usize {
        let now = self.now;
        let pass = self.next_seq;
        let mut fired = 0;

        while let Some(&id) = self.heap.first() {
            let due = self
                .nodes
                .get(id)
                .is_some_and(|node| node.deadline <= now && node.seq < pass);
            if !due {
                break;
            }

            // Detach before running the callback; it may reshape the heap.
            self.remove_at(0);
            let Some((mut callback, tag)) = self
                .nodes
                .get_mut(id)
                .and_then(|node| node.callback.take().map(|cb| (cb, node.tag)))
            else {
                self.nodes.remove(id);
                continue;
            };

            let outer = std::mem::replace(&mut self.firing_tag, tag);
            callback(self, id);
            self.firing_tag = outer;
            fired += 1;
            self.stats.fired += 1;

            let seq = self.next_seq;
            let after = self.now;
            let rearmed = match self.nodes.get_mut(id) {
                Some(node) if node.cycle > 0 => {
                    node.deadline = next_deadline(node.deadline, node.cycle, after);
                    node.seq = seq;
                    node.callback = Some(callback);
                    true
                }
                _ => false,
            };

            if rearmed {
                self.next_seq += 1;
                self.push(id);
            } else {
                self.nodes.remove(id);
            }
        }

        if fired > 0 {
            debug!(fired, now, pending = self.heap.len(), "timers processed");
        }
        fired
    }

    /// Absolute deadline of a scheduled timer
    pub fn deadline(&self, id: TimerId) -> Option<u64> {
        self.nodes.get(id).map(|node| node.deadline)
    }

    pub fn tag(&self, id: TimerId) -> Option<u64> {
        self.nodes.get(id).and_then(|node| node.tag)
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.nodes.contains(id)
    }

    /// Number of scheduled timers
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> TimerStats {
        self.stats
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    // ---- heap maintenance -------------------------------------------------

    fn key_at(&self, pos: usize) -> (u64, u64) {
        self.heap
            .get(pos)
            .and_then(|id| self.nodes.get(*id))
            .map_or((u64::MAX, u64::MAX), |node| (node.deadline, node.seq))
    }

    fn set_index(&mut self, pos: usize) {
        let id = self.heap[pos];
        if let Some(node) = self.nodes.get_mut(id) {
            node.heap_index = pos;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.set_index(a);
        self.set_index(b);
    }

    fn push(&mut self, id: TimerId) {
        let pos = self.heap.len();
        self.heap.push(id);
        self.set_index(pos);
        self.sift_up(pos);
    }

    fn remove_at(&mut self, pos: usize) -> Option<TimerId> {
        let last = self.heap.len().checked_sub(1)?;
        if pos != last {
            self.swap(pos, last);
        }
        let id = self.heap.pop()?;
        if let Some(node) = self.nodes.get_mut(id) {
            node.heap_index = NOT_IN_HEAP;
        }
        if pos < self.heap.len() {
            self.sift_down(pos);
            self.sift_up(pos);
        }
        Some(id)
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.key_at(pos) >= self.key_at(parent) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.key_at(right) < self.key_at(left) {
                right
            } else {
                left
            };
            if self.key_at(child) >= self.key_at(pos) {
                break;
            }
            self.swap(pos, child);
            pos = child;
        }
    }

    #[cfg(test)]
    fn assert_heap_consistent(&self) {
        for (pos, id) in self.heap.iter().enumerate() {
            let node = self.nodes.get(*id).expect("heap entry without node");
            assert_eq!(node.heap_index, pos, "stale heap index for {}", id);
            if pos > 0 {
                assert!(self.key_at((pos - 1) / 2) <= self.key_at(pos));
            }
        }
        assert_eq!(self.heap.len(), self.nodes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(u64, &'static str)>>>;

    fn recorder(log: &Log, name: &'static str) -> impl FnMut(&mut TimerScheduler, TimerId) + 'static {
        let log = Rc::clone(log);
        move |timers, _| log.borrow_mut().push((timers.now(), name))
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let log: Log = Rc::default();
        let mut timers = TimerScheduler::new();
        timers.add(30, 0, recorder(&log, "c")).unwrap();
        timers.add(10, 0, recorder(&log, "a")).unwrap();
        timers.add(20, 0, recorder(&log, "b")).unwrap();
        timers.assert_heap_consistent();

        timers.advance_to(100);
        assert_eq!(timers.process(), 3);
        let names: Vec<_> = log.borrow().iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_only_due_timers_fire() {
        let log: Log = Rc::default();
        let mut timers = TimerScheduler::new();
        timers.add(5, 0, recorder(&log, "due")).unwrap();
        timers.add(50, 0, recorder(&log, "later")).unwrap();

        timers.advance_to(5);
        assert_eq!(timers.process(), 1);
        assert_eq!(log.borrow().as_slice(), &[(5, "due")]);
        assert_eq!(timers.next_wait(), Some(45));
    }

    #[test]
    fn test_next_wait() {
        let mut timers = TimerScheduler::with_now(100);
        assert_eq!(timers.next_wait(), None);

        timers.add(25, 0, |_, _| {}).unwrap();
        assert_eq!(timers.next_wait(), Some(25));

        timers.advance_to(125);
        assert_eq!(timers.next_wait(), Some(0));
        timers.advance_to(200);
        assert_eq!(timers.next_wait(), Some(0));
    }

    #[test]
    fn test_clock_never_goes_backwards() {
        let mut timers = TimerScheduler::with_now(50);
        timers.advance_to(10);
        assert_eq!(timers.now(), 50);
    }

    #[test]
    fn test_cyclic_timer_rearms_from_deadline() {
        let log: Log = Rc::default();
        let mut timers = TimerScheduler::new();
        let id = timers.add(10, 10, recorder(&log, "tick")).unwrap();

        let mut expected = 10;
        for _ in 0..6 {
            assert_eq!(timers.deadline(id), Some(expected));
            // process a little late every time; the cycle must not drift
            timers.advance_to(expected + 3);
            assert_eq!(timers.process(), 1);
            expected += 10;
            assert_eq!(timers.deadline(id), Some(expected));
        }
        assert_eq!(log.borrow().len(), 6);
        timers.assert_heap_consistent();
    }

    #[test]
    fn test_cancel_pending_timer() {
        let log: Log = Rc::default();
        let mut timers = TimerScheduler::new();
        let a = timers.add(10, 0, recorder(&log, "a")).unwrap();
        let b = timers.add(20, 0, recorder(&log, "b")).unwrap();
        let c = timers.add(30, 0, recorder(&log, "c")).unwrap();

        timers.cancel(b).unwrap();
        timers.assert_heap_consistent();
        assert!(!timers.is_scheduled(b));
        assert!(timers.is_scheduled(a) && timers.is_scheduled(c));

        timers.advance_to(100);
        timers.process();
        let names: Vec<_> = log.borrow().iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_cancel_fired_or_unknown_is_error() {
        let log: Log = Rc::default();
        let mut timers = TimerScheduler::new();
        let once = timers.add(1, 0, recorder(&log, "once")).unwrap();
        timers.add(40, 0, recorder(&log, "x")).unwrap();
        timers.add(20, 0, recorder(&log, "y")).unwrap();

        timers.advance_to(1);
        timers.process();
        assert_eq!(timers.cancel(once), Err(TimerError::unknown_timer(once)));
        assert!(timers.cancel(once).is_err());
        timers.assert_heap_consistent();

        timers.advance_to(100);
        timers.process();
        let names: Vec<_> = log.borrow().iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["once", "y", "x"]);
    }

    #[test]
    fn test_stale_id_cannot_cancel_reused_slot() {
        let mut timers = TimerScheduler::new();
        let first = timers.add(5, 0, |_, _| {}).unwrap();
        timers.cancel(first).unwrap();

        let second = timers.add(5, 0, |_, _| {}).unwrap();
        assert_eq!(first.inner().index(), second.inner().index());
        assert!(timers.cancel(first).is_err());
        assert!(timers.is_scheduled(second));
        assert_eq!(timers.stats().recycled, 1);
    }

    #[test]
    fn test_callback_can_add_and_cancel() {
        let log: Log = Rc::default();
        let mut timers = TimerScheduler::new();
        let victim = timers.add(15, 0, recorder(&log, "victim")).unwrap();

        let inner_log = Rc::clone(&log);
        timers
            .add(10, 0, move |timers, _| {
                inner_log.borrow_mut().push((timers.now(), "first"));
                timers.cancel(victim).unwrap();
                let log = Rc::clone(&inner_log);
                timers
                    .add(0, 0, move |timers, _| log.borrow_mut().push((timers.now(), "spawned")))
                    .unwrap();
            })
            .unwrap();

        timers.advance_to(20);
        assert_eq!(timers.process(), 1);
        assert_eq!(timers.next_wait(), Some(0));
        assert_eq!(timers.process(), 1);
        let names: Vec<_> = log.borrow().iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["first", "spawned"]);
        assert!(timers.is_empty());
    }

    fn respawning(count: Rc<Cell<u32>>) -> TimerCallback {
        Box::new(move |timers, _| {
            count.set(count.get() + 1);
            timers.add(0, 0, respawning(Rc::clone(&count))).unwrap();
        })
    }

    #[test]
    fn test_timer_added_while_processing_waits_for_next_pass() {
        let count = Rc::new(Cell::new(0));
        let mut timers = TimerScheduler::with_now(100);
        timers.add(0, 0, respawning(Rc::clone(&count))).unwrap();

        for pass in 1..=5 {
            assert_eq!(timers.process(), 1);
            assert_eq!(count.get(), pass);
            assert_eq!(timers.len(), 1);
            timers.assert_heap_consistent();
        }
        assert_eq!(timers.now(), 100);
    }

    #[test]
    fn test_late_cyclic_timer_fires_once_and_keeps_phase() {
        let log: Log = Rc::default();
        let mut timers = TimerScheduler::new();
        let id = timers.add(1, 1, recorder(&log, "tick")).unwrap();

        timers.advance_to(5_000);
        assert_eq!(timers.process(), 1);
        assert_eq!(timers.deadline(id), Some(5_001));
        assert_eq!(timers.process(), 0);

        let slow = timers.add(10, 10, |_, _| {}).unwrap();
        timers.advance_to(5_037);
        assert_eq!(timers.process(), 2);
        assert_eq!(timers.deadline(slow), Some(5_040));
        assert_eq!(timers.deadline(id), Some(5_038));
        timers.assert_heap_consistent();
    }

    #[test]
    fn test_nested_timers_inherit_tag() {
        let mut timers = TimerScheduler::new();
        timers
            .add_tagged(7, 5, 0, |timers, _| {
                timers
                    .add(10, 0, |timers, _| {
                        timers.add(10, 10, |_, _| {}).unwrap();
                    })
                    .unwrap();
            })
            .unwrap();
        let untagged = timers.add(100, 0, |_, _| {}).unwrap();

        timers.advance_to(5);
        timers.process();
        timers.advance_to(15);
        timers.process();
        assert_eq!(timers.len(), 2);
        assert_eq!(timers.tag(untagged), None);

        assert_eq!(timers.cancel_tagged(7), 1);
        assert_eq!(timers.len(), 1);
        assert!(timers.is_scheduled(untagged));
        timers.assert_heap_consistent();
    }

    #[test]
    fn test_cancel_tagged_from_own_callback_stops_cycle() {
        let count = Rc::new(Cell::new(0));
        let mut timers = TimerScheduler::new();
        let counter = Rc::clone(&count);
        timers
            .add_tagged(3, 1, 1, move |timers, _| {
                counter.set(counter.get() + 1);
                timers.cancel_tagged(3);
            })
            .unwrap();

        for now in 1..=5 {
            timers.advance_to(now);
            timers.process();
        }
        assert_eq!(count.get(), 1);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cyclic_timer_cancels_itself() {
        let count = Rc::new(RefCell::new(0));
        let mut timers = TimerScheduler::new();
        let counter = Rc::clone(&count);
        timers
            .add(1, 1, move |timers, id| {
                *counter.borrow_mut() += 1;
                if *counter.borrow() == 3 {
                    timers.cancel(id).unwrap();
                }
            })
            .unwrap();

        for now in 1..=10 {
            timers.advance_to(now);
            timers.process();
        }
        assert_eq!(*count.borrow(), 3);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let log: Log = Rc::default();
        let mut timers = TimerScheduler::new();
        for name in ["one", "two", "three", "four"] {
            timers.add(10, 0, recorder(&log, name)).unwrap();
        }
        timers.advance_to(10);
        timers.process();
        let names: Vec<_> = log.borrow().iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn test_stats() {
        let mut timers = TimerScheduler::new();
        let a = timers.add(1, 0, |_, _| {}).unwrap();
        timers.add(2, 0, |_, _| {}).unwrap();
        timers.cancel(a).unwrap();
        timers.advance_to(2);
        timers.process();
        timers.add(1, 0, |_, _| {}).unwrap();

        let stats = timers.stats();
        assert_eq!(stats.added, 3);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.fired, 1);
        assert_eq!(stats.recycled, 1);
    }
}
