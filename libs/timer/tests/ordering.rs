//! Property tests for timer ordering
//!
//! Random schedules with interleaved cancellations must fire exactly the
//! surviving timers, in non-decreasing deadline order, no earlier than their
//! deadline.

use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use timer::TimerScheduler;

proptest! {
    #[test]
    fn fires_survivors_in_deadline_order(
        timeouts in prop::collection::vec(0u64..500, 1..128),
        cancel_mask in prop::collection::vec(any::<bool>(), 128),
        steps in prop::collection::vec(1u64..60, 1..40),
    ) {
        let fired: Rc<RefCell<Vec<(u64, u64, usize)>>> = Rc::default();
        let mut timers = TimerScheduler::new();
        let mut ids = Vec::new();

        for (n, timeout) in timeouts.iter().enumerate() {
            let log = Rc::clone(&fired);
            let deadline = *timeout;
            let id = timers
                .add(*timeout, 0, move |timers, _| log.borrow_mut().push((timers.now(), deadline, n)))
                .unwrap();
            ids.push(id);
        }

        let mut expected_alive = 0;
        for (n, id) in ids.iter().enumerate() {
            if cancel_mask[n] {
                timers.cancel(*id).unwrap();
            } else {
                expected_alive += 1;
            }
        }
        prop_assert_eq!(timers.len(), expected_alive);

        let mut now = 0;
        for step in &steps {
            now += step;
            timers.advance_to(now);
            timers.process();
        }
        timers.advance_to(now + 1_000);
        timers.process();

        let fired = fired.borrow();
        prop_assert_eq!(fired.len(), expected_alive);
        prop_assert!(timers.is_empty());
        for pair in fired.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].1, "out of order: {:?}", pair);
        }
        for (fired_at, deadline, n) in fired.iter() {
            prop_assert!(fired_at >= deadline);
            prop_assert!(!cancel_mask[*n]);
        }
    }

    #[test]
    fn cyclic_timer_skips_missed_periods(
        period in 1u64..50,
        start in 0u64..50,
        jump in 0u64..2_000,
        tail in 1u64..200,
    ) {
        let count = Rc::new(RefCell::new(0u64));
        let mut timers = TimerScheduler::new();
        let counter = Rc::clone(&count);
        let id = timers.add(start, period, move |_, _| *counter.borrow_mut() += 1).unwrap();

        // phase points start + k * period at or before `t`
        let points = |t: u64| if t < start { 0 } else { (t - start) / period + 1 };

        timers.advance_to(jump);
        let fired = timers.process();
        prop_assert_eq!(fired as u64, points(jump).min(1));

        let deadline = timers.deadline(id).unwrap();
        prop_assert!(deadline > jump || jump < start);
        prop_assert!(deadline >= start);
        prop_assert_eq!((deadline - start) % period, 0);
        prop_assert!(deadline <= jump.max(start) + period);

        for now in jump + 1..=jump + tail {
            timers.advance_to(now);
            prop_assert!(timers.process() <= 1);
        }
        prop_assert_eq!(
            *count.borrow(),
            points(jump).min(1) + points(jump + tail) - points(jump)
        );
    }
}

#[test]
fn cancelling_other_timers_from_callbacks_keeps_heap_sound() {
    let fired: Rc<RefCell<Vec<usize>>> = Rc::default();
    let mut timers = TimerScheduler::new();

    let mut handles = Vec::new();
    for n in 0..32usize {
        let log = Rc::clone(&fired);
        handles.push(timers.add(n as u64 * 10, 0, move |_, _| log.borrow_mut().push(n)).unwrap());
    }

    // every even timer cancels the next odd one
    let victims: Vec<_> = handles.iter().skip(1).step_by(2).copied().collect();
    for (slot, victim) in victims.into_iter().enumerate() {
        let log = Rc::clone(&fired);
        timers
            .add(slot as u64 * 20 + 5, 0, move |timers, _| {
                let _ = timers.cancel(victim);
                log.borrow_mut().push(1_000 + slot);
            })
            .unwrap();
    }

    timers.advance_to(10_000);
    timers.process();

    let fired = fired.borrow();
    let plain: Vec<usize> = fired.iter().copied().filter(|n| *n < 1_000).collect();
    assert_eq!(plain, (0..32).step_by(2).collect::<Vec<_>>());
    assert_eq!(fired.len(), 32);
    assert!(timers.is_empty());
}
