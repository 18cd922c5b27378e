//! Actor mailbox
//!
//! Unbounded FIFO shared between any number of senders (on any worker) and
//! the single owning actor. Appending a message and clearing the owner's
//! waiting flag happen under one lock, so a receive that parked on an empty
//! queue is woken exactly when a message lands for it.

use crate::message::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct MailboxState {
    queue: VecDeque<Message>,
    /// Owner is parked in `recv`
    waiting: bool,
    closed: bool,
}

/// Returned by [`Mailbox::push`] when the owner is gone; carries the message back
#[derive(Debug)]
pub struct MailboxClosed(pub Message);

#[derive(Debug, Default)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
    notify: Notify,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail and wake the owner if it is waiting
    pub fn push(&self, message: Message) -> Result<(), MailboxClosed> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MailboxClosed(message));
        }
        state.queue.push_back(message);
        let wake = std::mem::take(&mut state.waiting);
        drop(state);

        if wake {
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Take the oldest message without waiting
    pub fn try_recv(&self) -> Option<Message> {
        self.state.lock().queue.pop_front()
    }

    /// Take the oldest message, parking until one arrives.
    ///
    /// Returns `None` once the mailbox is closed and empty.
    pub async fn recv(&self) -> Option<Message> {
        loop {
            // Register before checking so a push between unlock and await is not lost.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(message) = state.queue.pop_front() {
                    state.waiting = false;
                    return Some(message);
                }
                if state.closed {
                    return None;
                }
                state.waiting = true;
            }
            notified.await;
        }
    }

    /// Refuse further messages and drop the queued ones; returns how many were dropped
    pub fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        state.waiting = false;
        let dropped = state.queue.len();
        state.queue.clear();
        drop(state);

        self.notify.notify_waiters();
        dropped
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_waiting(&self) -> bool {
        self.state.lock().waiting
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
