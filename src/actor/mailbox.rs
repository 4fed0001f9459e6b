//! Per-actor FIFO mailbox.
//!
//! The mailbox never runs user code itself. `enqueue` and `start` report
//! whether the caller should drain; only one drain runs at a time, so events
//! sent while an actor is processing are queued behind the current one.

use parking_lot::Mutex;
use std::collections::VecDeque;

pub(crate) struct Mailbox<T> {
    state: Mutex<MailboxState<T>>,
}

struct MailboxState<T> {
    queue: VecDeque<T>,
    active: bool,
    draining: bool,
    closed: bool,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                queue: VecDeque::new(),
                active: false,
                draining: false,
                closed: false,
            }),
        }
    }

    /// Queue an item. Returns `true` when the caller must drain.
    pub fn enqueue(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.queue.push_back(item);
        state.claim_drain()
    }

    /// Begin delivering queued items. Returns `true` when the caller must drain.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.active = true;
        !state.queue.is_empty() && state.claim_drain()
    }

    /// Next item for the draining caller; `None` ends the drain.
    pub fn next(&self) -> Option<T> {
        let mut state = self.state.lock();
        let item = state.queue.pop_front();
        if item.is_none() {
            state.draining = false;
        }
        item
    }

    /// Drop queued items. The item being processed is unaffected.
    pub fn clear(&self) {
        self.state.lock().queue.clear();
    }

    /// Drop queued items and refuse new ones.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.queue.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl<T> MailboxState<T> {
    fn claim_drain(&mut self) -> bool {
        if self.active && !self.draining {
            self.draining = true;
            true
        } else {
            false
        }
    }
}
