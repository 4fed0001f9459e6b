//! Cancellation signals.

use parking_lot::Mutex;
use std::sync::Arc;

/// Identifier returned by [`CancellationSignal::on_abort`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Contract for external cancellation.
pub trait CancellationSignal: Send + Sync {
    fn is_aborted(&self) -> bool;

    /// Register a listener run once on abort. On a signal that is already
    /// aborted the listener runs immediately and is not kept.
    fn on_abort(&self, listener: Box<dyn FnOnce() + Send>) -> ListenerId;

    fn off_abort(&self, id: ListenerId);
}

/// Signal half of an [`AbortController`].
#[derive(Clone, Default)]
pub struct AbortSignal {
    state: Arc<Mutex<SignalState>>,
}

#[derive(Default)]
struct SignalState {
    aborted: bool,
    next_id: u64,
    listeners: Vec<(u64, Box<dyn FnOnce() + Send>)>,
}

impl AbortSignal {
    /// Listeners currently registered.
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

impl CancellationSignal for AbortSignal {
    fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    fn on_abort(&self, listener: Box<dyn FnOnce() + Send>) -> ListenerId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        if state.aborted {
            drop(state);
            listener();
        } else {
            state.listeners.push((id, listener));
        }
        ListenerId(id)
    }

    fn off_abort(&self, id: ListenerId) {
        self.state
            .lock()
            .listeners
            .retain(|(listener, _)| *listener != id.0);
    }
}

/// Owner of an [`AbortSignal`].
///
/// # Example
///
/// ```rust
/// use statecraft::actor::{AbortController, CancellationSignal};
///
/// let controller = AbortController::new();
/// let signal = controller.signal();
/// assert!(!signal.is_aborted());
///
/// controller.abort();
/// assert!(signal.is_aborted());
/// ```
#[derive(Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort and run every registered listener. Later calls do nothing.
    pub fn abort(&self) {
        let listeners = {
            let mut state = self.signal.state.lock();
            if state.aborted {
                return;
            }
            state.aborted = true;
            std::mem::take(&mut state.listeners)
        };
        for (_, listener) in listeners {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn abort_runs_listeners_once() {
        let controller = AbortController::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        controller.signal().on_abort(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        controller.abort();
        controller.abort();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.signal().listener_count(), 0);
    }

    #[test]
    fn late_listeners_run_immediately() {
        let controller = AbortController::new();
        controller.abort();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        controller.signal().on_abort(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.signal().listener_count(), 0);
    }

    #[test]
    fn removed_listeners_do_not_run() {
        let controller = AbortController::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let signal = controller.signal();
        let id = signal.on_abort(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        signal.off_abort(id);

        controller.abort();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
