//! Pluggable clocks for delayed events.
//!
//! The scheduler only needs `set_timer`/`clear_timer`. [`SystemClock`] uses
//! real time; [`SimulatedClock`] advances only when told to, which makes
//! delayed transitions testable without sleeping.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback run when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Opaque handle identifying a timer on the clock that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// Source of timers.
pub trait Clock: Send + Sync {
    fn set_timer(&self, delay_ms: u64, callback: TimerCallback) -> TimerHandle;

    /// Cancel a timer. Clearing a fired or unknown timer does nothing.
    fn clear_timer(&self, handle: TimerHandle);
}

/// Real-time clock.
///
/// Timers run on the current tokio runtime when there is one, and on a
/// sleeping thread otherwise.
#[derive(Default)]
pub struct SystemClock {
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<u64, TimerEntry>>>,
}

enum TimerEntry {
    Task(tokio::task::JoinHandle<()>),
    Thread(Arc<AtomicBool>),
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn set_timer(&self, delay_ms: u64, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let delay = Duration::from_millis(delay_ms);
        let mut guard = self.timers.lock();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task = runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    timers.lock().remove(&id);
                    callback();
                });
                guard.insert(id, TimerEntry::Task(task));
            }
            Err(_) => {
                let cancelled = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&cancelled);
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    if flag.load(Ordering::SeqCst) {
                        return;
                    }
                    timers.lock().remove(&id);
                    callback();
                });
                guard.insert(id, TimerEntry::Thread(cancelled));
            }
        }
        TimerHandle(id)
    }

    fn clear_timer(&self, handle: TimerHandle) {
        match self.timers.lock().remove(&handle.0) {
            Some(TimerEntry::Task(task)) => task.abort(),
            Some(TimerEntry::Thread(cancelled)) => cancelled.store(true, Ordering::SeqCst),
            None => {}
        }
    }
}

/// Manually advanced clock for deterministic tests.
///
/// # Example
///
/// ```rust
/// use statecraft::actor::{Clock, SimulatedClock};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let clock = SimulatedClock::new();
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&fired);
/// clock.set_timer(100, Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// clock.increment(99);
/// assert!(!fired.load(Ordering::SeqCst));
/// clock.increment(1);
/// assert!(fired.load(Ordering::SeqCst));
/// ```
#[derive(Default)]
pub struct SimulatedClock {
    state: Mutex<SimulatedState>,
}

#[derive(Default)]
struct SimulatedState {
    now: u64,
    next_id: u64,
    timers: BTreeMap<(u64, u64), TimerCallback>,
    due: HashMap<u64, u64>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time in milliseconds.
    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    /// Advance time by `ms`, firing due timers.
    pub fn increment(&self, ms: u64) {
        let now = self.now();
        self.set(now + ms);
    }

    /// Jump to `ms`, firing every timer due by then in due-time order.
    ///
    /// Timers scheduled by a firing callback start counting from `ms`. Time
    /// never moves backwards: a target earlier than `now` is ignored.
    pub fn set(&self, ms: u64) {
        let due: Vec<(u64, u64)> = {
            let mut state = self.state.lock();
            if ms < state.now {
                tracing::warn!(now = state.now, requested = ms, "simulated time cannot move backwards");
                return;
            }
            state.now = ms;
            state.timers.range(..=(ms, u64::MAX)).map(|(key, _)| *key).collect()
        };
        for key in due {
            let callback = {
                let mut state = self.state.lock();
                state.due.remove(&key.1);
                state.timers.remove(&key)
            };
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Number of timers not yet fired or cleared.
    pub fn pending(&self) -> usize {
        self.state.lock().timers.len()
    }
}

impl Clock for SimulatedClock {
    fn set_timer(&self, delay_ms: u64, callback: TimerCallback) -> TimerHandle {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let due = state.now + delay_ms;
        state.timers.insert((due, id), callback);
        state.due.insert(id, due);
        TimerHandle(id)
    }

    fn clear_timer(&self, handle: TimerHandle) {
        let mut state = self.state.lock();
        if let Some(due) = state.due.remove(&handle.0) {
            state.timers.remove(&(due, handle.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> TimerCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |label: &'static str| -> TimerCallback {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().push(label))
        };
        (log, make)
    }

    #[test]
    fn timers_fire_in_due_order() {
        let clock = SimulatedClock::new();
        let (log, make) = recorder();
        clock.set_timer(30, make("late"));
        clock.set_timer(10, make("early"));
        clock.set_timer(10, make("early-second"));

        clock.increment(30);

        assert_eq!(*log.lock(), vec!["early", "early-second", "late"]);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn cleared_timers_never_fire() {
        let clock = SimulatedClock::new();
        let (log, make) = recorder();
        let handle = clock.set_timer(5, make("cleared"));
        clock.clear_timer(handle);

        clock.increment(10);

        assert!(log.lock().is_empty());
    }

    #[test]
    fn timers_wait_for_their_delay() {
        let clock = SimulatedClock::new();
        let (log, make) = recorder();
        clock.set_timer(1000, make("tick"));

        clock.increment(999);
        assert!(log.lock().is_empty());
        clock.increment(1);
        assert_eq!(*log.lock(), vec!["tick"]);
        assert_eq!(clock.now(), 1000);
    }

    #[test]
    fn time_never_moves_backwards() {
        let clock = SimulatedClock::new();
        let (log, make) = recorder();
        clock.set(100);
        clock.set_timer(10, make("tick"));

        clock.set(50);
        assert_eq!(clock.now(), 100);
        clock.increment(10);

        assert_eq!(*log.lock(), vec!["tick"]);
    }

    #[tokio::test]
    async fn system_clock_fires_on_runtime() {
        let clock = SystemClock::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        clock.set_timer(5, Box::new(move || {
            let _ = tx.send(());
        }));

        assert!(tokio::time::timeout(Duration::from_secs(1), rx).await.is_ok());
    }

    #[tokio::test]
    async fn system_clock_clear_prevents_firing() {
        let clock = SystemClock::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = clock.set_timer(20, Box::new(move || {
            let _ = tx.send(());
        }));
        clock.clear_timer(handle);

        let result = tokio::time::timeout(Duration::from_millis(100), rx).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}
