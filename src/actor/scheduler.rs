//! Delayed-event scheduler.
//!
//! Scheduled events are keyed by `(source session, send id)`. A key can hold
//! several armed timers at once, each paired with its concrete clock handle so
//! that a fired timer never cancels a sibling armed later under the same id.

use super::clock::{Clock, TimerHandle};
use super::system::WeakSystem;
use crate::core::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// An event waiting for its delay to elapse.
#[derive(Clone, Debug)]
pub(crate) struct ScheduledEvent {
    pub source: String,
    pub target: String,
    pub event: Event,
    pub delay_ms: u64,
    pub id: String,
}

#[derive(Default)]
struct SchedulerState {
    started: bool,
    next_token: u64,
    held: Vec<ScheduledEvent>,
    armed: HashMap<(String, String), Vec<(u64, Option<TimerHandle>)>>,
}

pub(crate) struct Scheduler {
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Arm `scheduled`, or hold it until [`Scheduler::start`].
    pub fn schedule(&self, system: WeakSystem, scheduled: ScheduledEvent) {
        {
            let mut state = self.state.lock();
            if !state.started {
                state.held.push(scheduled);
                return;
            }
        }
        self.arm(system, scheduled);
    }

    /// Arm every held event. Later calls do nothing.
    pub fn start(&self, system: WeakSystem) {
        let held = {
            let mut state = self.state.lock();
            if state.started {
                return;
            }
            state.started = true;
            std::mem::take(&mut state.held)
        };
        for scheduled in held {
            self.arm(system.clone(), scheduled);
        }
    }

    /// Reserve the entry, then set the timer with the lock released. A timer
    /// that fired or was cancelled before its handle is stored is cleared.
    fn arm(&self, system: WeakSystem, scheduled: ScheduledEvent) {
        let key = (scheduled.source.clone(), scheduled.id.clone());
        let token = {
            let mut state = self.state.lock();
            let token = state.next_token;
            state.next_token += 1;
            state.armed.entry(key.clone()).or_default().push((token, None));
            token
        };
        tracing::debug!(
            source = %scheduled.source,
            id = %scheduled.id,
            delay_ms = scheduled.delay_ms,
            "scheduling delayed event"
        );
        let delay_ms = scheduled.delay_ms;
        let handle = self.clock.set_timer(
            delay_ms,
            Box::new(move || {
                let Some(system) = system.upgrade() else {
                    return;
                };
                system.scheduler().fired(&scheduled.source, &scheduled.id, token);
                if let Some(target) = system.get_session(&scheduled.target) {
                    system.relay(Some(&scheduled.source), &target, scheduled.event);
                }
            }),
        );
        let stored = {
            let mut state = self.state.lock();
            let slot = state
                .armed
                .get_mut(&key)
                .and_then(|handles| handles.iter_mut().find(|(armed, _)| *armed == token));
            if let Some((_, slot)) = slot {
                *slot = Some(handle);
                true
            } else {
                false
            }
        };
        if !stored {
            self.clock.clear_timer(handle);
        }
    }

    fn fired(&self, source: &str, id: &str, token: u64) {
        let mut state = self.state.lock();
        let key = (source.to_string(), id.to_string());
        if let Some(handles) = state.armed.get_mut(&key) {
            handles.retain(|(armed, _)| *armed != token);
            if handles.is_empty() {
                state.armed.remove(&key);
            }
        }
    }

    /// Cancel every pending event sent by `source` under `id`.
    pub fn cancel(&self, source: &str, id: &str) {
        let handles = {
            let mut state = self.state.lock();
            state
                .held
                .retain(|held| !(held.source == source && held.id == id));
            state
                .armed
                .remove(&(source.to_string(), id.to_string()))
                .unwrap_or_default()
        };
        for handle in handles.into_iter().filter_map(|(_, handle)| handle) {
            self.clock.clear_timer(handle);
        }
    }

    /// Cancel everything `source` has pending.
    pub fn cancel_all(&self, source: &str) {
        let handles: Vec<TimerHandle> = {
            let mut state = self.state.lock();
            state.held.retain(|held| held.source != source);
            let keys: Vec<(String, String)> = state
                .armed
                .keys()
                .filter(|(owner, _)| owner == source)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| state.armed.remove(&key))
                .flatten()
                .filter_map(|(_, handle)| handle)
                .collect()
        };
        for handle in handles {
            self.clock.clear_timer(handle);
        }
    }

    /// Number of events held or armed for `source`.
    pub fn pending(&self, source: &str) -> usize {
        let state = self.state.lock();
        let held = state.held.iter().filter(|held| held.source == source).count();
        let armed: usize = state
            .armed
            .iter()
            .filter(|((owner, _), _)| owner == source)
            .map(|(_, handles)| handles.len())
            .sum();
        held + armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorSystem, SimulatedClock, TracingLogger};

    fn scheduled(source: &str, id: &str, delay_ms: u64) -> ScheduledEvent {
        ScheduledEvent {
            source: source.into(),
            target: source.into(),
            event: Event::new("TICK"),
            delay_ms,
            id: id.into(),
        }
    }

    fn system(clock: &Arc<SimulatedClock>) -> ActorSystem {
        ActorSystem::new(Arc::clone(clock) as Arc<dyn Clock>, Arc::new(TracingLogger))
    }

    #[test]
    fn events_are_held_until_start() {
        let clock = Arc::new(SimulatedClock::new());
        let system = system(&clock);
        let scheduler = system.scheduler();

        scheduler.schedule(system.downgrade(), scheduled("x:0", "a", 10));
        assert_eq!(clock.pending(), 0);
        assert_eq!(scheduler.pending("x:0"), 1);

        scheduler.start(system.downgrade());
        assert_eq!(clock.pending(), 1);
    }

    #[test]
    fn one_id_can_hold_several_timers() {
        let clock = Arc::new(SimulatedClock::new());
        let system = system(&clock);
        let scheduler = system.scheduler();
        scheduler.start(system.downgrade());

        scheduler.schedule(system.downgrade(), scheduled("x:0", "a", 10));
        scheduler.schedule(system.downgrade(), scheduled("x:0", "a", 20));
        assert_eq!(scheduler.pending("x:0"), 2);

        clock.increment(10);
        assert_eq!(scheduler.pending("x:0"), 1);

        scheduler.cancel("x:0", "a");
        assert_eq!(scheduler.pending("x:0"), 0);
        assert_eq!(clock.pending(), 0);
    }

    /// Fires every timer inside `set_timer`.
    struct ImmediateClock;

    impl Clock for ImmediateClock {
        fn set_timer(&self, _delay_ms: u64, callback: crate::actor::TimerCallback) -> TimerHandle {
            callback();
            TimerHandle(0)
        }

        fn clear_timer(&self, _handle: TimerHandle) {}
    }

    #[test]
    fn clocks_that_fire_synchronously_do_not_deadlock() {
        let system = ActorSystem::new(Arc::new(ImmediateClock), Arc::new(TracingLogger));
        let scheduler = system.scheduler();
        scheduler.schedule(system.downgrade(), scheduled("x:0", "a", 0));

        scheduler.start(system.downgrade());
        scheduler.schedule(system.downgrade(), scheduled("x:0", "b", 0));

        assert_eq!(scheduler.pending("x:0"), 0);
    }

    #[test]
    fn cancel_all_only_touches_one_source() {
        let clock = Arc::new(SimulatedClock::new());
        let system = system(&clock);
        let scheduler = system.scheduler();
        scheduler.start(system.downgrade());
        scheduler.schedule(system.downgrade(), scheduled("x:0", "a", 10));
        scheduler.schedule(system.downgrade(), scheduled("x:0", "b", 10));
        scheduler.schedule(system.downgrade(), scheduled("x:1", "a", 10));

        scheduler.cancel_all("x:0");

        assert_eq!(scheduler.pending("x:0"), 0);
        assert_eq!(scheduler.pending("x:1"), 1);
        assert_eq!(clock.pending(), 1);
    }
}
