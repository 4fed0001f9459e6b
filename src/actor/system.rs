//! The per-root actor system: registry, scheduler and inspection.

use super::clock::Clock;
use super::error::ActorError;
use super::logger::Logger;
use super::observer::Subscription;
use super::runtime::{ActorRef, WeakActorRef};
use super::scheduler::{ScheduledEvent, Scheduler};
use crate::core::{Event, SnapshotStatus, StateValue};
use crate::effects::MachineError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Something observable that happened inside a system.
#[derive(Clone, Debug, PartialEq)]
pub enum InspectionEvent {
    /// An actor was created.
    Actor { session_id: String, id: String },
    /// An event was delivered to `target`.
    Event {
        source: Option<String>,
        target: String,
        event: Event,
    },
    /// An actor committed a new snapshot.
    Snapshot {
        session_id: String,
        event: Event,
        status: SnapshotStatus,
    },
    /// A machine took a microstep.
    Microstep {
        session_id: String,
        event: Event,
        value: StateValue,
        /// Ids of the source states of the transitions taken.
        transitions: Vec<String>,
    },
    /// A custom or named action ran.
    Action {
        session_id: String,
        action: String,
        params: Option<Value>,
    },
}

type Inspector = Arc<dyn Fn(&InspectionEvent) + Send + Sync>;

pub(crate) struct SystemInner {
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    next_session: AtomicU64,
    next_inspector: AtomicU64,
    actors: Mutex<HashMap<String, WeakActorRef>>,
    keyed: Mutex<HashMap<String, WeakActorRef>>,
    inspectors: Mutex<Vec<(u64, Inspector)>>,
    scheduler: Scheduler,
    unhandled: Mutex<Vec<ActorError>>,
}

/// Registry shared by a root actor and all of its descendants.
#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<SystemInner>,
}

/// Non-owning handle held by timers.
#[derive(Clone)]
pub(crate) struct WeakSystem(Weak<SystemInner>);

impl WeakSystem {
    pub fn upgrade(&self) -> Option<ActorSystem> {
        self.0.upgrade().map(|inner| ActorSystem { inner })
    }
}

impl ActorSystem {
    pub fn new(clock: Arc<dyn Clock>, logger: Arc<dyn Logger>) -> Self {
        Self {
            inner: Arc::new(SystemInner {
                scheduler: Scheduler::new(Arc::clone(&clock)),
                clock,
                logger,
                next_session: AtomicU64::new(0),
                next_inspector: AtomicU64::new(0),
                actors: Mutex::new(HashMap::new()),
                keyed: Mutex::new(HashMap::new()),
                inspectors: Mutex::new(Vec::new()),
                unhandled: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    pub fn logger(&self) -> Arc<dyn Logger> {
        Arc::clone(&self.inner.logger)
    }

    /// The actor registered under `system_id`, if it is still alive.
    pub fn get(&self, system_id: &str) -> Option<ActorRef> {
        self.inner
            .keyed
            .lock()
            .get(system_id)
            .and_then(WeakActorRef::upgrade)
    }

    /// Errors that reached the root with nobody observing them.
    pub fn unhandled_errors(&self) -> Vec<ActorError> {
        self.inner.unhandled.lock().clone()
    }

    /// Listen to inspection events from every actor in the system.
    pub fn inspect(&self, listener: impl Fn(&InspectionEvent) + Send + Sync + 'static) -> Subscription {
        let key = self.add_inspector(Arc::new(listener));
        let weak = self.downgrade();
        Subscription::new(move || {
            if let Some(system) = weak.upgrade() {
                system.inner.inspectors.lock().retain(|(id, _)| *id != key);
            }
        })
    }

    pub(crate) fn add_inspector(&self, listener: Inspector) -> u64 {
        let key = self.inner.next_inspector.fetch_add(1, Ordering::Relaxed);
        self.inner.inspectors.lock().push((key, listener));
        key
    }

    pub(crate) fn inspect_event(&self, event: InspectionEvent) {
        let inspectors: Vec<Inspector> = self
            .inner
            .inspectors
            .lock()
            .iter()
            .map(|(_, inspector)| Arc::clone(inspector))
            .collect();
        for inspector in inspectors {
            inspector(&event);
        }
    }

    pub(crate) fn book_session(&self) -> String {
        let session = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        format!("x:{session}")
    }

    pub(crate) fn register(&self, session_id: &str, actor: WeakActorRef) {
        tracing::debug!(session_id, "registering actor");
        self.inner
            .actors
            .lock()
            .insert(session_id.to_string(), actor);
    }

    pub(crate) fn set_system_id(
        &self,
        system_id: &str,
        actor: WeakActorRef,
    ) -> Result<(), MachineError> {
        let mut keyed = self.inner.keyed.lock();
        if keyed.get(system_id).and_then(WeakActorRef::upgrade).is_some() {
            return Err(MachineError::DuplicateSystemId(system_id.to_string()));
        }
        keyed.insert(system_id.to_string(), actor);
        Ok(())
    }

    pub(crate) fn unregister(&self, session_id: &str, system_id: Option<&str>) {
        tracing::debug!(session_id, "unregistering actor");
        self.inner.actors.lock().remove(session_id);
        if let Some(system_id) = system_id {
            let mut keyed = self.inner.keyed.lock();
            let owned = keyed
                .get(system_id)
                .and_then(WeakActorRef::upgrade)
                .map_or(true, |actor| actor.session_id() == session_id);
            if owned {
                keyed.remove(system_id);
            }
        }
    }

    pub(crate) fn get_session(&self, session_id: &str) -> Option<ActorRef> {
        self.inner
            .actors
            .lock()
            .get(session_id)
            .and_then(WeakActorRef::upgrade)
    }

    /// Deliver `event` to `target`, reporting it to inspectors first.
    pub(crate) fn relay(&self, source: Option<&str>, target: &ActorRef, event: Event) {
        self.inspect_event(InspectionEvent::Event {
            source: source.map(str::to_string),
            target: target.session_id().to_string(),
            event: event.clone(),
        });
        target.deliver(event);
    }

    pub(crate) fn start(&self) {
        self.inner.scheduler.start(self.downgrade());
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn schedule(
        &self,
        source: &str,
        target: &str,
        event: Event,
        delay_ms: u64,
        id: String,
    ) {
        self.inner.scheduler.schedule(
            self.downgrade(),
            ScheduledEvent {
                source: source.to_string(),
                target: target.to_string(),
                event,
                delay_ms,
                id,
            },
        );
    }

    pub(crate) fn cancel(&self, source: &str, id: &str) {
        self.inner.scheduler.cancel(source, id);
    }

    pub(crate) fn cancel_all(&self, source: &str) {
        self.inner.scheduler.cancel_all(source);
    }

    pub(crate) fn report_unhandled(&self, actor_id: &str, error: ActorError) {
        tracing::error!(actor_id, error = %error, "unhandled actor error");
        self.inner.unhandled.lock().push(error);
    }

    pub(crate) fn downgrade(&self) -> WeakSystem {
        WeakSystem(Arc::downgrade(&self.inner))
    }
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSystem")
            .field("actors", &self.inner.actors.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{SimulatedClock, TracingLogger};

    fn system() -> ActorSystem {
        ActorSystem::new(Arc::new(SimulatedClock::new()), Arc::new(TracingLogger))
    }

    #[test]
    fn sessions_are_unique() {
        let system = system();

        assert_eq!(system.book_session(), "x:0");
        assert_eq!(system.book_session(), "x:1");
    }

    #[test]
    fn inspectors_can_unsubscribe() {
        let system = system();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let subscription = system.inspect(move |_| *counter.lock() += 1);
        let event = InspectionEvent::Actor {
            session_id: "x:0".into(),
            id: "a".into(),
        };

        system.inspect_event(event.clone());
        subscription.unsubscribe();
        system.inspect_event(event);

        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn unhandled_errors_are_recorded() {
        let system = system();

        system.report_unhandled("root", ActorError::new("lost"));

        assert_eq!(system.unhandled_errors(), vec![ActorError::new("lost")]);
    }

    #[test]
    fn unknown_sessions_resolve_to_none() {
        assert!(system().get_session("x:42").is_none());
        assert!(system().get("nobody").is_none());
    }
}
