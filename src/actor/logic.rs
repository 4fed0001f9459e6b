//! The actor logic contract and the scope handed to logic.

use super::error::ActorError;
use super::logger::Logger;
use super::runtime::{Actor, ActorOptions, ActorRef, WeakActorRef};
use super::system::{ActorSystem, InspectionEvent};
use crate::checkpoint::CheckpointError;
use crate::core::{Event, SnapshotStatus};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

/// State produced by an actor logic.
pub trait ActorSnapshot: Clone + Send + Sync + 'static {
    fn status(&self) -> SnapshotStatus;

    fn output(&self) -> Option<&Value>;

    fn error(&self) -> Option<&ActorError>;

    /// The same snapshot, moved into error status.
    fn failed(self, error: ActorError) -> Self;
}

/// Behavior of an actor: how it starts, reacts to events, and persists.
///
/// Failures are reported through the snapshot (`status == Error`) rather
/// than as `Err`, so the runtime can notify observers and the parent.
pub trait ActorLogic: Clone + Send + Sync + 'static {
    type Snapshot: ActorSnapshot;

    fn initial_snapshot(&self, scope: &ActorScope, input: Option<Value>) -> Self::Snapshot;

    fn transition(&self, snapshot: &Self::Snapshot, event: &Event, scope: &ActorScope)
        -> Self::Snapshot;

    /// Called once when the actor starts, after the initial snapshot.
    fn start(&self, _snapshot: &Self::Snapshot, _scope: &ActorScope) {}

    fn persisted_snapshot(&self, snapshot: &Self::Snapshot) -> Result<Value, CheckpointError>;

    fn restore_snapshot(
        &self,
        persisted: Value,
        scope: &ActorScope,
    ) -> Result<Self::Snapshot, CheckpointError>;
}

/// Type-erased logic, as stored in a machine's actor registry.
pub trait ErasedLogic: Send + Sync {
    fn spawn(&self, options: ActorOptions) -> ActorRef;

    fn restore(&self, persisted: Value, options: ActorOptions) -> Result<ActorRef, CheckpointError>;
}

impl<L: ActorLogic> ErasedLogic for L {
    fn spawn(&self, options: ActorOptions) -> ActorRef {
        Actor::new(self.clone(), options).actor_ref()
    }

    fn restore(&self, persisted: Value, options: ActorOptions) -> Result<ActorRef, CheckpointError> {
        Actor::restore(self.clone(), persisted, options).map(|actor| actor.actor_ref())
    }
}

/// Shared handle to registered logic.
pub type LogicRef = Arc<dyn ErasedLogic>;

/// Erase a logic value for registration.
pub fn logic_ref<L: ActorLogic>(logic: L) -> LogicRef {
    Arc::new(logic)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ProcessingStatus {
    NotStarted,
    Running,
    Stopped,
}

pub(crate) type Deferred = Box<dyn FnOnce() -> Result<(), ActorError> + Send>;

pub(crate) struct ScopeShared {
    pub status: Mutex<ProcessingStatus>,
    deferred: Mutex<VecDeque<Deferred>>,
    me: OnceLock<WeakActorRef>,
    inert: bool,
}

/// What an actor logic can reach while it runs.
#[derive(Clone)]
pub struct ActorScope {
    pub(crate) id: String,
    pub(crate) session_id: String,
    pub(crate) parent: Option<String>,
    pub(crate) system: ActorSystem,
    pub(crate) shared: Arc<ScopeShared>,
}

impl ActorScope {
    pub(crate) fn new(
        id: String,
        session_id: String,
        parent: Option<String>,
        system: ActorSystem,
    ) -> Self {
        Self {
            id,
            session_id,
            parent,
            system,
            shared: Arc::new(ScopeShared {
                status: Mutex::new(ProcessingStatus::NotStarted),
                deferred: Mutex::new(VecDeque::new()),
                me: OnceLock::new(),
                inert: false,
            }),
        }
    }

    /// A scope that discards every side effect, for pure transition helpers.
    pub(crate) fn inert(system: ActorSystem) -> Self {
        Self {
            id: "(machine)".to_string(),
            session_id: "(inert)".to_string(),
            parent: None,
            system,
            shared: Arc::new(ScopeShared {
                status: Mutex::new(ProcessingStatus::NotStarted),
                deferred: Mutex::new(VecDeque::new()),
                me: OnceLock::new(),
                inert: true,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    pub fn logger(&self) -> Arc<dyn Logger> {
        self.system.logger()
    }

    pub fn is_inert(&self) -> bool {
        self.shared.inert
    }

    /// The actor this scope belongs to, once constructed.
    pub fn self_ref(&self) -> Option<ActorRef> {
        self.shared.me.get().and_then(WeakActorRef::upgrade)
    }

    pub fn parent(&self) -> Option<ActorRef> {
        self.parent
            .as_deref()
            .and_then(|session| self.system.get_session(session))
    }

    pub(crate) fn bind(&self, me: WeakActorRef) {
        let _ = self.shared.me.set(me);
    }

    pub(crate) fn processing(&self) -> ProcessingStatus {
        *self.shared.status.lock()
    }

    /// Queue work for after the current snapshot is committed.
    pub fn defer(&self, f: impl FnOnce() -> Result<(), ActorError> + Send + 'static) {
        if self.shared.inert {
            return;
        }
        self.shared.deferred.lock().push_back(Box::new(f));
    }

    /// Run `f` now if the actor is running, otherwise defer it until start.
    pub fn execute(
        &self,
        f: impl FnOnce() -> Result<(), ActorError> + Send + 'static,
    ) -> Result<(), ActorError> {
        if self.shared.inert {
            return Ok(());
        }
        if self.processing() == ProcessingStatus::Running {
            f()
        } else {
            self.defer(f);
            Ok(())
        }
    }

    /// Deliver an emitted event to the actor's `on` listeners.
    pub fn emit(&self, event: &Event) {
        if let Some(me) = self.self_ref() {
            me.emit(event);
        }
    }

    pub(crate) fn inspect(&self, event: InspectionEvent) {
        if !self.shared.inert {
            self.system.inspect_event(event);
        }
    }

    pub(crate) fn deferred_mark(&self) -> usize {
        self.shared.deferred.lock().len()
    }

    pub(crate) fn truncate_deferred(&self, mark: usize) {
        self.shared.deferred.lock().truncate(mark);
    }

    pub(crate) fn pop_deferred(&self) -> Option<Deferred> {
        self.shared.deferred.lock().pop_front()
    }

    pub(crate) fn clear_deferred(&self) {
        self.shared.deferred.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::SimulatedClock;
    use crate::actor::TracingLogger;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scope() -> ActorScope {
        let system = ActorSystem::new(Arc::new(SimulatedClock::new()), Arc::new(TracingLogger));
        ActorScope::new("a".into(), "x:0".into(), None, system)
    }

    #[test]
    fn execute_defers_until_running() {
        let scope = scope();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        scope
            .execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let deferred = scope.pop_deferred().unwrap();
        deferred().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn execute_runs_immediately_when_running() {
        let scope = scope();
        *scope.shared.status.lock() = ProcessingStatus::Running;

        let result = scope.execute(|| Err(ActorError::new("now")));

        assert_eq!(result, Err(ActorError::new("now")));
        assert_eq!(scope.deferred_mark(), 0);
    }

    #[test]
    fn truncate_discards_later_effects() {
        let scope = scope();
        scope.defer(|| Ok(()));
        let mark = scope.deferred_mark();
        scope.defer(|| Err(ActorError::new("discarded")));

        scope.truncate_deferred(mark);

        assert_eq!(scope.deferred_mark(), 1);
    }

    #[test]
    fn inert_scope_drops_everything() {
        let system = ActorSystem::new(Arc::new(SimulatedClock::new()), Arc::new(TracingLogger));
        let scope = ActorScope::inert(system);

        scope.defer(|| Err(ActorError::new("never")));

        assert_eq!(scope.deferred_mark(), 0);
        assert!(scope.is_inert());
    }
}
