//! Logic backed by a long-lived callback.

use super::{persist, restore, LogicSnapshot};
use crate::actor::{ActorLogic, ActorScope, ActorSystem, WeakActorRef};
use crate::checkpoint::CheckpointError;
use crate::core::{Event, SnapshotStatus, STOP_EVENT};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Cleanup returned by a callback; runs once when the actor stops.
pub type Teardown = Box<dyn FnOnce() + Send>;

type Receiver = Arc<dyn Fn(&Event) + Send + Sync>;
type Create = Arc<dyn Fn(&CallbackArgs) -> Option<Teardown> + Send + Sync>;

/// What a callback receives. Clone it to send events back later.
#[derive(Clone)]
pub struct CallbackArgs {
    pub input: Option<Value>,
    pub system: ActorSystem,
    session_id: String,
    parent: Option<WeakActorRef>,
    receivers: Arc<Mutex<Vec<Receiver>>>,
}

impl CallbackArgs {
    /// Send an event to the parent actor. Without a parent this does nothing.
    pub fn send_back(&self, event: impl Into<Event>) {
        let event = event.into();
        match self.parent.as_ref().and_then(WeakActorRef::upgrade) {
            Some(parent) => self.system.relay(Some(&self.session_id), &parent, event),
            None => tracing::debug!(event = %event, "send_back without a parent was dropped"),
        }
    }

    /// Handle events sent to this actor.
    pub fn receive(&self, handler: impl Fn(&Event) + Send + Sync + 'static) {
        self.receivers.lock().push(Arc::new(handler));
    }
}

struct Session {
    receivers: Arc<Mutex<Vec<Receiver>>>,
    teardown: Option<Teardown>,
}

/// Logic that runs a callback once on start and forwards events to its
/// receivers until stopped.
#[derive(Clone)]
pub struct CallbackLogic {
    create: Create,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

/// Wrap a callback as actor logic.
///
/// # Example
///
/// ```rust
/// use statecraft::actor::{Actor, ActorOptions};
/// use statecraft::logic::{from_callback, CallbackArgs};
/// use std::sync::{Arc, Mutex};
///
/// let pings = Arc::new(Mutex::new(0));
/// let counter = Arc::clone(&pings);
/// let logic = from_callback(move |args: &CallbackArgs| {
///     let counter = Arc::clone(&counter);
///     args.receive(move |_| *counter.lock().unwrap() += 1);
///     None
/// });
///
/// let actor = Actor::new(logic, ActorOptions::default());
/// actor.start();
/// actor.send("PING");
/// assert_eq!(*pings.lock().unwrap(), 1);
/// ```
pub fn from_callback<F>(create: F) -> CallbackLogic
where
    F: Fn(&CallbackArgs) -> Option<Teardown> + Send + Sync + 'static,
{
    CallbackLogic {
        create: Arc::new(create),
        sessions: Arc::new(Mutex::new(HashMap::new())),
    }
}

impl ActorLogic for CallbackLogic {
    type Snapshot = LogicSnapshot<()>;

    fn initial_snapshot(&self, _scope: &ActorScope, input: Option<Value>) -> Self::Snapshot {
        LogicSnapshot::active((), input)
    }

    fn start(&self, snapshot: &Self::Snapshot, scope: &ActorScope) {
        if snapshot.status != SnapshotStatus::Active {
            return;
        }
        let receivers = Arc::new(Mutex::new(Vec::new()));
        let args = CallbackArgs {
            input: snapshot.input.clone(),
            system: scope.system().clone(),
            session_id: scope.session_id().to_string(),
            parent: scope.parent().map(|parent| parent.downgrade()),
            receivers: Arc::clone(&receivers),
        };
        let teardown = (self.create)(&args);
        self.sessions.lock().insert(
            scope.session_id().to_string(),
            Session {
                receivers,
                teardown,
            },
        );
    }

    fn transition(&self, snapshot: &Self::Snapshot, event: &Event, scope: &ActorScope) -> Self::Snapshot {
        if event.event_type == STOP_EVENT {
            let session = self.sessions.lock().remove(scope.session_id());
            if let Some(teardown) = session.and_then(|session| session.teardown) {
                teardown();
            }
            return snapshot.clone().with_status(SnapshotStatus::Stopped);
        }
        if snapshot.status != SnapshotStatus::Active {
            return snapshot.clone();
        }

        let receivers = self
            .sessions
            .lock()
            .get(scope.session_id())
            .map(|session| session.receivers.lock().clone())
            .unwrap_or_default();
        for receive in receivers {
            receive(event);
        }
        snapshot.clone()
    }

    fn persisted_snapshot(&self, snapshot: &Self::Snapshot) -> Result<Value, CheckpointError> {
        persist(snapshot)
    }

    fn restore_snapshot(&self, persisted: Value, _scope: &ActorScope) -> Result<Self::Snapshot, CheckpointError> {
        restore(persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, ActorOptions, ActorStatus, SimulatedClock};
    use crate::builder::{InvokeConfig, MachineBuilder, StateConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options() -> ActorOptions {
        ActorOptions::new().with_clock(Arc::new(SimulatedClock::new()))
    }

    #[test]
    fn teardown_runs_once_on_stop() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&teardowns);
        let logic = from_callback(move |_: &CallbackArgs| {
            let counter = Arc::clone(&counter);
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as Teardown)
        });
        let actor = Actor::new(logic, options());
        actor.start();

        actor.stop();
        actor.stop();

        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert_eq!(actor.status(), ActorStatus::Stopped);
    }

    #[test]
    fn invoked_callback_sends_back_to_parent() {
        let machine = MachineBuilder::new("watcher")
            .context(())
            .initial("waiting")
            .state(
                "waiting",
                StateConfig::new()
                    .invoke(InvokeConfig::logic(from_callback(|args: &CallbackArgs| {
                        args.send_back("READY");
                        None
                    })))
                    .on("READY", "ready"),
            )
            .state("ready", StateConfig::new())
            .build()
            .unwrap();

        let actor = Actor::new(machine, options());
        actor.start();

        assert!(actor.snapshot().matches("ready"));
    }
}
