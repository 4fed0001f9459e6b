//! Logic backed by a future that settles once.

use super::{persist, restore, LogicSnapshot};
use crate::actor::{
    AbortController, AbortSignal, ActorError, ActorLogic, ActorScope, ActorSystem,
    CancellationSignal,
};
use crate::checkpoint::CheckpointError;
use crate::core::{Event, SnapshotStatus, STOP_EVENT};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

const RESOLVE_EVENT: &str = "xstate.promise.resolve";
const REJECT_EVENT: &str = "xstate.promise.reject";

/// What the future factory receives.
pub struct PromiseArgs {
    pub input: Option<Value>,
    /// Aborted when the actor stops before the future settles.
    pub signal: AbortSignal,
    pub system: ActorSystem,
}

type Create = Arc<dyn Fn(PromiseArgs) -> BoxFuture<'static, Result<Value, ActorError>> + Send + Sync>;

/// Logic that runs a future on the ambient tokio runtime.
///
/// The actor is done with the resolved value as output, or fails with the
/// rejection. Results arriving after the actor stopped are dropped.
#[derive(Clone)]
pub struct PromiseLogic {
    create: Create,
    running: Arc<Mutex<HashMap<String, Running>>>,
}

struct Running {
    controller: AbortController,
    task: JoinHandle<()>,
}

/// Wrap an async function as actor logic.
pub fn from_promise<F, Fut>(create: F) -> PromiseLogic
where
    F: Fn(PromiseArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ActorError>> + Send + 'static,
{
    PromiseLogic {
        create: Arc::new(move |args| create(args).boxed()),
        running: Arc::new(Mutex::new(HashMap::new())),
    }
}

impl PromiseLogic {
    fn release(&self, session_id: &str) -> Option<Running> {
        self.running.lock().remove(session_id)
    }
}

impl ActorLogic for PromiseLogic {
    type Snapshot = LogicSnapshot<()>;

    fn initial_snapshot(&self, _scope: &ActorScope, input: Option<Value>) -> Self::Snapshot {
        LogicSnapshot::active((), input)
    }

    fn start(&self, snapshot: &Self::Snapshot, scope: &ActorScope) {
        if snapshot.status != SnapshotStatus::Active {
            return;
        }
        let Some(me) = scope.self_ref() else {
            return;
        };
        let controller = AbortController::new();
        let signal = controller.signal();
        let future = (self.create)(PromiseArgs {
            input: snapshot.input.clone(),
            signal: signal.clone(),
            system: scope.system().clone(),
        });
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(actor = %scope.id(), error = %err, "promise actor started outside a tokio runtime");
                me.send(Event::new(REJECT_EVENT).with("error", ActorError::new(err.to_string())));
                return;
            }
        };
        let me = me.downgrade();
        // Held across the spawn so a fast settle finds the entry.
        let mut running = self.running.lock();
        let task = handle.spawn(async move {
            let settled = match future.await {
                Ok(value) => Event::new(RESOLVE_EVENT).with("data", value),
                Err(error) => Event::new(REJECT_EVENT).with("error", error),
            };
            if signal.is_aborted() {
                return;
            }
            if let Some(me) = me.upgrade() {
                me.send(settled);
            }
        });
        running.insert(scope.session_id().to_string(), Running { controller, task });
    }

    fn transition(&self, snapshot: &Self::Snapshot, event: &Event, scope: &ActorScope) -> Self::Snapshot {
        if snapshot.status != SnapshotStatus::Active {
            return snapshot.clone();
        }
        match event.event_type.as_str() {
            RESOLVE_EVENT => {
                self.release(scope.session_id());
                LogicSnapshot {
                    status: SnapshotStatus::Done,
                    output: event.get("data").cloned(),
                    ..snapshot.clone()
                }
            }
            REJECT_EVENT => {
                self.release(scope.session_id());
                LogicSnapshot {
                    status: SnapshotStatus::Error,
                    error: event.error(),
                    ..snapshot.clone()
                }
            }
            STOP_EVENT => {
                if let Some(running) = self.release(scope.session_id()) {
                    running.controller.abort();
                    running.task.abort();
                }
                snapshot.clone().with_status(SnapshotStatus::Stopped)
            }
            _ => snapshot.clone(),
        }
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
    use crate::actor::{to_promise, Actor, ActorOptions, ActorStatus};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_with_output() {
        let logic = from_promise(|args: PromiseArgs| async move {
            let n = args.input.and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(json!(n * 2))
        });
        let actor = Actor::new(logic, ActorOptions::new().with_input(json!(21)));
        actor.start();

        let output = to_promise(&actor).await.unwrap();

        assert_eq!(output, Some(json!(42)));
        assert_eq!(actor.status(), ActorStatus::Done);
    }

    #[tokio::test]
    async fn rejection_fails_the_actor() {
        let logic = from_promise(|_| async { Err(ActorError::new("boom")) });
        let actor = Actor::new(logic, ActorOptions::new());
        actor.start();

        let result = to_promise(&actor).await;

        assert_eq!(result, Err(ActorError::new("boom")));
        assert_eq!(actor.status(), ActorStatus::Error);
    }

    #[tokio::test]
    async fn stopping_aborts_the_signal() {
        let seen = Arc::new(Mutex::new(None::<AbortSignal>));
        let sink = Arc::clone(&seen);
        let logic = from_promise(move |args: PromiseArgs| {
            *sink.lock() = Some(args.signal.clone());
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            }
        });
        let actor = Actor::new(logic, ActorOptions::new());
        actor.start();

        actor.stop();

        let signal = seen.lock().clone().unwrap();
        assert!(signal.is_aborted());
        assert_eq!(actor.status(), ActorStatus::Stopped);
    }

    #[tokio::test]
    async fn stopping_cancels_the_task() {
        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel::<()>();
        let guard = Arc::new(Mutex::new(Some(dropped_tx)));
        let logic = from_promise(move |_| {
            // Dropped with the future when the task is cancelled.
            let sender = guard.lock().take();
            async move {
                let _sender = sender;
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            }
        });
        let actor = Actor::new(logic.clone(), ActorOptions::new());
        actor.start();
        tokio::task::yield_now().await;

        actor.stop();

        let cancelled = tokio::time::timeout(Duration::from_secs(1), dropped_rx).await;
        assert!(matches!(cancelled, Ok(Err(_))));
        assert!(logic.running.lock().is_empty());
    }

    #[test]
    fn without_a_runtime_the_actor_fails() {
        let logic = from_promise(|_| async { Ok(Value::Null) });
        let actor = Actor::new(logic, ActorOptions::new());

        actor.start();

        assert_eq!(actor.status(), ActorStatus::Error);
    }
}
