//! Logic backed by a stream of values.

use super::{persist, restore, LogicSnapshot};
use crate::actor::{ActorError, ActorLogic, ActorScope, ActorSystem};
use crate::checkpoint::CheckpointError;
use crate::core::{Event, SnapshotStatus, STOP_EVENT};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

const NEXT_EVENT: &str = "xstate.observable.next";
const ERROR_EVENT: &str = "xstate.observable.error";
const COMPLETE_EVENT: &str = "xstate.observable.complete";

/// What the stream factory receives.
pub struct ObservableArgs {
    pub input: Option<Value>,
    pub system: ActorSystem,
}

type Create = Arc<dyn Fn(ObservableArgs) -> BoxStream<'static, Result<Value, ActorError>> + Send + Sync>;

/// Logic whose context is the latest value of a stream.
///
/// The actor is done when the stream ends and fails on the first `Err`.
/// Stopping the actor cancels the task polling the stream.
#[derive(Clone)]
pub struct ObservableLogic {
    create: Create,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

/// Wrap a stream factory as actor logic.
pub fn from_observable<F, S>(create: F) -> ObservableLogic
where
    F: Fn(ObservableArgs) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Value, ActorError>> + Send + 'static,
{
    ObservableLogic {
        create: Arc::new(move |args| create(args).boxed()),
        tasks: Arc::new(Mutex::new(HashMap::new())),
    }
}

impl ObservableLogic {
    fn cancel(&self, session_id: &str) {
        if let Some(task) = self.tasks.lock().remove(session_id) {
            task.abort();
        }
    }
}

impl ActorLogic for ObservableLogic {
    type Snapshot = LogicSnapshot<Option<Value>>;

    fn initial_snapshot(&self, _scope: &ActorScope, input: Option<Value>) -> Self::Snapshot {
        LogicSnapshot::active(None, input)
    }

    fn start(&self, snapshot: &Self::Snapshot, scope: &ActorScope) {
        if snapshot.status != SnapshotStatus::Active {
            return;
        }
        let Some(me) = scope.self_ref() else {
            return;
        };
        let mut stream = (self.create)(ObservableArgs {
            input: snapshot.input.clone(),
            system: scope.system().clone(),
        });
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(actor = %scope.id(), error = %err, "observable actor started outside a tokio runtime");
                me.send(Event::new(ERROR_EVENT).with("error", ActorError::new(err.to_string())));
                return;
            }
        };
        let me = me.downgrade();
        let mut tasks = self.tasks.lock();
        let task = handle.spawn(async move {
            while let Some(item) = stream.next().await {
                let Some(actor) = me.upgrade() else {
                    return;
                };
                match item {
                    Ok(value) => actor.send(Event::new(NEXT_EVENT).with("data", value)),
                    Err(error) => {
                        actor.send(Event::new(ERROR_EVENT).with("error", error));
                        return;
                    }
                }
            }
            if let Some(actor) = me.upgrade() {
                actor.send(Event::new(COMPLETE_EVENT));
            }
        });
        tasks.insert(scope.session_id().to_string(), task);
    }

    fn transition(&self, snapshot: &Self::Snapshot, event: &Event, scope: &ActorScope) -> Self::Snapshot {
        if snapshot.status != SnapshotStatus::Active {
            return snapshot.clone();
        }
        match event.event_type.as_str() {
            NEXT_EVENT => LogicSnapshot {
                context: event.get("data").cloned(),
                ..snapshot.clone()
            },
            ERROR_EVENT => {
                self.cancel(scope.session_id());
                LogicSnapshot {
                    status: SnapshotStatus::Error,
                    error: event.error(),
                    ..snapshot.clone()
                }
            }
            COMPLETE_EVENT => {
                self.tasks.lock().remove(scope.session_id());
                snapshot.clone().with_status(SnapshotStatus::Done)
            }
            STOP_EVENT => {
                self.cancel(scope.session_id());
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
    use crate::actor::{to_promise, wait_for, Actor, ActorOptions, ActorStatus, WaitOptions};
    use futures::stream;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn context_tracks_the_latest_value() {
        let logic = from_observable(|_| stream::iter(vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))]));
        let actor = Actor::new(logic, ActorOptions::new());
        actor.start();

        to_promise(&actor).await.unwrap();

        assert_eq!(actor.snapshot().context, Some(json!(3)));
        assert_eq!(actor.status(), ActorStatus::Done);
    }

    #[tokio::test]
    async fn stream_errors_fail_the_actor() {
        let logic = from_observable(|_| stream::iter(vec![Ok(json!("a")), Err(ActorError::new("broken"))]));
        let actor = Actor::new(logic, ActorOptions::new());
        actor.start();

        let result = to_promise(&actor).await;

        assert_eq!(result, Err(ActorError::new("broken")));
        assert_eq!(actor.snapshot().context, Some(json!("a")));
    }

    #[tokio::test]
    async fn stop_cancels_the_stream() {
        let logic = from_observable(|_| {
            stream::unfold(0, |n| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some((Ok(json!(n)), n + 1))
            })
        });
        let actor = Actor::new(logic.clone(), ActorOptions::new());
        actor.start();
        wait_for(&actor, |s| s.context.is_some(), WaitOptions::new())
            .await
            .unwrap();

        actor.stop();

        assert_eq!(actor.status(), ActorStatus::Stopped);
        assert!(logic.tasks.lock().is_empty());
    }
}
