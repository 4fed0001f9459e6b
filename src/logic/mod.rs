//! Actor logic adapters.
//!
//! Besides machines, actors can run:
//!
//! - [`from_promise`]: a future that settles once
//! - [`from_callback`]: a long-lived callback that can send events back
//! - [`from_observable`]: a stream of values
//! - [`from_transition`]: a reducer over a context
//! - [`empty_logic`]: logic that does nothing, for placeholders
//!
//! Adapter snapshots share one shape, [`LogicSnapshot`].

mod callback;
mod observable;
mod promise;
mod transition;

pub use callback::{from_callback, CallbackArgs, CallbackLogic, Teardown};
pub use observable::{from_observable, ObservableArgs, ObservableLogic};
pub use promise::{from_promise, PromiseArgs, PromiseLogic};
pub use transition::{from_transition, from_transition_with_input, TransitionLogic};

use crate::actor::{ActorError, ActorLogic, ActorScope, ActorSnapshot};
use crate::checkpoint::CheckpointError;
use crate::core::{Event, SnapshotStatus};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of an adapter actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicSnapshot<T> {
    pub status: SnapshotStatus,
    pub output: Option<Value>,
    pub error: Option<ActorError>,
    pub context: T,
    pub input: Option<Value>,
}

impl<T> LogicSnapshot<T> {
    pub(crate) fn active(context: T, input: Option<Value>) -> Self {
        Self {
            status: SnapshotStatus::Active,
            output: None,
            error: None,
            context,
            input,
        }
    }

    pub(crate) fn with_status(mut self, status: SnapshotStatus) -> Self {
        self.status = status;
        self
    }
}

impl<T: Clone + Send + Sync + 'static> ActorSnapshot for LogicSnapshot<T> {
    fn status(&self) -> SnapshotStatus {
        self.status
    }

    fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    fn error(&self) -> Option<&ActorError> {
        self.error.as_ref()
    }

    fn failed(mut self, error: ActorError) -> Self {
        self.status = SnapshotStatus::Error;
        self.error = Some(error);
        self
    }
}

pub(crate) fn persist<T: Serialize>(snapshot: &LogicSnapshot<T>) -> Result<Value, CheckpointError> {
    serde_json::to_value(snapshot).map_err(|err| CheckpointError::SerializationFailed(err.to_string()))
}

pub(crate) fn restore<T: DeserializeOwned>(persisted: Value) -> Result<LogicSnapshot<T>, CheckpointError> {
    serde_json::from_value(persisted)
        .map_err(|err| CheckpointError::DeserializationFailed(err.to_string()))
}

/// Logic that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyLogic;

pub fn empty_logic() -> EmptyLogic {
    EmptyLogic
}

impl ActorLogic for EmptyLogic {
    type Snapshot = LogicSnapshot<()>;

    fn initial_snapshot(&self, _scope: &ActorScope, input: Option<Value>) -> Self::Snapshot {
        LogicSnapshot::active((), input)
    }

    fn transition(&self, snapshot: &Self::Snapshot, event: &Event, _scope: &ActorScope) -> Self::Snapshot {
        if event.event_type == crate::core::STOP_EVENT {
            return snapshot.clone().with_status(SnapshotStatus::Stopped);
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
    use crate::actor::{Actor, ActorOptions, ActorStatus};
    use serde_json::json;

    #[test]
    fn empty_logic_stays_active_until_stopped() {
        let actor = Actor::new(empty_logic(), ActorOptions::new().with_input(json!(7)));
        actor.start();
        actor.send("ANYTHING");

        assert_eq!(actor.status(), ActorStatus::Active);
        assert_eq!(actor.snapshot().input, Some(json!(7)));

        actor.stop();
        assert_eq!(actor.status(), ActorStatus::Stopped);
    }

    #[test]
    fn snapshots_persist_as_camel_case_json() {
        let snapshot = LogicSnapshot::active(3, None);

        let persisted = persist(&snapshot).unwrap();
        assert_eq!(persisted["status"], json!("active"));
        assert_eq!(persisted["context"], json!(3));

        let restored: LogicSnapshot<i32> = restore(persisted).unwrap();
        assert_eq!(restored, snapshot);
    }
}
