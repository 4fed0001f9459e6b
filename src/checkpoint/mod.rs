//! Checkpoint and resume functionality for actors.
//!
//! A [`Checkpoint`] wraps an actor's persisted snapshot in a versioned
//! envelope, so long-running workflows can survive process restarts. The
//! snapshot itself is whatever the actor's logic persists; for machines that
//! is the state value, context, history and the persisted children.
//!
//! # Example
//!
//! ```rust
//! use statecraft::actor::{Actor, ActorOptions};
//! use statecraft::checkpoint::Checkpoint;
//! use statecraft::logic::from_transition;
//! use statecraft::Event;
//!
//! let counter = from_transition(|n: &u32, _: &Event| n + 1, 0);
//! let actor = Actor::new(counter.clone(), ActorOptions::default().with_id("counter"));
//! actor.start();
//! actor.send("TICK");
//!
//! let json = Checkpoint::capture(&actor).unwrap().to_json().unwrap();
//! let resumed = Checkpoint::from_json(&json)
//!     .unwrap()
//!     .resume(counter, ActorOptions::default())
//!     .unwrap();
//! resumed.start();
//!
//! assert_eq!(resumed.id(), "counter");
//! assert_eq!(resumed.snapshot().context, 1);
//! ```

use crate::actor::{Actor, ActorLogic, ActorOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod error;

pub use error::CheckpointError;

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Serializable checkpoint of an actor.
/// Does NOT include logic or implementations (not serializable).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Checkpoint format version
    pub version: u32,

    /// Unique checkpoint identifier
    pub id: String,

    /// When checkpoint was created
    pub timestamp: DateTime<Utc>,

    /// Id of the checkpointed actor
    pub actor_id: String,

    /// The actor's persisted snapshot
    pub snapshot: Value,
}

impl Checkpoint {
    /// Capture the latest snapshot of `actor`.
    pub fn capture<L: ActorLogic>(actor: &Actor<L>) -> Result<Self, CheckpointError> {
        let snapshot = actor.persisted_snapshot()?;
        tracing::debug!(actor = %actor.id(), "checkpoint captured");
        Ok(Self {
            version: CHECKPOINT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor_id: actor.id().to_string(),
            snapshot,
        })
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string(self).map_err(|err| CheckpointError::SerializationFailed(err.to_string()))
    }

    /// Parse a checkpoint, rejecting versions this crate cannot read.
    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let checkpoint: Self = serde_json::from_str(json)
            .map_err(|err| CheckpointError::DeserializationFailed(err.to_string()))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    fn validate(&self) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        if !self.snapshot.is_object() {
            return Err(CheckpointError::ValidationFailed(
                "snapshot must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    /// Recreate the actor from this checkpoint. It still has to be started.
    ///
    /// The captured actor id is kept unless `options` sets another one.
    pub fn resume<L: ActorLogic>(
        &self,
        logic: L,
        options: ActorOptions,
    ) -> Result<Actor<L>, CheckpointError> {
        let options = match options.id {
            Some(_) => options,
            None => options.with_id(self.actor_id.clone()),
        };
        Actor::restore(logic, self.snapshot.clone(), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::SimulatedClock;
    use crate::builder::{MachineBuilder, StateConfig};
    use crate::effects::{Action, Machine};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn options() -> ActorOptions {
        ActorOptions::new().with_clock(Arc::new(SimulatedClock::new()))
    }

    fn door(entries: Arc<AtomicUsize>) -> Machine<u32> {
        MachineBuilder::new("door")
            .context(0u32)
            .initial("closed")
            .state("closed", StateConfig::new().on("OPEN", "open"))
            .state(
                "open",
                StateConfig::new()
                    .entry(Action::assign(|opened: &u32, _| opened + 1))
                    .entry(Action::custom("countEntry", move |_| {
                        entries.fetch_add(1, Ordering::SeqCst);
                    }))
                    .on("CLOSE", "closed"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn unsupported_versions_are_rejected() {
        let json = r#"{"version":2,"id":"x","timestamp":"2024-01-01T00:00:00Z","actorId":"a","snapshot":{}}"#;

        let result = Checkpoint::from_json(json);

        assert_eq!(
            result,
            Err(CheckpointError::UnsupportedVersion {
                found: 2,
                supported: CHECKPOINT_VERSION
            })
        );
    }

    #[test]
    fn malformed_json_is_a_deserialization_error() {
        let result = Checkpoint::from_json("{not json");

        assert!(matches!(result, Err(CheckpointError::DeserializationFailed(_))));
    }

    #[test]
    fn resumed_machine_keeps_state_without_replaying_entry() {
        let entries = Arc::new(AtomicUsize::new(0));
        let machine = door(Arc::clone(&entries));
        let actor = Actor::new(machine.clone(), options().with_id("front-door"));
        actor.start();
        actor.send("OPEN");
        let checkpoint = Checkpoint::capture(&actor).unwrap();
        let json = checkpoint.to_json().unwrap();

        let resumed = Checkpoint::from_json(&json)
            .unwrap()
            .resume(machine, options())
            .unwrap();
        resumed.start();

        assert_eq!(resumed.id(), "front-door");
        assert!(resumed.snapshot().matches("open"));
        assert_eq!(resumed.snapshot().context, 1);
        assert_eq!(entries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn checkpoints_get_fresh_ids() {
        let machine = door(Arc::new(AtomicUsize::new(0)));
        let actor = Actor::new(machine, options());

        let first = Checkpoint::capture(&actor).unwrap();
        let second = Checkpoint::capture(&actor).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.snapshot, second.snapshot);
    }
}
