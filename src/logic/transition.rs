//! Reducer logic.

use super::{persist, restore, LogicSnapshot};
use crate::actor::{ActorLogic, ActorScope};
use crate::checkpoint::CheckpointError;
use crate::core::{Context, Event, SnapshotStatus, STOP_EVENT};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type Reducer<T> = Arc<dyn Fn(&T, &Event) -> T + Send + Sync>;
type Initial<T> = Arc<dyn Fn(Option<&Value>) -> T + Send + Sync>;

/// Logic that folds every event into its context with a reducer.
pub struct TransitionLogic<T> {
    reducer: Reducer<T>,
    initial: Initial<T>,
}

impl<T> Clone for TransitionLogic<T> {
    fn clone(&self) -> Self {
        Self {
            reducer: Arc::clone(&self.reducer),
            initial: Arc::clone(&self.initial),
        }
    }
}

impl<T> fmt::Debug for TransitionLogic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionLogic").finish_non_exhaustive()
    }
}

/// Reducer logic starting from a fixed context.
///
/// # Example
///
/// ```rust
/// use statecraft::actor::{Actor, ActorOptions};
/// use statecraft::logic::from_transition;
/// use statecraft::Event;
///
/// let total = from_transition(
///     |sum: &i64, event: &Event| sum + event.get("amount").and_then(|v| v.as_i64()).unwrap_or(0),
///     0,
/// );
/// let actor = Actor::new(total, ActorOptions::default());
/// actor.start();
/// actor.send(Event::new("ADD").with("amount", 5));
///
/// assert_eq!(actor.snapshot().context, 5);
/// ```
pub fn from_transition<T, F>(reducer: F, initial: T) -> TransitionLogic<T>
where
    T: Context,
    F: Fn(&T, &Event) -> T + Send + Sync + 'static,
{
    from_transition_with_input(reducer, move |_| initial.clone())
}

/// Reducer logic whose initial context is computed from the actor input.
pub fn from_transition_with_input<T, F, I>(reducer: F, initial: I) -> TransitionLogic<T>
where
    T: Context,
    F: Fn(&T, &Event) -> T + Send + Sync + 'static,
    I: Fn(Option<&Value>) -> T + Send + Sync + 'static,
{
    TransitionLogic {
        reducer: Arc::new(reducer),
        initial: Arc::new(initial),
    }
}

impl<T: Context> ActorLogic for TransitionLogic<T> {
    type Snapshot = LogicSnapshot<T>;

    fn initial_snapshot(&self, _scope: &ActorScope, input: Option<Value>) -> Self::Snapshot {
        let context = (self.initial)(input.as_ref());
        LogicSnapshot::active(context, input)
    }

    fn transition(&self, snapshot: &Self::Snapshot, event: &Event, _scope: &ActorScope) -> Self::Snapshot {
        if event.event_type == STOP_EVENT {
            return snapshot.clone().with_status(SnapshotStatus::Stopped);
        }
        if snapshot.status != SnapshotStatus::Active {
            return snapshot.clone();
        }
        LogicSnapshot {
            context: (self.reducer)(&snapshot.context, event),
            ..snapshot.clone()
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
    use crate::actor::{Actor, ActorOptions, SimulatedClock};
    use serde_json::json;

    fn options() -> ActorOptions {
        ActorOptions::new().with_clock(Arc::new(SimulatedClock::new()))
    }

    #[test]
    fn input_seeds_the_context() {
        let logic = from_transition_with_input(
            |items: &Vec<String>, event: &Event| {
                let mut items = items.clone();
                items.push(event.event_type.clone());
                items
            },
            |input| {
                input
                    .and_then(|value| serde_json::from_value(value.clone()).ok())
                    .unwrap_or_default()
            },
        );
        let actor = Actor::new(logic, options().with_input(json!(["seed"])));
        actor.start();

        actor.send("next");

        assert_eq!(actor.snapshot().context, vec!["seed", "next"]);
    }

    #[test]
    fn restored_context_continues_reducing() {
        let logic = from_transition(|n: &u32, _: &Event| n * 2, 1);
        let actor = Actor::new(logic.clone(), options());
        actor.start();
        actor.send("DOUBLE");
        actor.send("DOUBLE");
        let persisted = actor.persisted_snapshot().unwrap();

        let restored = Actor::restore(logic, persisted, options()).unwrap();
        restored.start();
        restored.send("DOUBLE");

        assert_eq!(restored.snapshot().context, 8);
    }
}
