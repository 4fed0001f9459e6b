//! Event objects and the reserved event vocabulary.
//!
//! Events are plain JSON-shaped records: a `type` string plus an open payload.
//! The engine reserves a handful of `xstate.*` types for lifecycle signals
//! (initialization, stopping, completion, errors, timers, and child snapshots).

use crate::actor::ActorError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Event sent to an actor when it is started.
pub const INIT_EVENT: &str = "xstate.init";

/// Event that stops an actor.
pub const STOP_EVENT: &str = "xstate.stop";

/// Descriptor matching any event.
pub const WILDCARD: &str = "*";

const DONE_STATE_PREFIX: &str = "xstate.done.state.";
const DONE_ACTOR_PREFIX: &str = "xstate.done.actor.";
const ERROR_ACTOR_PREFIX: &str = "xstate.error.actor.";
const SNAPSHOT_PREFIX: &str = "xstate.snapshot.";
pub(crate) const AFTER_PREFIX: &str = "xstate.after.";

/// An event delivered to an actor.
///
/// Serializes as a flat object: `{"type": "INC", "by": 2}`.
///
/// # Example
///
/// ```rust
/// use statecraft::core::Event;
///
/// let event = Event::new("INC").with("by", 2);
///
/// assert_eq!(event.event_type, "INC");
/// assert_eq!(event.get("by"), Some(&serde_json::json!(2)));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Create an event with an empty payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Map::new(),
        }
    }

    /// Attach a payload field. Values that fail to serialize become `null`.
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.payload.insert(key.into(), value);
        self
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// `xstate.init`, carrying the actor input when present.
    pub fn init(input: Option<Value>) -> Self {
        let event = Self::new(INIT_EVENT);
        match input {
            Some(input) => event.with("input", input),
            None => event,
        }
    }

    /// `xstate.stop`.
    pub fn stop() -> Self {
        Self::new(STOP_EVENT)
    }

    /// `xstate.done.state.<id>`: the compound or parallel node `id` completed.
    pub fn done_state(state_id: &str, output: Option<Value>) -> Self {
        let event = Self::new(format!("{DONE_STATE_PREFIX}{state_id}"));
        match output {
            Some(output) => event.with("output", output),
            None => event,
        }
    }

    /// `xstate.done.actor.<id>`: a child actor reached its final state.
    pub fn done_actor(actor_id: &str, output: Option<Value>) -> Self {
        let event = Self::new(format!("{DONE_ACTOR_PREFIX}{actor_id}")).with("actorId", actor_id);
        match output {
            Some(output) => event.with("output", output),
            None => event,
        }
    }

    /// `xstate.error.actor.<id>`: a child actor failed.
    pub fn error_actor(actor_id: &str, error: &ActorError) -> Self {
        Self::new(format!("{ERROR_ACTOR_PREFIX}{actor_id}"))
            .with("error", error)
            .with("actorId", actor_id)
    }

    /// `xstate.snapshot.<id>`: a synced child published a snapshot.
    pub fn snapshot(actor_id: &str, snapshot: Value) -> Self {
        Self::new(format!("{SNAPSHOT_PREFIX}{actor_id}"))
            .with("snapshot", snapshot)
            .with("actorId", actor_id)
    }

    /// Event type raised when a delayed transition fires.
    pub fn after_type(delay: &str, state_id: &str) -> String {
        format!("{AFTER_PREFIX}{delay}.{state_id}")
    }

    /// Whether this reports a failed child actor.
    pub fn is_error_actor(&self) -> bool {
        self.event_type.starts_with(ERROR_ACTOR_PREFIX)
    }

    /// The error carried by an `xstate.error.actor.*` event.
    pub fn error(&self) -> Option<ActorError> {
        self.get("error")
            .map(|value| ActorError::from_value(value.clone()))
    }

    /// The `output` payload of done events.
    pub fn output(&self) -> Option<&Value> {
        self.get("output")
    }

    pub(crate) fn done_state_type(state_id: &str) -> String {
        format!("{DONE_STATE_PREFIX}{state_id}")
    }

    pub(crate) fn done_actor_type(actor_id: &str) -> String {
        format!("{DONE_ACTOR_PREFIX}{actor_id}")
    }

    pub(crate) fn error_actor_type(actor_id: &str) -> String {
        format!("{ERROR_ACTOR_PREFIX}{actor_id}")
    }

    pub(crate) fn snapshot_type(actor_id: &str) -> String {
        format!("{SNAPSHOT_PREFIX}{actor_id}")
    }
}

impl From<&str> for Event {
    fn from(event_type: &str) -> Self {
        Self::new(event_type)
    }
}

impl From<String> for Event {
    fn from(event_type: String) -> Self {
        Self::new(event_type)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.event_type)
    }
}

/// Whether an event descriptor such as `*` or `user.*` matches `event_type`.
///
/// A wildcard is only honored as the final token.
pub fn descriptor_matches(descriptor: &str, event_type: &str) -> bool {
    if descriptor == WILDCARD || descriptor == event_type {
        return true;
    }
    let Some(prefix) = descriptor.strip_suffix(".*") else {
        return false;
    };
    if prefix.contains('*') {
        return false;
    }
    let mut event_tokens = event_type.split('.');
    prefix
        .split('.')
        .all(|token| event_tokens.next() == Some(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_flat() {
        let event = Event::new("INC").with("by", 2);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json, json!({"type": "INC", "by": 2}));
    }

    #[test]
    fn event_deserializes_payload() {
        let event: Event = serde_json::from_value(json!({"type": "SET", "value": "x"})).unwrap();

        assert_eq!(event.event_type, "SET");
        assert_eq!(event.get("value"), Some(&json!("x")));
    }

    #[test]
    fn reserved_event_types() {
        assert_eq!(Event::done_state("m.a", None).event_type, "xstate.done.state.m.a");
        assert_eq!(
            Event::done_actor("child", Some(json!(1))).output(),
            Some(&json!(1))
        );
        assert_eq!(Event::after_type("1000", "light.green"), "xstate.after.1000.light.green");
    }

    #[test]
    fn error_actor_event_carries_error() {
        let event = Event::error_actor("child", &ActorError::new("boom"));

        assert!(event.is_error_actor());
        assert_eq!(event.error().map(|e| e.message), Some("boom".to_string()));
    }

    #[test]
    fn wildcard_descriptors() {
        assert!(descriptor_matches("*", "anything"));
        assert!(descriptor_matches("user.*", "user.created"));
        assert!(descriptor_matches("user.*", "user.created.now"));
        assert!(!descriptor_matches("user.*", "users.created"));
        assert!(!descriptor_matches("user.*.now", "user.created.now"));
        assert!(!descriptor_matches("user", "user.created"));
    }
}
