//! Errors carried by actor snapshots and error events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A failure reported by an actor.
///
/// Unlike the build and checkpoint errors this is a value: it is stored in
/// snapshots, serialized into `xstate.error.actor.*` events, and relayed from
/// child to parent.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ActorError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data to the error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Recover an error from its serialized form.
    ///
    /// Accepts a serialized `ActorError`, a bare string, or any other value,
    /// which is kept as `data`.
    pub fn from_value(value: Value) -> Self {
        if let Value::String(message) = &value {
            return Self::new(message.clone());
        }
        if value.get("message").is_some_and(Value::is_string) {
            if let Ok(error) = serde_json::from_value(value.clone()) {
                return error;
            }
        }
        Self::new(value.to_string()).with_data(value)
    }
}

impl From<String> for ActorError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_round_trips_through_value() {
        let error = ActorError::new("boom").with_data(json!({"code": 7}));
        let value = serde_json::to_value(&error).unwrap();

        assert_eq!(ActorError::from_value(value), error);
    }

    #[test]
    fn string_values_become_messages() {
        assert_eq!(ActorError::from_value(json!("nope")).message, "nope");
    }

    #[test]
    fn other_values_are_kept_as_data() {
        let error = ActorError::from_value(json!(42));

        assert_eq!(error.message, "42");
        assert_eq!(error.data, Some(json!(42)));
    }
}
