//! Runtime machine errors.

use crate::actor::ActorError;
use thiserror::Error;

/// Failures raised while a machine processes an event.
///
/// Any of these aborts the current macrostep and puts the actor in error
/// status; the error reaches observers as an [`ActorError`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MachineError {
    #[error("{0}")]
    Guard(String),

    #[error("Action '{action}' failed: {message}")]
    Action { action: String, message: String },

    #[error("No implementation found for {kind} '{name}'")]
    MissingImplementation { kind: &'static str, name: String },

    #[error("Unable to send event to actor '{target}' from machine '{machine}'")]
    UnknownTarget { target: String, machine: String },

    #[error("Actor with system ID '{0}' already exists")]
    DuplicateSystemId(String),
}

impl From<MachineError> for ActorError {
    fn from(error: MachineError) -> Self {
        ActorError::new(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_actor_errors() {
        let error: ActorError = MachineError::MissingImplementation {
            kind: "guard",
            name: "isReady".into(),
        }
        .into();

        assert_eq!(error.message, "No implementation found for guard 'isReady'");
    }

    #[test]
    fn action_errors_name_the_action() {
        let error = MachineError::Action {
            action: "save".into(),
            message: "disk full".into(),
        };

        assert_eq!(error.to_string(), "Action 'save' failed: disk full");
    }
}
