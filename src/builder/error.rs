//! Build errors for machine definitions.

use thiserror::Error;

/// Problems found while building a machine from its configuration.
///
/// Every check runs; when more than one fails they are reported together
/// as [`BuildError::Multiple`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("Compound state '{state}' has no initial state. Call .initial(key)")]
    MissingInitial { state: String },

    #[error("Initial state '{initial}' is not a child of '{state}'")]
    InvalidInitial { state: String, initial: String },

    #[error("Unresolved target '{target}' on state '{state}': {reason}")]
    UnresolvedTarget {
        state: String,
        target: String,
        reason: String,
    },

    #[error("State id '{0}' is used more than once")]
    DuplicateId(String),

    #[error("Regions of parallel state '{state}' both handle '{event}' and one targets the other")]
    ParallelConflict { state: String, event: String },

    #[error("Context not specified. Call .context(value) before .build()")]
    MissingContext,

    #[error("{}", describe(.0))]
    Multiple(Vec<BuildError>),
}

fn describe(errors: &[BuildError]) -> String {
    let lines: Vec<String> = errors.iter().map(|error| format!("  - {error}")).collect();
    format!("{} build errors:\n{}", errors.len(), lines.join("\n"))
}

impl BuildError {
    /// The individual errors, flattening `Multiple`.
    pub fn errors(&self) -> Vec<&BuildError> {
        match self {
            BuildError::Multiple(errors) => errors.iter().flat_map(BuildError::errors).collect(),
            error => vec![error],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_lists_every_error() {
        let error = BuildError::Multiple(vec![
            BuildError::MissingContext,
            BuildError::DuplicateId("app.idle".into()),
        ]);

        let message = error.to_string();
        assert!(message.starts_with("2 build errors"));
        assert!(message.contains("State id 'app.idle' is used more than once"));
        assert_eq!(error.errors().len(), 2);
    }
}
