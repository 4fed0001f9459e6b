//! Checkpoint error types.

use thiserror::Error;

/// Errors that can occur while persisting or restoring actors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckpointError {
    /// Serialization to JSON failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Deserialization from JSON failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Checkpoint version is not supported by this version
    #[error("Unsupported checkpoint version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Checkpoint data failed validation
    #[error("Checkpoint validation failed: {0}")]
    ValidationFailed(String),

    /// A persisted state value names a state the machine `node` does not have
    #[error("Persisted state '{state}' is not a state of '{node}'")]
    IncompatibleSnapshot { node: String, state: String },
}
