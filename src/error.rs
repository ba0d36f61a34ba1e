//! Engine error types
//!
//! Every fallible operation in the crate returns [`EngineResult`]. Recoverable
//! conditions (device-local exhaustion, append overflow, missing prerequisites)
//! are still represented here so they can be logged with a uniform message, even
//! though the operations that hit them report a `bool` or fall back instead of
//! propagating.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the engine
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("arena '{arena}' was configured with zero capacity")]
    ZeroCapacityRequested { arena: String },

    #[error("device-local allocation of {requested} bytes failed ({available} bytes left in budget)")]
    DeviceLocalOutOfMemory { requested: u64, available: u64 },

    #[error("host-visible allocation of {size} bytes for '{arena}' failed: {reason}")]
    HostAllocationFailed {
        arena: String,
        size: u64,
        reason: String,
    },

    #[error("append of {requested} bytes to '{arena}' overflows capacity ({remaining} bytes remaining)")]
    CapacityOverflowOnAppend {
        arena: String,
        requested: u64,
        remaining: u64,
    },

    #[error("missing prerequisite: {what}")]
    MissingPrerequisite { what: String },

    #[error("arena '{arena}' requested {requested} bytes, device limit is {limit}")]
    CapacityExceedsLimit {
        arena: String,
        requested: u64,
        limit: u64,
    },

    #[error("failed to load shader {path:?}: {error}")]
    ShaderLoad { path: PathBuf, error: String },

    #[error("failed to create pipeline '{pipeline}': {error}")]
    PipelineCreation { pipeline: String, error: String },

    #[error("a pipeline named '{name}' already exists")]
    DuplicatePipeline { name: String },

    #[error("no pipeline named '{name}'")]
    UnknownPipeline { name: String },

    #[error("surface error: {0}")]
    Surface(String),

    #[error("GPU operation '{operation}' failed: {error}")]
    GpuOperationFailed { operation: String, error: String },

    #[error("texture '{name}' rejected: {reason}")]
    TextureRejected { name: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the owning pipeline can keep operating after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::DeviceLocalOutOfMemory { .. }
                | EngineError::CapacityOverflowOnAppend { .. }
                | EngineError::MissingPrerequisite { .. }
        )
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(error: toml::de::Error) -> Self {
        EngineError::Config(error.to_string())
    }
}

/// Attach context to foreign errors while converting them into [`EngineError`]
pub trait ErrorContext<T> {
    fn gpu_context(self, operation: &str) -> EngineResult<T>;
    fn pipeline_context(self, pipeline: &str) -> EngineResult<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn gpu_context(self, operation: &str) -> EngineResult<T> {
        self.map_err(|e| gpu_operation_error(operation, e))
    }

    fn pipeline_context(self, pipeline: &str) -> EngineResult<T> {
        self.map_err(|e| pipeline_creation_error(pipeline, e))
    }
}

/// Create a GPU operation error
pub fn gpu_operation_error(operation: &str, error: impl std::fmt::Display) -> EngineError {
    EngineError::GpuOperationFailed {
        operation: operation.to_string(),
        error: error.to_string(),
    }
}

/// Create a pipeline creation error
pub fn pipeline_creation_error(pipeline: &str, error: impl std::fmt::Display) -> EngineError {
    EngineError::PipelineCreation {
        pipeline: pipeline.to_string(),
        error: error.to_string(),
    }
}

/// Create a missing prerequisite error
pub fn missing_prerequisite(what: impl Into<String>) -> EngineError {
    EngineError::MissingPrerequisite { what: what.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(EngineError::DeviceLocalOutOfMemory {
            requested: 10,
            available: 0
        }
        .is_recoverable());
        assert!(missing_prerequisite("vertex arena").is_recoverable());
        assert!(!EngineError::ZeroCapacityRequested {
            arena: "vertex".into()
        }
        .is_recoverable());
        assert!(!EngineError::HostAllocationFailed {
            arena: "index".into(),
            size: 4,
            reason: "denied".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_context_wraps_message() {
        let result: Result<(), &str> = Err("device lost");
        match result.gpu_context("submit") {
            Err(EngineError::GpuOperationFailed { operation, error }) => {
                assert_eq!(operation, "submit");
                assert_eq!(error, "device lost");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
