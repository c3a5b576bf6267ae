//! Custom error types for the dataset pipeline.
//!
//! This module provides the error hierarchy using `thiserror`. The variants
//! follow the pipeline's failure taxonomy: validation errors are rejected
//! synchronously before any message is published, transform errors are
//! terminal for a single job, infrastructure errors are transient and drive
//! broker redelivery, and malformed messages are permanently rejected.
//!
//! Errors are serializable so that progress observers can receive them as
//! structured `{code, message}` payloads.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// Error produced by a stage transform.
///
/// Carries a human-readable cause. A failed transform never leaves a
/// partial output artifact behind: outputs are written to a temporary
/// file and renamed into place only on success.
#[derive(Error, Debug)]
pub enum TransformError {
    /// Stage-specific processing failure.
    #[error("{0}")]
    Failed(String),

    /// IO error while reading or writing an artifact.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Polars error while processing the dataset.
    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),
}

/// The main error type for the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad parameters or missing input artifact. Rejected before any
    /// message is published.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A stage transform failed. Terminal for the job; no redelivery,
    /// no next-stage publish.
    #[error("Transform failed at stage '{stage}': {reason}")]
    Transform { stage: String, reason: String },

    /// Progress store or broker unavailable during a post-transform
    /// update. Transient: the message is not acknowledged and the
    /// broker redelivers.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// A message payload that cannot be deserialized. Permanently
    /// rejected, never redelivered.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Invalid pipeline configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get a stable error code for observers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Transform { .. } => "TRANSFORM_ERROR",
            Self::Infrastructure(_) => "INFRASTRUCTURE_ERROR",
            Self::MalformedMessage(_) => "MALFORMED_MESSAGE",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error is transient and should trigger redelivery
    /// rather than a terminal job failure.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Infrastructure(_) => true,
            Self::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Serialize errors as `{code, message}` for progress observers.
impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Polars(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(
            PipelineError::Validation("bad".into()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            PipelineError::MalformedMessage("oops".into()).error_code(),
            "MALFORMED_MESSAGE"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(PipelineError::Infrastructure("store down".into()).is_transient());
        assert!(
            !PipelineError::Transform {
                stage: "fill_missing".into(),
                reason: "no numeric columns".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_with_context_preserves_code() {
        let err = PipelineError::Infrastructure("broker unreachable".into())
            .with_context("publishing next stage");
        assert!(err.to_string().contains("publishing next stage"));
        assert_eq!(err.error_code(), "INFRASTRUCTURE_ERROR");
        assert!(err.is_transient());
    }

    #[test]
    fn test_error_serialization() {
        let err = PipelineError::Transform {
            stage: "detect_outliers".into(),
            reason: "empty dataset".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("TRANSFORM_ERROR"));
        assert!(json.contains("detect_outliers"));
    }
}
