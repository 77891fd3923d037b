//! Error kinds surfaced by the inference core

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ShieldError>;

/// Errors produced by normalization, extraction, model loading and decisioning
#[derive(Error, Debug)]
pub enum ShieldError {
    /// Empty, non-finite or otherwise unusable audio buffer
    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    /// A descriptor could not be computed; no partial feature map is returned
    #[error("feature extraction failed for {feature}: {reason}")]
    ExtractionFailure { feature: String, reason: String },

    /// Tensor geometry disagreed with a model contract
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    /// Weights missing or unreadable at startup
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    /// No stored embedding for the requested identity
    #[error("reference embedding not found for identity {0}")]
    ReferenceNotFound(String),

    /// Stored embedding cannot be compared (wrong length, zero norm, ...)
    #[error("invalid reference embedding: {0}")]
    InvalidReference(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

impl ShieldError {
    /// Errors that must stop the process from serving inference
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShieldError::ModelNotLoaded(_))
    }

    /// Errors caused by the caller's input rather than by the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ShieldError::MalformedAudio(_)
                | ShieldError::ExtractionFailure { .. }
                | ShieldError::ReferenceNotFound(_)
                | ShieldError::InvalidReference(_)
        )
    }

    pub(crate) fn extraction(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        ShieldError::ExtractionFailure {
            feature: feature.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(
        context: impl Into<String>,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        ShieldError::ShapeMismatch {
            context: context.into(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}
