//! Error types shared by the windowing, training and scoring paths.

use std::collections::BTreeMap;
use thiserror::Error;

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, AnomalyError>;

/// Errors raised to callers of the training and scoring entry points.
#[derive(Debug, Error)]
pub enum AnomalyError {
    /// Tag configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A hyperparameter or builder argument is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The series is shorter than one window.
    #[error("insufficient data: {rows} rows, need at least {timesteps}")]
    InsufficientData { rows: usize, timesteps: usize },

    /// Input shape disagrees with the trained shape.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// NaN or infinite reading in an input tensor.
    #[error("non-finite value in {0}")]
    NonFinite(String),

    /// The best variant's error is zero or too small for a finite confidence.
    #[error("zero reconstruction error for variant without '{tag}', confidence undefined")]
    DegenerateError {
        tag: String,
        errors: BTreeMap<String, f64>,
    },

    /// Variant keys do not cover the configured tag set.
    #[error("ensemble incomplete: no variant for {missing:?}")]
    IncompleteEnsemble { missing: Vec<String> },

    /// A time bound could not be normalized to nanoseconds.
    #[error("invalid time bound: {0}")]
    InvalidTime(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AnomalyError {
    /// Create a shape mismatch error from anything printable.
    #[must_use]
    pub fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}

/// Why a single model variant did not train. Isolated per variant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingFailure {
    /// Training loss became NaN or infinite.
    #[error("training diverged at epoch {epoch}")]
    Diverged { epoch: usize },

    #[error("no training samples")]
    EmptyTrainingSet,

    /// NaN or infinite value in the variant's inputs or targets.
    #[error("non-finite training data")]
    NonFiniteInput,

    /// Training was cancelled before the variant finished.
    #[error("training aborted")]
    Aborted,
}
