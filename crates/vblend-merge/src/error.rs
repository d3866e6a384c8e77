//! Error types for checkpoint blending operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while blending two checkpoints.
#[derive(Debug, Error)]
pub enum BlendError {
    /// The two checkpoints were trained at different sample rates.
    #[error("The sample rates of the two models are not the same: {primary} Hz vs {secondary} Hz")]
    IncompatibleSampleRate {
        /// Sample rate of the primary checkpoint.
        primary: u32,
        /// Sample rate of the secondary checkpoint.
        secondary: u32,
    },

    /// A parameter of the primary checkpoint is absent from the secondary one.
    #[error("Layer '{0}' is missing from the secondary model")]
    MissingLayer(String),

    /// Shapes differ in a way that cannot be reconciled.
    #[error("Unsupported shape mismatch for '{name}': {primary:?} vs {secondary:?}")]
    ShapeMismatchUnsupported {
        /// Parameter name.
        name: String,
        /// Shape in the primary checkpoint.
        primary: Vec<usize>,
        /// Shape in the secondary checkpoint.
        secondary: Vec<usize>,
    },

    /// A checkpoint could not be read.
    #[error("Failed to load checkpoint {path:?}: {reason}")]
    LoadFailure {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// A checkpoint could not be written.
    #[error("Failed to save checkpoint {path:?}: {reason}")]
    SaveFailure {
        /// Path that was being written.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// A blend rule pattern is not a valid glob.
    #[error("Invalid layer pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Parser message.
        reason: String,
    },

    /// Invalid blend configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An assembler operation was called out of order.
    #[error("Operation '{operation}' is not allowed in state {state:?}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// State the assembler was in.
        state: crate::AssemblyState,
    },

    /// Checkpoint contents are structurally invalid.
    #[error("Malformed checkpoint: {0}")]
    Malformed(String),

    /// Safetensors error.
    #[error("Safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// Array shape error.
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse classification of a [`BlendError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendErrorKind {
    /// Sample rates differ.
    IncompatibleSampleRate,
    /// Parameter missing from the secondary checkpoint.
    MissingLayer,
    /// Irreconcilable shapes.
    ShapeMismatchUnsupported,
    /// Reading a checkpoint failed.
    LoadFailure,
    /// Writing a checkpoint failed.
    SaveFailure,
    /// Bad request, pattern, or call order.
    InvalidInput,
    /// Anything else.
    Internal,
}

impl BlendError {
    /// The originating kind of this error.
    pub fn kind(&self) -> BlendErrorKind {
        match self {
            Self::IncompatibleSampleRate { .. } => BlendErrorKind::IncompatibleSampleRate,
            Self::MissingLayer(_) => BlendErrorKind::MissingLayer,
            Self::ShapeMismatchUnsupported { .. } => BlendErrorKind::ShapeMismatchUnsupported,
            Self::LoadFailure { .. } => BlendErrorKind::LoadFailure,
            Self::SaveFailure { .. } => BlendErrorKind::SaveFailure,
            Self::InvalidPattern { .. } | Self::InvalidConfig(_) | Self::InvalidState { .. } => {
                BlendErrorKind::InvalidInput
            }
            Self::Malformed(_)
            | Self::Safetensors(_)
            | Self::Shape(_)
            | Self::Io(_)
            | Self::Serde(_)
            | Self::Yaml(_) => BlendErrorKind::Internal,
        }
    }
}

/// Result type for blend operations.
pub type Result<T> = std::result::Result<T, BlendError>;
