//! Error Handling Module
//!
//! Defines the error taxonomy for the MRI tumor classifier.
//! Uses thiserror for ergonomic error definitions.
//!
//! Errors fall into four families:
//! - **input**: the image could not be decoded or was rejected at the boundary
//! - **data**: the training set is empty or unusable
//! - **model**: the artifact is missing or cannot be restored
//! - **resource**: disk or serialization failures while persisting results

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for MRI classifier operations
#[derive(Error, Debug)]
pub enum MriError {
    /// The image bytes could not be decoded
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// The image format is not one of the accepted formats
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The upload exceeds the size limit
    #[error("File too large: {size} bytes (limit {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    /// The upload contained no bytes
    #[error("Empty upload")]
    EmptyUpload,

    /// A tensor did not have the expected shape
    #[error("Dimension error: expected {expected:?}, got {actual:?}")]
    Dimension {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// No training images were found
    #[error("Dataset is empty: found {no_tumor} no-tumor and {tumor} tumor images")]
    DatasetEmpty { no_tumor: usize, tumor: usize },

    /// Dataset is present but unusable
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction or restoration
    #[error("Model error: {0}")]
    Model(String),

    /// No persisted model exists at the expected location
    #[error("Model artifact not found: {0}")]
    ArtifactMissing(PathBuf),

    /// Training diverged or otherwise could not complete
    #[error("Training failed: {0}")]
    TrainingFailed(String),

    /// Training was cancelled by its owner
    #[error("Training cancelled")]
    Cancelled,

    /// Writing a checkpoint failed; the previous artifact is untouched
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MriError {
    /// Whether the error was caused by the caller's input rather than the system
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MriError::Decode(_)
                | MriError::UnsupportedFormat(_)
                | MriError::TooLarge { .. }
                | MriError::EmptyUpload
                | MriError::Dimension { .. }
        )
    }
}

impl From<serde_json::Error> for MriError {
    fn from(err: serde_json::Error) -> Self {
        MriError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for MriError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => MriError::UnsupportedFormat(e.to_string()),
            image::ImageError::IoError(e) => MriError::Io(e),
            other => MriError::Decode(other.to_string()),
        }
    }
}

/// Convenience Result type for MRI classifier operations
pub type Result<T> = std::result::Result<T, MriError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MriError::Dataset("test error".to_string());
        assert_eq!(format!("{}", err), "Dataset error: test error");
    }

    #[test]
    fn test_dataset_empty_reports_counts() {
        let err = MriError::DatasetEmpty {
            no_tumor: 0,
            tumor: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("0 no-tumor"));
        assert!(msg.contains("0 tumor"));
    }

    #[test]
    fn test_input_error_classification() {
        assert!(MriError::EmptyUpload.is_input_error());
        assert!(MriError::Decode("bad".into()).is_input_error());
        assert!(MriError::TooLarge { size: 2, limit: 1 }.is_input_error());
        assert!(!MriError::Checkpoint("disk full".into()).is_input_error());
        assert!(!MriError::ArtifactMissing(PathBuf::from("m.mpk")).is_input_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MriError = io_err.into();
        assert!(matches!(err, MriError::Io(_)));
    }
}
