//! Inference module
//!
//! - `engine`: lazily loaded classifier, prediction and the untrained fallback
//! - `upload`: size/format checks and scoped staging of uploaded bytes

pub mod engine;
pub mod upload;

pub use engine::{
    label_for_probability, predict, InferenceEngine, LoadedModel, Prediction, TUMOR_THRESHOLD,
};
pub use upload::{StagedUpload, UploadPolicy, ACCEPTED_FORMATS};
