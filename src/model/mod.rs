//! Model module: architecture, configuration and artifact persistence

pub mod artifact;
pub mod cnn;
pub mod config;

pub use artifact::{load_artifact, save_artifact, ModelInfo, TrainingResults};
pub use cnn::{build_model, ClassifierConfig, TumorClassifier};
pub use config::{AppConfig, InferenceConfig, ModelVariant, TrainingConfig};
