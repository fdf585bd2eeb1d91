//! # MRI Tumor Classifier
//!
//! Binary brain tumor detection on MRI slices with the Burn framework.
//!
//! ## Modules
//!
//! - `preprocessing`: grayscale, area resize, Gaussian blur and CLAHE into a
//!   `(1, 128, 128, 1)` tensor
//! - `dataset`: labeled directory loading, stratified split, augmentation, batching
//! - `model`: CNN architecture, configuration and artifact persistence
//! - `training`: training loop, LR/early-stopping policies, background jobs
//! - `inference`: prediction with a lazily loaded model and upload handling
//! - `utils`: logging, metrics and errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mri_tumor::backend::{default_device, DefaultBackend};
//! use mri_tumor::inference::InferenceEngine;
//!
//! let engine = InferenceEngine::<DefaultBackend>::new("models/brain_tumor_model.mpk", default_device());
//! let prediction = engine.predict_path("scan.png")?;
//! println!("{} ({:.4})", prediction.prediction, prediction.confidence);
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod preprocessing;
pub mod training;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use dataset::{load_dataset, stratified_split, Label, MriDataset, SplitConfig};
pub use inference::{InferenceEngine, LoadedModel, Prediction};
pub use model::{AppConfig, ClassifierConfig, TrainingConfig, TumorClassifier};
pub use preprocessing::{preprocess, preprocess_bytes, PreprocessedTensor};
pub use training::{Trainer, TrainingJob, TrainingOutcome};
pub use utils::error::{MriError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
