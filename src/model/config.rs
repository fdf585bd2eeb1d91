//! Configuration Module
//!
//! Training, inference and logging settings. Every struct has a `Default`
//! matching the reference training protocol, a `validate()` and JSON
//! persistence. CLI flags override values loaded from a file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::model::cnn::ClassifierConfig;
use crate::utils::error::{MriError, Result};
use crate::utils::logging::LogConfig;

/// File name of the persisted model inside the output directory
pub const MODEL_FILE_NAME: &str = "brain_tumor_model.mpk";

/// File name of the training metadata record
pub const MODEL_INFO_FILE_NAME: &str = "model_info.json";

/// Default upload size limit (16 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Network layout to train
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// 4 conv blocks, same padding
    Standard,
    /// 5 conv blocks, valid padding
    #[default]
    Deep,
}

impl ModelVariant {
    pub fn classifier_config(&self) -> ClassifierConfig {
        match self {
            ModelVariant::Standard => ClassifierConfig::standard(),
            ModelVariant::Deep => ClassifierConfig::deep(),
        }
    }
}

impl std::str::FromStr for ModelVariant {
    type Err = MriError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(ModelVariant::Standard),
            "deep" => Ok(ModelVariant::Deep),
            other => Err(MriError::Config(format!("unknown model variant '{}'", other))),
        }
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Root holding `no-tumor/` and `tumor/`
    pub data_dir: PathBuf,

    /// Where the artifact and `model_info.json` are written
    pub output_dir: PathBuf,

    pub variant: ModelVariant,

    /// Explicit topology; overrides `variant` when set
    pub classifier: Option<ClassifierConfig>,

    /// Maximum number of epochs
    pub epochs: usize,

    pub batch_size: usize,

    /// Initial Adam learning rate
    pub learning_rate: f64,

    /// Fraction of each class held out for validation
    pub validation_fraction: f64,

    /// Seed for the split, shuffling and augmentation
    pub seed: u64,

    /// Seed for weight initialization; unseeded when `None`
    pub weight_seed: Option<u64>,

    /// Epochs without val accuracy improvement before stopping
    pub early_stopping_patience: usize,

    /// Epochs without val loss improvement before the LR is reduced
    pub lr_patience: usize,

    pub lr_factor: f64,

    pub min_lr: f64,

    /// Minimum val loss decrease that counts as improvement
    pub lr_min_delta: f64,

    pub augmentation: AugmentationConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/train"),
            output_dir: PathBuf::from("models"),
            variant: ModelVariant::Deep,
            classifier: None,
            epochs: 50,
            batch_size: 32,
            learning_rate: 0.001,
            validation_fraction: 0.2,
            seed: 42,
            weight_seed: None,
            early_stopping_patience: 10,
            lr_patience: 5,
            lr_factor: 0.5,
            min_lr: 1e-7,
            lr_min_delta: 1e-4,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Small, fast settings for smoke runs and tests
    pub fn debug() -> Self {
        Self {
            variant: ModelVariant::Standard,
            epochs: 2,
            batch_size: 8,
            weight_seed: Some(7),
            ..Default::default()
        }
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        self.classifier
            .clone()
            .unwrap_or_else(|| self.variant.classifier_config())
    }

    pub fn model_path(&self) -> PathBuf {
        self.output_dir.join(MODEL_FILE_NAME)
    }

    pub fn model_info_path(&self) -> PathBuf {
        self.output_dir.join(MODEL_INFO_FILE_NAME)
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(MriError::Config("epochs must be greater than 0".into()));
        }
        if self.batch_size == 0 {
            return Err(MriError::Config("batch_size must be greater than 0".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(MriError::Config("learning_rate must be positive".into()));
        }
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(MriError::Config(
                "validation_fraction must be in range (0.0, 1.0)".into(),
            ));
        }
        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            return Err(MriError::Config("lr_factor must be in range (0.0, 1.0)".into()));
        }
        if self.min_lr < 0.0 || self.min_lr > self.learning_rate {
            return Err(MriError::Config(
                "min_lr must be in range [0.0, learning_rate]".into(),
            ));
        }
        if let Some(classifier) = &self.classifier {
            classifier.validate()?;
        }
        self.augmentation.validate()
    }
}

/// Inference settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub model_path: PathBuf,

    /// Directory that holds staged uploads while they are processed
    pub upload_dir: PathBuf,

    pub max_upload_bytes: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models").join(MODEL_FILE_NAME),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(MriError::Config("max_upload_bytes must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub training: TrainingConfig,
    pub inference: InferenceConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        self.inference.validate()
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
