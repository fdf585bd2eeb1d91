//! Stratified train/validation split
//!
//! Each label is shuffled independently with a seeded ChaCha8 generator and
//! `round(count * validation_fraction)` of its samples are held out, so both
//! sides keep the label ratio of the full dataset (within one sample) and a
//! given seed always yields the same membership.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::loader::{Label, LabelCounts, MriDataset};
use crate::utils::error::{MriError, Result};

/// Configuration for dataset splitting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of each label held out for validation
    pub validation_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn new(validation_fraction: f64, seed: u64) -> Result<Self> {
        let config = Self {
            validation_fraction,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(MriError::Config(format!(
                "Validation fraction must be in (0.0, 1.0), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }
}

/// Disjoint index sets into an [`MriDataset`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSplit {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

impl DatasetSplit {
    pub fn train_counts(&self, dataset: &MriDataset) -> LabelCounts {
        dataset.label_counts_of(&self.train)
    }

    pub fn validation_counts(&self, dataset: &MriDataset) -> LabelCounts {
        dataset.label_counts_of(&self.validation)
    }
}

/// Split `dataset` per label into train and validation indices
pub fn stratified_split(dataset: &MriDataset, config: &SplitConfig) -> Result<DatasetSplit> {
    config.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let mut train = Vec::new();
    let mut validation = Vec::new();

    for label in Label::ALL {
        let mut indices: Vec<usize> = dataset
            .samples()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.label == label)
            .map(|(i, _)| i)
            .collect();
        indices.shuffle(&mut rng);

        let n_val = (indices.len() as f64 * config.validation_fraction).round() as usize;
        validation.extend_from_slice(&indices[..n_val]);
        train.extend_from_slice(&indices[n_val..]);
    }

    train.sort_unstable();
    validation.sort_unstable();

    if train.is_empty() || validation.is_empty() {
        return Err(MriError::Dataset(format!(
            "Split of {} samples leaves {} for training and {} for validation",
            train.len() + validation.len(),
            train.len(),
            validation.len()
        )));
    }

    let split = DatasetSplit { train, validation };
    info!(
        "Split: train {} {}, validation {} {}",
        split.train.len(),
        split.train_counts(dataset),
        split.validation.len(),
        split.validation_counts(dataset)
    );
    Ok(split)
}
