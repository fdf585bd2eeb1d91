//! Training loop for the tumor classifier
//!
//! One epoch is: shuffle the train split with a per-epoch seed, augment and
//! batch it, take `max(1, len / batch_size)` Adam steps on binary
//! cross-entropy, then evaluate the untouched validation split. After each
//! epoch:
//! - early stopping watches validation accuracy and remembers the best weights
//! - the learning rate is halved when validation loss plateaus
//! - the best weights so far are checkpointed atomically
//!
//! The model handed back is always the one with the best validation accuracy.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use burn::{
    data::dataloader::batcher::Batcher,
    module::{AutodiffModule, Module},
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation::sigmoid,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::scheduler::{EarlyStopping, ReduceLrOnPlateau};
use crate::dataset::augmentation::Augmenter;
use crate::dataset::batcher::{MriBatch, MriBatcher, MriItem};
use crate::dataset::loader::{load_dataset, LabelCounts, MriDataset};
use crate::dataset::split::{stratified_split, DatasetSplit, SplitConfig};
use crate::inference::engine::label_for_probability;
use crate::model::artifact::{save_artifact, write_model_info, ModelInfo, TrainingResults};
use crate::model::cnn::{ClassifierConfig, TumorClassifier};
use crate::model::config::TrainingConfig;
use crate::preprocessing::IMAGE_SIZE;
use crate::utils::error::{MriError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{EpochMetrics, Metrics, TrainingHistory};

/// Called after every completed epoch
pub type EpochCallback = Arc<dyn Fn(&EpochMetrics) + Send + Sync>;

/// Everything a finished run produces
pub struct TrainingOutcome<B: Backend> {
    /// Weights from the epoch with the best validation accuracy
    pub model: TumorClassifier<B>,
    pub classifier: ClassifierConfig,
    /// Validation metrics of `model`
    pub metrics: Metrics,
    pub history: TrainingHistory,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub best_epoch: Option<usize>,
}

/// Summary of a run that went through [`run_training`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_path: PathBuf,
    pub info_path: PathBuf,
    pub dataset_counts: LabelCounts,
    pub train_counts: LabelCounts,
    pub validation_counts: LabelCounts,
    pub info: ModelInfo,
}

/// Trains a [`TumorClassifier`] on an autodiff backend
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    classifier: ClassifierConfig,
    device: B::Device,
    checkpoint_path: Option<PathBuf>,
    cancel: Option<Arc<AtomicBool>>,
    on_epoch: Option<EpochCallback>,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        let classifier = config.classifier_config();
        Self {
            config,
            classifier,
            device,
            checkpoint_path: None,
            cancel: None,
            on_epoch: None,
        }
    }

    /// Persist the best weights to `path` whenever validation accuracy improves
    pub fn with_checkpoint_path(mut self, path: PathBuf) -> Self {
        self.checkpoint_path = Some(path);
        self
    }

    /// Flag polled between epochs; setting it aborts the run
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_epoch_callback(mut self, callback: EpochCallback) -> Self {
        self.on_epoch = Some(callback);
        self
    }

    pub fn classifier(&self) -> &ClassifierConfig {
        &self.classifier
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Train on `split.train`, select on `split.validation`
    pub fn fit(
        &self,
        dataset: &MriDataset,
        split: &DatasetSplit,
    ) -> Result<TrainingOutcome<B::InnerBackend>> {
        self.config.validate()?;
        self.classifier.validate()?;
        check_trainable(dataset, split)?;

        match self.config.weight_seed {
            Some(seed) => B::seed(seed),
            None => warn!(
                "No weight_seed set: weight initialization is unseeded, only the data split is reproducible"
            ),
        }

        let mut model: TumorClassifier<B> = self.classifier.init(&self.device);
        let mut optimizer = AdamConfig::new()
            .with_epsilon(1e-7)
            .init::<B, TumorClassifier<B>>();

        info!("Architecture: {}", self.classifier.describe());
        info!(
            "Parameters: {} | train: {} | validation: {} | batch size: {}",
            model.num_params(),
            split.train.len(),
            split.validation.len(),
            self.config.batch_size
        );

        let mut plateau = ReduceLrOnPlateau::new(
            self.config.learning_rate,
            self.config.lr_factor,
            self.config.lr_patience,
            self.config.lr_min_delta,
            self.config.min_lr,
        );
        let mut stopper = EarlyStopping::new(self.config.early_stopping_patience);
        let mut logger = TrainingLogger::new(self.config.epochs);
        let mut history = TrainingHistory::default();
        let mut best_model: Option<TumorClassifier<B::InnerBackend>> = None;
        let mut stopped_early = false;

        for epoch in 0..self.config.epochs {
            if self.is_cancelled() {
                warn!("Training cancelled before epoch {}", epoch + 1);
                return Err(MriError::Cancelled);
            }

            logger.start_epoch(epoch);
            let lr = plateau.lr();
            let (trained, train_loss, train_accuracy) =
                self.train_epoch(model, &mut optimizer, dataset, &split.train, epoch, lr)?;
            model = trained;

            let val = evaluate(
                &model.valid(),
                dataset,
                &split.validation,
                self.config.batch_size,
                &self.device,
            )?;
            ensure_finite(val.loss, "validation loss")?;

            let record = EpochMetrics {
                epoch,
                train_loss,
                train_accuracy,
                val_loss: val.loss,
                val_accuracy: val.accuracy,
                val_precision: val.precision,
                val_recall: val.recall,
                learning_rate: lr,
            };
            logger.end_epoch(train_loss, val.loss, val.accuracy, lr);
            if let Some(callback) = &self.on_epoch {
                callback(&record);
            }
            history.push(record);

            let previous_best = stopper.best();
            let decision = stopper.step(epoch, val.accuracy);
            if decision.improved {
                let snapshot = model.valid();
                if let Some(path) = &self.checkpoint_path {
                    save_artifact(&snapshot, &self.classifier, path)?;
                }
                logger.log_new_best(previous_best.unwrap_or(0.0), val.accuracy);
                best_model = Some(snapshot);
            }

            plateau.step(val.loss);

            if decision.should_stop {
                logger.log_early_stop(self.config.early_stopping_patience);
                stopped_early = true;
                break;
            }
        }

        let best = best_model
            .ok_or_else(|| MriError::TrainingFailed("no epoch completed".to_string()))?;
        let metrics = evaluate(
            &best,
            dataset,
            &split.validation,
            self.config.batch_size,
            &self.device,
        )?;
        logger.log_complete(history.len(), stopper.best().unwrap_or(0.0));
        info!("Validation (best weights): {}", metrics.summary());

        Ok(TrainingOutcome {
            model: best,
            classifier: self.classifier.clone(),
            metrics,
            epochs_run: history.len(),
            history,
            stopped_early,
            best_epoch: stopper.best_epoch(),
        })
    }

    /// One pass over the shuffled, augmented training split
    fn train_epoch<O>(
        &self,
        mut model: TumorClassifier<B>,
        optimizer: &mut O,
        dataset: &MriDataset,
        train_indices: &[usize],
        epoch: usize,
        lr: f64,
    ) -> Result<(TumorClassifier<B>, f64, f64)>
    where
        O: Optimizer<TumorClassifier<B>, B>,
    {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
        let mut order = train_indices.to_vec();
        order.shuffle(&mut rng);

        let augmenter = Augmenter::new(self.config.augmentation.clone(), IMAGE_SIZE);
        let batcher = MriBatcher::new();
        let loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&self.device);

        let batch_size = self.config.batch_size;
        let steps = (order.len() / batch_size).max(1);
        let mut total_loss = 0.0;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for step in 0..steps {
            let start = step * batch_size;
            let end = ((step + 1) * batch_size).min(order.len());
            let items: Vec<MriItem> = order[start..end]
                .iter()
                .filter_map(|&i| dataset.sample(i))
                .map(|sample| MriItem::augmented(sample, &augmenter, &mut rng))
                .collect();
            let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
            let n = labels.len();

            let batch: MriBatch<B> = batcher.batch(items, &self.device);
            let logits = model.forward(batch.images).reshape([n]);
            let loss = loss_fn.forward(logits.clone(), batch.targets);

            let loss_value: f64 = loss.clone().into_scalar().elem();
            ensure_finite(loss_value, "training loss")?;

            let probs = to_probabilities(sigmoid(logits.detach()))?;
            correct += probs
                .iter()
                .zip(labels.iter())
                .filter(|(&p, &label)| label_for_probability(p).index() == label)
                .count();
            total_loss += loss_value * n as f64;
            seen += n;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(lr, model, grads);

            debug!(
                "  Epoch {} step {}/{}: loss = {:.4}",
                epoch + 1,
                step + 1,
                steps,
                loss_value
            );
        }

        let seen = seen.max(1) as f64;
        Ok((model, total_loss / seen, correct as f64 / seen))
    }
}

/// Evaluate `model` on the samples at `indices` without augmentation
pub fn evaluate<B: Backend>(
    model: &TumorClassifier<B>,
    dataset: &MriDataset,
    indices: &[usize],
    batch_size: usize,
    device: &B::Device,
) -> Result<Metrics> {
    let loss_fn = BinaryCrossEntropyLossConfig::new()
        .with_logits(true)
        .init(device);
    let batcher = MriBatcher::new();

    let mut predictions = Vec::with_capacity(indices.len());
    let mut truth = Vec::with_capacity(indices.len());
    let mut total_loss = 0.0;

    for chunk in indices.chunks(batch_size.max(1)) {
        let items: Vec<MriItem> = chunk
            .iter()
            .filter_map(|&i| dataset.sample(i))
            .map(MriItem::from_sample)
            .collect();
        if items.is_empty() {
            continue;
        }
        let n = items.len();
        truth.extend(items.iter().map(|item| item.label));

        let batch: MriBatch<B> = batcher.batch(items, device);
        let logits = model.forward(batch.images).reshape([n]);
        let loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets)
            .into_scalar()
            .elem();
        total_loss += loss * n as f64;

        let probs = to_probabilities(sigmoid(logits))?;
        predictions.extend(probs.iter().map(|&p| label_for_probability(p).index()));
    }

    let loss = if truth.is_empty() {
        0.0
    } else {
        total_loss / truth.len() as f64
    };
    Ok(Metrics::from_predictions(&predictions, &truth, loss))
}

fn to_probabilities<B: Backend>(probs: Tensor<B, 1>) -> Result<Vec<f32>> {
    probs
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| MriError::TrainingFailed(format!("cannot read probabilities: {:?}", e)))
}

fn ensure_finite(value: f64, what: &str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MriError::TrainingFailed(format!("{} is not finite ({})", what, value)))
    }
}

/// Reject datasets and splits training cannot work with
fn check_trainable(dataset: &MriDataset, split: &DatasetSplit) -> Result<()> {
    let counts = dataset.label_counts();
    if counts.total() == 0 {
        return Err(MriError::DatasetEmpty {
            no_tumor: counts.no_tumor,
            tumor: counts.tumor,
        });
    }
    if counts.no_tumor == 0 || counts.tumor == 0 {
        return Err(MriError::Dataset(format!(
            "Both labels are required, found {}",
            counts
        )));
    }
    if split.train.is_empty() || split.validation.is_empty() {
        return Err(MriError::Dataset("Train and validation splits must be non-empty".into()));
    }
    let len = dataset.samples().len();
    if split.train.iter().chain(&split.validation).any(|&i| i >= len) {
        return Err(MriError::Dataset("Split refers to samples outside the dataset".into()));
    }
    Ok(())
}

/// Split `dataset` with the configured seed and train for `epochs`
pub fn train<B: AutodiffBackend>(
    dataset: &MriDataset,
    epochs: usize,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingOutcome<B::InnerBackend>> {
    let config = TrainingConfig {
        epochs,
        ..config.clone()
    };
    let split = stratified_split(
        dataset,
        &SplitConfig::new(config.validation_fraction, config.seed)?,
    )?;
    Trainer::<B>::new(config, device.clone()).fit(dataset, &split)
}

/// Load the dataset, train, checkpoint and write `model_info.json`
pub fn run_training<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
    cancel: Option<Arc<AtomicBool>>,
    on_epoch: Option<EpochCallback>,
) -> Result<TrainingReport> {
    config.validate()?;

    let dataset = load_dataset(&config.data_dir)?;
    let split = stratified_split(
        &dataset,
        &SplitConfig::new(config.validation_fraction, config.seed)?,
    )?;

    let model_path = config.model_path();
    let info_path = config.model_info_path();

    let mut trainer =
        Trainer::<B>::new(config.clone(), device.clone()).with_checkpoint_path(model_path.clone());
    if let Some(flag) = cancel {
        trainer = trainer.with_cancel_flag(flag);
    }
    if let Some(callback) = on_epoch {
        trainer = trainer.with_epoch_callback(callback);
    }

    let outcome = trainer.fit(&dataset, &split)?;

    let results = TrainingResults::new(
        &outcome.metrics,
        outcome.epochs_run,
        outcome.stopped_early,
        outcome.best_epoch,
    );
    let info = ModelInfo::new(
        &outcome.classifier,
        outcome.model.num_params(),
        results,
        outcome.history,
    );
    write_model_info(&info_path, &info)?;
    info!("Model saved to {}", model_path.display());
    info!("Training info saved to {}", info_path.display());

    Ok(TrainingReport {
        model_path,
        info_path,
        dataset_counts: dataset.label_counts(),
        train_counts: split.train_counts(&dataset),
        validation_counts: split.validation_counts(&dataset),
        info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{TestAutodiffBackend, TestBackend};
    use crate::dataset::loader::{Label, MriSample};
    use crate::model::artifact::{load_artifact, read_model_info};
    use crate::preprocessing::preprocess;
    use crate::test_utils::{synthetic_scan, write_dataset};

    fn tiny_config(data_dir: PathBuf, output_dir: PathBuf, epochs: usize) -> TrainingConfig {
        TrainingConfig {
            data_dir,
            output_dir,
            classifier: Some(ClassifierConfig::new(vec![4, 8], vec![16], vec![0.5])),
            epochs,
            batch_size: 16,
            weight_seed: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_split_and_fit() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("train");
        write_dataset(&data, 50, 32);

        let dataset = load_dataset(&data).unwrap();
        assert_eq!(dataset.samples().len(), 100);
        assert_eq!(dataset.label_counts(), LabelCounts { no_tumor: 50, tumor: 50 });

        let split = stratified_split(&dataset, &SplitConfig::default()).unwrap();
        assert_eq!(split.train_counts(&dataset), LabelCounts { no_tumor: 40, tumor: 40 });
        assert_eq!(
            split.validation_counts(&dataset),
            LabelCounts { no_tumor: 10, tumor: 10 }
        );

        let checkpoint = dir.path().join("models").join("brain_tumor_model.mpk");
        let config = tiny_config(data, dir.path().join("models"), 2);
        let device = Default::default();
        let outcome = Trainer::<TestAutodiffBackend>::new(config, device)
            .with_checkpoint_path(checkpoint.clone())
            .fit(&dataset, &split)
            .unwrap();

        assert_eq!(outcome.epochs_run, 2);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.metrics.total_samples, 20);
        assert!(outcome.metrics.loss.is_finite());
        assert!(outcome.best_epoch.is_some());
        assert!(checkpoint.is_file());

        // the checkpoint holds the returned weights
        let (restored, _) = load_artifact::<TestBackend>(&checkpoint, &Default::default()).unwrap();
        let sample = dataset.sample(split.validation[0]).unwrap();
        let a = outcome
            .model
            .forward_probability(sample.tensor.to_tensor::<TestBackend>(&Default::default()));
        let b = restored.forward_probability(sample.tensor.to_tensor::<TestBackend>(&Default::default()));
        let a: Vec<f32> = a.into_data().to_vec().unwrap();
        let b: Vec<f32> = b.into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_plateau_and_early_stop_roll_back_to_best() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("train");
        write_dataset(&data, 10, 24);

        let dataset = load_dataset(&data).unwrap();
        let split = stratified_split(&dataset, &SplitConfig::default()).unwrap();
        assert_eq!(split.validation.len(), 4);

        // no loss drop can beat a 10.0 margin, so every epoch after the first plateaus
        let checkpoint = dir.path().join("models").join("brain_tumor_model.mpk");
        let config = TrainingConfig {
            batch_size: 4,
            early_stopping_patience: 1,
            lr_patience: 1,
            lr_min_delta: 10.0,
            weight_seed: Some(3),
            ..tiny_config(data, dir.path().join("models"), 8)
        };
        let outcome = Trainer::<TestAutodiffBackend>::new(config, Default::default())
            .with_checkpoint_path(checkpoint.clone())
            .fit(&dataset, &split)
            .unwrap();

        // four validation samples allow at most four strict accuracy gains
        assert!(outcome.stopped_early);
        assert!(outcome.epochs_run < 8);
        assert_eq!(outcome.history.len(), outcome.epochs_run);
        assert_eq!(outcome.best_epoch, Some(outcome.epochs_run - 2));

        let epochs = &outcome.history.epochs;
        assert!((epochs[0].learning_rate - 0.001).abs() < 1e-12);
        for (k, record) in epochs.iter().enumerate().skip(1) {
            let expected = 0.001 * 0.5f64.powi(k as i32 - 1);
            assert!(
                (record.learning_rate - expected).abs() < 1e-12,
                "epoch {}: lr {} != {}",
                k,
                record.learning_rate,
                expected
            );
        }

        let best = outcome.best_epoch.unwrap();
        let max_accuracy = epochs
            .iter()
            .map(|e| e.val_accuracy)
            .fold(f64::MIN, f64::max);
        assert_eq!(epochs[best].val_accuracy, max_accuracy);
        assert!(epochs[best + 1].val_accuracy <= max_accuracy);

        // the final epoch is not the best one, so the returned model is the rolled-back checkpoint
        let (restored, _) = load_artifact::<TestBackend>(&checkpoint, &Default::default()).unwrap();
        let sample = dataset.sample(split.validation[0]).unwrap();
        let a = outcome
            .model
            .forward_probability(sample.tensor.to_tensor::<TestBackend>(&Default::default()));
        let b = restored.forward_probability(sample.tensor.to_tensor::<TestBackend>(&Default::default()));
        let a: Vec<f32> = a.into_data().to_vec().unwrap();
        let b: Vec<f32> = b.into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_run_training_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("train");
        write_dataset(&data, 10, 24);

        let config = tiny_config(data, dir.path().join("out"), 1);
        let report =
            run_training::<TestAutodiffBackend>(&config, &Default::default(), None, None).unwrap();

        assert!(report.model_path.is_file());
        assert!(report.info_path.is_file());
        assert_eq!(report.dataset_counts, LabelCounts { no_tumor: 10, tumor: 10 });
        assert_eq!(report.validation_counts, LabelCounts { no_tumor: 2, tumor: 2 });

        let info = read_model_info(&report.info_path).unwrap();
        assert_eq!(info.training_results.epochs_run, 1);
        assert_eq!(info.history.len(), 1);
        assert_eq!(info.input_shape, [128, 128, 1]);
    }

    #[test]
    fn test_cancelled_before_first_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("train");
        write_dataset(&data, 5, 24);

        let config = tiny_config(data, dir.path().join("out"), 3);
        let flag = Arc::new(AtomicBool::new(true));
        let err = run_training::<TestAutodiffBackend>(&config, &Default::default(), Some(flag), None)
            .unwrap_err();
        assert!(matches!(err, MriError::Cancelled));
        assert!(!config.model_path().exists());
    }

    #[test]
    fn test_single_class_rejected() {
        let tensor = preprocess(&synthetic_scan(16, 16, true, 0)).unwrap();
        let samples = (0..10)
            .map(|i| MriSample {
                tensor: tensor.clone(),
                label: Label::Tumor,
                path: format!("t{}.png", i).into(),
            })
            .collect();
        let dataset = MriDataset::from_samples(samples);
        let split = DatasetSplit {
            train: (0..8).collect(),
            validation: vec![8, 9],
        };
        let err = check_trainable(&dataset, &split).unwrap_err();
        assert!(matches!(err, MriError::Dataset(_)));

        let empty = MriDataset::default();
        let err = check_trainable(&empty, &split).unwrap_err();
        assert!(matches!(err, MriError::DatasetEmpty { .. }));
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite(0.5, "loss").is_ok());
        assert!(matches!(
            ensure_finite(f64::NAN, "loss"),
            Err(MriError::TrainingFailed(_))
        ));
        assert!(ensure_finite(f64::INFINITY, "loss").is_err());
    }
}
