//! Model artifact persistence
//!
//! A trained model is stored as a single Burn record file holding both the
//! topology (the serialized [`ClassifierConfig`]) and the weights, so it can
//! be restored without any other input. Training metadata lives next to it
//! in `model_info.json`.
//!
//! Writes are atomic: the record goes to a uniquely named file in the same
//! directory and is renamed over the target only once fully written.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder},
    tensor::backend::Backend,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::cnn::{ClassifierConfig, TumorClassifier, TumorClassifierRecord};
use crate::preprocessing::{PipelineDescription, IMAGE_SIZE};
use crate::utils::error::{MriError, Result};
use crate::utils::metrics::{Metrics, TrainingHistory};

/// Extension the recorder gives every artifact
pub const ARTIFACT_EXTENSION: &str = "mpk";

type ArtifactRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Topology plus weights
#[derive(Record)]
pub struct ArtifactRecord<B: Backend> {
    /// `ClassifierConfig` as JSON
    pub architecture: String,
    pub model: TumorClassifierRecord<B>,
}

/// Normalize a user-supplied path to the file the recorder actually uses
pub fn artifact_path(path: &Path) -> PathBuf {
    path.with_extension(ARTIFACT_EXTENSION)
}

/// Persist a model atomically
pub fn save_artifact<B: Backend>(
    model: &TumorClassifier<B>,
    config: &ClassifierConfig,
    path: &Path,
) -> Result<()> {
    let architecture = serde_json::to_string(config)?;
    let record = ArtifactRecord {
        architecture,
        model: model.clone().into_record(),
    };

    write_atomically(path, |temp_stem| {
        ArtifactRecorder::new()
            .record(record, temp_stem.to_path_buf())
            .map_err(|e| MriError::Checkpoint(e.to_string()))?;
        Ok(temp_stem.with_extension(ARTIFACT_EXTENSION))
    })
}

/// Restore a model and its topology from an artifact file
pub fn load_artifact<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(TumorClassifier<B>, ClassifierConfig)> {
    let file = artifact_path(path);
    if !file.is_file() {
        return Err(MriError::ArtifactMissing(file));
    }

    let record: ArtifactRecord<B> = ArtifactRecorder::new()
        .load(file.clone(), device)
        .map_err(|e| MriError::Model(format!("{}: {}", file.display(), e)))?;

    let config: ClassifierConfig = serde_json::from_str(&record.architecture)
        .map_err(|e| MriError::Model(format!("invalid architecture record: {}", e)))?;
    config
        .validate()
        .map_err(|e| MriError::Model(format!("{}: unusable architecture: {}", file.display(), e)))?;

    let model = config.init::<B>(device).load_record(record.model);
    Ok((model, config))
}

/// Write through a temp file in the target's directory, then rename.
///
/// `write` receives an extension-less temp path and returns the file it
/// actually produced. On any failure the temp file is removed and the
/// target is left untouched.
pub(crate) fn write_atomically<F>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<PathBuf>,
{
    let target = artifact_path(target);
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| MriError::Checkpoint(format!("{}: {}", dir.display(), e)))?;

    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().replace('.', "_"))
        .unwrap_or_else(|| "artifact".to_string());
    let temp_stem = dir.join(format!("{}_tmp_{}", stem, uuid::Uuid::new_v4().simple()));

    let cleanup = |stem: &Path| {
        let _ = std::fs::remove_file(stem);
        let _ = std::fs::remove_file(stem.with_extension(ARTIFACT_EXTENSION));
    };

    let written = match write(&temp_stem) {
        Ok(p) => p,
        Err(e) => {
            cleanup(&temp_stem);
            return Err(match e {
                MriError::Checkpoint(_) => e,
                other => MriError::Checkpoint(other.to_string()),
            });
        }
    };

    if let Err(e) = std::fs::rename(&written, &target) {
        cleanup(&temp_stem);
        return Err(MriError::Checkpoint(format!(
            "rename to {} failed: {}",
            target.display(),
            e
        )));
    }
    Ok(())
}

/// Final evaluation numbers stored in `model_info.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResults {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub loss: f64,
    /// `[[tn, fp], [fn, tp]]`
    pub confusion_matrix: [[usize; 2]; 2],
    pub epochs_run: usize,
    pub stopped_early: bool,
    /// Zero-based epoch the returned weights come from
    pub best_epoch: Option<usize>,
}

impl TrainingResults {
    pub fn new(
        metrics: &Metrics,
        epochs_run: usize,
        stopped_early: bool,
        best_epoch: Option<usize>,
    ) -> Self {
        Self {
            accuracy: metrics.accuracy,
            precision: metrics.precision,
            recall: metrics.recall,
            f1: metrics.f1,
            loss: metrics.loss,
            confusion_matrix: metrics.confusion_matrix.as_rows(),
            epochs_run,
            stopped_early,
            best_epoch,
        }
    }
}

/// Metadata record written next to a trained model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Human readable topology
    pub architecture: String,
    pub classifier: ClassifierConfig,
    /// `(height, width, channels)`
    pub input_shape: [usize; 3],
    pub total_parameters: usize,
    pub training_results: TrainingResults,
    pub preprocessing: PipelineDescription,
    pub history: TrainingHistory,
    pub trained_at: DateTime<Utc>,
}

impl ModelInfo {
    pub fn new(
        classifier: &ClassifierConfig,
        total_parameters: usize,
        training_results: TrainingResults,
        history: TrainingHistory,
    ) -> Self {
        Self {
            architecture: classifier.describe(),
            classifier: classifier.clone(),
            input_shape: [IMAGE_SIZE, IMAGE_SIZE, 1],
            total_parameters,
            training_results,
            preprocessing: PipelineDescription::current(),
            history,
            trained_at: Utc::now(),
        }
    }
}

pub fn write_model_info(path: &Path, info: &ModelInfo) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(info)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn read_model_info(path: &Path) -> Result<ModelInfo> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TestBackend;
    use burn::tensor::{Distribution, Tensor};

    fn tiny_config() -> ClassifierConfig {
        ClassifierConfig::new(vec![4, 8], vec![16], vec![0.5])
    }

    fn probabilities(model: &TumorClassifier<TestBackend>, input: Tensor<TestBackend, 4>) -> Vec<f32> {
        model
            .forward_probability(input)
            .into_data()
            .to_vec()
            .unwrap()
    }

    #[test]
    fn test_artifact_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain_tumor_model.mpk");
        let device = Default::default();
        let config = tiny_config();
        let model = config.init::<TestBackend>(&device);

        save_artifact(&model, &config, &path).unwrap();
        assert!(path.is_file());

        let (restored, restored_config) = load_artifact::<TestBackend>(&path, &device).unwrap();
        assert_eq!(restored_config, config);

        let input =
            Tensor::<TestBackend, 4>::random([3, 1, 128, 128], Distribution::Default, &device);
        assert_eq!(
            probabilities(&model, input.clone()),
            probabilities(&restored, input)
        );
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let err = load_artifact::<TestBackend>(&dir.path().join("nope.mpk"), &device).unwrap_err();
        assert!(matches!(err, MriError::ArtifactMissing(_)));
    }

    #[test]
    fn test_foreign_input_geometry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain_tumor_model.mpk");
        let device = Default::default();
        let config = tiny_config().with_input_size(16);
        let model = config.init::<TestBackend>(&device);
        save_artifact(&model, &config, &path).unwrap();

        let err = load_artifact::<TestBackend>(&path, &device).unwrap_err();
        assert!(matches!(err, MriError::Model(_)), "got {:?}", err);
    }

    #[test]
    fn test_corrupt_artifact_is_model_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mpk");
        std::fs::write(&path, b"not a record").unwrap();
        let device = Default::default();
        let err = load_artifact::<TestBackend>(&path, &device).unwrap_err();
        assert!(matches!(err, MriError::Model(_)));
    }

    #[test]
    fn test_failed_write_keeps_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain_tumor_model.mpk");
        std::fs::write(&path, b"previous").unwrap();

        let result = write_atomically(&path, |temp| {
            let partial = temp.with_extension(ARTIFACT_EXTENSION);
            std::fs::write(&partial, b"half written")?;
            Err(MriError::Checkpoint("disk full".into()))
        });

        assert!(matches!(result, Err(MriError::Checkpoint(_))));
        assert_eq!(std::fs::read(&path).unwrap(), b"previous");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_model_info_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model_info.json");
        let metrics = Metrics::from_predictions(&[0, 1, 1], &[0, 1, 0], 0.3);
        let info = ModelInfo::new(
            &ClassifierConfig::standard(),
            1234,
            TrainingResults::new(&metrics, 5, true, Some(2)),
            TrainingHistory::default(),
        );

        write_model_info(&path, &info).unwrap();
        let loaded = read_model_info(&path).unwrap();
        assert_eq!(loaded.total_parameters, 1234);
        assert_eq!(loaded.input_shape, [128, 128, 1]);
        assert_eq!(loaded.training_results.confusion_matrix, [[1, 1], [0, 1]]);
        assert!(loaded.preprocessing.grayscale);
    }
}
