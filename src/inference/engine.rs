//! Single-image inference
//!
//! The [`InferenceEngine`] loads the persisted classifier on first use and
//! keeps it behind an `Arc`. When no usable artifact exists it falls back to
//! an untrained network so callers still get a well-formed answer, and every
//! [`Prediction`] says which of the two produced it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use burn::module::Module;
use burn::tensor::backend::Backend;
use image::DynamicImage;
use serde::Serialize;
use tracing::{info, warn};

use super::upload::{StagedUpload, UploadPolicy};
use crate::dataset::loader::Label;
use crate::model::artifact::{load_artifact, read_model_info, ModelInfo};
use crate::model::cnn::{build_model, TumorClassifier};
use crate::model::config::{InferenceConfig, ModelVariant, MODEL_INFO_FILE_NAME};
use crate::preprocessing::{
    preprocess, preprocess_bytes, preprocess_path, summarize, PreprocessSummary,
    PreprocessedTensor,
};
use crate::utils::error::{MriError, Result};

/// Probabilities at or above this value are classified as tumor
pub const TUMOR_THRESHOLD: f32 = 0.5;

/// Decision rule shared by training evaluation and inference
pub fn label_for_probability(probability: f32) -> Label {
    if probability >= TUMOR_THRESHOLD {
        Label::Tumor
    } else {
        Label::NoTumor
    }
}

/// Outcome of classifying one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    #[serde(skip)]
    pub label: Label,
    /// "Tumor Detected" or "No Tumor Detected"
    pub prediction: String,
    /// Tumor probability rounded to 4 decimals
    pub confidence: f32,
    pub threshold: f32,
    /// False when the answer came from the untrained fallback network
    pub model_trained: bool,
}

impl Prediction {
    pub fn from_probability(probability: f32, model_trained: bool) -> Self {
        let label = label_for_probability(probability);
        let prediction = match label {
            Label::Tumor => "Tumor Detected",
            Label::NoTumor => "No Tumor Detected",
        };
        Self {
            label,
            prediction: prediction.to_string(),
            confidence: ((probability as f64 * 10_000.0).round() / 10_000.0) as f32,
            threshold: TUMOR_THRESHOLD,
            model_trained,
        }
    }

    pub fn is_tumor(&self) -> bool {
        self.label == Label::Tumor
    }
}

/// Classify a preprocessed image with `model`, assumed to carry trained weights
///
/// Use [`LoadedModel::predict`] to get the `model_trained` flag right for the
/// fallback network.
pub fn predict<B: Backend>(
    tensor: &PreprocessedTensor,
    model: &TumorClassifier<B>,
) -> Result<Prediction> {
    let device = model.devices().into_iter().next().unwrap_or_default();
    let probability = model
        .forward_probability(tensor.to_tensor::<B>(&device))
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| MriError::Model(format!("cannot read model output: {:?}", e)))?
        .first()
        .copied()
        .ok_or_else(|| MriError::Model("model produced no output".to_string()))?;

    if !probability.is_finite() {
        return Err(MriError::Model(format!(
            "model produced a non-finite probability ({})",
            probability
        )));
    }
    Ok(Prediction::from_probability(probability, true))
}

/// The classifier an engine serves
#[derive(Debug)]
pub enum LoadedModel<B: Backend> {
    /// Restored from a training artifact
    Trained {
        model: TumorClassifier<B>,
        info: Option<ModelInfo>,
    },
    /// Randomly initialized stand-in
    Untrained {
        model: TumorClassifier<B>,
        reason: String,
    },
}

impl<B: Backend> LoadedModel<B> {
    /// Restore the artifact at `path`, or build the fallback if that fails
    pub fn load(path: &Path, device: &B::Device) -> Self {
        match load_artifact::<B>(path, device) {
            Ok((model, config)) => {
                let info_path = path
                    .parent()
                    .map(|dir| dir.join(MODEL_INFO_FILE_NAME))
                    .unwrap_or_else(|| PathBuf::from(MODEL_INFO_FILE_NAME));
                let info = read_model_info(&info_path).ok();
                info!(
                    "Loaded trained model from {} ({})",
                    path.display(),
                    config.describe()
                );
                LoadedModel::Trained { model, info }
            }
            Err(e) => {
                warn!(
                    "No usable model at {} ({}); serving an UNTRAINED network, predictions are not meaningful",
                    path.display(),
                    e
                );
                let config = ModelVariant::default().classifier_config();
                LoadedModel::Untrained {
                    model: build_model(&config, device),
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn model(&self) -> &TumorClassifier<B> {
        match self {
            LoadedModel::Trained { model, .. } | LoadedModel::Untrained { model, .. } => model,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, LoadedModel::Trained { .. })
    }

    pub fn info(&self) -> Option<&ModelInfo> {
        match self {
            LoadedModel::Trained { info, .. } => info.as_ref(),
            LoadedModel::Untrained { .. } => None,
        }
    }

    pub fn predict(&self, tensor: &PreprocessedTensor) -> Result<Prediction> {
        let mut prediction = predict(tensor, self.model())?;
        prediction.model_trained = self.is_trained();
        Ok(prediction)
    }
}

/// Lazily loaded, shareable classifier handle
pub struct InferenceEngine<B: Backend> {
    artifact_path: PathBuf,
    device: B::Device,
    policy: UploadPolicy,
    loaded: OnceLock<Arc<LoadedModel<B>>>,
}

impl<B: Backend> InferenceEngine<B> {
    pub fn new(artifact_path: impl Into<PathBuf>, device: B::Device) -> Self {
        Self {
            artifact_path: artifact_path.into(),
            device,
            policy: UploadPolicy::default(),
            loaded: OnceLock::new(),
        }
    }

    pub fn from_config(config: &InferenceConfig, device: B::Device) -> Self {
        Self::new(config.model_path.clone(), device).with_upload_policy(UploadPolicy::from_config(config))
    }

    /// Engine serving `model` directly, without touching the filesystem
    pub fn with_model(model: LoadedModel<B>, device: B::Device) -> Self {
        Self {
            loaded: OnceLock::from(Arc::new(model)),
            ..Self::new(PathBuf::new(), device)
        }
    }

    pub fn with_upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// The served model, loading it on first call
    pub fn model(&self) -> Arc<LoadedModel<B>> {
        Arc::clone(
            self.loaded
                .get_or_init(|| Arc::new(LoadedModel::load(&self.artifact_path, &self.device))),
        )
    }

    /// Forget the loaded model; the next call reads the artifact again
    pub fn reload(&mut self) {
        if self.loaded.take().is_some() {
            info!("Model cache cleared, reloading from {}", self.artifact_path.display());
        }
    }

    pub fn predict_tensor(&self, tensor: &PreprocessedTensor) -> Result<Prediction> {
        self.model().predict(tensor)
    }

    pub fn predict_image(&self, image: &DynamicImage) -> Result<Prediction> {
        self.predict_tensor(&preprocess(image)?)
    }

    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        self.predict_tensor(&preprocess_bytes(bytes)?)
    }

    pub fn predict_path(&self, path: impl AsRef<Path>) -> Result<Prediction> {
        self.predict_tensor(&preprocess_path(path)?)
    }

    /// Validate, stage in `upload_dir`, classify; the staged file is always removed
    pub fn predict_upload(&self, upload_dir: &Path, bytes: &[u8]) -> Result<Prediction> {
        let format = self.policy.validate(bytes)?;
        let staged = StagedUpload::write(upload_dir, bytes, format)?;
        let tensor = preprocess_path(staged.path())?;
        self.predict_tensor(&tensor)
    }

    /// Validate, stage in `upload_dir` and describe the preprocessed tensor
    pub fn preprocess_upload(&self, upload_dir: &Path, bytes: &[u8]) -> Result<PreprocessSummary> {
        let format = self.policy.validate(bytes)?;
        let staged = StagedUpload::write(upload_dir, bytes, format)?;
        let tensor = preprocess_path(staged.path())?;
        Ok(summarize(&tensor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TestBackend;
    use crate::model::artifact::save_artifact;
    use crate::model::cnn::ClassifierConfig;
    use crate::test_utils::{encode, synthetic_scan};
    use image::ImageFormat;

    fn tiny_config() -> ClassifierConfig {
        ClassifierConfig::new(vec![4], vec![8], vec![0.5])
    }

    fn tiny_engine(trained: bool) -> InferenceEngine<TestBackend> {
        let device = Default::default();
        let model = build_model::<TestBackend>(&tiny_config(), &device);
        let loaded = if trained {
            LoadedModel::Trained { model, info: None }
        } else {
            LoadedModel::Untrained {
                model,
                reason: "test".to_string(),
            }
        };
        InferenceEngine::with_model(loaded, device)
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let at = Prediction::from_probability(0.5, true);
        assert_eq!(at.prediction, "Tumor Detected");
        assert!(at.is_tumor());

        let below = Prediction::from_probability(0.49999, true);
        assert_eq!(below.prediction, "No Tumor Detected");
        assert_eq!(below.label, Label::NoTumor);
        assert_eq!(below.confidence, 0.5);
    }

    #[test]
    fn test_confidence_rounding() {
        let p = Prediction::from_probability(0.123456, true);
        assert!((p.confidence - 0.1235).abs() < 1e-7);
        assert_eq!(p.threshold, 0.5);
    }

    #[test]
    fn test_prediction_json_fields() {
        let json = serde_json::to_value(Prediction::from_probability(0.9, false)).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["confidence", "model_trained", "prediction", "threshold"]);
        assert_eq!(json["model_trained"], false);
    }

    #[test]
    fn test_missing_artifact_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let engine =
            InferenceEngine::<TestBackend>::new(dir.path().join("missing.mpk"), Default::default());

        let loaded = engine.model();
        assert!(!loaded.is_trained());
        let LoadedModel::Untrained { reason, .. } = loaded.as_ref() else {
            panic!("expected the untrained fallback");
        };
        assert!(reason.contains("not found"));

        let prediction = engine.predict_image(&synthetic_scan(64, 64, true, 2)).unwrap();
        assert!(!prediction.model_trained);
        assert!((0.0..=1.0).contains(&prediction.confidence));
    }

    #[test]
    fn test_foreign_geometry_artifact_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain_tumor_model.mpk");
        let config = tiny_config().with_input_size(16);
        let model = build_model::<TestBackend>(&config, &Default::default());
        save_artifact(&model, &config, &path).unwrap();

        let engine = InferenceEngine::<TestBackend>::new(&path, Default::default());
        let loaded = engine.model();
        let LoadedModel::Untrained { reason, .. } = loaded.as_ref() else {
            panic!("an artifact for 16x16 inputs must not be served");
        };
        assert!(reason.contains("unusable architecture"));

        let prediction = engine.predict_image(&synthetic_scan(48, 48, true, 3)).unwrap();
        assert!(!prediction.model_trained);
    }

    #[test]
    fn test_trained_artifact_is_loaded_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain_tumor_model.mpk");
        let device = Default::default();

        let mut engine = InferenceEngine::<TestBackend>::new(&path, device);
        assert!(!engine.model().is_trained());

        let model = build_model::<TestBackend>(&tiny_config(), &Default::default());
        save_artifact(&model, &tiny_config(), &path).unwrap();

        // memoized until reload
        assert!(!engine.model().is_trained());
        engine.reload();
        let loaded = engine.model();
        assert!(loaded.is_trained());
        assert!(loaded.info().is_none());

        let scan = synthetic_scan(40, 40, false, 9);
        let expected = predict(&preprocess(&scan).unwrap(), &model).unwrap();
        let actual = engine.predict_image(&scan).unwrap();
        assert_eq!(actual, expected);
        assert!(actual.model_trained);
    }

    #[test]
    fn test_predict_bytes_matches_image() {
        let engine = tiny_engine(true);
        let scan = synthetic_scan(50, 30, true, 4);
        let bytes = encode(&scan, ImageFormat::Png);
        assert_eq!(
            engine.predict_bytes(&bytes).unwrap(),
            engine.predict_image(&scan).unwrap()
        );
        assert!(matches!(
            engine.predict_bytes(b"garbage"),
            Err(MriError::Decode(_))
        ));
    }

    #[test]
    fn test_upload_calls_leave_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let engine = tiny_engine(false);

        let bytes = encode(&synthetic_scan(32, 32, true, 5), ImageFormat::Jpeg);
        let prediction = engine.predict_upload(&uploads, &bytes).unwrap();
        assert!(!prediction.model_trained);
        assert_eq!(staged_files(&uploads), 0);

        let summary = engine.preprocess_upload(&uploads, &bytes).unwrap();
        assert_eq!(summary.shape, vec![1, 128, 128, 1]);
        assert_eq!(staged_files(&uploads), 0);

        // valid PNG signature, truncated body: staged, fails to decode, still removed
        let mut broken = encode(&synthetic_scan(32, 32, false, 6), ImageFormat::Png);
        broken.truncate(40);
        assert!(engine.predict_upload(&uploads, &broken).is_err());
        assert_eq!(staged_files(&uploads), 0);

        assert!(matches!(
            engine.predict_upload(&uploads, &[]),
            Err(MriError::EmptyUpload)
        ));
        assert_eq!(staged_files(&uploads), 0);
    }
}
