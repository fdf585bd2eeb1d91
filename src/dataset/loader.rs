//! MRI Dataset Loader
//!
//! Loads a labelled directory tree into memory, running every image through
//! the preprocessing pipeline:
//!
//! ```text
//! root/
//! ├── no-tumor/   (or no_tumor/)  -> label 0
//! │   ├── scan1.png
//! │   └── ...
//! └── tumor/                      -> label 1
//!     └── ...
//! ```

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::preprocessing::{preprocess_path, PreprocessedTensor};
use crate::utils::error::{MriError, Result};

/// Accepted image file extensions (lowercase)
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tiff", "tif", "bmp"];

/// Binary ground truth label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    NoTumor = 0,
    Tumor = 1,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::NoTumor, Label::Tumor];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Label::NoTumor),
            1 => Some(Label::Tumor),
            _ => None,
        }
    }

    /// Directory names that hold images of this label
    pub fn dir_names(&self) -> &'static [&'static str] {
        match self {
            Label::NoTumor => &["no-tumor", "no_tumor"],
            Label::Tumor => &["tumor"],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Label::NoTumor => "no_tumor",
            Label::Tumor => "tumor",
        }
    }
}

/// A preprocessed image with its label
#[derive(Debug, Clone)]
pub struct MriSample {
    pub tensor: PreprocessedTensor,
    pub label: Label,
    pub path: PathBuf,
}

/// Number of samples per label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounts {
    pub no_tumor: usize,
    pub tumor: usize,
}

impl LabelCounts {
    pub fn total(&self) -> usize {
        self.no_tumor + self.tumor
    }

    pub fn get(&self, label: Label) -> usize {
        match label {
            Label::NoTumor => self.no_tumor,
            Label::Tumor => self.tumor,
        }
    }

    pub fn add(&mut self, label: Label) {
        match label {
            Label::NoTumor => self.no_tumor += 1,
            Label::Tumor => self.tumor += 1,
        }
    }

    pub fn from_labels(labels: impl IntoIterator<Item = Label>) -> Self {
        let mut counts = Self::default();
        for label in labels {
            counts.add(label);
        }
        counts
    }
}

impl std::fmt::Display for LabelCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{0: {}, 1: {}}}", self.no_tumor, self.tumor)
    }
}

/// In-memory labelled dataset
#[derive(Debug, Clone, Default)]
pub struct MriDataset {
    samples: Vec<MriSample>,
}

impl MriDataset {
    pub fn from_samples(samples: Vec<MriSample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[MriSample] {
        &self.samples
    }

    pub fn sample(&self, index: usize) -> Option<&MriSample> {
        self.samples.get(index)
    }

    pub fn label_counts(&self) -> LabelCounts {
        LabelCounts::from_labels(self.samples.iter().map(|s| s.label))
    }

    /// Label counts of a subset given by indices
    pub fn label_counts_of(&self, indices: &[usize]) -> LabelCounts {
        LabelCounts::from_labels(indices.iter().filter_map(|&i| self.samples.get(i)).map(|s| s.label))
    }
}

impl Dataset<MriSample> for MriDataset {
    fn get(&self, index: usize) -> Option<MriSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// List every image under the label directories, sorted by path per label
pub fn scan_dataset(root: &Path) -> Result<Vec<(PathBuf, Label)>> {
    if !root.is_dir() {
        return Err(MriError::Dataset(format!(
            "Dataset directory does not exist: {}",
            root.display()
        )));
    }

    let mut entries = Vec::new();
    for label in Label::ALL {
        let mut found = Vec::new();
        for dir_name in label.dir_names() {
            let class_dir = root.join(dir_name);
            if !class_dir.is_dir() {
                continue;
            }
            found.extend(
                WalkDir::new(&class_dir)
                    .min_depth(1)
                    .max_depth(1)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
                    .filter(|p| is_image_file(p)),
            );
        }
        found.sort();
        debug!("Label '{}': {} files", label.name(), found.len());
        if found.is_empty() {
            warn!(
                "No images for label '{}' under {} (expected one of {:?})",
                label.name(),
                root.display(),
                label.dir_names()
            );
        }
        entries.extend(found.into_iter().map(|p| (p, label)));
    }
    Ok(entries)
}

/// Load and preprocess every image under `root`.
///
/// Unreadable images are skipped with a warning. An empty result is an
/// error carrying the per-label counts.
pub fn load_dataset(root: &Path) -> Result<MriDataset> {
    info!("Loading MRI dataset from: {}", root.display());
    let entries = scan_dataset(root)?;

    let pb = ProgressBar::new(entries.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let samples: Vec<MriSample> = entries
        .par_iter()
        .filter_map(|(path, label)| {
            let result = match preprocess_path(path) {
                Ok(tensor) => Some(MriSample {
                    tensor,
                    label: *label,
                    path: path.clone(),
                }),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    None
                }
            };
            pb.inc(1);
            result
        })
        .collect();
    pb.finish_and_clear();

    let dataset = MriDataset::from_samples(samples);
    let counts = dataset.label_counts();
    let skipped = entries.len() - dataset.len();
    if skipped > 0 {
        warn!("Skipped {} unreadable images", skipped);
    }

    if counts.total() == 0 {
        return Err(MriError::DatasetEmpty {
            no_tumor: counts.no_tumor,
            tumor: counts.tumor,
        });
    }

    info!(
        "Loaded {} images: {} no-tumor, {} tumor",
        counts.total(),
        counts.no_tumor,
        counts.tumor
    );
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{synthetic_scan, write_dataset};

    #[test]
    fn test_label_indices() {
        assert_eq!(Label::NoTumor.index(), 0);
        assert_eq!(Label::Tumor.index(), 1);
        assert_eq!(Label::from_index(1), Some(Label::Tumor));
        assert_eq!(Label::from_index(2), None);
    }

    #[test]
    fn test_image_extension_filter() {
        assert!(is_image_file(Path::new("a/scan.PNG")));
        assert!(is_image_file(Path::new("a/scan.tif")));
        assert!(is_image_file(Path::new("a/scan.jpeg")));
        assert!(!is_image_file(Path::new("a/notes.txt")));
        assert!(!is_image_file(Path::new("a/noext")));
    }

    #[test]
    fn test_load_dataset_counts() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), 4, 40);
        std::fs::write(dir.path().join("tumor").join("readme.txt"), "ignored").unwrap();

        let dataset = load_dataset(dir.path()).unwrap();
        assert_eq!(dataset.len(), 8);
        assert_eq!(dataset.label_counts(), LabelCounts { no_tumor: 4, tumor: 4 });
        // sorted-path order within each label, no-tumor first
        assert_eq!(dataset.samples()[0].label, Label::NoTumor);
        assert_eq!(dataset.samples()[7].label, Label::Tumor);
    }

    #[test]
    fn test_underscore_alias_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let no_tumor = dir.path().join("no_tumor");
        let tumor = dir.path().join("tumor");
        std::fs::create_dir_all(&no_tumor).unwrap();
        std::fs::create_dir_all(&tumor).unwrap();

        synthetic_scan(32, 32, false, 1)
            .save(no_tumor.join("a.png"))
            .unwrap();
        synthetic_scan(32, 32, true, 2).save(tumor.join("b.bmp")).unwrap();
        std::fs::write(tumor.join("broken.jpg"), b"garbage").unwrap();

        let dataset = load_dataset(dir.path()).unwrap();
        assert_eq!(dataset.label_counts(), LabelCounts { no_tumor: 1, tumor: 1 });
    }

    #[test]
    fn test_empty_dataset_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("no-tumor")).unwrap();
        std::fs::create_dir_all(dir.path().join("tumor")).unwrap();

        match load_dataset(dir.path()) {
            Err(MriError::DatasetEmpty { no_tumor, tumor }) => {
                assert_eq!((no_tumor, tumor), (0, 0));
            }
            other => panic!("expected DatasetEmpty, got {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_dataset(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, MriError::Dataset(_)));
    }
}
