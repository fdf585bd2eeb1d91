//! Dataset module: loading, stratified splitting, augmentation and batching

pub mod augmentation;
pub mod batcher;
pub mod loader;
pub mod split;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use batcher::{MriBatch, MriBatcher, MriItem};
pub use loader::{load_dataset, Label, LabelCounts, MriDataset, MriSample};
pub use split::{stratified_split, DatasetSplit, SplitConfig};
