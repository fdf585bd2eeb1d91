//! Image preprocessing pipeline
//!
//! Converts an arbitrary decoded image into the fixed network input:
//!
//! 1. grayscale (BT.601 luma)
//! 2. area resize to 128x128
//! 3. 5x5 Gaussian blur
//! 4. CLAHE (clip 2.0, 8x8 tiles)
//! 5. scale to `[0, 1]`
//! 6. reshape to `(1, 128, 128, 1)`
//!
//! Training and inference both call [`preprocess`], so a given image always
//! produces bit-identical tensors.

pub mod filters;

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use serde::{Deserialize, Serialize};

use crate::utils::error::{MriError, Result};

/// Side length of the square network input
pub const IMAGE_SIZE: usize = 128;

/// CLAHE clip limit
pub const CLAHE_CLIP_LIMIT: f32 = 2.0;

/// CLAHE tile grid (x, y)
pub const CLAHE_GRID: (u32, u32) = (8, 8);

/// NHWC shape of every preprocessed tensor
pub const TENSOR_SHAPE: [usize; 4] = [1, IMAGE_SIZE, IMAGE_SIZE, 1];

/// A preprocessed image, NHWC `(1, 128, 128, 1)` with values in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor {
    data: Vec<f32>,
}

impl PreprocessedTensor {
    fn from_vec(data: Vec<f32>) -> Result<Self> {
        let expected: usize = TENSOR_SHAPE.iter().product();
        if data.len() != expected {
            return Err(MriError::Dimension {
                expected: TENSOR_SHAPE.to_vec(),
                actual: vec![data.len()],
            });
        }
        Ok(Self { data })
    }

    pub fn shape(&self) -> [usize; 4] {
        TENSOR_SHAPE
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Network input `[1, 1, 128, 128]`; same memory order as NHWC for one channel
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        Tensor::from_data(
            TensorData::new(self.data.clone(), [1, 1, IMAGE_SIZE, IMAGE_SIZE]),
            device,
        )
    }
}

/// Shape and value range of a preprocessed tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessSummary {
    pub shape: Vec<usize>,
    pub min_val: f32,
    pub max_val: f32,
}

pub fn summarize(tensor: &PreprocessedTensor) -> PreprocessSummary {
    let (min_val, max_val) = tensor
        .as_slice()
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    PreprocessSummary {
        shape: tensor.shape().to_vec(),
        min_val,
        max_val,
    }
}

/// Human readable description stored alongside trained models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDescription {
    pub resize: String,
    pub grayscale: bool,
    pub gaussian_blur: String,
    pub clahe: String,
    pub normalization: String,
}

impl PipelineDescription {
    pub fn current() -> Self {
        Self {
            resize: format!("{}x{}", IMAGE_SIZE, IMAGE_SIZE),
            grayscale: true,
            gaussian_blur: "5x5".to_string(),
            clahe: format!(
                "clipLimit={:.1}, tileGridSize=({}, {})",
                CLAHE_CLIP_LIMIT, CLAHE_GRID.0, CLAHE_GRID.1
            ),
            normalization: "0-1".to_string(),
        }
    }
}

/// Run the full pipeline on a decoded image
pub fn preprocess(image: &image::DynamicImage) -> Result<PreprocessedTensor> {
    if image.width() == 0 || image.height() == 0 {
        return Err(MriError::Decode("image has zero width or height".to_string()));
    }

    let gray = filters::to_grayscale(image);
    let resized = filters::resize_area(&gray, IMAGE_SIZE as u32, IMAGE_SIZE as u32);
    let blurred = filters::gaussian_blur_5x5(&resized);
    let equalized = filters::clahe(&blurred, CLAHE_CLIP_LIMIT, CLAHE_GRID);

    let data: Vec<f32> = equalized
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect();

    PreprocessedTensor::from_vec(data)
}

/// Decode raw bytes, then preprocess
pub fn preprocess_bytes(bytes: &[u8]) -> Result<PreprocessedTensor> {
    let image =
        image::load_from_memory(bytes).map_err(|e| MriError::Decode(e.to_string()))?;
    preprocess(&image)
}

/// Read and decode an image file, then preprocess
pub fn preprocess_path(path: impl AsRef<Path>) -> Result<PreprocessedTensor> {
    let path = path.as_ref();
    let image = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| MriError::Decode(format!("{}: {}", path.display(), e)))?;
    preprocess(&image)
}
