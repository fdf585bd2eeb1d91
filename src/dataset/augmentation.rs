//! Data Augmentation Module
//!
//! Random geometric transforms applied to preprocessed training images:
//! rotation, width/height shift, independent per-axis zoom and horizontal
//! flip. Sampling is bilinear and points outside the image take the value
//! of the nearest edge pixel.
//!
//! Validation images are never augmented. Augmentation always produces a new
//! buffer; the stored dataset is left untouched.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{MriError, Result};

/// Configuration for data augmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation angle in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Maximum horizontal shift as a fraction of the width
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of the height
    pub height_shift: f32,
    /// Zoom factors are drawn from `[1 - zoom_range, 1 + zoom_range]` per axis
    pub zoom_range: f32,
    /// Probability of a horizontal flip
    pub horizontal_flip_prob: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            zoom_range: 0.2,
            horizontal_flip_prob: 0.5,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            zoom_range: 0.0,
            horizontal_flip_prob: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.rotation_degrees < 0.0
            || self.width_shift < 0.0
            || self.height_shift < 0.0
            || !(0.0..1.0).contains(&self.zoom_range)
        {
            return Err(MriError::Config(format!(
                "Invalid augmentation ranges: {:?}",
                self
            )));
        }
        if !(0.0..=1.0).contains(&self.horizontal_flip_prob) {
            return Err(MriError::Config(
                "horizontal_flip_prob must be in [0.0, 1.0]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of one random transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub angle_degrees: f32,
    /// Shift in pixels along x
    pub shift_x: f32,
    /// Shift in pixels along y
    pub shift_y: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            angle_degrees: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip: false,
        }
    }
}

/// Applies random transforms to square single-channel images
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: usize,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, image_size: usize) -> Self {
        Self { config, image_size }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw one set of transform parameters
    pub fn sample_transform(&self, rng: &mut ChaCha8Rng) -> Transform {
        let c = &self.config;
        let size = self.image_size as f32;
        Transform {
            angle_degrees: rng.gen_range(-c.rotation_degrees..=c.rotation_degrees),
            shift_x: rng.gen_range(-c.width_shift..=c.width_shift) * size,
            shift_y: rng.gen_range(-c.height_shift..=c.height_shift) * size,
            zoom_x: rng.gen_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
            zoom_y: rng.gen_range(1.0 - c.zoom_range..=1.0 + c.zoom_range),
            flip: rng.gen_bool(c.horizontal_flip_prob),
        }
    }

    /// Augment a row-major `image_size x image_size` buffer
    pub fn augment(&self, image: &[f32], rng: &mut ChaCha8Rng) -> Vec<f32> {
        if self.config.is_identity() {
            return image.to_vec();
        }
        let transform = self.sample_transform(rng);
        self.apply(image, &transform)
    }

    /// Apply a fixed transform
    pub fn apply(&self, image: &[f32], t: &Transform) -> Vec<f32> {
        let n = self.image_size;
        let center = (n as f32 - 1.0) / 2.0;
        let (sin_a, cos_a) = t.angle_degrees.to_radians().sin_cos();

        let mut out = vec![0.0f32; n * n];
        for y in 0..n {
            for x in 0..n {
                let ox = if t.flip { n - 1 - x } else { x };
                let dx = ox as f32 - center;
                let dy = y as f32 - center;

                // zoom and shift, then rotate about the center
                let u = t.zoom_x * dx + t.shift_x;
                let v = t.zoom_y * dy + t.shift_y;
                let src_x = cos_a * u - sin_a * v + center;
                let src_y = sin_a * u + cos_a * v + center;

                out[y * n + x] = bilinear_nearest(image, n, src_x, src_y);
            }
        }
        out
    }
}

/// Bilinear sample with coordinates clamped to the image (nearest fill)
fn bilinear_nearest(image: &[f32], n: usize, x: f32, y: f32) -> f32 {
    let max = (n - 1) as f32;
    let x = x.clamp(0.0, max);
    let y = y.clamp(0.0, max);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(n - 1);
    let y1 = (y0 + 1).min(n - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let v00 = image[y0 * n + x0];
    let v10 = image[y0 * n + x1];
    let v01 = image[y1 * n + x0];
    let v11 = image[y1 * n + x1];

    v00 * (1.0 - fx) * (1.0 - fy) + v10 * fx * (1.0 - fy) + v01 * (1.0 - fx) * fy + v11 * fx * fy
}
