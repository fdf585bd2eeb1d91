//! Burn batching for MRI samples
//!
//! Stacks single-channel 128x128 images into `[N, 1, 128, 128]` float
//! tensors with `[N]` integer targets.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::dataset::augmentation::Augmenter;
use crate::dataset::loader::MriSample;
use crate::preprocessing::IMAGE_SIZE;

/// A single image ready for batching
#[derive(Clone, Debug)]
pub struct MriItem {
    /// Row-major `IMAGE_SIZE x IMAGE_SIZE` pixels in `[0, 1]`
    pub image: Vec<f32>,
    /// 0 = no tumor, 1 = tumor
    pub label: usize,
}

impl MriItem {
    pub fn from_sample(sample: &MriSample) -> Self {
        Self {
            image: sample.tensor.as_slice().to_vec(),
            label: sample.label.index(),
        }
    }

    /// Item with a freshly augmented copy of the sample's pixels
    pub fn augmented(sample: &MriSample, augmenter: &Augmenter, rng: &mut ChaCha8Rng) -> Self {
        Self {
            image: augmenter.augment(sample.tensor.as_slice(), rng),
            label: sample.label.index(),
        }
    }
}

/// A batch of images and binary targets
#[derive(Clone, Debug)]
pub struct MriBatch<B: Backend> {
    /// `[batch_size, 1, IMAGE_SIZE, IMAGE_SIZE]`
    pub images: Tensor<B, 4>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug, Default)]
pub struct MriBatcher;

impl MriBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, MriItem, MriBatch<B>> for MriBatcher {
    fn batch(&self, items: Vec<MriItem>, device: &B::Device) -> MriBatch<B> {
        let batch_size = items.len();

        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let images_data: Vec<f32> = items.into_iter().flat_map(|item| item.image).collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 1, IMAGE_SIZE, IMAGE_SIZE]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_ints(TensorData::new(labels, [batch_size]), device);

        MriBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TestBackend;

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let items = vec![
            MriItem {
                image: vec![0.25; IMAGE_SIZE * IMAGE_SIZE],
                label: 0,
            },
            MriItem {
                image: vec![0.75; IMAGE_SIZE * IMAGE_SIZE],
                label: 1,
            },
        ];

        let batch: MriBatch<TestBackend> = MriBatcher::new().batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 1, IMAGE_SIZE, IMAGE_SIZE]);
        assert_eq!(batch.targets.dims(), [2]);

        let targets: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(targets, vec![0, 1]);
    }
}
