//! Burn Dataset Integration
//!
//! Implements Burn's `Dataset` trait for generated samples and the two
//! batchers used by the trainer:
//!
//! - `SignageBatcher`: no augmentation (validation, evaluation)
//! - `AugmentingBatcher`: on-the-fly augmentation (training)
//!
//! Batches carry raw [0, 255] intensities; the network rescales internally.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::SignageLabel;
use crate::utils::error::{Result, SignageError};
use crate::{IMAGE_SIZE, NUM_CHANNELS};

/// A single labeled sample
#[derive(Clone, Debug)]
pub struct SignageItem {
    pub image: RgbImage,
    pub label: SignageLabel,
}

/// Index-aligned images and labels
#[derive(Clone, Debug, Default)]
pub struct SignageDataset {
    images: Vec<RgbImage>,
    labels: Vec<SignageLabel>,
}

impl SignageDataset {
    /// Pair images with labels; both must have the same length
    pub fn new(images: Vec<RgbImage>, labels: Vec<SignageLabel>) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(SignageError::DataGeneration(format!(
                "{} images but {} labels",
                images.len(),
                labels.len()
            )));
        }
        Ok(Self { images, labels })
    }

    pub fn images(&self) -> &[RgbImage] {
        &self.images
    }

    pub fn labels(&self) -> &[SignageLabel] {
        &self.labels
    }

    /// Labels as 0/1 integers
    pub fn label_values(&self) -> Vec<u8> {
        self.labels.iter().map(|l| l.as_u8()).collect()
    }

    /// Split off the last `fraction` of samples for validation
    ///
    /// The training part keeps the first `floor(n * (1 - fraction))` samples in
    /// their original order, so the same dataset always splits the same way.
    pub fn split_validation(mut self, fraction: f64) -> Result<(Self, Self)> {
        let n = self.images.len();
        let split_at = ((n as f64) * (1.0 - fraction)).floor() as usize;

        if split_at == 0 || split_at >= n {
            return Err(SignageError::Training(format!(
                "validation_split {} leaves an empty partition for {} samples",
                fraction, n
            )));
        }

        let val_images = self.images.split_off(split_at);
        let val_labels = self.labels.split_off(split_at);
        Ok((
            self,
            Self {
                images: val_images,
                labels: val_labels,
            },
        ))
    }
}

impl Dataset<SignageItem> for SignageDataset {
    fn get(&self, index: usize) -> Option<SignageItem> {
        Some(SignageItem {
            image: self.images.get(index)?.clone(),
            label: *self.labels.get(index)?,
        })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

/// Convert an image to a CHW float vector of raw [0, 255] intensities
///
/// Images whose size differs from `image_size` are resized first.
pub fn image_to_chw(img: &RgbImage, image_size: usize) -> Vec<f32> {
    let size = image_size as u32;
    let resized;
    let img = if img.dimensions() == (size, size) {
        img
    } else {
        resized = DynamicImage::ImageRgb8(img.clone())
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();
        &resized
    };

    let plane = image_size * image_size;
    let mut data = vec![0.0f32; NUM_CHANNELS * plane];
    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * image_size + x as usize;
        for c in 0..NUM_CHANNELS {
            data[c * plane + offset] = pixel[c] as f32;
        }
    }
    data
}

/// A batch of images and binary targets
#[derive(Clone, Debug)]
pub struct SignageBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width], values in [0, 255]
    pub images: Tensor<B, 4>,
    /// Targets (0 or 1) with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
    /// Host copy of the targets, for metric bookkeeping
    pub labels: Vec<u8>,
}

fn assemble<B: Backend>(
    pixels: Vec<f32>,
    labels: Vec<u8>,
    image_size: usize,
    device: &B::Device,
) -> SignageBatch<B> {
    let batch_size = labels.len();

    let images = Tensor::<B, 4>::from_floats(
        TensorData::new(pixels, [batch_size, NUM_CHANNELS, image_size, image_size]),
        device,
    );

    let targets_data: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    let targets =
        Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

    SignageBatch {
        images,
        targets,
        labels,
    }
}

/// Batcher without augmentation
#[derive(Clone, Debug)]
pub struct SignageBatcher<B: Backend> {
    image_size: usize,
    _backend: PhantomData<B>,
}

impl<B: Backend> Default for SignageBatcher<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> SignageBatcher<B> {
    pub fn new() -> Self {
        Self::with_image_size(IMAGE_SIZE)
    }

    pub fn with_image_size(image_size: usize) -> Self {
        Self {
            image_size,
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SignageItem, SignageBatch<B>> for SignageBatcher<B> {
    fn batch(&self, items: Vec<SignageItem>, device: &B::Device) -> SignageBatch<B> {
        let pixels: Vec<f32> = items
            .par_iter()
            .flat_map_iter(|item| image_to_chw(&item.image, self.image_size))
            .collect();
        let labels = items.iter().map(|item| item.label.as_u8()).collect();

        assemble(pixels, labels, self.image_size, device)
    }
}

/// Batcher that applies on-the-fly augmentation to raw images
///
/// Every call to `batch` draws a fresh seed from `seed` and an internal
/// counter, so a run with a fixed seed sees the same augmentations.
pub struct AugmentingBatcher<B: Backend> {
    image_size: usize,
    augmenter: Augmenter,
    seed: u64,
    batches: AtomicU64,
    _backend: PhantomData<B>,
}

impl<B: Backend> Clone for AugmentingBatcher<B> {
    fn clone(&self) -> Self {
        Self {
            image_size: self.image_size,
            augmenter: self.augmenter.clone(),
            seed: self.seed,
            batches: AtomicU64::new(self.batches.load(Ordering::Relaxed)),
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> std::fmt::Debug for AugmentingBatcher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AugmentingBatcher")
            .field("image_size", &self.image_size)
            .field("config", self.augmenter.config())
            .field("seed", &self.seed)
            .finish()
    }
}

impl<B: Backend> AugmentingBatcher<B> {
    pub fn new(config: AugmentationConfig, seed: u64) -> Self {
        Self::with_image_size(config, IMAGE_SIZE, seed)
    }

    pub fn with_image_size(config: AugmentationConfig, image_size: usize, seed: u64) -> Self {
        Self {
            image_size,
            augmenter: Augmenter::new(config),
            seed,
            batches: AtomicU64::new(0),
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SignageItem, SignageBatch<B>> for AugmentingBatcher<B> {
    fn batch(&self, items: Vec<SignageItem>, device: &B::Device) -> SignageBatch<B> {
        let batch_index = self.batches.fetch_add(1, Ordering::Relaxed);
        let batch_seed = self
            .seed
            .wrapping_add(batch_index.wrapping_mul(0x9E37_79B9_7F4A_7C15));

        let pixels: Vec<f32> = items
            .par_iter()
            .enumerate()
            .flat_map_iter(|(i, item)| {
                let mut rng = ChaCha8Rng::seed_from_u64(batch_seed);
                rng.set_stream(i as u64);
                let augmented = self.augmenter.augment(&item.image, &mut rng);
                image_to_chw(&augmented, self.image_size)
            })
            .collect();
        let labels = items.iter().map(|item| item.label.as_u8()).collect();

        assemble(pixels, labels, self.image_size, device)
    }
}
