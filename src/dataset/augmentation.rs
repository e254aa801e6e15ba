//! Data Augmentation Module
//!
//! Random horizontal flips, small rotations and small zooms applied to raw
//! training images. Validation batches and inference inputs are never
//! augmented.

use std::f32::consts::PI;

use image::{imageops, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Maximum rotation as a fraction of a full turn (0.1 = ±36°)
    pub rotation_factor: f32,
    /// Maximum relative zoom (0.1 = scale drawn from [0.9, 1.1])
    pub zoom_factor: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            rotation_factor: 0.1,
            zoom_factor: 0.1,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            rotation_factor: 0.0,
            zoom_factor: 0.0,
        }
    }

    /// Whether every transform is disabled
    pub fn is_identity(&self) -> bool {
        self.horizontal_flip_prob <= 0.0 && self.rotation_factor <= 0.0 && self.zoom_factor <= 0.0
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.horizontal_flip_prob) {
            return Err("horizontal_flip_prob must be in [0, 1]".into());
        }
        if !(0.0..=0.5).contains(&self.rotation_factor) {
            return Err("rotation_factor must be in [0, 0.5]".into());
        }
        if !(0.0..1.0).contains(&self.zoom_factor) {
            return Err("zoom_factor must be in [0, 1)".into());
        }
        Ok(())
    }
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Apply the configured augmentations to `img`
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        let flip = self.config.horizontal_flip_prob > 0.0
            && rng.gen::<f32>() < self.config.horizontal_flip_prob;

        let angle = if self.config.rotation_factor > 0.0 {
            let f = self.config.rotation_factor;
            rng.gen_range(-f..=f) * 2.0 * PI
        } else {
            0.0
        };

        let zoom = if self.config.zoom_factor > 0.0 {
            let z = self.config.zoom_factor;
            1.0 + rng.gen_range(-z..=z)
        } else {
            1.0
        };

        let flipped = if flip {
            imageops::flip_horizontal(img)
        } else {
            img.clone()
        };

        if angle.abs() < 1e-3 && (zoom - 1.0).abs() < 1e-3 {
            flipped
        } else {
            rotate_and_zoom(&flipped, angle, zoom)
        }
    }
}

/// Rotate by `angle` radians and scale by `zoom` about the image center
///
/// A zoom above 1 samples a larger source area (zoom out); below 1 zooms in.
/// Source coordinates that fall outside the image take the nearest edge pixel.
pub fn rotate_and_zoom(img: &RgbImage, angle: f32, zoom: f32) -> RgbImage {
    let (width, height) = img.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let (sin_a, cos_a) = angle.sin_cos();

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;

        let src_x = cx + zoom * (dx * cos_a + dy * sin_a);
        let src_y = cy + zoom * (-dx * sin_a + dy * cos_a);

        bilinear_sample(img, src_x, src_y)
    })
}

/// Sample a pixel using bilinear interpolation with edge clamping
fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}
