//! Synthetic signage generator
//!
//! Every sample starts as uniform RGB noise. Even indices become authorized
//! signs (a solid border band plus two "printed text" blocks at fixed offsets);
//! odd indices become unauthorized ones (randomly placed graffiti rectangles
//! and sparse colored speckles).

use image::{Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::dataset::burn_dataset::SignageDataset;
use crate::dataset::{DataSource, SignageLabel};
use crate::utils::error::{Result, SignageError};
use crate::IMAGE_SIZE;

/// Width of the border band painted on authorized samples
pub const BORDER_WIDTH: u32 = 10;

/// Text blocks on authorized samples as (x, y, width, height)
pub const TEXT_BLOCKS: [(u32, u32, u32, u32); 2] = [(40, 60, 144, 20), (60, 100, 104, 14)];

const GRAFFITI_BLOCKS: std::ops::RangeInclusive<u32> = 3..=7;
const GRAFFITI_SIZE: std::ops::RangeInclusive<u32> = 10..=60;
const NOISE_POINTS: std::ops::RangeInclusive<u32> = 50..=150;

/// Procedural data source standing in for labeled photographs
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    seed: Option<u64>,
    border_color: Rgb<u8>,
    text_color: Rgb<u8>,
}

impl Default for SyntheticGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticGenerator {
    /// Unseeded generator: every call produces fresh samples
    pub fn new() -> Self {
        Self {
            seed: None,
            border_color: Rgb([255, 255, 255]),
            text_color: Rgb([0, 0, 0]),
        }
    }

    /// Seeded generator: the same seed always yields the same samples
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::new()
        }
    }

    pub fn with_border_color(mut self, color: Rgb<u8>) -> Self {
        self.border_color = color;
        self
    }

    pub fn border_color(&self) -> Rgb<u8> {
        self.border_color
    }

    /// Label assigned to sample `index`
    pub fn label_for(index: usize) -> SignageLabel {
        if index % 2 == 0 {
            SignageLabel::Authorized
        } else {
            SignageLabel::Unauthorized
        }
    }

    /// Render sample `index` from a base seed
    ///
    /// Each index draws from its own ChaCha stream, so samples can be produced
    /// in parallel and in any order.
    pub fn sample(&self, base_seed: u64, index: usize) -> (RgbImage, SignageLabel) {
        let mut rng = ChaCha8Rng::seed_from_u64(base_seed);
        rng.set_stream(index as u64);

        let size = IMAGE_SIZE as u32;
        let mut img = RgbImage::from_fn(size, size, |_, _| Rgb(rng.gen::<[u8; 3]>()));

        let label = Self::label_for(index);
        match label {
            SignageLabel::Authorized => self.paint_authorized(&mut img),
            SignageLabel::Unauthorized => paint_unauthorized(&mut img, &mut rng),
        }

        (img, label)
    }

    fn paint_authorized(&self, img: &mut RgbImage) {
        let (width, height) = img.dimensions();
        let band = BORDER_WIDTH.min(width / 2).min(height / 2);

        fill_rect(img, 0, 0, width, band, self.border_color);
        fill_rect(img, 0, height - band, width, band, self.border_color);
        fill_rect(img, 0, 0, band, height, self.border_color);
        fill_rect(img, width - band, 0, band, height, self.border_color);

        for (x, y, w, h) in TEXT_BLOCKS {
            fill_rect(img, x, y, w, h, self.text_color);
        }
    }
}

fn paint_unauthorized(img: &mut RgbImage, rng: &mut ChaCha8Rng) {
    let (width, height) = img.dimensions();

    for _ in 0..rng.gen_range(GRAFFITI_BLOCKS) {
        let x = rng.gen_range(0..width);
        let y = rng.gen_range(0..height);
        let w = rng.gen_range(GRAFFITI_SIZE);
        let h = rng.gen_range(GRAFFITI_SIZE);
        let color = Rgb(rng.gen::<[u8; 3]>());
        fill_rect(img, x, y, w, h, color);
    }

    for _ in 0..rng.gen_range(NOISE_POINTS) {
        let x = rng.gen_range(0..width);
        let y = rng.gen_range(0..height);
        img.put_pixel(x, y, Rgb(rng.gen::<[u8; 3]>()));
    }
}

/// Fill a rectangle, clipped to the image bounds
fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    let x_end = x.saturating_add(w).min(width);
    let y_end = y.saturating_add(h).min(height);

    for py in y.min(height)..y_end {
        for px in x.min(width)..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

impl DataSource for SyntheticGenerator {
    fn generate(&self, num_samples: usize) -> Result<SignageDataset> {
        if num_samples == 0 {
            return Err(SignageError::DataGeneration(
                "num_samples must be greater than zero".to_string(),
            ));
        }

        let base_seed = self.seed.unwrap_or_else(rand::random);
        info!("Generating {} synthetic training samples...", num_samples);
        debug!("Synthetic base seed: {}", base_seed);

        let (images, labels): (Vec<_>, Vec<_>) = (0..num_samples)
            .into_par_iter()
            .map(|i| self.sample(base_seed, i))
            .unzip();

        SignageDataset::new(images, labels)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
