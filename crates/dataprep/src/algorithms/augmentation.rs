//! Stochastic joint transforms for image/mask pairs.
//!
//! Each transform sits behind its own [`Gate`] and draws its parameters from
//! the per-item generator it is handed, so the same seed always yields the same
//! output. Geometric transforms apply one set of sampled parameters to both the
//! image and the mask.

use std::f32::consts::PI;

use image::{imageops::FilterType, DynamicImage, Luma, LumaA, Rgb, Rgba};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::{rngs::StdRng, Rng};
use tracing::trace;

use crate::{
    algorithms::photometric::{Brightness, ColorJitter, Contrast, Saturation},
    config::AugmentationConfig,
    error::{DataPrepError, Result},
    traits::JointTransform,
    types::{CropBox, ImageSize, Sample},
};

/// Fires with probability `1 / denominator`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    denominator: u32,
}

impl Gate {
    pub fn new(denominator: u32) -> Self {
        Self {
            denominator: denominator.max(1),
        }
    }

    pub fn always() -> Self {
        Self::new(1)
    }

    pub fn fires(&self, rng: &mut StdRng) -> bool {
        rng.gen_range(0..self.denominator) == 0
    }
}

/// Rotation by a random angle in `[-factor, factor]` of a full turn.
///
/// The image is sampled bilinearly, the mask by nearest neighbour. Uncovered
/// corners are filled with zeros.
#[derive(Debug, Clone, Copy)]
pub struct RandomRotate {
    pub gate: Gate,
    pub factor: f32,
}

impl RandomRotate {
    pub fn new(gate: Gate) -> Self {
        Self { gate, factor: 0.3 }
    }
}

impl JointTransform for RandomRotate {
    fn name(&self) -> &'static str {
        "random_rotate"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample> {
        if !self.gate.fires(rng) {
            return Ok(sample);
        }

        let theta = rng.gen_range(-self.factor..=self.factor) * 2.0 * PI;
        Ok(Sample::new(
            rotate(&sample.image, theta, Interpolation::Bilinear)?,
            rotate(&sample.mask, theta, Interpolation::Nearest)?,
        ))
    }
}

fn rotate(image: &DynamicImage, theta: f32, interpolation: Interpolation) -> Result<DynamicImage> {
    Ok(match image {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(rotate_about_center(
            buf,
            theta,
            interpolation,
            Luma([0]),
        )),
        DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(rotate_about_center(
            buf,
            theta,
            interpolation,
            LumaA([0, 0]),
        )),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(rotate_about_center(
            buf,
            theta,
            interpolation,
            Rgb([0, 0, 0]),
        )),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(rotate_about_center(
            buf,
            theta,
            interpolation,
            Rgba([0, 0, 0, 0]),
        )),
        other => {
            return Err(DataPrepError::UnsupportedPixelLayout(format!(
                "{:?}",
                other.color()
            )))
        }
    })
}

/// Crop a random window covering `[min_fraction, 1)` of each side, then resize
/// it back to the frame size.
///
/// Both image and mask are resized back with nearest-neighbour sampling.
#[derive(Debug, Clone, Copy)]
pub struct RandomCrop {
    pub gate: Gate,
    pub min_fraction: f32,
}

impl RandomCrop {
    pub fn new(gate: Gate) -> Self {
        Self {
            gate,
            min_fraction: 0.5,
        }
    }

    fn window(&self, frame: ImageSize, rng: &mut StdRng) -> CropBox {
        let fraction = rng.gen_range(self.min_fraction..1.0);
        let height = ((frame.height as f32 * fraction) as u32).clamp(1, frame.height.max(1));
        let width = ((frame.width as f32 * fraction) as u32).clamp(1, frame.width.max(1));

        let offset_height = rng.gen_range(0..=frame.height.saturating_sub(height));
        let offset_width = rng.gen_range(0..=frame.width.saturating_sub(width));

        CropBox::new(offset_height, offset_width, height, width)
    }
}

impl JointTransform for RandomCrop {
    fn name(&self) -> &'static str {
        "random_crop"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample> {
        if !self.gate.fires(rng) {
            return Ok(sample);
        }

        let frame = sample.size();
        let window = self.window(frame, rng);
        trace!(?window, "Random crop");

        let crop_back = |image: &DynamicImage| {
            image
                .crop_imm(
                    window.offset_width,
                    window.offset_height,
                    window.target_width,
                    window.target_height,
                )
                .resize_exact(frame.width, frame.height, FilterType::Nearest)
        };

        Ok(Sample::new(crop_back(&sample.image), crop_back(&sample.mask)))
    }
}

/// Mirror the pair horizontally
#[derive(Debug, Clone, Copy)]
pub struct FlipLeftRight {
    pub gate: Gate,
}

impl JointTransform for FlipLeftRight {
    fn name(&self) -> &'static str {
        "flip_left_right"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample> {
        if !self.gate.fires(rng) {
            return Ok(sample);
        }
        Ok(Sample::new(sample.image.fliph(), sample.mask.fliph()))
    }
}

/// Mirror the pair vertically
#[derive(Debug, Clone, Copy)]
pub struct FlipUpDown {
    pub gate: Gate,
}

impl JointTransform for FlipUpDown {
    fn name(&self) -> &'static str {
        "flip_up_down"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample> {
        if !self.gate.fires(rng) {
            return Ok(sample);
        }
        Ok(Sample::new(sample.image.flipv(), sample.mask.flipv()))
    }
}

/// An ordered chain of joint transforms
#[derive(Default)]
pub struct Augmenter {
    transforms: Vec<Box<dyn JointTransform>>,
}

impl Augmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transform to the chain
    pub fn add_transform<T>(mut self, transform: T) -> Self
    where
        T: JointTransform + 'static,
    {
        self.transforms.push(Box::new(transform));
        self
    }

    /// The chain enabled by `config`, in the order rotate, random crop,
    /// brightness, contrast, saturation, flip left-right, flip up-down
    pub fn from_config(config: &AugmentationConfig) -> Self {
        let gate = Gate::new(config.probability_denominator);
        let mut augmenter = Self::new();

        if config.random_rotate {
            augmenter = augmenter.add_transform(RandomRotate::new(gate));
        }
        if config.random_crop {
            augmenter = augmenter.add_transform(RandomCrop::new(gate));
        }

        let mut jitter = ColorJitter::new(gate);
        if config.corrupt_brightness {
            jitter = jitter.with(Brightness::default());
        }
        if config.corrupt_contrast {
            jitter = jitter.with(Contrast::default());
        }
        if config.corrupt_saturation {
            jitter = jitter.with(Saturation::default());
        }
        if !jitter.is_empty() {
            augmenter = augmenter.add_transform(jitter);
        }

        if config.flip_left_right {
            augmenter = augmenter.add_transform(FlipLeftRight { gate });
        }
        if config.flip_up_down {
            augmenter = augmenter.add_transform(FlipUpDown { gate });
        }

        augmenter
    }

    pub fn is_identity(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn augment(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample> {
        self.transforms
            .iter()
            .try_fold(sample, |sample, transform| transform.apply(sample, rng))
    }
}

impl std::fmt::Debug for Augmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Augmenter")
            .field("transforms", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, GrayImage, RgbImage};
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn labelled_pair(width: u32, height: u32) -> Sample {
        // the image's red channel encodes the mask label, so pairing can be checked per pixel
        let mask = GrayImage::from_fn(width, height, |x, y| Luma([((x * 3 / width) + (y % 2)) as u8]));
        let image = RgbImage::from_fn(width, height, |x, y| {
            let label = mask.get_pixel(x, y).0[0];
            Rgb([label * 60, 10, 20])
        });
        Sample::new(DynamicImage::ImageRgb8(image), DynamicImage::ImageLuma8(mask))
    }

    fn assert_paired(sample: &Sample) {
        let image = sample.image.to_rgb8();
        let mask = sample.mask.to_luma8();
        for (x, y, pixel) in mask.enumerate_pixels() {
            assert_eq!(image.get_pixel(x, y).0[0], pixel.0[0] * 60, "at ({x}, {y})");
        }
    }

    fn every_flag() -> AugmentationConfig {
        AugmentationConfig {
            random_crop: true,
            flip_left_right: true,
            flip_up_down: true,
            random_rotate: true,
            corrupt_brightness: true,
            corrupt_contrast: true,
            corrupt_saturation: true,
            probability_denominator: 1,
            augment_validation_data: false,
        }
    }

    #[test]
    fn test_gate_rate() {
        let gate = Gate::new(6);
        let mut rng = StdRng::seed_from_u64(42);
        let fired = (0..6000).filter(|_| gate.fires(&mut rng)).count();
        assert!((800..1200).contains(&fired), "fired {fired} times");

        let mut rng = StdRng::seed_from_u64(0);
        assert!((0..100).all(|_| Gate::always().fires(&mut rng)));
    }

    #[test]
    fn test_all_flags_off_is_identity() {
        let augmenter = Augmenter::from_config(&AugmentationConfig::disabled());
        assert!(augmenter.is_identity());

        let sample = labelled_pair(16, 16);
        let out = augmenter
            .augment(sample.clone(), &mut StdRng::seed_from_u64(1))
            .expect("Should augment");
        assert_eq!(out, sample);
    }

    #[test]
    fn test_chain_order() {
        let augmenter = Augmenter::from_config(&every_flag());
        assert_eq!(
            augmenter.names(),
            vec!["random_rotate", "random_crop", "color_jitter", "flip_left_right", "flip_up_down"]
        );
    }

    #[test]
    fn test_flips_keep_pairing() {
        let sample = labelled_pair(12, 8);
        let mut rng = StdRng::seed_from_u64(0);
        let flipped = FlipLeftRight { gate: Gate::always() }
            .apply(sample.clone(), &mut rng)
            .expect("Should flip");
        assert_paired(&flipped);
        assert_ne!(flipped.mask, sample.mask);

        let flipped = FlipUpDown { gate: Gate::always() }
            .apply(flipped, &mut rng)
            .expect("Should flip");
        assert_paired(&flipped);
    }

    #[test]
    fn test_random_crop_keeps_pairing_and_size() {
        let crop = RandomCrop::new(Gate::always());
        for seed in 0..10 {
            let out = crop
                .apply(labelled_pair(20, 14), &mut StdRng::seed_from_u64(seed))
                .expect("Should crop");
            assert_eq!(out.size(), ImageSize::new(14, 20));
            assert_paired(&out);
        }
    }

    #[test]
    fn test_rotation_keeps_mask_labels() {
        let rotate = RandomRotate::new(Gate::always());
        let out = rotate
            .apply(labelled_pair(24, 24), &mut StdRng::seed_from_u64(3))
            .expect("Should rotate");

        assert_eq!(out.image.dimensions(), (24, 24));
        let labels: BTreeSet<u8> = out.mask.to_luma8().pixels().map(|p| p.0[0]).collect();
        assert!(labels.is_subset(&BTreeSet::from([0, 1, 2, 3])));
    }

    #[test]
    fn test_same_seed_same_output() {
        let augmenter = Augmenter::from_config(&every_flag());
        let a = augmenter
            .augment(labelled_pair(16, 16), &mut StdRng::seed_from_u64(8))
            .expect("Should augment");
        let b = augmenter
            .augment(labelled_pair(16, 16), &mut StdRng::seed_from_u64(8))
            .expect("Should augment");
        assert_eq!(a, b);
    }
}
