//! Colour jitter on unit-range pixels. Only the image of a pair is touched; the
//! mask passes through unchanged.

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use rand::{rngs::StdRng, Rng};

use crate::{
    algorithms::augmentation::Gate,
    error::{DataPrepError, Result},
    traits::{JointTransform, PixelAdjustment},
    types::{Channels, Sample},
};

/// Interleaved `f32` pixels in `[0, 1]`, one value per channel.
///
/// Adjustments may push values outside the unit range; they are clamped once,
/// when the buffer is quantised back to 8 bits.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPixels {
    width: u32,
    height: u32,
    layout: Channels,
    data: Vec<f32>,
}

impl UnitPixels {
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        let layout = Channels::of(image)?;
        let data = image.as_bytes().iter().map(|&v| f32::from(v) / 255.0).collect();

        Ok(Self {
            width: image.width(),
            height: image.height(),
            layout,
            data,
        })
    }

    pub fn layout(&self) -> Channels {
        self.layout
    }

    /// Colour channels of every pixel, alpha excluded
    pub fn color_pixels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        let stride = usize::from(self.layout.count());
        let colors = self.layout.color_count();
        self.data
            .chunks_exact_mut(stride)
            .map(move |pixel| &mut pixel[..colors])
    }

    /// Mean of each colour channel over the whole image
    pub fn channel_means(&self) -> Vec<f32> {
        let stride = usize::from(self.layout.count());
        let colors = self.layout.color_count();
        let mut sums = vec![0f64; colors];

        for pixel in self.data.chunks_exact(stride) {
            for (sum, &value) in sums.iter_mut().zip(&pixel[..colors]) {
                *sum += f64::from(value);
            }
        }

        let n = (self.data.len() / stride).max(1) as f64;
        sums.into_iter().map(|sum| (sum / n) as f32).collect()
    }

    /// Clamp, round and rebuild an 8-bit image of the original layout
    pub fn into_image(self) -> Result<DynamicImage> {
        let bytes: Vec<u8> = self
            .data
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        let (width, height) = (self.width, self.height);
        let mismatch = || DataPrepError::UnsupportedPixelLayout(format!(
            "{} buffer does not match {width}x{height}",
            self.layout
        ));

        Ok(match self.layout {
            Channels::Gray => DynamicImage::ImageLuma8(
                GrayImage::from_raw(width, height, bytes).ok_or_else(mismatch)?,
            ),
            Channels::GrayAlpha => DynamicImage::ImageLumaA8(
                GrayAlphaImage::from_raw(width, height, bytes).ok_or_else(mismatch)?,
            ),
            Channels::Rgb => DynamicImage::ImageRgb8(
                RgbImage::from_raw(width, height, bytes).ok_or_else(mismatch)?,
            ),
            Channels::Rgba => DynamicImage::ImageRgba8(
                RgbaImage::from_raw(width, height, bytes).ok_or_else(mismatch)?,
            ),
        })
    }
}

/// Add a random delta in `[-max_delta, max_delta]` to every colour channel
#[derive(Debug, Clone, Copy)]
pub struct Brightness {
    pub max_delta: f32,
}

impl Default for Brightness {
    fn default() -> Self {
        Self { max_delta: 0.2 }
    }
}

impl PixelAdjustment for Brightness {
    fn name(&self) -> &'static str {
        "brightness"
    }

    fn adjust(&self, pixels: &mut UnitPixels, rng: &mut StdRng) {
        let delta = rng.gen_range(-self.max_delta..=self.max_delta);
        for pixel in pixels.color_pixels_mut() {
            pixel.iter_mut().for_each(|v| *v += delta);
        }
    }
}

/// Scale each channel's distance from its mean by a random factor
#[derive(Debug, Clone, Copy)]
pub struct Contrast {
    pub lower: f32,
    pub upper: f32,
}

impl Default for Contrast {
    fn default() -> Self {
        Self { lower: 0.1, upper: 0.8 }
    }
}

impl PixelAdjustment for Contrast {
    fn name(&self) -> &'static str {
        "contrast"
    }

    fn adjust(&self, pixels: &mut UnitPixels, rng: &mut StdRng) {
        let factor = rng.gen_range(self.lower..self.upper);
        let means = pixels.channel_means();
        for pixel in pixels.color_pixels_mut() {
            for (v, mean) in pixel.iter_mut().zip(&means) {
                *v = (*v - mean) * factor + mean;
            }
        }
    }
}

/// Scale HSV saturation by a random factor. Single-channel images are left alone.
#[derive(Debug, Clone, Copy)]
pub struct Saturation {
    pub lower: f32,
    pub upper: f32,
}

impl Default for Saturation {
    fn default() -> Self {
        Self { lower: 0.1, upper: 0.8 }
    }
}

impl PixelAdjustment for Saturation {
    fn name(&self) -> &'static str {
        "saturation"
    }

    fn adjust(&self, pixels: &mut UnitPixels, rng: &mut StdRng) {
        let factor = rng.gen_range(self.lower..self.upper);
        if pixels.layout().color_count() != 3 {
            return;
        }

        for pixel in pixels.color_pixels_mut() {
            let (h, s, v) = rgb_to_hsv(pixel[0], pixel[1], pixel[2]);
            let (r, g, b) = hsv_to_rgb(h, (s * factor).clamp(0.0, 1.0), v);
            pixel.copy_from_slice(&[r, g, b]);
        }
    }
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let chroma = max - min;

    let hue = if chroma <= 0.0 {
        0.0
    } else if max == r {
        ((g - b) / chroma).rem_euclid(6.0)
    } else if max == g {
        (b - r) / chroma + 2.0
    } else {
        (r - g) / chroma + 4.0
    };
    let saturation = if max > 0.0 { chroma / max } else { 0.0 };

    (hue / 6.0, saturation, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let chroma = v * s;
    let sector = (h * 6.0).rem_euclid(6.0);
    let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let m = v - chroma;

    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    (r + m, g + m, b + m)
}

/// Consecutive photometric adjustments, each behind its own gate, applied to the
/// image of a pair on a single float buffer
pub struct ColorJitter {
    gate: Gate,
    adjustments: Vec<Box<dyn PixelAdjustment>>,
}

impl ColorJitter {
    pub fn new(gate: Gate) -> Self {
        Self {
            gate,
            adjustments: Vec::new(),
        }
    }

    pub fn with<A>(mut self, adjustment: A) -> Self
    where
        A: PixelAdjustment + 'static,
    {
        self.adjustments.push(Box::new(adjustment));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty()
    }
}

impl JointTransform for ColorJitter {
    fn name(&self) -> &'static str {
        "color_jitter"
    }

    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample> {
        let fired: Vec<&dyn PixelAdjustment> = self
            .adjustments
            .iter()
            .filter(|_| self.gate.fires(rng))
            .map(|a| a.as_ref())
            .collect();

        if fired.is_empty() {
            return Ok(sample);
        }

        let mut pixels = UnitPixels::from_image(&sample.image)?;
        for adjustment in fired {
            adjustment.adjust(&mut pixels, rng);
        }

        Ok(Sample::new(pixels.into_image()?, sample.mask))
    }
}
