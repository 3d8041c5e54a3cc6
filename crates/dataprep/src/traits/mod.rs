use rand::rngs::StdRng;

use crate::{algorithms::photometric::UnitPixels, error::Result, types::Sample};

/// Trait for stochastic transforms applied jointly to an image and its mask
pub trait JointTransform: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Transform the pair. Geometric changes must be applied identically to both.
    fn apply(&self, sample: Sample, rng: &mut StdRng) -> Result<Sample>;
}

/// Trait for photometric adjustments on unit-range image pixels
pub trait PixelAdjustment: Send + Sync {
    fn name(&self) -> &'static str;

    /// Adjust colour channels in place, values may leave [0, 1] until quantisation
    fn adjust(&self, pixels: &mut UnitPixels, rng: &mut StdRng);
}
