use std::path::Path;

use image::DynamicImage;

use crate::{
    algorithms::geometry::CropResize,
    error::Result,
    io::images::{check_source_size, decode, load_sample},
    types::{Channels, ImageMaskPair, ImageSize, Sample, ShapeSpec},
};

/// Decodes sources into fixed layouts and normalises their geometry.
///
/// Every source must have the size of the first one seen, recorded in
/// `source_size`.
#[derive(Debug, Clone, Copy)]
pub struct SampleLoader {
    pub image_layout: Channels,
    pub mask_layout: Channels,
    pub crop_resize: CropResize,
    pub source_size: Option<ImageSize>,
}

impl SampleLoader {
    pub fn from_shape(shape: &ShapeSpec) -> Result<Self> {
        Ok(Self {
            image_layout: shape.image_layout()?,
            mask_layout: shape.mask_layout()?,
            crop_resize: CropResize::from_shape(shape),
            source_size: None,
        })
    }

    /// Record the source size from `path` and check the crop box against it
    pub fn fit_source(mut self, path: &Path) -> Result<Self> {
        let size = ImageSize::of(&decode(path, self.image_layout)?);
        if let Some(crop) = self.crop_resize.crop {
            crop.check_bounds(size)?;
        }
        self.source_size = Some(size);
        Ok(self)
    }

    /// Size of every loaded sample
    pub fn output_size(&self) -> Option<ImageSize> {
        self.source_size.map(|size| self.crop_resize.output_size(size))
    }

    pub fn load(&self, pair: &ImageMaskPair) -> Result<Sample> {
        let sample = load_sample(pair, self.image_layout, self.mask_layout)?;
        if let Some(expected) = self.source_size {
            check_source_size(&pair.image, expected, sample.size())?;
        }
        self.crop_resize.apply(sample)
    }

    /// Load a lone image, no mask
    pub fn load_image(&self, path: &Path) -> Result<DynamicImage> {
        let image = decode(path, self.image_layout)?;
        if let Some(expected) = self.source_size {
            check_source_size(path, expected, ImageSize::of(&image))?;
        }
        Ok(image)
    }
}
