use std::path::PathBuf;

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{DataPrepError, Result};

/// An image path and the positionally corresponding mask path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageMaskPair {
    pub image: PathBuf,
    pub mask: PathBuf,
}

impl ImageMaskPair {
    pub fn new(image: impl Into<PathBuf>, mask: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            mask: mask.into(),
        }
    }
}

/// A decoded image and its mask, always of identical height and width
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub image: DynamicImage,
    pub mask: DynamicImage,
}

impl Sample {
    pub fn new(image: DynamicImage, mask: DynamicImage) -> Self {
        Self { image, mask }
    }

    /// (height, width) of the pair
    pub fn size(&self) -> ImageSize {
        let (width, height) = self.image.dimensions();
        ImageSize { height, width }
    }
}

/// Height and width in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

impl ImageSize {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub fn of(image: &DynamicImage) -> Self {
        let (width, height) = image.dimensions();
        Self { height, width }
    }
}

/// Fixed pixel box, `(offset_height, offset_width, target_height, target_width)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CropBox {
    pub offset_height: u32,
    pub offset_width: u32,
    pub target_height: u32,
    pub target_width: u32,
}

impl CropBox {
    pub fn new(offset_height: u32, offset_width: u32, target_height: u32, target_width: u32) -> Self {
        Self {
            offset_height,
            offset_width,
            target_height,
            target_width,
        }
    }

    /// Check that the box lies inside an image of the given size
    pub fn check_bounds(&self, size: ImageSize) -> Result<()> {
        let fits_height = self
            .offset_height
            .checked_add(self.target_height)
            .is_some_and(|bottom| bottom <= size.height);
        let fits_width = self
            .offset_width
            .checked_add(self.target_width)
            .is_some_and(|right| right <= size.width);

        if fits_height && fits_width {
            Ok(())
        } else {
            Err(DataPrepError::CropOutOfBounds {
                offset_height: self.offset_height,
                offset_width: self.offset_width,
                target_height: self.target_height,
                target_width: self.target_width,
                height: size.height,
                width: size.width,
            })
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.target_height, self.target_width)
    }
}

/// Channel layout an image or mask is decoded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Channels {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl Channels {
    pub fn count(self) -> u8 {
        match self {
            Self::Gray => 1,
            Self::GrayAlpha => 2,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }

    /// Number of colour channels, i.e. excluding alpha
    pub fn color_count(self) -> usize {
        match self {
            Self::Gray | Self::GrayAlpha => 1,
            Self::Rgb | Self::Rgba => 3,
        }
    }

    /// Convert a decoded image into this 8-bit layout
    pub fn convert(self, image: DynamicImage) -> DynamicImage {
        match (self, image) {
            (Self::Gray, image @ DynamicImage::ImageLuma8(_))
            | (Self::GrayAlpha, image @ DynamicImage::ImageLumaA8(_))
            | (Self::Rgb, image @ DynamicImage::ImageRgb8(_))
            | (Self::Rgba, image @ DynamicImage::ImageRgba8(_)) => image,
            (Self::Gray, image) => DynamicImage::ImageLuma8(image.to_luma8()),
            (Self::GrayAlpha, image) => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
            (Self::Rgb, image) => DynamicImage::ImageRgb8(image.to_rgb8()),
            (Self::Rgba, image) => DynamicImage::ImageRgba8(image.to_rgba8()),
        }
    }

    /// Layout of an already-converted 8-bit image
    pub fn of(image: &DynamicImage) -> Result<Self> {
        match image {
            DynamicImage::ImageLuma8(_) => Ok(Self::Gray),
            DynamicImage::ImageLumaA8(_) => Ok(Self::GrayAlpha),
            DynamicImage::ImageRgb8(_) => Ok(Self::Rgb),
            DynamicImage::ImageRgba8(_) => Ok(Self::Rgba),
            other => Err(DataPrepError::UnsupportedPixelLayout(format!("{:?}", other.color()))),
        }
    }
}

impl TryFrom<u8> for Channels {
    type Error = DataPrepError;

    fn try_from(count: u8) -> Result<Self> {
        match count {
            1 => Ok(Self::Gray),
            2 => Ok(Self::GrayAlpha),
            3 => Ok(Self::Rgb),
            4 => Ok(Self::Rgba),
            other => Err(DataPrepError::InvalidConfig(format!(
                "channel count must be between 1 and 4, got {other}"
            ))),
        }
    }
}

/// Channel counts and geometric normalisation shared by images and masks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ShapeSpec {
    #[serde(default = "default_image_channels")]
    pub image_channels: u8,
    #[serde(default = "default_mask_channels")]
    pub mask_channels: u8,
    /// Final (height, width). When absent the source size is kept.
    #[serde(default)]
    pub target: Option<ImageSize>,
    /// Box cropped out of every source before resizing
    #[serde(default)]
    pub crop: Option<CropBox>,
}

fn default_image_channels() -> u8 {
    3
}

fn default_mask_channels() -> u8 {
    1
}

impl Default for ShapeSpec {
    fn default() -> Self {
        Self {
            image_channels: default_image_channels(),
            mask_channels: default_mask_channels(),
            target: None,
            crop: None,
        }
    }
}

impl ShapeSpec {
    pub fn image_layout(&self) -> Result<Channels> {
        Channels::try_from(self.image_channels)
    }

    pub fn mask_layout(&self) -> Result<Channels> {
        Channels::try_from(self.mask_channels)
    }

    /// Check the fields that do not depend on the source images
    pub fn validate(&self) -> Result<()> {
        self.image_layout()?;
        self.mask_layout()?;

        if let Some(target) = self.target {
            if target.height == 0 || target.width == 0 {
                return Err(DataPrepError::InvalidConfig(format!(
                    "target size must be non-zero, got {}x{}",
                    target.height, target.width
                )));
            }
        }

        if let Some(crop) = self.crop {
            if crop.target_height == 0 || crop.target_width == 0 {
                return Err(DataPrepError::InvalidConfig(
                    "crop box must have a non-zero height and width".to_string(),
                ));
            }
            if self.target.is_none() {
                return Err(DataPrepError::InvalidConfig(
                    "a crop box requires a target (height, width) to resize to".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// One of the three output subsets
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, IntoStaticStr,
    PartialEq, Eq, Hash
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PartitionKind {
    Train,
    #[serde(rename = "val")]
    #[strum(serialize = "val")]
    Validation,
    Test,
}

impl PartitionKind {
    pub(crate) fn salt(self) -> u64 {
        match self {
            Self::Train => 0,
            Self::Validation => 1,
            Self::Test => 2,
        }
    }
}

/// Items written per partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PartitionCounts {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

impl PartitionCounts {
    pub fn set(&mut self, kind: PartitionKind, count: usize) {
        match kind {
            PartitionKind::Train => self.train = count,
            PartitionKind::Validation => self.validation = count,
            PartitionKind::Test => self.test = count,
        }
    }

    pub fn total(&self) -> usize {
        self.train + self.validation + self.test
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    #[test]
    fn test_crop_box_bounds() {
        let size = ImageSize::new(64, 48);
        assert!(CropBox::new(0, 0, 64, 48).check_bounds(size).is_ok());
        assert!(CropBox::new(10, 8, 54, 40).check_bounds(size).is_ok());

        let err = CropBox::new(10, 0, 60, 48)
            .check_bounds(size)
            .expect_err("Should reject a box past the bottom edge");
        assert!(matches!(err, DataPrepError::CropOutOfBounds { .. }));
        assert!(CropBox::new(0, u32::MAX, 1, 2).check_bounds(size).is_err());
    }

    #[test]
    fn test_channel_conversion() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let gray = Channels::Gray.convert(rgb.clone());
        assert_eq!(Channels::of(&gray).expect("Should be 8-bit"), Channels::Gray);

        let rgba = Channels::Rgba.convert(rgb);
        assert_eq!(rgba.color().channel_count(), 4);

        let untouched = Channels::Gray.convert(DynamicImage::ImageLuma8(GrayImage::new(2, 2)));
        assert_eq!(untouched.color().channel_count(), 1);
    }

    #[test]
    fn test_channel_count_parsing() {
        assert_eq!(Channels::try_from(3).expect("Should parse"), Channels::Rgb);
        assert!(Channels::try_from(0).is_err());
        assert!(Channels::try_from(5).is_err());
    }

    #[test]
    fn test_shape_spec_validation() {
        let mut spec = ShapeSpec::default();
        assert!(spec.validate().is_ok());

        spec.crop = Some(CropBox::new(0, 0, 10, 10));
        assert!(spec.validate().is_err(), "crop without target must be rejected");

        spec.target = Some(ImageSize::new(8, 8));
        assert!(spec.validate().is_ok());

        spec.target = Some(ImageSize::new(0, 8));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_partition_names() {
        assert_eq!(PartitionKind::Train.to_string(), "train");
        assert_eq!(PartitionKind::Validation.to_string(), "val");
        assert_eq!(
            serde_json::to_string(&PartitionKind::Validation).expect("Should serialize"),
            "\"val\""
        );
    }
}
