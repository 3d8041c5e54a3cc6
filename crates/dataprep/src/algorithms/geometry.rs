//! Deterministic geometric normalisation: fixed-box crop, then resize.

use image::{imageops::FilterType, DynamicImage};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    error::{DataPrepError, Result},
    types::{CropBox, ImageSize, Sample, ShapeSpec},
};

/// Interpolation used when resizing
#[derive(
    Debug, Clone, Copy, Default,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, IntoStaticStr,
    PartialEq, Eq
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResizeMethod {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
    Gaussian,
    Lanczos3,
}

impl ResizeMethod {
    pub fn filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::Bicubic => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Crop to an optional fixed box, then resize to an optional target size.
///
/// Masks are always resized with nearest-neighbour sampling so no label value
/// is ever invented.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropResize {
    pub crop: Option<CropBox>,
    pub target: Option<ImageSize>,
    pub image_method: ResizeMethod,
}

impl CropResize {
    pub fn new(crop: Option<CropBox>, target: Option<ImageSize>) -> Self {
        Self {
            crop,
            target,
            image_method: ResizeMethod::Bilinear,
        }
    }

    pub fn from_shape(shape: &ShapeSpec) -> Self {
        Self::new(shape.crop, shape.target)
    }

    pub fn with_image_method(mut self, method: ResizeMethod) -> Self {
        self.image_method = method;
        self
    }

    /// Size of the output for a source of the given size
    pub fn output_size(&self, source: ImageSize) -> ImageSize {
        self.target
            .or_else(|| self.crop.map(|crop| crop.size()))
            .unwrap_or(source)
    }

    pub fn apply_image(&self, image: DynamicImage) -> Result<DynamicImage> {
        self.transform(image, self.image_method.filter())
    }

    pub fn apply_mask(&self, mask: DynamicImage) -> Result<DynamicImage> {
        self.transform(mask, FilterType::Nearest)
    }

    /// Crop and resize an image and its mask with the same box and target
    pub fn apply(&self, sample: Sample) -> Result<Sample> {
        let image_size = ImageSize::of(&sample.image);
        let mask_size = ImageSize::of(&sample.mask);
        if image_size != mask_size {
            return Err(DataPrepError::PairShapeMismatch {
                image_height: image_size.height,
                image_width: image_size.width,
                mask_height: mask_size.height,
                mask_width: mask_size.width,
            });
        }

        Ok(Sample::new(
            self.apply_image(sample.image)?,
            self.apply_mask(sample.mask)?,
        ))
    }

    fn transform(&self, image: DynamicImage, filter: FilterType) -> Result<DynamicImage> {
        let image = match self.crop {
            Some(crop) => crop_to_box(&image, crop)?,
            None => image,
        };

        Ok(match self.target {
            Some(target) if target != ImageSize::of(&image) => {
                image.resize_exact(target.width, target.height, filter)
            }
            _ => image,
        })
    }
}

/// Crop `image` to `crop`, failing if the box leaves the image
pub fn crop_to_box(image: &DynamicImage, crop: CropBox) -> Result<DynamicImage> {
    crop.check_bounds(ImageSize::of(image))?;
    Ok(image.crop_imm(
        crop.offset_width,
        crop.offset_height,
        crop.target_width,
        crop.target_height,
    ))
}

/// Crop boxes cutting a `rows x cols` grid of `child` tiles out of a `parent` image.
///
/// Tiles are evenly spaced with the first one at the origin. Boxes are listed
/// column by column: all tiles of the first column top to bottom, then the next.
pub fn grid_crop_boxes(
    parent: ImageSize,
    child: ImageSize,
    rows: u32,
    cols: u32,
) -> Result<Vec<CropBox>> {
    let vertical = tile_offsets(parent.height, child.height, rows)?;
    let horizontal = tile_offsets(parent.width, child.width, cols)?;

    let mut boxes = Vec::with_capacity(vertical.len() * horizontal.len());
    for &offset_width in &horizontal {
        for &offset_height in &vertical {
            boxes.push(CropBox::new(
                offset_height,
                offset_width,
                child.height,
                child.width,
            ));
        }
    }
    Ok(boxes)
}

fn tile_offsets(parent: u32, child: u32, count: u32) -> Result<Vec<u32>> {
    if count == 0 || child == 0 {
        return Err(DataPrepError::InvalidConfig(
            "tile grid and tile size must be non-zero".to_string(),
        ));
    }

    let covered = child.checked_mul(count).filter(|&c| c <= parent).ok_or_else(|| {
        DataPrepError::InvalidConfig(format!(
            "{count} tiles of {child} pixels do not fit into {parent} pixels"
        ))
    })?;

    let gap = if count > 1 { (parent - covered) / (count - 1) } else { 0 };
    Ok((0..count).map(|i| i * (child + gap)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, GrayImage, Luma, Rgb, RgbImage};
    use std::collections::BTreeSet;

    fn three_class_mask(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            Luma([((x / 3 + y / 5) % 3) as u8])
        }))
    }

    fn values(mask: &DynamicImage) -> BTreeSet<u8> {
        mask.to_luma8().pixels().map(|p| p.0[0]).collect()
    }

    #[test]
    fn test_mask_resize_preserves_labels() {
        let mask = three_class_mask(64, 48);
        for (h, w) in [(32, 32), (17, 91), (128, 128), (5, 3)] {
            let resize = CropResize::new(None, Some(ImageSize::new(h, w)));
            let out = resize.apply_mask(mask.clone()).expect("Should resize");
            assert_eq!(out.dimensions(), (w, h));
            assert!(values(&out).is_subset(&BTreeSet::from([0, 1, 2])));
        }
    }

    #[test]
    fn test_image_resize_is_smooth() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(8, 8, |x, _| {
            if x < 4 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        }));
        let out = CropResize::new(None, Some(ImageSize::new(8, 5)))
            .apply_image(image)
            .expect("Should resize");

        let has_intermediate = out
            .to_rgb8()
            .pixels()
            .any(|p| p.0[0] != 0 && p.0[0] != 255);
        assert!(has_intermediate, "bilinear resize should blend the edge");
    }

    #[test]
    fn test_crop_then_resize() {
        let mask = three_class_mask(40, 30);
        let resize = CropResize::new(
            Some(CropBox::new(5, 10, 20, 20)),
            Some(ImageSize::new(10, 10)),
        );
        let out = resize.apply_mask(mask).expect("Should crop and resize");
        assert_eq!(out.dimensions(), (10, 10));
        assert_eq!(resize.output_size(ImageSize::new(30, 40)), ImageSize::new(10, 10));
    }

    #[test]
    fn test_crop_out_of_bounds_fails() {
        let mask = three_class_mask(16, 16);
        let resize = CropResize::new(Some(CropBox::new(8, 8, 10, 4)), Some(ImageSize::new(4, 4)));
        let err = resize.apply_mask(mask).expect_err("Should reject the box");
        assert!(matches!(err, DataPrepError::CropOutOfBounds { .. }));
    }

    #[test]
    fn test_no_target_keeps_source() {
        let mask = three_class_mask(12, 9);
        let out = CropResize::new(None, None)
            .apply_mask(mask.clone())
            .expect("Should pass through");
        assert_eq!(out, mask);
    }

    #[test]
    fn test_mismatched_pair_is_rejected() {
        let sample = Sample::new(
            DynamicImage::ImageRgb8(RgbImage::new(8, 8)),
            three_class_mask(8, 7),
        );
        let err = CropResize::new(None, None).apply(sample).expect_err("Should reject");
        assert!(matches!(
            err,
            DataPrepError::PairShapeMismatch { mask_height: 7, mask_width: 8, .. }
        ));
        assert_eq!(err.to_string(), "Mask is 7x8 but its image is 8x8");
    }

    #[test]
    fn test_grid_crop_boxes() {
        let boxes = grid_crop_boxes(ImageSize::new(100, 200), ImageSize::new(40, 90), 2, 2)
            .expect("Should fit");
        assert_eq!(
            boxes,
            vec![
                CropBox::new(0, 0, 40, 90),
                CropBox::new(60, 0, 40, 90),
                CropBox::new(0, 110, 40, 90),
                CropBox::new(60, 110, 40, 90),
            ]
        );
        for crop in &boxes {
            crop.check_bounds(ImageSize::new(100, 200)).expect("Should lie inside");
        }
    }

    #[test]
    fn test_grid_that_does_not_fit() {
        assert!(grid_crop_boxes(ImageSize::new(50, 50), ImageSize::new(30, 10), 2, 1).is_err());
        let single = grid_crop_boxes(ImageSize::new(50, 50), ImageSize::new(30, 10), 1, 1)
            .expect("Should fit");
        assert_eq!(single, vec![CropBox::new(0, 0, 30, 10)]);
    }
}
