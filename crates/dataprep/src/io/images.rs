use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageReader};
use tracing::debug;

use crate::{
    algorithms::sorting::sort_paths,
    error::{DataPrepError, Result},
    types::{Channels, ImageMaskPair, ImageSize, Sample},
};

/// File extensions picked up when listing a directory
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
}

/// Image files directly inside `dir`, in natural order
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| DataPrepError::path_io(dir, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DataPrepError::path_io(dir, e))?.path();
        if is_image_file(&path) {
            paths.push(path);
        }
    }

    if paths.is_empty() {
        return Err(DataPrepError::EmptyDirectory(dir.to_path_buf()));
    }

    sort_paths(&mut paths);
    Ok(paths)
}

/// Pair the naturally sorted contents of two directories by position
pub fn discover_pairs(images_dir: &Path, masks_dir: &Path) -> Result<Vec<ImageMaskPair>> {
    let images = list_images(images_dir)?;
    let masks = list_images(masks_dir)?;

    if images.len() != masks.len() {
        return Err(DataPrepError::PairCountMismatch {
            images: images.len(),
            masks: masks.len(),
        });
    }

    debug!(pairs = images.len(), ?images_dir, ?masks_dir, "Discovered image/mask pairs");
    Ok(images
        .into_iter()
        .zip(masks)
        .map(|(image, mask)| ImageMaskPair::new(image, mask))
        .collect())
}

/// Decode a file, guessing its format from content, into the given 8-bit layout
pub fn decode(path: &Path, layout: Channels) -> Result<DynamicImage> {
    let image = ImageReader::open(path)
        .map_err(|e| DataPrepError::path_io(path, e))?
        .with_guessed_format()
        .map_err(|e| DataPrepError::path_io(path, e))?
        .decode()?;
    Ok(layout.convert(image))
}

/// Decode a pair, requiring the mask to match the image's size
pub fn load_sample(pair: &ImageMaskPair, image_layout: Channels, mask_layout: Channels) -> Result<Sample> {
    let image = decode(&pair.image, image_layout)?;
    let mask = decode(&pair.mask, mask_layout)?;

    let image_size = ImageSize::of(&image);
    let mask_size = ImageSize::of(&mask);
    if image_size != mask_size {
        return Err(DataPrepError::ShapeMismatch {
            path: pair.mask.clone(),
            expected_height: image_size.height,
            expected_width: image_size.width,
            height: mask_size.height,
            width: mask_size.width,
        });
    }

    Ok(Sample::new(image, mask))
}

/// Fail unless `size` equals the `expected` source size
pub fn check_source_size(path: &Path, expected: ImageSize, size: ImageSize) -> Result<()> {
    if size == expected {
        return Ok(());
    }
    Err(DataPrepError::ShapeMismatch {
        path: path.to_path_buf(),
        expected_height: expected.height,
        expected_width: expected.width,
        height: size.height,
        width: size.width,
    })
}

/// Encode `image` to `path`. JPEG output drops any alpha channel.
pub fn save(image: &DynamicImage, path: &Path, format: ImageFormat) -> Result<()> {
    let result = match (format, image) {
        (ImageFormat::Jpeg, DynamicImage::ImageLumaA8(_)) => {
            DynamicImage::ImageLuma8(image.to_luma8()).save_with_format(path, format)
        }
        (ImageFormat::Jpeg, DynamicImage::ImageRgba8(_)) => {
            DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, format)
        }
        _ => image.save_with_format(path, format),
    };
    Ok(result?)
}

/// Create `dir` and its parents
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| DataPrepError::path_io(dir, e))
}
