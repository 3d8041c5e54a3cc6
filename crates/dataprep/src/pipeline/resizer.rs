//! Crop/resize whole folders without splitting or augmenting.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    algorithms::geometry::{crop_to_box, grid_crop_boxes, ResizeMethod},
    config::output_format,
    error::{DataPrepError, Result},
    io::images::{discover_pairs, ensure_dir, list_images, save},
    pipeline::loader::SampleLoader,
    types::{CropBox, ImageSize, ShapeSpec},
};

/// How output files are named
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputNaming {
    /// `{prefix}_{index}.{format}`, counting up from `start_index`
    Sequential { start_index: u64 },
    /// The source file stem with the output format's extension
    OriginalNames,
}

impl Default for OutputNaming {
    fn default() -> Self {
        Self::Sequential { start_index: 0 }
    }
}

/// A `rows x cols` grid of `tile`-sized crops cut out of every resized image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TileGrid {
    pub tile: ImageSize,
    pub rows: u32,
    pub cols: u32,
}

fn default_image_prefix() -> String {
    "img".to_string()
}

fn default_mask_prefix() -> String {
    "mask".to_string()
}

fn default_format() -> String {
    "png".to_string()
}

fn default_channels() -> u8 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FolderResizeConfig {
    pub images_directory: PathBuf,
    pub output_directory: PathBuf,
    #[serde(default = "default_channels")]
    pub channels: u8,
    #[serde(default)]
    pub target: Option<ImageSize>,
    #[serde(default)]
    pub crop: Option<CropBox>,
    #[serde(default)]
    pub method: ResizeMethod,
    #[serde(default)]
    pub naming: OutputNaming,
    #[serde(default = "default_image_prefix")]
    pub prefix: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub tiles: Option<TileGrid>,
    #[serde(default)]
    pub workers: Option<usize>,
}

impl FolderResizeConfig {
    pub fn new(images_directory: impl Into<PathBuf>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            images_directory: images_directory.into(),
            output_directory: output_directory.into(),
            channels: default_channels(),
            target: None,
            crop: None,
            method: ResizeMethod::default(),
            naming: OutputNaming::default(),
            prefix: default_image_prefix(),
            format: default_format(),
            tiles: None,
            workers: None,
        }
    }

    fn shape(&self) -> ShapeSpec {
        ShapeSpec {
            image_channels: self.channels,
            target: self.target,
            crop: self.crop,
            ..ShapeSpec::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PairResizeConfig {
    pub images_directory: PathBuf,
    pub masks_directory: PathBuf,
    pub images_output_directory: PathBuf,
    pub masks_output_directory: PathBuf,
    #[serde(default)]
    pub shape: ShapeSpec,
    #[serde(default)]
    pub method: ResizeMethod,
    #[serde(default)]
    pub naming: OutputNaming,
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
    #[serde(default = "default_mask_prefix")]
    pub mask_prefix: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub workers: Option<usize>,
}

impl PairResizeConfig {
    pub fn new(
        images_directory: impl Into<PathBuf>,
        masks_directory: impl Into<PathBuf>,
        images_output_directory: impl Into<PathBuf>,
        masks_output_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            images_directory: images_directory.into(),
            masks_directory: masks_directory.into(),
            images_output_directory: images_output_directory.into(),
            masks_output_directory: masks_output_directory.into(),
            shape: ShapeSpec::default(),
            method: ResizeMethod::default(),
            naming: OutputNaming::default(),
            image_prefix: default_image_prefix(),
            mask_prefix: default_mask_prefix(),
            format: default_format(),
            workers: None,
        }
    }
}

fn output_name(naming: &OutputNaming, prefix: &str, index: u64, source: &Path, format: &str) -> String {
    match naming {
        OutputNaming::Sequential { .. } => format!("{prefix}_{index}.{format}"),
        OutputNaming::OriginalNames => {
            let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or(prefix);
            format!("{stem}.{format}")
        }
    }
}

fn start_index(naming: &OutputNaming) -> u64 {
    match naming {
        OutputNaming::Sequential { start_index } => *start_index,
        OutputNaming::OriginalNames => 0,
    }
}

/// Last index written when `items` sources each produce `per_item` files from `first`
fn last_index(first: u64, items: usize, per_item: u64) -> Result<u64> {
    (items as u64)
        .checked_mul(per_item)
        .and_then(|count| count.checked_sub(1))
        .and_then(|offset| first.checked_add(offset))
        .ok_or_else(|| DataPrepError::InvalidConfig("output index overflows u64".to_string()))
}

/// Fails on the first output name produced by more than one source
fn check_unique_names(names: impl IntoIterator<Item = String>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if seen.contains(&name) {
            return Err(DataPrepError::DuplicateOutputName(name));
        }
        seen.insert(name);
    }
    Ok(())
}

fn check_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(DataPrepError::InvalidConfig("file name prefix must not be empty".to_string()));
    }
    Ok(())
}

fn worker_pool(workers: Option<usize>) -> Result<ThreadPool> {
    let mut builder = ThreadPoolBuilder::new();
    if let Some(workers) = workers {
        if workers == 0 {
            return Err(DataPrepError::InvalidConfig("workers must be at least 1".to_string()));
        }
        builder = builder.num_threads(workers);
    }
    Ok(builder.build()?)
}

/// Normalises one folder of images, e.g. right after upload
pub struct FolderResizer {
    config: FolderResizeConfig,
}

pub type ImageCropperResizerAndSaver = FolderResizer;

impl FolderResizer {
    pub fn new(config: FolderResizeConfig) -> Result<Self> {
        config.shape().validate()?;
        output_format(&config.format)?;
        check_prefix(&config.prefix)?;
        if let Some(grid) = config.tiles {
            if grid.rows == 0 || grid.cols == 0 {
                return Err(DataPrepError::InvalidConfig("tile grid must be non-zero".to_string()));
            }
        }
        Ok(Self { config })
    }

    /// Files written per source image
    pub fn outputs_per_image(&self) -> usize {
        self.config
            .tiles
            .map_or(1, |grid| grid.rows as usize * grid.cols as usize)
    }

    /// Resize every image in the folder, returning how many files were written
    pub fn run(&self) -> Result<usize> {
        let config = &self.config;
        let format = output_format(&config.format)?;
        let paths = list_images(&config.images_directory)?;

        let shape = config.shape();
        let mut loader = SampleLoader::from_shape(&shape)?.fit_source(&paths[0])?;
        loader.crop_resize = loader.crop_resize.with_image_method(config.method);

        let tiles = match (config.tiles, loader.output_size()) {
            (Some(grid), Some(parent)) => grid_crop_boxes(parent, grid.tile, grid.rows, grid.cols)?,
            _ => Vec::new(),
        };

        let per_image = self.outputs_per_image() as u64;
        let first = start_index(&config.naming);
        let last = last_index(first, paths.len(), per_image)?;
        if config.naming == OutputNaming::OriginalNames {
            check_unique_names(
                paths
                    .iter()
                    .map(|path| output_name(&config.naming, &config.prefix, 0, path, &config.format)),
            )?;
        }

        ensure_dir(&config.output_directory)?;
        let pool = worker_pool(config.workers)?;
        debug!(images = paths.len(), per_image, first, last, "Resizing folder");

        pool.install(|| {
            paths.par_iter().enumerate().try_for_each(|(position, path)| {
                let image = loader.crop_resize.apply_image(loader.load_image(path)?)?;
                // bounded by `last`
                let base = first + position as u64 * per_image;
                self.write_outputs(&image, &tiles, base, path, format)
            })
        })?;

        let written = paths.len() * self.outputs_per_image();
        info!(written, output = ?config.output_directory, "Folder resized");
        Ok(written)
    }

    fn write_outputs(
        &self,
        image: &DynamicImage,
        tiles: &[CropBox],
        base: u64,
        source: &Path,
        format: ImageFormat,
    ) -> Result<()> {
        let config = &self.config;
        if tiles.is_empty() {
            let name = output_name(&config.naming, &config.prefix, base, source, &config.format);
            return save(image, &config.output_directory.join(name), format);
        }

        for (t, tile) in tiles.iter().enumerate() {
            let name = match config.naming {
                OutputNaming::Sequential { .. } => {
                    format!("{}_{}.{}", config.prefix, base + t as u64, config.format)
                }
                OutputNaming::OriginalNames => {
                    let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or(&config.prefix);
                    format!("{stem}_{t}.{}", config.format)
                }
            };
            save(&crop_to_box(image, *tile)?, &config.output_directory.join(name), format)?;
        }
        Ok(())
    }
}

/// Crop/resizes an image folder and its mask folder together
pub struct PairResizer {
    config: PairResizeConfig,
}

pub type ImageAndMaskCropperResizerAndSaver = PairResizer;

impl PairResizer {
    pub fn new(config: PairResizeConfig) -> Result<Self> {
        config.shape.validate()?;
        output_format(&config.format)?;
        check_prefix(&config.image_prefix)?;
        check_prefix(&config.mask_prefix)?;
        Ok(Self { config })
    }

    /// Resize every pair, returning how many pairs were written
    pub fn run(&self) -> Result<usize> {
        let config = &self.config;
        let format = output_format(&config.format)?;
        let pairs = discover_pairs(&config.images_directory, &config.masks_directory)?;

        let mut loader = SampleLoader::from_shape(&config.shape)?.fit_source(&pairs[0].image)?;
        loader.crop_resize = loader.crop_resize.with_image_method(config.method);

        let first = start_index(&config.naming);
        last_index(first, pairs.len(), 1)?;
        if config.naming == OutputNaming::OriginalNames {
            check_unique_names(pairs.iter().map(|pair| {
                output_name(&config.naming, &config.image_prefix, 0, &pair.image, &config.format)
            }))?;
            check_unique_names(pairs.iter().map(|pair| {
                output_name(&config.naming, &config.mask_prefix, 0, &pair.mask, &config.format)
            }))?;
        }

        ensure_dir(&config.images_output_directory)?;
        ensure_dir(&config.masks_output_directory)?;
        let pool = worker_pool(config.workers)?;

        pool.install(|| {
            pairs.par_iter().enumerate().try_for_each(|(position, pair)| {
                let sample = loader.load(pair)?;
                let index = first + position as u64;
                let image_name = output_name(&config.naming, &config.image_prefix, index, &pair.image, &config.format);
                let mask_name = output_name(&config.naming, &config.mask_prefix, index, &pair.mask, &config.format);
                save(&sample.image, &config.images_output_directory.join(image_name), format)?;
                save(&sample.mask, &config.masks_output_directory.join(mask_name), format)
            })
        })?;

        info!(pairs = pairs.len(), "Pairs resized");
        Ok(pairs.len())
    }
}
