use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    error::{DataPrepError, Result},
    types::{PartitionKind, ShapeSpec},
};

/// Toggles and firing rate of the stochastic augmentation chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AugmentationConfig {
    pub random_crop: bool,
    pub flip_left_right: bool,
    pub flip_up_down: bool,
    pub random_rotate: bool,
    pub corrupt_brightness: bool,
    pub corrupt_contrast: bool,
    pub corrupt_saturation: bool,
    /// Each enabled transform fires with probability `1 / probability_denominator`
    #[schemars(range(min = 1))]
    pub probability_denominator: u32,
    /// Also augment (and repeat) the validation partition
    pub augment_validation_data: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            random_crop: true,
            flip_left_right: true,
            flip_up_down: true,
            random_rotate: true,
            corrupt_brightness: false,
            corrupt_contrast: false,
            corrupt_saturation: false,
            probability_denominator: 6,
            augment_validation_data: false,
        }
    }
}

impl AugmentationConfig {
    /// Every transform switched off
    pub fn disabled() -> Self {
        Self {
            random_crop: false,
            flip_left_right: false,
            flip_up_down: false,
            random_rotate: false,
            ..Self::default()
        }
    }
}

/// Split fractions and shuffle seed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of all pairs cut into the validation partition
    pub val_size: f64,
    /// Fraction of the post-validation remainder cut into the test partition
    pub test_size: f64,
    /// Drawn from `0..=1000` and logged when absent
    pub seed: Option<u64>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            val_size: 0.2,
            test_size: 0.2,
            seed: None,
        }
    }
}

pub const DEFAULT_VISUAL_ATTRIBUTES: [&str; 15] = [
    "eccentricity",
    "equivalent_diameter",
    "feret_diameter_max",
    "filled_area",
    "perimeter",
    "roundness",
    "L",
    "a",
    "b",
    "contrast",
    "correlation",
    "energy",
    "entropy",
    "homogeneity",
    "uniformity",
];

/// Stratified splitting on one column of a visual attribute table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StratificationConfig {
    /// `.json` or `.csv` table with one row per image/mask pair
    pub table_path: PathBuf,
    /// Column whose bins are preserved across partitions
    #[serde(default = "default_attribute")]
    pub attribute: String,
    /// Columns that must be present. Defaults to the standard shape, colour and texture set.
    #[serde(default)]
    pub attributes: Option<Vec<String>>,
}

fn default_attribute() -> String {
    "a".to_string()
}

impl StratificationConfig {
    pub fn new(table_path: impl Into<PathBuf>, attribute: impl Into<String>) -> Self {
        Self {
            table_path: table_path.into(),
            attribute: attribute.into(),
            attributes: None,
        }
    }

    /// Required columns, always including the stratification attribute
    pub fn required_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = match &self.attributes {
            Some(columns) => columns.clone(),
            None => DEFAULT_VISUAL_ATTRIBUTES.iter().map(|c| c.to_string()).collect(),
        };
        if !columns.contains(&self.attribute) {
            columns.push(self.attribute.clone());
        }
        columns
    }
}

/// Output directory and first file index of one partition.
///
/// A partition without a directory is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PartitionTarget {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub start_index: u64,
}

impl PartitionTarget {
    pub fn new(directory: impl Into<PathBuf>, start_index: u64) -> Self {
        Self {
            directory: Some(directory.into()),
            start_index,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.directory.is_some()
    }

    pub fn image_dir(&self) -> Option<PathBuf> {
        self.directory.as_ref().map(|dir| dir.join("images"))
    }

    pub fn mask_dir(&self) -> Option<PathBuf> {
        self.directory.as_ref().map(|dir| dir.join("masks"))
    }
}

/// `{prefix}_{index}.{format}` naming of written files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NamingConfig {
    pub image_prefix: String,
    pub mask_prefix: String,
    /// File extension, which also selects the encoder
    pub format: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            image_prefix: "img".to_string(),
            mask_prefix: "mask".to_string(),
            format: "png".to_string(),
        }
    }
}

impl NamingConfig {
    pub fn image_name(&self, index: u64) -> String {
        format!("{}_{}.{}", self.image_prefix, index, self.format)
    }

    pub fn mask_name(&self, index: u64) -> String {
        format!("{}_{}.{}", self.mask_prefix, index, self.format)
    }

    pub fn image_format(&self) -> Result<ImageFormat> {
        output_format(&self.format)
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_prefix.is_empty() || self.mask_prefix.is_empty() {
            return Err(DataPrepError::InvalidConfig(
                "file name prefixes must not be empty".to_string(),
            ));
        }
        self.image_format().map(|_| ())
    }
}

/// Encoder for an output file extension
pub fn output_format(extension: &str) -> Result<ImageFormat> {
    match ImageFormat::from_extension(extension) {
        Some(
            format @ (ImageFormat::Png
            | ImageFormat::Jpeg
            | ImageFormat::Bmp
            | ImageFormat::Tiff),
        ) => Ok(format),
        _ => Err(DataPrepError::InvalidConfig(format!(
            "unsupported output format '{extension}'"
        ))),
    }
}

/// Where crop/resized samples are kept between augmentation passes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Decode and crop/resize again on every pass
    #[default]
    None,
    Memory,
    /// Lossless PNGs under `directory/<partition>/`, removed after the partition is written
    Disk { directory: PathBuf },
}

/// What to do when `train_count * iterations` exceeds the target count
#[derive(
    Debug, Clone, Copy, Default,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, IntoStaticStr,
    PartialEq, Eq
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OvershootPolicy {
    /// Stop at the target count, never below the natural train size
    #[default]
    Truncate,
    /// Write every item of every pass
    Preserve,
}

/// Everything one split/augment/save run needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    pub images_directory: PathBuf,
    pub masks_directory: PathBuf,
    pub train: PartitionTarget,
    #[serde(default)]
    pub validation: PartitionTarget,
    #[serde(default)]
    pub test: PartitionTarget,
    #[serde(default)]
    pub shape: ShapeSpec,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub stratification: Option<StratificationConfig>,
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    /// Desired number of augmented training items
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub cache: CachePolicy,
    #[serde(default)]
    pub overshoot: OvershootPolicy,
    /// Size of the worker pool, rayon's default when absent
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_target_count() -> usize {
    1000
}

impl PipelineConfig {
    pub fn new(
        images_directory: impl Into<PathBuf>,
        masks_directory: impl Into<PathBuf>,
        train_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            images_directory: images_directory.into(),
            masks_directory: masks_directory.into(),
            train: PartitionTarget::new(train_directory, 0),
            validation: PartitionTarget::disabled(),
            test: PartitionTarget::disabled(),
            shape: ShapeSpec::default(),
            split: SplitConfig::default(),
            stratification: None,
            augmentation: AugmentationConfig::default(),
            target_count: default_target_count(),
            naming: NamingConfig::default(),
            cache: CachePolicy::default(),
            overshoot: OvershootPolicy::default(),
            workers: None,
        }
    }

    pub fn partition(&self, kind: PartitionKind) -> &PartitionTarget {
        match kind {
            PartitionKind::Train => &self.train,
            PartitionKind::Validation => &self.validation,
            PartitionKind::Test => &self.test,
        }
    }

    /// Reject configurations that cannot run, before touching the filesystem
    pub fn validate(&self) -> Result<()> {
        if !self.train.is_enabled() {
            return Err(DataPrepError::InvalidConfig(
                "the train partition requires an output directory".to_string(),
            ));
        }

        for (name, fraction) in [("val_size", self.split.val_size), ("test_size", self.split.test_size)] {
            if !(0.0..1.0).contains(&fraction) {
                return Err(DataPrepError::InvalidConfig(format!(
                    "{name} must lie in [0, 1), got {fraction}"
                )));
            }
        }
        if self.split.val_size + self.split.test_size > 1.0 {
            return Err(DataPrepError::InvalidConfig(format!(
                "val_size + test_size must not exceed 1, got {}",
                self.split.val_size + self.split.test_size
            )));
        }

        if self.augmentation.probability_denominator == 0 {
            return Err(DataPrepError::InvalidConfig(
                "probability_denominator must be at least 1".to_string(),
            ));
        }

        if let Some(stratification) = &self.stratification {
            if stratification.attribute.is_empty() {
                return Err(DataPrepError::InvalidConfig(
                    "stratification attribute must not be empty".to_string(),
                ));
            }
        }

        if self.workers == Some(0) {
            return Err(DataPrepError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }

        self.shape.validate()?;
        self.naming.validate()
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| DataPrepError::path_io(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| DataPrepError::path_io(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Pick the loader from the file extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(DataPrepError::UnsupportedFileFormat(path.display().to_string())),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_toml()?).map_err(|e| DataPrepError::path_io(path, e))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|e| DataPrepError::path_io(path, e))
    }
}
