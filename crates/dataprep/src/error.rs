use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataPrepError {
    #[error("Failed to decode or encode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error at {path}: {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Directory contains no images: {0}")]
    EmptyDirectory(PathBuf),

    #[error("Found {images} images but {masks} masks")]
    PairCountMismatch { images: usize, masks: usize },

    #[error("Shape mismatch for {path}: expected {expected_height}x{expected_width}, got {height}x{width}")]
    ShapeMismatch {
        path: PathBuf,
        expected_height: u32,
        expected_width: u32,
        height: u32,
        width: u32,
    },

    #[error("Mask is {mask_height}x{mask_width} but its image is {image_height}x{image_width}")]
    PairShapeMismatch {
        image_height: u32,
        image_width: u32,
        mask_height: u32,
        mask_width: u32,
    },

    #[error("More than one source would be written as '{0}'")]
    DuplicateOutputName(String),

    #[error("Crop box (offset {offset_height},{offset_width} size {target_height}x{target_width}) exceeds source bounds {height}x{width}")]
    CropOutOfBounds {
        offset_height: u32,
        offset_width: u32,
        target_height: u32,
        target_width: u32,
        height: u32,
        width: u32,
    },

    #[error("Unsupported pixel layout: {0}")]
    UnsupportedPixelLayout(String),

    #[error("The {partition} partition is empty although its fraction is {fraction}")]
    EmptyPartition { partition: String, fraction: f64 },

    #[error(
        "At least one of the non-empty bins of stratification attribute '{attribute}' contains only one element. \
         Choose a different stratification attribute, or increase val_size and test_size."
    )]
    SingleMemberBin { attribute: String },

    #[error("Stratified split of attribute '{attribute}' cannot place {required} bins into a subset of {available} samples")]
    TooFewSamplesForBins {
        attribute: String,
        required: usize,
        available: usize,
    },

    #[error("Visual attribute table is missing column '{0}'")]
    MissingAttribute(String),

    #[error("Visual attribute table column '{column}' has a non-numeric value '{value}' at row {row}")]
    NonNumericAttribute { column: String, row: usize, value: String },

    #[error("Visual attribute table has {rows} rows but there are {pairs} image/mask pairs")]
    AttributeRowMismatch { rows: usize, pairs: usize },

    #[error("Unsupported file format: {0}")]
    UnsupportedFileFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{error}: {description}")]
    Validation { error: String, description: String },

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Coarse category of a [`DataPrepError`], reported to callers alongside the message.
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, IntoStaticStr,
    PartialEq, Eq
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InputShape,
    Stratification,
    Io,
    Configuration,
    Validation,
    AttributeTable,
}

impl DataPrepError {
    /// Classify the error for structured reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Image(_) | Self::PathIo { .. } | Self::WorkerPool(_) => ErrorKind::Io,
            Self::EmptyDirectory(_)
            | Self::PairCountMismatch { .. }
            | Self::ShapeMismatch { .. }
            | Self::PairShapeMismatch { .. }
            | Self::DuplicateOutputName(_)
            | Self::CropOutOfBounds { .. }
            | Self::UnsupportedPixelLayout(_)
            | Self::EmptyPartition { .. } => ErrorKind::InputShape,
            Self::SingleMemberBin { .. } | Self::TooFewSamplesForBins { .. } => {
                ErrorKind::Stratification
            }
            Self::Serialization(_)
            | Self::Csv(_)
            | Self::MissingAttribute(_)
            | Self::NonNumericAttribute { .. }
            | Self::AttributeRowMismatch { .. } => ErrorKind::AttributeTable,
            Self::Toml(_)
            | Self::TomlSer(_)
            | Self::UnsupportedFileFormat(_)
            | Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    pub(crate) fn path_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PathIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataPrepError>;
