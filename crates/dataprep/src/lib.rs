//! # Segmentation Dataset Preparation Library
//!
//! Turns a folder of images and a parallel folder of label masks into
//! train/validation/test partitions ready for training a segmentation model.
//!
//! ## Core Features
//!
//! - **Natural ordering**: `img_2.png` sorts before `img_10.png`, so images and masks pair by position
//! - **Splitting**: seeded shuffle split, or stratified on Doane-binned visual attributes
//! - **Joint augmentation**: rotation, random crop, flips and colour jitter applied to image and mask alike
//! - **Deterministic output**: each item's random stream depends only on the seed and its position
//! - **Folder resizing**: crop/resize a folder or an image/mask folder pair, optionally into tiles
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dataprep::Pipeline;
//!
//! let mut pipeline = Pipeline::builder()
//!     .images_directory("data/images")
//!     .masks_directory("data/masks")
//!     .train("out/train", 0)
//!     .validation("out/val", 0)
//!     .test("out/test", 0)
//!     .target_size(256, 256)
//!     .seed(42)
//!     .build()?;
//!
//! let report = pipeline.run()?;
//! println!("wrote {} training pairs", report.written.train);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Custom Augmentation
//!
//! ```rust,no_run
//! use dataprep::{Pipeline, algorithms::*};
//!
//! let pipeline = Pipeline::builder()
//!     .images_directory("data/images")
//!     .masks_directory("data/masks")
//!     .train("out/train", 0)
//!     .add_transform(RandomRotate::new(Gate::new(4)))
//!     .add_transform(FlipLeftRight { gate: Gate::new(2) })
//!     .build()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Core modules
pub mod error;
pub mod types;
pub mod traits;
pub mod algorithms;
pub mod config;
pub mod pipeline;
pub mod io;
pub mod manager;

// Re-exports for convenience
pub use error::{DataPrepError, ErrorKind, Result};
pub use types::{ImageMaskPair, ImageSize, CropBox, PartitionCounts, PartitionKind, Sample, ShapeSpec};
pub use traits::*;
pub use config::{
    AugmentationConfig, CachePolicy, NamingConfig, OvershootPolicy, PartitionTarget,
    PipelineConfig, SplitConfig, StratificationConfig,
};
pub use pipeline::{
    builder::PipelineBuilder,
    resizer::{
        FolderResizeConfig, FolderResizer, ImageAndMaskCropperResizerAndSaver,
        ImageCropperResizerAndSaver, OutputNaming, PairResizeConfig, PairResizer, TileGrid,
    },
    DataSplitterAugmenterAndSaver, Pipeline, RunReport, RunResult, RunState,
};
pub use manager::{CommandOutput, PrepCommand, PrepManager};
