use std::path::PathBuf;

use crate::{
    algorithms::augmentation::Augmenter,
    config::{
        AugmentationConfig, CachePolicy, NamingConfig, OvershootPolicy, PartitionTarget,
        PipelineConfig, SplitConfig, StratificationConfig,
    },
    error::{DataPrepError, Result},
    pipeline::Pipeline,
    traits::JointTransform,
    types::{CropBox, ImageSize, ShapeSpec},
};

/// Builder for split/augment/save runs with a fluent API
pub struct PipelineBuilder {
    images_directory: Option<PathBuf>,
    masks_directory: Option<PathBuf>,
    train: PartitionTarget,
    validation: PartitionTarget,
    test: PartitionTarget,
    shape: ShapeSpec,
    split: SplitConfig,
    stratification: Option<StratificationConfig>,
    augmentation: AugmentationConfig,
    custom_augmenter: Option<Augmenter>,
    target_count: usize,
    naming: NamingConfig,
    cache: CachePolicy,
    overshoot: OvershootPolicy,
    workers: Option<usize>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        let defaults = PipelineConfig::new("", "", "");
        Self {
            images_directory: None,
            masks_directory: None,
            train: PartitionTarget::disabled(),
            validation: PartitionTarget::disabled(),
            test: PartitionTarget::disabled(),
            shape: defaults.shape,
            split: defaults.split,
            stratification: None,
            augmentation: defaults.augmentation,
            custom_augmenter: None,
            target_count: defaults.target_count,
            naming: defaults.naming,
            cache: defaults.cache,
            overshoot: defaults.overshoot,
            workers: None,
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: PipelineConfig) -> Self {
        Self {
            images_directory: Some(config.images_directory),
            masks_directory: Some(config.masks_directory),
            train: config.train,
            validation: config.validation,
            test: config.test,
            shape: config.shape,
            split: config.split,
            stratification: config.stratification,
            augmentation: config.augmentation,
            custom_augmenter: None,
            target_count: config.target_count,
            naming: config.naming,
            cache: config.cache,
            overshoot: config.overshoot,
            workers: config.workers,
        }
    }

    pub fn images_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.images_directory = Some(dir.into());
        self
    }

    pub fn masks_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.masks_directory = Some(dir.into());
        self
    }

    /// Write the training partition under `dir`, numbering files from `start_index`
    pub fn train(mut self, dir: impl Into<PathBuf>, start_index: u64) -> Self {
        self.train = PartitionTarget::new(dir, start_index);
        self
    }

    pub fn validation(mut self, dir: impl Into<PathBuf>, start_index: u64) -> Self {
        self.validation = PartitionTarget::new(dir, start_index);
        self
    }

    pub fn test(mut self, dir: impl Into<PathBuf>, start_index: u64) -> Self {
        self.test = PartitionTarget::new(dir, start_index);
        self
    }

    pub fn channels(mut self, image_channels: u8, mask_channels: u8) -> Self {
        self.shape.image_channels = image_channels;
        self.shape.mask_channels = mask_channels;
        self
    }

    /// Resize every sample to `height x width`
    pub fn target_size(mut self, height: u32, width: u32) -> Self {
        self.shape.target = Some(ImageSize::new(height, width));
        self
    }

    /// Crop a fixed box out of every source before resizing
    pub fn crop(mut self, crop: CropBox) -> Self {
        self.shape.crop = Some(crop);
        self
    }

    pub fn val_size(mut self, fraction: f64) -> Self {
        self.split.val_size = fraction;
        self
    }

    pub fn test_size(mut self, fraction: f64) -> Self {
        self.split.test_size = fraction;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.split.seed = Some(seed);
        self
    }

    /// Stratify the split on `attribute` of the table at `table_path`
    pub fn stratify(mut self, table_path: impl Into<PathBuf>, attribute: impl Into<String>) -> Self {
        self.stratification = Some(StratificationConfig::new(table_path, attribute));
        self
    }

    pub fn augmentation(mut self, augmentation: AugmentationConfig) -> Self {
        self.augmentation = augmentation;
        self
    }

    /// Append a transform to a custom augmentation chain.
    ///
    /// Once called, the augmentation config no longer selects transforms.
    /// Only its `augment_validation_data` flag still applies.
    pub fn add_transform<T>(mut self, transform: T) -> Self
    where
        T: JointTransform + 'static,
    {
        let augmenter = self.custom_augmenter.take().unwrap_or_default();
        self.custom_augmenter = Some(augmenter.add_transform(transform));
        self
    }

    pub fn target_count(mut self, count: usize) -> Self {
        self.target_count = count;
        self
    }

    pub fn naming(mut self, naming: NamingConfig) -> Self {
        self.naming = naming;
        self
    }

    /// Output file extension, e.g. `png` or `jpg`
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.naming.format = format.into();
        self
    }

    pub fn cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    pub fn overshoot(mut self, overshoot: OvershootPolicy) -> Self {
        self.overshoot = overshoot;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// The configuration this builder describes
    pub fn config(&self) -> Result<PipelineConfig> {
        let missing = |what: &str| DataPrepError::InvalidConfig(format!("{what} directory is required"));
        Ok(PipelineConfig {
            images_directory: self.images_directory.clone().ok_or_else(|| missing("images"))?,
            masks_directory: self.masks_directory.clone().ok_or_else(|| missing("masks"))?,
            train: self.train.clone(),
            validation: self.validation.clone(),
            test: self.test.clone(),
            shape: self.shape.clone(),
            split: self.split.clone(),
            stratification: self.stratification.clone(),
            augmentation: self.augmentation.clone(),
            target_count: self.target_count,
            naming: self.naming.clone(),
            cache: self.cache.clone(),
            overshoot: self.overshoot,
            workers: self.workers,
        })
    }

    /// Validate and build the pipeline
    pub fn build(mut self) -> Result<Pipeline> {
        let config = self.config()?;
        match self.custom_augmenter.take() {
            Some(augmenter) => Pipeline::with_augmenter(config, augmenter),
            None => Pipeline::new(config),
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::augmentation::{FlipLeftRight, Gate};

    #[test]
    fn test_builder_produces_config() {
        let builder = PipelineBuilder::new()
            .images_directory("in/images")
            .masks_directory("in/masks")
            .train("out/train", 100)
            .validation("out/val", 0)
            .target_size(32, 32)
            .val_size(0.25)
            .seed(7)
            .format("jpg")
            .workers(2);

        let config = builder.config().expect("Should assemble config");
        assert_eq!(config.train.start_index, 100);
        assert!(config.validation.is_enabled());
        assert!(!config.test.is_enabled());
        assert_eq!(config.shape.target, Some(ImageSize::new(32, 32)));
        assert_eq!(config.split.seed, Some(7));
        assert_eq!(config.naming.image_name(1), "img_1.jpg");

        let pipeline = builder.build().expect("Should build");
        assert_eq!(pipeline.config().workers, Some(2));
    }

    #[test]
    fn test_builder_requires_input_directories() {
        let result = PipelineBuilder::new().train("out", 0).build();
        assert!(matches!(result, Err(DataPrepError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        let result = PipelineBuilder::new()
            .images_directory("in/images")
            .masks_directory("in/masks")
            .train("out", 0)
            .channels(5, 1)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_transforms_replace_toggles() {
        let pipeline = PipelineBuilder::new()
            .images_directory("in/images")
            .masks_directory("in/masks")
            .train("out", 0)
            .add_transform(FlipLeftRight { gate: Gate::always() })
            .build()
            .expect("Should build");
        assert!(pipeline.info().contains("flip_left_right"));
        assert!(!pipeline.info().contains("random_rotate"));
    }

    #[test]
    fn test_round_trip_through_config() {
        let config = PipelineConfig::new("a", "b", "c");
        let rebuilt = PipelineBuilder::from_config(config.clone()).config().expect("Should assemble");
        assert_eq!(rebuilt, config);
    }
}
