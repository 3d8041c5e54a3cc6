use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use strum::{Display, IntoStaticStr, VariantNames};
use tracing::info;

use crate::{
    config::PipelineConfig,
    error::Result,
    io::attributes::{validate_stratification_file, AttributeStats, VisualAttributeTable},
    pipeline::{
        resizer::{FolderResizeConfig, FolderResizer, PairResizeConfig, PairResizer},
        Pipeline, RunResult,
    },
};

#[derive(
    Debug, Clone,
    Serialize, Deserialize, JsonSchema,
    Display, VariantNames, IntoStaticStr,
    PartialEq
)]
#[serde(tag = "type", content = "params")]
#[strum(serialize_all = "snake_case")]
pub enum PrepCommand {
    /// Split a dataset, augment the training partition and save every partition
    #[serde(rename = "split_augment")]
    SplitAugment { config: PipelineConfig },

    /// Crop/resize one folder of images
    #[serde(rename = "resize_folder")]
    ResizeFolder { config: FolderResizeConfig },

    /// Crop/resize an image folder and its mask folder together
    #[serde(rename = "resize_pairs")]
    ResizePairs { config: PairResizeConfig },

    /// Check an uploaded CSV of visual attributes
    #[serde(rename = "validate_stratification_file")]
    ValidateStratificationFile {
        path: PathBuf,
        #[schemars(range(min = 1))]
        expected_rows: usize,
    },

    /// Summary statistics of a visual attribute table
    #[serde(rename = "describe_attributes")]
    DescribeAttributes {
        path: PathBuf,
        #[serde(default)]
        columns: Option<Vec<String>>,
    },
}

impl PrepCommand {
    /// Get the JSON schema for all commands
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PrepCommand)
    }

    /// Get a list of all available command names
    pub fn command_names() -> &'static [&'static str] {
        <Self as VariantNames>::VARIANTS
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SplitAugment { .. } => "Split images and masks into train/val/test, augment the training data and save it",
            Self::ResizeFolder { .. } => "Crop and resize a folder of images, optionally cutting a grid of tiles",
            Self::ResizePairs { .. } => "Crop and resize an image folder and its mask folder with matching names",
            Self::ValidateStratificationFile { .. } => "Validate and sort a CSV of visual attributes, deleting it when invalid",
            Self::DescribeAttributes { .. } => "Report count, mean, std, min and max of visual attribute columns",
        }
    }
}

/// What a command produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum CommandOutput {
    Run(RunResult),
    Resized { written: usize },
    Columns(Vec<String>),
    Attributes(Vec<AttributeStats>),
}

/// Runs [`PrepCommand`]s, filling in a worker count where a command leaves it open
#[derive(Debug, Clone, Default)]
pub struct PrepManager {
    workers: Option<usize>,
}

impl PrepManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn execute(&self, command: PrepCommand) -> Result<CommandOutput> {
        info!(command = %command, "Executing command");

        match command {
            PrepCommand::SplitAugment { mut config } => {
                config.workers = config.workers.or(self.workers);
                let mut pipeline = Pipeline::new(config)?;
                Ok(CommandOutput::Run(pipeline.execute()))
            }
            PrepCommand::ResizeFolder { mut config } => {
                config.workers = config.workers.or(self.workers);
                let written = FolderResizer::new(config)?.run()?;
                Ok(CommandOutput::Resized { written })
            }
            PrepCommand::ResizePairs { mut config } => {
                config.workers = config.workers.or(self.workers);
                let written = PairResizer::new(config)?.run()?;
                Ok(CommandOutput::Resized { written })
            }
            PrepCommand::ValidateStratificationFile { path, expected_rows } => {
                Ok(CommandOutput::Columns(validate_stratification_file(&path, expected_rows)?))
            }
            PrepCommand::DescribeAttributes { path, columns } => {
                let table = VisualAttributeTable::from_file(&path, columns.as_deref())?;
                Ok(CommandOutput::Attributes(table.stats()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_command_names() {
        assert_eq!(
            PrepCommand::command_names(),
            &[
                "split_augment",
                "resize_folder",
                "resize_pairs",
                "validate_stratification_file",
                "describe_attributes"
            ]
        );
    }

    #[test]
    fn test_command_serialization() {
        let json = r#"{"type": "validate_stratification_file", "params": {"path": "attrs.csv", "expected_rows": 4}}"#;
        let command: PrepCommand = serde_json::from_str(json).expect("Should parse command");
        assert_eq!(
            command,
            PrepCommand::ValidateStratificationFile {
                path: PathBuf::from("attrs.csv"),
                expected_rows: 4
            }
        );
        assert_eq!(command.to_string(), "validate_stratification_file");

        let json = r#"{"type": "resize_folder", "params": {"config": {"images_directory": "in", "output_directory": "out"}}}"#;
        let command: PrepCommand = serde_json::from_str(json).expect("Should parse command");
        let PrepCommand::ResizeFolder { config } = command else {
            panic!("Should be a resize command");
        };
        assert_eq!(config.prefix, "img");
        assert_eq!(config.channels, 3);
    }

    #[test]
    fn test_schema_lists_every_command() {
        let schema = serde_json::to_string(&PrepCommand::schema()).expect("Should serialize schema");
        for name in PrepCommand::command_names() {
            assert!(schema.contains(name), "schema is missing {name}");
        }
    }

    #[test]
    fn test_describe_attributes() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join("attrs.csv");
        fs::write(&path, "image_id,area,hue\nimg_1,1,10\nimg_2,3,20\n").expect("Should write table");

        let output = PrepManager::new()
            .execute(PrepCommand::DescribeAttributes {
                path,
                columns: Some(vec!["area".to_string()]),
            })
            .expect("Should describe");
        let CommandOutput::Attributes(stats) = output else {
            panic!("Should return attribute stats");
        };
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].attribute, "area");
        assert_eq!(stats[0].mean, 2.0);
    }

    #[test]
    fn test_split_augment_reports_failure_in_result() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let config = PipelineConfig::new(dir.path().join("nope"), dir.path().join("nope"), dir.path().join("train"));

        let output = PrepManager::new()
            .with_workers(1)
            .execute(PrepCommand::SplitAugment { config })
            .expect("Should return a run result");
        let CommandOutput::Run(result) = output else {
            panic!("Should return a run result");
        };
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
