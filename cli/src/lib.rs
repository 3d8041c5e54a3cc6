use dataprep::{DataPrepError, PrepCommand};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    PrepError(#[from] DataPrepError),
    #[error("Job file contains no commands")]
    EmptyJob,
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// One named step of a job file
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct JobStep {
    pub name: String,
    pub description: Option<String>,
    pub command: PrepCommand,
}

/// A batch of commands run in order
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct JobFile {
    #[serde(default)]
    pub workers: Option<usize>,
    pub steps: Vec<JobStep>,
}

impl JobFile {
    /// Load a job from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CliError> {
        let job: JobFile = toml::from_str(content)?;
        job.check()
    }

    /// Load a job from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, CliError> {
        let job: JobFile = serde_json::from_str(content)?;
        job.check()
    }

    /// Auto-detect file format and load the job
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(CliError::UnsupportedFileFormat),
        }
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CliError> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, CliError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CliError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, CliError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    /// Get the JSON schema of job files
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(JobFile)
    }

    fn check(self) -> Result<Self, CliError> {
        if self.steps.is_empty() {
            return Err(CliError::EmptyJob);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataprep::{FolderResizeConfig, PipelineConfig};

    fn job() -> JobFile {
        JobFile {
            workers: Some(2),
            steps: vec![
                JobStep {
                    name: "thumbnails".to_string(),
                    description: None,
                    command: PrepCommand::ResizeFolder {
                        config: FolderResizeConfig::new("uploads", "thumbs"),
                    },
                },
                JobStep {
                    name: "split".to_string(),
                    description: Some("train/val split".to_string()),
                    command: PrepCommand::SplitAugment {
                        config: PipelineConfig::new("data/images", "data/masks", "out/train"),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_job_file_round_trip() {
        let dir = tempfile::tempdir().expect("Should create temp dir");

        let json_path = dir.path().join("job.json");
        job().to_json_file(&json_path).expect("Should write JSON");
        assert_eq!(JobFile::from_file(&json_path).expect("Should load JSON"), job());

        let toml_path = dir.path().join("job.toml");
        job().to_toml_file(&toml_path).expect("Should write TOML");
        assert_eq!(JobFile::from_file(&toml_path).expect("Should load TOML"), job());
    }

    #[test]
    fn test_rejects_empty_and_unknown_jobs() {
        assert!(matches!(
            JobFile::from_json(r#"{"steps": []}"#),
            Err(CliError::EmptyJob)
        ));
        assert!(matches!(
            JobFile::from_file("job.yaml"),
            Err(CliError::UnsupportedFileFormat)
        ));
    }
}
