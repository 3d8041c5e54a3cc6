use clap::{Parser, Subcommand};
use cli::JobFile;
use color_eyre::eyre::{eyre, Result};
use dataprep::{
    io::validate_stratification_file, CommandOutput, FolderResizeConfig, FolderResizer, ImageSize,
    OutputNaming, PartitionTarget, Pipeline, PipelineConfig, PrepCommand, PrepManager,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split, augment and save a dataset described by a configuration file
    Run {
        /// Path to the TOML or JSON pipeline configuration
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run every step of a job file in order
    Job {
        /// Path to the TOML or JSON job file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Resize a folder of images
    Resize {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        width: Option<u32>,
        /// Keep the source file names instead of numbering outputs
        #[arg(long)]
        keep_names: bool,
        #[arg(long, default_value = "0")]
        start_index: u64,
        #[arg(long, default_value = "img")]
        prefix: String,
        #[arg(long, default_value = "png")]
        format: String,
    },
    /// Validate a CSV of visual attributes; the file is deleted when invalid
    Validate {
        #[arg(short, long)]
        path: PathBuf,
        /// Number of image/mask pairs the table must describe
        #[arg(short, long)]
        rows: usize,
    },
    /// Write a skeleton pipeline configuration with the default settings
    Skeleton {
        #[arg(long)]
        images: PathBuf,
        #[arg(long)]
        masks: PathBuf,
        /// Output root; train, val and test directories are created under it
        #[arg(short, long)]
        output_dir: PathBuf,
        /// Where to save the configuration (.toml or .json)
        #[arg(short, long)]
        config_output: PathBuf,
    },
    /// Print the JSON schema of commands and job files
    Schema,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { config } => run_pipeline(config)?,
        Commands::Job { file } => run_job(file)?,
        Commands::Resize {
            input,
            output,
            height,
            width,
            keep_names,
            start_index,
            prefix,
            format,
        } => {
            let mut config = FolderResizeConfig::new(input, output);
            config.target = match (height, width) {
                (Some(height), Some(width)) => Some(ImageSize::new(*height, *width)),
                (None, None) => None,
                _ => return Err(eyre!("--height and --width must be given together")),
            };
            config.naming = if *keep_names {
                OutputNaming::OriginalNames
            } else {
                OutputNaming::Sequential { start_index: *start_index }
            };
            config.prefix = prefix.clone();
            config.format = format.clone();

            let written = FolderResizer::new(config)?.run()?;
            info!("✅ Resized {} images into {:?}", written, output);
        }
        Commands::Validate { path, rows } => {
            let columns = validate_stratification_file(path, *rows)?;
            info!("✅ {:?} is valid with {} attribute columns", path, columns.len());
            println!("{}", serde_json::to_string_pretty(&columns)?);
        }
        Commands::Skeleton {
            images,
            masks,
            output_dir,
            config_output,
        } => write_skeleton(images, masks, output_dir, config_output)?,
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&PrepCommand::schema())?);
            println!("{}", serde_json::to_string_pretty(&JobFile::schema())?);
        }
    }

    Ok(())
}

fn run_pipeline(config_path: &Path) -> Result<()> {
    let config = PipelineConfig::from_file(config_path)?;
    info!("Pipeline configuration: {:?}", config_path);

    let mut pipeline = Pipeline::new(config)?;
    info!("{}", pipeline.info());
    let result = pipeline.execute();
    println!("{}", serde_json::to_string_pretty(&result)?);

    match result.error {
        None => {
            info!("✅ Dataset written");
            Ok(())
        }
        Some(err) => Err(eyre!("{} error: {}", err.kind, err.message)),
    }
}

fn run_job(file: &Path) -> Result<()> {
    let job = JobFile::from_file(file)?;
    let mut manager = PrepManager::new();
    if let Some(workers) = job.workers {
        manager = manager.with_workers(workers);
    }

    let total = job.steps.len();
    let mut failures = 0;
    for (i, step) in job.steps.into_iter().enumerate() {
        info!("[{}/{}] {} ({})", i + 1, total, step.name, step.command);
        if let Some(description) = &step.description {
            info!("  {}", description);
        }

        match manager.execute(step.command) {
            Ok(CommandOutput::Run(result)) if !result.success => {
                warn!("Step '{}' failed: {:?}", step.name, result.error);
                failures += 1;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Ok(output) => println!("{}", serde_json::to_string_pretty(&output)?),
            Err(err) => {
                error!("Step '{}' failed: {}", step.name, err);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(eyre!("{} of {} steps failed", failures, total));
    }
    info!("✅ Job completed");
    Ok(())
}

fn write_skeleton(images: &Path, masks: &Path, output_dir: &Path, config_output: &Path) -> Result<()> {
    let mut config = PipelineConfig::new(images, masks, output_dir.join("train"));
    config.validation = PartitionTarget::new(output_dir.join("val"), 0);
    config.test = PartitionTarget::new(output_dir.join("test"), 0);

    match config_output.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => config.to_toml_file(config_output)?,
        Some("json") => config.to_json_file(config_output)?,
        _ => return Err(eyre!("configuration output must end in .toml or .json")),
    }

    info!("📄 Configuration saved to: {:?}", config_output);
    Ok(())
}
