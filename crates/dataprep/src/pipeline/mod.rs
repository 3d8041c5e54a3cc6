//! The split/augment/save orchestrator.
//!
//! A run walks `Initialized → PathsDiscovered → Split → TrainWritten →
//! [ValWritten] → [TestWritten] → Completed`, or ends in `Failed` from any
//! state. Runs do not retry; callers start a fresh run instead.

pub mod builder;
pub mod loader;
pub mod resizer;
pub mod writer;

use rand::Rng;
use rayon::{ThreadPool, ThreadPoolBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::{debug, error, info, warn};

use crate::{
    algorithms::{
        augmentation::Augmenter,
        binning::BinSpec,
        splitting::{self, SplitPlan, Splitter},
    },
    config::{OvershootPolicy, PipelineConfig},
    error::{DataPrepError, ErrorKind, Result},
    io::{attributes::VisualAttributeTable, images::{discover_pairs, ensure_dir}},
    types::{ImageMaskPair, PartitionCounts, PartitionKind},
};

use self::{
    builder::PipelineBuilder,
    loader::SampleLoader,
    writer::{PartitionJob, PartitionWriter},
};

/// Progress of one run
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, IntoStaticStr,
    PartialEq, Eq
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Initialized,
    PathsDiscovered,
    Split,
    TrainWritten,
    ValWritten,
    TestWritten,
    Completed,
    Failed,
}

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub seed: u64,
    pub iterations: usize,
    /// Source pairs per partition after splitting
    pub split: PartitionCounts,
    /// Pairs written per partition
    pub written: PartitionCounts,
    /// Name of the stratification attribute, if the split was stratified
    pub stratified_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&DataPrepError> for RunError {
    fn from(err: &DataPrepError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome handed back to the calling layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunResult {
    pub success: bool,
    pub counts: PartitionCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl From<Result<RunReport>> for RunResult {
    fn from(result: Result<RunReport>) -> Self {
        match result {
            Ok(report) => Self {
                success: true,
                counts: report.written,
                seed: Some(report.seed),
                error: None,
            },
            Err(err) => Self {
                success: false,
                counts: PartitionCounts::default(),
                seed: None,
                error: Some(RunError::from(&err)),
            },
        }
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = %state, to = %next, "Run state");
    *state = next;
}

/// Splits an image/mask dataset, augments the training part and saves every partition
pub struct Pipeline {
    config: PipelineConfig,
    augmenter: Augmenter,
    state: RunState,
}

pub type DataSplitterAugmenterAndSaver = Pipeline;

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Validate `config` and build the augmentation chain it enables
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let augmenter = Augmenter::from_config(&config.augmentation);
        Self::with_augmenter(config, augmenter)
    }

    /// Use a custom augmentation chain instead of the one `config` enables
    pub fn with_augmenter(config: PipelineConfig, augmenter: Augmenter) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            augmenter,
            state: RunState::Initialized,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Get information about the pipeline configuration
    pub fn info(&self) -> String {
        format!(
            "Pipeline: augmentation {:?}, val {}, test {}, target {}",
            self.augmenter.names(),
            self.config.validation.is_enabled(),
            self.config.test.is_enabled(),
            self.config.target_count
        )
    }

    /// Run end to end and report to the calling layer; never fails
    pub fn execute(&mut self) -> RunResult {
        RunResult::from(self.run())
    }

    /// Run end to end
    pub fn run(&mut self) -> Result<RunReport> {
        self.state = RunState::Initialized;
        let result = self.run_stages();
        if let Err(err) = &result {
            error!(state = %self.state, kind = %err.kind(), "Run failed: {err}");
            self.state = RunState::Failed;
        }
        result
    }

    fn run_stages(&mut self) -> Result<RunReport> {
        self.config.validate()?;

        let seed = match self.config.split.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::thread_rng().gen_range(0..=1000);
                info!(seed, "No seed configured, drew one");
                seed
            }
        };

        let pairs = discover_pairs(&self.config.images_directory, &self.config.masks_directory)?;
        let loader = SampleLoader::from_shape(&self.config.shape)?.fit_source(&pairs[0].image)?;
        transition(&mut self.state, RunState::PathsDiscovered);

        let (plan, stratified_on) = self.split(&pairs, seed)?;
        transition(&mut self.state, RunState::Split);

        let augment = !self.augmenter.is_identity();
        let iterations = splitting::iterations(self.config.target_count, plan.train.len(), augment);
        info!(
            train = plan.train.len(),
            validation = plan.validation.len(),
            test = plan.test.len(),
            iterations,
            "Split dataset"
        );

        let pool = self.worker_pool()?;
        let writer = PartitionWriter {
            loader: &loader,
            augmenter: &self.augmenter,
            naming: &self.config.naming,
            cache: &self.config.cache,
            pool: &pool,
            seed,
        };

        let mut written = PartitionCounts::default();
        for kind in [PartitionKind::Train, PartitionKind::Validation, PartitionKind::Test] {
            let Some(job) = self.job(kind, &plan, iterations, augment)? else {
                continue;
            };
            written.set(kind, writer.write(&job)?);
            let next = match kind {
                PartitionKind::Train => RunState::TrainWritten,
                PartitionKind::Validation => RunState::ValWritten,
                PartitionKind::Test => RunState::TestWritten,
            };
            transition(&mut self.state, next);
        }

        transition(&mut self.state, RunState::Completed);
        info!(total = written.total(), ?written, "Run completed");

        Ok(RunReport {
            seed,
            iterations,
            split: plan.counts(),
            written,
            stratified_on,
        })
    }

    /// Fraction actually cut for a partition; disabled partitions get none
    fn effective_fraction(&self, kind: PartitionKind, fraction: f64) -> f64 {
        if self.config.partition(kind).is_enabled() {
            return fraction;
        }
        if fraction > 0.0 {
            warn!(partition = %kind, fraction, "Partition has no output directory, skipping its split");
        }
        0.0
    }

    fn split(&self, pairs: &[ImageMaskPair], seed: u64) -> Result<(SplitPlan, Option<String>)> {
        let splitter = Splitter::new(
            self.effective_fraction(PartitionKind::Validation, self.config.split.val_size),
            self.effective_fraction(PartitionKind::Test, self.config.split.test_size),
            seed,
        );

        let Some(stratification) = &self.config.stratification else {
            return Ok((splitter.split(pairs)?, None));
        };

        let required = stratification.required_columns();
        let table = VisualAttributeTable::from_file(&stratification.table_path, Some(&required))?;
        table.check_rows(pairs.len())?;

        let values = table.column(&stratification.attribute)?;
        let bins = BinSpec::fit(stratification.attribute.clone(), values);
        debug!(attribute = %bins.attribute, edges = ?bins.edges, counts = ?bins.counts, "Binned stratification attribute");

        let plan = splitter.split_stratified(pairs, &stratification.attribute, &bins.labels(values))?;
        Ok((plan, Some(stratification.attribute.clone())))
    }

    fn job<'p>(
        &self,
        kind: PartitionKind,
        plan: &'p SplitPlan,
        iterations: usize,
        augment: bool,
    ) -> Result<Option<PartitionJob<'p>>> {
        let target = self.config.partition(kind);
        let (Some(image_dir), Some(mask_dir)) = (target.image_dir(), target.mask_dir()) else {
            return Ok(None);
        };
        ensure_dir(&image_dir)?;
        ensure_dir(&mask_dir)?;

        let pairs = plan.pairs(kind);
        let augment = match kind {
            PartitionKind::Train => augment,
            PartitionKind::Validation => augment && self.config.augmentation.augment_validation_data,
            PartitionKind::Test => false,
        };
        let iterations = if augment { iterations } else { 1 };
        let limit = match (kind, augment, self.config.overshoot) {
            (PartitionKind::Train, true, OvershootPolicy::Truncate) => {
                Some(self.config.target_count.max(pairs.len()))
            }
            _ => None,
        };

        Ok(Some(PartitionJob {
            kind,
            pairs,
            image_dir,
            mask_dir,
            start_index: target.start_index,
            iterations,
            limit,
            augment,
        }))
    }

    fn worker_pool(&self) -> Result<ThreadPool> {
        let mut builder = ThreadPoolBuilder::new();
        if let Some(workers) = self.config.workers {
            builder = builder.num_threads(workers);
        }
        Ok(builder.build()?)
    }
}
