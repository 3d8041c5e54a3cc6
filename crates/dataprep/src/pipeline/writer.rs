//! Streams one partition through crop/resize and augmentation, then writes it.
//!
//! Item `p` of the stream is source pair `p % n` (the list repeated
//! `iterations` times) and is written under index `start_index + p`. Indices
//! and per-item random generators are fixed before work fans out to the pool,
//! so the output does not depend on the number of workers.

use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::{
    algorithms::augmentation::Augmenter,
    config::{CachePolicy, NamingConfig},
    error::{DataPrepError, Result},
    io::images::{decode, ensure_dir, save},
    pipeline::loader::SampleLoader,
    types::{ImageMaskPair, PartitionKind, Sample},
};

/// Work order for one partition
#[derive(Debug, Clone)]
pub struct PartitionJob<'a> {
    pub kind: PartitionKind,
    pub pairs: &'a [ImageMaskPair],
    pub image_dir: PathBuf,
    pub mask_dir: PathBuf,
    pub start_index: u64,
    pub iterations: usize,
    /// Stop after this many items
    pub limit: Option<usize>,
    pub augment: bool,
}

impl PartitionJob<'_> {
    /// Items this job produces
    pub fn item_count(&self) -> usize {
        let total = self.pairs.len() * self.iterations.max(1);
        self.limit.map_or(total, |limit| limit.min(total))
    }
}

/// Generator for item `position` of a partition
pub(crate) fn item_rng(seed: u64, kind: PartitionKind, position: usize) -> StdRng {
    StdRng::seed_from_u64(
        seed.wrapping_add(kind.salt() << 32)
            .wrapping_add(position as u64),
    )
}

/// Where the stream's crop/resized samples come from
enum SampleSource<'a> {
    Fresh(&'a [ImageMaskPair]),
    Memory(Vec<Sample>),
    Disk(PathBuf),
}

impl SampleSource<'_> {
    fn get(&self, index: usize, loader: &SampleLoader) -> Result<Sample> {
        match self {
            Self::Fresh(pairs) => loader.load(&pairs[index]),
            Self::Memory(samples) => Ok(samples[index].clone()),
            Self::Disk(dir) => {
                let (image, mask) = cache_paths(dir, index);
                Ok(Sample::new(
                    decode(&image, loader.image_layout)?,
                    decode(&mask, loader.mask_layout)?,
                ))
            }
        }
    }
}

fn cache_paths(dir: &Path, index: usize) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{index}_image.png")),
        dir.join(format!("{index}_mask.png")),
    )
}

fn remove_cache(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir) {
        warn!(?dir, %err, "Could not remove stream cache");
    }
}

pub struct PartitionWriter<'a> {
    pub loader: &'a SampleLoader,
    pub augmenter: &'a Augmenter,
    pub naming: &'a NamingConfig,
    pub cache: &'a CachePolicy,
    pub pool: &'a ThreadPool,
    pub seed: u64,
}

impl PartitionWriter<'_> {
    /// Write every item of `job`, returning how many pairs were written
    pub fn write(&self, job: &PartitionJob<'_>) -> Result<usize> {
        let count = job.item_count();
        if count == 0 {
            return Ok(0);
        }

        ensure_dir(&job.image_dir)?;
        ensure_dir(&job.mask_dir)?;
        let format = self.naming.image_format()?;

        let source = self.prepare(job)?;
        let n = job.pairs.len();
        debug!(partition = %job.kind, sources = n, iterations = job.iterations, count, "Writing partition");

        let result = self.pool.install(|| {
            (0..count).into_par_iter().try_for_each(|position| {
                let mut sample = source.get(position % n, self.loader)?;
                if job.augment {
                    let mut rng = item_rng(self.seed, job.kind, position);
                    sample = self.augmenter.augment(sample, &mut rng)?;
                }
                self.persist(job, position, &sample, format)
            })
        });

        if let SampleSource::Disk(dir) = &source {
            remove_cache(dir);
        }
        result?;

        info!(partition = %job.kind, count, first = job.start_index, "Partition written");
        Ok(count)
    }

    fn prepare<'p>(&self, job: &PartitionJob<'p>) -> Result<SampleSource<'p>> {
        match self.cache {
            CachePolicy::None => Ok(SampleSource::Fresh(job.pairs)),
            CachePolicy::Memory => {
                let samples = self.pool.install(|| {
                    job.pairs
                        .par_iter()
                        .map(|pair| self.loader.load(pair))
                        .collect::<Result<Vec<_>>>()
                })?;
                Ok(SampleSource::Memory(samples))
            }
            CachePolicy::Disk { directory } => {
                let dir = directory.join(job.kind.to_string());
                ensure_dir(&dir)?;
                let filled = self.pool.install(|| {
                    job.pairs.par_iter().enumerate().try_for_each(|(index, pair)| {
                        let sample = self.loader.load(pair)?;
                        let (image, mask) = cache_paths(&dir, index);
                        save(&sample.image, &image, ImageFormat::Png)?;
                        save(&sample.mask, &mask, ImageFormat::Png)
                    })
                });
                if let Err(err) = filled {
                    remove_cache(&dir);
                    return Err(err);
                }
                Ok(SampleSource::Disk(dir))
            }
        }
    }

    fn persist(
        &self,
        job: &PartitionJob<'_>,
        position: usize,
        sample: &Sample,
        format: ImageFormat,
    ) -> Result<()> {
        let index = job
            .start_index
            .checked_add(position as u64)
            .ok_or_else(|| DataPrepError::InvalidConfig("output index overflows u64".to_string()))?;

        save(&sample.image, &job.image_dir.join(self.naming.image_name(index)), format)?;
        save(&sample.mask, &job.mask_dir.join(self.naming.mask_name(index)), format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AugmentationConfig;
    use crate::types::{ImageSize, ShapeSpec};
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use tempfile::TempDir;

    fn fixtures(dir: &Path, n: usize) -> Vec<ImageMaskPair> {
        (0..n)
            .map(|i| {
                let image = dir.join(format!("img_{i}.png"));
                let mask = dir.join(format!("mask_{i}.png"));
                RgbImage::from_pixel(16, 16, Rgb([i as u8 * 20, 0, 0]))
                    .save(&image)
                    .expect("Should write fixture");
                GrayImage::from_fn(16, 16, |x, _| Luma([(x % 3) as u8]))
                    .save(&mask)
                    .expect("Should write fixture");
                ImageMaskPair::new(image, mask)
            })
            .collect()
    }

    fn loader() -> SampleLoader {
        let shape = ShapeSpec {
            target: Some(ImageSize::new(8, 8)),
            ..ShapeSpec::default()
        };
        SampleLoader::from_shape(&shape).expect("Should build loader")
    }

    fn job<'a>(pairs: &'a [ImageMaskPair], out: &Path, iterations: usize) -> PartitionJob<'a> {
        PartitionJob {
            kind: PartitionKind::Train,
            pairs,
            image_dir: out.join("images"),
            mask_dir: out.join("masks"),
            start_index: 100,
            iterations,
            limit: None,
            augment: true,
        }
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("Should read dir")
            .filter_map(|e| e.ok()?.file_name().into_string().ok())
            .collect();
        crate::algorithms::sorting::sort_names(&mut names);
        names
    }

    #[test]
    fn test_indices_start_at_offset_without_gaps() {
        let src = TempDir::new().expect("Should create temp dir");
        let out = TempDir::new().expect("Should create temp dir");
        let pairs = fixtures(src.path(), 5);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().expect("Should build pool");
        let loader = loader();
        let augmenter = Augmenter::from_config(&AugmentationConfig::disabled());

        let writer = PartitionWriter {
            loader: &loader,
            augmenter: &augmenter,
            naming: &NamingConfig::default(),
            cache: &CachePolicy::None,
            pool: &pool,
            seed: 1,
        };
        let written = writer.write(&job(&pairs, out.path(), 1)).expect("Should write");

        assert_eq!(written, 5);
        assert_eq!(
            listing(&out.path().join("images")),
            vec!["img_100.png", "img_101.png", "img_102.png", "img_103.png", "img_104.png"]
        );
        assert_eq!(listing(&out.path().join("masks")).len(), 5);
    }

    #[test]
    fn test_repeats_and_limit() {
        let pairs: Vec<ImageMaskPair> = (0..4).map(|i| ImageMaskPair::new(format!("{i}"), "m")).collect();
        let mut job = job(&pairs, Path::new("out"), 3);
        assert_eq!(job.item_count(), 12);
        job.limit = Some(10);
        assert_eq!(job.item_count(), 10);
        job.limit = Some(20);
        assert_eq!(job.item_count(), 12);
    }

    #[test]
    fn test_caches_produce_identical_output() {
        let src = TempDir::new().expect("Should create temp dir");
        let pairs = fixtures(src.path(), 3);
        let loader = loader();
        let augmenter = Augmenter::from_config(&AugmentationConfig {
            probability_denominator: 2,
            ..AugmentationConfig::default()
        });
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().expect("Should build pool");
        let cache_dir = TempDir::new().expect("Should create temp dir");

        let mut outputs = Vec::new();
        for cache in [
            CachePolicy::None,
            CachePolicy::Memory,
            CachePolicy::Disk { directory: cache_dir.path().to_path_buf() },
        ] {
            let out = TempDir::new().expect("Should create temp dir");
            let writer = PartitionWriter {
                loader: &loader,
                augmenter: &augmenter,
                naming: &NamingConfig::default(),
                cache: &cache,
                pool: &pool,
                seed: 9,
            };
            writer.write(&job(&pairs, out.path(), 2)).expect("Should write");

            let bytes: Vec<Vec<u8>> = listing(&out.path().join("masks"))
                .iter()
                .map(|name| fs::read(out.path().join("masks").join(name)).expect("Should read"))
                .collect();
            outputs.push(bytes);
        }

        assert_eq!(outputs[0].len(), 6);
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[0], outputs[2]);
        assert!(!cache_dir.path().join("train").exists(), "disk cache is removed");
    }

    #[test]
    fn test_disk_cache_removed_when_a_source_is_corrupt() {
        let src = TempDir::new().expect("Should create temp dir");
        let out = TempDir::new().expect("Should create temp dir");
        let cache_dir = TempDir::new().expect("Should create temp dir");
        let pairs = fixtures(src.path(), 6);
        fs::write(&pairs[5].image, b"not an image").expect("Should corrupt fixture");

        let loader = loader();
        let augmenter = Augmenter::from_config(&AugmentationConfig::disabled());
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().expect("Should build pool");
        let cache = CachePolicy::Disk { directory: cache_dir.path().to_path_buf() };
        let writer = PartitionWriter {
            loader: &loader,
            augmenter: &augmenter,
            naming: &NamingConfig::default(),
            cache: &cache,
            pool: &pool,
            seed: 3,
        };

        assert!(writer.write(&job(&pairs, out.path(), 1)).is_err());
        assert!(!cache_dir.path().join("train").exists(), "partial cache is removed");
    }
}
