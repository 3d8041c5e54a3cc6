//! Train/validation/test partitioning of image/mask pairs.
//!
//! The validation subset is cut from the full set first; the test subset is then
//! cut from what remains, so `test_size` is a fraction of the post-validation
//! remainder. A subset of fraction `f` over `n` items holds `ceil(f * n)` items.
//! Both cuts draw from a fresh generator seeded with the same seed.

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{DataPrepError, Result},
    types::{ImageMaskPair, PartitionCounts, PartitionKind},
};

/// Pairs assigned to each partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub train: Vec<ImageMaskPair>,
    pub validation: Vec<ImageMaskPair>,
    pub test: Vec<ImageMaskPair>,
}

impl SplitPlan {
    pub fn pairs(&self, kind: PartitionKind) -> &[ImageMaskPair] {
        match kind {
            PartitionKind::Train => &self.train,
            PartitionKind::Validation => &self.validation,
            PartitionKind::Test => &self.test,
        }
    }

    pub fn counts(&self) -> PartitionCounts {
        PartitionCounts {
            train: self.train.len(),
            validation: self.validation.len(),
            test: self.test.len(),
        }
    }
}

/// Splits pairs with fixed fractions and seed. A fraction of zero skips that cut.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splitter {
    pub val_size: f64,
    pub test_size: f64,
    pub seed: u64,
}

impl Splitter {
    pub fn new(val_size: f64, test_size: f64, seed: u64) -> Self {
        Self {
            val_size,
            test_size,
            seed,
        }
    }

    /// Uniform random split
    pub fn split(&self, pairs: &[ImageMaskPair]) -> Result<SplitPlan> {
        let all: Vec<usize> = (0..pairs.len()).collect();

        let (rest, validation) = self.shuffle_cut(&all, self.val_size, PartitionKind::Validation)?;
        let (train, test) = self.shuffle_cut(&rest, self.test_size, PartitionKind::Test)?;

        let plan = gather(pairs, &train, &validation, &test);
        debug!(counts = ?plan.counts(), "Unstratified split");
        Ok(plan)
    }

    /// Split preserving the proportion of each bin label in every partition.
    ///
    /// `labels[i]` is the bin of `pairs[i]` for the stratification attribute.
    pub fn split_stratified(
        &self,
        pairs: &[ImageMaskPair],
        attribute: &str,
        labels: &[usize],
    ) -> Result<SplitPlan> {
        if labels.len() != pairs.len() {
            return Err(DataPrepError::AttributeRowMismatch {
                rows: labels.len(),
                pairs: pairs.len(),
            });
        }

        let all: Vec<usize> = (0..pairs.len()).collect();

        let (rest, validation) = self.stratified_cut(
            &all,
            labels,
            attribute,
            self.val_size,
            PartitionKind::Validation,
        )?;
        let (train, test) =
            self.stratified_cut(&rest, labels, attribute, self.test_size, PartitionKind::Test)?;

        let plan = gather(pairs, &train, &validation, &test);
        debug!(attribute, counts = ?plan.counts(), "Stratified split");
        Ok(plan)
    }

    fn shuffle_cut(
        &self,
        indices: &[usize],
        fraction: f64,
        kind: PartitionKind,
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        if fraction <= 0.0 {
            return Ok((indices.to_vec(), Vec::new()));
        }

        let n_test = subset_size(indices.len(), fraction, kind)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut shuffled = indices.to_vec();
        shuffled.shuffle(&mut rng);

        let rest = shuffled.split_off(n_test);
        Ok((rest, shuffled))
    }

    fn stratified_cut(
        &self,
        indices: &[usize],
        labels: &[usize],
        attribute: &str,
        fraction: f64,
        kind: PartitionKind,
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        if fraction <= 0.0 {
            return Ok((indices.to_vec(), Vec::new()));
        }

        let n_test = subset_size(indices.len(), fraction, kind)?;
        let n_train = indices.len() - n_test;

        // members of each populated bin, in input order
        let mut classes: Vec<(usize, Vec<usize>)> = Vec::new();
        for &index in indices {
            let label = labels[index];
            match classes.iter_mut().find(|(l, _)| *l == label) {
                Some((_, members)) => members.push(index),
                None => classes.push((label, vec![index])),
            }
        }
        classes.sort_by_key(|(label, _)| *label);

        if classes.iter().any(|(_, members)| members.len() < 2) {
            return Err(DataPrepError::SingleMemberBin {
                attribute: attribute.to_string(),
            });
        }
        for available in [n_train, n_test] {
            if available < classes.len() {
                return Err(DataPrepError::TooFewSamplesForBins {
                    attribute: attribute.to_string(),
                    required: classes.len(),
                    available,
                });
            }
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let class_counts: Vec<usize> = classes.iter().map(|(_, m)| m.len()).collect();
        let train_alloc = approximate_mode(&class_counts, n_train, &mut rng);
        let remaining: Vec<usize> = class_counts
            .iter()
            .zip(&train_alloc)
            .map(|(count, taken)| count - taken)
            .collect();
        let test_alloc = approximate_mode(&remaining, n_test, &mut rng);

        let mut train = Vec::with_capacity(n_train);
        let mut test = Vec::with_capacity(n_test);
        for (i, (_, members)) in classes.iter().enumerate() {
            let mut members = members.clone();
            members.shuffle(&mut rng);
            train.extend_from_slice(&members[..train_alloc[i]]);
            test.extend_from_slice(&members[train_alloc[i]..train_alloc[i] + test_alloc[i]]);
        }
        train.shuffle(&mut rng);
        test.shuffle(&mut rng);

        Ok((train, test))
    }
}

/// `ceil(fraction * n)`, rejecting cuts that leave either side empty
fn subset_size(n: usize, fraction: f64, kind: PartitionKind) -> Result<usize> {
    let n_test = (fraction * n as f64).ceil() as usize;

    if n_test == 0 {
        return Err(DataPrepError::EmptyPartition {
            partition: kind.to_string(),
            fraction,
        });
    }
    if n_test >= n {
        return Err(DataPrepError::EmptyPartition {
            partition: PartitionKind::Train.to_string(),
            fraction,
        });
    }

    Ok(n_test)
}

/// Distribute `n_draws` over classes proportionally to `counts`.
///
/// Every class gets the floor of its share; the draws left over go to the
/// classes with the largest fractional remainders, ties broken at random.
/// No class is allocated more than it holds.
fn approximate_mode(counts: &[usize], n_draws: usize, rng: &mut StdRng) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0; counts.len()];
    }

    let continuous: Vec<f64> = counts
        .iter()
        .map(|&count| count as f64 * n_draws as f64 / total as f64)
        .collect();
    let mut floored: Vec<usize> = continuous.iter().map(|c| c.floor() as usize).collect();
    let mut need = n_draws.saturating_sub(floored.iter().sum());

    let remainders: Vec<f64> = continuous
        .iter()
        .zip(&floored)
        .map(|(c, f)| c - *f as f64)
        .collect();
    let mut levels = remainders.clone();
    levels.sort_by(|a, b| b.total_cmp(a));
    levels.dedup();

    for level in levels {
        if need == 0 {
            break;
        }
        let mut tied: Vec<usize> = (0..counts.len())
            .filter(|&i| remainders[i] == level && floored[i] < counts[i])
            .collect();
        while need > 0 && !tied.is_empty() {
            let pick = tied.swap_remove(rng.gen_range(0..tied.len()));
            floored[pick] += 1;
            need -= 1;
        }
    }

    floored
}

fn gather(
    pairs: &[ImageMaskPair],
    train: &[usize],
    validation: &[usize],
    test: &[usize],
) -> SplitPlan {
    let pick = |indices: &[usize]| indices.iter().map(|&i| pairs[i].clone()).collect();

    SplitPlan {
        train: pick(train),
        validation: pick(validation),
        test: pick(test),
    }
}

/// Number of passes over the train stream needed to reach `target_count`.
///
/// Always at least 1; exactly 1 when augmentation is disabled.
pub fn iterations(target_count: usize, train_count: usize, augment: bool) -> usize {
    if !augment || train_count == 0 {
        return 1;
    }
    target_count.div_ceil(train_count).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pairs(n: usize) -> Vec<ImageMaskPair> {
        (0..n)
            .map(|i| ImageMaskPair::new(format!("img_{i}.png"), format!("mask_{i}.png")))
            .collect()
    }

    fn assert_complete(plan: &SplitPlan, source: &[ImageMaskPair]) {
        let mut seen = HashSet::new();
        for pair in plan.train.iter().chain(&plan.validation).chain(&plan.test) {
            assert!(seen.insert(pair.image.clone()), "duplicated {:?}", pair.image);
        }
        assert_eq!(seen.len(), source.len());
    }

    #[test]
    fn test_two_stage_cut_sizes() {
        let source = pairs(10);
        let plan = Splitter::new(0.2, 0.2, 7).split(&source).expect("Should split");

        assert_eq!(plan.counts(), PartitionCounts { train: 6, validation: 2, test: 2 });
        assert_complete(&plan, &source);
    }

    #[test]
    fn test_split_is_complete_for_many_fractions() {
        let source = pairs(37);
        for (val, test) in [(0.1, 0.1), (0.3, 0.5), (0.05, 0.9), (0.5, 0.0), (0.0, 0.25)] {
            let plan = Splitter::new(val, test, 3).split(&source).expect("Should split");
            assert_complete(&plan, &source);
            assert!(!plan.train.is_empty());
        }
    }

    #[test]
    fn test_same_seed_same_split() {
        let source = pairs(20);
        let a = Splitter::new(0.2, 0.2, 11).split(&source).expect("Should split");
        let b = Splitter::new(0.2, 0.2, 11).split(&source).expect("Should split");
        let c = Splitter::new(0.2, 0.2, 12).split(&source).expect("Should split");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_disabled_fraction_skips_partition() {
        let source = pairs(8);
        let plan = Splitter::new(0.0, 0.0, 1).split(&source).expect("Should split");
        assert_eq!(plan.train.len(), 8);
        assert!(plan.validation.is_empty() && plan.test.is_empty());
    }

    #[test]
    fn test_cut_leaving_no_train_data_fails() {
        let source = pairs(1);
        let err = Splitter::new(0.5, 0.0, 1)
            .split(&source)
            .expect_err("Should not leave train empty");
        assert!(matches!(err, DataPrepError::EmptyPartition { .. }));
    }

    #[test]
    fn test_stratified_split_preserves_proportions() {
        let source = pairs(40);
        // 30 items in bin 0, 10 in bin 1
        let labels: Vec<usize> = (0..40).map(|i| usize::from(i % 4 == 0)).collect();

        let plan = Splitter::new(0.2, 0.25, 5)
            .split_stratified(&source, "a", &labels)
            .expect("Should split");
        assert_complete(&plan, &source);
        assert_eq!(plan.validation.len(), 8);
        assert_eq!(plan.test.len(), 8);

        let rare_in = |subset: &[ImageMaskPair]| {
            subset
                .iter()
                .filter(|p| source.iter().position(|s| s == *p).is_some_and(|i| labels[i] == 1))
                .count()
        };
        assert_eq!(rare_in(&plan.validation), 2);
        assert_eq!(rare_in(&plan.test), 2);
        assert_eq!(rare_in(&plan.train), 6);
    }

    #[test]
    fn test_single_member_bin_is_rejected() {
        let source = pairs(10);
        let mut labels = vec![0usize; 10];
        labels[3] = 2;

        let err = Splitter::new(0.2, 0.2, 1)
            .split_stratified(&source, "contrast", &labels)
            .expect_err("Should reject a lone bin member");
        assert!(matches!(err, DataPrepError::SingleMemberBin { ref attribute } if attribute == "contrast"));
        assert!(err.to_string().contains("increase val_size and test_size"));
    }

    #[test]
    fn test_approximate_mode_sums_to_draws() {
        let mut rng = StdRng::seed_from_u64(0);
        let alloc = approximate_mode(&[5, 3, 2], 4, &mut rng);
        assert_eq!(alloc.iter().sum::<usize>(), 4);
        assert_eq!(alloc[0], 2);

        let alloc = approximate_mode(&[1, 1, 1, 1], 2, &mut rng);
        assert_eq!(alloc.iter().sum::<usize>(), 2);
        assert!(alloc.iter().all(|&a| a <= 1));
    }

    #[test]
    fn test_iterations() {
        assert_eq!(iterations(1000, 6, true), 167);
        assert_eq!(iterations(12, 6, true), 2);
        assert_eq!(iterations(3, 6, true), 1);
        assert_eq!(iterations(0, 6, true), 1);
        assert_eq!(iterations(1000, 6, false), 1);
    }
}
