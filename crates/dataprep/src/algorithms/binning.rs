//! Histogram binning of one visual attribute and the per-bin sample weights derived from it.
//!
//! Bin edges follow Doane's rule, which widens or narrows bins according to the
//! sample size and skewness. Every bin is closed on the right, the first bin is
//! also closed on the left, so a value lying exactly on an interior edge belongs
//! to the lower bin and every value of the fitted data lands in some bin.

use serde::{Deserialize, Serialize};
use schemars::JsonSchema;

/// Bin edges, populations and weights of one attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BinSpec {
    pub attribute: String,
    /// Monotonically increasing, `len == bins + 1`
    pub edges: Vec<f64>,
    /// Samples per bin, `len == bins`
    pub counts: Vec<usize>,
    /// `log10(max_count / count) + 1`, zero for empty bins
    pub weights: Vec<f64>,
}

impl BinSpec {
    /// Fit bins for `attribute` from all of its values
    pub fn fit(attribute: impl Into<String>, values: &[f64]) -> Self {
        let edges = doane_edges(values);
        let bins = edges.len() - 1;

        let mut counts = vec![0usize; bins];
        for &value in values {
            counts[locate(&edges, value)] += 1;
        }

        let weights = bin_weights(&counts);

        Self {
            attribute: attribute.into(),
            edges,
            counts,
            weights,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.weights.len()
    }

    /// Bin holding `value`; values outside the fitted range go to the nearest end bin
    pub fn bin_of(&self, value: f64) -> usize {
        locate(&self.edges, value)
    }

    /// Bin index of every value
    pub fn labels(&self, values: &[f64]) -> Vec<usize> {
        values.iter().map(|&value| self.bin_of(value)).collect()
    }

    /// Weight of the bin each value falls into
    pub fn sample_weights(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .map(|&value| self.weights[self.bin_of(value)])
            .collect()
    }
}

/// Right-inclusive search of `value` among `edges`
fn locate(edges: &[f64], value: f64) -> usize {
    let last = edges.len() - 2;
    // first edge whose value is >= value, skipping the lowest edge
    let upper = edges[1..].partition_point(|&edge| edge < value);
    upper.min(last)
}

fn bin_weights(counts: &[usize]) -> Vec<f64> {
    let max_count = counts.iter().copied().max().unwrap_or(0).max(1) as f64;

    counts
        .iter()
        .map(|&count| {
            if count == 0 {
                0.0
            } else {
                (max_count / count as f64).log10() + 1.0
            }
        })
        .collect()
}

/// Bin width by Doane's rule, zero when the rule does not apply
pub fn doane_bin_width(values: &[f64]) -> f64 {
    let size = values.len();
    if size <= 2 {
        return 0.0;
    }

    let n = size as f64;
    let sg1 = (6.0 * (n - 2.0) / ((n + 1.0) * (n + 3.0))).sqrt();
    let mean = values.iter().sum::<f64>() / n;
    let sigma = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    if sigma <= 0.0 {
        return 0.0;
    }

    let g1 = values
        .iter()
        .map(|v| ((v - mean) / sigma).powi(3))
        .sum::<f64>()
        / n;
    let (min, max) = min_max(values);

    (max - min) / (1.0 + n.log2() + (1.0 + g1.abs() / sg1).log2())
}

/// Evenly spaced edges over the data range, bin count from [`doane_bin_width`]
pub fn doane_edges(values: &[f64]) -> Vec<f64> {
    let (mut first, mut last) = if values.is_empty() {
        (0.0, 1.0)
    } else {
        min_max(values)
    };
    let range = last - first;

    if first == last {
        first -= 0.5;
        last += 0.5;
    }

    let width = doane_bin_width(values);
    let bins = if width > 0.0 {
        ((range / width).ceil() as usize).max(1)
    } else {
        1
    };

    let step = (last - first) / bins as f64;
    let mut edges: Vec<f64> = (0..bins).map(|i| first + step * i as f64).collect();
    edges.push(last);
    edges
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skewed_values() -> Vec<f64> {
        let mut values: Vec<f64> = (0..40).map(|i| (i % 7) as f64 * 0.5).collect();
        values.extend([9.0, 12.5, 20.0]);
        values
    }

    #[test]
    fn test_counts_cover_every_record() {
        let values = skewed_values();
        let spec = BinSpec::fit("a", &values);

        assert_eq!(spec.counts.iter().sum::<usize>(), values.len());
        assert_eq!(spec.edges.len(), spec.bin_count() + 1);
        assert_eq!(spec.counts.len(), spec.bin_count());
        assert!(spec.edges.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sample_weights_come_from_bin_weights() {
        let values = skewed_values();
        let spec = BinSpec::fit("a", &values);

        for weight in spec.sample_weights(&values) {
            assert!(spec.weights.contains(&weight));
            assert!(weight >= 1.0, "populated bins weigh at least 1");
        }
    }

    #[test]
    fn test_weights_are_log_inverse_frequency() {
        assert_eq!(bin_weights(&[10, 1, 0]), vec![1.0, 2.0, 0.0]);
        let weights = bin_weights(&[100, 10]);
        assert!((weights[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_edge_values_fall_into_lower_bin() {
        let edges = vec![0.0, 1.0, 2.0, 3.0];
        assert_eq!(locate(&edges, 0.0), 0);
        assert_eq!(locate(&edges, 1.0), 0);
        assert_eq!(locate(&edges, 1.5), 1);
        assert_eq!(locate(&edges, 2.0), 1);
        assert_eq!(locate(&edges, 3.0), 2);
        assert_eq!(locate(&edges, -4.0), 0);
        assert_eq!(locate(&edges, 10.0), 2);
    }

    #[test]
    fn test_constant_attribute_gets_single_bin() {
        let spec = BinSpec::fit("L", &[4.0; 6]);
        assert_eq!(spec.edges, vec![3.5, 4.5]);
        assert_eq!(spec.counts, vec![6]);
        assert_eq!(spec.weights, vec![1.0]);
    }

    #[test]
    fn test_doane_matches_reference_width() {
        // symmetric data: skewness 0, width = ptp / (1 + log2(n))
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let expected = 7.0 / (1.0 + 8f64.log2());
        assert!((doane_bin_width(&values) - expected).abs() < 1e-12);
        assert_eq!(doane_edges(&values).len(), 5);
    }

    #[test]
    fn test_tiny_inputs() {
        assert_eq!(doane_bin_width(&[1.0, 2.0]), 0.0);
        let spec = BinSpec::fit("a", &[1.0, 2.0]);
        assert_eq!(spec.bin_count(), 1);
        assert_eq!(spec.counts, vec![2]);
    }
}
