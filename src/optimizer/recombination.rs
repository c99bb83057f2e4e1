//! Rank-based weighted recombination
//!
//! Samples are ranked by reduced loss (lower is better) and weighted by
//! *rank position*. Only positively weighted samples move the mean and the
//! gradient and feed the mean-shift term `A`; every sample, whatever its
//! weight's sign, feeds the second-moment term `B` (active update).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{OptResult, OptimizerError};
use crate::parameters::{ParameterVector, SliceRange};

/// Fixed recombination weights by rank position
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankWeights {
    weights: Vec<f64>,
    mu_eff: f64,
    sum: f64,
}

impl RankWeights {
    /// Log-linear weights `ln((λ+1)/2) - ln(i+1)`, scaled so the positive
    /// entries sum to one. Lower ranks get negative weights.
    pub fn log_linear(population_size: usize) -> Self {
        if population_size <= 1 {
            return Self::from_normalized(vec![1.0]);
        }
        let half = 0.5 * (population_size as f64 + 1.0);
        let raw: Vec<f64> = (0..population_size)
            .map(|i| half.ln() - ((i + 1) as f64).ln())
            .collect();
        let positive: f64 = raw.iter().map(|w| w.max(0.0)).sum();
        Self::from_normalized(raw.into_iter().map(|w| w / positive).collect())
    }

    /// Use `weights` as given
    pub fn new(weights: Vec<f64>) -> OptResult<Self> {
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(OptimizerError::Configuration(
                "rank weights must be finite".to_string(),
            ));
        }
        if !weights.iter().any(|&w| w > 0.0) {
            return Err(OptimizerError::Configuration(
                "rank weights need at least one positive entry".to_string(),
            ));
        }
        Ok(Self::from_normalized(weights))
    }

    fn from_normalized(weights: Vec<f64>) -> Self {
        let mu_eff = 1.0 / weights.iter().map(|w| w.max(0.0).powi(2)).sum::<f64>();
        let sum = weights.iter().sum();
        Self {
            weights,
            mu_eff,
            sum,
        }
    }

    /// Weight of rank `i`
    #[inline]
    pub fn weight(&self, rank: usize) -> f64 {
        self.weights[rank]
    }

    /// All weights in rank order
    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    /// Number of ranks
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Always false for a valid set
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Effective sample size `1 / Σ max(w, 0)²`
    pub fn mu_eff(&self) -> f64 {
        self.mu_eff
    }

    /// `Σ w` including non-positive entries
    pub fn sum(&self) -> f64 {
        self.sum
    }
}

/// Sample indices sorted ascending by loss
///
/// The sort is stable, so equal losses keep index order. NaN losses rank last.
pub fn rank_order(losses: &[f64]) -> Vec<usize> {
    let key = |l: f64| if l.is_nan() { f64::INFINITY } else { l };
    let mut order: Vec<usize> = (0..losses.len()).collect();
    order.sort_by(|&a, &b| {
        key(losses[a])
            .partial_cmp(&key(losses[b]))
            .unwrap_or(Ordering::Equal)
    });
    order
}

/// Accumulate weighted samples and gradients over one chunk
///
/// `mean` and `gradient` are the chunk's slices of the accumulators and
/// are overwritten.
pub fn recombine_chunk(
    weights: &RankWeights,
    order: &[usize],
    samples: &[ParameterVector],
    gradients: &[ParameterVector],
    range: SliceRange,
    mean: &mut [f64],
    gradient: &mut [f64],
) {
    mean.iter_mut().for_each(|m| *m = 0.0);
    gradient.iter_mut().for_each(|g| *g = 0.0);

    for (rank, &idx) in order.iter().enumerate() {
        let w = weights.weight(rank);
        if w <= 0.0 {
            continue;
        }
        let x = samples[idx].slice(range);
        let g = gradients[idx].slice(range);
        for (m, &xi) in mean.iter_mut().zip(x) {
            *m += w * xi;
        }
        for (acc, &gi) in gradient.iter_mut().zip(g) {
            *acc += w * gi;
        }
    }
}

/// Accumulate the noise statistics `A` (mean shift) and `B` (second moment)
/// over one chunk; both slices are overwritten.
pub fn noise_statistics_chunk(
    weights: &RankWeights,
    order: &[usize],
    noise: &[ParameterVector],
    range: SliceRange,
    mean_shift: &mut [f64],
    second_moment: &mut [f64],
) {
    mean_shift.iter_mut().for_each(|a| *a = 0.0);
    second_moment.iter_mut().for_each(|b| *b = 0.0);

    for (rank, &idx) in order.iter().enumerate() {
        let w = weights.weight(rank);
        let w_pos = w.max(0.0);
        let y = noise[idx].slice(range);
        for ((a, b), &yi) in mean_shift.iter_mut().zip(second_moment.iter_mut()).zip(y) {
            *b += w * yi * yi;
            *a += w_pos * yi;
        }
    }
}
