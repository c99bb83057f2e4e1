//! Diagonal covariance and evolution path adaptation
//!
//! ```text
//! P[w] = (1 - c_sig) P[w] + sqrt(c_sig (2 - c_sig) mu_eff) A[w]
//! S[w] = sqrt((1 - c1 - sumW mu_eff c1) S[w]^2 + c1 P[w]^2 + mu_eff c1 B[w])
//! ```
//! followed by clamping `S[w]` into `[MIN_STD_DEV, MAX_STD_DEV]`.

use super::recombination::RankWeights;

/// Covariance learning rate
pub const C1_COV: f64 = 1e-5;
/// Evolution path cumulation rate
pub const C_SIG: f64 = 1e-3;
/// Lower clamp for every standard deviation
pub const MIN_STD_DEV: f64 = 0.01;
/// Upper clamp for every standard deviation
pub const MAX_STD_DEV: f64 = 10.0;

/// Coefficients derived once from the rank weights
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CovarianceUpdate {
    /// Decay of the previous variance
    pub alpha: f64,
    /// Decay of the previous path
    pub alpha_path: f64,
    /// Gain on the mean-shift term
    pub path_gain: f64,
    /// Gain on the second-moment term
    pub moment_gain: f64,
}

impl CovarianceUpdate {
    /// Derive the coefficients from `weights`
    pub fn new(weights: &RankWeights) -> Self {
        let mu_eff = weights.mu_eff();
        Self {
            alpha: 1.0 - C1_COV - weights.sum() * mu_eff * C1_COV,
            alpha_path: 1.0 - C_SIG,
            path_gain: (C_SIG * (2.0 - C_SIG) * mu_eff).sqrt(),
            moment_gain: mu_eff * C1_COV,
        }
    }

    /// Update path and standard deviation for one parameter
    #[inline]
    pub fn update(&self, path: &mut f64, std_dev: &mut f64, mean_shift: f64, second_moment: f64) {
        *path = self.alpha_path * *path + self.path_gain * mean_shift;
        let variance = self.alpha * *std_dev * *std_dev
            + C1_COV * *path * *path
            + self.moment_gain * second_moment;
        // negative-weight samples can drive the variance estimate below zero
        *std_dev = variance.max(0.0).sqrt().clamp(MIN_STD_DEV, MAX_STD_DEV);
    }

    /// Update one chunk
    pub fn apply_chunk(
        &self,
        path: &mut [f64],
        std_dev: &mut [f64],
        mean_shift: &[f64],
        second_moment: &[f64],
    ) {
        for (((p, s), &a), &b) in path
            .iter_mut()
            .zip(std_dev.iter_mut())
            .zip(mean_shift)
            .zip(second_moment)
        {
            self.update(p, s, a, b);
        }
    }
}
