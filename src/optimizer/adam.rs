//! Bias-corrected Adam step on the recombined gradient

use serde::{Deserialize, Serialize};

use crate::config::{DecayStyle, OptimizerConfig};
use crate::parameters::ParameterVector;

/// First-moment decay
pub const BETA1: f64 = 0.9;
/// Second-moment decay
pub const BETA2: f64 = 0.999;

/// Persistent first/second moment accumulators
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdamMoments {
    /// First moment (M1)
    pub first: ParameterVector,
    /// Second moment (M2)
    pub second: ParameterVector,
}

impl AdamMoments {
    /// Zeroed moments for `dimension` parameters
    pub fn zeros(dimension: usize) -> Self {
        Self {
            first: ParameterVector::zeros(dimension),
            second: ParameterVector::zeros(dimension),
        }
    }
}

/// One generation's Adam coefficients
#[derive(Clone, Copy, Debug)]
pub struct AdamStep {
    eta: f64,
    factor: f64,
    lambda: f64,
    decay: DecayStyle,
    epsilon: f64,
    nesterov: bool,
    safe_second_moment: bool,
}

impl AdamStep {
    /// Coefficients for generation `t` (t >= 1) at learning rate `eta`
    pub fn new(config: &OptimizerConfig, eta: f64, generation: u64) -> Self {
        let t = generation.max(1) as f64;
        let correction = (1.0 - BETA2.powf(t)).sqrt() / (1.0 - BETA1.powf(t));
        Self {
            eta: eta * correction,
            factor: config.gradient_factor(),
            lambda: config.weight_decay,
            decay: config.decay_style,
            epsilon: config.epsilon,
            nesterov: config.nesterov,
            safe_second_moment: config.safe_second_moment,
        }
    }

    /// Bias-corrected learning rate
    pub fn corrected_eta(&self) -> f64 {
        self.eta
    }

    /// Update both moments for one parameter and return the step
    #[inline]
    pub fn step(&self, grad: f64, m1: &mut f64, m2: &mut f64, w: f64) -> f64 {
        let dw = self.factor * grad - self.decay.penalty(self.lambda, w);
        *m1 = BETA1 * *m1 + (1.0 - BETA1) * dw;
        *m2 = BETA2 * *m2 + (1.0 - BETA2) * dw * dw;
        if self.safe_second_moment {
            *m2 = m2.max(*m1 * *m1 / 10.0);
        }
        let numer = if self.nesterov {
            BETA1 * *m1 + (1.0 - BETA1) * dw
        } else {
            *m1
        };
        self.eta * numer / (self.epsilon + m2.sqrt())
    }

    /// Apply the step to one chunk
    ///
    /// `offset` is the global index of the chunk's first element. Returns
    /// the first non-finite step as `(index, value)`.
    pub fn apply_chunk(
        &self,
        offset: usize,
        mean: &mut [f64],
        first: &mut [f64],
        second: &mut [f64],
        gradient: &[f64],
    ) -> Option<(usize, f64)> {
        for (k, (((w, m1), m2), &g)) in mean
            .iter_mut()
            .zip(first.iter_mut())
            .zip(second.iter_mut())
            .zip(gradient)
            .enumerate()
        {
            let step = self.step(g, m1, m2, *w);
            if !step.is_finite() {
                return Some((offset + k, step));
            }
            *w += step;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(lambda: f64, decay: DecayStyle) -> OptimizerConfig {
        OptimizerConfig::builder()
            .batch_size(2)
            .epsilon(1e-8)
            .weight_decay(lambda, decay)
            .build()
            .unwrap()
    }

    #[test]
    fn test_first_step_is_sign_like() {
        let adam = AdamStep::new(&config(0.0, DecayStyle::L2), 0.01, 1);
        let (mut m1, mut m2) = (0.0, 0.0);
        let step = adam.step(4.0, &mut m1, &mut m2, 0.0);

        // dw = 2, m1 = 0.2, m2 = 0.004; corrected eta = 0.01 * sqrt(0.001) / 0.1
        assert_relative_eq!(m1, 0.2, epsilon = 1e-12);
        assert_relative_eq!(m2, 0.004, epsilon = 1e-12);
        let expected = 0.01 * 0.001f64.sqrt() / 0.1 * 0.2 / (1e-8 + 0.004f64.sqrt());
        assert_relative_eq!(step, expected, epsilon = 1e-15);
        assert_relative_eq!(step, 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_l2_decay_pulls_toward_zero() {
        let adam = AdamStep::new(&config(0.1, DecayStyle::L2), 0.01, 1);
        let (mut m1, mut m2) = (0.0, 0.0);
        let step = adam.step(0.0, &mut m1, &mut m2, 5.0);
        assert!(step < 0.0);
        assert_relative_eq!(m1, 0.1 * -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_l1_decay_is_constant_magnitude() {
        let adam = AdamStep::new(&config(0.1, DecayStyle::L1), 0.01, 1);
        let (mut a1, mut a2) = (0.0, 0.0);
        let (mut b1, mut b2) = (0.0, 0.0);
        adam.step(0.0, &mut a1, &mut a2, 5.0);
        adam.step(0.0, &mut b1, &mut b2, 500.0);
        assert_eq!(a1, b1);
        assert_relative_eq!(a1, -0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_safe_second_moment_floor() {
        let mut cfg = config(0.0, DecayStyle::L2);
        cfg.safe_second_moment = true;
        let adam = AdamStep::new(&cfg, 0.01, 1);
        let (mut m1, mut m2) = (1.0, 0.0);
        adam.step(0.0, &mut m1, &mut m2, 0.0);
        assert_relative_eq!(m2, 0.081, epsilon = 1e-12);
    }

    #[test]
    fn test_apply_chunk_reports_non_finite() {
        let adam = AdamStep::new(&config(0.0, DecayStyle::L2), 0.01, 1);
        let mut mean = vec![0.0, 0.0];
        let mut m1 = vec![0.0, 0.0];
        let mut m2 = vec![0.0, 0.0];
        let gradient = vec![1.0, f64::NAN];

        let bad = adam.apply_chunk(10, &mut mean, &mut m1, &mut m2, &gradient);
        assert_eq!(bad.map(|(i, _)| i), Some(11));
        assert!(mean[0] > 0.0);
        assert_eq!(mean[1], 0.0);
    }

    #[test]
    fn test_bias_correction_decays() {
        let cfg = config(0.0, DecayStyle::L2);
        let early = AdamStep::new(&cfg, 1.0, 1).corrected_eta();
        let late = AdamStep::new(&cfg, 1.0, 100_000).corrected_eta();
        assert!(early < late);
        assert_relative_eq!(late, 1.0, epsilon = 1e-6);
    }
}
