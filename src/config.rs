//! Optimizer configuration
//!
//! `OptimizerConfig` is what the surrounding settings layer hands to the
//! optimizer. All former build-time switches (precision, decay style,
//! accelerated sampling, Nesterov numerator) are runtime fields here.

use serde::{Deserialize, Serialize};

use crate::error::{OptResult, OptimizerError};
use crate::schedule::LearningRateSchedule;

/// Weight-decay penalty style
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayStyle {
    /// Constant-magnitude penalty following the sign of the weight
    L1,
    /// Penalty proportional to the weight
    #[default]
    L2,
}

impl DecayStyle {
    /// Penalty subtracted from the scaled gradient for weight `w`
    #[inline]
    pub fn penalty(self, lambda: f64, w: f64) -> f64 {
        match self {
            Self::L1 => {
                if w > 0.0 {
                    lambda
                } else {
                    -lambda
                }
            }
            Self::L2 => lambda * w,
        }
    }
}

/// Storage precision of persisted artifacts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit floats
    Single,
    /// 64-bit floats
    #[default]
    Double,
}

/// Configuration of one optimizer instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Number of sample slots per generation (slot 0 is the mean)
    pub population_size: usize,
    /// Length of the parameter vector
    pub dimension: usize,
    /// Worker threads per process
    pub num_threads: usize,
    /// Gradients are scaled by 1 / batch_size
    pub batch_size: usize,
    /// Base learning rate
    pub learning_rate: f64,
    /// Learning-rate schedule over generations
    pub schedule: LearningRateSchedule,
    /// Weight-decay coefficient (lambda)
    pub weight_decay: f64,
    /// Weight-decay style
    pub decay_style: DecayStyle,
    /// Adam denominator epsilon
    pub epsilon: f64,
    /// Root seed for all sampling streams
    pub seed: u64,
    /// Replace sample 1's noise with the positive-weighted noise average
    pub accelerated_sampling: bool,
    /// Use the Nesterov-style numerator in the Adam step
    pub nesterov: bool,
    /// Floor the second moment at M1^2 / 10
    pub safe_second_moment: bool,
    /// Artifact storage precision
    pub precision: Precision,
    /// Override for the log-linear rank weights
    pub rank_weights: Option<Vec<f64>>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: 8,
            dimension: 1,
            num_threads: 1,
            batch_size: 1,
            learning_rate: 1e-4,
            schedule: LearningRateSchedule::Constant,
            weight_decay: 0.0,
            decay_style: DecayStyle::L2,
            epsilon: 1e-8,
            seed: 0,
            accelerated_sampling: false,
            nesterov: false,
            safe_second_moment: false,
            precision: Precision::Double,
            rank_weights: None,
        }
    }
}

impl OptimizerConfig {
    /// Start a builder with default values
    pub fn builder() -> OptimizerConfigBuilder {
        OptimizerConfigBuilder::new()
    }

    /// Gradient scale derived from the batch size
    pub fn gradient_factor(&self) -> f64 {
        1.0 / self.batch_size as f64
    }

    /// Check all fields for consistency
    pub fn validate(&self) -> OptResult<()> {
        let fail = |msg: String| Err(OptimizerError::Configuration(msg));

        if self.population_size == 0 {
            return fail("population_size must be at least 1".to_string());
        }
        if self.dimension == 0 {
            return fail("dimension must be at least 1".to_string());
        }
        if self.num_threads == 0 {
            return fail("num_threads must be at least 1".to_string());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return fail(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return fail(format!("epsilon must be positive, got {}", self.epsilon));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return fail(format!(
                "weight_decay must be >= 0, got {}",
                self.weight_decay
            ));
        }
        self.schedule.validate().map_err(OptimizerError::Configuration)?;

        if let Some(weights) = &self.rank_weights {
            if weights.len() != self.population_size {
                return fail(format!(
                    "rank_weights has {} entries for population_size {}",
                    weights.len(),
                    self.population_size
                ));
            }
            if weights.iter().any(|w| !w.is_finite()) {
                return fail("rank_weights must be finite".to_string());
            }
            if !weights.iter().any(|&w| w > 0.0) {
                return fail("rank_weights needs at least one positive entry".to_string());
            }
        }
        if self.accelerated_sampling && self.population_size < 2 {
            return fail("accelerated_sampling needs population_size >= 2".to_string());
        }

        Ok(())
    }
}

/// Builder for [`OptimizerConfig`]
#[derive(Clone, Debug, Default)]
pub struct OptimizerConfigBuilder {
    config: OptimizerConfig,
}

impl OptimizerConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the population size
    pub fn population_size(mut self, size: usize) -> Self {
        self.config.population_size = size;
        self
    }

    /// Set the parameter dimension
    pub fn dimension(mut self, dimension: usize) -> Self {
        self.config.dimension = dimension;
        self
    }

    /// Set the worker thread count
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Set the batch size used to scale gradients
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set the base learning rate
    pub fn learning_rate(mut self, eta: f64) -> Self {
        self.config.learning_rate = eta;
        self
    }

    /// Set the learning-rate schedule
    pub fn schedule(mut self, schedule: LearningRateSchedule) -> Self {
        self.config.schedule = schedule;
        self
    }

    /// Set weight decay coefficient and style
    pub fn weight_decay(mut self, lambda: f64, style: DecayStyle) -> Self {
        self.config.weight_decay = lambda;
        self.config.decay_style = style;
        self
    }

    /// Set the Adam epsilon
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.config.epsilon = epsilon;
        self
    }

    /// Set the root seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Enable or disable accelerated sampling
    pub fn accelerated_sampling(mut self, enabled: bool) -> Self {
        self.config.accelerated_sampling = enabled;
        self
    }

    /// Enable or disable the Nesterov numerator
    pub fn nesterov(mut self, enabled: bool) -> Self {
        self.config.nesterov = enabled;
        self
    }

    /// Enable or disable the second-moment floor
    pub fn safe_second_moment(mut self, enabled: bool) -> Self {
        self.config.safe_second_moment = enabled;
        self
    }

    /// Set artifact precision
    pub fn precision(mut self, precision: Precision) -> Self {
        self.config.precision = precision;
        self
    }

    /// Override the rank weights
    pub fn rank_weights(mut self, weights: Vec<f64>) -> Self {
        self.config.rank_weights = Some(weights);
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> OptResult<OptimizerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(OptimizerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = OptimizerConfig::builder()
            .population_size(16)
            .dimension(100)
            .num_threads(4)
            .batch_size(32)
            .learning_rate(1e-3)
            .weight_decay(1e-4, DecayStyle::L1)
            .seed(7)
            .build()
            .unwrap();

        assert_eq!(config.population_size, 16);
        assert_eq!(config.decay_style, DecayStyle::L1);
        assert_eq!(config.gradient_factor(), 1.0 / 32.0);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(OptimizerConfig::builder().population_size(0).build().is_err());
        assert!(OptimizerConfig::builder().learning_rate(0.0).build().is_err());
        assert!(OptimizerConfig::builder().num_threads(0).build().is_err());
        assert!(OptimizerConfig::builder()
            .population_size(3)
            .rank_weights(vec![0.5, 0.5])
            .build()
            .is_err());
        assert!(OptimizerConfig::builder()
            .population_size(2)
            .rank_weights(vec![0.0, -1.0])
            .build()
            .is_err());
        assert!(OptimizerConfig::builder()
            .population_size(1)
            .accelerated_sampling(true)
            .build()
            .is_err());
    }

    #[test]
    fn test_decay_penalty() {
        assert_eq!(DecayStyle::L1.penalty(0.1, 3.0), 0.1);
        assert_eq!(DecayStyle::L1.penalty(0.1, -3.0), -0.1);
        assert_eq!(DecayStyle::L1.penalty(0.1, 0.0), -0.1);
        assert_eq!(DecayStyle::L2.penalty(0.1, 3.0), 0.30000000000000004);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{ "population_size": 4, "dimension": 10, "decay_style": "l1" }"#;
        let config: OptimizerConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.population_size, 4);
        assert_eq!(config.dimension, 10);
        assert_eq!(config.decay_style, DecayStyle::L1);
        assert_eq!(config.learning_rate, 1e-4);
        assert!(!config.accelerated_sampling);
    }
}
