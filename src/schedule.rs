//! Learning-rate schedules
//!
//! Schedules provide the effective learning rate for a given generation.
//! They are selected at construction and serialized with the configuration.

use serde::{Deserialize, Serialize};

/// Learning-rate schedule
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearningRateSchedule {
    /// Fixed learning rate
    Constant,
    /// Inverse-time annealing: eta(t) = eta / (1 + t * rate)
    InverseTime {
        /// Annealing rate
        rate: f64,
    },
    /// Exponential decay: eta(t) = max(eta * e^(-rate * t), minimum)
    Exponential {
        /// Decay rate
        rate: f64,
        /// Floor
        minimum: f64,
    },
}

impl Default for LearningRateSchedule {
    fn default() -> Self {
        Self::Constant
    }
}

impl LearningRateSchedule {
    /// Effective learning rate at generation `t`
    pub fn value_at(&self, base: f64, generation: u64) -> f64 {
        let t = generation as f64;
        match *self {
            Self::Constant => base,
            Self::InverseTime { rate } => base / (1.0 + t * rate),
            Self::Exponential { rate, minimum } => (base * (-rate * t).exp()).max(minimum),
        }
    }

    /// Whether the schedule changes over time
    pub fn is_annealed(&self) -> bool {
        !matches!(self, Self::Constant)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Constant => Ok(()),
            Self::InverseTime { rate } if rate.is_finite() && rate >= 0.0 => Ok(()),
            Self::InverseTime { rate } => Err(format!("annealing rate must be >= 0, got {rate}")),
            Self::Exponential { rate, minimum }
                if rate.is_finite() && rate >= 0.0 && minimum.is_finite() && minimum >= 0.0 =>
            {
                Ok(())
            }
            Self::Exponential { rate, minimum } => Err(format!(
                "exponential decay needs rate >= 0 and minimum >= 0, got {rate} / {minimum}"
            )),
        }
    }
}
