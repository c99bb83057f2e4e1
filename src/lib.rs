//! # adam-cma
//!
//! Weight-update engine for population-based training of a neural network's
//! parameter vector: a diagonal Covariance-Matrix-Adaptation search
//! distribution whose mean is moved by an Adam step on the rank-weighted
//! gradient of the population.
//!
//! ## Core Concepts
//!
//! - **Generation**: sample → evaluate → recombine → adapt, driven by
//!   [`prepare_update`](optimizer::AdamCmaOptimizer::prepare_update) and
//!   [`apply_update`](optimizer::AdamCmaOptimizer::apply_update)
//! - **Owned slice**: every cooperating process updates a contiguous index
//!   range and publishes it through a [`Collective`](collective::Collective)
//! - **Deterministic threads**: each worker chunk draws from its own random
//!   stream, so runs are reproducible for a fixed seed and thread count
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use adam_cma::prelude::*;
//!
//! let config = OptimizerConfig::builder()
//!     .population_size(8)
//!     .dimension(4)
//!     .learning_rate(0.05)
//!     .build()?;
//! let mut opt = AdamCmaOptimizer::single_process(config, ParameterVector::zeros(4))?;
//!
//! for _ in 0..100 {
//!     let mut losses = Vec::new();
//!     for i in 0..opt.population_size() {
//!         let x = opt.sample(i)?.clone();
//!         losses.push(x.as_slice().iter().map(|v| (v - 1.0).powi(2)).sum());
//!         let grad: Vec<f64> = x.as_slice().iter().map(|v| 2.0 * (1.0 - v)).collect();
//!         opt.gradient_partial_mut(i, 0)?.replace(grad)?;
//!     }
//!     opt.prepare_update(&losses)?;
//!     opt.apply_update()?;
//! }
//! ```

pub mod checkpoint;
pub mod collective;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod optimizer;
pub mod parameters;
pub mod random;
pub mod schedule;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::prelude::*;
    pub use crate::collective::prelude::*;
    pub use crate::config::{DecayStyle, OptimizerConfig, OptimizerConfigBuilder, Precision};
    pub use crate::diagnostics::prelude::*;
    pub use crate::error::*;
    pub use crate::optimizer::prelude::*;
    pub use crate::parameters::prelude::*;
    pub use crate::random::StreamSet;
    pub use crate::schedule::LearningRateSchedule;
}
