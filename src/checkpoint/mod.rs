//! Checkpointing support for optimizer state persistence
//!
//! Two layers: the three named parameter artifacts (`{prefix}_weights`,
//! `{prefix}_pathCov`, `{prefix}_diagCov`) written by
//! [`AdamCmaOptimizer::save`](crate::optimizer::AdamCmaOptimizer::save), and
//! a full [`OptimizerState`] snapshot that also carries the Adam moments and
//! the generation counter.

mod recovery;
mod state;

pub use recovery::*;
pub use state::*;

/// Prelude for checkpoint module
pub mod prelude {
    pub use super::recovery::*;
    pub use super::state::*;
}
