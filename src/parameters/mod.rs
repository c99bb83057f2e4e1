//! Parameter buffers
//!
//! Owned contiguous vectors, the per-process partition of their index
//! space, and their on-disk artifact format.

pub mod artifact;
pub mod partition;
pub mod vector;

pub use partition::{Partition, SliceRange};
pub use vector::ParameterVector;

pub mod prelude {
    pub use super::artifact::*;
    pub use super::partition::*;
    pub use super::vector::*;
}
