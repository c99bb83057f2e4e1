//! Cross-process collectives
//!
//! The optimizer never shares memory across processes. Every exchange goes
//! through a [`Collective`]: buffers move into a [`Request`] when an
//! operation starts and come back out of [`Request::wait`] once it is
//! complete, which is the owned-buffer form of an in-place non-blocking
//! allreduce / allgather.

mod local;
mod request;
mod single;

pub use local::{LocalEndpoint, LocalGroup};
pub use request::{Request, RequestSlot, RequestState};
pub use single::SingleProcess;

use crate::error::OptResult;
use crate::parameters::Partition;

/// Identifies the buffer a collective operation works on
///
/// Every rank issues operations for a tag in the same order, so
/// `(tag, sequence)` matches contributions across ranks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Gradient sum of one sample slot
    Gradient(usize),
    /// The loss vector
    Losses,
    /// Broadcast of one sample slot (slot 0 is the mean)
    Samples(usize),
    /// Evolution path gathered for a checkpoint
    PathCheckpoint,
    /// Diagonal covariance gathered for a checkpoint
    CovarianceCheckpoint,
}

/// Non-blocking collective operations over a fixed group of ranks
pub trait Collective: Send + Sync {
    /// This process's rank
    fn rank(&self) -> usize;

    /// Number of cooperating processes
    fn size(&self) -> usize;

    /// Start an element-wise sum of `data` across all ranks
    ///
    /// Every rank receives the same sum, accumulated in rank order.
    fn start_allreduce_sum(&self, tag: Tag, data: Vec<f64>) -> OptResult<Request>;

    /// Start filling every other rank's slice of `data` with that rank's values
    ///
    /// Only the caller's own slice of `data` is read.
    fn start_allgather(&self, tag: Tag, data: Vec<f64>, partition: &Partition)
        -> OptResult<Request>;
}

impl<C: Collective + ?Sized> Collective for std::sync::Arc<C> {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn start_allreduce_sum(&self, tag: Tag, data: Vec<f64>) -> OptResult<Request> {
        (**self).start_allreduce_sum(tag, data)
    }

    fn start_allgather(
        &self,
        tag: Tag,
        data: Vec<f64>,
        partition: &Partition,
    ) -> OptResult<Request> {
        (**self).start_allgather(tag, data, partition)
    }
}

pub mod prelude {
    pub use super::{
        Collective, LocalEndpoint, LocalGroup, Request, RequestSlot, RequestState,
        SingleProcess, Tag,
    };
}
