//! Partition of the parameter index space across cooperating processes

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// A contiguous half-open index range `[start, start + count)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRange {
    /// First index
    pub start: usize,
    /// Number of indices
    pub count: usize,
}

impl SliceRange {
    /// Create a new range
    pub fn new(start: usize, count: usize) -> Self {
        Self { start, count }
    }

    /// One past the last index
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    /// As a std range
    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }

    /// Whether the range holds no indices
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Split into `parts` contiguous chunks, the first `count % parts` one longer.
    ///
    /// Always returns exactly `parts` chunks; trailing chunks may be empty.
    pub fn split(&self, parts: usize) -> Vec<SliceRange> {
        let parts = parts.max(1);
        let base = self.count / parts;
        let extra = self.count % parts;
        let mut start = self.start;
        (0..parts)
            .map(|k| {
                let len = base + usize::from(k < extra);
                let chunk = SliceRange::new(start, len);
                start += len;
                chunk
            })
            .collect()
    }
}

/// Per-process ownership of a `dimension`-long vector
///
/// Every rank owns `stride = ceil(dimension / processes)` indices except the
/// tail ranks, which may own fewer (or none).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    dimension: usize,
    slices: Vec<SliceRange>,
}

impl Partition {
    /// Partition `dimension` indices across `processes` ranks
    pub fn new(dimension: usize, processes: usize) -> Self {
        let processes = processes.max(1);
        let stride = dimension.div_ceil(processes);
        let slices = (0..processes)
            .map(|r| {
                let start = (r * stride).min(dimension);
                let count = stride.min(dimension - start);
                SliceRange::new(start, count)
            })
            .collect();
        Self { dimension, slices }
    }

    /// Total number of indices
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of ranks
    pub fn processes(&self) -> usize {
        self.slices.len()
    }

    /// The slice owned by `rank`
    pub fn slice(&self, rank: usize) -> SliceRange {
        self.slices[rank]
    }

    /// All slices in rank order
    pub fn slices(&self) -> &[SliceRange] {
        &self.slices
    }
}
