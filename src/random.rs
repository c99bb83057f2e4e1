//! Per-thread random streams
//!
//! Each worker owns one stream. All streams are seeded once from a single
//! root seed, so equal seeds and thread counts give equal draws no matter
//! how the pool schedules work.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const RANK_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// One independent stream per worker thread
#[derive(Clone, Debug)]
pub struct StreamSet {
    streams: Vec<StdRng>,
}

impl StreamSet {
    /// Derive `count` streams from `seed`
    pub fn new(seed: u64, count: usize) -> Self {
        Self::for_rank(seed, 0, count)
    }

    /// Derive `count` streams for process `rank`
    ///
    /// Ranks get unrelated streams so their owned slices draw independent noise.
    pub fn for_rank(seed: u64, rank: usize, count: usize) -> Self {
        let mut root = StdRng::seed_from_u64(seed ^ (rank as u64).wrapping_mul(RANK_MIX));
        let streams = (0..count.max(1))
            .map(|_| StdRng::seed_from_u64(root.gen::<u64>()))
            .collect();
        Self { streams }
    }

    /// Number of streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Always false; a set holds at least one stream
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Stream `k`
    pub fn stream_mut(&mut self, k: usize) -> &mut StdRng {
        &mut self.streams[k]
    }

    /// All streams, in assignment order
    pub fn streams_mut(&mut self) -> &mut [StdRng] {
        &mut self.streams
    }
}

/// One standard-normal draw
#[inline]
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.sample(StandardNormal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_draws() {
        let mut a = StreamSet::new(42, 3);
        let mut b = StreamSet::new(42, 3);
        for k in 0..3 {
            let xa: Vec<f64> = (0..5).map(|_| standard_normal(a.stream_mut(k))).collect();
            let xb: Vec<f64> = (0..5).map(|_| standard_normal(b.stream_mut(k))).collect();
            assert_eq!(xa, xb);
        }
    }

    #[test]
    fn test_streams_are_distinct() {
        let mut set = StreamSet::new(7, 2);
        let x0 = standard_normal(set.stream_mut(0));
        let x1 = standard_normal(set.stream_mut(1));
        assert_ne!(x0, x1);
    }

    #[test]
    fn test_ranks_differ() {
        let mut r0 = StreamSet::for_rank(5, 0, 1);
        let mut r1 = StreamSet::for_rank(5, 1, 1);
        let mut plain = StreamSet::new(5, 1);
        let x0 = standard_normal(r0.stream_mut(0));
        assert_ne!(x0, standard_normal(r1.stream_mut(0)));
        assert_eq!(x0, standard_normal(plain.stream_mut(0)));
    }

    #[test]
    fn test_at_least_one_stream() {
        let set = StreamSet::new(0, 0);
        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
    }
}
