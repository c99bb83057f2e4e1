//! Per-generation sample slots

use crate::error::{ContractViolation, OptResult};
use crate::parameters::ParameterVector;

/// The overwritten-every-generation part of the optimizer state
///
/// Slot 0 is the unperturbed mean: its noise is always zero and its sample
/// vector holds the mean as it was before the last update.
#[derive(Clone, Debug)]
pub struct Population {
    /// Candidate vectors `X`
    pub(crate) samples: Vec<ParameterVector>,
    /// Drawn perturbations `Y`
    pub(crate) noise: Vec<ParameterVector>,
    /// Per-thread gradient accumulators, `[sample][thread]`
    pub(crate) partials: Vec<Vec<ParameterVector>>,
    /// Thread-reduced (then process-reduced) gradient per sample
    pub(crate) gradient_sums: Vec<ParameterVector>,
    /// Loss per sample
    pub(crate) losses: Vec<f64>,
}

impl Population {
    /// Slots for `size` samples of `dimension` parameters, `threads` partials each
    pub fn new(size: usize, dimension: usize, threads: usize, mean: &ParameterVector) -> Self {
        Self {
            samples: vec![mean.clone(); size],
            noise: vec![ParameterVector::zeros(dimension); size],
            partials: vec![vec![ParameterVector::zeros(dimension); threads]; size],
            gradient_sums: vec![ParameterVector::zeros(dimension); size],
            losses: vec![0.0; size],
        }
    }

    /// Number of sample slots
    pub fn size(&self) -> usize {
        self.samples.len()
    }

    /// Losses of the last reduced generation
    pub fn losses(&self) -> &[f64] {
        &self.losses
    }

    /// Noise vector of slot `i`
    pub fn noise(&self, i: usize) -> Option<&ParameterVector> {
        self.noise.get(i)
    }

    /// Gradient accumulator of `sample` owned by worker `thread`
    pub fn partial_mut(&mut self, sample: usize, thread: usize) -> OptResult<&mut ParameterVector> {
        let len = self.partials.len();
        let per_sample = self
            .partials
            .get_mut(sample)
            .ok_or(ContractViolation::SlotOutOfRange { slot: sample, len })?;
        let threads = per_sample.len();
        per_sample.get_mut(thread).ok_or_else(|| {
            ContractViolation::ThreadOutOfRange {
                thread,
                len: threads,
            }
            .into()
        })
    }

    /// Sum each sample's per-thread partials into its gradient sum and zero them
    pub fn reduce_partials(&mut self) -> OptResult<()> {
        for (sum, partials) in self.gradient_sums.iter_mut().zip(self.partials.iter_mut()) {
            sum.sum_partials(partials)?;
            partials.iter_mut().for_each(ParameterVector::clear);
        }
        Ok(())
    }
}
