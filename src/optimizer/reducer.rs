//! Cross-process reduction of gradients and losses, and sample broadcasts
//!
//! Buffers are moved into their requests while an operation is pending and
//! moved back when it completes, so nothing reads a half-reduced buffer.
//! With a single process every operation is skipped.

use crate::collective::{Collective, RequestSlot, RequestState, Tag};
use crate::error::{ContractViolation, OptResult};
use crate::parameters::{ParameterVector, Partition};

/// Request bookkeeping for one optimizer
#[derive(Debug)]
pub struct DistributedReducer {
    gradients: Vec<RequestSlot>,
    losses: RequestSlot,
    broadcasts: Vec<RequestSlot>,
}

impl DistributedReducer {
    /// Idle slots for `population_size` samples
    pub fn new(population_size: usize) -> Self {
        Self {
            gradients: (0..population_size)
                .map(|i| RequestSlot::new(format!("gradient sum {i}")))
                .collect(),
            losses: RequestSlot::new("loss vector"),
            broadcasts: (0..population_size)
                .map(|i| RequestSlot::new(format!("sample broadcast {i}")))
                .collect(),
        }
    }

    /// Start summing every gradient vector and the loss vector across ranks
    ///
    /// Fails without issuing anything if a previous reduction is still pending.
    pub fn start_reduction<C: Collective>(
        &mut self,
        comm: &C,
        gradients: &mut [ParameterVector],
        losses: &mut Vec<f64>,
    ) -> OptResult<()> {
        if comm.size() < 2 {
            return Ok(());
        }
        if let Some(busy) = self
            .gradients
            .iter()
            .chain(std::iter::once(&self.losses))
            .find(|s| s.state() != RequestState::Idle)
        {
            return Err(ContractViolation::RequestPending {
                what: busy.label().to_string(),
            }
            .into());
        }

        for (i, (slot, gradient)) in self.gradients.iter_mut().zip(gradients).enumerate() {
            let data = std::mem::replace(gradient, ParameterVector::zeros(0)).into_vec();
            slot.begin(|| comm.start_allreduce_sum(Tag::Gradient(i), data))?;
        }
        let data = std::mem::take(losses);
        self.losses.begin(|| comm.start_allreduce_sum(Tag::Losses, data))?;
        Ok(())
    }

    /// Wait for the reduction started by [`start_reduction`](Self::start_reduction)
    /// and move the summed buffers back
    pub fn finish_reduction<C: Collective>(
        &mut self,
        comm: &C,
        gradients: &mut [ParameterVector],
        losses: &mut Vec<f64>,
    ) -> OptResult<()> {
        if comm.size() < 2 {
            return Ok(());
        }
        if self
            .gradients
            .iter()
            .chain(std::iter::once(&self.losses))
            .any(|s| s.state() == RequestState::Idle)
        {
            return Err(ContractViolation::ReductionNotStarted.into());
        }

        for (slot, gradient) in self.gradients.iter_mut().zip(gradients) {
            if let Some(sum) = slot.complete()? {
                *gradient = ParameterVector::from_vec(sum);
            }
        }
        if let Some(sum) = self.losses.complete()? {
            *losses = sum;
        }
        Ok(())
    }

    /// Whether a reduction is in flight
    pub fn reduction_pending(&self) -> bool {
        self.losses.is_pending()
    }

    /// Publish this rank's slice of `buffer` for sample slot `slot`
    ///
    /// Any earlier broadcast on the same slot is waited on (and overwritten)
    /// first.
    pub fn start_broadcast<C: Collective>(
        &mut self,
        comm: &C,
        partition: &Partition,
        slot: usize,
        buffer: &ParameterVector,
    ) -> OptResult<()> {
        if comm.size() < 2 {
            return Ok(());
        }
        let request_slot = self.broadcast_slot(slot)?;
        request_slot.complete()?;
        let data = buffer.as_slice().to_vec();
        request_slot.begin(|| comm.start_allgather(Tag::Samples(slot), data, partition))
    }

    /// Wait for sample slot `slot` and write the gathered vector into `buffer`
    ///
    /// A no-op when nothing is pending.
    pub fn finish_broadcast(
        &mut self,
        slot: usize,
        buffer: &mut ParameterVector,
    ) -> OptResult<()> {
        if let Some(gathered) = self.broadcast_slot(slot)?.complete()? {
            buffer.replace(gathered)?;
        }
        Ok(())
    }

    /// Whether sample slot `slot` has a broadcast in flight
    pub fn broadcast_pending(&self, slot: usize) -> bool {
        self.broadcasts.get(slot).is_some_and(RequestSlot::is_pending)
    }

    fn broadcast_slot(&mut self, slot: usize) -> OptResult<&mut RequestSlot> {
        let len = self.broadcasts.len();
        self.broadcasts
            .get_mut(slot)
            .ok_or_else(|| ContractViolation::SlotOutOfRange { slot, len }.into())
    }
}
