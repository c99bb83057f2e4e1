//! Hybrid diagonal-CMA / Adam optimizer
//!
//! An [`AdamCmaOptimizer`] owns the long-lived state of one parameter
//! vector: the mean, the diagonal covariance, the evolution path and the
//! Adam moments. One generation is driven by the caller:
//!
//! 1. evaluate every [`sample`](AdamCmaOptimizer::sample) and write its
//!    gradient into the per-thread accumulators from
//!    [`gradient_partial_mut`](AdamCmaOptimizer::gradient_partial_mut),
//! 2. hand the losses to [`prepare_update`](AdamCmaOptimizer::prepare_update),
//!    which starts the cross-process reduction and returns,
//! 3. call [`apply_update`](AdamCmaOptimizer::apply_update), which waits
//!    on the reduction and runs the update phases:
//!
//! ```text
//! recombine mean/gradient -> Adam step -> noise statistics -> covariance/path -> resample
//! ```
//!
//! Every phase runs on the optimizer's thread pool over the same per-thread
//! chunks of the owned slice. A phase only starts once the previous one has
//! joined. Chunk `k` always draws from random stream `k`, so a fixed seed
//! and thread count give bit-identical trajectories.

pub mod adam;
pub mod covariance;
mod persistence;
pub mod population;
pub mod recombination;
pub mod reducer;
pub mod sampler;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info};

use crate::collective::{Collective, SingleProcess};
use crate::config::OptimizerConfig;
use crate::diagnostics::{mean_square, OptimizerMetrics};
use crate::error::{ContractViolation, OptResult, OptimizerError};
use crate::parameters::{ParameterVector, Partition, SliceRange};
use crate::random::StreamSet;

use adam::{AdamMoments, AdamStep};
use covariance::CovarianceUpdate;
use population::Population;
use recombination::{noise_statistics_chunk, rank_order, recombine_chunk, RankWeights};
use reducer::DistributedReducer;
use sampler::{accelerated_chunk, sample_chunk};

/// Weight-update engine for one learnable parameter vector
pub struct AdamCmaOptimizer<C: Collective = SingleProcess> {
    config: OptimizerConfig,
    comm: C,
    partition: Partition,
    owned: SliceRange,
    chunks: Vec<SliceRange>,
    pool: ThreadPool,
    streams: StreamSet,
    weights: RankWeights,
    covariance: CovarianceUpdate,

    mean: ParameterVector,
    path: ParameterVector,
    std_dev: ParameterVector,
    moments: AdamMoments,
    population: Population,

    // per-generation accumulators, rewritten chunk by chunk every apply
    gradient_sum: ParameterVector,
    mean_shift: ParameterVector,
    second_moment: ParameterVector,

    reducer: DistributedReducer,
    generation: u64,
    prepared: bool,
    poisoned: bool,
    best_loss: Option<f64>,
}

impl AdamCmaOptimizer<SingleProcess> {
    /// Optimizer for a run without cooperating processes
    pub fn single_process(
        config: OptimizerConfig,
        initial_mean: ParameterVector,
    ) -> OptResult<Self> {
        Self::new(config, initial_mean, SingleProcess)
    }
}

impl<C: Collective> AdamCmaOptimizer<C> {
    /// Build the optimizer and draw the first generation
    ///
    /// `initial_mean` must be identical on every rank. Returns once every
    /// sample has been gathered.
    pub fn new(
        config: OptimizerConfig,
        initial_mean: ParameterVector,
        comm: C,
    ) -> OptResult<Self> {
        config.validate()?;
        if initial_mean.len() != config.dimension {
            return Err(ContractViolation::DimensionMismatch {
                expected: config.dimension,
                actual: initial_mean.len(),
            }
            .into());
        }
        if comm.size() == 0 || comm.rank() >= comm.size() {
            return Err(OptimizerError::Configuration(format!(
                "rank {} outside a group of {}",
                comm.rank(),
                comm.size()
            )));
        }

        let weights = match &config.rank_weights {
            Some(w) => RankWeights::new(w.clone())?,
            None => RankWeights::log_linear(config.population_size),
        };
        let covariance = CovarianceUpdate::new(&weights);
        let partition = Partition::new(config.dimension, comm.size());
        let owned = partition.slice(comm.rank());
        let chunks = owned.split(config.num_threads);
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()
            .map_err(|e| OptimizerError::Configuration(format!("thread pool: {e}")))?;
        let streams = StreamSet::for_rank(config.seed, comm.rank(), config.num_threads);

        let dimension = config.dimension;
        let population = Population::new(
            config.population_size,
            dimension,
            config.num_threads,
            &initial_mean,
        );

        info!(
            dimension,
            population = config.population_size,
            rank = comm.rank(),
            processes = comm.size(),
            slice_start = owned.start,
            slice_count = owned.count,
            threads = config.num_threads,
            mu_eff = weights.mu_eff(),
            "created adam-cma optimizer"
        );

        let mut optimizer = Self {
            reducer: DistributedReducer::new(config.population_size),
            config,
            comm,
            partition,
            owned,
            chunks,
            pool,
            streams,
            weights,
            covariance,
            mean: initial_mean,
            path: ParameterVector::zeros(dimension),
            std_dev: ParameterVector::filled(dimension, 1.0),
            moments: AdamMoments::zeros(dimension),
            population,
            gradient_sum: ParameterVector::zeros(dimension),
            mean_shift: ParameterVector::zeros(dimension),
            second_moment: ParameterVector::zeros(dimension),
            generation: 0,
            prepared: false,
            poisoned: false,
            best_loss: None,
        };
        optimizer.redraw_population()?;
        Ok(optimizer)
    }

    /// The configuration this optimizer was built with
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Number of `prepare_update` calls so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// This process's rank
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Number of cooperating processes
    pub fn processes(&self) -> usize {
        self.comm.size()
    }

    /// The index range this process updates
    pub fn owned_slice(&self) -> SliceRange {
        self.owned
    }

    /// Index space partition across processes
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Current mean
    pub fn mean(&self) -> &ParameterVector {
        &self.mean
    }

    /// Evolution path (authoritative on the owned slice)
    pub fn path(&self) -> &ParameterVector {
        &self.path
    }

    /// Diagonal standard deviations (authoritative on the owned slice)
    pub fn std_dev(&self) -> &ParameterVector {
        &self.std_dev
    }

    /// Adam moment accumulators
    pub fn moments(&self) -> &AdamMoments {
        &self.moments
    }

    /// Recombination weights by rank position
    pub fn rank_weights(&self) -> &RankWeights {
        &self.weights
    }

    /// Number of sample slots
    pub fn population_size(&self) -> usize {
        self.population.size()
    }

    /// Reduced losses of the last applied generation
    pub fn losses(&self) -> &[f64] {
        self.population.losses()
    }

    /// Whether an earlier fatal error disabled the optimizer
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether `prepare_update` was called and `apply_update` has not run yet
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Learning rate at the current generation
    pub fn learning_rate(&self) -> f64 {
        self.config
            .schedule
            .value_at(self.config.learning_rate, self.generation)
    }

    /// Candidate vector of slot `i`; slot 0 is the current mean
    ///
    /// Waits for the slot's pending gather first.
    pub fn sample(&mut self, i: usize) -> OptResult<&ParameterVector> {
        self.ensure_healthy()?;
        let waited = self.wait_sample(i);
        self.track(waited)?;
        Ok(if i == 0 {
            &self.mean
        } else {
            &self.population.samples[i]
        })
    }

    /// Perturbation drawn for slot `i` (owned slice only)
    pub fn noise(&self, i: usize) -> Option<&ParameterVector> {
        self.population.noise(i)
    }

    /// Gradient accumulator that worker `thread` fills for `sample`
    ///
    /// The mean moves along the accumulated vector, so callers write the
    /// descent direction (the negative loss gradient).
    pub fn gradient_partial_mut(
        &mut self,
        sample: usize,
        thread: usize,
    ) -> OptResult<&mut ParameterVector> {
        self.ensure_healthy()?;
        let checked = self.population.partial_mut(sample, thread).map(|_| ());
        self.track(checked)?;
        self.population.partial_mut(sample, thread)
    }

    /// Submit this process's losses and start the cross-process reduction
    ///
    /// `losses` must hold exactly one value per sample slot.
    pub fn prepare_update(&mut self, losses: &[f64]) -> OptResult<()> {
        self.ensure_healthy()?;
        let result = self.start_generation(losses);
        self.track(result)
    }

    /// Wait for the reduction and advance the search distribution one generation
    pub fn apply_update(&mut self) -> OptResult<()> {
        self.ensure_healthy()?;
        let result = self.update_generation();
        self.track(result)
    }

    /// Summary of the current state
    pub fn metrics(&self) -> OptimizerMetrics {
        OptimizerMetrics {
            generation: self.generation,
            learning_rate: self.learning_rate(),
            avg_covariance: self.average_covariance(),
            best_loss: self.best_loss,
            mean_norm: self.mean.norm(),
        }
    }

    /// Append the `avgC` column value to `buf`
    pub fn write_metrics(&self, buf: &mut String) {
        self.metrics().write_metrics(buf);
    }

    /// Append the `avgC` column header to `buf`
    pub fn write_headers(&self, buf: &mut String) {
        OptimizerMetrics::write_headers(buf);
    }

    fn average_covariance(&self) -> f64 {
        mean_square(self.std_dev.slice(self.owned))
    }

    fn ensure_healthy(&self) -> OptResult<()> {
        if self.poisoned {
            return Err(OptimizerError::Poisoned);
        }
        Ok(())
    }

    fn track<T>(&mut self, result: OptResult<T>) -> OptResult<T> {
        if let Err(err) = &result {
            if err.poisons() {
                error!(rank = self.comm.rank(), error = %err, "optimizer poisoned");
                self.poisoned = true;
            }
        }
        result
    }

    fn wait_sample(&mut self, i: usize) -> OptResult<()> {
        let len = self.population.size();
        if i >= len {
            return Err(ContractViolation::SlotOutOfRange { slot: i, len }.into());
        }
        let buffer = if i == 0 {
            &mut self.mean
        } else {
            &mut self.population.samples[i]
        };
        self.reducer.finish_broadcast(i, buffer)
    }

    fn start_generation(&mut self, losses: &[f64]) -> OptResult<()> {
        let expected = self.population.size();
        if losses.len() != expected {
            return Err(ContractViolation::LossCountMismatch {
                expected,
                actual: losses.len(),
            }
            .into());
        }
        if self.prepared {
            return Err(ContractViolation::RequestPending {
                what: "loss vector".to_string(),
            }
            .into());
        }

        // buffers are about to be reused; gathers still writing into them must land first
        for i in 0..expected {
            self.wait_sample(i)?;
        }

        self.population.losses.clear();
        self.population.losses.extend_from_slice(losses);
        self.population.reduce_partials()?;
        self.reducer.start_reduction(
            &self.comm,
            &mut self.population.gradient_sums,
            &mut self.population.losses,
        )?;

        self.generation += 1;
        self.prepared = true;
        Ok(())
    }

    fn update_generation(&mut self) -> OptResult<()> {
        if !self.prepared {
            return Err(ContractViolation::ApplyWithoutPrepare.into());
        }
        self.reducer.finish_reduction(
            &self.comm,
            &mut self.population.gradient_sums,
            &mut self.population.losses,
        )?;
        self.prepared = false;

        let order = rank_order(&self.population.losses);
        let eta = self.learning_rate();
        let adam = AdamStep::new(&self.config, eta, self.generation);

        self.population.samples[0].copy_from(&self.mean)?;
        self.population.noise[0].clear();
        self.gradient_sum.clear();

        self.recombine(&order);
        self.adam_step(&adam)?;
        self.reducer
            .start_broadcast(&self.comm, &self.partition, 0, &self.mean)?;
        self.accumulate_noise_statistics(&order);
        self.adapt_covariance();
        self.resample(eta, self.config.accelerated_sampling)?;
        self.reducer.finish_broadcast(0, &mut self.mean)?;

        self.best_loss = order.first().map(|&i| self.population.losses[i]);
        debug!(
            generation = self.generation,
            eta,
            corrected_eta = adam.corrected_eta(),
            best_loss = ?self.best_loss,
            avg_covariance = self.average_covariance(),
            "applied generation"
        );
        Ok(())
    }

    fn recombine(&mut self, order: &[usize]) {
        let weights = &self.weights;
        let samples = &self.population.samples;
        let gradients = &self.population.gradient_sums;
        let views: Vec<_> = self
            .chunks
            .iter()
            .copied()
            .zip(self.mean.chunks_mut(&self.chunks))
            .zip(self.gradient_sum.chunks_mut(&self.chunks))
            .map(|((chunk, mean), gradient)| (chunk, mean, gradient))
            .collect();

        self.pool.install(|| {
            views.into_par_iter().for_each(|(chunk, mean, gradient)| {
                recombine_chunk(weights, order, samples, gradients, chunk, mean, gradient);
            });
        });
    }

    fn adam_step(&mut self, adam: &AdamStep) -> OptResult<()> {
        let gradient_sum = &self.gradient_sum;
        let views: Vec<_> = self
            .chunks
            .iter()
            .copied()
            .zip(self.mean.chunks_mut(&self.chunks))
            .zip(self.moments.first.chunks_mut(&self.chunks))
            .zip(self.moments.second.chunks_mut(&self.chunks))
            .map(|(((chunk, mean), first), second)| (chunk, mean, first, second))
            .collect();

        let failures: Vec<Option<(usize, f64)>> = self.pool.install(|| {
            views
                .into_par_iter()
                .map(|(chunk, mean, first, second)| {
                    adam.apply_chunk(chunk.start, mean, first, second, gradient_sum.slice(chunk))
                })
                .collect()
        });

        match failures.into_iter().flatten().next() {
            Some((index, value)) => Err(OptimizerError::Numerical { index, value }),
            None => Ok(()),
        }
    }

    fn accumulate_noise_statistics(&mut self, order: &[usize]) {
        let weights = &self.weights;
        let noise = &self.population.noise;
        let views: Vec<_> = self
            .chunks
            .iter()
            .copied()
            .zip(self.mean_shift.chunks_mut(&self.chunks))
            .zip(self.second_moment.chunks_mut(&self.chunks))
            .map(|((chunk, a), b)| (chunk, a, b))
            .collect();

        self.pool.install(|| {
            views.into_par_iter().for_each(|(chunk, a, b)| {
                noise_statistics_chunk(weights, order, noise, chunk, a, b);
            });
        });
    }

    fn adapt_covariance(&mut self) {
        let update = self.covariance;
        let mean_shift = &self.mean_shift;
        let second_moment = &self.second_moment;
        let views: Vec<_> = self
            .chunks
            .iter()
            .copied()
            .zip(self.path.chunks_mut(&self.chunks))
            .zip(self.std_dev.chunks_mut(&self.chunks))
            .map(|((chunk, path), std_dev)| (chunk, path, std_dev))
            .collect();

        self.pool.install(|| {
            views.into_par_iter().for_each(|(chunk, path, std_dev)| {
                update.apply_chunk(
                    path,
                    std_dev,
                    mean_shift.slice(chunk),
                    second_moment.slice(chunk),
                );
            });
        });
    }

    /// Draw samples 1.. on the owned slice and start their gathers
    fn resample(&mut self, eta: f64, accelerated: bool) -> OptResult<()> {
        let mean = &self.mean;
        let std_dev = &self.std_dev;
        let mean_shift = &self.mean_shift;
        let chunks = &self.chunks;

        // per chunk: (noise, sample) views of slots 1.. in slot order
        let mut per_chunk: Vec<Vec<(&mut [f64], &mut [f64])>> =
            chunks.iter().map(|_| Vec::new()).collect();
        let population = &mut self.population;
        for (noise, sample) in population
            .noise
            .iter_mut()
            .zip(population.samples.iter_mut())
            .skip(1)
        {
            let views = noise.chunks_mut(chunks).into_iter().zip(sample.chunks_mut(chunks));
            for (slots, view) in per_chunk.iter_mut().zip(views) {
                slots.push(view);
            }
        }

        let streams = self.streams.streams_mut();
        self.pool.install(|| {
            streams
                .par_iter_mut()
                .zip(chunks.par_iter())
                .zip(per_chunk.into_par_iter())
                .for_each(|((rng, &chunk), slots)| {
                    let m = mean.slice(chunk);
                    let s = std_dev.slice(chunk);
                    for (k, (noise, sample)) in slots.into_iter().enumerate() {
                        if accelerated && k == 0 {
                            accelerated_chunk(eta, m, mean_shift.slice(chunk), noise, sample);
                        } else {
                            sample_chunk(rng, eta, m, s, noise, sample);
                        }
                    }
                });
        });

        for i in 1..self.population.size() {
            self.reducer.start_broadcast(
                &self.comm,
                &self.partition,
                i,
                &self.population.samples[i],
            )?;
        }
        Ok(())
    }

    /// Resample from the current mean and covariance and wait for every gather
    fn redraw_population(&mut self) -> OptResult<()> {
        let eta = self.learning_rate();
        self.resample(eta, false)?;
        for i in 0..self.population.size() {
            self.wait_sample(i)?;
        }
        Ok(())
    }
}

/// Prelude for optimizer module
pub mod prelude {
    pub use super::adam::{AdamMoments, AdamStep, BETA1, BETA2};
    pub use super::covariance::{CovarianceUpdate, C1_COV, C_SIG, MAX_STD_DEV, MIN_STD_DEV};
    pub use super::population::Population;
    pub use super::recombination::{rank_order, RankWeights};
    pub use super::reducer::DistributedReducer;
    pub use super::AdamCmaOptimizer;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecayStyle;
    use approx::assert_relative_eq;

    fn config(population: usize, dimension: usize, threads: usize) -> OptimizerConfig {
        OptimizerConfig::builder()
            .population_size(population)
            .dimension(dimension)
            .num_threads(threads)
            .learning_rate(0.01)
            .seed(11)
            .build()
            .unwrap()
    }

    #[test]
    fn test_construction_draws_first_generation() {
        let mut opt =
            AdamCmaOptimizer::single_process(config(4, 6, 2), ParameterVector::filled(6, 1.0))
                .unwrap();

        assert_eq!(opt.sample(0).unwrap().as_slice(), &[1.0; 6]);
        for i in 1..4 {
            let x = opt.sample(i).unwrap().clone();
            let y = opt.noise(i).unwrap();
            for w in 0..6 {
                assert_relative_eq!(x.as_slice()[w], 1.0 + 0.01 * y.as_slice()[w]);
            }
            assert!(y.as_slice().iter().any(|&v| v != 0.0));
        }
        assert_eq!(opt.std_dev().as_slice(), &[1.0; 6]);
        assert_eq!(opt.path().as_slice(), &[0.0; 6]);
    }

    #[test]
    fn test_single_sample_is_pure_adam() {
        let cfg = OptimizerConfig::builder()
            .population_size(1)
            .dimension(2)
            .batch_size(2)
            .learning_rate(0.1)
            .weight_decay(0.5, DecayStyle::L2)
            .build()
            .unwrap();
        let mut opt =
            AdamCmaOptimizer::single_process(cfg, ParameterVector::from_vec(vec![1.0, -2.0]))
                .unwrap();

        opt.gradient_partial_mut(0, 0)
            .unwrap()
            .as_mut_slice()
            .copy_from_slice(&[4.0, 2.0]);
        opt.prepare_update(&[0.3]).unwrap();
        opt.apply_update().unwrap();

        // t = 1: eta' = 0.1 * sqrt(0.001) / 0.1
        let eta = 0.1 * (1.0f64 - 0.999).sqrt() / (1.0 - 0.9);
        let start = [(1.0f64, 4.0f64), (-2.0, 2.0)];
        for (w, &(w0, g)) in start.iter().enumerate() {
            let dw = 0.5 * g - 0.5 * w0;
            let m1 = 0.1 * dw;
            let m2 = 0.001 * dw * dw;
            let expected = w0 + eta * m1 / (1e-8 + m2.sqrt());
            assert_relative_eq!(opt.mean().as_slice()[w], expected, epsilon = 1e-12);
            assert_relative_eq!(opt.moments().first.as_slice()[w], m1, epsilon = 1e-15);
        }
    }

    #[test]
    fn test_apply_without_prepare_poisons() {
        let mut opt =
            AdamCmaOptimizer::single_process(config(2, 3, 1), ParameterVector::zeros(3)).unwrap();

        let err = opt.apply_update().unwrap_err();
        assert!(matches!(
            err,
            OptimizerError::Contract(ContractViolation::ApplyWithoutPrepare)
        ));
        assert!(opt.is_poisoned());
        assert!(matches!(
            opt.prepare_update(&[0.0, 0.0]),
            Err(OptimizerError::Poisoned)
        ));
    }

    #[test]
    fn test_loss_count_mismatch() {
        let mut opt =
            AdamCmaOptimizer::single_process(config(3, 2, 1), ParameterVector::zeros(2)).unwrap();
        let err = opt.prepare_update(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            OptimizerError::Contract(ContractViolation::LossCountMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_double_prepare_rejected() {
        let mut opt =
            AdamCmaOptimizer::single_process(config(2, 2, 1), ParameterVector::zeros(2)).unwrap();
        opt.prepare_update(&[1.0, 2.0]).unwrap();
        assert!(matches!(
            opt.prepare_update(&[1.0, 2.0]),
            Err(OptimizerError::Contract(ContractViolation::RequestPending { .. }))
        ));
    }

    #[test]
    fn test_wrong_initial_dimension() {
        let result = AdamCmaOptimizer::single_process(config(2, 4, 1), ParameterVector::zeros(3));
        assert!(matches!(
            result,
            Err(OptimizerError::Contract(ContractViolation::DimensionMismatch { .. }))
        ));
    }

    #[test]
    fn test_generation_and_metrics() {
        let mut opt =
            AdamCmaOptimizer::single_process(config(4, 5, 3), ParameterVector::zeros(5)).unwrap();
        let mut header = String::new();
        opt.write_headers(&mut header);
        assert_eq!(header, "| avgC ");

        for _ in 0..3 {
            opt.prepare_update(&[4.0, 3.0, 2.0, 1.0]).unwrap();
            opt.apply_update().unwrap();
        }
        let metrics = opt.metrics();
        assert_eq!(metrics.generation, 3);
        assert_eq!(metrics.best_loss, Some(1.0));
        assert!(metrics.avg_covariance > 0.0);

        let mut line = String::new();
        opt.write_metrics(&mut line);
        assert!(line.starts_with(' '));
    }

    #[test]
    fn test_gradient_partials_are_cleared_after_prepare() {
        let mut opt =
            AdamCmaOptimizer::single_process(config(2, 2, 2), ParameterVector::zeros(2)).unwrap();
        opt.gradient_partial_mut(1, 1).unwrap().fill(3.0);
        opt.prepare_update(&[0.0, 1.0]).unwrap();
        assert_eq!(opt.gradient_partial_mut(1, 1).unwrap().as_slice(), &[0.0, 0.0]);
        assert!(opt.gradient_partial_mut(2, 0).is_err());
    }
}
