//! Named artifacts and full-state snapshots

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use super::AdamCmaOptimizer;
use crate::checkpoint::{
    self, artifact_path, backup_prefix, CheckpointFormat, OptimizerState, RestartStatus,
    COVARIANCE_ARTIFACT, PATH_ARTIFACT, STATE_VERSION, WEIGHTS_ARTIFACT,
};
use crate::collective::{Collective, Tag};
use crate::error::{CheckpointError, ContractViolation, OptResult};
use crate::parameters::artifact::{load_vector, save_vector};
use crate::parameters::ParameterVector;

impl<C: Collective> AdamCmaOptimizer<C> {
    /// Write the mean, evolution path and diagonal covariance as
    /// `{prefix}_weights`, `{prefix}_pathCov` and `{prefix}_diagCov`
    ///
    /// With `backup` the same three are also written under
    /// `{prefix}_{generation:09}`. Every rank must call this; the owned
    /// slices are gathered first and rank 0 writes the files.
    pub fn save(&mut self, prefix: impl AsRef<Path>, backup: bool) -> OptResult<()> {
        self.ensure_healthy()?;
        let gathered = self.gather_adapted_state();
        let (path, std_dev) = self.track(gathered)?;
        if self.comm.rank() != 0 {
            return Ok(());
        }

        let prefix = prefix.as_ref();
        self.write_artifacts(prefix, &path, &std_dev)?;
        if backup {
            self.write_artifacts(&backup_prefix(prefix, self.generation), &path, &std_dev)?;
        }
        info!(
            prefix = %prefix.display(),
            generation = self.generation,
            backup,
            "saved optimizer artifacts"
        );
        Ok(())
    }

    /// Restore the evolution path, the diagonal covariance and then the mean
    ///
    /// Missing path or covariance artifacts keep the current values. The
    /// status reports whether the mean itself was found. When anything was
    /// restored the population is redrawn from the restored distribution.
    pub fn restart(&mut self, prefix: impl AsRef<Path>) -> OptResult<RestartStatus> {
        self.ensure_healthy()?;
        let idle = self.ensure_idle();
        self.track(idle)?;

        let prefix = prefix.as_ref();
        let dimension = self.config.dimension;
        let path = read_optional(&artifact_path(prefix, PATH_ARTIFACT), dimension)?;
        let std_dev = read_optional(&artifact_path(prefix, COVARIANCE_ARTIFACT), dimension)?;
        let mean = read_optional(&artifact_path(prefix, WEIGHTS_ARTIFACT), dimension)?;

        let restored_any = path.is_some() || std_dev.is_some() || mean.is_some();
        if let Some(path) = path {
            self.path = path;
        }
        if let Some(std_dev) = std_dev {
            self.std_dev = std_dev;
        }
        let status = match mean {
            Some(mean) => {
                self.mean = mean;
                RestartStatus::Restored
            }
            None => RestartStatus::Missing,
        };

        if restored_any {
            let redrawn = self.redraw_population();
            self.track(redrawn)?;
        }
        info!(prefix = %prefix.display(), ?status, "restarted optimizer");
        Ok(status)
    }

    /// Capture every piece of long-lived state held by this rank
    pub fn state_snapshot(&self) -> OptimizerState {
        OptimizerState {
            version: STATE_VERSION,
            generation: self.generation,
            rank: self.comm.rank(),
            processes: self.comm.size(),
            mean: self.mean.clone(),
            path: self.path.clone(),
            std_dev: self.std_dev.clone(),
            moments: self.moments.clone(),
            metadata: HashMap::new(),
        }
    }

    /// Replace the long-lived state and redraw the population from it
    pub fn restore_state(&mut self, state: OptimizerState) -> OptResult<()> {
        self.ensure_healthy()?;
        let idle = self.ensure_idle();
        self.track(idle)?;
        state.validate(self.config.dimension)?;

        self.generation = state.generation;
        self.mean = state.mean;
        self.path = state.path;
        self.std_dev = state.std_dev;
        self.moments = state.moments;
        self.best_loss = None;

        let redrawn = self.redraw_population();
        self.track(redrawn)
    }

    /// Write [`state_snapshot`](Self::state_snapshot) to `path`
    pub fn save_state(&self, path: impl AsRef<Path>, format: CheckpointFormat) -> OptResult<()> {
        let path = path.as_ref();
        checkpoint::save_state(&self.state_snapshot(), path, format)?;
        info!(
            path = %path.display(),
            generation = self.generation,
            ?format,
            "saved optimizer state"
        );
        Ok(())
    }

    /// Read a snapshot written by [`save_state`](Self::save_state) and restore it
    pub fn load_state(&mut self, path: impl AsRef<Path>) -> OptResult<()> {
        let path = path.as_ref();
        let state = checkpoint::load_state(path)?;
        self.restore_state(state)?;
        info!(path = %path.display(), generation = self.generation, "loaded optimizer state");
        Ok(())
    }

    fn ensure_idle(&self) -> OptResult<()> {
        if self.prepared {
            return Err(ContractViolation::RequestPending {
                what: "loss vector".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Full path and covariance vectors, gathered from every rank's slice
    fn gather_adapted_state(&self) -> OptResult<(ParameterVector, ParameterVector)> {
        if self.comm.size() < 2 {
            return Ok((self.path.clone(), self.std_dev.clone()));
        }
        let path = self
            .comm
            .start_allgather(Tag::PathCheckpoint, self.path.as_slice().to_vec(), &self.partition)?
            .wait()?;
        let std_dev = self
            .comm
            .start_allgather(
                Tag::CovarianceCheckpoint,
                self.std_dev.as_slice().to_vec(),
                &self.partition,
            )?
            .wait()?;
        Ok((ParameterVector::from_vec(path), ParameterVector::from_vec(std_dev)))
    }

    fn write_artifacts(
        &self,
        prefix: &Path,
        path: &ParameterVector,
        std_dev: &ParameterVector,
    ) -> Result<(), CheckpointError> {
        let precision = self.config.precision;
        save_vector(&self.mean, artifact_path(prefix, WEIGHTS_ARTIFACT), precision)?;
        save_vector(path, artifact_path(prefix, PATH_ARTIFACT), precision)?;
        save_vector(std_dev, artifact_path(prefix, COVARIANCE_ARTIFACT), precision)
    }
}

fn read_optional(
    path: &Path,
    dimension: usize,
) -> Result<Option<ParameterVector>, CheckpointError> {
    match load_vector(path, dimension) {
        Ok(vector) => Ok(Some(vector)),
        Err(CheckpointError::NotFound(_)) => {
            warn!(artifact = %path.display(), "artifact missing, keeping current values");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OptimizerConfig, Precision};
    use crate::error::OptimizerError;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn optimizer(precision: Precision) -> AdamCmaOptimizer {
        let config = OptimizerConfig::builder()
            .population_size(4)
            .dimension(5)
            .num_threads(2)
            .learning_rate(0.05)
            .precision(precision)
            .seed(3)
            .build()
            .unwrap();
        AdamCmaOptimizer::single_process(config, ParameterVector::filled(5, 0.5)).unwrap()
    }

    fn run(opt: &mut AdamCmaOptimizer, generations: usize) {
        for g in 0..generations {
            for i in 0..4 {
                opt.gradient_partial_mut(i, 0).unwrap().fill(g as f64 - i as f64);
            }
            opt.prepare_update(&[1.0, 0.5, 2.0, 0.25]).unwrap();
            opt.apply_update().unwrap();
        }
    }

    #[test]
    fn test_save_restart_round_trip() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("agent");

        let mut source = optimizer(Precision::Double);
        run(&mut source, 3);
        source.save(&prefix, true).unwrap();

        assert!(artifact_path(&prefix, "000000003_weights").exists());
        assert!(artifact_path(&prefix, "000000003_pathCov").exists());
        assert!(artifact_path(&prefix, "000000003_diagCov").exists());

        let mut target = optimizer(Precision::Double);
        let status = target.restart(&prefix).unwrap();

        assert_eq!(status, RestartStatus::Restored);
        assert_eq!(target.mean(), source.mean());
        assert_eq!(target.path(), source.path());
        assert_eq!(target.std_dev(), source.std_dev());
    }

    #[test]
    fn test_single_precision_round_trip() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("f32");

        let mut source = optimizer(Precision::Single);
        run(&mut source, 2);
        source.save(&prefix, false).unwrap();

        let mut target = optimizer(Precision::Single);
        target.restart(&prefix).unwrap();
        for (a, b) in target.mean().as_slice().iter().zip(source.mean().as_slice()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_restart_without_artifacts() {
        let dir = tempdir().unwrap();
        let mut opt = optimizer(Precision::Double);
        let before = opt.mean().clone();

        let status = opt.restart(dir.path().join("nothing")).unwrap();

        assert_eq!(status, RestartStatus::Missing);
        assert!(!status.is_restored());
        assert_eq!(opt.mean(), &before);
        assert!(!opt.is_poisoned());
    }

    #[test]
    fn test_restart_rejects_corrupt_artifact() {
        let dir = tempdir().unwrap();
        let prefix = dir.path().join("bad");
        std::fs::write(artifact_path(&prefix, WEIGHTS_ARTIFACT), b"garbage!").unwrap();

        let mut opt = optimizer(Precision::Double);
        let err = opt.restart(&prefix).unwrap_err();
        assert!(matches!(err, OptimizerError::Checkpoint(CheckpointError::BadMagic(_))));
        assert!(!opt.is_poisoned());
    }

    #[test]
    fn test_full_state_round_trip() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("state.json");

        let mut source = optimizer(Precision::Double);
        run(&mut source, 4);
        source.save_state(&file, CheckpointFormat::Json).unwrap();

        let mut target = optimizer(Precision::Double);
        target.load_state(&file).unwrap();

        assert_eq!(target.generation(), 4);
        assert_eq!(target.moments(), source.moments());
        assert_eq!(target.mean(), source.mean());
        assert_eq!(target.std_dev(), source.std_dev());
    }

    #[test]
    fn test_restart_mid_generation_is_rejected() {
        let mut opt = optimizer(Precision::Double);
        opt.prepare_update(&[0.0; 4]).unwrap();
        let dir = tempdir().unwrap();
        assert!(matches!(
            opt.restart(dir.path().join("x")),
            Err(OptimizerError::Contract(ContractViolation::RequestPending { .. }))
        ));
    }
}
