//! Checkpoint state structures
//!
//! Named artifact paths and the complete long-lived optimizer state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::CheckpointError;
use crate::optimizer::adam::AdamMoments;
use crate::parameters::ParameterVector;

/// Current state snapshot format version
pub const STATE_VERSION: u32 = 1;

/// Artifact suffix of the mean
pub const WEIGHTS_ARTIFACT: &str = "weights";
/// Artifact suffix of the evolution path
pub const PATH_ARTIFACT: &str = "pathCov";
/// Artifact suffix of the diagonal covariance
pub const COVARIANCE_ARTIFACT: &str = "diagCov";

/// `{prefix}_{name}`
pub fn artifact_path(prefix: &Path, name: &str) -> PathBuf {
    let mut path = OsString::from(prefix.as_os_str());
    path.push("_");
    path.push(name);
    PathBuf::from(path)
}

/// `{prefix}_{generation:09}`, the prefix of a generation-numbered backup
pub fn backup_prefix(prefix: &Path, generation: u64) -> PathBuf {
    artifact_path(prefix, &format!("{generation:09}"))
}

/// Outcome of restoring the named artifacts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartStatus {
    /// The mean was read from disk
    Restored,
    /// No weights artifact exists; the mean is unchanged
    Missing,
}

impl RestartStatus {
    /// Whether the mean was restored
    pub fn is_restored(self) -> bool {
        matches!(self, Self::Restored)
    }
}

/// Every piece of state that survives a generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Schema version for forward compatibility
    pub version: u32,
    /// Completed `prepare_update` calls
    pub generation: u64,
    /// Rank that produced the snapshot
    pub rank: usize,
    /// Process count of the run that produced the snapshot
    pub processes: usize,
    /// Current mean
    pub mean: ParameterVector,
    /// Evolution path (only the producing rank's slice is authoritative)
    pub path: ParameterVector,
    /// Diagonal standard deviations (only the producing rank's slice is authoritative)
    pub std_dev: ParameterVector,
    /// Adam moment accumulators
    pub moments: AdamMoments,
    /// Custom metadata
    pub metadata: HashMap<String, String>,
}

impl OptimizerState {
    /// Set custom metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check if the snapshot is compatible with the current version
    pub fn is_compatible(&self) -> bool {
        self.version <= STATE_VERSION
    }

    /// Length of the parameter vector
    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    /// Check every vector against `dimension`
    pub fn validate(&self, dimension: usize) -> Result<(), CheckpointError> {
        if !self.is_compatible() {
            return Err(CheckpointError::VersionMismatch {
                expected: STATE_VERSION,
                found: self.version,
            });
        }
        let lengths = [
            ("mean", self.mean.len()),
            ("path", self.path.len()),
            ("std_dev", self.std_dev.len()),
            ("first moment", self.moments.first.len()),
            ("second moment", self.moments.second.len()),
        ];
        for (name, len) in lengths {
            if len != dimension {
                return Err(CheckpointError::Corrupted(format!(
                    "{name} has {len} values, expected {dimension}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(dimension: usize) -> OptimizerState {
        OptimizerState {
            version: STATE_VERSION,
            generation: 3,
            rank: 0,
            processes: 1,
            mean: ParameterVector::zeros(dimension),
            path: ParameterVector::zeros(dimension),
            std_dev: ParameterVector::filled(dimension, 1.0),
            moments: AdamMoments::zeros(dimension),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_artifact_names() {
        let prefix = Path::new("/tmp/run/agent");
        assert_eq!(
            artifact_path(prefix, WEIGHTS_ARTIFACT),
            PathBuf::from("/tmp/run/agent_weights")
        );
        let backup = backup_prefix(prefix, 1234);
        assert_eq!(
            artifact_path(&backup, COVARIANCE_ARTIFACT),
            PathBuf::from("/tmp/run/agent_000001234_diagCov")
        );
    }

    #[test]
    fn test_validate_lengths() {
        assert!(state(4).validate(4).is_ok());

        let mut bad = state(4);
        bad.moments.second = ParameterVector::zeros(3);
        assert!(matches!(bad.validate(4), Err(CheckpointError::Corrupted(_))));
    }

    #[test]
    fn test_future_version_rejected() {
        let mut future = state(2);
        future.version = STATE_VERSION + 1;
        assert!(!future.is_compatible());
        assert!(matches!(
            future.validate(2),
            Err(CheckpointError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_metadata() {
        let s = state(1).with_metadata("run", "sphere");
        assert_eq!(s.metadata.get("run"), Some(&"sphere".to_string()));
        assert_eq!(s.dimension(), 1);
    }
}
