//! Binary artifact format for a single parameter vector
//!
//! Layout: u32 LE format version, the magic bytes `ACMA`, then the
//! bincode-encoded [`ArtifactPayload`].

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::vector::ParameterVector;
use crate::config::Precision;
use crate::error::CheckpointError;

/// Current artifact format version
pub const ARTIFACT_VERSION: u32 = 1;

const ARTIFACT_MAGIC: &[u8; 4] = b"ACMA";

/// Stored values at their storage precision
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ArtifactPayload {
    /// 32-bit storage
    Single(Vec<f32>),
    /// 64-bit storage
    Double(Vec<f64>),
}

impl ArtifactPayload {
    fn encode(values: &[f64], precision: Precision) -> Self {
        match precision {
            Precision::Single => Self::Single(values.iter().map(|&v| v as f32).collect()),
            Precision::Double => Self::Double(values.to_vec()),
        }
    }

    fn into_values(self) -> Vec<f64> {
        match self {
            Self::Single(values) => values.into_iter().map(f64::from).collect(),
            Self::Double(values) => values,
        }
    }
}

/// Write `vector` to `path`
pub fn save_vector(
    vector: &ParameterVector,
    path: impl AsRef<Path>,
    precision: Precision,
) -> Result<(), CheckpointError> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&ARTIFACT_VERSION.to_le_bytes())?;
    writer.write_all(ARTIFACT_MAGIC)?;
    bincode::serialize_into(
        &mut writer,
        &ArtifactPayload::encode(vector.as_slice(), precision),
    )
    .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

    writer.flush()?;
    Ok(())
}

/// Read a vector of length `dimension` from `path`
pub fn load_vector(
    path: impl AsRef<Path>,
    dimension: usize,
) -> Result<ParameterVector, CheckpointError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CheckpointError::NotFound(path.display().to_string()));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;

    if &header[4..8] != ARTIFACT_MAGIC {
        return Err(CheckpointError::BadMagic(path.display().to_string()));
    }
    let version = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if version != ARTIFACT_VERSION {
        return Err(CheckpointError::VersionMismatch {
            expected: ARTIFACT_VERSION,
            found: version,
        });
    }

    let payload: ArtifactPayload = bincode::deserialize_from(&mut reader)
        .map_err(|e| CheckpointError::Deserialization(e.to_string()))?;
    let values = payload.into_values();
    if values.len() != dimension {
        return Err(CheckpointError::Corrupted(format!(
            "{} holds {} values, expected {}",
            path.display(),
            values.len(),
            dimension
        )));
    }

    Ok(ParameterVector::from_vec(values))
}
