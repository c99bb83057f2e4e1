//! State snapshot persistence
//!
//! JSON for inspection, or bincode behind a version + magic header.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::state::{OptimizerState, STATE_VERSION};
use crate::error::CheckpointError;

const STATE_MAGIC: &[u8; 4] = b"ACMS";

/// Format for state serialization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointFormat {
    /// JSON format (human-readable, larger)
    Json,
    /// Binary format (compact, fast)
    #[default]
    Binary,
}

/// Save a state snapshot to a file
pub fn save_state(
    state: &OptimizerState,
    path: impl AsRef<Path>,
    format: CheckpointFormat,
) -> Result<(), CheckpointError> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    match format {
        CheckpointFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, state)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        }
        CheckpointFormat::Binary => {
            writer.write_all(&STATE_VERSION.to_le_bytes())?;
            writer.write_all(STATE_MAGIC)?;
            bincode::serialize_into(&mut writer, state)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Load a state snapshot, detecting the format from its first bytes
pub fn load_state(path: impl AsRef<Path>) -> Result<OptimizerState, CheckpointError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CheckpointError::NotFound(path.display().to_string()));
    }

    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;

    if bytes.len() >= 8 && &bytes[4..8] == STATE_MAGIC {
        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if version > STATE_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: STATE_VERSION,
                found: version,
            });
        }
        bincode::deserialize(&bytes[8..])
            .map_err(|e| CheckpointError::Deserialization(e.to_string()))
    } else {
        serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Deserialization(e.to_string()))
    }
}
