//! Error types for adam-cma
//!
//! Every failure the optimizer reports is fatal to the optimization run.
//! The variants exist so the caller can log *why* before aborting.

use thiserror::Error;

/// Caller-side contract violations (programming errors)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContractViolation {
    /// `prepare_update` received the wrong number of losses
    #[error("Loss count mismatch: expected {expected}, got {actual}")]
    LossCountMismatch { expected: usize, actual: usize },

    /// `apply_update` called before any `prepare_update`
    #[error("apply_update called without a matching prepare_update")]
    ApplyWithoutPrepare,

    /// A cross-process reduction was required but never started
    #[error("Did not start reduction")]
    ReductionNotStarted,

    /// A new request was started on a buffer whose previous request is still pending
    #[error("Request still pending on {what}")]
    RequestPending { what: String },

    /// Sample slot index out of range
    #[error("Sample slot {slot} out of range (population size {len})")]
    SlotOutOfRange { slot: usize, len: usize },

    /// Worker thread index out of range
    #[error("Thread {thread} out of range (pool size {len})")]
    ThreadOutOfRange { thread: usize, len: usize },

    /// Vector length mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Failures of the cross-process transport
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommunicationError {
    /// A peer endpoint hung up
    #[error("Peer {peer} disconnected")]
    Disconnected { peer: usize },

    /// A peer contributed a buffer of the wrong length
    #[error("Collective size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A message arrived that no request matches
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
}

/// Error type for checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// IO error during checkpoint
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Checkpoint version mismatch
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// File does not start with a known magic
    #[error("Unrecognized artifact header in {0}")]
    BadMagic(String),

    /// Checkpoint file not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Corrupted checkpoint data
    #[error("Corrupted checkpoint: {0}")]
    Corrupted(String),
}

/// Top-level error type for optimizer operations
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Caller broke the prepare/apply protocol
    #[error("Contract violation: {0}")]
    Contract(#[from] ContractViolation),

    /// Cross-process communication failed
    #[error("Communication failure: {0}")]
    Communication(#[from] CommunicationError),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A non-finite value was produced by the update
    #[error("Numerical instability at parameter {index}: {value}")]
    Numerical { index: usize, value: f64 },

    /// An earlier fatal error left the optimizer in an inconsistent state
    #[error("Optimizer is poisoned by an earlier fatal error")]
    Poisoned,
}

impl OptimizerError {
    /// Whether this error leaves the optimizer state inconsistent
    pub fn poisons(&self) -> bool {
        !matches!(self, Self::Configuration(_) | Self::Checkpoint(_))
    }
}

/// Result type alias for optimizer operations
pub type OptResult<T> = Result<T, OptimizerError>;
