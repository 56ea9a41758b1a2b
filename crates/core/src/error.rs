//! Error taxonomy shared by the distance layer, the codec, and the graph index.

use thiserror::Error;

/// Errors returned by index, codec, and manager operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Invalid configuration: dimension/subvector divisibility, centroid count, graph degrees.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A vector (insert, query, or training sample) has the wrong length.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Unknown id on get/delete, or a referenced node that no longer exists.
    #[error("id {0} not found")]
    NotFound(u64),

    /// Insert of an id that is already live in the index.
    #[error("id {0} already exists")]
    AlreadyExists(u64),

    /// Encode called before the codec was fitted.
    #[error("product quantizer is not trained")]
    UntrainedCodec,

    /// Internal locking defect. Never expected in correct operation.
    #[error("concurrency invariant violated: {0}")]
    ConcurrencyInvariantViolation(String),

    /// Structurally invalid data: bad code length, snapshot checksum or layout.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// The backing point store rejected an operation.
    #[error("point store error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Unexpected fault caught at the manager boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Fatal errors indicate a defect; the index should be considered unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexError::ConcurrencyInvariantViolation(_) | IndexError::Internal(_)
        )
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        IndexError::Config(msg.into())
    }
}
