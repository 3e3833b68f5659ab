use mixbench_storage::StorageError;
use thiserror::Error;

use crate::benchmark::State;
use crate::op::OpType;

/// Errors produced while configuring or running a benchmark.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value is out of range or inconsistent with another one.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operation type name could not be parsed.
    #[error("unknown operation: {0:?}")]
    UnknownOperation(String),

    /// A distribution weight is negative.
    #[error("negative distribution requested for op {op}")]
    NegativeWeight {
        /// The offending operation type.
        op: OpType,
    },

    /// All distribution weights are zero.
    #[error("no distribution set, total is 0")]
    EmptyDistribution,

    /// Objects would be deleted faster than they are created.
    #[error("DELETE distribution ({delete}) cannot be bigger than PUT ({put})")]
    DeleteExceedsPut {
        /// Weight of DELETE.
        delete: f64,
        /// Weight of PUT.
        put: f64,
    },

    /// The bucket could not be emptied before uploading the initial dataset.
    #[error("bucket {bucket} could not be emptied, {remaining} objects remain")]
    BucketNotEmpty {
        /// The bucket.
        bucket: String,
        /// Number of objects that could not be removed.
        remaining: usize,
    },

    /// A GET, STAT or DELETE found no live object to work on.
    ///
    /// This means objects were deleted faster than created, which the distribution forbids.
    #[error("ran out of objects")]
    PoolExhausted,

    /// The store accepted fewer bytes than the object declares.
    #[error("short upload. want: {want}, got: {got}")]
    ShortUpload {
        /// Declared object size.
        want: u64,
        /// Bytes the store reported as written.
        got: u64,
    },

    /// The store returned a different size than the object was written with.
    #[error("unexpected {op} size. want: {want}, got: {got}")]
    SizeMismatch {
        /// The operation that observed the mismatch.
        op: OpType,
        /// Size the object was written with.
        want: u64,
        /// Size observed.
        got: u64,
    },

    /// A benchmark phase was invoked out of order.
    #[error("benchmark is {actual}, cannot enter {next}")]
    InvalidState {
        /// Current state.
        actual: State,
        /// Requested state.
        next: State,
    },

    /// An error from the storage client.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for benchmark operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
