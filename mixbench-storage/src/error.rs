use thiserror::Error;

/// Errors that can occur when talking to a store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO errors related to payload streaming or file operations.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The bucket has not been created.
    #[error("bucket `{bucket}` does not exist")]
    NoSuchBucket {
        /// Name of the missing bucket.
        bucket: String,
    },

    /// The object does not exist in the bucket.
    #[error("object `{bucket}/{name}` not found")]
    NotFound {
        /// Bucket that was searched.
        bucket: String,
        /// Name of the missing object.
        name: String,
    },

    /// A [`ClientPool`](crate::ClientPool) was constructed without any clients.
    #[error("client pool requires at least one endpoint")]
    NoEndpoints,

    /// Any other error stemming from a store, which might be specific to that store or to a
    /// certain operation.
    #[error("storage error: {context}")]
    Generic {
        /// What was being attempted.
        context: String,
        /// The underlying cause.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StorageError {
    /// Creates a [`StorageError::Generic`] from a context message and a cause.
    pub fn generic(
        context: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Generic {
            context: context.into(),
            cause: cause.into(),
        }
    }
}

/// Result type for storage operations.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;
