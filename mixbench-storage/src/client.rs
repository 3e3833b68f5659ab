use std::fmt::Debug;
use std::ops::Range;

use crate::PayloadStream;
use crate::error::Result;

/// Content type assumed when a store does not keep track of one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Options for [`StorageClient::get_object`].
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    /// Only fetch the given byte range of the object.
    ///
    /// The range is clamped to the object size.
    pub range: Option<Range<u64>>,
}

/// Options for [`StorageClient::stat_object`].
///
/// The bundled stores do not read any settings from it.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct StatOptions {}

/// Metadata returned by [`StorageClient::stat_object`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Name of the object within its bucket.
    pub name: String,
    /// Size of the stored payload in bytes.
    pub size: u64,
    /// Content type the object was stored with.
    pub content_type: String,
}

/// A connection to an object store endpoint.
///
/// All methods address objects by bucket and name. Implementations must be cheap to share across
/// tasks, since a single client serves many concurrent operations.
#[async_trait::async_trait]
pub trait StorageClient: Debug + Send + Sync + 'static {
    /// Identifier of the endpoint this client talks to, used for reporting.
    fn endpoint(&self) -> &str;

    /// Creates the bucket if it does not exist yet.
    async fn make_bucket(&self, bucket: &str) -> Result<()>;

    /// Lists the names of all objects in the bucket.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>>;

    /// Stores the payload under the given name and returns the number of bytes written.
    ///
    /// `size` is the declared payload length. Callers compare it against the returned count to
    /// detect short writes.
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        payload: PayloadStream,
        size: u64,
        content_type: &str,
    ) -> Result<u64>;

    /// Retrieves the payload of an object as a stream of bytes.
    async fn get_object(
        &self,
        bucket: &str,
        name: &str,
        options: &GetOptions,
    ) -> Result<PayloadStream>;

    /// Retrieves the metadata of an object.
    async fn stat_object(
        &self,
        bucket: &str,
        name: &str,
        options: &StatOptions,
    ) -> Result<ObjectInfo>;

    /// Deletes an object.
    async fn remove_object(&self, bucket: &str, name: &str) -> Result<()>;
}

/// Clamps a requested range to an object of `len` bytes.
pub(crate) fn clamp_range(range: &Range<u64>, len: u64) -> Range<u64> {
    let start = range.start.min(len);
    let end = range.end.clamp(start, len);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_range_within_bounds() {
        assert_eq!(clamp_range(&(2..5), 10), 2..5);
        assert_eq!(clamp_range(&(2..50), 10), 2..10);
        assert_eq!(clamp_range(&(20..50), 10), 10..10);
        assert_eq!(clamp_range(&(5..2), 10), 5..5);
    }
}
