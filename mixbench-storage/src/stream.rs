//! Payload stream type and helpers.

use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;

/// Type alias for data streams passed to and returned from stores.
pub type PayloadStream = BoxStream<'static, std::io::Result<bytes::Bytes>>;

/// Creates a [`PayloadStream`] from a byte slice.
pub fn make_stream(contents: &[u8]) -> PayloadStream {
    use futures_util::StreamExt;
    tokio_stream::once(Ok(bytes::Bytes::copy_from_slice(contents))).boxed()
}

/// Collects a [`PayloadStream`] into a `Vec<u8>`.
pub async fn read_to_vec(mut stream: PayloadStream) -> std::io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    while let Some(chunk) = stream.try_next().await? {
        payload.extend(&chunk);
    }
    Ok(payload)
}
