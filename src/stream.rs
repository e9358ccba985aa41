//! Payload stream type and helpers.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

/// Byte stream accepted by appends and returned by reads.
pub type PayloadStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Creates a [`PayloadStream`] yielding `data` as a single chunk.
pub fn bytes_stream(data: impl Into<Bytes>) -> PayloadStream {
    let data = data.into();
    stream::once(async move { Ok(data) }).boxed()
}

/// Creates a [`PayloadStream`] yielding `data` in chunks of at most `chunk_size` bytes.
pub fn chunked_stream(data: impl Into<Bytes>, chunk_size: usize) -> PayloadStream {
    let data = data.into();
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
        .step_by(chunk_size)
        .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
        .collect();
    stream::iter(chunks).boxed()
}

/// Collects a [`PayloadStream`] into contiguous bytes.
pub async fn read_to_bytes(mut stream: PayloadStream) -> std::io::Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.try_next().await? {
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunked_stream_preserves_bytes() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let collected = read_to_bytes(chunked_stream(data.clone(), 7)).await.unwrap();
        assert_eq!(collected.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn empty_chunked_stream_yields_nothing() {
        let collected = read_to_bytes(chunked_stream(Bytes::new(), 16)).await.unwrap();
        assert!(collected.is_empty());
    }
}
