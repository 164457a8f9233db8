use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::common::errors::NetError;

/// Forward-only async byte source.
///
/// Implemented by HTTP bodies, the decrypting decorator and in-memory
/// buffers. A read of `0` bytes means end of stream.
#[async_trait]
pub trait ByteStream: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;
}

pub type BoxByteStream = Box<dyn ByteStream>;

#[async_trait]
impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        (**self).read(buf).await
    }
}

/// A read that aborts with [`NetError::Cancelled`] once `cancel` fires.
pub async fn read_cancellable<S: ByteStream + ?Sized>(
    stream: &mut S,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<usize, NetError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NetError::Cancelled),
        r = stream.read(buf) => r,
    }
}

/// Drain `stream` into memory, refusing bodies larger than `limit`.
pub async fn read_to_end<S: ByteStream + ?Sized>(
    stream: &mut S,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Bytes, NetError> {
    let mut out = Vec::new();
    let mut chunk = vec![0u8; 16 * 1024];
    loop {
        let n = read_cancellable(stream, &mut chunk, cancel).await?;
        if n == 0 {
            return Ok(Bytes::from(out));
        }
        if out.len() + n > limit {
            return Err(NetError::MalformedResponse(format!(
                "body exceeds {} bytes",
                limit
            )));
        }
        out.extend_from_slice(&chunk[..n]);
    }
}

/// A [`ByteStream`] over bytes already in memory.
pub struct MemoryStream {
    data: Bytes,
    pos: usize,
}

impl MemoryStream {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    pub fn empty() -> Self {
        Self::new(Bytes::new())
    }
}

#[async_trait]
impl ByteStream for MemoryStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_stream_reads_in_pieces() {
        let mut stream = MemoryStream::new(&b"hello world"[..]);
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"hell");
        let rest = read_to_end(&mut stream, 1024, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&rest[..], b"o world");
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_to_end_enforces_limit() {
        let mut stream = MemoryStream::new(vec![0u8; 100]);
        let err = read_to_end(&mut stream, 10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn cancelled_read_reports_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut stream = MemoryStream::new(&b"data"[..]);
        let mut buf = [0u8; 4];
        let err = read_cancellable(&mut stream, &mut buf, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
