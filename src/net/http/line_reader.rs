//! Incremental line/byte reader over a growable buffer.
//!
//! The buffer starts at [`LINE_BUFFER_INITIAL`] and doubles up to
//! [`LINE_BUFFER_MAX`]. A line that does not fit at the cap is discarded up
//! to its terminating LF and reading continues with the next line.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::{
    common::errors::NetError,
    net::constants::{LINE_BUFFER_INITIAL, LINE_BUFFER_MAX},
};

pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    max: usize,
    read_timeout: Option<Duration>,
    discarded_lines: u64,
}

impl<R: AsyncRead + Unpin + Send> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limits(inner, LINE_BUFFER_INITIAL, LINE_BUFFER_MAX)
    }

    pub fn with_limits(inner: R, initial: usize, max: usize) -> Self {
        let initial = initial.max(1);
        Self {
            inner,
            buf: vec![0; initial],
            start: 0,
            end: 0,
            max: max.max(initial),
            read_timeout: None,
            discarded_lines: 0,
        }
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Current size of the internal buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes read from the source but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Number of oversized lines dropped so far.
    pub fn discarded_lines(&self) -> u64 {
        self.discarded_lines
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    async fn read_inner(
        inner: &mut R,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, NetError> {
        let n = match timeout {
            Some(t) => tokio::time::timeout(t, inner.read(buf)).await??,
            None => inner.read(buf).await?,
        };
        Ok(n)
    }

    /// Read more bytes into the buffer, compacting or growing it first.
    async fn fill(&mut self) -> Result<usize, NetError> {
        if self.end == self.buf.len() {
            if self.start > 0 {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            } else if self.buf.len() < self.max {
                let grown = (self.buf.len() * 2).min(self.max);
                self.buf.resize(grown, 0);
            }
        }

        let n = Self::read_inner(&mut self.inner, &mut self.buf[self.end..], self.read_timeout)
            .await?;
        self.end += n;
        Ok(n)
    }

    /// Next line without its `\r\n` / `\n` terminator.
    ///
    /// Returns `None` at end of stream when nothing is buffered. A final line
    /// without a terminator is returned as-is.
    pub async fn read_line(&mut self) -> Result<Option<String>, NetError> {
        let mut discarding = false;

        loop {
            if let Some(pos) = self.buf[self.start..self.end]
                .iter()
                .position(|&b| b == b'\n')
            {
                let line_start = self.start;
                let line_end = self.start + pos;
                self.start = line_end + 1;

                if discarding {
                    discarding = false;
                    self.discarded_lines += 1;
                    warn!("Discarded HTTP line longer than {} bytes", self.max);
                    continue;
                }

                let mut line = &self.buf[line_start..line_end];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                return Ok(Some(String::from_utf8_lossy(line).into_owned()));
            }

            if self.start == 0 && self.end == self.buf.len() && self.buf.len() >= self.max {
                discarding = true;
            }
            if discarding {
                self.start = 0;
                self.end = 0;
            }

            if self.fill().await? == 0 {
                if discarding {
                    return Err(NetError::UnexpectedEof);
                }
                if self.start == self.end {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&self.buf[self.start..self.end]).into_owned();
                self.start = self.end;
                return Ok(Some(line));
            }
        }
    }

    /// Read raw bytes, draining the buffer before touching the source.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize, NetError> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.start < self.end {
            let n = out.len().min(self.end - self.start);
            out[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
            self.start += n;
            return Ok(n);
        }
        Self::read_inner(&mut self.inner, out, self.read_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_crlf_and_lf_lines() {
        let data: &[u8] = b"HTTP/1.1 200 OK\r\nA: 1\nB: 2\r\n\r\nbody";
        let mut reader = LineReader::new(data);

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("HTTP/1.1 200 OK"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("A: 1"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("B: 2"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some(""));

        let mut body = [0u8; 16];
        let n = reader.read(&mut body).await.unwrap();
        assert_eq!(&body[..n], b"body");
    }

    #[tokio::test]
    async fn grows_then_discards_oversized_line() {
        let mut input = b"short\r\n".to_vec();
        input.extend(std::iter::repeat_n(b'a', 40));
        input.extend_from_slice(b"\r\nnext\r\n");
        let mut reader = LineReader::with_limits(&input[..], 8, 16);

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("short"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("next"));
        assert_eq!(reader.capacity(), 16);
        assert_eq!(reader.discarded_lines(), 1);
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn line_within_cap_survives_growth() {
        let line = "x".repeat(12);
        let input = format!("{}\n", line);
        let mut reader = LineReader::with_limits(input.as_bytes(), 4, 16);
        assert_eq!(reader.read_line().await.unwrap(), Some(line));
    }

    #[tokio::test]
    async fn eof_while_discarding_is_an_error() {
        let input = vec![b'z'; 64];
        let mut reader = LineReader::with_limits(&input[..], 8, 16);
        assert!(matches!(
            reader.read_line().await,
            Err(NetError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn unterminated_last_line_is_returned() {
        let mut reader = LineReader::new(&b"tail"[..]);
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("tail"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }
}
