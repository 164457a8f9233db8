use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::trace;

use super::{
    headers::{HeaderMap, HttpStatus},
    line_reader::LineReader,
};
use crate::{common::errors::NetError, net::stream::ByteStream};

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    ContentLength(u64),
    Chunked,
    UntilClose,
}

impl BodyFraming {
    /// Chunked coding wins over `Content-Length` when both are present.
    pub fn from_head(status: &HttpStatus, headers: &HeaderMap, head_request: bool) -> Self {
        if head_request || status.forbids_body() {
            return Self::Empty;
        }
        if headers.is_chunked() {
            return Self::Chunked;
        }
        match headers.content_length() {
            Some(0) => Self::Empty,
            Some(n) => Self::ContentLength(n),
            None => Self::UntilClose,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

/// Parse the hex size token of a chunk-size line, ignoring extensions.
pub fn parse_chunk_size(line: &str) -> Result<u64, NetError> {
    let token = line.split(';').next().unwrap_or("").trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(NetError::MalformedResponse(format!(
            "invalid chunk size {:?}",
            line
        )));
    }
    u64::from_str_radix(token, 16)
        .map_err(|_| NetError::MalformedResponse(format!("chunk size overflow {:?}", line)))
}

/// Response body reader. Owns the connection until dropped.
pub struct HttpBody<R> {
    reader: LineReader<R>,
    framing: BodyFraming,
    remaining: u64,
    chunk: ChunkState,
}

impl<R: AsyncRead + Unpin + Send> HttpBody<R> {
    pub fn new(reader: LineReader<R>, framing: BodyFraming) -> Self {
        let remaining = match framing {
            BodyFraming::ContentLength(n) => n,
            _ => 0,
        };
        Self {
            reader,
            framing,
            remaining,
            chunk: ChunkState::Size,
        }
    }

    pub fn framing(&self) -> BodyFraming {
        self.framing
    }

    async fn read_sized(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(NetError::UnexpectedEof);
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    async fn read_chunked(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        loop {
            match self.chunk {
                ChunkState::Size => {
                    let line = self
                        .reader
                        .read_line()
                        .await?
                        .ok_or(NetError::UnexpectedEof)?;
                    let size = parse_chunk_size(&line)?;
                    trace!("HTTP chunk of {} bytes", size);
                    self.chunk = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(left) => {
                    let want = (buf.len() as u64).min(left) as usize;
                    let n = self.reader.read(&mut buf[..want]).await?;
                    if n == 0 {
                        return Err(NetError::UnexpectedEof);
                    }
                    let left = left - n as u64;
                    self.chunk = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                    return Ok(n);
                }
                ChunkState::DataEnd => {
                    let line = self
                        .reader
                        .read_line()
                        .await?
                        .ok_or(NetError::UnexpectedEof)?;
                    if !line.is_empty() {
                        return Err(NetError::MalformedResponse(
                            "chunk data not followed by CRLF".into(),
                        ));
                    }
                    self.chunk = ChunkState::Size;
                }
                ChunkState::Trailers => match self.reader.read_line().await? {
                    None => self.chunk = ChunkState::Done,
                    Some(line) if line.is_empty() => self.chunk = ChunkState::Done,
                    Some(line) => trace!("Ignoring chunked trailer {:?}", line),
                },
                ChunkState::Done => return Ok(0),
            }
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteStream for HttpBody<R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.framing {
            BodyFraming::Empty => Ok(0),
            BodyFraming::ContentLength(_) => self.read_sized(buf).await,
            BodyFraming::Chunked => self.read_chunked(buf).await,
            BodyFraming::UntilClose => self.reader.read(buf).await,
        }
    }
}
