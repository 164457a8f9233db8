use std::time::Duration;

use reqwest::Url;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::{debug, trace};

use super::{
    body::{BodyFraming, HttpBody},
    headers::{HeaderMap, HttpStatus, parse_header_line},
    line_reader::LineReader,
    request::{HttpRequest, Method},
};
use crate::common::errors::NetError;

/// A parsed response head plus the body reader that owns the connection.
pub struct HttpResponse<S> {
    pub status: HttpStatus,
    pub headers: HeaderMap,
    /// URL this response was received from.
    pub url: Url,
    body: HttpBody<S>,
}

impl<S: AsyncRead + Unpin + Send> HttpResponse<S> {
    pub fn framing(&self) -> BodyFraming {
        self.body.framing()
    }

    pub fn body_mut(&mut self) -> &mut HttpBody<S> {
        &mut self.body
    }

    pub fn into_body(self) -> HttpBody<S> {
        self.body
    }

    pub fn into_parts(self) -> (HttpStatus, HeaderMap, Url, HttpBody<S>) {
        (self.status, self.headers, self.url, self.body)
    }
}

/// Read a status line and headers. Interim 1xx heads are skipped.
pub async fn read_response_head<R: AsyncRead + Unpin + Send>(
    reader: &mut LineReader<R>,
) -> Result<(HttpStatus, HeaderMap), NetError> {
    loop {
        let status = loop {
            let line = reader.read_line().await?.ok_or(NetError::UnexpectedEof)?;
            if !line.trim().is_empty() {
                break HttpStatus::parse(&line)?;
            }
        };

        let mut headers = HeaderMap::new();
        loop {
            let line = reader.read_line().await?.ok_or(NetError::UnexpectedEof)?;
            if line.is_empty() {
                break;
            }
            match parse_header_line(&line) {
                Some((name, value)) => headers.append(name, value),
                None => trace!("Skipping malformed header line {:?}", line),
            }
        }

        if (100..200).contains(&status.code) && status.code != 101 {
            trace!("Skipping interim response {}", status);
            continue;
        }
        return Ok((status, headers));
    }
}

/// One HTTP/1.1 exchange over a byte stream.
pub struct HttpConnection<S> {
    reader: LineReader<S>,
}

impl HttpConnection<TcpStream> {
    /// Open a plain TCP connection to the host of `url`.
    pub async fn connect(url: &Url, connect_timeout: Duration) -> Result<Self, NetError> {
        if url.scheme() != "http" {
            return Err(NetError::InvalidUrl(format!(
                "socket transport supports http only: {}",
                url
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| NetError::InvalidUrl(format!("{} has no host", url)))?;
        let port = url.port_or_known_default().unwrap_or(80);

        debug!("Connecting to {}:{}", host, port);
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await?
            .map_err(|e| NetError::Connect {
                host: host.to_string(),
                message: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> HttpConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: LineReader::new(stream),
        }
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reader.set_read_timeout(timeout);
        self
    }

    /// Write `request` and parse the response head.
    pub async fn send(mut self, request: &HttpRequest) -> Result<HttpResponse<S>, NetError> {
        let head = request.encode_head()?;
        trace!("HTTP request head:\n{}", head.trim_end());

        let stream = self.reader.get_mut();
        stream.write_all(head.as_bytes()).await?;
        stream.flush().await?;

        let (status, headers) = read_response_head(&mut self.reader).await?;
        let framing = BodyFraming::from_head(&status, &headers, request.method == Method::Head);
        debug!("{} {} -> {} ({:?})", request.method.as_str(), request.url, status.code, framing);

        Ok(HttpResponse {
            status,
            headers,
            url: request.url.clone(),
            body: HttpBody::new(self.reader, framing),
        })
    }
}
