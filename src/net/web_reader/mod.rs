//! Uniform fetch surface over the socket and platform HTTP stacks.

pub mod platform;
pub mod socket;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use tokio_util::sync::CancellationToken;

pub use platform::ReqwestWebReader;
pub use socket::SocketWebReader;

use crate::{
    common::errors::NetError,
    net::{
        constants::MAX_CACHED_BODY,
        http::{HeaderMap, Method, RangeSpec},
        stream::{BoxByteStream, ByteStream, MemoryStream, read_to_end},
    },
};

#[derive(Debug, Clone)]
pub struct WebRequest {
    pub method: Method,
    pub url: Url,
    pub range: Option<RangeSpec>,
    pub headers: HeaderMap,
}

impl WebRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            range: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn head(url: Url) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    pub fn with_range(mut self, range: RangeSpec) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Status, headers and final URL of a response, plus its body stream.
pub struct WebResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// URL after redirects.
    pub url: Url,
    body: BoxByteStream,
}

impl std::fmt::Debug for WebResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl WebResponse {
    pub fn new(status: u16, headers: HeaderMap, url: Url, body: BoxByteStream) -> Self {
        Self {
            status,
            headers,
            url,
            body,
        }
    }

    /// A response whose body is already in memory.
    pub fn from_bytes(status: u16, headers: HeaderMap, url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, url, Box::new(MemoryStream::new(body)))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn content_type(&self) -> Option<String> {
        self.headers.content_type()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers.content_length()
    }

    /// Turn any non-2xx status into [`NetError::Status`].
    pub fn error_for_status(self) -> Result<Self, NetError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(NetError::Status {
                status: self.status,
                url: self.url.to_string(),
            })
        }
    }

    pub fn body_mut(&mut self) -> &mut BoxByteStream {
        &mut self.body
    }

    pub fn into_body(self) -> BoxByteStream {
        self.body
    }

    pub async fn bytes(mut self, limit: usize, cancel: &CancellationToken) -> Result<Bytes, NetError> {
        read_to_end(&mut self.body, limit, cancel).await
    }
}

#[async_trait]
impl ByteStream for WebResponse {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        self.body.read(buf).await
    }
}

#[async_trait]
pub trait WebReader: Send + Sync {
    /// Short transport name for logs.
    fn name(&self) -> &'static str;

    /// Issue `request` as-is. Non-2xx statuses are returned, not raised.
    async fn send(
        &self,
        request: WebRequest,
        cancel: &CancellationToken,
    ) -> Result<WebResponse, NetError>;

    async fn get_stream(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<WebResponse, NetError> {
        self.send(WebRequest::get(url.clone()), cancel)
            .await?
            .error_for_status()
    }

    async fn get_bytes(&self, url: &Url, cancel: &CancellationToken) -> Result<Bytes, NetError> {
        self.get_stream(url, cancel)
            .await?
            .bytes(MAX_CACHED_BODY, cancel)
            .await
    }

    async fn head(&self, url: &Url, cancel: &CancellationToken) -> Result<WebResponse, NetError> {
        self.send(WebRequest::head(url.clone()), cancel)
            .await?
            .error_for_status()
    }

    /// Ranged GET. A server ignoring `Range` (plain 200) is accepted.
    async fn get_range(
        &self,
        url: &Url,
        range: RangeSpec,
        cancel: &CancellationToken,
    ) -> Result<WebResponse, NetError> {
        self.send(WebRequest::get(url.clone()).with_range(range), cancel)
            .await?
            .error_for_status()
    }
}

pub type SharedWebReader = Arc<dyn WebReader>;
