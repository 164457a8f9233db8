use async_trait::async_trait;
use bytes::{Buf, Bytes};
use reqwest::{Client, Response, header};
use tokio_util::sync::CancellationToken;

use super::{WebReader, WebRequest, WebResponse};
use crate::{
    common::{errors::NetError, http::HttpClient},
    configs::NetworkConfig,
    net::{
        http::{HeaderMap, Method},
        stream::ByteStream,
    },
};

/// [`WebReader`] backed by `reqwest` (http and https).
pub struct ReqwestWebReader {
    client: Client,
}

impl ReqwestWebReader {
    pub fn new(config: &NetworkConfig) -> Result<Self, NetError> {
        Ok(Self {
            client: HttpClient::new(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// Pulls response chunks from `reqwest` on demand.
struct ReqwestBody {
    response: Response,
    pending: Bytes,
    done: bool,
}

#[async_trait]
impl ByteStream for ReqwestBody {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            if self.done {
                return Ok(0);
            }
            match self.response.chunk().await? {
                Some(chunk) => self.pending = chunk,
                None => self.done = true,
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

#[async_trait]
impl WebReader for ReqwestWebReader {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn send(
        &self,
        request: WebRequest,
        cancel: &CancellationToken,
    ) -> Result<WebResponse, NetError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(request.url),
            Method::Head => self.client.head(request.url),
        }
        .header(header::ACCEPT, "*/*");

        if let Some(range) = request.range {
            builder = builder.header(header::RANGE, range.to_string());
        }
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NetError::Cancelled),
            r = builder.send() => r?,
        };

        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers: HeaderMap = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = ReqwestBody {
            response,
            pending: Bytes::new(),
            done: false,
        };
        Ok(WebResponse::new(status, headers, url, Box::new(body)))
    }
}
