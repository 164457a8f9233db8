use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{WebReader, WebRequest, WebResponse};
use crate::{
    common::errors::NetError,
    configs::NetworkConfig,
    net::http::SocketHttpClient,
};

/// [`WebReader`] backed by the crate's own HTTP/1.1 client (http only).
pub struct SocketWebReader {
    client: SocketHttpClient,
}

impl SocketWebReader {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            client: SocketHttpClient::new(config),
        }
    }

    pub fn with_client(client: SocketHttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebReader for SocketWebReader {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn send(
        &self,
        request: WebRequest,
        cancel: &CancellationToken,
    ) -> Result<WebResponse, NetError> {
        let mut http = self
            .client
            .request(request.method, request.url)
            .with_range(request.range);
        for (name, value) in request.headers.iter() {
            http = http.with_header(name, value);
        }

        let (status, headers, url, body) = self.client.execute(http, cancel).await?.into_parts();
        Ok(WebResponse::new(status.code, headers, url, Box::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{
        constants::PROBE_RANGE,
        http::RangeSpec,
        testing::TestServer,
    };

    #[tokio::test]
    async fn fetches_bytes_and_forwards_headers() {
        let server = TestServer::spawn(|req| {
            if req.target == "/key.bin" {
                "HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nKEY!".into()
            } else {
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".into()
            }
        })
        .await;

        let reader = SocketWebReader::new(&NetworkConfig::default());
        let cancel = CancellationToken::new();

        let body = reader
            .get_bytes(&server.url("/key.bin"), &cancel)
            .await
            .unwrap();
        assert_eq!(&body[..], b"KEY!");

        let err = reader
            .get_bytes(&server.url("/missing"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn ranged_get_sends_range_header() {
        let server = TestServer::spawn(|_| {
            "HTTP/1.1 206 Partial Content\r\nContent-Type: video/MP2T\r\nContent-Length: 1\r\n\r\nG".into()
        })
        .await;

        let reader = SocketWebReader::new(&NetworkConfig::default());
        let response = reader
            .get_range(
                &server.url("/seg.ts"),
                RangeSpec::probe(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 206);
        assert_eq!(response.content_type().as_deref(), Some("video/mp2t"));
        let seen = server.requests();
        assert_eq!(seen[0].headers.get("Range"), Some(PROBE_RANGE));
    }
}
