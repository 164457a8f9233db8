use std::time::Duration;

use reqwest::Url;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    connection::{HttpConnection, HttpResponse},
    request::{HttpRequest, Method},
};
use crate::{common::errors::NetError, configs::NetworkConfig, net::constants::MAX_REDIRECTS};

/// HTTP/1.1 client over plain TCP that follows redirects.
#[derive(Debug, Clone)]
pub struct SocketHttpClient {
    user_agent: String,
    referrer: Option<String>,
    keep_alive: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_redirects: usize,
}

impl SocketHttpClient {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            referrer: config.referrer.clone(),
            keep_alive: config.keep_alive,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            max_redirects: MAX_REDIRECTS,
        }
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// A request pre-filled with the configured user agent, referrer and keep-alive.
    pub fn request(&self, method: Method, url: Url) -> HttpRequest {
        HttpRequest::new(method, url)
            .with_user_agent(self.user_agent.clone())
            .with_referrer(self.referrer.clone())
            .with_keep_alive(self.keep_alive)
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse<TcpStream>, NetError> {
        HttpConnection::connect(&request.url, self.connect_timeout)
            .await?
            .with_read_timeout(Some(self.read_timeout))
            .send(request)
            .await
    }

    /// Send `request`, following up to `max_redirects` hops.
    ///
    /// When the hops run out the last redirect response is returned as-is.
    pub async fn execute(
        &self,
        mut request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse<TcpStream>, NetError> {
        let mut hops = 0;
        loop {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NetError::Cancelled),
                r = self.send_once(&request) => r?,
            };

            if !response.status.is_redirect() {
                return Ok(response);
            }
            let Some(location) = response.headers.get("Location") else {
                return Ok(response);
            };
            if hops >= self.max_redirects {
                warn!(
                    "Redirect limit ({}) reached at {}",
                    self.max_redirects, request.url
                );
                return Ok(response);
            }

            let next = request
                .url
                .join(location)
                .map_err(|e| NetError::InvalidUrl(format!("{}: {}", location, e)))?;
            debug!(
                "Following {} redirect {} -> {}",
                response.status.code, request.url, next
            );
            request.url = next;
            hops += 1;
        }
    }
}
