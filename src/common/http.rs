use std::time::Duration;

use reqwest::{Client, Error};

use crate::configs::NetworkConfig;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

pub struct HttpClient;

impl HttpClient {
    /// Platform HTTP client used by [`crate::net::ReqwestWebReader`].
    pub fn new(config: &NetworkConfig) -> Result<Client, Error> {
        Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(
                crate::net::constants::MAX_REDIRECTS,
            ))
            .build()
    }
}
