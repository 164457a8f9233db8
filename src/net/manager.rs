use std::sync::Arc;

use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    common::errors::NetError,
    configs::{Config, Transport},
    net::{
        content_type::{ContentKind, ContentType, ContentTypeDetector},
        retry::RetryPolicy,
        web_cache::{WebCache, WebCacheManager},
        web_reader::{ReqwestWebReader, SocketWebReader, WebReader},
    },
};

/// Owns the configured transport and everything layered on it.
pub struct WebReaderManager {
    reader: Arc<dyn WebReader>,
    policy: RetryPolicy,
    caches: WebCacheManager,
    detector: ContentTypeDetector,
}

impl WebReaderManager {
    pub fn new(config: &Config) -> Result<Self, NetError> {
        let reader: Arc<dyn WebReader> = match config.network.transport {
            Transport::Socket => Arc::new(SocketWebReader::new(&config.network)),
            Transport::Reqwest => Arc::new(ReqwestWebReader::new(&config.network)?),
        };
        info!("Using {} web reader", reader.name());
        Ok(Self::with_reader(reader, config))
    }

    /// Build on an existing reader; transport settings in `config` are ignored.
    pub fn with_reader(reader: Arc<dyn WebReader>, config: &Config) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        Self {
            caches: WebCacheManager::new(reader.clone(), policy.clone(), config.cache.clone()),
            detector: ContentTypeDetector::new(reader.clone()),
            reader,
            policy,
        }
    }

    pub fn reader(&self) -> &Arc<dyn WebReader> {
        &self.reader
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn caches(&self) -> &WebCacheManager {
        &self.caches
    }

    pub fn cache<T: Send + Sync + 'static>(&self, url: &Url) -> WebCache<T> {
        self.caches.get(url)
    }

    pub async fn detect_content_type(
        &self,
        url: &Url,
        kind: ContentKind,
        cancel: &CancellationToken,
    ) -> Result<Option<ContentType>, NetError> {
        self.detector.detect(url, kind, cancel).await
    }
}
