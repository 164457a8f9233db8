use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    common::errors::HlsError,
    hls::playlist::{EncryptionMethod, SegmentKey},
    net::web_cache::WebCacheManager,
};

/// Cache factory for raw AES-128 key bodies.
pub fn parse_key(_: &Url, body: &[u8]) -> Result<[u8; 16], HlsError> {
    body.try_into().map_err(|_| HlsError::InvalidKey(body.len()))
}

/// Fetch the key for `key`, reusing a previously downloaded copy.
pub async fn load_key(
    caches: &WebCacheManager,
    key: &SegmentKey,
    cancel: &CancellationToken,
) -> Result<[u8; 16], HlsError> {
    match key.method {
        EncryptionMethod::Aes128 => {}
        EncryptionMethod::SampleAes => {
            return Err(HlsError::UnsupportedEncryption("SAMPLE-AES".into()));
        }
        EncryptionMethod::None => {
            return Err(HlsError::UnsupportedEncryption("NONE".into()));
        }
    }

    let uri = key.uri.as_ref().ok_or_else(|| HlsError::MissingAttribute {
        tag: "EXT-X-KEY".into(),
        attribute: "URI".into(),
    })?;

    let cache = caches.get::<[u8; 16]>(uri);
    if let Some(bytes) = cache.cached() {
        return Ok(*bytes);
    }

    debug!("Fetching AES-128 key {}", uri);
    let bytes = cache.read(parse_key, cancel).await?;
    Ok(*bytes)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        configs::CacheConfig,
        net::{
            RetryPolicy,
            testing::{Reply, ScriptedReader},
        },
    };

    fn aes_key(uri: &str) -> SegmentKey {
        SegmentKey {
            method: EncryptionMethod::Aes128,
            uri: Some(Url::parse(uri).unwrap()),
            iv: None,
            key_format: None,
        }
    }

    fn manager(reader: std::sync::Arc<ScriptedReader>) -> WebCacheManager {
        WebCacheManager::new(
            reader,
            RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            CacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn key_is_fetched_once() {
        let reader = ScriptedReader::new(|_| Ok(Reply::ok(vec![9u8; 16])));
        let caches = manager(reader.clone());
        let key = aes_key("http://example/key.bin");
        let cancel = CancellationToken::new();

        assert_eq!(load_key(&caches, &key, &cancel).await.unwrap(), [9u8; 16]);
        assert_eq!(load_key(&caches, &key, &cancel).await.unwrap(), [9u8; 16]);
        assert_eq!(reader.requests().len(), 1);
    }

    #[tokio::test]
    async fn wrong_key_length_is_rejected() {
        let reader = ScriptedReader::new(|_| Ok(Reply::ok(vec![1u8; 15])));
        let caches = manager(reader);
        let result = load_key(
            &caches,
            &aes_key("http://example/short.bin"),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(HlsError::InvalidKey(15))));
    }

    #[tokio::test]
    async fn sample_aes_is_unsupported() {
        let reader = ScriptedReader::new(|_| Ok(Reply::ok(vec![0u8; 16])));
        let caches = manager(reader.clone());
        let mut key = aes_key("http://example/key.bin");
        key.method = EncryptionMethod::SampleAes;
        let result = load_key(&caches, &key, &CancellationToken::new()).await;
        assert!(matches!(result, Err(HlsError::UnsupportedEncryption(_))));
        assert!(reader.requests().is_empty());
    }
}
