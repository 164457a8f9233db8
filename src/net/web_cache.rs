//! Conditional-GET cache of decoded objects keyed by URL.
//!
//! Each entry remembers the validators (`ETag`, `Last-Modified`) of the last
//! full response and revalidates with `If-None-Match` / `If-Modified-Since`.
//! Servers that send neither validators nor `Cache-Control` get a fresh
//! `nocache=<uuid>` query parameter on every request after the first so that
//! intermediate caches cannot serve a stale live playlist.

use std::{
    any::{Any, TypeId},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    common::errors::{HlsError, NetError},
    configs::CacheConfig,
    net::{
        constants::NOCACHE_PARAM,
        http::HeaderMap,
        retry::RetryPolicy,
        web_reader::{WebReader, WebRequest},
    },
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub cache_control: bool,
}

impl Validators {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            etag: headers.get("ETag").map(str::to_string),
            last_modified: headers.get("Last-Modified").map(str::to_string),
            cache_control: headers.contains("Cache-Control"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// `url` with any previous cache buster replaced by a fresh one.
pub fn cache_busted(url: &Url) -> Url {
    let mut busted = strip_cache_buster(url);
    busted
        .query_pairs_mut()
        .append_pair(NOCACHE_PARAM, &Uuid::new_v4().to_string());
    busted
}

pub fn strip_cache_buster(url: &Url) -> Url {
    if !url.query_pairs().any(|(k, _)| k == NOCACHE_PARAM) {
        return url.clone();
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .filter(|(k, _)| k != NOCACHE_PARAM)
        .collect();

    let mut out = url.clone();
    if kept.is_empty() {
        out.set_query(None);
    } else {
        out.query_pairs_mut().clear().extend_pairs(kept);
    }
    out
}

enum Fetched {
    NotModified,
    Body {
        url: Url,
        body: Bytes,
        validators: Validators,
    },
}

struct CacheState<T> {
    value: Option<Arc<T>>,
    validators: Validators,
    requests: u64,
    bust: bool,
}

type FetchFuture<T> = Shared<BoxFuture<'static, Result<Arc<T>, HlsError>>>;

struct CacheInner<T> {
    url: Url,
    reader: Arc<dyn WebReader>,
    policy: RetryPolicy,
    max_body: usize,
    busting: bool,
    state: Mutex<CacheState<T>>,
    in_flight: Mutex<Option<(u64, FetchFuture<T>)>>,
    generation: AtomicU64,
}

impl<T: Send + Sync + 'static> CacheInner<T> {
    fn new(url: Url, reader: Arc<dyn WebReader>, policy: RetryPolicy, config: &CacheConfig) -> Self {
        Self {
            url,
            reader,
            policy,
            max_body: config.max_body_bytes,
            busting: config.cache_busting,
            state: Mutex::new(CacheState {
                value: None,
                validators: Validators::default(),
                requests: 0,
                bust: false,
            }),
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    async fn fetch_once(&self, attempt: u32, cancel: &CancellationToken) -> Result<Fetched, NetError> {
        let request = {
            let mut state = self.state.lock();
            state.requests += 1;
            let url = if state.requests > 1 && state.bust {
                cache_busted(&self.url)
            } else {
                self.url.clone()
            };

            let mut request = WebRequest::get(url);
            if state.value.is_some() {
                if let Some(etag) = &state.validators.etag {
                    request = request.with_header("If-None-Match", etag.clone());
                }
                if let Some(modified) = &state.validators.last_modified {
                    request = request.with_header("If-Modified-Since", modified.clone());
                }
            }
            request
        };

        trace!(
            "Web cache fetch {} (attempt {}) via {}",
            request.url,
            attempt + 1,
            self.reader.name()
        );
        let response = self.reader.send(request, cancel).await?;
        if response.is_not_modified() {
            debug!("{} not modified", self.url);
            return Ok(Fetched::NotModified);
        }

        let response = response.error_for_status()?;
        let validators = Validators::from_headers(&response.headers);
        let url = strip_cache_buster(&response.url);
        let body = response.bytes(self.max_body, cancel).await?;
        Ok(Fetched::Body {
            url,
            body,
            validators,
        })
    }

    async fn refresh<F>(&self, factory: &F, cancel: &CancellationToken) -> Result<Arc<T>, HlsError>
    where
        F: Fn(&Url, &[u8]) -> Result<T, HlsError>,
    {
        let fetched = self
            .policy
            .run(cancel, |attempt| self.fetch_once(attempt, cancel))
            .await?;

        match fetched {
            Fetched::NotModified => {
                let cached = self.state.lock().value.clone();
                cached.ok_or_else(|| {
                    HlsError::Net(NetError::Status {
                        status: 304,
                        url: self.url.to_string(),
                    })
                })
            }
            Fetched::Body {
                url,
                body,
                validators,
            } => {
                {
                    let mut state = self.state.lock();
                    state.bust = self.busting && validators.is_empty() && !validators.cache_control;
                }

                let value = Arc::new(factory(&url, &body[..])?);
                let mut state = self.state.lock();
                state.value = Some(value.clone());
                state.validators = validators;
                Ok(value)
            }
        }
    }
}

/// Handle to one cached URL. Clones share the entry.
pub struct WebCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for WebCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> WebCache<T> {
    pub fn new(url: Url, reader: Arc<dyn WebReader>, policy: RetryPolicy) -> Self {
        Self::with_config(url, reader, policy, &CacheConfig::default())
    }

    pub fn with_config(
        url: Url,
        reader: Arc<dyn WebReader>,
        policy: RetryPolicy,
        config: &CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner::new(url, reader, policy, config)),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn cached(&self) -> Option<Arc<T>> {
        self.inner.state.lock().value.clone()
    }

    pub fn validators(&self) -> Validators {
        self.inner.state.lock().validators.clone()
    }

    /// Requests issued so far, retries included.
    pub fn request_count(&self) -> u64 {
        self.inner.state.lock().requests
    }

    /// Drop the cached value and validators; the next read is unconditional.
    pub fn flush(&self) {
        let mut state = self.inner.state.lock();
        state.value = None;
        state.validators = Validators::default();
        debug!("Flushed web cache entry {}", self.inner.url);
    }

    /// Fetch or revalidate the entry and decode new bodies with `factory`.
    ///
    /// Concurrent callers share one in-flight fetch; the factory and
    /// cancellation token of the caller that started it are used.
    pub async fn read<F>(&self, factory: F, cancel: &CancellationToken) -> Result<Arc<T>, HlsError>
    where
        F: Fn(&Url, &[u8]) -> Result<T, HlsError> + Send + Sync + 'static,
    {
        let (generation, fetch) = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some((generation, fetch)) => {
                    trace!("Joining in-flight fetch of {}", self.inner.url);
                    (*generation, fetch.clone())
                }
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                    let inner = self.inner.clone();
                    let cancel = cancel.clone();
                    let fetch = async move { inner.refresh(&factory, &cancel).await }
                        .boxed()
                        .shared();
                    *slot = Some((generation, fetch.clone()));
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut slot = self.inner.in_flight.lock();
        if slot.as_ref().is_some_and(|(g, _)| *g == generation) {
            *slot = None;
        }
        result
    }
}

type EntryKey = (Url, TypeId);

struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    last_used: AtomicU64,
}

/// Entries keyed by URL and decoded type.
///
/// Holds at most `max_entries` entries; the least recently used one is
/// dropped when a new one would exceed that. Handles already given out keep
/// working, a later `get` for an evicted URL starts a fresh entry.
pub struct WebCacheManager {
    reader: Arc<dyn WebReader>,
    policy: RetryPolicy,
    config: CacheConfig,
    entries: DashMap<EntryKey, Slot>,
    clock: AtomicU64,
}

impl WebCacheManager {
    pub fn new(reader: Arc<dyn WebReader>, policy: RetryPolicy, config: CacheConfig) -> Self {
        Self {
            reader,
            policy,
            config,
            entries: DashMap::new(),
            clock: AtomicU64::new(0),
        }
    }

    pub fn get<T: Send + Sync + 'static>(&self, url: &Url) -> WebCache<T> {
        let key = (url.clone(), TypeId::of::<T>());
        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        let (entry, inserted) = {
            let mut inserted = false;
            let slot = self.entries.entry(key.clone()).or_insert_with(|| {
                inserted = true;
                Slot {
                    value: Arc::new(CacheInner::<T>::new(
                        url.clone(),
                        self.reader.clone(),
                        self.policy.clone(),
                        &self.config,
                    )),
                    last_used: AtomicU64::new(now),
                }
            });
            slot.last_used.store(now, Ordering::Relaxed);
            (slot.value.clone(), inserted)
        };

        if inserted {
            self.evict_beyond_capacity(&key);
        }

        match entry.downcast::<CacheInner<T>>() {
            Ok(inner) => WebCache { inner },
            Err(_) => WebCache::with_config(
                url.clone(),
                self.reader.clone(),
                self.policy.clone(),
                &self.config,
            ),
        }
    }

    fn evict_beyond_capacity(&self, keep: &EntryKey) {
        let capacity = self.config.max_entries.max(1);
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .filter(|slot| slot.key() != keep)
                .min_by_key(|slot| slot.last_used.load(Ordering::Relaxed))
                .map(|slot| slot.key().clone());
            let Some(oldest) = oldest else {
                break;
            };
            trace!("Evicting cache entry {}", oldest.0);
            self.entries.remove(&oldest);
        }
    }

    /// Forget every entry for `url`.
    pub fn remove(&self, url: &Url) {
        self.entries.retain(|(u, _), _| u != url);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
