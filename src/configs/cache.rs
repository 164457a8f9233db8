use serde::{Deserialize, Serialize};

use crate::net::constants::MAX_CACHED_BODY;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Largest body the web cache will buffer (playlists, keys).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Append `nocache=<uuid>` when the server sends no validators.
    #[serde(default = "default_cache_busting")]
    pub cache_busting: bool,
    /// Entries kept before the least recently used one is evicted.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            cache_busting: default_cache_busting(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_body_bytes() -> usize {
    MAX_CACHED_BODY
}

fn default_cache_busting() -> bool {
    true
}

fn default_max_entries() -> usize {
    256
}
