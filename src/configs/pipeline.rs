use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Per-segment teardown-and-retry budget before playback fails.
    #[serde(default = "default_segment_retries")]
    pub segment_retries: u32,
    /// Upper bound on variant bandwidth (bits/s) when resolving a master playlist.
    #[serde(default)]
    pub max_bandwidth: Option<u64>,
    /// Read size used when pulling segment bytes.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Capacity of the frame channel handed to the consumer.
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
    /// Minimum delay between live playlist refreshes.
    #[serde(default = "default_min_refresh_ms")]
    pub min_refresh_ms: u64,
    /// Give up on a live playlist after this many refreshes without new segments.
    #[serde(default = "default_max_stale_refreshes")]
    pub max_stale_refreshes: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segment_retries: default_segment_retries(),
            max_bandwidth: None,
            read_chunk_size: default_read_chunk_size(),
            event_queue: default_event_queue(),
            min_refresh_ms: default_min_refresh_ms(),
            max_stale_refreshes: default_max_stale_refreshes(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PoolConfig {
    /// Buffers kept for reuse; extra returned buffers are dropped.
    #[serde(default = "default_max_pooled")]
    pub max_pooled: usize,
    /// Initial capacity of freshly allocated packet buffers.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pooled: default_max_pooled(),
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_segment_retries() -> u32 {
    3
}

fn default_read_chunk_size() -> usize {
    64 * 1024
}

fn default_event_queue() -> usize {
    256
}

fn default_min_refresh_ms() -> u64 {
    1_000
}

fn default_max_stale_refreshes() -> u32 {
    6
}

fn default_max_pooled() -> usize {
    64
}

fn default_buffer_size() -> usize {
    2 * 1024
}
