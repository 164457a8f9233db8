//! Tunables for the transport layer.

// ── HTTP line buffer ─────────────────────────────────────────────────────────

/// Initial size of the response-head line buffer (16 KB).
pub const LINE_BUFFER_INITIAL: usize = 16 * 1_024;

/// The line buffer doubles up to this cap (64 KB); longer lines are discarded.
pub const LINE_BUFFER_MAX: usize = 64 * 1_024;

// ── Redirects ────────────────────────────────────────────────────────────────

/// Redirect hops followed before the last response is returned as-is.
pub const MAX_REDIRECTS: usize = 8;

// ── Content-type probing ─────────────────────────────────────────────────────

/// Range requested by the headers-only GET probe.
pub const PROBE_RANGE: &str = "bytes=0-0";

// ── Web cache ────────────────────────────────────────────────────────────────

/// Query parameter appended to defeat intermediate caches.
pub const NOCACHE_PARAM: &str = "nocache";

/// Upper bound on a cached body (playlists and keys are small).
pub const MAX_CACHED_BODY: usize = 8 * 1_024 * 1_024;
