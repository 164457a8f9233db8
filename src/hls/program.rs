use std::sync::Arc;

use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::playlist::{MediaPlaylist, Playlist};
use crate::{common::errors::HlsError, net::manager::WebReaderManager};

/// Master playlists may point at further master playlists; stop chasing
/// after this many hops.
const MAX_PLAYLIST_DEPTH: usize = 4;

/// A media playlist reached from the URL the caller asked for.
#[derive(Debug, Clone)]
pub struct ResolvedProgram {
    pub master_url: Option<Url>,
    /// Cache key for refreshes; the playlist's own `url` is the final
    /// location after redirects.
    pub media_url: Url,
    pub playlist: MediaPlaylist,
}

/// Reads playlists through the shared web cache.
#[derive(Clone)]
pub struct PlaylistLoader {
    manager: Arc<WebReaderManager>,
}

impl PlaylistLoader {
    pub fn new(manager: Arc<WebReaderManager>) -> Self {
        Self { manager }
    }

    pub async fn load(&self, url: &Url, cancel: &CancellationToken) -> Result<Arc<Playlist>, HlsError> {
        self.manager
            .cache::<Playlist>(url)
            .read(Playlist::parse, cancel)
            .await
    }

    /// Follow master playlists down to a media playlist.
    pub async fn resolve(
        &self,
        url: &Url,
        max_bandwidth: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedProgram, HlsError> {
        let mut url = url.clone();
        let mut master_url = None;

        for _ in 0..MAX_PLAYLIST_DEPTH {
            let playlist = self.load(&url, cancel).await?;
            match playlist.as_ref() {
                Playlist::Media(media) => {
                    debug!(
                        "HLS: media playlist {} with {} segments (live={})",
                        media.url,
                        media.segments.len(),
                        media.is_live()
                    );
                    return Ok(ResolvedProgram {
                        master_url,
                        media_url: url,
                        playlist: media.clone(),
                    });
                }
                Playlist::Master(master) => {
                    let next = master.select(max_bandwidth).ok_or(HlsError::NoVariants)?;
                    master_url.get_or_insert_with(|| url.clone());
                    url = next;
                }
            }
        }
        Err(HlsError::NoVariants)
    }

    /// Re-read a media playlist, revalidating against the cached copy.
    pub async fn refresh(
        &self,
        program: &ResolvedProgram,
        cancel: &CancellationToken,
    ) -> Result<MediaPlaylist, HlsError> {
        self.resolve(&program.media_url, None, cancel)
            .await
            .map(|p| p.playlist)
    }
}
