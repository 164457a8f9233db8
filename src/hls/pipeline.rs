use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    feeder::StreamFeeder,
    playlist::{MediaPlaylist, SegmentReference},
    program::{PlaylistLoader, ResolvedProgram},
};
use crate::{
    common::{
        errors::{HlsError, MediaError, NetError},
        types::Timestamp,
    },
    configs::{Config, PipelineConfig},
    crypto::{Aes128CbcStream, load_key},
    media::{AudioConfiguration, PacketPool, TsPesPacket},
    net::{
        content_type::{ContentKind, ContentType},
        manager::WebReaderManager,
        retry::{Backoff, RetryPolicy},
        stream::{BoxByteStream, read_cancellable},
        web_reader::WebRequest,
    },
};

/// Live playback starts this many segments before the end of the playlist.
const LIVE_EDGE_SEGMENTS: usize = 3;

pub type FrameSender = mpsc::Sender<Option<TsPesPacket>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Idle,
    Opening,
    Playing,
    Ended,
    Failed,
    Cancelled,
}

#[derive(Debug, Default)]
struct PositionState {
    state: PlaybackState,
    position: Timestamp,
    emitted: Timestamp,
    playlist_duration: Timestamp,
    is_live: bool,
    segments_played: u64,
    audio: Option<AudioConfiguration>,
}

/// Shared view of a running pipeline for position and state queries.
#[derive(Debug, Clone, Default)]
pub struct PlaybackPosition {
    inner: Arc<RwLock<PositionState>>,
}

impl PlaybackPosition {
    pub fn state(&self) -> PlaybackState {
        self.inner.read().state
    }

    /// Presentation timestamp of the last frame handed to the sink.
    pub fn position(&self) -> Timestamp {
        self.inner.read().position
    }

    /// Summed duration of every frame handed to the sink.
    pub fn emitted_duration(&self) -> Timestamp {
        self.inner.read().emitted
    }

    pub fn playlist_duration(&self) -> Timestamp {
        self.inner.read().playlist_duration
    }

    pub fn is_live(&self) -> bool {
        self.inner.read().is_live
    }

    pub fn segments_played(&self) -> u64 {
        self.inner.read().segments_played
    }

    pub fn audio_configuration(&self) -> Option<AudioConfiguration> {
        self.inner.read().audio.clone()
    }

    pub(crate) fn set_state(&self, state: PlaybackState) {
        self.inner.write().state = state;
    }

    pub(crate) fn set_audio_configuration(&self, config: AudioConfiguration) {
        self.inner.write().audio = Some(config);
    }

    fn set_playlist(&self, playlist: &MediaPlaylist) {
        let mut inner = self.inner.write();
        inner.playlist_duration = playlist.total_duration();
        inner.is_live = playlist.is_live();
    }

    fn record_frame(&self, frame: &TsPesPacket) {
        let mut inner = self.inner.write();
        inner.position = frame.pts;
        if let Some(duration) = frame.duration {
            inner.emitted += duration;
        }
    }

    fn record_segment(&self) {
        self.inner.write().segments_played += 1;
    }

    fn reset(&self) {
        *self.inner.write() = PositionState {
            state: PlaybackState::Opening,
            ..PositionState::default()
        };
    }
}

/// Plays one HLS program (or a single media file) into a frame channel.
///
/// Frames are sent as `Some(packet)` in presentation order; `None` marks
/// the end of the stream. Dropping the receiver stops playback.
pub struct HlsPipeline {
    manager: Arc<WebReaderManager>,
    config: PipelineConfig,
    pool: PacketPool,
    segment_policy: RetryPolicy,
    position: PlaybackPosition,
}

impl HlsPipeline {
    pub fn new(manager: Arc<WebReaderManager>, config: &Config) -> Self {
        let segment_policy = RetryPolicy::new(
            config.pipeline.segment_retries + 1,
            Duration::from_millis(config.retry.base_delay_ms),
            Duration::from_millis(config.retry.max_delay_ms),
        );
        Self {
            manager,
            config: config.pipeline.clone(),
            pool: PacketPool::from_config(&config.pool),
            segment_policy,
            position: PlaybackPosition::default(),
        }
    }

    pub fn position(&self) -> PlaybackPosition {
        self.position.clone()
    }

    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    pub async fn play(
        &self,
        url: &Url,
        sink: FrameSender,
        cancel: &CancellationToken,
    ) -> Result<(), HlsError> {
        self.position.reset();
        info!("HLS: opening {}", url);

        let result = self.run(url, &sink, cancel).await;
        match &result {
            Ok(()) => {
                self.position.set_state(PlaybackState::Ended);
                info!(
                    "HLS: finished {} after {} segments",
                    url,
                    self.position.segments_played()
                );
            }
            Err(e) if e.is_cancelled() => {
                self.position.set_state(PlaybackState::Cancelled);
                debug!("HLS: playback of {} cancelled", url);
            }
            Err(e) => {
                self.position.set_state(PlaybackState::Failed);
                error!("HLS: playback of {} failed: {}", url, e);
            }
        }
        result
    }

    async fn run(&self, url: &Url, sink: &FrameSender, cancel: &CancellationToken) -> Result<(), HlsError> {
        let mut feeder = StreamFeeder::new(self.pool.clone(), self.position.clone());

        match self
            .manager
            .detect_content_type(url, ContentKind::Any, cancel)
            .await?
        {
            None | Some(ContentType::M3u8) => {
                self.play_program(url, &mut feeder, sink, cancel).await?;
            }
            Some(ContentType::Aac | ContentType::MpegTs) => {
                self.position.set_state(PlaybackState::Playing);
                let segment = SegmentReference::from_uri(url.clone());
                self.play_segment(&segment, &mut feeder, sink, cancel).await?;
            }
            Some(other) => {
                warn!("HLS: cannot demux {:?} from {}", other, url);
                return Err(MediaError::UnknownContainer.into());
            }
        }

        feeder.finish()?;
        self.forward(&feeder, sink, cancel).await?;
        send(sink, None, cancel).await
    }

    async fn play_program(
        &self,
        url: &Url,
        feeder: &mut StreamFeeder,
        sink: &FrameSender,
        cancel: &CancellationToken,
    ) -> Result<(), HlsError> {
        let loader = PlaylistLoader::new(self.manager.clone());
        let program = loader.resolve(url, self.config.max_bandwidth, cancel).await?;
        let mut playlist = program.playlist.clone();
        if playlist.segments.is_empty() && !playlist.is_live() {
            return Err(HlsError::EmptyPlaylist);
        }

        self.position.set_playlist(&playlist);
        self.position.set_state(PlaybackState::Playing);

        let mut last = if playlist.is_live() {
            let start = playlist.segments.len().saturating_sub(LIVE_EDGE_SEGMENTS);
            start
                .checked_sub(1)
                .and_then(|i| playlist.segments.get(i))
                .map(|s| s.sequence)
        } else {
            None
        };
        let mut stale = 0;

        loop {
            let pending: Vec<SegmentReference> = playlist.segments_after(last).cloned().collect();
            for segment in &pending {
                last = Some(segment.sequence);
                if segment.gap {
                    debug!("HLS: skipping gap segment {}", segment.sequence);
                    continue;
                }
                feeder.start_segment(segment.discontinuity);
                self.play_segment(segment, feeder, sink, cancel).await?;
                self.position.record_segment();
            }

            if !playlist.is_live() {
                return Ok(());
            }

            if pending.is_empty() {
                stale += 1;
                if stale > self.config.max_stale_refreshes {
                    warn!(
                        "HLS: {} stopped advancing after {} refreshes",
                        program.media_url, stale
                    );
                    return Ok(());
                }
            } else {
                stale = 0;
            }

            let interval = playlist.refresh_interval(Duration::from_millis(self.config.min_refresh_ms));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NetError::Cancelled.into()),
                _ = tokio::time::sleep(interval) => {}
            }

            if let Some(next) = self.refresh(&loader, &program, cancel).await? {
                self.position.set_playlist(&next);
                playlist = next;
            }
        }
    }

    /// `Ok(None)` when the refresh failed transiently and the old playlist stands.
    async fn refresh(
        &self,
        loader: &PlaylistLoader,
        program: &ResolvedProgram,
        cancel: &CancellationToken,
    ) -> Result<Option<MediaPlaylist>, HlsError> {
        match loader.refresh(program, cancel).await {
            Ok(playlist) => Ok(Some(playlist)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(HlsError::Net(e)) if is_transient(&e) => {
                warn!("HLS: refresh of {} failed: {}", program.media_url, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Stream one segment into the feeder, tearing down and reconnecting on
    /// transient failures. Bytes already delivered are skipped on retry.
    async fn play_segment(
        &self,
        segment: &SegmentReference,
        feeder: &mut StreamFeeder,
        sink: &FrameSender,
        cancel: &CancellationToken,
    ) -> Result<(), HlsError> {
        let mut delivered = 0u64;
        let mut backoff = Backoff::new(self.segment_policy.clone());

        loop {
            let error = match self
                .stream_segment(segment, &mut delivered, feeder, sink, cancel)
                .await
            {
                Ok(()) => {
                    debug!(
                        "HLS: segment {} done ({} bytes)",
                        segment.sequence, delivered
                    );
                    return Ok(());
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(HlsError::Net(e)) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if backoff.is_exhausted() {
                return Err(NetError::RetryExhausted {
                    attempts: backoff.attempts() + 1,
                    source: Box::new(error),
                }
                .into());
            }

            let delay = backoff.next();
            warn!(
                "HLS: segment {} failed after {} bytes: {}. Retrying in {:?}",
                segment.sequence, delivered, error, delay
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NetError::Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream_segment(
        &self,
        segment: &SegmentReference,
        delivered: &mut u64,
        feeder: &mut StreamFeeder,
        sink: &FrameSender,
        cancel: &CancellationToken,
    ) -> Result<(), HlsError> {
        let mut body = self.open_segment(segment, cancel).await?;
        let mut skip = *delivered;
        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];

        loop {
            let n = read_cancellable(&mut body, &mut buf, cancel).await?;
            if n == 0 {
                break;
            }

            let mut data = &buf[..n];
            if skip > 0 {
                let skipped = skip.min(n as u64) as usize;
                skip -= skipped as u64;
                data = &data[skipped..];
                if data.is_empty() {
                    continue;
                }
            }

            *delivered += data.len() as u64;
            feeder.push(data)?;
            self.forward(feeder, sink, cancel).await?;
        }

        feeder.end_segment()?;
        self.forward(feeder, sink, cancel).await
    }

    async fn open_segment(
        &self,
        segment: &SegmentReference,
        cancel: &CancellationToken,
    ) -> Result<BoxByteStream, HlsError> {
        let key = match &segment.key {
            Some(key) => Some((
                load_key(self.manager.caches(), key, cancel).await?,
                key.iv_for(segment.sequence),
            )),
            None => None,
        };

        // Single attempt; play_segment owns the retry budget for segments.
        let mut request = WebRequest::get(segment.uri.clone());
        if let Some(range) = &segment.byte_range {
            request = request.with_range(range.to_range_spec());
        }
        let response = self
            .manager
            .reader()
            .send(request, cancel)
            .await?
            .error_for_status()?;

        let body = response.into_body();
        Ok(match key {
            Some((key, iv)) => Box::new(Aes128CbcStream::new(body, key, iv)) as BoxByteStream,
            None => body,
        })
    }

    async fn forward(
        &self,
        feeder: &StreamFeeder,
        sink: &FrameSender,
        cancel: &CancellationToken,
    ) -> Result<(), HlsError> {
        for frame in feeder.take_frames() {
            self.position.record_frame(&frame);
            send(sink, Some(frame), cancel).await?;
        }
        Ok(())
    }
}

async fn send(
    sink: &FrameSender,
    frame: Option<TsPesPacket>,
    cancel: &CancellationToken,
) -> Result<(), HlsError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HlsError::Net(NetError::Cancelled)),
        sent = sink.send(frame) => sent.map_err(|_| {
            debug!("HLS: frame receiver dropped");
            HlsError::Net(NetError::Cancelled)
        }),
    }
}

/// Playlist loads go through the retry policy, so an exhausted budget is
/// still a transient failure for a live refresh.
fn is_transient(error: &NetError) -> bool {
    error.is_retryable() || matches!(error, NetError::RetryExhausted { .. })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};

    use super::*;
    use crate::{
        media::{
            AacFrameHeader,
            id3::tests::timestamp_tag,
            ts::{
                STREAM_TYPE_AAC,
                tests::{AUDIO_PID, packetize, pat, pes, pmt},
            },
        },
        net::{
            http::HeaderMap,
            stream::ByteStream,
            testing::{Reply, ScriptedReader},
            web_reader::{WebReader, WebResponse},
        },
    };

    fn adts_frame(fill: u8) -> Vec<u8> {
        let header = AacFrameHeader {
            profile: 1,
            frequency_index: 4,
            sample_rate: 44_100,
            channel_config: 2,
            frame_length: 27,
            has_crc: false,
            header_length: 7,
            raw_blocks: 1,
        };
        let mut out = header.encode().to_vec();
        out.extend(std::iter::repeat_n(fill, 20));
        out
    }

    fn ts_segment(pts: u64, frames: u8, first_cc: u8) -> Vec<u8> {
        let audio: Vec<u8> = (0..frames).flat_map(adts_frame).collect();
        let mut out = pat();
        out.extend(pmt(&[(STREAM_TYPE_AAC, AUDIO_PID)]));
        out.extend(packetize(AUDIO_PID, first_cc, &pes(pts, &audio, true)));
        out
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 100;
        config.pipeline.min_refresh_ms = 10;
        config
    }

    fn pipeline(reader: Arc<dyn WebReader>) -> HlsPipeline {
        let config = test_config();
        HlsPipeline::new(
            Arc::new(WebReaderManager::with_reader(reader, &config)),
            &config,
        )
    }

    async fn collect(
        pipeline: &HlsPipeline,
        url: &str,
    ) -> (Result<(), HlsError>, Vec<Option<TsPesPacket>>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let result = pipeline
            .play(&Url::parse(url).unwrap(), tx, &CancellationToken::new())
            .await;
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        (result, frames)
    }

    #[tokio::test(start_paused = true)]
    async fn plays_master_playlist_to_end() {
        let reader = ScriptedReader::new(|req| match req.url.path() {
            "/master.m3u8" => Ok(Reply::ok(
                "#EXTM3U\n\
                 #EXT-X-STREAM-INF:BANDWIDTH=800000,CODECS=\"avc1.4d401e,mp4a.40.2\"\nvideo.m3u8\n\
                 #EXT-X-STREAM-INF:BANDWIDTH=64000,CODECS=\"mp4a.40.2\"\naudio.m3u8\n",
            )),
            "/audio.m3u8" => Ok(Reply::ok(
                "#EXTM3U\n#EXT-X-TARGETDURATION:2\n\
                 #EXTINF:2,\ns0.ts\n#EXTINF:2,\ns1.ts\n#EXT-X-ENDLIST\n",
            )),
            "/s0.ts" => Ok(Reply::ok(ts_segment(90_000, 2, 0))),
            // Continuity counters carry on across segments.
            "/s1.ts" => Ok(Reply::ok(ts_segment(90_000 + 2 * 1024 * 90_000 / 44_100, 2, 1))),
            _ => Ok(Reply::status(404)),
        });
        let pipeline = pipeline(reader.clone());
        let (result, frames) = collect(&pipeline, "http://example/master.m3u8").await;

        result.unwrap();
        assert_eq!(frames.len(), 5);
        assert!(frames[4].is_none());
        let pts: Vec<_> = frames.iter().flatten().map(|f| f.pts).collect();
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(pts[0], Timestamp::from_secs_f64(1.0));

        let position = pipeline.position();
        assert_eq!(position.state(), PlaybackState::Ended);
        assert_eq!(position.segments_played(), 2);
        assert_eq!(position.playlist_duration(), Timestamp::from_secs_f64(4.0));
        assert_eq!(position.audio_configuration().unwrap().sample_rate, 44_100);
        assert!(!reader.requests().iter().any(|r| r.url.path() == "/video.m3u8"));
    }

    #[tokio::test(start_paused = true)]
    async fn packed_audio_with_id3_timestamps() {
        let reader = ScriptedReader::new(|req| match req.url.path() {
            "/a.m3u8" => Ok(Reply::ok(
                "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1,\na0.aac\n#EXT-X-ENDLIST\n",
            )),
            "/a0.aac" => {
                let mut body = timestamp_tag(900_000);
                body.extend(adts_frame(1));
                body.extend(adts_frame(2));
                Ok(Reply::ok(body))
            }
            _ => Ok(Reply::status(404)),
        });
        let (result, frames) = collect(&pipeline(reader), "http://example/a.m3u8").await;

        result.unwrap();
        let frames: Vec<_> = frames.into_iter().flatten().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pts, Timestamp::from_secs_f64(10.0));
        assert_eq!(frames[0].payload(), &[1u8; 20][..]);
    }

    #[tokio::test(start_paused = true)]
    async fn decrypts_keyed_segments() {
        let key = *b"0123456789abcdef";
        let mut plain = adts_frame(7);
        plain.extend(adts_frame(8));
        let mut cipher = vec![0u8; plain.len() + 16];
        cipher[..plain.len()].copy_from_slice(&plain);
        // No IV attribute: the IV is the media sequence number, 5.
        let iv = crate::crypto::sequence_iv(5);
        let len = cbc::Encryptor::<aes::Aes128>::new((&key).into(), (&iv).into())
            .encrypt_padded_mut::<Pkcs7>(&mut cipher, plain.len())
            .unwrap()
            .len();
        cipher.truncate(len);

        let reader = ScriptedReader::new(move |req| match req.url.path() {
            "/enc.m3u8" => Ok(Reply::ok(
                "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:5\n\
                 #EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\
                 #EXTINF:1,\ne5.aac\n#EXT-X-ENDLIST\n",
            )),
            "/key.bin" => Ok(Reply::ok(key.to_vec())),
            "/e5.aac" => Ok(Reply::ok(cipher.clone())),
            _ => Ok(Reply::status(404)),
        });
        let (result, frames) = collect(&pipeline(reader), "http://example/enc.m3u8").await;

        result.unwrap();
        let payloads: Vec<_> = frames.iter().flatten().map(|f| f.payload()[0]).collect();
        assert_eq!(payloads, [7, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn byte_ranges_are_requested() {
        let reader = ScriptedReader::new(|req| match req.url.path() {
            "/r.m3u8" => Ok(Reply::ok(
                "#EXTM3U\n#EXT-X-TARGETDURATION:1\n\
                 #EXTINF:1,\n#EXT-X-BYTERANGE:27@0\nall.aac\n\
                 #EXTINF:1,\n#EXT-X-BYTERANGE:27\nall.aac\n#EXT-X-ENDLIST\n",
            )),
            "/all.aac" => {
                let fill = match req.range.as_ref().map(ToString::to_string).as_deref() {
                    Some("bytes=0-26") => 1,
                    Some("bytes=27-53") => 2,
                    _ => 0,
                };
                Ok(Reply {
                    status: 206,
                    ..Reply::ok(adts_frame(fill))
                })
            }
            _ => Ok(Reply::status(404)),
        });
        let (result, frames) = collect(&pipeline(reader), "http://example/r.m3u8").await;

        result.unwrap();
        let payloads: Vec<_> = frames.iter().flatten().map(|f| f.payload()[0]).collect();
        assert_eq!(payloads, [1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_segment_fails_playback() {
        let reader = ScriptedReader::new(|req| match req.url.path() {
            "/m.m3u8" => Ok(Reply::ok(
                "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1,\ngone.ts\n#EXT-X-ENDLIST\n",
            )),
            _ => Ok(Reply::status(404)),
        });
        let pipeline = pipeline(reader);
        let (result, frames) = collect(&pipeline, "http://example/m.m3u8").await;

        assert!(matches!(result, Err(HlsError::Net(e)) if e.status() == Some(404)));
        assert!(frames.is_empty());
        assert_eq!(pipeline.position().state(), PlaybackState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_vod_playlist_is_an_error() {
        let reader = ScriptedReader::new(|_| {
            Ok(Reply::ok("#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-ENDLIST\n"))
        });
        let (result, _) = collect(&pipeline(reader), "http://example/e.m3u8").await;
        assert!(matches!(result, Err(HlsError::EmptyPlaylist)));
    }

    /// Body that fails with a reset after `cut` bytes on its first read.
    struct Flaky {
        data: Bytes,
        pos: usize,
        cut: Option<usize>,
    }

    #[async_trait]
    impl ByteStream for Flaky {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
            if let Some(cut) = self.cut
                && self.pos >= cut
            {
                return Err(NetError::UnexpectedEof);
            }
            let end = self
                .cut
                .unwrap_or(self.data.len())
                .min(self.data.len())
                .min(self.pos + buf.len());
            let n = end - self.pos;
            buf[..n].copy_from_slice(&self.data[self.pos..end]);
            self.pos = end;
            Ok(n)
        }
    }

    /// Serves a one-segment playlist whose segment body breaks off midway
    /// on the first `failures` requests.
    struct FlakyReader {
        segment: Bytes,
        failures: u32,
        segment_requests: AtomicU32,
    }

    #[async_trait]
    impl WebReader for FlakyReader {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn send(
            &self,
            request: WebRequest,
            _cancel: &CancellationToken,
        ) -> Result<WebResponse, NetError> {
            if request.url.path().ends_with(".m3u8") {
                return Ok(WebResponse::from_bytes(
                    200,
                    HeaderMap::new(),
                    request.url,
                    "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1,\nseg.aac\n#EXT-X-ENDLIST\n",
                ));
            }
            let n = self.segment_requests.fetch_add(1, Ordering::SeqCst);
            let cut = (n < self.failures).then_some(30);
            Ok(WebResponse::new(
                200,
                HeaderMap::new(),
                request.url,
                Box::new(Flaky {
                    data: self.segment.clone(),
                    pos: 0,
                    cut,
                }),
            ))
        }
    }

    fn flaky_reader(failures: u32) -> Arc<FlakyReader> {
        let segment: Vec<u8> = (1..=3).flat_map(adts_frame).collect();
        Arc::new(FlakyReader {
            segment: Bytes::from(segment),
            failures,
            segment_requests: AtomicU32::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_segment_after_teardown() {
        let reader = flaky_reader(2);
        let (result, frames) = collect(&pipeline(reader.clone()), "http://example/f.m3u8").await;

        result.unwrap();
        let payloads: Vec<_> = frames.iter().flatten().map(|f| f.payload()[0]).collect();
        assert_eq!(payloads, [1, 2, 3]);
        assert_eq!(reader.segment_requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_segment_retries_fail_playback() {
        let reader = flaky_reader(u32::MAX);
        let pipeline = pipeline(reader.clone());
        let (result, _) = collect(&pipeline, "http://example/f.m3u8").await;

        assert!(matches!(
            result,
            Err(HlsError::Net(NetError::RetryExhausted { attempts: 4, .. }))
        ));
        assert_eq!(reader.segment_requests.load(Ordering::SeqCst), 4);
        assert_eq!(pipeline.position().state(), PlaybackState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_segment_is_retried_within_one_budget() {
        let reader = ScriptedReader::new(|req| match req.url.path() {
            "/u.m3u8" => Ok(Reply::ok(
                "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1,\nbusy.ts\n#EXT-X-ENDLIST\n",
            )),
            _ => Ok(Reply::status(503)),
        });
        let pipeline = pipeline(reader.clone());
        let (result, _) = collect(&pipeline, "http://example/u.m3u8").await;

        let segment_requests = reader
            .requests()
            .iter()
            .filter(|r| r.url.path() == "/busy.ts")
            .count();
        assert_eq!(segment_requests, 4);
        match result {
            Err(HlsError::Net(NetError::RetryExhausted { attempts, source })) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, NetError::Status { status: 503, .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(pipeline.position().state(), PlaybackState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn follows_live_playlist_until_it_ends() {
        let refreshes = Arc::new(AtomicU32::new(0));
        let counter = refreshes.clone();
        let reader = ScriptedReader::new(move |req| match req.url.path() {
            "/live.m3u8" => {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let body = match n {
                    0 => "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:10\n\
                          #EXTINF:1,\n10.aac\n#EXTINF:1,\n11.aac\n#EXTINF:1,\n12.aac\n#EXTINF:1,\n13.aac\n",
                    1 => "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:11\n\
                          #EXTINF:1,\n11.aac\n#EXTINF:1,\n12.aac\n#EXTINF:1,\n13.aac\n#EXTINF:1,\n14.aac\n",
                    _ => "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:11\n\
                          #EXTINF:1,\n11.aac\n#EXTINF:1,\n12.aac\n#EXTINF:1,\n13.aac\n#EXTINF:1,\n14.aac\n\
                          #EXTINF:1,\n15.aac\n#EXT-X-ENDLIST\n",
                };
                Ok(Reply::ok(body))
            }
            path => {
                let fill = path
                    .trim_start_matches('/')
                    .trim_end_matches(".aac")
                    .parse::<u8>()
                    .unwrap_or(0);
                Ok(Reply::ok(adts_frame(fill)))
            }
        });
        let pipeline = pipeline(reader);
        let (result, frames) = collect(&pipeline, "http://example/live.m3u8").await;

        result.unwrap();
        let payloads: Vec<_> = frames.iter().flatten().map(|f| f.payload()[0]).collect();
        assert_eq!(payloads, [11, 12, 13, 14, 15]);
        assert_eq!(refreshes.load(Ordering::SeqCst), 3);
        assert!(!pipeline.position().is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_live_playlist_ends_quietly() {
        let reader = ScriptedReader::new(|req| match req.url.path() {
            "/stuck.m3u8" => Ok(Reply::ok(
                "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXTINF:1,\nonly.aac\n",
            )),
            _ => Ok(Reply::ok(adts_frame(4))),
        });
        let pipeline = pipeline(reader.clone());
        let (result, frames) = collect(&pipeline, "http://example/stuck.m3u8").await;

        result.unwrap();
        assert_eq!(frames.iter().flatten().count(), 1);
        let stale = test_config().pipeline.max_stale_refreshes as usize;
        let playlist_reads = reader
            .requests()
            .iter()
            .filter(|r| r.url.path() == "/stuck.m3u8")
            .count();
        // The initial read plus one refresh per unchanged playlist.
        assert_eq!(playlist_reads, stale + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_playback_quietly() {
        let reader = ScriptedReader::new(|_| {
            Ok(Reply::ok("#EXTM3U\n#EXT-X-TARGETDURATION:5\n#EXTINF:5,\nx.aac\n"))
        });
        let pipeline = pipeline(reader);
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(16);

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            stopper.cancel();
        });
        let result = pipeline
            .play(&Url::parse("http://example/c.m3u8").unwrap(), tx, &cancel)
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(pipeline.position().state(), PlaybackState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn plays_a_bare_aac_file() {
        let reader = ScriptedReader::new(|_| Ok(Reply::ok(adts_frame(6))));
        let (result, frames) = collect(&pipeline(reader), "http://example/song.aac").await;

        result.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap().payload()[0], 6);
        assert!(frames[1].is_none());
    }
}
