use tracing::{debug, warn};

use super::header::{AacFrameHeader, AudioConfiguration, is_sync};
use crate::{
    common::types::Timestamp,
    media::{
        pes::TsPesPacket,
        pool::{PacketPool, PooledBuffer},
    },
};

/// Fired once, on the first valid header of a stream.
pub type ConfigHandler = Box<dyn FnMut(&AudioConfiguration) + Send>;

/// Hunting bytes before giving up on a resync run and logging it.
const RESYNC_WARN_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingSync,
    Header,
    Body,
}

/// Incremental ADTS frame splitter.
///
/// Bytes may arrive in arbitrary pieces. Complete frames come out as pooled
/// packets whose window covers the raw AAC payload (header excluded).
pub struct AacParser {
    pool: PacketPool,
    on_config: Option<ConfigHandler>,
    state: State,
    header: [u8; 9],
    header_filled: usize,
    header_needed: usize,
    current: Option<AacFrameHeader>,
    frame: Option<PooledBuffer>,
    base: Timestamp,
    pending_base: Option<Timestamp>,
    sample_rate: u32,
    samples: u64,
    frames: u64,
    skipped: usize,
    resyncs: u64,
}

impl AacParser {
    pub fn new(pool: PacketPool) -> Self {
        Self {
            pool,
            on_config: None,
            state: State::SeekingSync,
            header: [0; 9],
            header_filled: 0,
            header_needed: 0,
            current: None,
            frame: None,
            base: Timestamp::ZERO,
            pending_base: None,
            sample_rate: 0,
            samples: 0,
            frames: 0,
            skipped: 0,
            resyncs: 0,
        }
    }

    pub fn with_config_handler(mut self, handler: ConfigHandler) -> Self {
        self.on_config = Some(handler);
        self
    }

    /// Anchor the next frame that starts at `pts` (from a PES header).
    pub fn set_timestamp(&mut self, pts: Timestamp) {
        self.pending_base = Some(pts);
    }

    /// Timestamp the next frame will get.
    pub fn position(&self) -> Timestamp {
        self.base + Timestamp::from_samples(self.samples, self.sample_rate)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn is_configured(&self) -> bool {
        self.sample_rate != 0
    }

    /// Consume `data`, passing every completed frame to `emit`.
    pub fn push<F>(&mut self, mut data: &[u8], emit: &mut F)
    where
        F: FnMut(TsPesPacket),
    {
        while !data.is_empty() {
            match self.state {
                State::SeekingSync => match data.iter().position(|&b| b == 0xFF) {
                    Some(pos) => {
                        self.note_skipped(pos);
                        self.header[0] = 0xFF;
                        self.header_filled = 1;
                        self.header_needed = 2;
                        self.state = State::Header;
                        data = &data[pos + 1..];
                    }
                    None => {
                        self.note_skipped(data.len());
                        return;
                    }
                },
                State::Header => {
                    let take = (self.header_needed - self.header_filled).min(data.len());
                    self.header[self.header_filled..self.header_filled + take]
                        .copy_from_slice(&data[..take]);
                    self.header_filled += take;
                    data = &data[take..];
                    if self.header_filled < self.header_needed {
                        continue;
                    }

                    if self.header_needed == 2 {
                        if !is_sync(self.header[0], self.header[1]) {
                            self.resync(emit);
                            continue;
                        }
                        self.header_needed = AacFrameHeader::header_length_for(self.header[1]);
                        continue;
                    }

                    match AacFrameHeader::parse(&self.header[..self.header_filled]) {
                        Ok(header) => self.begin_frame(header),
                        Err(e) => {
                            debug!("ADTS resync: {}", e);
                            self.resync(emit);
                        }
                    }
                }
                State::Body => {
                    let (Some(header), Some(frame)) = (self.current, self.frame.as_mut()) else {
                        self.state = State::SeekingSync;
                        continue;
                    };
                    let take = (header.frame_length - frame.len()).min(data.len());
                    frame.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if frame.len() == header.frame_length {
                        self.finish_frame(header, emit);
                    }
                }
            }
        }
    }

    /// Drop any partial frame; the next byte starts a fresh sync hunt.
    pub fn flush(&mut self) {
        if let Some(frame) = self.frame.take() {
            debug!("Discarding partial ADTS frame of {} bytes", frame.len());
        }
        self.current = None;
        self.header_filled = 0;
        self.state = State::SeekingSync;
    }

    fn note_skipped(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let before = self.skipped;
        self.skipped += n;
        if before < RESYNC_WARN_BYTES && self.skipped >= RESYNC_WARN_BYTES {
            warn!("ADTS: no sync word in {} bytes", self.skipped);
        }
    }

    /// Rescan the header bytes after the rejected sync for another candidate.
    fn resync<F>(&mut self, emit: &mut F)
    where
        F: FnMut(TsPesPacket),
    {
        self.resyncs += 1;
        let buffered = self.header;
        let filled = self.header_filled;
        self.header_filled = 0;
        self.state = State::SeekingSync;
        self.note_skipped(1);
        self.push(&buffered[1..filled], emit);
    }

    fn begin_frame(&mut self, header: AacFrameHeader) {
        if self.skipped > 0 {
            debug!("ADTS: resynchronized after {} bytes", self.skipped);
            self.skipped = 0;
        }

        if let Some(pts) = self.pending_base.take() {
            self.base = pts;
            self.samples = 0;
        }
        if header.sample_rate != self.sample_rate {
            if self.sample_rate != 0 {
                debug!("ADTS: sample rate {} -> {}", self.sample_rate, header.sample_rate);
                self.base = self.position();
                self.samples = 0;
            } else if let Some(handler) = self.on_config.as_mut() {
                handler(&AudioConfiguration::from(&header));
            }
            self.sample_rate = header.sample_rate;
        }

        let mut frame = self.pool.acquire(header.frame_length);
        frame.extend_from_slice(&self.header[..self.header_filled]);
        self.header_filled = 0;
        self.current = Some(header);
        self.frame = Some(frame);
        self.state = State::Body;
    }

    fn finish_frame<F>(&mut self, header: AacFrameHeader, emit: &mut F)
    where
        F: FnMut(TsPesPacket),
    {
        self.state = State::SeekingSync;
        self.current = None;
        let Some(frame) = self.frame.take() else {
            return;
        };

        let start = Timestamp::from_samples(self.samples, self.sample_rate);
        self.samples += header.samples();
        let end = Timestamp::from_samples(self.samples, self.sample_rate);
        self.frames += 1;

        let packet = TsPesPacket::new(frame, self.base + start)
            .with_window(header.header_length, header.payload_length())
            .with_duration(Timestamp::from_ticks(end.ticks() - start.ticks()));
        emit(packet);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::media::aac::header::ADTS_HEADER_LENGTH;

    fn header(frame_length: usize) -> AacFrameHeader {
        AacFrameHeader {
            profile: 1,
            frequency_index: 3,
            sample_rate: 48_000,
            channel_config: 2,
            frame_length,
            has_crc: false,
            header_length: ADTS_HEADER_LENGTH,
            raw_blocks: 1,
        }
    }

    /// ADTS frames whose payload bytes are `fill` and never contain 0xFF.
    fn stream(lengths: &[usize]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, len) in lengths.iter().enumerate() {
            out.extend_from_slice(&header(*len).encode());
            out.extend(std::iter::repeat_n(i as u8 + 1, len - ADTS_HEADER_LENGTH));
        }
        out
    }

    fn run(parser: &mut AacParser, data: &[u8], step: usize) -> Vec<TsPesPacket> {
        let mut out = Vec::new();
        for chunk in data.chunks(step) {
            parser.push(chunk, &mut |p| out.push(p));
        }
        out
    }

    #[test]
    fn splits_frames_across_arbitrary_chunks() {
        let data = stream(&[100, 37, 250, 8]);
        for step in [1, 3, 7, 64, 4096] {
            let mut parser = AacParser::new(PacketPool::new(8, 64));
            let frames = run(&mut parser, &data, step);
            let lengths: Vec<_> = frames.iter().map(TsPesPacket::len).collect();
            assert_eq!(lengths, [93, 30, 243, 1], "step {}", step);
            assert!(frames[1].payload().iter().all(|&b| b == 2));
        }
    }

    #[test]
    fn timestamps_do_not_drift() {
        let data = stream(&vec![20; 1000]);
        let mut parser = AacParser::new(PacketPool::new(8, 64));
        let frames = run(&mut parser, &data, 500);
        assert_eq!(frames.len(), 1000);

        let mut total = 0i64;
        for f in &frames {
            assert_eq!(f.pts.ticks(), total);
            total += f.duration.unwrap().ticks();
        }
        // 1000 * 1024 samples at 48 kHz is exactly 21.333... s
        assert_eq!(total, Timestamp::from_samples(1_024_000, 48_000).ticks());
        assert_eq!(parser.position().ticks(), total);
    }

    #[test]
    fn pes_timestamp_anchors_next_frame() {
        let data = stream(&[20, 20]);
        let mut parser = AacParser::new(PacketPool::new(8, 64));
        parser.set_timestamp(Timestamp::from_ticks(90_000_000));
        let frames = run(&mut parser, &data, 4096);
        assert_eq!(frames[0].pts.ticks(), 90_000_000);
        assert_eq!(frames[1].pts, frames[0].end().unwrap());
    }

    #[test]
    fn corrupted_sync_resynchronizes() {
        let mut data = stream(&[40, 40, 40]);
        // Break the first frame's sync; a fake 0xFF inside the header region
        // must not swallow the following real frame.
        data[0] = 0x00;
        data[2] = 0xFF;
        let mut parser = AacParser::new(PacketPool::new(8, 64));
        let frames = run(&mut parser, &data, 5);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].payload().iter().all(|&b| b == 2));
        assert!(parser.resyncs() >= 1);
    }

    #[test]
    fn invalid_frame_length_triggers_hunt_in_buffered_bytes() {
        let good = stream(&[30]);
        let mut data = vec![0xFF, 0xF1, 0x4C, 0x80, 0x00, 0x1F, 0xFC];
        data.extend_from_slice(&good);
        let mut parser = AacParser::new(PacketPool::new(8, 64));
        let frames = run(&mut parser, &data, 3);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 23);
    }

    #[test]
    fn config_fires_once_and_flush_discards_partial() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let mut parser = AacParser::new(PacketPool::new(8, 64))
            .with_config_handler(Box::new(move |c| log.lock().push(c.clone())));

        let mut data = stream(&[20, 20, 50]);
        data.truncate(data.len() - 10);
        let frames = run(&mut parser, &data, 9);
        assert_eq!(frames.len(), 2);
        parser.flush();
        let after = run(&mut parser, &stream(&[20]), 64);
        assert_eq!(after.len(), 1);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sample_rate, 48_000);
        assert_eq!(seen[0].channels, 2);
        assert_eq!(seen[0].codec, "mp4a.40.2");
    }

    #[test]
    fn frames_return_buffers_to_pool() {
        let pool = PacketPool::new(8, 64);
        let mut parser = AacParser::new(pool.clone());
        let frames = run(&mut parser, &stream(&[20, 20, 20]), 64);
        assert_eq!(pool.available(), 0);
        drop(frames);
        assert_eq!(pool.available(), 3);
    }
}
