use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::pipeline::PlaybackPosition;
use crate::{
    common::{errors::MediaError, types::Timestamp},
    media::{
        AacStreamHandler, Container, ElementaryStream, HandlerFactory, PacketPool, PacketSink,
        PassthroughHandler, PesStreamHandler, TsDemuxer, TsPesPacket, id3,
        aac::ConfigHandler,
        ts::{STREAM_TYPE_AAC, STREAM_TYPE_MPEG1_AUDIO, STREAM_TYPE_MPEG2_AUDIO},
    },
};

type FrameQueue = Arc<Mutex<VecDeque<TsPesPacket>>>;

enum Demux {
    Ts(TsDemuxer),
    Adts(AacStreamHandler),
}

impl Demux {
    fn container(&self) -> Container {
        match self {
            Self::Ts(_) => Container::MpegTs,
            Self::Adts(_) => Container::Adts,
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<(), MediaError> {
        match self {
            Self::Ts(demuxer) => demuxer.push(data),
            Self::Adts(handler) => {
                handler.push_raw(data);
                Ok(())
            }
        }
    }

    fn finish(&mut self) {
        match self {
            Self::Ts(demuxer) => demuxer.finish(),
            Self::Adts(handler) => handler.handle(None),
        }
    }
}

/// Turns segment bytes into frames, picking the demuxer per segment.
///
/// Demuxer state survives segment boundaries so frames split across
/// segments are reassembled; a discontinuity or a container change starts
/// over. Frames collect in a queue the pipeline drains after every push.
pub(crate) struct StreamFeeder {
    pool: PacketPool,
    position: PlaybackPosition,
    frames: FrameQueue,
    demux: Option<Demux>,
    probe: Vec<u8>,
    sniffed: bool,
    anchor: Option<Timestamp>,
}

impl StreamFeeder {
    pub fn new(pool: PacketPool, position: PlaybackPosition) -> Self {
        Self {
            pool,
            position,
            frames: Arc::new(Mutex::new(VecDeque::new())),
            demux: None,
            probe: Vec::with_capacity(Container::PROBE_LENGTH),
            sniffed: false,
            anchor: None,
        }
    }

    pub fn start_segment(&mut self, discontinuity: bool) {
        if discontinuity && self.demux.is_some() {
            debug!("HLS: discontinuity, resetting demuxer");
            self.finish_demux();
        }
        self.probe.clear();
        self.sniffed = false;
        self.anchor = None;
    }

    pub fn push(&mut self, data: &[u8]) -> Result<(), MediaError> {
        if self.sniffed {
            return self.feed(data);
        }
        self.probe.extend_from_slice(data);
        self.sniff(false)
    }

    /// Flush a short segment that never filled the probe.
    pub fn end_segment(&mut self) -> Result<(), MediaError> {
        if self.sniffed {
            return Ok(());
        }
        self.sniff(true)
    }

    pub fn finish(&mut self) -> Result<(), MediaError> {
        self.end_segment()?;
        self.finish_demux();
        Ok(())
    }

    pub fn take_frames(&self) -> Vec<TsPesPacket> {
        self.frames.lock().drain(..).collect()
    }

    fn feed(&mut self, data: &[u8]) -> Result<(), MediaError> {
        match self.demux.as_mut() {
            Some(demux) => demux.push(data),
            None => Err(MediaError::UnknownContainer),
        }
    }

    fn sniff(&mut self, at_end: bool) -> Result<(), MediaError> {
        while id3::is_id3(&self.probe) {
            let Some(length) = id3::tag_length(&self.probe) else {
                return self.wait_or_drop(at_end);
            };
            if self.probe.len() < length {
                return self.wait_or_drop(at_end);
            }
            if let Some(pts) = id3::transport_stream_timestamp(&self.probe[..length]) {
                trace!("HLS: ID3 timestamp {}", pts);
                self.anchor = Some(pts);
            }
            self.probe.drain(..length);
        }

        if self.probe.len() < Container::PROBE_LENGTH && !at_end {
            return Ok(());
        }
        if self.probe.is_empty() {
            return Ok(());
        }

        let container = Container::sniff(&self.probe).ok_or(MediaError::UnknownContainer)?;
        self.sniffed = true;
        self.select_demux(container);

        if let Some(anchor) = self.anchor.take()
            && let Some(Demux::Adts(handler)) = self.demux.as_mut()
        {
            handler.set_timestamp(anchor);
        }

        let probe = std::mem::take(&mut self.probe);
        let result = self.feed(&probe);
        self.probe = probe;
        self.probe.clear();
        result
    }

    fn wait_or_drop(&mut self, at_end: bool) -> Result<(), MediaError> {
        if at_end {
            debug!("HLS: segment ended inside an ID3 tag");
            self.probe.clear();
        }
        Ok(())
    }

    fn select_demux(&mut self, container: Container) {
        if self.demux.as_ref().is_some_and(|d| d.container() == container) {
            return;
        }
        if self.demux.is_some() {
            debug!("HLS: container changed to {:?}", container);
            self.finish_demux();
        }

        self.demux = Some(match container {
            Container::MpegTs => Demux::Ts(TsDemuxer::new(self.pool.clone(), self.handler_factory())),
            Container::Adts => Demux::Adts(
                AacStreamHandler::new(self.pool.clone(), queue_sink(&self.frames))
                    .with_config_handler(config_handler(&self.position)),
            ),
        });
    }

    fn finish_demux(&mut self) {
        if let Some(mut demux) = self.demux.take() {
            demux.finish();
        }
    }

    /// Routes the first supported audio stream; everything else is ignored.
    fn handler_factory(&self) -> HandlerFactory {
        let pool = self.pool.clone();
        let frames = self.frames.clone();
        let position = self.position.clone();
        let mut selected = false;

        Box::new(move |stream: ElementaryStream| {
            if selected || !stream.is_audio() {
                return None;
            }
            let handler: Box<dyn PesStreamHandler> = match stream.stream_type {
                STREAM_TYPE_AAC => Box::new(
                    AacStreamHandler::new(pool.clone(), queue_sink(&frames))
                        .with_config_handler(config_handler(&position)),
                ),
                STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO => {
                    Box::new(PassthroughHandler::new(queue_sink(&frames)))
                }
                _ => return None,
            };
            debug!("HLS: playing audio PID {}", stream.pid);
            selected = true;
            Some(handler)
        })
    }
}

fn queue_sink(frames: &FrameQueue) -> PacketSink {
    let frames = frames.clone();
    Box::new(move |packet| {
        if let Some(packet) = packet {
            frames.lock().push_back(packet);
        }
    })
}

fn config_handler(position: &PlaybackPosition) -> ConfigHandler {
    let position = position.clone();
    Box::new(move |config| {
        debug!(
            "HLS: audio {} {} Hz, {} channels",
            config.codec, config.sample_rate, config.channels
        );
        position.set_audio_configuration(config.clone());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{
        AacFrameHeader,
        id3::tests::timestamp_tag,
        ts::tests::{AUDIO_PID, packetize, pat, pes, pmt},
    };

    fn adts_frame(fill: u8) -> Vec<u8> {
        let header = AacFrameHeader {
            profile: 1,
            frequency_index: 3,
            sample_rate: 48_000,
            channel_config: 2,
            frame_length: 17,
            has_crc: false,
            header_length: 7,
            raw_blocks: 1,
        };
        let mut out = header.encode().to_vec();
        out.extend(std::iter::repeat_n(fill, 10));
        out
    }

    fn ts_segment(pts: u64, first_cc: u8) -> Vec<u8> {
        let mut audio = adts_frame(1);
        audio.extend(adts_frame(2));
        let mut out = pat();
        out.extend(pmt(&[(STREAM_TYPE_AAC, AUDIO_PID)]));
        out.extend(packetize(AUDIO_PID, first_cc, &pes(pts, &audio, true)));
        out
    }

    fn feeder() -> (StreamFeeder, PlaybackPosition) {
        let position = PlaybackPosition::default();
        (
            StreamFeeder::new(PacketPool::new(16, 256), position.clone()),
            position,
        )
    }

    #[test]
    fn demuxes_ts_segments_in_small_chunks() {
        let (mut feeder, position) = feeder();
        feeder.start_segment(false);
        for chunk in ts_segment(90_000, 0).chunks(7) {
            feeder.push(chunk).unwrap();
        }
        feeder.end_segment().unwrap();
        feeder.finish().unwrap();

        let frames = feeder.take_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pts, Timestamp::from_secs_f64(1.0));
        assert_eq!(frames[1].payload(), &[2u8; 10][..]);
        assert_eq!(
            position.audio_configuration().map(|c| c.sample_rate),
            Some(48_000)
        );
    }

    #[test]
    fn id3_timestamp_anchors_packed_audio() {
        let (mut feeder, _) = feeder();
        let mut segment = timestamp_tag(180_000);
        segment.extend(adts_frame(9));
        feeder.start_segment(false);
        feeder.push(&segment[..4]).unwrap();
        feeder.push(&segment[4..]).unwrap();
        feeder.finish().unwrap();

        let frames = feeder.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pts, Timestamp::from_secs_f64(2.0));
    }

    #[test]
    fn short_segment_is_sniffed_at_end() {
        let (mut feeder, _) = feeder();
        feeder.start_segment(false);
        feeder.push(&[0xFF, 0xF1]).unwrap();
        assert!(feeder.take_frames().is_empty());
        feeder.end_segment().unwrap();

        feeder.start_segment(false);
        assert_eq!(
            feeder.push(b"not media at all"),
            Err(MediaError::UnknownContainer)
        );
    }

    #[test]
    fn discontinuity_restarts_the_demuxer() {
        let (mut feeder, _) = feeder();
        feeder.start_segment(false);
        feeder.push(&ts_segment(90_000, 0)).unwrap();
        feeder.end_segment().unwrap();

        // Continuity counters restart at zero after the discontinuity.
        feeder.start_segment(true);
        feeder.push(&ts_segment(9_000, 0)).unwrap();
        feeder.finish().unwrap();

        let pts: Vec<_> = feeder.take_frames().iter().map(|f| f.pts).collect();
        assert_eq!(pts.len(), 4);
        assert_eq!(pts[0], Timestamp::from_secs_f64(1.0));
        assert_eq!(pts[2], Timestamp::from_secs_f64(0.1));
    }
}
