use tracing::trace;

use super::pool::PooledBuffer;
use crate::common::types::Timestamp;

/// Smallest payload worth forwarding.
pub const MIN_PACKET_LENGTH: usize = 1;

/// One timestamped unit of elementary-stream data.
///
/// The payload is `buffer[index..index + length]`; the buffer goes back to
/// its pool when the packet is dropped.
#[derive(Debug)]
pub struct TsPesPacket {
    buffer: PooledBuffer,
    index: usize,
    length: usize,
    pub pts: Timestamp,
    pub dts: Option<Timestamp>,
    pub duration: Option<Timestamp>,
}

impl TsPesPacket {
    pub fn new(buffer: PooledBuffer, pts: Timestamp) -> Self {
        let length = buffer.len();
        Self {
            buffer,
            index: 0,
            length,
            pts,
            dts: None,
            duration: None,
        }
    }

    /// Restrict the payload to `buffer[index..index + length]`.
    pub fn with_window(mut self, index: usize, length: usize) -> Self {
        let index = index.min(self.buffer.len());
        self.index = index;
        self.length = length.min(self.buffer.len() - index);
        self
    }

    pub fn with_dts(mut self, dts: Option<Timestamp>) -> Self {
        self.dts = dts;
        self
    }

    pub fn with_duration(mut self, duration: Timestamp) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.index..self.index + self.length]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Presentation end, when the duration is known.
    pub fn end(&self) -> Option<Timestamp> {
        self.duration.map(|d| self.pts + d)
    }

    pub fn into_buffer(self) -> PooledBuffer {
        self.buffer
    }
}

/// Downstream consumer of packets; `None` marks end of stream.
pub type PacketSink = Box<dyn FnMut(Option<TsPesPacket>) + Send>;

/// Per-PID stage between the demuxer and the sink.
pub trait PesStreamHandler: Send {
    fn handle(&mut self, packet: Option<TsPesPacket>);
}

/// Forwards packets unchanged, dropping runts.
pub struct PassthroughHandler {
    next: PacketSink,
    min_length: usize,
    dropped: u64,
}

impl PassthroughHandler {
    pub fn new(next: PacketSink) -> Self {
        Self {
            next,
            min_length: MIN_PACKET_LENGTH,
            dropped: 0,
        }
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl PesStreamHandler for PassthroughHandler {
    fn handle(&mut self, packet: Option<TsPesPacket>) {
        match packet {
            Some(p) if p.len() < self.min_length => {
                self.dropped += 1;
                trace!("Dropping {} byte packet at {:?}", p.len(), p.pts);
            }
            other => (self.next)(other),
        }
    }
}
