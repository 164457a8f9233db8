//! AAC in ADTS framing.

pub mod header;
pub mod parser;

pub use header::{AacFrameHeader, AudioConfiguration, SAMPLE_RATES};
pub use parser::{AacParser, ConfigHandler};

use tracing::trace;

use super::{
    pes::{MIN_PACKET_LENGTH, PacketSink, PesStreamHandler, TsPesPacket},
    pool::PacketPool,
};
use crate::common::types::Timestamp;

/// Splits PES payloads (or raw ADTS bytes) into AAC frames.
pub struct AacStreamHandler {
    parser: AacParser,
    next: PacketSink,
}

impl AacStreamHandler {
    pub fn new(pool: PacketPool, next: PacketSink) -> Self {
        Self {
            parser: AacParser::new(pool),
            next,
        }
    }

    pub fn with_config_handler(mut self, handler: ConfigHandler) -> Self {
        self.parser = self.parser.with_config_handler(handler);
        self
    }

    pub fn parser(&self) -> &AacParser {
        &self.parser
    }

    /// Feed bytes that carry no PES timestamp.
    pub fn push_raw(&mut self, data: &[u8]) {
        let next = &mut self.next;
        self.parser.push(data, &mut |frame| next(Some(frame)));
    }

    pub fn set_timestamp(&mut self, pts: Timestamp) {
        self.parser.set_timestamp(pts);
    }
}

impl PesStreamHandler for AacStreamHandler {
    fn handle(&mut self, packet: Option<TsPesPacket>) {
        match packet {
            Some(packet) if packet.len() < MIN_PACKET_LENGTH => {
                trace!("Dropping empty AAC PES packet");
            }
            Some(packet) => {
                self.parser.set_timestamp(packet.pts);
                self.push_raw(packet.payload());
            }
            None => {
                self.parser.flush();
                (self.next)(None);
            }
        }
    }
}
