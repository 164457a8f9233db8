//! Elementary-stream parsing: ADTS, PES and MPEG-TS.

pub mod aac;
pub mod id3;
pub mod pes;
pub mod pool;
pub mod ts;

pub use aac::{AacFrameHeader, AacParser, AacStreamHandler, AudioConfiguration};
pub use pes::{PacketSink, PassthroughHandler, PesStreamHandler, TsPesPacket};
pub use pool::{PacketPool, PooledBuffer};
pub use ts::{ElementaryStream, HandlerFactory, TsDemuxer};

/// Segment payload format, told apart by its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    MpegTs,
    /// Raw ADTS, possibly behind an ID3 tag.
    Adts,
}

impl Container {
    /// Bytes needed to sniff reliably.
    pub const PROBE_LENGTH: usize = 10;

    pub fn sniff(data: &[u8]) -> Option<Self> {
        match data {
            [ts::TS_SYNC_BYTE, ..]
                if data
                    .get(ts::TS_PACKET_SIZE)
                    .is_none_or(|&b| b == ts::TS_SYNC_BYTE) =>
            {
                Some(Self::MpegTs)
            }
            [b0, b1, ..] if aac::header::is_sync(*b0, *b1) => Some(Self::Adts),
            _ if id3::is_id3(data) => Some(Self::Adts),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_containers() {
        let mut ts = vec![0u8; 200];
        ts[0] = 0x47;
        ts[188] = 0x47;
        assert_eq!(Container::sniff(&ts), Some(Container::MpegTs));
        ts[188] = 0x00;
        assert_eq!(Container::sniff(&ts), None);

        assert_eq!(Container::sniff(&[0xFF, 0xF1, 0x50]), Some(Container::Adts));
        assert_eq!(Container::sniff(b"ID3\x04\x00"), Some(Container::Adts));
        assert_eq!(Container::sniff(b"\x00\x00\x00\x18ftypmp42"), None);
    }
}
