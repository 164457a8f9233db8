//! MPEG-TS demuxer.
//!
//! Transport streams are 188-byte packets, each a 4-byte header followed by
//! an optional adaptation field and payload. PAT → PMT identifies the
//! elementary streams; their PES packets are reassembled from TS payloads and
//! handed to a per-PID [`PesStreamHandler`] created by the handler factory.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

use super::{
    pes::{PesStreamHandler, TsPesPacket},
    pool::{PacketPool, PooledBuffer},
};
use crate::common::{errors::MediaError, types::Timestamp};

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;
const NULL_PID: u16 = 0x1FFF;

/// Garbage tolerated while hunting for the next sync byte.
const MAX_RESYNC_BYTES: usize = 16 * TS_PACKET_SIZE;

const PTS_WRAP: u64 = 1 << 33;

pub const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
pub const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
/// ISO/IEC 13818-7 (ADTS AAC)
pub const STREAM_TYPE_AAC: u8 = 0x0F;
/// ISO/IEC 14496-3 (MPEG-4 AAC LATM)
pub const STREAM_TYPE_AAC_LATM: u8 = 0x11;
pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_H265: u8 = 0x24;

/// An entry of the program map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementaryStream {
    pub pid: u16,
    pub stream_type: u8,
}

impl ElementaryStream {
    pub fn is_audio(&self) -> bool {
        matches!(
            self.stream_type,
            STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO | STREAM_TYPE_AAC | STREAM_TYPE_AAC_LATM
        )
    }
}

/// Creates the handler for a newly announced stream; `None` ignores it.
pub type HandlerFactory =
    Box<dyn FnMut(ElementaryStream) -> Option<Box<dyn PesStreamHandler>> + Send>;

/// Optional header fields of a PES packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    pub header_length: usize,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Payload bytes announced by `PES_packet_length`; `None` when unbounded.
    pub payload_length: Option<usize>,
}

impl PesHeader {
    pub fn parse(data: &[u8]) -> Result<Self, MediaError> {
        if data.len() < 9 {
            return Err(MediaError::InvalidPes("short header"));
        }
        if data[..3] != [0x00, 0x00, 0x01] {
            return Err(MediaError::InvalidPes("missing start code"));
        }

        let stream_id = data[3];
        let packet_length = u16::from_be_bytes([data[4], data[5]]) as usize;
        let pts_dts = data[7] >> 6;
        let header_data_length = data[8] as usize;
        let header_length = 9 + header_data_length;
        if header_length > data.len() {
            return Err(MediaError::InvalidPes("header exceeds packet"));
        }

        let pts = match pts_dts {
            0b10 | 0b11 if header_data_length >= 5 => Some(read_timestamp(&data[9..14])),
            0b10 | 0b11 => return Err(MediaError::InvalidPes("truncated PTS")),
            _ => None,
        };
        let dts = match pts_dts {
            0b11 if header_data_length >= 10 => Some(read_timestamp(&data[14..19])),
            0b11 => return Err(MediaError::InvalidPes("truncated DTS")),
            _ => None,
        };

        // PES_packet_length counts the bytes after the length field.
        let payload_length = match packet_length {
            0 => None,
            n => Some((n + 6).saturating_sub(header_length)),
        };

        Ok(Self {
            stream_id,
            header_length,
            pts,
            dts,
            payload_length,
        })
    }
}

/// 33-bit 90 kHz timestamp from its 5-byte PES encoding.
pub fn read_timestamp(b: &[u8]) -> u64 {
    (((b[0] as u64 >> 1) & 0x07) << 30)
        | ((b[1] as u64) << 22)
        | ((b[2] as u64 >> 1) << 15)
        | ((b[3] as u64) << 7)
        | (b[4] as u64 >> 1)
}

/// Skip the pointer field of a PSI section.
fn section_data(payload: &[u8], payload_start: bool) -> Option<&[u8]> {
    if !payload_start {
        return Some(payload);
    }
    let pointer = *payload.first()? as usize;
    payload.get(1 + pointer..)
}

fn parse_pat(payload: &[u8], payload_start: bool) -> Option<u16> {
    let data = section_data(payload, payload_start)?;
    if data.len() < 8 {
        return None;
    }

    let section_length = ((data[1] as usize & 0x0F) << 8) | data[2] as usize;
    // Program loop runs up to the 4-byte CRC.
    let entries_end = (3 + section_length).saturating_sub(4).min(data.len());

    let mut pos = 8;
    while pos + 4 <= entries_end {
        let program_number = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let pid = ((data[pos + 2] as u16 & 0x1F) << 8) | data[pos + 3] as u16;
        // Program 0 points at the network PID.
        if program_number != 0 {
            return Some(pid);
        }
        pos += 4;
    }
    None
}

fn parse_pmt(payload: &[u8], payload_start: bool) -> Vec<ElementaryStream> {
    let mut streams = Vec::new();
    let Some(data) = section_data(payload, payload_start) else {
        return streams;
    };
    if data.len() < 12 {
        return streams;
    }

    let section_length = ((data[1] as usize & 0x0F) << 8) | data[2] as usize;
    let program_info_length = ((data[10] as usize & 0x0F) << 8) | data[11] as usize;
    let section_end = (3 + section_length).saturating_sub(4).min(data.len());

    let mut pos = 12 + program_info_length;
    while pos + 5 <= section_end {
        let stream_type = data[pos];
        let pid = ((data[pos + 1] as u16 & 0x1F) << 8) | data[pos + 2] as u16;
        let es_info_length = ((data[pos + 3] as usize & 0x0F) << 8) | data[pos + 4] as usize;
        streams.push(ElementaryStream { pid, stream_type });
        pos += 5 + es_info_length;
    }
    streams
}

/// Reassembles one PID's PES packets.
struct PesAssembler {
    stream: ElementaryStream,
    handler: Box<dyn PesStreamHandler>,
    buffer: Option<PooledBuffer>,
    pts: Timestamp,
    dts: Option<Timestamp>,
    expected: Option<usize>,
    continuity: Option<u8>,
    last_raw_pts: Option<u64>,
    wraps: u64,
}

impl PesAssembler {
    fn new(stream: ElementaryStream, handler: Box<dyn PesStreamHandler>) -> Self {
        Self {
            stream,
            handler,
            buffer: None,
            pts: Timestamp::ZERO,
            dts: None,
            expected: None,
            continuity: None,
            last_raw_pts: None,
            wraps: 0,
        }
    }

    fn unwrap_timestamp(&mut self, raw: u64) -> Timestamp {
        if let Some(last) = self.last_raw_pts
            && raw + (PTS_WRAP >> 1) < last
        {
            self.wraps += 1;
        }
        self.last_raw_pts = Some(raw);
        Timestamp::from_90khz(raw + self.wraps * PTS_WRAP)
    }

    fn push(&mut self, pool: &PacketPool, payload: &[u8], payload_start: bool, cc: u8) {
        if let Some(last) = self.continuity {
            if cc == last {
                trace!("PID {}: duplicate packet", self.stream.pid);
                return;
            }
            if cc != (last + 1) & 0x0F {
                warn!(
                    "PID {}: continuity {} -> {}, dropping partial PES",
                    self.stream.pid, last, cc
                );
                self.buffer = None;
            }
        }
        self.continuity = Some(cc);

        if payload_start {
            self.emit();
            match PesHeader::parse(payload) {
                Ok(header) => {
                    if let Some(raw) = header.pts {
                        self.pts = self.unwrap_timestamp(raw);
                    }
                    // DTS shares the PTS wrap epoch.
                    let wraps = self.wraps;
                    self.dts = header
                        .dts
                        .map(|raw| Timestamp::from_90khz(raw + wraps * PTS_WRAP));
                    self.expected = header.payload_length;
                    let body = &payload[header.header_length..];
                    let mut buffer = pool.acquire(header.payload_length.unwrap_or(body.len()));
                    buffer.extend_from_slice(body);
                    self.buffer = Some(buffer);
                }
                Err(e) => {
                    debug!("PID {}: {}", self.stream.pid, e);
                    self.buffer = None;
                    return;
                }
            }
        } else if let Some(buffer) = self.buffer.as_mut() {
            buffer.extend_from_slice(payload);
        }

        if let (Some(expected), Some(buffer)) = (self.expected, self.buffer.as_mut())
            && buffer.len() >= expected
        {
            buffer.truncate(expected);
            self.emit();
        }
    }

    fn emit(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            let packet = TsPesPacket::new(buffer, self.pts).with_dts(self.dts);
            self.handler.handle(Some(packet));
        }
    }

    fn finish(&mut self) {
        self.emit();
        self.handler.handle(None);
    }
}

pub struct TsDemuxer {
    pool: PacketPool,
    factory: HandlerFactory,
    pending: Vec<u8>,
    pmt_pid: Option<u16>,
    streams: HashMap<u16, PesAssembler>,
    ignored: HashSet<u16>,
    skipped: usize,
    packets: u64,
}

impl TsDemuxer {
    pub fn new(pool: PacketPool, factory: HandlerFactory) -> Self {
        Self {
            pool,
            factory,
            pending: Vec::with_capacity(TS_PACKET_SIZE * 2),
            pmt_pid: None,
            streams: HashMap::new(),
            ignored: HashSet::new(),
            skipped: 0,
            packets: 0,
        }
    }

    pub fn streams(&self) -> Vec<ElementaryStream> {
        let mut streams: Vec<_> = self.streams.values().map(|a| a.stream).collect();
        streams.sort_by_key(|s| s.pid);
        streams
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Consume transport stream bytes in any chunking.
    pub fn push(&mut self, data: &[u8]) -> Result<(), MediaError> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(data);

        let mut pos = 0;
        let mut result = Ok(());
        while buf.len() - pos >= TS_PACKET_SIZE {
            if buf[pos] != TS_SYNC_BYTE {
                let skip = find_sync(&buf[pos..]).unwrap_or(buf.len() - pos);
                self.skipped += skip;
                pos += skip;
                if self.skipped > MAX_RESYNC_BYTES {
                    result = Err(MediaError::TsSyncLost(self.skipped));
                    self.skipped = 0;
                    break;
                }
                continue;
            }
            if self.skipped > 0 {
                debug!("TS: resynchronized after {} bytes", self.skipped);
                self.skipped = 0;
            }

            self.handle_packet(&buf[pos..pos + TS_PACKET_SIZE]);
            pos += TS_PACKET_SIZE;
        }

        buf.drain(..pos);
        self.pending = buf;
        result
    }

    /// Emit pending PES data and signal end of stream to every handler.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            debug!("TS: discarding {} trailing bytes", self.pending.len());
            self.pending.clear();
        }
        let mut pids: Vec<_> = self.streams.keys().copied().collect();
        pids.sort_unstable();
        for pid in pids {
            if let Some(assembler) = self.streams.get_mut(&pid) {
                assembler.finish();
            }
        }
        self.streams.clear();
        self.ignored.clear();
        self.pmt_pid = None;
        self.skipped = 0;
    }

    fn handle_packet(&mut self, packet: &[u8]) {
        self.packets += 1;

        if packet[1] & 0x80 != 0 {
            trace!("TS: transport error indicator set");
            return;
        }
        let payload_start = packet[1] & 0x40 != 0;
        let pid = ((packet[1] as u16 & 0x1F) << 8) | packet[2] as u16;
        let adaptation_field_control = (packet[3] >> 4) & 0x03;
        let cc = packet[3] & 0x0F;

        if pid == NULL_PID || adaptation_field_control & 0x01 == 0 {
            return;
        }

        let mut offset = 4;
        if adaptation_field_control & 0x02 != 0 {
            offset += 1 + packet[4] as usize;
        }
        if offset >= TS_PACKET_SIZE {
            return;
        }
        let payload = &packet[offset..];

        if pid == PAT_PID {
            if let Some(pmt) = parse_pat(payload, payload_start)
                && self.pmt_pid != Some(pmt)
            {
                debug!("TS: PMT on PID {}", pmt);
                self.pmt_pid = Some(pmt);
            }
            return;
        }

        if Some(pid) == self.pmt_pid {
            for stream in parse_pmt(payload, payload_start) {
                self.register(stream);
            }
            return;
        }

        if let Some(assembler) = self.streams.get_mut(&pid) {
            assembler.push(&self.pool, payload, payload_start, cc);
        }
    }

    fn register(&mut self, stream: ElementaryStream) {
        if self.streams.contains_key(&stream.pid) || self.ignored.contains(&stream.pid) {
            return;
        }
        match (self.factory)(stream) {
            Some(handler) => {
                debug!(
                    "TS: stream type 0x{:02X} on PID {}",
                    stream.stream_type, stream.pid
                );
                self.streams
                    .insert(stream.pid, PesAssembler::new(stream, handler));
            }
            None => {
                trace!(
                    "TS: ignoring stream type 0x{:02X} on PID {}",
                    stream.stream_type, stream.pid
                );
                self.ignored.insert(stream.pid);
            }
        }
    }
}

/// Offset of the next plausible packet start: a sync byte followed by
/// another one a packet later, when enough bytes are buffered to tell.
fn find_sync(data: &[u8]) -> Option<usize> {
    (0..data.len()).find(|&i| {
        data[i] == TS_SYNC_BYTE
            && data
                .get(i + TS_PACKET_SIZE)
                .is_none_or(|&b| b == TS_SYNC_BYTE)
    })
}
