//! ID3v2 tags prefixed to packed-audio HLS segments.

use crate::common::types::Timestamp;

const HEADER_LENGTH: usize = 10;
const TRANSPORT_STREAM_TIMESTAMP: &[u8] = b"com.apple.streaming.transportStreamTimestamp\0";

fn syncsafe(b: &[u8]) -> usize {
    b.iter().fold(0, |acc, &x| (acc << 7) | (x & 0x7F) as usize)
}

fn plain(b: &[u8]) -> usize {
    b.iter().fold(0, |acc, &x| (acc << 8) | x as usize)
}

pub fn is_id3(data: &[u8]) -> bool {
    data.starts_with(b"ID3")
}

/// Full tag length (header, body and footer), from the first 10 bytes.
pub fn tag_length(data: &[u8]) -> Option<usize> {
    if data.len() < HEADER_LENGTH || !is_id3(data) {
        return None;
    }
    let footer = if data[5] & 0x10 != 0 { HEADER_LENGTH } else { 0 };
    Some(HEADER_LENGTH + syncsafe(&data[6..10]) + footer)
}

/// The MPEG-TS timestamp Apple packagers put in a `PRIV` frame.
pub fn transport_stream_timestamp(tag: &[u8]) -> Option<Timestamp> {
    let total = tag_length(tag)?.min(tag.len());
    let version = tag[3];
    let mut pos = HEADER_LENGTH;
    if tag[5] & 0x40 != 0 {
        let ext = tag.get(pos..pos + 4)?;
        pos += if version >= 4 { syncsafe(ext) } else { plain(ext) + 4 };
    }

    while pos + HEADER_LENGTH <= total {
        let id = &tag[pos..pos + 4];
        if id[0] == 0 {
            break;
        }
        let size_bytes = &tag[pos + 4..pos + 8];
        let size = if version >= 4 {
            syncsafe(size_bytes)
        } else {
            plain(size_bytes)
        };
        let body = tag.get(pos + HEADER_LENGTH..pos + HEADER_LENGTH + size)?;

        if id == b"PRIV"
            && let Some(value) = body.strip_prefix(TRANSPORT_STREAM_TIMESTAMP)
            && value.len() >= 8
        {
            let raw = u64::from_be_bytes(value[..8].try_into().ok()?) & ((1 << 33) - 1);
            return Some(Timestamp::from_90khz(raw));
        }
        pos += HEADER_LENGTH + size;
    }
    None
}
