use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use super::m3u8::{
    M3u8Parser, M3u8Playlist, M3u8Segment,
    attributes::{AttributeValue, ByteRange, Resolution},
    tags::{TagInstance, TagValue},
};
use crate::{
    common::{errors::HlsError, types::Timestamp},
    crypto::sequence_iv,
    net::http::RangeSpec,
};

const AUDIO_CODECS: &[&str] = &["mp4a", "opus", "aac", "ac-3", "ec-3", "mp3"];
const VIDEO_CODECS: &[&str] = &[
    "avc1", "avc3", "hvc1", "hev1", "dvh1", "vp09", "av01", "vp9", "av1", "vp8", "h264", "h265",
    "mp4v",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    None,
    Aes128,
    SampleAes,
}

impl EncryptionMethod {
    pub fn parse(raw: &str) -> Result<Self, HlsError> {
        match raw {
            "NONE" => Ok(Self::None),
            "AES-128" => Ok(Self::Aes128),
            "SAMPLE-AES" => Ok(Self::SampleAes),
            other => Err(HlsError::UnsupportedEncryption(other.to_string())),
        }
    }
}

/// Key material reference from `EXT-X-KEY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentKey {
    pub method: EncryptionMethod,
    pub uri: Option<Url>,
    pub iv: Option<[u8; 16]>,
    pub key_format: Option<String>,
}

impl SegmentKey {
    /// `None` when the tag switches encryption off.
    pub fn from_tag(tag: &TagInstance, base: &Url) -> Result<Option<Self>, HlsError> {
        let method = EncryptionMethod::parse(tag.attr_str("METHOD").unwrap_or("NONE"))?;
        if method == EncryptionMethod::None {
            return Ok(None);
        }

        let uri = match tag.attr_str("URI") {
            Some(raw) => Some(base.join(raw).map_err(|_| HlsError::InvalidAttribute {
                name: "URI".into(),
                value: raw.to_string(),
            })?),
            None => None,
        };

        let iv = match tag.attribute("IV").and_then(AttributeValue::as_bytes) {
            Some(bytes) => Some(right_align_iv(bytes)?),
            None => None,
        };

        Ok(Some(Self {
            method,
            uri,
            iv,
            key_format: tag.attr_str("KEYFORMAT").map(str::to_string),
        }))
    }

    /// Explicit IV, else the big-endian media sequence number.
    pub fn iv_for(&self, sequence: u64) -> [u8; 16] {
        self.iv.unwrap_or_else(|| sequence_iv(sequence))
    }
}

fn right_align_iv(bytes: &[u8]) -> Result<[u8; 16], HlsError> {
    if bytes.len() > 16 {
        return Err(HlsError::InvalidAttribute {
            name: "IV".into(),
            value: hex::encode_upper(bytes),
        });
    }
    let mut iv = [0u8; 16];
    iv[16 - bytes.len()..].copy_from_slice(bytes);
    Ok(iv)
}

/// Absolute byte window inside a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    pub offset: u64,
    pub length: u64,
}

impl SegmentRange {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    pub fn to_range_spec(self) -> RangeSpec {
        RangeSpec::from_offset(self.offset, self.length)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitMap {
    pub uri: Url,
    pub range: Option<SegmentRange>,
}

impl InitMap {
    fn from_tag(tag: &TagInstance, base: &Url) -> Result<Self, HlsError> {
        let raw = tag.attr_str("URI").ok_or_else(|| HlsError::MissingAttribute {
            tag: tag.name.clone(),
            attribute: "URI".into(),
        })?;
        let uri = base.join(raw).map_err(|_| HlsError::InvalidAttribute {
            name: "URI".into(),
            value: raw.to_string(),
        })?;
        let range = tag
            .attribute("BYTERANGE")
            .and_then(AttributeValue::as_byte_range)
            .map(|r| SegmentRange {
                offset: r.offset.unwrap_or(0),
                length: r.length,
            });
        Ok(Self { uri, range })
    }
}

/// One playable media segment with everything resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentReference {
    pub uri: Url,
    /// Seconds, from `EXTINF`.
    pub duration: f64,
    pub title: Option<String>,
    pub byte_range: Option<SegmentRange>,
    pub discontinuity: bool,
    pub key: Option<SegmentKey>,
    pub program_date_time: Option<String>,
    pub map: Option<InitMap>,
    pub sequence: u64,
    pub discontinuity_sequence: u64,
    pub gap: bool,
    pub bitrate: Option<u64>,
    /// Offset of this segment from the start of the playlist.
    pub start: Timestamp,
    pub tags: Vec<TagInstance>,
}

impl SegmentReference {
    /// A whole resource played as a single unencrypted segment.
    pub fn from_uri(uri: Url) -> Self {
        Self {
            uri,
            duration: 0.0,
            title: None,
            byte_range: None,
            discontinuity: false,
            key: None,
            program_date_time: None,
            map: None,
            sequence: 0,
            discontinuity_sequence: 0,
            gap: false,
            bitrate: None,
            start: Timestamp::ZERO,
            tags: Vec::new(),
        }
    }

    pub fn duration_ticks(&self) -> Timestamp {
        Timestamp::from_secs_f64(self.duration)
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub url: Url,
    pub version: Option<u64>,
    pub target_duration: Option<u64>,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub playlist_type: Option<PlaylistType>,
    pub end_list: bool,
    pub i_frames_only: bool,
    pub independent_segments: bool,
    pub start_offset: Option<f64>,
    pub segments: Vec<SegmentReference>,
}

impl MediaPlaylist {
    pub fn from_m3u8(playlist: &M3u8Playlist) -> Result<Self, HlsError> {
        let integer = |name: &str| playlist.tag(name).and_then(TagInstance::integer);
        let media_sequence = integer("EXT-X-MEDIA-SEQUENCE").unwrap_or(0);
        let discontinuity_sequence = integer("EXT-X-DISCONTINUITY-SEQUENCE").unwrap_or(0);

        let playlist_type = playlist
            .tag("EXT-X-PLAYLIST-TYPE")
            .and_then(TagInstance::text)
            .and_then(|t| match t {
                "VOD" => Some(PlaylistType::Vod),
                "EVENT" => Some(PlaylistType::Event),
                _ => None,
            });

        let mut segments = Vec::with_capacity(playlist.segments.len());
        let mut start = Timestamp::ZERO;
        let mut disc_seq = discontinuity_sequence;
        let mut last_range: Option<(Url, u64)> = None;

        for (i, segment) in playlist.segments.iter().enumerate() {
            let sequence = media_sequence + i as u64;
            let reference =
                build_segment(segment, &playlist.base_url, sequence, &mut disc_seq, &mut last_range, start)?;
            start += reference.duration_ticks();
            segments.push(reference);
        }

        Ok(Self {
            url: playlist.base_url.clone(),
            version: integer("EXT-X-VERSION"),
            target_duration: integer("EXT-X-TARGETDURATION"),
            media_sequence,
            discontinuity_sequence,
            playlist_type,
            end_list: playlist.has_tag("EXT-X-ENDLIST"),
            i_frames_only: playlist.has_tag("EXT-X-I-FRAMES-ONLY"),
            independent_segments: playlist.has_tag("EXT-X-INDEPENDENT-SEGMENTS"),
            start_offset: playlist
                .tag("EXT-X-START")
                .and_then(|t| t.attribute("TIME-OFFSET"))
                .and_then(AttributeValue::as_f64),
            segments,
        })
    }

    /// Live playlists grow until `EXT-X-ENDLIST` appears.
    pub fn is_live(&self) -> bool {
        !self.end_list && self.playlist_type != Some(PlaylistType::Vod)
    }

    pub fn total_duration(&self) -> Timestamp {
        self.segments
            .iter()
            .fold(Timestamp::ZERO, |acc, s| acc + s.duration_ticks())
    }

    /// Target duration, never below `min`.
    pub fn refresh_interval(&self, min: Duration) -> Duration {
        self.target_duration
            .map(Duration::from_secs)
            .unwrap_or(min)
            .max(min)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }

    pub fn segments_after(&self, sequence: Option<u64>) -> impl Iterator<Item = &SegmentReference> {
        self.segments
            .iter()
            .filter(move |s| sequence.is_none_or(|last| s.sequence > last))
    }
}

fn build_segment(
    segment: &M3u8Segment,
    base: &Url,
    sequence: u64,
    disc_seq: &mut u64,
    last_range: &mut Option<(Url, u64)>,
    start: Timestamp,
) -> Result<SegmentReference, HlsError> {
    let mut reference = SegmentReference {
        uri: segment.uri.clone(),
        duration: 0.0,
        title: None,
        byte_range: None,
        discontinuity: false,
        key: None,
        program_date_time: None,
        map: None,
        sequence,
        discontinuity_sequence: *disc_seq,
        gap: false,
        bitrate: None,
        start,
        tags: segment.tags.clone(),
    };

    for tag in &segment.tags {
        match (tag.name.as_str(), &tag.value) {
            ("EXTINF", TagValue::ExtInf { duration, title }) => {
                reference.duration = *duration;
                reference.title = title.clone();
            }
            ("EXT-X-BYTERANGE", TagValue::ByteRange(range)) => {
                reference.byte_range = Some(resolve_range(*range, &segment.uri, last_range));
            }
            ("EXT-X-DISCONTINUITY", _) => {
                *disc_seq += 1;
                reference.discontinuity = true;
                reference.discontinuity_sequence = *disc_seq;
            }
            ("EXT-X-KEY", _) => reference.key = SegmentKey::from_tag(tag, base)?,
            ("EXT-X-MAP", _) => reference.map = Some(InitMap::from_tag(tag, base)?),
            ("EXT-X-PROGRAM-DATE-TIME", TagValue::Text(t)) => {
                reference.program_date_time = Some(t.clone())
            }
            ("EXT-X-GAP", _) => reference.gap = true,
            ("EXT-X-BITRATE", TagValue::Integer(kbps)) => reference.bitrate = Some(*kbps),
            _ => {}
        }
    }

    if reference.byte_range.is_none() {
        *last_range = None;
    }
    Ok(reference)
}

/// A range without `@offset` continues where the previous sub-range of the
/// same resource ended.
fn resolve_range(range: ByteRange, uri: &Url, last: &mut Option<(Url, u64)>) -> SegmentRange {
    let offset = range.offset.unwrap_or_else(|| match last {
        Some((prev, end)) if prev == uri => *end,
        _ => 0,
    });
    let resolved = SegmentRange {
        offset,
        length: range.length,
    };
    *last = Some((uri.clone(), resolved.end()));
    resolved
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantStream {
    pub uri: Url,
    pub bandwidth: u64,
    pub average_bandwidth: Option<u64>,
    pub codecs: Vec<String>,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<f64>,
    pub audio_group: Option<String>,
    pub is_audio_only: bool,
}

impl VariantStream {
    fn from_segment(segment: &M3u8Segment) -> Option<Self> {
        let inf = segment.tag("EXT-X-STREAM-INF")?;
        let codecs: Vec<String> = inf
            .attribute("CODECS")
            .and_then(AttributeValue::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default();

        let has = |set: &[&str]| {
            codecs
                .iter()
                .any(|c| set.iter().any(|p| c.to_ascii_lowercase().starts_with(p)))
        };
        let is_audio_only = has(AUDIO_CODECS) && !has(VIDEO_CODECS);

        Some(Self {
            uri: segment.uri.clone(),
            bandwidth: inf.attr_u64("BANDWIDTH").unwrap_or(0),
            average_bandwidth: inf.attr_u64("AVERAGE-BANDWIDTH"),
            resolution: inf
                .attribute("RESOLUTION")
                .and_then(AttributeValue::as_resolution),
            frame_rate: inf.attribute("FRAME-RATE").and_then(AttributeValue::as_f64),
            audio_group: inf.attr_str("AUDIO").map(str::to_string),
            codecs,
            is_audio_only,
        })
    }
}

/// `EXT-X-MEDIA` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub media_type: String,
    pub group_id: String,
    pub name: String,
    pub uri: Option<Url>,
    pub language: Option<String>,
    pub is_default: bool,
    pub autoselect: bool,
}

impl Rendition {
    fn from_tag(tag: &TagInstance, base: &Url) -> Option<Self> {
        let yes = |name: &str| tag.attr_str(name) == Some("YES");
        Some(Self {
            media_type: tag.attr_str("TYPE")?.to_string(),
            group_id: tag.attr_str("GROUP-ID")?.to_string(),
            name: tag.attr_str("NAME")?.to_string(),
            uri: tag.attr_str("URI").and_then(|u| base.join(u).ok()),
            language: tag.attr_str("LANGUAGE").map(str::to_string),
            is_default: yes("DEFAULT"),
            autoselect: yes("AUTOSELECT"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MasterPlaylist {
    pub url: Url,
    pub variants: Vec<VariantStream>,
    pub renditions: Vec<Rendition>,
    pub independent_segments: bool,
}

impl MasterPlaylist {
    pub fn from_m3u8(playlist: &M3u8Playlist) -> Result<Self, HlsError> {
        let variants: Vec<_> = playlist
            .segments
            .iter()
            .filter_map(VariantStream::from_segment)
            .collect();
        if variants.is_empty() {
            return Err(HlsError::NoVariants);
        }

        let renditions = playlist
            .tags
            .iter()
            .filter(|t| t.name == "EXT-X-MEDIA")
            .filter_map(|t| Rendition::from_tag(t, &playlist.base_url))
            .collect();

        Ok(Self {
            url: playlist.base_url.clone(),
            variants,
            renditions,
            independent_segments: playlist.has_tag("EXT-X-INDEPENDENT-SEGMENTS"),
        })
    }

    pub fn audio_group<'a>(&'a self, group_id: &'a str) -> impl Iterator<Item = &'a Rendition> {
        self.renditions
            .iter()
            .filter(move |r| r.media_type == "AUDIO" && r.group_id == group_id)
    }

    /// Audio-only variants first, then variants with an audio group, then
    /// the highest bandwidth. Variants above `max_bandwidth` are skipped
    /// unless every variant is above it, in which case the lightest wins.
    pub fn select_variant(&self, max_bandwidth: Option<u64>) -> Option<&VariantStream> {
        let allowed: Vec<&VariantStream> = match max_bandwidth {
            Some(cap) => {
                let under: Vec<_> = self.variants.iter().filter(|v| v.bandwidth <= cap).collect();
                if under.is_empty() {
                    return self.variants.iter().min_by_key(|v| v.bandwidth);
                }
                under
            }
            None => self.variants.iter().collect(),
        };

        let best = |audio_only: bool, grouped: bool| {
            allowed
                .iter()
                .copied()
                .filter(|v| !audio_only || v.is_audio_only)
                .filter(|v| !grouped || v.audio_group.is_some())
                .max_by_key(|v| v.bandwidth)
        };

        best(true, false)
            .or_else(|| best(false, true))
            .or_else(|| best(false, false))
    }

    /// Media playlist to play: the variant's default audio rendition when it
    /// has one with a URI, else the variant itself.
    pub fn select(&self, max_bandwidth: Option<u64>) -> Option<Url> {
        let variant = self.select_variant(max_bandwidth)?;

        if let Some(group_id) = &variant.audio_group {
            let group: Vec<_> = self.audio_group(group_id).collect();
            let rendition = group
                .iter()
                .find(|r| r.is_default && r.uri.is_some())
                .or_else(|| group.iter().find(|r| r.uri.is_some()))
                .and_then(|r| r.uri.clone());

            if let Some(uri) = rendition {
                debug!("HLS: selected audio group {} -> {}", group_id, uri);
                return Some(uri);
            }
        }

        debug!(
            "HLS: selected variant bw={} codecs={:?} audio_only={} audio_group={:?} url={}",
            variant.bandwidth, variant.codecs, variant.is_audio_only, variant.audio_group, variant.uri
        );
        Some(variant.uri.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

impl Playlist {
    pub fn parse(base_url: &Url, bytes: &[u8]) -> Result<Self, HlsError> {
        let raw = M3u8Parser::new().parse_bytes(base_url, bytes)?;
        Self::from_m3u8(&raw)
    }

    pub fn from_m3u8(raw: &M3u8Playlist) -> Result<Self, HlsError> {
        if raw.segments.iter().any(|s| s.has_tag("EXT-X-STREAM-INF")) {
            MasterPlaylist::from_m3u8(raw).map(Self::Master)
        } else {
            MediaPlaylist::from_m3u8(raw).map(Self::Media)
        }
    }
}
