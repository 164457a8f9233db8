use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use parking_lot::RwLock;

use super::{
    attributes::{AttributeDef, AttributeKind, AttributeRegistry},
    tags::{
        TagDef, TagScope, parse_byte_range, parse_extinf, parse_integer, parse_marker, parse_text,
    },
};

use AttributeKind::*;

fn attr(name: &str, kind: AttributeKind) -> AttributeDef {
    AttributeDef::new(name, kind)
}

fn key_attributes() -> AttributeRegistry {
    AttributeRegistry::new([
        attr("METHOD", EnumeratedString).required(),
        attr("URI", QuotedString),
        attr("IV", Hex),
        attr("KEYFORMAT", QuotedString),
        attr("KEYFORMATVERSIONS", QuotedString),
    ])
}

fn stream_inf_attributes(i_frame: bool) -> AttributeRegistry {
    let registry = AttributeRegistry::new([
        attr("BANDWIDTH", DecimalInteger).required(),
        attr("AVERAGE-BANDWIDTH", DecimalInteger),
        attr("PROGRAM-ID", DecimalInteger),
        attr("CODECS", CsvList),
        attr("RESOLUTION", Resolution),
        attr("FRAME-RATE", SignedFloat),
        attr("HDCP-LEVEL", EnumeratedString),
        attr("VIDEO", QuotedString),
        attr("NAME", QuotedString),
    ]);
    if i_frame {
        registry.register(attr("URI", QuotedString).required());
    } else {
        registry.register(attr("AUDIO", QuotedString));
        registry.register(attr("SUBTITLES", QuotedString));
        registry.register(attr("CLOSED-CAPTIONS", QuotedString));
    }
    registry
}

/// Copy-on-write table of known tags.
#[derive(Debug, Default)]
pub struct TagRegistry {
    tags: RwLock<Arc<HashMap<String, TagDef>>>,
}

impl TagRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every tag of RFC 8216 a playback client acts on.
    pub fn with_standard_tags() -> Self {
        let defs = [
            TagDef::new("EXTM3U", TagScope::Global, parse_marker),
            TagDef::new("EXTINF", TagScope::Segment, parse_extinf),
            TagDef::new("EXT-X-VERSION", TagScope::Global, parse_integer),
            TagDef::new("EXT-X-TARGETDURATION", TagScope::Global, parse_integer),
            TagDef::new("EXT-X-MEDIA-SEQUENCE", TagScope::Global, parse_integer),
            TagDef::new("EXT-X-DISCONTINUITY-SEQUENCE", TagScope::Global, parse_integer),
            TagDef::new("EXT-X-PLAYLIST-TYPE", TagScope::Global, parse_text),
            TagDef::new("EXT-X-ENDLIST", TagScope::Global, parse_marker),
            TagDef::new("EXT-X-I-FRAMES-ONLY", TagScope::Global, parse_marker),
            TagDef::new("EXT-X-INDEPENDENT-SEGMENTS", TagScope::Global, parse_marker),
            TagDef::new("EXT-X-ALLOW-CACHE", TagScope::Global, parse_text),
            TagDef::with_attributes(
                "EXT-X-START",
                TagScope::Global,
                AttributeRegistry::new([
                    attr("TIME-OFFSET", SignedFloat).required(),
                    attr("PRECISE", EnumeratedString),
                ]),
            ),
            TagDef::with_attributes("EXT-X-KEY", TagScope::Shared, key_attributes()),
            TagDef::with_attributes("EXT-X-SESSION-KEY", TagScope::Global, key_attributes()),
            TagDef::with_attributes(
                "EXT-X-MAP",
                TagScope::Shared,
                AttributeRegistry::new([
                    attr("URI", QuotedString).required(),
                    attr("BYTERANGE", ByteRange),
                ]),
            ),
            TagDef::new("EXT-X-BYTERANGE", TagScope::Segment, parse_byte_range),
            TagDef::new("EXT-X-DISCONTINUITY", TagScope::Segment, parse_marker),
            TagDef::new("EXT-X-PROGRAM-DATE-TIME", TagScope::Segment, parse_text),
            TagDef::new("EXT-X-GAP", TagScope::Segment, parse_marker),
            TagDef::new("EXT-X-BITRATE", TagScope::Shared, parse_integer),
            TagDef::with_attributes(
                "EXT-X-STREAM-INF",
                TagScope::Segment,
                stream_inf_attributes(false),
            ),
            TagDef::with_attributes(
                "EXT-X-I-FRAME-STREAM-INF",
                TagScope::Global,
                stream_inf_attributes(true),
            ),
            TagDef::with_attributes(
                "EXT-X-MEDIA",
                TagScope::Global,
                AttributeRegistry::new([
                    attr("TYPE", EnumeratedString).required(),
                    attr("GROUP-ID", QuotedString).required(),
                    attr("NAME", QuotedString).required(),
                    attr("URI", QuotedString),
                    attr("LANGUAGE", QuotedString),
                    attr("ASSOC-LANGUAGE", QuotedString),
                    attr("DEFAULT", EnumeratedString),
                    attr("AUTOSELECT", EnumeratedString),
                    attr("FORCED", EnumeratedString),
                    attr("INSTREAM-ID", QuotedString),
                    attr("CHARACTERISTICS", QuotedString),
                    attr("CHANNELS", QuotedString),
                ]),
            ),
            TagDef::with_attributes(
                "EXT-X-SESSION-DATA",
                TagScope::Global,
                AttributeRegistry::new([
                    attr("DATA-ID", QuotedString).required(),
                    attr("VALUE", QuotedString),
                    attr("URI", QuotedString),
                    attr("LANGUAGE", QuotedString),
                ]),
            ),
            TagDef::with_attributes(
                "EXT-X-DATERANGE",
                TagScope::Global,
                AttributeRegistry::new([
                    attr("ID", QuotedString).required(),
                    attr("CLASS", QuotedString),
                    attr("START-DATE", QuotedString).required(),
                    attr("END-DATE", QuotedString),
                    attr("DURATION", SignedFloat),
                    attr("PLANNED-DURATION", SignedFloat),
                    attr("END-ON-NEXT", EnumeratedString),
                ]),
            ),
        ];

        let map = defs.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self {
            tags: RwLock::new(Arc::new(map)),
        }
    }

    /// Process-wide registry preloaded with the standard tags.
    pub fn global() -> &'static TagRegistry {
        static GLOBAL: OnceLock<TagRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_standard_tags)
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, TagDef>> {
        self.tags.read().clone()
    }

    pub fn register(&self, def: TagDef) {
        let mut guard = self.tags.write();
        let mut next = HashMap::clone(&guard);
        next.insert(def.name.clone(), def);
        *guard = Arc::new(next);
    }

    pub fn get(&self, name: &str) -> Option<TagDef> {
        self.tags.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tags.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.read().is_empty()
    }
}
