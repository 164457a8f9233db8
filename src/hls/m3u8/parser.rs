use reqwest::Url;
use tracing::{trace, warn};

use super::{
    registry::TagRegistry,
    tags::{TagInstance, TagScope},
};
use crate::common::errors::HlsError;

/// One URI line plus every tag in effect for it.
#[derive(Debug, Clone, PartialEq)]
pub struct M3u8Segment {
    pub uri: Url,
    /// Shared tags in effect, then the segment's own tags, in playlist order.
    pub tags: Vec<TagInstance>,
}

impl M3u8Segment {
    pub fn tag(&self, name: &str) -> Option<&TagInstance> {
        self.tags.iter().find(|t| t.name == name)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tag(name).is_some()
    }
}

/// Tokenized playlist: global tags plus the ordered URI lines.
#[derive(Debug, Clone, PartialEq)]
pub struct M3u8Playlist {
    pub base_url: Url,
    pub tags: Vec<TagInstance>,
    pub segments: Vec<M3u8Segment>,
}

impl M3u8Playlist {
    pub fn tag(&self, name: &str) -> Option<&TagInstance> {
        self.tags.iter().find(|t| t.name == name)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tag(name).is_some()
    }
}

/// Merge `\`-continued lines and trim each logical line.
fn logical_lines<'a, I>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Vec::new();
    let mut pending = String::new();
    for line in lines {
        let line = line.trim();
        match line.strip_suffix('\\') {
            Some(head) => pending.push_str(head),
            None => {
                pending.push_str(line);
                out.push(std::mem::take(&mut pending).trim().to_string());
            }
        }
    }
    if !pending.is_empty() {
        out.push(pending.trim().to_string());
    }
    out
}

pub struct M3u8Parser<'r> {
    registry: &'r TagRegistry,
}

impl Default for M3u8Parser<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl M3u8Parser<'static> {
    pub fn new() -> Self {
        Self {
            registry: TagRegistry::global(),
        }
    }
}

impl<'r> M3u8Parser<'r> {
    pub fn with_registry(registry: &'r TagRegistry) -> Self {
        Self { registry }
    }

    pub fn parse(&self, base_url: &Url, text: &str) -> Result<M3u8Playlist, HlsError> {
        self.parse_lines(base_url, text.lines())
    }

    pub fn parse_bytes(&self, base_url: &Url, bytes: &[u8]) -> Result<M3u8Playlist, HlsError> {
        let text = std::str::from_utf8(bytes).map_err(|_| HlsError::Encoding)?;
        self.parse(base_url, text)
    }

    pub fn parse_lines<'a, I>(&self, base_url: &Url, lines: I) -> Result<M3u8Playlist, HlsError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tags_by_name = self.registry.snapshot();
        let lines = logical_lines(lines);
        let mut lines = lines
            .iter()
            .map(|l| l.trim_start_matches('\u{feff}').trim_start());

        let header = lines.by_ref().find(|l| !l.is_empty());
        if header != Some("#EXTM3U") {
            return Err(HlsError::MissingHeader);
        }

        let mut global = Vec::new();
        let mut shared: Vec<TagInstance> = Vec::new();
        let mut pending: Vec<TagInstance> = Vec::new();
        let mut segments = Vec::new();

        for line in lines {
            if line.is_empty() {
                continue;
            }

            if let Some(body) = line.strip_prefix('#') {
                if !body.starts_with("EXT") {
                    continue;
                }
                let (name, value) = match body.split_once(':') {
                    Some((n, v)) => (n, Some(v)),
                    None => (body, None),
                };
                let Some(def) = tags_by_name.get(name) else {
                    trace!("Dropping unknown tag #{}", name);
                    continue;
                };

                let tag = def.parse(value)?;
                match tag.scope {
                    TagScope::Global => global.push(tag),
                    TagScope::Shared => {
                        shared.retain(|t| t.name != tag.name);
                        shared.push(tag);
                    }
                    TagScope::Segment => pending.push(tag),
                }
                continue;
            }

            // Unresolvable entries are skipped along with their pending tags.
            let uri = match base_url.join(line) {
                Ok(uri) => uri,
                Err(e) => {
                    warn!("Skipping unresolvable playlist entry {:?}: {}", line, e);
                    pending.clear();
                    continue;
                }
            };

            let mut tags = shared.clone();
            tags.append(&mut pending);
            segments.push(M3u8Segment { uri, tags });
        }

        if !pending.is_empty() {
            trace!("Dropping {} trailing segment tags", pending.len());
        }

        Ok(M3u8Playlist {
            base_url: base_url.clone(),
            tags: global,
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::m3u8::tags::{TagDef, TagValue, parse_text};

    fn base() -> Url {
        Url::parse("http://example/live/index.m3u8").unwrap()
    }

    #[test]
    fn parses_simple_vod_playlist() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:9.5,\nseg1.ts\n#EXTINF:9.5,\nseg2.ts\n#EXT-X-ENDLIST\n";
        let playlist = M3u8Parser::new().parse(&base(), text).unwrap();

        assert_eq!(playlist.segments.len(), 2);
        assert_eq!(playlist.segments[0].uri.as_str(), "http://example/live/seg1.ts");
        assert_eq!(playlist.segments[1].uri.as_str(), "http://example/live/seg2.ts");
        for segment in &playlist.segments {
            assert_eq!(
                segment.tag("EXTINF").unwrap().value,
                TagValue::ExtInf {
                    duration: 9.5,
                    title: None
                }
            );
        }
        assert_eq!(
            playlist.tags.iter().filter(|t| t.name == "EXT-X-ENDLIST").count(),
            1
        );
        assert_eq!(playlist.tag("EXT-X-TARGETDURATION").unwrap().integer(), Some(10));
    }

    #[test]
    fn resolves_relative_uris() {
        let text = "#EXTM3U\n../a.ts\n/abs/b.ts\nsub/c.ts?x=1\nhttps://cdn.example/d.ts\n";
        let playlist = M3u8Parser::new().parse(&base(), text).unwrap();
        let uris: Vec<_> = playlist.segments.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(
            uris,
            [
                "http://example/a.ts",
                "http://example/abs/b.ts",
                "http://example/live/sub/c.ts?x=1",
                "https://cdn.example/d.ts",
            ]
        );
    }

    #[test]
    fn requires_header() {
        assert!(matches!(
            M3u8Parser::new().parse(&base(), "\n\n#EXTINF:1,\na.ts"),
            Err(HlsError::MissingHeader)
        ));
        assert!(matches!(
            M3u8Parser::new().parse(&base(), ""),
            Err(HlsError::MissingHeader)
        ));
        assert!(matches!(
            M3u8Parser::new().parse(&base(), "#EXTM3UX\n#EXTINF:1,\na.ts"),
            Err(HlsError::MissingHeader)
        ));
        assert!(
            M3u8Parser::new()
                .parse(&base(), "\u{feff}  #EXTM3U  \n#EXTINF:1,\na.ts")
                .is_ok()
        );
        assert!(matches!(
            M3u8Parser::new().parse_bytes(&base(), &[0xff, 0xfe, 0x00]),
            Err(HlsError::Encoding)
        ));
    }

    #[test]
    fn shared_tags_persist_and_get_replaced() {
        let text = r#"#EXTM3U
#EXT-X-KEY:METHOD=AES-128,URI="k1"
#EXTINF:4,
a.ts
#EXT-X-DISCONTINUITY
#EXTINF:4,
b.ts
#EXT-X-KEY:METHOD=AES-128,URI="k2"
#EXTINF:4,
c.ts
#EXT-X-KEY:METHOD=NONE
#EXTINF:4,
d.ts
"#;
        let playlist = M3u8Parser::new().parse(&base(), text).unwrap();
        let keys: Vec<_> = playlist
            .segments
            .iter()
            .map(|s| {
                let key = s.tag("EXT-X-KEY").unwrap();
                assert_eq!(s.tags.iter().filter(|t| t.name == "EXT-X-KEY").count(), 1);
                key.attr_str("URI").unwrap_or(key.attr_str("METHOD").unwrap())
            })
            .collect();
        assert_eq!(keys, ["k1", "k1", "k2", "NONE"]);

        assert!(!playlist.segments[0].has_tag("EXT-X-DISCONTINUITY"));
        assert!(playlist.segments[1].has_tag("EXT-X-DISCONTINUITY"));
        assert!(!playlist.segments[2].has_tag("EXT-X-DISCONTINUITY"));
    }

    #[test]
    fn skips_comments_unknown_tags_and_joins_continuations() {
        let text = "#EXTM3U\n# a comment\n#EXT-X-UNKNOWN:1\n#EXT-X-STREAM-INF:BANDWIDTH=1000,\\\n  CODECS=\"mp4a.40.2\"\nlow.m3u8\n";
        let playlist = M3u8Parser::new().parse(&base(), text).unwrap();
        assert_eq!(playlist.segments.len(), 1);
        let inf = playlist.segments[0].tag("EXT-X-STREAM-INF").unwrap();
        assert_eq!(inf.attr_u64("BANDWIDTH"), Some(1000));
        assert_eq!(
            inf.attribute("CODECS").and_then(|c| c.as_list()),
            Some(&["mp4a.40.2".to_string()][..])
        );
    }

    #[test]
    fn malformed_attribute_is_caller_visible() {
        let text = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,IV=0xNOPE\n#EXTINF:1,\na.ts\n";
        assert!(matches!(
            M3u8Parser::new().parse(&base(), text),
            Err(HlsError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn malformed_tag_value_fails_the_parse() {
        let text = "#EXTM3U\n#EXTINF:abc,\na.ts\n";
        assert!(matches!(
            M3u8Parser::new().parse(&base(), text),
            Err(HlsError::InvalidTag { tag, .. }) if tag == "EXTINF"
        ));
    }

    #[test]
    fn unresolvable_entries_are_skipped_with_their_tags() {
        let text = "#EXTM3U\n#EXTINF:1,\na.ts\n#EXTINF:2,\nhttp://[bad\n#EXTINF:3,\nc.ts\n";
        let playlist = M3u8Parser::new().parse(&base(), text).unwrap();

        let durations: Vec<_> = playlist
            .segments
            .iter()
            .map(|s| match &s.tag("EXTINF").unwrap().value {
                TagValue::ExtInf { duration, .. } => *duration,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(durations, [1.0, 3.0]);
        assert!(playlist.segments.iter().all(|s| s.tags.len() == 1));
    }

    #[test]
    fn custom_registry() {
        let registry = TagRegistry::with_standard_tags();
        registry.register(TagDef::new("EXT-X-CUE-OUT", TagScope::Segment, parse_text));
        let text = "#EXTM3U\n#EXT-X-CUE-OUT:30\n#EXTINF:1,\nad.ts\n";
        let playlist = M3u8Parser::with_registry(&registry)
            .parse(&base(), text)
            .unwrap();
        assert_eq!(
            playlist.segments[0].tag("EXT-X-CUE-OUT").unwrap().text(),
            Some("30")
        );
    }
}
