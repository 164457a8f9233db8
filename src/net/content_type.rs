use std::sync::Arc;

use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    common::errors::NetError,
    net::{
        http::RangeSpec,
        web_reader::{WebReader, WebResponse},
    },
};

/// Which family of content a caller is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Playlist,
    Segment,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    M3u8,
    MpegTs,
    Aac,
    Mp3,
    Mp4,
}

struct ContentTypeEntry {
    content_type: ContentType,
    extensions: &'static [&'static str],
    mime_types: &'static [&'static str],
}

const CONTENT_TYPES: &[ContentTypeEntry] = &[
    ContentTypeEntry {
        content_type: ContentType::M3u8,
        extensions: &["m3u8", "m3u"],
        mime_types: &[
            "application/vnd.apple.mpegurl",
            "application/x-mpegurl",
            "audio/mpegurl",
            "audio/x-mpegurl",
        ],
    },
    ContentTypeEntry {
        content_type: ContentType::MpegTs,
        extensions: &["ts", "mts", "m2ts"],
        mime_types: &["video/mp2t", "video/mpeg"],
    },
    ContentTypeEntry {
        content_type: ContentType::Aac,
        extensions: &["aac", "adts"],
        mime_types: &["audio/aac", "audio/aacp", "audio/x-aac"],
    },
    ContentTypeEntry {
        content_type: ContentType::Mp3,
        extensions: &["mp3"],
        mime_types: &["audio/mpeg", "audio/mp3"],
    },
    ContentTypeEntry {
        content_type: ContentType::Mp4,
        extensions: &["mp4", "m4a", "m4s", "m4v"],
        mime_types: &["audio/mp4", "video/mp4"],
    },
];

impl ContentType {
    fn entry(self) -> &'static ContentTypeEntry {
        // Every variant has a row.
        CONTENT_TYPES
            .iter()
            .find(|e| e.content_type == self)
            .unwrap_or(&CONTENT_TYPES[0])
    }

    /// Canonical MIME type.
    pub fn mime(self) -> &'static str {
        self.entry().mime_types[0]
    }

    pub fn kind(self) -> ContentKind {
        match self {
            Self::M3u8 => ContentKind::Playlist,
            _ => ContentKind::Segment,
        }
    }

    pub fn matches(self, kind: ContentKind) -> bool {
        kind == ContentKind::Any || self.kind() == kind
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        CONTENT_TYPES
            .iter()
            .find(|e| e.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
            .map(|e| e.content_type)
    }

    /// Match a MIME type, ignoring parameters and case.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.split(';').next()?.trim();
        CONTENT_TYPES
            .iter()
            .find(|e| e.mime_types.iter().any(|m| m.eq_ignore_ascii_case(mime)))
            .map(|e| e.content_type)
    }

    /// Extension of the last path segment; the query string is ignored.
    pub fn from_url(url: &Url) -> Option<Self> {
        let name = url.path_segments()?.next_back()?;
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    fn from_response(response: &WebResponse, kind: ContentKind) -> Option<Self> {
        response
            .content_type()
            .and_then(|m| Self::from_mime(&m))
            .or_else(|| Self::from_url(&response.url))
            .filter(|t| t.matches(kind))
    }
}

/// Resolves the content type of a URL with as little traffic as possible.
pub struct ContentTypeDetector {
    reader: Arc<dyn WebReader>,
}

impl ContentTypeDetector {
    pub fn new(reader: Arc<dyn WebReader>) -> Self {
        Self { reader }
    }

    /// Extension, then HEAD, then a one-byte ranged GET, then a full GET
    /// whose body is dropped. Only cancellation aborts the chain.
    pub async fn detect(
        &self,
        url: &Url,
        kind: ContentKind,
        cancel: &CancellationToken,
    ) -> Result<Option<ContentType>, NetError> {
        if let Some(t) = ContentType::from_url(url).filter(|t| t.matches(kind)) {
            return Ok(Some(t));
        }

        match self.reader.head(url, cancel).await {
            Ok(response) => {
                if let Some(t) = ContentType::from_response(&response, kind) {
                    return Ok(Some(t));
                }
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => debug!("HEAD probe for {} failed: {}", url, e),
        }

        match self.reader.get_range(url, RangeSpec::probe(), cancel).await {
            Ok(response) => {
                if let Some(t) = ContentType::from_response(&response, kind) {
                    return Ok(Some(t));
                }
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => debug!("Range probe for {} failed: {}", url, e),
        }

        match self.reader.get_stream(url, cancel).await {
            Ok(response) => Ok(ContentType::from_response(&response, kind)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                debug!("Content-type detection for {} failed: {}", url, e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::net::{
        http::Method,
        testing::{Reply, ScriptedReader},
    };

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[rstest]
    #[case("http://h/live/index.m3u8", Some(ContentType::M3u8))]
    #[case("http://h/list.M3U?x=1.ts", Some(ContentType::M3u8))]
    #[case("http://h/seg/00001.ts", Some(ContentType::MpegTs))]
    #[case("http://h/a.aac", Some(ContentType::Aac))]
    #[case("http://h/a.m4a", Some(ContentType::Mp4))]
    #[case("http://h/stream", None)]
    #[case("http://h/", None)]
    fn detects_from_extension(#[case] u: &str, #[case] expected: Option<ContentType>) {
        assert_eq!(ContentType::from_url(&url(u)), expected);
    }

    #[test]
    fn mime_lookup_ignores_parameters() {
        assert_eq!(
            ContentType::from_mime("Application/X-MPEGURL; charset=UTF-8"),
            Some(ContentType::M3u8)
        );
        assert_eq!(ContentType::from_mime("text/html"), None);
        assert_eq!(ContentType::MpegTs.mime(), "video/mp2t");
    }

    #[tokio::test]
    async fn extension_short_circuits_network() {
        let reader = ScriptedReader::new(|_| Ok(Reply::status(500)));
        let detector = ContentTypeDetector::new(reader.clone());
        let found = detector
            .detect(&url("http://h/a.m3u8"), ContentKind::Playlist, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found, Some(ContentType::M3u8));
        assert!(reader.requests().is_empty());
    }

    #[tokio::test]
    async fn falls_back_from_failed_head_to_range_probe() {
        let reader = ScriptedReader::new(|req| match req.method {
            Method::Head => Ok(Reply::status(405)),
            Method::Get => {
                Ok(Reply::ok(&b"G"[..]).header("Content-Type", "video/MP2T"))
            }
        });
        let detector = ContentTypeDetector::new(reader.clone());
        let found = detector
            .detect(&url("http://h/stream"), ContentKind::Segment, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(found, Some(ContentType::MpegTs));
        let requests = reader.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].range, Some(RangeSpec::probe()));
    }

    #[tokio::test]
    async fn kind_filters_candidates() {
        let reader = ScriptedReader::new(|_| {
            Ok(Reply::ok(&b"x"[..]).header("Content-Type", "audio/aac"))
        });
        let detector = ContentTypeDetector::new(reader.clone());
        let found = detector
            .detect(&url("http://h/stream"), ContentKind::Playlist, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(found, None);
        assert_eq!(reader.count(Method::Head), 1);
        assert_eq!(reader.count(Method::Get), 2);
    }

    #[tokio::test]
    async fn network_failures_yield_none() {
        let reader = ScriptedReader::new(|_| Err(NetError::Timeout));
        let detector = ContentTypeDetector::new(reader);
        let found = detector
            .detect(&url("http://h/stream"), ContentKind::Any, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn cancellation_aborts_detection() {
        let reader = ScriptedReader::new(|_| Ok(Reply::status(200)));
        let detector = ContentTypeDetector::new(reader);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = detector
            .detect(&url("http://h/stream"), ContentKind::Any, &cancel)
            .await;
        assert!(matches!(result, Err(NetError::Cancelled)));
    }
}
