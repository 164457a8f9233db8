use std::fmt::{self, Write as _};

use reqwest::Url;

use super::headers::HeaderMap;
use crate::common::errors::NetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
        }
    }
}

/// Inclusive byte range, open-ended when `end` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// `length` bytes starting at `offset`, at least one. A window that
    /// runs past `u64::MAX` becomes open-ended.
    pub fn from_offset(offset: u64, length: u64) -> Self {
        Self {
            start: offset,
            end: offset.checked_add(length.max(1) - 1),
        }
    }

    /// The single-byte range used to probe headers.
    pub fn probe() -> Self {
        Self::new(0, Some(0))
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "bytes={}-{}", self.start, end),
            None => write!(f, "bytes={}-", self.start),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub range: Option<RangeSpec>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub keep_alive: bool,
    pub headers: HeaderMap,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            range: None,
            referrer: None,
            user_agent: None,
            keep_alive: false,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn head(url: Url) -> Self {
        Self::new(Method::Head, url)
    }

    pub fn with_range(mut self, range: Option<RangeSpec>) -> Self {
        self.range = range;
        self
    }

    pub fn with_referrer(mut self, referrer: Option<String>) -> Self {
        self.referrer = referrer;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Request line and headers, terminated by the blank line.
    pub fn encode_head(&self) -> Result<String, NetError> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| NetError::InvalidUrl(format!("{} has no host", self.url)))?;

        let mut target = self.url.path().to_string();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut head = String::with_capacity(256);
        // Writing into a String cannot fail.
        let _ = write!(head, "{} {} HTTP/1.1\r\n", self.method.as_str(), target);
        match self.url.port() {
            Some(port) => {
                let _ = write!(head, "Host: {}:{}\r\n", host, port);
            }
            None => {
                let _ = write!(head, "Host: {}\r\n", host);
            }
        }
        if let Some(ua) = &self.user_agent {
            let _ = write!(head, "User-Agent: {}\r\n", ua);
        }
        head.push_str("Accept: */*\r\n");
        head.push_str("Accept-Encoding: identity\r\n");
        if let Some(range) = &self.range {
            let _ = write!(head, "Range: {}\r\n", range);
        }
        if let Some(referrer) = &self.referrer {
            let _ = write!(head, "Referer: {}\r\n", referrer);
        }
        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        let _ = write!(head, "Connection: {}\r\n", connection);
        for (name, value) in self.headers.iter() {
            let _ = write!(head, "{}: {}\r\n", name, value);
        }
        head.push_str("\r\n");
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ranged_get() {
        let url = Url::parse("http://example.com:8080/live/seg1.ts?token=abc#frag").unwrap();
        let head = HttpRequest::get(url)
            .with_range(Some(RangeSpec::from_offset(100, 50)))
            .with_referrer(Some("http://example.com/".into()))
            .with_user_agent("hlswave")
            .with_header("If-None-Match", "\"v1\"")
            .encode_head()
            .unwrap();

        assert!(head.starts_with("GET /live/seg1.ts?token=abc HTTP/1.1\r\n"));
        assert!(head.contains("Host: example.com:8080\r\n"));
        assert!(head.contains("Range: bytes=100-149\r\n"));
        assert!(head.contains("Referer: http://example.com/\r\n"));
        assert!(head.contains("User-Agent: hlswave\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(head.contains("If-None-Match: \"v1\"\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
        assert!(!head.contains("frag"));
    }

    #[test]
    fn head_request_without_port() {
        let url = Url::parse("http://example.com").unwrap();
        let head = HttpRequest::head(url)
            .with_keep_alive(true)
            .encode_head()
            .unwrap();
        assert!(head.starts_with("HEAD / HTTP/1.1\r\n"));
        assert!(head.contains("Host: example.com\r\n"));
        assert!(head.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn oversized_range_is_open_ended() {
        assert_eq!(RangeSpec::from_offset(10, 0), RangeSpec::new(10, Some(10)));
        assert_eq!(
            RangeSpec::from_offset(u64::MAX - 1, 2),
            RangeSpec::new(u64::MAX - 1, Some(u64::MAX))
        );
        assert_eq!(RangeSpec::from_offset(100, u64::MAX), RangeSpec::new(100, None));
    }

    #[test]
    fn range_display() {
        assert_eq!(RangeSpec::probe().to_string(), "bytes=0-0");
        assert_eq!(RangeSpec::new(512, None).to_string(), "bytes=512-");
    }
}
