use std::fmt;

use crate::common::errors::NetError;

/// Ordered header multimap with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value of `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("Content-Length")?.trim().parse().ok()
    }

    /// `Content-Type` without parameters, lower-cased.
    pub fn content_type(&self) -> Option<String> {
        let raw = self.get("Content-Type")?;
        let mime = raw.split(';').next()?.trim();
        (!mime.is_empty()).then(|| mime.to_ascii_lowercase())
    }

    /// Whether the last transfer coding is `chunked`.
    pub fn is_chunked(&self) -> bool {
        self.get_all("Transfer-Encoding")
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .last()
            .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
    }

    /// Whether any `Connection` header lists `close`.
    pub fn connection_close(&self) -> bool {
        self.get_all("Connection")
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case("close"))
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Split a `Name: value` header line. Lines without a colon are rejected.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Parsed status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpStatus {
    /// `HTTP/1.1`, `HTTP/1.0`, or a non-HTTP token such as `ICY`.
    pub protocol: String,
    /// `(major, minor)` for `HTTP/x.y` status lines.
    pub version: Option<(u8, u8)>,
    pub code: u16,
    pub reason: String,
}

impl HttpStatus {
    /// Parse `HTTP/x.y code reason` or a non-conformant `TOKEN code reason`.
    pub fn parse(line: &str) -> Result<Self, NetError> {
        let line = line.trim();
        let malformed = || NetError::MalformedResponse(format!("bad status line {:?}", line));

        let mut parts = line.splitn(3, ' ');
        let protocol = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        let code_text = parts.next().ok_or_else(malformed)?;
        let reason = parts.next().unwrap_or("").trim().to_string();

        let version = if protocol.starts_with("HTTP") {
            let v = protocol
                .strip_prefix("HTTP/")
                .and_then(|v| v.split_once('.'))
                .and_then(|(major, minor)| Some((major.parse().ok()?, minor.parse().ok()?)))
                .ok_or_else(malformed)?;
            Some(v)
        } else {
            None
        };

        if code_text.len() != 3 || !code_text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let code = code_text.parse().map_err(|_| malformed())?;

        Ok(Self {
            protocol: protocol.to_string(),
            version,
            code,
            reason,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.code, 301 | 302 | 303 | 307 | 308)
    }

    pub fn is_retryable(&self) -> bool {
        crate::common::errors::is_retryable_status(self.code)
    }

    /// Responses that never carry a body regardless of framing headers.
    pub fn forbids_body(&self) -> bool {
        (100..200).contains(&self.code) || self.code == 204 || self.code == 304
    }
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.protocol, self.code, self.reason)
    }
}
