use std::io;

use thiserror::Error;

/// Transport-level failures: sockets, HTTP framing, status codes, retries.
#[derive(Debug, Clone, Error)]
pub enum NetError {
    #[error("connection to {host} failed: {message}")]
    Connect { host: String, message: String },

    #[error("i/o error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("malformed HTTP response: {0}")]
    MalformedResponse(String),

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("http client error: {0}")]
    Client(String),

    #[error("gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<NetError>,
    },
}

impl NetError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect { .. } | Self::UnexpectedEof => true,
            Self::Io { kind, .. } => matches!(
                kind,
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::NotConnected
            ),
            Self::Status { status, .. } => is_retryable_status(*status),
            Self::Client(message) => {
                let m = message.to_ascii_lowercase();
                m.contains("timeout") || m.contains("connection")
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::RetryExhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetryExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// 5xx, 408 Request Timeout and 429 Too Many Requests.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            kind => Self::Io {
                kind,
                message: e.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = e.status() {
            return Self::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if e.is_connect() {
            return Self::Connect {
                host: e
                    .url()
                    .and_then(|u| u.host_str())
                    .unwrap_or_default()
                    .to_string(),
                message: e.to_string(),
            };
        }
        Self::Client(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for NetError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

/// Elementary-stream framing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("invalid ADTS header: {0}")]
    InvalidAdtsHeader(&'static str),

    #[error("invalid PES packet: {0}")]
    InvalidPes(&'static str),

    #[error("transport stream sync lost after {0} bytes")]
    TsSyncLost(usize),

    #[error("unrecognized segment container")]
    UnknownContainer,
}

/// Playlist and pipeline failures.
#[derive(Debug, Clone, Error)]
pub enum HlsError {
    #[error("playlist does not start with #EXTM3U")]
    MissingHeader,

    #[error("playlist is not valid UTF-8")]
    Encoding,

    #[error("invalid value for attribute {name}: {value:?}")]
    InvalidAttribute { name: String, value: String },

    #[error("tag {tag} is missing required attribute {attribute}")]
    MissingAttribute { tag: String, attribute: String },

    #[error("invalid value for tag {tag}: {value:?}")]
    InvalidTag { tag: String, value: String },

    #[error("playlist contained no segments")]
    EmptyPlaylist,

    #[error("master playlist has no variants")]
    NoVariants,

    #[error("unsupported encryption method {0}")]
    UnsupportedEncryption(String),

    #[error("encryption key must be 16 bytes, got {0}")]
    InvalidKey(usize),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl HlsError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Net(e) if e.is_cancelled())
    }
}
