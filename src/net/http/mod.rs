//! Socket-based HTTP/1.1 client.

pub mod body;
pub mod client;
pub mod connection;
pub mod headers;
pub mod line_reader;
pub mod request;

pub use body::{BodyFraming, HttpBody};
pub use client::SocketHttpClient;
pub use connection::{HttpConnection, HttpResponse};
pub use headers::{HeaderMap, HttpStatus};
pub use line_reader::LineReader;
pub use request::{HttpRequest, Method, RangeSpec};
