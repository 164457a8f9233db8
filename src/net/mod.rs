pub mod constants;
pub mod content_type;
pub mod http;
pub mod manager;
pub mod retry;
pub mod stream;
pub mod web_cache;
pub mod web_reader;

#[cfg(test)]
pub(crate) mod testing;

pub use content_type::{ContentKind, ContentType, ContentTypeDetector};
pub use manager::WebReaderManager;
pub use retry::{Backoff, RetryPolicy};
pub use stream::{BoxByteStream, ByteStream, MemoryStream};
pub use web_cache::{WebCache, WebCacheManager};
pub use web_reader::{ReqwestWebReader, SocketWebReader, WebReader, WebRequest, WebResponse};
