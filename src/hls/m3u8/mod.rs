//! M3U8 tokenizer: tags, attributes and the registries that define them.

pub mod attributes;
pub mod parser;
pub mod registry;
pub mod tags;

pub use attributes::{AttributeInstance, AttributeKind, AttributeValue};
pub use parser::{M3u8Parser, M3u8Playlist, M3u8Segment};
pub use registry::TagRegistry;
pub use tags::{TagDef, TagInstance, TagScope, TagValue};
