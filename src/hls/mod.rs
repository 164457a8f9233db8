pub mod m3u8;
pub mod pipeline;
pub mod playlist;
pub mod program;

mod feeder;

pub use pipeline::{FrameSender, HlsPipeline, PlaybackPosition, PlaybackState};
pub use playlist::{
    EncryptionMethod, MasterPlaylist, MediaPlaylist, Playlist, SegmentKey, SegmentReference,
    VariantStream,
};
pub use program::{PlaylistLoader, ResolvedProgram};
