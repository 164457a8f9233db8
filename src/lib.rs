pub mod common;
pub mod configs;
pub mod crypto;
pub mod hls;
pub mod media;
pub mod net;
