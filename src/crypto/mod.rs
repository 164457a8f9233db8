//! AES-128 segment decryption.

pub mod key;
pub mod stream;

pub use key::{load_key, parse_key};
pub use stream::Aes128CbcStream;

pub const BLOCK_SIZE: usize = 16;

/// IV for a segment without an explicit one: the media sequence number as a
/// big-endian 128-bit integer.
pub fn sequence_iv(sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&sequence.to_be_bytes());
    iv
}
