use async_trait::async_trait;
use cbc::cipher::{
    BlockDecryptMut, KeyIvInit,
    block_padding::{NoPadding, Pkcs7},
};
use tracing::trace;

use super::BLOCK_SIZE;
use crate::{common::errors::NetError, net::stream::ByteStream};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const READ_CHUNK: usize = 16 * 1024;

/// Forward-only AES-128-CBC decrypting view of a ciphertext stream.
///
/// The last complete block is held back until the source ends so PKCS7
/// padding is stripped from the final block only. The IV rolls forward to
/// the last ciphertext block after every batch.
pub struct Aes128CbcStream<S> {
    inner: S,
    key: [u8; 16],
    iv: [u8; 16],
    input: Vec<u8>,
    output: Vec<u8>,
    out_pos: usize,
    finished: bool,
}

impl<S: ByteStream> Aes128CbcStream<S> {
    pub fn new(inner: S, key: [u8; 16], iv: [u8; 16]) -> Self {
        Self {
            inner,
            key,
            iv,
            input: Vec::with_capacity(READ_CHUNK + BLOCK_SIZE),
            output: Vec::new(),
            out_pos: 0,
            finished: false,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn decryptor(&self) -> Aes128CbcDec {
        Aes128CbcDec::new((&self.key).into(), (&self.iv).into())
    }

    /// Decrypt every complete block except the last one.
    fn decrypt_body(&mut self) -> Result<(), NetError> {
        let aligned = self.input.len() / BLOCK_SIZE * BLOCK_SIZE;
        let ready = aligned.saturating_sub(BLOCK_SIZE);
        if ready == 0 {
            return Ok(());
        }

        let mut next_iv = [0u8; 16];
        next_iv.copy_from_slice(&self.input[ready - BLOCK_SIZE..ready]);

        let cipher = self.decryptor();
        let plain = cipher
            .decrypt_padded_mut::<NoPadding>(&mut self.input[..ready])
            .map_err(|e| NetError::Decrypt(e.to_string()))?;
        self.output.extend_from_slice(plain);

        self.input.drain(..ready);
        self.iv = next_iv;
        Ok(())
    }

    /// Decrypt the held-back tail and strip padding.
    fn decrypt_final(&mut self) -> Result<(), NetError> {
        self.finished = true;
        if self.input.is_empty() {
            return Ok(());
        }
        if self.input.len() % BLOCK_SIZE != 0 {
            return Err(NetError::Decrypt(format!(
                "ciphertext tail of {} bytes is not block aligned",
                self.input.len()
            )));
        }

        let cipher = self.decryptor();
        let plain = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut self.input)
            .map_err(|_| NetError::Decrypt("invalid PKCS7 padding".into()))?;
        self.output.extend_from_slice(plain);
        self.input.clear();
        trace!("AES-128 stream finished");
        Ok(())
    }
}

#[async_trait]
impl<S: ByteStream> ByteStream for Aes128CbcStream<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        loop {
            if self.out_pos < self.output.len() {
                let n = (self.output.len() - self.out_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.output[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                if self.out_pos == self.output.len() {
                    self.output.clear();
                    self.out_pos = 0;
                }
                return Ok(n);
            }
            if self.finished || buf.is_empty() {
                return Ok(0);
            }

            let filled = self.input.len();
            self.input.resize(filled + READ_CHUNK, 0);
            let n = match self.inner.read(&mut self.input[filled..]).await {
                Ok(n) => n,
                Err(e) => {
                    self.input.truncate(filled);
                    return Err(e);
                }
            };
            self.input.truncate(filled + n);

            if n == 0 {
                self.decrypt_final()?;
            } else {
                self.decrypt_body()?;
            }
        }
    }
}
