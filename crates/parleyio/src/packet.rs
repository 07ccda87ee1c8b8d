//! Record framing over a byte stream, with optional session encryption.
//!
//! The header is `[code: u8][size: u16 le]`; `size` counts payload bytes
//! only, so a record is at most `3 + 65535` bytes and needs no separate
//! length guard. Once a session cipher is installed the stream carries
//! 16-byte cipher blocks: each outgoing record is zero-padded up to a
//! block boundary, and the reader decrypts only as many whole blocks as
//! the current record needs, so surplus ciphertext stays staged and a
//! `flush` between records drops nothing but padding.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use parleycrypt::rc6::{RecvCipher, SendCipher, BLOCK_LEN};

/// Bytes of record header preceding the payload.
pub const HEADER_LEN: usize = 3;

/// One wire record: the header code plus its payload bytes.
#[derive(Debug, Clone)]
pub struct Packet {
    pub code: u8,
    pub payload: Bytes,
}

/// Buffered record reader over any async byte stream.
pub struct PacketReader<R> {
    inner: R,
    /// Bytes as received; ciphertext once a cipher is installed.
    raw: BytesMut,
    /// Decrypted (or passthrough) bytes ready for framing.
    plain: BytesMut,
    cipher: Option<RecvCipher>,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            raw: BytesMut::with_capacity(8 * 1024),
            plain: BytesMut::with_capacity(8 * 1024),
            cipher: None,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Switch the stream to ciphered mode. Any bytes already buffered
    /// were sent after the peer enabled its own cipher, so they move
    /// back to the ciphertext side before decryption starts.
    pub fn install_cipher(&mut self, cipher: RecvCipher) {
        if !self.plain.is_empty() {
            let mut staged = std::mem::take(&mut self.plain);
            staged.extend_from_slice(&self.raw);
            self.raw = staged;
        }
        self.cipher = Some(cipher);
    }

    /// Drop leftover plaintext from cipher block padding. Called between
    /// records; a no-op on plaintext streams.
    pub fn flush(&mut self) {
        if self.cipher.is_some() {
            self.plain.clear();
        }
    }

    /// Read the next record from the stream.
    ///
    /// Returns `Ok(None)` on clean EOF at a record boundary. EOF in the
    /// middle of a record (or inside a cipher block) is an
    /// `UnexpectedEof` error.
    pub async fn read_packet(&mut self) -> io::Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.take_packet() {
                return Ok(Some(packet));
            }
            let n = self.inner.read_buf(&mut self.raw).await?;
            if n == 0 {
                if self.plain.is_empty() && self.raw.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "eof while reading packet",
                ));
            }
        }
    }

    fn take_packet(&mut self) -> Option<Packet> {
        self.fill_plain(HEADER_LEN);
        if self.plain.len() < HEADER_LEN {
            return None;
        }
        let code = self.plain[0];
        let size = u16::from_le_bytes([self.plain[1], self.plain[2]]) as usize;
        self.fill_plain(HEADER_LEN + size);
        if self.plain.len() < HEADER_LEN + size {
            return None;
        }
        self.plain.advance(HEADER_LEN);
        let payload = self.plain.split_to(size).freeze();
        Some(Packet { code, payload })
    }

    /// Make at least `need` plaintext bytes available if the staged data
    /// allows. In ciphered mode only whole blocks covering the deficit
    /// are decrypted.
    fn fill_plain(&mut self, need: usize) {
        match &mut self.cipher {
            None => {
                if self.raw.is_empty() {
                    return;
                }
                if self.plain.is_empty() {
                    std::mem::swap(&mut self.plain, &mut self.raw);
                } else {
                    self.plain.extend_from_slice(&self.raw);
                    self.raw.clear();
                }
            }
            Some(cipher) => {
                if self.plain.len() >= need {
                    return;
                }
                let deficit = need - self.plain.len();
                let want = (deficit + BLOCK_LEN - 1) / BLOCK_LEN * BLOCK_LEN;
                let have = self.raw.len() / BLOCK_LEN * BLOCK_LEN;
                let take = want.min(have);
                if take == 0 {
                    return;
                }
                let mut blocks = self.raw.split_to(take);
                cipher.decrypt_blocks(&mut blocks);
                self.plain.extend_from_slice(&blocks);
            }
        }
    }
}

/// Record writer over any async byte stream.
pub struct PacketWriter<W> {
    inner: W,
    cipher: Option<SendCipher>,
    scratch: BytesMut,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            cipher: None,
            scratch: BytesMut::with_capacity(8 * 1024),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn install_cipher(&mut self, cipher: SendCipher) {
        self.cipher = Some(cipher);
    }

    /// Send one complete record (header plus payload). In ciphered mode
    /// the record is zero-padded up to the next block boundary so the
    /// following record starts a fresh block.
    pub async fn send(&mut self, record: &[u8]) -> io::Result<()> {
        match &mut self.cipher {
            None => self.inner.write_all(record).await,
            Some(cipher) => {
                self.scratch.clear();
                self.scratch.extend_from_slice(record);
                let padded = (record.len() + BLOCK_LEN - 1) / BLOCK_LEN * BLOCK_LEN;
                self.scratch.resize(padded, 0);
                cipher.encrypt_blocks(&mut self.scratch);
                self.inner.write_all(&self.scratch).await
            }
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}
