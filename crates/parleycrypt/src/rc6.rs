//! The 128-bit-block session cipher: 20 rounds, word-rotation key schedule
//! seeded from two magic constants, run in CBC mode with a per-direction
//! chaining block. The first 16 key bytes double as the IV for both
//! directions.

use anyhow::{Result, bail};
use zeroize::Zeroize;

pub const BLOCK_LEN: usize = 16;

const ROUNDS: usize = 20;
const SCHED_LEN: usize = 2 * ROUNDS + 4;
const KEY_WORDS: usize = 16;

const P32: u32 = 0xb7e1_5163;
const Q32: u32 = 0x9e37_79b9;
const LGW: u32 = 5;

/// Only these key sizes produce a defined schedule.
pub fn is_valid_key_len(len: usize) -> bool {
    matches!(len, 16 | 32 | 64)
}

#[derive(Clone)]
struct Schedule {
    s: [u32; SCHED_LEN],
}

impl Schedule {
    fn new(key: &[u8]) -> Self {
        let mut l = [0u32; KEY_WORDS];
        for (i, w) in l.iter_mut().enumerate() {
            let at = (i * 4) % key.len();
            *w = u32::from_le_bytes([key[at], key[at + 1], key[at + 2], key[at + 3]]);
        }

        let mut s = [0u32; SCHED_LEN];
        s[0] = P32;
        for i in 1..SCHED_LEN {
            s[i] = s[i - 1].wrapping_add(Q32);
        }

        let mut a = 0u32;
        let mut b = 0u32;
        let mut i = 0;
        let mut j = 0;
        for _ in 0..3 * SCHED_LEN {
            a = s[i].wrapping_add(a).wrapping_add(b).rotate_left(3);
            s[i] = a;
            b = l[j]
                .wrapping_add(a)
                .wrapping_add(b)
                .rotate_left(a.wrapping_add(b));
            l[j] = b;
            i = (i + 1) % SCHED_LEN;
            j = (j + 1) % KEY_WORDS;
        }

        l.zeroize();
        Self { s }
    }

    fn encrypt(&self, w: &mut [u32; 4]) {
        w[1] = w[1].wrapping_add(self.s[0]);
        w[3] = w[3].wrapping_add(self.s[1]);

        for i in 1..=ROUNDS {
            let t = quad(w[1]).rotate_left(LGW);
            let u = quad(w[3]).rotate_left(LGW);
            w[0] = (w[0] ^ t).rotate_left(u).wrapping_add(self.s[i * 2]);
            w[2] = (w[2] ^ u).rotate_left(t).wrapping_add(self.s[i * 2 + 1]);

            *w = [w[1], w[2], w[3], w[0]];
        }

        w[0] = w[0].wrapping_add(self.s[ROUNDS * 2 + 2]);
        w[2] = w[2].wrapping_add(self.s[ROUNDS * 2 + 3]);
    }

    fn decrypt(&self, w: &mut [u32; 4]) {
        w[0] = w[0].wrapping_sub(self.s[ROUNDS * 2 + 2]);
        w[2] = w[2].wrapping_sub(self.s[ROUNDS * 2 + 3]);

        for i in (1..=ROUNDS).rev() {
            *w = [w[3], w[0], w[1], w[2]];

            let t = quad(w[1]).rotate_left(LGW);
            let u = quad(w[3]).rotate_left(LGW);
            w[0] = w[0].wrapping_sub(self.s[i * 2]).rotate_right(u) ^ t;
            w[2] = w[2].wrapping_sub(self.s[i * 2 + 1]).rotate_right(t) ^ u;
        }

        w[1] = w[1].wrapping_sub(self.s[0]);
        w[3] = w[3].wrapping_sub(self.s[1]);
    }
}

fn quad(v: u32) -> u32 {
    v.wrapping_mul(v.wrapping_mul(2).wrapping_add(1))
}

impl Drop for Schedule {
    fn drop(&mut self) {
        self.s.zeroize();
    }
}

fn load_block(b: &[u8]) -> [u32; 4] {
    let mut w = [0u32; 4];
    for (i, w) in w.iter_mut().enumerate() {
        *w = u32::from_le_bytes([b[i * 4], b[i * 4 + 1], b[i * 4 + 2], b[i * 4 + 3]]);
    }
    w
}

fn store_block(w: &[u32; 4], b: &mut [u8]) {
    for (i, w) in w.iter().enumerate() {
        b[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
    }
}

fn iv_block(key: &[u8]) -> [u32; 4] {
    load_block(&key[..BLOCK_LEN])
}

/// Outbound half of a session: encrypts whole blocks, chaining each to the
/// previous ciphertext block.
pub struct SendCipher {
    sched: Schedule,
    last: [u32; 4],
}

/// Inbound half of a session. Chaining state is independent of the send
/// direction since either side may write while the other still reads.
pub struct RecvCipher {
    sched: Schedule,
    last: [u32; 4],
}

/// Builds both directions of a session from one key.
pub fn session_pair(key: &[u8]) -> Result<(SendCipher, RecvCipher)> {
    if !is_valid_key_len(key.len()) {
        bail!("invalid cipher key size: {}", key.len());
    }

    let sched = Schedule::new(key);
    let iv = iv_block(key);
    Ok((
        SendCipher {
            sched: sched.clone(),
            last: iv,
        },
        RecvCipher { sched, last: iv },
    ))
}

impl SendCipher {
    /// `data` length must be a whole number of blocks.
    pub fn encrypt_blocks(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK_LEN, 0);

        for chunk in data.chunks_exact_mut(BLOCK_LEN) {
            let mut w = load_block(chunk);
            for (w, last) in w.iter_mut().zip(self.last.iter()) {
                *w ^= last;
            }
            self.sched.encrypt(&mut w);
            store_block(&w, chunk);
            self.last = w;
        }
    }
}

impl RecvCipher {
    /// `data` length must be a whole number of blocks.
    pub fn decrypt_blocks(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK_LEN, 0);

        for chunk in data.chunks_exact_mut(BLOCK_LEN) {
            let encrypted = load_block(chunk);
            let mut w = encrypted;
            self.sched.decrypt(&mut w);
            for (w, last) in w.iter_mut().zip(self.last.iter()) {
                *w ^= last;
            }
            store_block(&w, chunk);
            self.last = encrypted;
        }
    }
}

impl Drop for SendCipher {
    fn drop(&mut self) {
        self.last.zeroize();
    }
}

impl Drop for RecvCipher {
    fn drop(&mut self) {
        self.last.zeroize();
    }
}
