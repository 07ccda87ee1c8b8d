//! The server key file: five decimal big integers `e, p, q, n, s`
//! separated by any non-digit bytes. `n` and `s` are published in the
//! greeting; the private exponent is derived from `e, p, q` at load time
//! and used only to unwrap secure-auth blobs.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use num_bigint::BigUint;
use num_traits::One;

pub struct ServerKey {
    n: BigUint,
    d: BigUint,
    modulus: Vec<u8>,
    signature: Vec<u8>,
}

impl ServerKey {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read key file {}", path.display()))?;

        let mut ints = Vec::new();
        for tok in text.split(|c: char| !c.is_ascii_digit()) {
            if tok.is_empty() {
                continue;
            }
            ints.push(
                BigUint::parse_bytes(tok.as_bytes(), 10)
                    .ok_or_else(|| anyhow!("invalid decimal integer in key file"))?,
            );
        }

        let [e, p, q, n, s]: [BigUint; 5] = ints
            .try_into()
            .map_err(|v: Vec<_>| anyhow!("key file must hold e, p, q, n, s; found {}", v.len()))?;

        if p <= BigUint::one() || q <= BigUint::one() {
            bail!("degenerate prime factor");
        }
        if &p * &q != n {
            bail!("modulus does not match its factors");
        }

        let phi = (&p - 1u32) * (&q - 1u32);
        let d = e
            .modinv(&phi)
            .context("public exponent is not invertible")?;

        let modulus = n.to_bytes_be();
        if modulus.len() > 4096 {
            bail!("modulus too large: {} bytes", modulus.len());
        }

        // Both integers ride in one greeting record: two u16 length
        // prefixes plus the bytes must fit the u16 size header.
        let signature = s.to_bytes_be();
        if 4 + modulus.len() + signature.len() > u16::MAX as usize {
            bail!(
                "modulus and signature overflow the greeting record: {} + {} bytes",
                modulus.len(),
                signature.len()
            );
        }

        Ok(Self {
            n,
            d,
            modulus,
            signature,
        })
    }

    /// Big-endian modulus bytes, as published in the greeting.
    pub fn modulus_bytes(&self) -> &[u8] {
        &self.modulus
    }

    /// Big-endian signature bytes published beside the modulus. Verifying
    /// it is the client's business.
    pub fn signature_bytes(&self) -> &[u8] {
        &self.signature
    }

    /// Decrypts a blob via modular exponentiation. Results shorter than
    /// `len` come back left-padded with zeros, so a short plaintext reads
    /// as an empty leading field instead of an error; longer results are
    /// returned as-is for the caller to reject.
    pub fn decrypt_padded(&self, ciphertext: &[u8], len: usize) -> Vec<u8> {
        let c = BigUint::from_bytes_be(ciphertext);
        let m = c.modpow(&self.d, &self.n);

        let raw = m.to_bytes_be();
        if raw.len() >= len {
            return raw;
        }

        let mut out = vec![0u8; len];
        out[len - raw.len()..].copy_from_slice(&raw);
        out
    }
}
