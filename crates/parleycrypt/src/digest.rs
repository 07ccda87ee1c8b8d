//! The credential digest scheme. Clients send a 16-byte digest of the
//! password; the store keeps the digest of that digest, so the wire value
//! is never what sits on disk.

use md5::{Digest, Md5};

pub fn md5_bytes(data: &[u8]) -> [u8; 16] {
    let mut h = Md5::new();
    h.update(data);
    h.finalize().into()
}

/// What the account store holds for a digest received on the wire.
pub fn stored_digest(wire_digest: &[u8; 16]) -> [u8; 16] {
    md5_bytes(wire_digest)
}
