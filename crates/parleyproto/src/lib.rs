//! `parleyproto`: the fixed binary chat protocol.
//!
//! Every message is one packet framed by `parleyio`:
//! - outer framing: `[u8 code][u16 little-endian size]` + payload,
//!   where `size` counts payload bytes only (never the 3 header bytes)
//! - payload: fixed packed little-endian records, one shape per code
//!
//! Bounded strings on the wire are fixed-size fields: `[u8 len][N bytes]`
//! always occupying `1 + N` bytes with the unused tail zero-filled. This
//! crate parses client payloads and builds complete server packets
//! (header included) as `bytes::Bytes`, ready to be queued and shared
//! across listeners without copying.

pub mod codes;
pub mod dice;
pub mod flags;
pub mod records;
pub mod time;

#[derive(Debug, Clone)]
pub enum WireError {
    TooShort { need: usize, got: usize },
    Malformed(&'static str),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::TooShort { need, got } => {
                write!(f, "payload too short: need {need}, got {got}")
            }
            WireError::Malformed(s) => write!(f, "malformed payload: {s}"),
        }
    }
}

impl std::error::Error for WireError {}
