//! `parleycrypt`: session cipher and server key material.
//!
//! Nothing here is general-purpose cryptography; the block cipher, its CBC
//! wrapping and the RSA key-file handling implement exactly what the wire
//! protocol mandates. Key schedules and secret buffers are zeroized on
//! drop.

pub mod digest;
pub mod rc6;
pub mod rsa;
