//! Packet-level IO for the parley wire protocol.
//!
//! Every record on the wire starts with a three byte header: a one byte
//! record code and a little-endian `u16` payload size that does not count
//! the header itself. [`PacketReader`] reassembles records from a byte
//! stream and [`PacketWriter`] sends them, optionally through the
//! per-session block cipher negotiated during the handshake.

pub mod packet;

pub use packet::{Packet, PacketReader, PacketWriter, HEADER_LEN};
