//! Packet parsing and building.
//!
//! Client payloads are parsed zero-copy: decoded text fields are `Bytes`
//! slices of the input payload. Server packets are built complete, header
//! included, so one broadcast allocates once and clones cheaply into every
//! listener queue.

use bytes::{BufMut, Bytes, BytesMut};

use crate::WireError;
use crate::codes::{
    CLIENT_AUTH, CLIENT_CMD, CLIENT_SCMD, SCMD_NONE, SERVER_AUTH, SERVER_PLIST, SERVER_PUPDATE,
    SERVER_TEXT, SERVER_VERSIONINFO,
};
use crate::flags::PF_HIDDEN_FLAGS;

pub const HEADER_LEN: usize = 3;

/// Plain auth payload: `[u8 len][16 name bytes][16-byte digest]`.
pub const AUTH_PAYLOAD_LEN: usize = 33;
/// Secure auth plaintext: the plain auth fields plus a 32-byte session key.
pub const SECURE_BLOB_LEN: usize = 65;
/// Command payload prefix: `u16 cmd` + three `i32` parameters.
pub const CMD_PREFIX_LEN: usize = 14;
/// Longest text a server-text record can carry (`8 + len` must fit in u16).
pub const MAX_TEXT_LEN: usize = 65527;

/// Roster element: `[u8 len][48 name bytes][u64 flags][i32 gindex]`.
pub const PLAYER_ELEMENT_LEN: usize = 61;
/// Largest roster the player-list payload can describe.
pub const MAX_PLAYERS: usize = 65527 / PLAYER_ELEMENT_LEN;

pub const SERVER_VERSION: &str = "EPClient v0.16";

fn put_header(buf: &mut BytesMut, code: u8, size: u16) {
    buf.put_u8(code);
    buf.put_u16_le(size);
}

/// Fixed bounded string field: length byte + `cap` data bytes, tail zeroed.
fn put_fixed_str(buf: &mut BytesMut, s: &[u8], cap: usize) {
    let len = s.len().min(cap);
    buf.put_u8(len as u8);
    buf.put_slice(&s[..len]);
    buf.put_bytes(0, cap - len);
}

pub fn parse_auth(p: Bytes) -> Result<(Bytes, [u8; 16]), WireError> {
    if p.len() != AUTH_PAYLOAD_LEN {
        return Err(WireError::Malformed("auth payload must be 33 bytes"));
    }

    let len = p[0] as usize;
    if len > 16 {
        return Err(WireError::Malformed("login length exceeds its field"));
    }

    let mut digest = [0u8; 16];
    digest.copy_from_slice(&p[17..33]);
    Ok((p.slice(1..1 + len), digest))
}

pub fn parse_secure_blob(p: &[u8]) -> Result<(Bytes, [u8; 16], [u8; 32]), WireError> {
    if p.len() != SECURE_BLOB_LEN {
        return Err(WireError::Malformed("secure blob must be 65 bytes"));
    }

    let len = p[0] as usize;
    if len > 16 {
        return Err(WireError::Malformed("login length exceeds its field"));
    }

    let mut digest = [0u8; 16];
    digest.copy_from_slice(&p[17..33]);
    let mut ckey = [0u8; 32];
    ckey.copy_from_slice(&p[33..65]);
    Ok((Bytes::copy_from_slice(&p[1..1 + len]), digest, ckey))
}

#[derive(Debug, Clone)]
pub struct CmdRec {
    pub cmd: u16,
    pub v0: i32,
    pub v1: i32,
    pub v2: i32,
    pub text: Bytes,
}

/// Command payload: `u16 cmd` + `i32 v0, v1, v2` + trailing text bytes.
pub fn parse_cmd(p: Bytes) -> Result<CmdRec, WireError> {
    if p.len() < CMD_PREFIX_LEN {
        return Err(WireError::TooShort {
            need: CMD_PREFIX_LEN,
            got: p.len(),
        });
    }

    Ok(CmdRec {
        cmd: u16::from_le_bytes([p[0], p[1]]),
        v0: i32::from_le_bytes([p[2], p[3], p[4], p[5]]),
        v1: i32::from_le_bytes([p[6], p[7], p[8], p[9]]),
        v2: i32::from_le_bytes([p[10], p[11], p[12], p[13]]),
        text: p.slice(CMD_PREFIX_LEN..),
    })
}

pub fn parse_scmd(p: &[u8]) -> Result<u16, WireError> {
    if p.len() != 2 {
        return Err(WireError::Malformed("short command payload must be 2 bytes"));
    }
    Ok(u16::from_le_bytes([p[0], p[1]]))
}

/// Login charset: ASCII alphanumerics plus `_ + - = . ( )`, non-empty.
pub fn is_login_valid(login: &[u8]) -> bool {
    !login.is_empty()
        && login
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || b"_+-=.()".contains(b))
}

/// Auth record as a client sends it.
pub fn client_auth(login: &[u8], digest: &[u8; 16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + AUTH_PAYLOAD_LEN);
    put_header(&mut buf, CLIENT_AUTH, AUTH_PAYLOAD_LEN as u16);
    put_fixed_str(&mut buf, login, 16);
    buf.put_slice(digest);
    buf.freeze()
}

/// Secure-auth plaintext blob: the plain auth fields plus the session key.
/// This is what the client encrypts under the server's public key.
pub fn secure_blob(login: &[u8], digest: &[u8; 16], key: &[u8; 32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SECURE_BLOB_LEN);
    put_fixed_str(&mut buf, login, 16);
    buf.put_slice(digest);
    buf.put_slice(key);
    buf.freeze()
}

/// Command record as a client sends it.
pub fn client_cmd(cmd: u16, v0: i32, v1: i32, v2: i32, text: &[u8]) -> Bytes {
    let size = CMD_PREFIX_LEN + text.len();
    debug_assert!(size <= u16::MAX as usize);

    let mut buf = BytesMut::with_capacity(HEADER_LEN + size);
    put_header(&mut buf, CLIENT_CMD, size as u16);
    buf.put_u16_le(cmd);
    buf.put_i32_le(v0);
    buf.put_i32_le(v1);
    buf.put_i32_le(v2);
    buf.put_slice(text);
    buf.freeze()
}

/// Short-command record as a client sends it.
pub fn client_scmd(scmd: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 2);
    put_header(&mut buf, CLIENT_SCMD, 2);
    buf.put_u16_le(scmd);
    buf.freeze()
}

/// Greeting; carries the RSA modulus and signature when secure auth is on:
/// `[u16 nlen][n BE bytes][u16 slen][s BE bytes]`, empty otherwise.
pub fn greeting(rsa: Option<(&[u8], &[u8])>) -> Bytes {
    match rsa {
        None => header_only(SERVER_AUTH),
        Some((n, s)) => {
            let size = 2 + n.len() + 2 + s.len();
            debug_assert!(size <= u16::MAX as usize);

            let mut buf = BytesMut::with_capacity(HEADER_LEN + size);
            put_header(&mut buf, SERVER_AUTH, size as u16);
            buf.put_u16_le(n.len() as u16);
            buf.put_slice(n);
            buf.put_u16_le(s.len() as u16);
            buf.put_slice(s);
            buf.freeze()
        }
    }
}

pub fn header_only(code: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    put_header(&mut buf, code, 0);
    buf.freeze()
}

/// Server-side keepalive: a short-command packet carrying the no-op.
pub fn keepalive() -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 2);
    put_header(&mut buf, CLIENT_SCMD, 2);
    buf.put_u16_le(SCMD_NONE);
    buf.freeze()
}

pub fn version_info() -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 31);
    put_header(&mut buf, SERVER_VERSIONINFO, 31);
    put_fixed_str(&mut buf, SERVER_VERSION.as_bytes(), 30);
    buf.freeze()
}

/// Text record: `f64` timestamp + UTF-8 bytes, truncated to the wire cap.
pub fn server_text(stamp: f64, text: &str) -> Bytes {
    let data = text.as_bytes();
    let len = data.len().min(MAX_TEXT_LEN);

    let mut buf = BytesMut::with_capacity(HEADER_LEN + 8 + len);
    put_header(&mut buf, SERVER_TEXT, (8 + len) as u16);
    buf.put_f64_le(stamp);
    buf.put_slice(&data[..len]);
    buf.freeze()
}

fn put_element(buf: &mut BytesMut, name: &[u8], flags: u64, gindex: i32) {
    put_fixed_str(buf, name, 48);
    buf.put_u64_le(flags & !PF_HIDDEN_FLAGS);
    buf.put_i32_le(gindex);
}

/// Full roster snapshot: `i32 self` + `i32 count` + one element per slot.
/// Empty slots serialize as a zeroed name with `gindex = -1`.
pub fn player_list<'a, I>(self_index: i32, slots: I) -> Bytes
where
    I: ExactSizeIterator<Item = Option<(&'a [u8], u64)>>,
{
    let count = slots.len();
    let size = 8 + PLAYER_ELEMENT_LEN * count;
    debug_assert!(count <= MAX_PLAYERS);

    let mut buf = BytesMut::with_capacity(HEADER_LEN + size);
    put_header(&mut buf, SERVER_PLIST, size as u16);
    buf.put_i32_le(self_index);
    buf.put_i32_le(count as i32);

    for slot in slots {
        match slot {
            Some((name, flags)) => put_element(&mut buf, name, flags, -1),
            None => put_element(&mut buf, b"", 0, -1),
        }
    }

    buf.freeze()
}

/// Single-slot roster update. `None` is the all-zero "removed" element.
pub fn player_update(index: i32, element: Option<(&[u8], u64)>) -> Bytes {
    let size = 4 + PLAYER_ELEMENT_LEN;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + size);
    put_header(&mut buf, SERVER_PUPDATE, size as u16);
    buf.put_i32_le(index);

    match element {
        Some((name, flags)) => put_element(&mut buf, name, flags, -1),
        None => buf.put_bytes(0, PLAYER_ELEMENT_LEN),
    }

    buf.freeze()
}
