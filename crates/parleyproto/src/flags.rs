//! Account flag bitset.
//!
//! Stored as an atomic `u64` on the account. Volatile bits describe live
//! connection state and are stripped from persistence in both directions.
//! Hidden bits never appear in any roster element or update the server
//! sends.

/// Game moderator rights.
pub const PF_GAMEADMIN: u64 = 1 << 0;
/// Player asked to appear offline.
pub const PF_OFF: u64 = 1 << 1;
/// Locked account; quit requests are denied while set.
pub const PF_LOCK: u64 = 1 << 2;
/// Full rights. Granted to the first account ever created and never
/// togglable through the flag command.
pub const PF_SUPERADMIN: u64 = 1 << 3;
pub const PF_NOCHAT: u64 = 1 << 4;
pub const PF_NOALLYCHAT: u64 = 1 << 5;
pub const PF_NOPRIVCHAT: u64 = 1 << 6;
pub const PF_NOGAME: u64 = 1 << 7;
/// Banned; authentication is rejected.
pub const PF_NOCONNECT: u64 = 1 << 8;
/// Last connection dropped without an explicit quit.
pub const PF_LOST: u64 = 1 << 9;
/// Set on every created account except the very first.
pub const PF_NEW_PLAYER: u64 = 1 << 10;
/// Public messages from this account reach only its own listeners.
pub const PF_SHADOWBAN: u64 = 1 << 11;

pub const PF_VOLATILE_FLAGS: u64 = PF_OFF | PF_LOST;
pub const PF_HIDDEN_FLAGS: u64 = PF_SHADOWBAN;

const FLAG_NAMES: [&str; 12] = [
    "moderator",
    "offline",
    "hold",
    "administrator",
    "no_publicchat",
    "no_allychat",
    "no_privatechat",
    "no_game",
    "ban",
    "???",
    "???",
    "shadow_ban",
];

/// Human name for a flag bit index, `"???"` for unnamed bits.
pub fn flag_name(bit: u32) -> &'static str {
    FLAG_NAMES.get(bit as usize).copied().unwrap_or("???")
}
