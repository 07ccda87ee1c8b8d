//! Record, command and short-command identifiers.

pub const SERVER_AUTH: u8 = 255;

pub const CLIENT_AUTH: u8 = 0;
pub const SERVER_TEXT: u8 = 1;
pub const CLIENT_CMD: u8 = 2;
pub const CLIENT_SCMD: u8 = 3;
pub const SERVER_PLIST: u8 = 4;
pub const SERVER_DISCONNECT: u8 = 5;
pub const SERVER_VERSIONINFO: u8 = 6;

pub const SERVER_PUPDATE: u8 = 14;

pub const CLIENT_SECURE_AUTH: u8 = 19;
pub const SERVER_NONFATALDISCONNECT: u8 = 20;

pub const CMD_NONE: u16 = 0;
pub const CMD_CHAT: u16 = 1;
pub const CMD_SET_EMAIL: u16 = 2;
pub const CMD_SET_PASSWORD: u16 = 3;
pub const CMD_SET_FLAG: u16 = 4;
pub const CMD_DISCONNECT: u16 = 5;
pub const CMD_INFO: u16 = 6;
pub const CMD_CHANGE: u16 = 7;
pub const CMD_SET_NAME: u16 = 8;
pub const CMD_CALL: u16 = 9;
pub const CMD_SET_NOTE: u16 = 10;
pub const CMD_SHOUT: u16 = 11;
pub const CMD_ADD_BAN: u16 = 12;

pub const CMD_CREATE_GAME: u16 = 13;
pub const CMD_DELETE_GAME: u16 = 14;
pub const CMD_GAME_OWNER: u16 = 15;
pub const CMD_ADD_PLAYER: u16 = 16;
pub const CMD_DELETE_PLAYER: u16 = 17;
pub const CMD_JOIN_GAME: u16 = 18;
pub const CMD_UPLOAD_MAP: u16 = 19;

pub const CMD_DICE: u16 = 20;

pub const SCMD_QUIT: u16 = 0;
pub const SCMD_HIDE: u16 = 1;
pub const SCMD_SHOW: u16 = 2;
pub const SCMD_REFRESH: u16 = 3;
/// Obsolete; rejected as an invalid command.
pub const SCMD_TIMEOUT_QUIT: u16 = 4;
/// No-op; doubles as the keepalive the server emits on an idle queue.
pub const SCMD_NONE: u16 = 5;
pub const SCMD_UPDATE_SERVER: u16 = 6;
pub const SCMD_CONFIRMATION: u16 = 7;
