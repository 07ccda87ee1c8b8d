//! End-to-end sessions against a live server on a loopback socket.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use num_bigint::BigUint;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use parleycrypt::digest::md5_bytes;
use parleycrypt::rc6::session_pair;
use parleyd::{Config, Server};
use parleyio::{Packet, PacketReader, PacketWriter};
use parleyproto::codes::{
    CLIENT_SECURE_AUTH, CMD_CHAT, CMD_DICE, CMD_SET_FLAG, CMD_SET_NAME, CMD_SET_PASSWORD,
    SCMD_HIDE, SCMD_QUIT, SCMD_REFRESH, SCMD_SHOW, SCMD_UPDATE_SERVER, SERVER_AUTH,
    SERVER_DISCONNECT, SERVER_NONFATALDISCONNECT, SERVER_PLIST, SERVER_PUPDATE, SERVER_TEXT,
    SERVER_VERSIONINFO,
};
use parleyproto::flags::{PF_OFF, PF_SUPERADMIN};
use parleyproto::records;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("parley-session-{}-{tag}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn spawn_server(tag: &str) -> (SocketAddr, JoinHandle<anyhow::Result<()>>, PathBuf) {
    let dir = scratch_dir(tag);
    let cfg = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        accounts_path: dir.join("account.dat"),
        key_path: dir.join("server.key"),
    };
    let server = Server::bind(&cfg).await.unwrap();
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn(server.run());
    (addr, task, dir)
}

struct Client {
    reader: PacketReader<OwnedReadHalf>,
    writer: PacketWriter<OwnedWriteHalf>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (rd, wr) = stream.into_split();
        Self {
            reader: PacketReader::new(rd),
            writer: PacketWriter::new(wr),
        }
    }

    /// Greet, authenticate, and consume the session-start records.
    async fn login(addr: SocketAddr, name: &str, password: &str) -> (Self, i32) {
        let mut c = Self::connect(addr).await;
        c.greet().await;
        c.send(&records::client_auth(name.as_bytes(), &md5_bytes(password.as_bytes())))
            .await;
        let index = c.expect_session_start().await;
        (c, index)
    }

    async fn send(&mut self, record: &[u8]) {
        self.writer.send(record).await.unwrap();
    }

    async fn chat(&mut self, text: &str) {
        self.send(&records::client_cmd(CMD_CHAT, -1, 0, 0, text.as_bytes()))
            .await;
    }

    async fn recv(&mut self) -> Packet {
        self.reader.flush();
        timeout(Duration::from_secs(5), self.reader.read_packet())
            .await
            .expect("timed out waiting for a record")
            .expect("read failed")
            .expect("server closed the stream")
    }

    async fn recv_or_eof(&mut self) -> Option<Packet> {
        self.reader.flush();
        timeout(Duration::from_secs(5), self.reader.read_packet())
            .await
            .expect("timed out waiting for eof")
            .expect("read failed")
    }

    /// Next text record, skipping roster traffic.
    async fn recv_text(&mut self) -> String {
        loop {
            let p = self.recv().await;
            if p.code == SERVER_TEXT {
                return String::from_utf8_lossy(&p.payload[8..]).into_owned();
            }
        }
    }

    /// Next roster update, skipping anything else.
    async fn recv_update(&mut self) -> Bytes {
        loop {
            let p = self.recv().await;
            if p.code == SERVER_PUPDATE {
                return p.payload;
            }
        }
    }

    async fn greet(&mut self) -> Bytes {
        let p = self.recv().await;
        assert_eq!(p.code, SERVER_AUTH);
        p.payload
    }

    /// Version info, roster snapshot, then the update announcing us.
    async fn expect_session_start(&mut self) -> i32 {
        let v = self.recv().await;
        assert_eq!(v.code, SERVER_VERSIONINFO);
        let plist = self.recv().await;
        assert_eq!(plist.code, SERVER_PLIST);
        let index = i32::from_le_bytes(plist.payload[0..4].try_into().unwrap());
        let up = self.recv().await;
        assert_eq!(up.code, SERVER_PUPDATE);
        assert_eq!(update_index(&up.payload), index);
        index
    }

    /// One explanatory text, the final record, then EOF.
    async fn expect_refusal(&mut self, text: &str, code: u8) {
        let t = self.recv().await;
        assert_eq!(t.code, SERVER_TEXT);
        assert_eq!(String::from_utf8_lossy(&t.payload[8..]), text);
        let fin = self.recv().await;
        assert_eq!(fin.code, code);
        assert!(self.recv_or_eof().await.is_none());
    }
}

fn update_index(p: &[u8]) -> i32 {
    i32::from_le_bytes(p[0..4].try_into().unwrap())
}

fn update_name(p: &[u8]) -> String {
    let len = p[4] as usize;
    String::from_utf8_lossy(&p[5..5 + len]).into_owned()
}

fn update_flags(p: &[u8]) -> u64 {
    u64::from_le_bytes(p[53..61].try_into().unwrap())
}

#[tokio::test]
async fn rejects_garbage_first_record() {
    let (addr, _task, _dir) = spawn_server("garbage-auth").await;
    let mut c = Client::connect(addr).await;
    let greeting = c.greet().await;
    assert!(greeting.is_empty());
    c.send(&records::client_scmd(SCMD_QUIT)).await;
    c.expect_refusal("Invalid auth packet", SERVER_NONFATALDISCONNECT)
        .await;
}

#[tokio::test]
async fn first_login_gets_version_roster_and_update() {
    let (addr, _task, _dir) = spawn_server("first-login").await;
    let mut c = Client::connect(addr).await;
    c.greet().await;
    c.send(&records::client_auth(b"kim", &md5_bytes(b"secret")))
        .await;

    let v = c.recv().await;
    assert_eq!(v.code, SERVER_VERSIONINFO);
    assert_eq!(v.payload.len(), 31);
    assert_eq!(v.payload[0] as usize, records::SERVER_VERSION.len());
    assert_eq!(
        &v.payload[1..1 + records::SERVER_VERSION.len()],
        records::SERVER_VERSION.as_bytes()
    );

    let plist = c.recv().await;
    assert_eq!(plist.code, SERVER_PLIST);
    assert_eq!(plist.payload.len(), 8 + 61);
    assert_eq!(i32::from_le_bytes(plist.payload[0..4].try_into().unwrap()), 0);
    assert_eq!(i32::from_le_bytes(plist.payload[4..8].try_into().unwrap()), 1);
    let el = &plist.payload[8..];
    assert_eq!(el[0] as usize, 3);
    assert_eq!(&el[1..4], b"kim");

    let up = c.recv().await;
    assert_eq!(up.code, SERVER_PUPDATE);
    assert_eq!(update_index(&up.payload), 0);
    assert_eq!(update_name(&up.payload), "kim");
}

#[tokio::test]
async fn rejects_invalid_login_name() {
    let (addr, _task, _dir) = spawn_server("bad-login").await;
    let mut c = Client::connect(addr).await;
    c.greet().await;
    c.send(&records::client_auth(b"bad name", &md5_bytes(b"x")))
        .await;
    c.expect_refusal("Invalid login", SERVER_DISCONNECT).await;
}

#[tokio::test]
async fn rejects_wrong_password() {
    let (addr, _task, _dir) = spawn_server("wrong-password").await;
    let (_kim, _) = Client::login(addr, "kim", "secret").await;

    let mut c = Client::connect(addr).await;
    c.greet().await;
    c.send(&records::client_auth(b"kim", &md5_bytes(b"not-secret")))
        .await;
    c.expect_refusal("Invalid password", SERVER_DISCONNECT).await;
}

#[tokio::test]
async fn public_chat_reaches_everyone_online() {
    let (addr, _task, _dir) = spawn_server("public-chat").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, _) = Client::login(addr, "pat", "word").await;

    kim.chat("hello there").await;
    assert_eq!(pat.recv_text().await, "kim%/ %bwrites:%x hello there%x");
    assert_eq!(kim.recv_text().await, "kim%/ %bwrites:%x hello there%x");
}

#[tokio::test]
async fn private_chat_goes_to_the_target_only() {
    let (addr, _task, _dir) = spawn_server("private-chat").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, pat_index) = Client::login(addr, "pat", "word").await;
    let (mut ray, _) = Client::login(addr, "ray", "pass").await;

    kim.send(&records::client_cmd(CMD_CHAT, pat_index, 0, 0, b"psst"))
        .await;
    assert_eq!(pat.recv_text().await, "kim%/%p%g writes (private):%x psst%x");

    // The bystander's next text is the later public one, so the private
    // line never reached them.
    kim.chat("public now").await;
    assert_eq!(ray.recv_text().await, "kim%/ %bwrites:%x public now%x");
}

#[tokio::test]
async fn chat_markers_are_rejected() {
    let (addr, _task, _dir) = spawn_server("chat-markers").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;

    kim.send(&records::client_cmd(CMD_CHAT, -1, 0, 0, b"evil %p text"))
        .await;
    assert_eq!(
        kim.recv_text().await,
        "You cannot send %%p marker.\nevil %p text"
    );

    kim.send(&records::client_cmd(CMD_CHAT, -1, 0, 0, b"sly %/ text"))
        .await;
    assert_eq!(
        kim.recv_text().await,
        "You cannot send %%/ marker.\nsly %/ text"
    );
}

#[tokio::test]
async fn quit_removes_the_slot_and_frees_the_index() {
    let (addr, _task, _dir) = spawn_server("quit-slot").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, pat_index) = Client::login(addr, "pat", "word").await;
    assert_eq!(pat_index, 1);

    pat.send(&records::client_scmd(SCMD_QUIT)).await;
    let fin = pat.recv().await;
    assert_eq!(fin.code, SERVER_NONFATALDISCONNECT);
    assert!(pat.recv_or_eof().await.is_none());

    assert_eq!(kim.recv_text().await, "pat%/ has quit.");
    let up = kim.recv_update().await;
    assert_eq!(update_index(&up), 1);
    assert!(up[4..].iter().all(|&b| b == 0));

    let (_ray, ray_index) = Client::login(addr, "ray", "pass").await;
    assert_eq!(ray_index, 1);
}

#[tokio::test]
async fn quit_frees_the_slot_only_with_the_last_connection() {
    let (addr, _task, _dir) = spawn_server("sibling-quit").await;
    let (mut kim_a, _) = Client::login(addr, "kim", "secret").await;
    let (mut kim_b, kim_b_index) = Client::login(addr, "kim", "secret").await;
    assert_eq!(kim_b_index, 0);

    // The second login re-announced kim to every listener.
    let up = kim_a.recv_update().await;
    assert_eq!(update_index(&up), 0);

    kim_a.send(&records::client_scmd(SCMD_QUIT)).await;
    let fin = kim_a.recv().await;
    assert_eq!(fin.code, SERVER_NONFATALDISCONNECT);
    assert!(kim_a.recv_or_eof().await.is_none());

    // The slot survives the sibling, so the next player lands beside it
    // and the remaining connection sees no stale quit traffic.
    let (mut pat, pat_index) = Client::login(addr, "pat", "word").await;
    assert_eq!(pat_index, 1);
    let up = kim_b.recv_update().await;
    assert_eq!(update_index(&up), 1);
    assert_eq!(update_name(&up), "pat");

    kim_b.send(&records::client_scmd(SCMD_QUIT)).await;
    let fin = kim_b.recv().await;
    assert_eq!(fin.code, SERVER_NONFATALDISCONNECT);
    assert!(kim_b.recv_or_eof().await.is_none());

    assert_eq!(pat.recv_text().await, "kim%/ has quit.");
    let up = pat.recv_update().await;
    assert_eq!(update_index(&up), 0);
    assert!(up[4..].iter().all(|&b| b == 0));

    let (_ray, ray_index) = Client::login(addr, "ray", "pass").await;
    assert_eq!(ray_index, 0);
}

#[tokio::test]
async fn caps_connections_per_player() {
    let (addr, _task, _dir) = spawn_server("conn-cap").await;
    let mut held = Vec::new();
    for _ in 0..4 {
        let (c, index) = Client::login(addr, "kim", "secret").await;
        assert_eq!(index, 0);
        held.push(c);
    }

    let mut fifth = Client::connect(addr).await;
    fifth.greet().await;
    fifth
        .send(&records::client_auth(b"kim", &md5_bytes(b"secret")))
        .await;
    fifth
        .expect_refusal("Too many connections", SERVER_NONFATALDISCONNECT)
        .await;
}

#[tokio::test]
async fn framing_survives_unknown_records() {
    let (addr, _task, _dir) = spawn_server("unknown-code").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;

    let mut raw = vec![99u8];
    raw.extend_from_slice(&5u16.to_le_bytes());
    raw.extend_from_slice(b"extra");
    kim.send(&raw).await;
    assert_eq!(kim.recv_text().await, "Invalid command (code=99, size=5)");

    kim.chat("still here").await;
    assert_eq!(kim.recv_text().await, "kim%/ %bwrites:%x still here%x");
}

#[tokio::test]
async fn password_change_takes_effect_on_reconnect() {
    let (addr, _task, _dir) = spawn_server("set-password").await;
    let (mut kim, _) = Client::login(addr, "kim", "old-secret").await;

    let mut payload = Vec::new();
    payload.extend_from_slice(&md5_bytes(b"old-secret"));
    payload.extend_from_slice(&md5_bytes(b"new-secret"));
    kim.send(&records::client_cmd(CMD_SET_PASSWORD, -1, 0, 0, &payload))
        .await;
    assert_eq!(kim.recv_text().await, "Password set.");
    drop(kim);

    let mut stale = Client::connect(addr).await;
    stale.greet().await;
    stale
        .send(&records::client_auth(b"kim", &md5_bytes(b"old-secret")))
        .await;
    stale.expect_refusal("Invalid password", SERVER_DISCONNECT).await;

    let (_fresh, index) = Client::login(addr, "kim", "new-secret").await;
    assert_eq!(index, 0);
}

#[tokio::test]
async fn renaming_updates_the_roster() {
    let (addr, _task, _dir) = spawn_server("set-name").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, _) = Client::login(addr, "pat", "word").await;

    kim.send(&records::client_cmd(CMD_SET_NAME, -1, 0, 0, b"Kimberly"))
        .await;
    assert_eq!(kim.recv_text().await, "Name set: Kimberly");
    let up = pat.recv_update().await;
    assert_eq!(update_index(&up), 0);
    assert_eq!(update_name(&up), "Kimberly");

    kim.chat("renamed").await;
    assert_eq!(pat.recv_text().await, "Kimberly%/ %bwrites:%x renamed%x");
}

#[tokio::test]
async fn hide_and_show_announce_presence() {
    let (addr, _task, _dir) = spawn_server("hide-show").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, _) = Client::login(addr, "pat", "word").await;

    pat.send(&records::client_scmd(SCMD_HIDE)).await;
    assert_eq!(kim.recv_text().await, "pat%/ is offline.");
    let up = kim.recv_update().await;
    assert_eq!(update_index(&up), 1);
    assert!(update_flags(&up) & PF_OFF != 0);

    // Hidden players are cut out of public fan-out.
    kim.chat("anyone here").await;
    assert_eq!(kim.recv_text().await, "kim%/ %bwrites:%x anyone here%x");

    pat.send(&records::client_scmd(SCMD_SHOW)).await;
    assert_eq!(kim.recv_text().await, "pat%/ is online.");
    let up = kim.recv_update().await;
    assert!(update_flags(&up) & PF_OFF == 0);

    assert_eq!(pat.recv_text().await, "pat%/ is offline.");
    assert_eq!(pat.recv_text().await, "pat%/ is online.");
}

#[tokio::test]
async fn refresh_resends_the_roster() {
    let (addr, _task, _dir) = spawn_server("refresh").await;
    let (_kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, pat_index) = Client::login(addr, "pat", "word").await;

    pat.send(&records::client_scmd(SCMD_REFRESH)).await;
    let plist = loop {
        let p = pat.recv().await;
        if p.code == SERVER_PLIST {
            break p;
        }
    };
    assert_eq!(
        i32::from_le_bytes(plist.payload[0..4].try_into().unwrap()),
        pat_index
    );
    assert_eq!(
        i32::from_le_bytes(plist.payload[4..8].try_into().unwrap()),
        2
    );
}

#[tokio::test]
async fn admin_ban_blocks_future_logins() {
    let (addr, _task, _dir) = spawn_server("ban-flag").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (pat, pat_index) = Client::login(addr, "pat", "word").await;

    kim.send(&records::client_cmd(CMD_SET_FLAG, pat_index, 8, 0, b""))
        .await;
    assert_eq!(kim.recv_text().await, "Flag set: ban");
    drop(pat);

    let mut again = Client::connect(addr).await;
    again.greet().await;
    again
        .send(&records::client_auth(b"pat", &md5_bytes(b"word")))
        .await;
    again
        .expect_refusal("Account is banned", SERVER_DISCONNECT)
        .await;
}

#[tokio::test]
async fn superadmin_bit_cannot_be_toggled() {
    let (addr, _task, _dir) = spawn_server("superadmin-bit").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, pat_index) = Client::login(addr, "pat", "word").await;

    kim.send(&records::client_cmd(CMD_SET_FLAG, -1, 3, 0, b""))
        .await;
    assert_eq!(kim.recv_text().await, "Check your privilege.");
    kim.send(&records::client_cmd(CMD_SET_FLAG, pat_index, 3, 0, b""))
        .await;
    assert_eq!(kim.recv_text().await, "Check your privilege.");

    pat.send(&records::client_cmd(CMD_SET_FLAG, -1, 3, 0, b""))
        .await;
    assert_eq!(pat.recv_text().await, "Check your privilege.");

    // The roster still shows the bit where it was: set on the first
    // account, clear on the second.
    kim.send(&records::client_scmd(SCMD_REFRESH)).await;
    let plist = loop {
        let p = kim.recv().await;
        if p.code == SERVER_PLIST {
            break p;
        }
    };
    let kim_el = &plist.payload[8..8 + 61];
    let kim_flags = u64::from_le_bytes(kim_el[49..57].try_into().unwrap());
    assert_ne!(kim_flags & PF_SUPERADMIN, 0);
    let pat_el = &plist.payload[8 + 61..8 + 2 * 61];
    let pat_flags = u64::from_le_bytes(pat_el[49..57].try_into().unwrap());
    assert_eq!(pat_flags & PF_SUPERADMIN, 0);
}

#[tokio::test]
async fn chat_gate_flag_blocks_public_messages() {
    let (addr, _task, _dir) = spawn_server("chat-gate").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, pat_index) = Client::login(addr, "pat", "word").await;

    kim.send(&records::client_cmd(CMD_SET_FLAG, pat_index, 4, 0, b""))
        .await;
    assert_eq!(kim.recv_text().await, "Flag set: no_publicchat");

    pat.chat("am i muted").await;
    assert_eq!(
        pat.recv_text().await,
        "You cannot write public messages.\nam i muted"
    );
}

#[tokio::test]
async fn shadow_banned_chat_stays_with_the_sender() {
    let (addr, _task, _dir) = spawn_server("shadow-ban").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, pat_index) = Client::login(addr, "pat", "word").await;

    kim.send(&records::client_cmd(CMD_SET_FLAG, pat_index, 11, 0, b""))
        .await;
    assert_eq!(kim.recv_text().await, "Flag set: shadow_ban");

    pat.chat("can anyone see this").await;
    assert_eq!(
        pat.recv_text().await,
        "pat%/ %bwrites:%x can anyone see this%x"
    );

    // The admin's next text is their own later message, so the banned
    // player's line never left their own session.
    kim.chat("hello").await;
    assert_eq!(kim.recv_text().await, "kim%/ %bwrites:%x hello%x");
    assert_eq!(pat.recv_text().await, "kim%/ %bwrites:%x hello%x");
}

#[tokio::test]
async fn dice_rolls_are_broadcast_and_bounded() {
    let (addr, _task, _dir) = spawn_server("dice").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, _) = Client::login(addr, "pat", "word").await;

    // Packed roll spec: count 2, size 6, modifier +3.
    let packed = i32::from_le_bytes([2, 6, 3, 0]);
    kim.send(&records::client_cmd(CMD_DICE, -1, packed, 0, b""))
        .await;
    let text = pat.recv_text().await;
    let total: i32 = text
        .strip_prefix("kim%/ throws 2d6+3 = ")
        .unwrap()
        .parse()
        .unwrap();
    assert!((5..=15).contains(&total));
    let own = kim.recv_text().await;
    assert!(own.starts_with("kim%/ throws 2d6+3 = "));

    kim.send(&records::client_cmd(
        CMD_DICE,
        -2,
        i32::from_le_bytes([3, 1, 0, 0]),
        0,
        b"",
    ))
    .await;
    assert_eq!(kim.recv_text().await, "You throw 3d1 = 3");
}

#[tokio::test]
async fn admin_shutdown_notifies_everyone_and_saves() {
    let (addr, task, dir) = spawn_server("admin-shutdown").await;
    let (mut kim, _) = Client::login(addr, "kim", "secret").await;
    let (mut pat, _) = Client::login(addr, "pat", "word").await;

    pat.send(&records::client_scmd(SCMD_UPDATE_SERVER)).await;
    assert_eq!(pat.recv_text().await, "Check your privilege.");

    kim.send(&records::client_scmd(SCMD_UPDATE_SERVER)).await;

    assert_eq!(pat.recv_text().await, "Server is shutting down.");
    let fin = pat.recv().await;
    assert_eq!(fin.code, SERVER_NONFATALDISCONNECT);
    let last = pat.recv().await;
    assert_eq!(last.code, SERVER_DISCONNECT);
    assert!(pat.recv_or_eof().await.is_none());

    drop(pat);
    drop(kim);
    let res = timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    res.unwrap();
    assert!(dir.join("account.dat").exists());
}

const MERSENNE_P: &str = "6864797660130609714981900799081393217269435300143305409394463459185543183397656052122559640661454554977296311391480858037121987999716643812574028291115057151";
const MERSENNE_Q: &str = "531137992816767098689588206552468627329593117727031923199444138200403559860852242739162502265229285668889329486246501015346579337652707239409519978766587351943831270835393219031728127";
const MODULUS_N: &str = "3646154850295011369707131011438711095400799139943170490872585628683549034362552065955809589514611470241298944167703929337528884908857116141935206466329731087514964112054543019336536216107629523597606330154669196064144182472739556974502462402438903115845725630946428943768540714098264727068026730424033578827886916761701429264950573899186177";

#[tokio::test]
async fn secure_auth_establishes_a_ciphered_session() {
    let dir = scratch_dir("secure-auth");
    std::fs::write(
        dir.join("server.key"),
        format!("65537\n{MERSENNE_P}\n{MERSENNE_Q}\n{MODULUS_N}\n7\n"),
    )
    .unwrap();
    let cfg = Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        accounts_path: dir.join("account.dat"),
        key_path: dir.join("server.key"),
    };
    let server = Server::bind(&cfg).await.unwrap();
    let addr = server.local_addr().unwrap();
    let _task = tokio::spawn(server.run());

    let mut c = Client::connect(addr).await;
    let greeting = c.greet().await;
    let nlen = u16::from_le_bytes(greeting[0..2].try_into().unwrap()) as usize;
    let modulus = BigUint::from_bytes_be(&greeting[2..2 + nlen]);
    assert_eq!(
        modulus,
        BigUint::parse_bytes(MODULUS_N.as_bytes(), 10).unwrap()
    );

    let session_key: [u8; 32] = *b"0123456789abcdef0123456789abcdef";
    let blob = records::secure_blob(b"kim", &md5_bytes(b"secret"), &session_key);
    let ciphertext = BigUint::from_bytes_be(&blob)
        .modpow(&BigUint::from(65537u32), &modulus)
        .to_bytes_be();

    let mut record = Vec::with_capacity(3 + ciphertext.len());
    record.push(CLIENT_SECURE_AUTH);
    record.extend_from_slice(&(ciphertext.len() as u16).to_le_bytes());
    record.extend_from_slice(&ciphertext);
    c.send(&record).await;

    let (send_cipher, recv_cipher) = session_pair(&session_key).unwrap();
    c.writer.install_cipher(send_cipher);
    c.reader.install_cipher(recv_cipher);

    let index = c.expect_session_start().await;
    assert_eq!(index, 0);

    c.chat("over the wire").await;
    assert_eq!(c.recv_text().await, "kim%/ %bwrites:%x over the wire%x");
}
