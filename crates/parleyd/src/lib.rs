//! Chat and presence daemon: greets each connection, authenticates it
//! against the account store, attaches it to a roster slot, then runs one
//! reader and one writer task per connection until quit, disconnect, or
//! global shutdown. All server-to-client traffic goes through per-listener
//! queues so a broadcast never blocks on a slow socket.

pub mod accounts;
pub mod listener;
pub mod players;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::accounts::{Account, AccountStore};
use crate::listener::{Listener, ListenerHub, QueueItem};
use crate::players::PlayerRegistry;
use parleycrypt::digest::{md5_bytes, stored_digest};
use parleycrypt::rc6::session_pair;
use parleycrypt::rsa::ServerKey;
use parleyio::{PacketReader, PacketWriter};
use parleyproto::codes::{
    CLIENT_AUTH, CLIENT_CMD, CLIENT_SCMD, CLIENT_SECURE_AUTH, CMD_ADD_BAN, CMD_ADD_PLAYER,
    CMD_CALL, CMD_CHANGE, CMD_CHAT, CMD_CREATE_GAME, CMD_DELETE_GAME, CMD_DELETE_PLAYER,
    CMD_DICE, CMD_DISCONNECT, CMD_GAME_OWNER, CMD_INFO, CMD_JOIN_GAME, CMD_NONE,
    CMD_SET_EMAIL, CMD_SET_FLAG, CMD_SET_NAME, CMD_SET_NOTE, CMD_SET_PASSWORD, CMD_SHOUT,
    SCMD_HIDE, SCMD_NONE, SCMD_QUIT, SCMD_REFRESH, SCMD_SHOW, SCMD_UPDATE_SERVER,
    SERVER_DISCONNECT, SERVER_NONFATALDISCONNECT,
};
use parleyproto::dice;
use parleyproto::flags::{
    flag_name, PF_LOCK, PF_LOST, PF_NOCHAT, PF_NOCONNECT, PF_NOPRIVCHAT, PF_OFF,
    PF_SHADOWBAN, PF_SUPERADMIN,
};
use parleyproto::records::{self, CmdRec};
use parleyproto::time::ole_now;

/// Pause before the first read of a freshly authenticated connection,
/// giving the client time to process the roster before it can talk.
const FIRST_READ_GRACE: Duration = Duration::from_millis(800);

/// Idle writers send a keepalive after this long without queue traffic.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

pub struct Config {
    pub listen: SocketAddr,
    pub accounts_path: PathBuf,
    pub key_path: PathBuf,
}

/// One-way latch tripped by Ctrl-C or the update-server command.
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

pub struct Server {
    listener: TcpListener,
    store: Arc<AccountStore>,
    registry: Arc<PlayerRegistry>,
    hub: Arc<ListenerHub>,
    key: Option<Arc<ServerKey>>,
    shutdown: Arc<Shutdown>,
}

impl Server {
    pub async fn bind(cfg: &Config) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(cfg.listen)
            .await
            .with_context(|| format!("bind {}", cfg.listen))?;

        let store = Arc::new(AccountStore::load(cfg.accounts_path.clone()));

        let key = match ServerKey::load(&cfg.key_path) {
            Ok(k) => {
                info!(path = %cfg.key_path.display(), "server key loaded");
                Some(Arc::new(k))
            }
            Err(e) => {
                warn!(path = %cfg.key_path.display(), err = %e, "no server key, secure auth disabled");
                None
            }
        };

        info!(
            listen = %listener.local_addr()?,
            accounts = store.count().await,
            "server listening"
        );

        Ok(Self {
            listener,
            store,
            registry: Arc::new(PlayerRegistry::new()),
            hub: Arc::new(ListenerHub::new()),
            key,
            shutdown: Arc::new(Shutdown::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    pub fn store_handle(&self) -> Arc<AccountStore> {
        self.store.clone()
    }

    /// Accept until the shutdown latch trips, then run the goodbye
    /// sequence and the final account save.
    pub async fn run(self) -> anyhow::Result<()> {
        let Server {
            listener,
            store,
            registry,
            hub,
            key,
            shutdown,
        } = self;

        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received");
                    shutdown.trigger();
                }
            });
        }

        loop {
            let (stream, peer) = tokio::select! {
                res = listener.accept() => res?,
                _ = shutdown.wait() => break,
            };
            debug!(peer = %peer, "connection accepted");
            let store = store.clone();
            let registry = registry.clone();
            let hub = hub.clone();
            let key = key.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_conn(stream, peer, store, registry, hub, key, shutdown).await
                {
                    warn!(peer = %peer, err = %e, "connection ended with error");
                }
            });
        }

        finish(&store, &hub).await;
        Ok(())
    }
}

/// Goodbye text to everyone, force every writer out, give the hub a few
/// seconds to empty, then the sealed final save.
async fn finish(store: &AccountStore, hub: &ListenerHub) {
    info!("server shutting down");
    hub.broadcast_text("Server is shutting down.", |_| true).await;
    hub.stop_all().await;

    for _ in 0..30 {
        if hub.is_empty().await {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    if let Err(e) = store.save_and_seal().await {
        warn!(err = %e, "final account save failed");
    }
}

async fn refuse<W: AsyncWrite + Unpin>(
    writer: &mut PacketWriter<W>,
    peer: SocketAddr,
    reason: &str,
    code: u8,
) -> anyhow::Result<()> {
    info!(peer = %peer, reason = %reason, "connection refused");
    writer.send(&records::server_text(ole_now(), reason)).await?;
    writer.send(&records::header_only(code)).await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_conn(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<AccountStore>,
    registry: Arc<PlayerRegistry>,
    hub: Arc<ListenerHub>,
    key: Option<Arc<ServerKey>>,
    shutdown: Arc<Shutdown>,
) -> anyhow::Result<()> {
    let (rd, wr) = stream.into_split();
    let mut reader = PacketReader::new(rd);
    let mut writer = PacketWriter::new(wr);

    let rsa = key
        .as_deref()
        .map(|k| (k.modulus_bytes(), k.signature_bytes()));
    writer.send(&records::greeting(rsa)).await?;

    let Some(first) = reader.read_packet().await? else {
        debug!(peer = %peer, "closed before auth");
        return Ok(());
    };

    // One record decides the whole handshake. Secure auth swaps the
    // session ciphers in before any reply goes out.
    let mut secured = false;
    let (login_raw, mut wire_digest) = match first.code {
        CLIENT_AUTH if first.payload.len() == records::AUTH_PAYLOAD_LEN => {
            match records::parse_auth(first.payload) {
                Ok(v) => v,
                Err(_) => {
                    return refuse(&mut writer, peer, "Invalid login", SERVER_DISCONNECT).await;
                }
            }
        }
        CLIENT_SECURE_AUTH => {
            let Some(k) = key.as_deref() else {
                return refuse(
                    &mut writer,
                    peer,
                    "Invalid auth packet",
                    SERVER_NONFATALDISCONNECT,
                )
                .await;
            };
            let mut blob = k.decrypt_padded(&first.payload, records::SECURE_BLOB_LEN);
            let parsed = records::parse_secure_blob(&blob);
            blob.zeroize();
            let Ok((login, digest, mut session_key)) = parsed else {
                return refuse(&mut writer, peer, "Invalid login", SERVER_DISCONNECT).await;
            };
            let pair = session_pair(&session_key);
            session_key.zeroize();
            let (send_cipher, recv_cipher) = pair?;
            writer.install_cipher(send_cipher);
            reader.install_cipher(recv_cipher);
            secured = true;
            (login, digest)
        }
        _ => {
            return refuse(
                &mut writer,
                peer,
                "Invalid auth packet",
                SERVER_NONFATALDISCONNECT,
            )
            .await;
        }
    };

    if !records::is_login_valid(&login_raw) {
        return refuse(&mut writer, peer, "Invalid login", SERVER_DISCONNECT).await;
    }
    let login = String::from_utf8_lossy(&login_raw).into_owned();

    let stored = stored_digest(&wire_digest);
    wire_digest.zeroize();

    let Some((account, created)) = store.find_or_create(&login, stored).await else {
        return refuse(&mut writer, peer, "Invalid password", SERVER_DISCONNECT).await;
    };
    if created {
        save_store(&store).await;
    }

    if has_flag(&account, PF_NOCONNECT) {
        return refuse(&mut writer, peer, "Account is banned", SERVER_DISCONNECT).await;
    }

    let Some(player) = registry.attach(&account).await else {
        return refuse(
            &mut writer,
            peer,
            "Too many players connected",
            SERVER_NONFATALDISCONNECT,
        )
        .await;
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let Some(conn) = hub.add(player.clone(), peer, secured, tx).await else {
        return refuse(
            &mut writer,
            peer,
            "Too many connections",
            SERVER_NONFATALDISCONNECT,
        )
        .await;
    };

    info!(
        peer = %peer,
        name = %login,
        index = player.index,
        secured = secured,
        "player authenticated"
    );

    account.flags.fetch_and(!PF_LOST, Ordering::Relaxed);

    // From here on the listener is registered, so every exit path must
    // run the teardown below.
    let direct = async {
        writer.send(&records::version_info()).await?;
        writer.send(&registry.snapshot(player.index).await).await
    }
    .await;

    let res = match direct {
        Ok(()) => {
            hub.update_player(&player).await;
            let writer_task = tokio::spawn(write_loop(writer, rx, conn.clone()));
            let res = recv_loop(&mut reader, &conn, &store, &registry, &hub, &shutdown).await;
            conn.drain();
            let _ = writer_task.await;
            res
        }
        Err(e) => Err(e.into()),
    };

    teardown(&conn, &store, &registry, &hub).await;
    res
}

/// Post-disconnect bookkeeping: detach from the hub, and once the last
/// connection of the player is gone either drop the roster slot (quit)
/// or mark the player lost. While sibling connections remain the slot
/// stays put, and the roster is only touched when it still maps the
/// index to this player.
async fn teardown(
    conn: &Arc<Listener>,
    store: &AccountStore,
    registry: &PlayerRegistry,
    hub: &ListenerHub,
) {
    let remaining = hub.remove(conn).await;
    let player = &conn.player;

    if remaining == 0 {
        if conn.quit_requested() {
            if registry.remove(player).await {
                let name = player.account.display_name().await;
                broadcast_public(hub, conn, &format!("{name}%/ has quit.")).await;
                hub.update_removed(player.index).await;
                save_store(store).await;
                info!(name = %player.account.login, index = player.index, "player quit");
            }
        } else if registry.holds(player).await {
            player.account.flags.fetch_or(PF_LOST, Ordering::Relaxed);
            let name = player.account.display_name().await;
            broadcast_public(hub, conn, &format!("{name}%/ has lost connection.")).await;
            hub.update_player(player).await;
            info!(name = %player.account.login, index = player.index, "player lost connection");
        }
    }
    debug!(peer = %conn.peer, "connection closed");
}

/// Drains the outbound queue onto the socket. A 30 s lull produces a
/// keepalive; the `None` sentinel forces a flag recheck; once the
/// connection is closing, whatever is left in the queue goes out followed
/// by the final disconnect record.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: PacketWriter<W>,
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    conn: Arc<Listener>,
) {
    loop {
        if conn.closing() {
            break;
        }
        match timeout(KEEPALIVE_PERIOD, rx.recv()).await {
            Ok(Some(Some(packet))) => {
                if writer.send(&packet).await.is_err() {
                    return;
                }
            }
            Ok(Some(None)) => {}
            Ok(None) => break,
            Err(_) => {
                if writer.send(&records::keepalive()).await.is_err() {
                    return;
                }
            }
        }
    }

    while let Ok(item) = rx.try_recv() {
        if let Some(packet) = item {
            if writer.send(&packet).await.is_err() {
                return;
            }
        }
    }

    let code = if conn.stopped() {
        SERVER_DISCONNECT
    } else {
        SERVER_NONFATALDISCONNECT
    };
    let _ = writer.send(&records::header_only(code)).await;
    let _ = writer.flush().await;
}

enum Flow {
    Continue(Duration),
    Quit,
}

async fn recv_loop<R: AsyncRead + Unpin>(
    reader: &mut PacketReader<R>,
    conn: &Arc<Listener>,
    store: &Arc<AccountStore>,
    registry: &Arc<PlayerRegistry>,
    hub: &Arc<ListenerHub>,
    shutdown: &Arc<Shutdown>,
) -> anyhow::Result<()> {
    sleep(FIRST_READ_GRACE).await;

    loop {
        reader.flush();
        let Some(packet) = reader.read_packet().await? else {
            return Ok(());
        };
        if conn.closing() {
            return Ok(());
        }

        let size = packet.payload.len();
        let flow = match packet.code {
            CLIENT_CMD => match records::parse_cmd(packet.payload) {
                Ok(rec) => dispatch_cmd(rec, conn, store, registry, hub).await,
                Err(_) => invalid_shape(conn, CLIENT_CMD, size),
            },
            CLIENT_SCMD => match records::parse_scmd(&packet.payload) {
                Ok(scmd) => dispatch_scmd(scmd, conn, registry, hub, shutdown).await,
                Err(_) => invalid_shape(conn, CLIENT_SCMD, size),
            },
            code => invalid_shape(conn, code, size),
        };

        match flow {
            Flow::Continue(delay) => {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
            }
            Flow::Quit => return Ok(()),
        }
    }
}

fn invalid_shape(conn: &Listener, code: u8, size: usize) -> Flow {
    conn.push_text(&format!("Invalid command (code={code}, size={size})"));
    Flow::Continue(Duration::ZERO)
}

async fn dispatch_cmd(
    rec: CmdRec,
    conn: &Arc<Listener>,
    store: &Arc<AccountStore>,
    registry: &Arc<PlayerRegistry>,
    hub: &Arc<ListenerHub>,
) -> Flow {
    let account = &conn.player.account;
    match rec.cmd {
        CMD_NONE => Flow::Continue(Duration::ZERO),
        CMD_CHAT => handle_chat(rec, conn, registry, hub).await,
        CMD_DICE => handle_dice(rec, conn, registry, hub).await,
        CMD_SHOUT => {
            if !has_flag(account, PF_SUPERADMIN) {
                conn.push_text("Check your privilege.");
                return Flow::Continue(Duration::ZERO);
            }
            let msg = String::from_utf8_lossy(&rec.text).into_owned();
            let name = account.display_name().await;
            hub.broadcast_text(&format!("{name}%/ %bwrites:%x {msg}%x"), |_| true)
                .await;
            Flow::Continue(Duration::ZERO)
        }
        CMD_SET_EMAIL => handle_set_email(rec, conn, store).await,
        CMD_SET_PASSWORD => handle_set_password(rec, conn, store).await,
        CMD_SET_FLAG => handle_set_flag(rec, conn, store, registry, hub).await,
        CMD_SET_NAME => handle_set_name(rec, conn, store, registry, hub).await,
        CMD_DISCONNECT | CMD_INFO | CMD_CHANGE | CMD_CALL | CMD_SET_NOTE | CMD_ADD_BAN => {
            if has_flag(account, PF_SUPERADMIN) {
                conn.push_text("Not implemented.");
            } else {
                conn.push_text("Check your privilege.");
            }
            Flow::Continue(Duration::ZERO)
        }
        CMD_CREATE_GAME | CMD_DELETE_GAME | CMD_GAME_OWNER | CMD_ADD_PLAYER
        | CMD_DELETE_PLAYER | CMD_JOIN_GAME => {
            conn.push_text("Not implemented.");
            Flow::Continue(Duration::ZERO)
        }
        cmd => {
            conn.push_text(&format!(
                "Invalid command (CMD {cmd}, v0={}, v1={}, v2={})",
                rec.v0, rec.v1, rec.v2
            ));
            Flow::Continue(Duration::ZERO)
        }
    }
}

async fn handle_chat(
    rec: CmdRec,
    conn: &Arc<Listener>,
    registry: &PlayerRegistry,
    hub: &ListenerHub,
) -> Flow {
    let account = &conn.player.account;
    let msg = String::from_utf8_lossy(&rec.text).into_owned();
    let public_delay = Duration::from_millis(200 + rec.text.len() as u64);

    // Client-side markup markers cannot appear in user text; the client
    // unescapes %% back to a literal percent sign.
    if has_marker(&rec.text, b"%p") {
        conn.push_text(&format!("You cannot send %%p marker.\n{msg}"));
        return Flow::Continue(public_delay);
    }
    if has_marker(&rec.text, b"%/") {
        conn.push_text(&format!("You cannot send %%/ marker.\n{msg}"));
        return Flow::Continue(public_delay);
    }

    match (rec.v0, rec.v1, rec.v2) {
        (-1, 0, 0) => {
            if has_flag(account, PF_NOCHAT) {
                conn.push_text(&format!("You cannot write public messages.\n{msg}"));
                return Flow::Continue(public_delay);
            }
            clear_off_and_announce(hub, conn).await;
            let name = account.display_name().await;
            broadcast_public(hub, conn, &format!("{name}%/ %bwrites:%x {msg}%x")).await;
            Flow::Continue(public_delay)
        }
        (target, 0, 0) if target >= 0 => {
            if has_flag(account, PF_NOPRIVCHAT) {
                conn.push_text(&format!("You cannot write private messages.\n{msg}"));
                return Flow::Continue(public_delay);
            }
            if let Some(dest) = registry.get(target).await {
                let name = account.display_name().await;
                let packet = records::server_text(
                    ole_now(),
                    &format!("{name}%/%p%g writes (private):%x {msg}%x"),
                );
                hub.broadcast(packet, move |l| Arc::ptr_eq(&l.player, &dest))
                    .await;
            }
            Flow::Continue(Duration::from_millis(200 + rec.text.len() as u64 / 4))
        }
        (v0, v1, v2) => {
            conn.push_text(&format!(
                "Invalid command (CMD_CHAT, v0={v0}, v1={v1}, v2={v2})\n{msg}"
            ));
            Flow::Continue(public_delay)
        }
    }
}

async fn handle_dice(
    rec: CmdRec,
    conn: &Arc<Listener>,
    registry: &PlayerRegistry,
    hub: &ListenerHub,
) -> Flow {
    let account = &conn.player.account;
    let delay = Duration::from_millis(200);
    let roll = dice::format_dice(rec.v1, &mut rand::thread_rng());
    let own = conn.player.index as i32;

    match (rec.v0, rec.v2) {
        (-1, 0) => {
            if has_flag(account, PF_NOCHAT) {
                conn.push_text("You cannot write public messages.\n");
                return Flow::Continue(delay);
            }
            clear_off_and_announce(hub, conn).await;
            let name = account.display_name().await;
            broadcast_public(hub, conn, &format!("{name}%/ throws {roll}")).await;
            Flow::Continue(delay)
        }
        (v0, 0) if v0 == -2 || v0 == own => {
            conn.push_text(&format!("You throw {roll}"));
            Flow::Continue(delay)
        }
        (v0, 0) if v0 >= 0 => {
            if has_flag(account, PF_NOPRIVCHAT) {
                conn.push_text("You cannot write private messages.\n");
                return Flow::Continue(delay);
            }
            let target_name = registry.name_by_index(v0).await;
            if let Some(dest) = registry.get(v0).await {
                let name = account.display_name().await;
                let packet = records::server_text(
                    ole_now(),
                    &format!("{name}%/%p throws {roll} to you (private)"),
                );
                hub.broadcast(packet, move |l| Arc::ptr_eq(&l.player, &dest))
                    .await;
            }
            conn.push_text(&format!("You throw {roll}%/ to {target_name}"));
            Flow::Continue(delay)
        }
        _ => {
            conn.push_text(&format!(
                "Invalid command (CMD_DICE, v0={}, v1={}, v2={})",
                rec.v0, rec.v1, rec.v2
            ));
            Flow::Continue(delay)
        }
    }
}

async fn handle_set_email(rec: CmdRec, conn: &Arc<Listener>, store: &Arc<AccountStore>) -> Flow {
    let delay = Duration::from_secs(1);
    let account = &conn.player.account;

    if rec.text.len() > 255 {
        conn.push_text("Invalid e-mail.");
        return Flow::Continue(delay);
    }

    if rec.v0 == -1 && rec.v1 == 0 && rec.v2 == 0 {
        let email = String::from_utf8_lossy(&rec.text).into_owned();
        account.profile.lock().await.email = email.clone();
        conn.push_text(&format!("E-mail set: {email}"));
        save_store(store).await;
    } else if has_flag(account, PF_SUPERADMIN) {
        conn.push_text("Not implemented.");
    } else {
        conn.push_text("Check your privilege.");
    }
    Flow::Continue(delay)
}

async fn handle_set_password(rec: CmdRec, conn: &Arc<Listener>, store: &Arc<AccountStore>) -> Flow {
    let delay = Duration::from_secs(4);
    let account = &conn.player.account;

    if rec.text.len() < 32 {
        conn.push_text("Invalid password.");
        return Flow::Continue(delay);
    }

    if rec.v0 == -1 {
        // Two wire digests back to back: proof of the old password, then
        // the new one. Only their rehash is ever stored.
        let old_stored = md5_bytes(&rec.text[..16]);
        let mut profile = account.profile.lock().await;
        if profile.digest != old_stored {
            drop(profile);
            conn.push_text("Invalid password.");
        } else {
            profile.digest = md5_bytes(&rec.text[16..32]);
            drop(profile);
            conn.push_text("Password set.");
            save_store(store).await;
        }
    } else if has_flag(account, PF_SUPERADMIN) {
        conn.push_text("Not implemented.");
    } else {
        conn.push_text("Check your privilege.");
    }
    Flow::Continue(delay)
}

async fn handle_set_flag(
    rec: CmdRec,
    conn: &Arc<Listener>,
    store: &Arc<AccountStore>,
    registry: &Arc<PlayerRegistry>,
    hub: &Arc<ListenerHub>,
) -> Flow {
    let account = &conn.player.account;

    if !(0..=63).contains(&rec.v1) {
        conn.push_text(&format!(
            "Invalid command (CMD_SET_FLAG, v0={}, v1={}, v2={})",
            rec.v0, rec.v1, rec.v2
        ));
        return Flow::Continue(Duration::ZERO);
    }
    let bit = rec.v1 as u32;
    if 1u64 << bit == PF_SUPERADMIN {
        conn.push_text("Check your privilege.");
        return Flow::Continue(Duration::ZERO);
    }

    let target = if rec.v0 == -1 {
        Some(conn.player.clone())
    } else if has_flag(account, PF_SUPERADMIN) {
        registry.get(rec.v0).await
    } else {
        conn.push_text("Check your privilege.");
        return Flow::Continue(Duration::ZERO);
    };
    let Some(target) = target else {
        conn.push_text(&format!(
            "Invalid command (CMD_SET_FLAG, v0={}, v1={}, v2={})",
            rec.v0, rec.v1, rec.v2
        ));
        return Flow::Continue(Duration::ZERO);
    };

    target.account.flags.fetch_xor(1u64 << bit, Ordering::Relaxed);
    save_store(store).await;
    hub.update_player(&target).await;
    conn.push_text(&format!("Flag set: {}", flag_name(bit)));
    Flow::Continue(Duration::ZERO)
}

async fn handle_set_name(
    rec: CmdRec,
    conn: &Arc<Listener>,
    store: &Arc<AccountStore>,
    registry: &Arc<PlayerRegistry>,
    hub: &Arc<ListenerHub>,
) -> Flow {
    let account = &conn.player.account;

    let target = if rec.v0 == -1 {
        Some(conn.player.clone())
    } else if has_flag(account, PF_SUPERADMIN) {
        registry.get(rec.v0).await
    } else {
        conn.push_text("Check your privilege.");
        return Flow::Continue(Duration::ZERO);
    };
    let Some(target) = target else {
        conn.push_text(&format!(
            "Invalid command (CMD_SET_NAME, v0={}, v1={}, v2={})",
            rec.v0, rec.v1, rec.v2
        ));
        return Flow::Continue(Duration::ZERO);
    };

    if rec.text.len() > 48 || rec.text.contains(&b'%') {
        conn.push_text("Invalid name.");
        return Flow::Continue(Duration::ZERO);
    }
    let name = String::from_utf8_lossy(&rec.text).into_owned();
    if !name.is_empty() && store.uniq_name_taken(&name, &target.account).await {
        conn.push_text("Name already taken.");
        return Flow::Continue(Duration::ZERO);
    }

    target.account.profile.lock().await.uniq_name = name.clone();
    if name.is_empty() {
        conn.push_text("Name cleared.");
    } else {
        conn.push_text(&format!("Name set: {name}"));
    }
    save_store(store).await;
    hub.update_player(&target).await;
    Flow::Continue(Duration::ZERO)
}

async fn dispatch_scmd(
    scmd: u16,
    conn: &Arc<Listener>,
    registry: &Arc<PlayerRegistry>,
    hub: &Arc<ListenerHub>,
    shutdown: &Arc<Shutdown>,
) -> Flow {
    let account = &conn.player.account;
    match scmd {
        SCMD_NONE => Flow::Continue(Duration::ZERO),
        SCMD_QUIT => {
            if has_flag(account, PF_LOCK) {
                conn.push_text("Account is locked.");
                Flow::Continue(Duration::ZERO)
            } else {
                conn.request_quit();
                Flow::Quit
            }
        }
        SCMD_HIDE => {
            let was = account.flags.fetch_or(PF_OFF, Ordering::Relaxed);
            if was & PF_OFF == 0 {
                let name = account.display_name().await;
                let me = conn.player.clone();
                broadcast_from(hub, conn, &format!("{name}%/ is offline."), move |l| {
                    only_online(l) || Arc::ptr_eq(&l.player, &me)
                })
                .await;
                hub.update_player(&conn.player).await;
            }
            Flow::Continue(Duration::from_millis(300))
        }
        SCMD_SHOW => {
            clear_off_and_announce(hub, conn).await;
            Flow::Continue(Duration::from_millis(300))
        }
        SCMD_REFRESH => {
            conn.push(registry.snapshot(conn.player.index).await);
            Flow::Continue(Duration::from_secs(1))
        }
        SCMD_UPDATE_SERVER => {
            if has_flag(account, PF_SUPERADMIN) {
                info!(name = %account.login, "shutdown requested");
                shutdown.trigger();
            } else {
                conn.push_text("Check your privilege.");
            }
            Flow::Continue(Duration::ZERO)
        }
        n => {
            conn.push_text(&format!("Invalid command (SCMD {n})"));
            Flow::Continue(Duration::ZERO)
        }
    }
}

fn has_flag(account: &Account, bit: u64) -> bool {
    account.flags.load(Ordering::Relaxed) & bit != 0
}

fn has_marker(text: &[u8], marker: &[u8; 2]) -> bool {
    text.windows(2).any(|w| w == marker)
}

fn only_online(l: &Listener) -> bool {
    l.player.account.flags.load(Ordering::Relaxed) & PF_OFF == 0
}

/// Public text from a player. Shadow-banned senders see their own words;
/// nobody else does.
async fn broadcast_from(
    hub: &ListenerHub,
    from: &Arc<Listener>,
    text: &str,
    pred: impl Fn(&Listener) -> bool,
) {
    if has_flag(&from.player.account, PF_SHADOWBAN) {
        let me = from.player.clone();
        hub.broadcast_text(text, move |l| Arc::ptr_eq(&l.player, &me))
            .await;
    } else {
        hub.broadcast_text(text, pred).await;
    }
}

async fn broadcast_public(hub: &ListenerHub, from: &Arc<Listener>, text: &str) {
    broadcast_from(hub, from, text, only_online).await;
}

/// Speaking in public clears hidden status; the return announces it.
async fn clear_off_and_announce(hub: &ListenerHub, conn: &Arc<Listener>) {
    let was = conn.player.account.flags.fetch_and(!PF_OFF, Ordering::Relaxed);
    if was & PF_OFF != 0 {
        let name = conn.player.account.display_name().await;
        broadcast_public(hub, conn, &format!("{name}%/ is online.")).await;
        hub.update_player(&conn.player).await;
    }
}

async fn save_store(store: &AccountStore) {
    if let Err(e) = store.save().await {
        warn!(err = %e, "account save failed");
    }
}
