//! Per-connection outbound queue and the broadcast hub.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::players::{self, Player};
use parleyproto::codes::SERVER_NONFATALDISCONNECT;
use parleyproto::records;
use parleyproto::time::ole_now;

/// Connections one player may hold at once.
pub const MAX_CONNS_PER_PLAYER: u32 = 4;

/// Queue item for the writer task: a packet to deliver, or `None` to wake
/// the writer so it can notice the lifecycle flags.
pub type QueueItem = Option<Bytes>;

pub struct Listener {
    pub player: Arc<Player>,
    pub peer: SocketAddr,
    pub secured: bool,
    tx: mpsc::UnboundedSender<QueueItem>,
    quit: AtomicBool,
    stop: AtomicBool,
    drain: AtomicBool,
}

impl Listener {
    pub fn push(&self, packet: Bytes) {
        let _ = self.tx.send(Some(packet));
    }

    /// Queue a server text record stamped with the current time.
    pub fn push_text(&self, text: &str) {
        self.push(records::server_text(ole_now(), text));
    }

    /// Client asked to leave; the writer closes with a non-fatal record.
    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
        let _ = self.tx.send(None);
    }

    /// Server forces the close; the writer closes with a fatal record.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.tx.send(None);
    }

    /// Receiver is done; the writer should finish the queue and close.
    pub fn drain(&self) {
        self.drain.store(true, Ordering::Relaxed);
        let _ = self.tx.send(None);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn closing(&self) -> bool {
        self.stopped() || self.quit_requested() || self.drain.load(Ordering::Relaxed)
    }
}

pub struct ListenerHub {
    list: tokio::sync::Mutex<Vec<Arc<Listener>>>,
}

impl Default for ListenerHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerHub {
    pub fn new() -> Self {
        Self {
            list: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a connection for `player`, enforcing the per-player cap.
    pub async fn add(
        &self,
        player: Arc<Player>,
        peer: SocketAddr,
        secured: bool,
        tx: mpsc::UnboundedSender<QueueItem>,
    ) -> Option<Arc<Listener>> {
        let mut list = self.list.lock().await;
        if player.conn_count.fetch_add(1, Ordering::Relaxed) >= MAX_CONNS_PER_PLAYER {
            player.conn_count.fetch_sub(1, Ordering::Relaxed);
            return None;
        }

        let listener = Arc::new(Listener {
            player,
            peer,
            secured,
            tx,
            quit: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            drain: AtomicBool::new(false),
        });
        list.push(listener.clone());
        Some(listener)
    }

    /// Detach a connection; returns how many the player still has.
    pub async fn remove(&self, listener: &Arc<Listener>) -> u32 {
        let mut list = self.list.lock().await;
        list.retain(|l| !Arc::ptr_eq(l, listener));
        listener.player.conn_count.fetch_sub(1, Ordering::Relaxed) - 1
    }

    /// Queue `packet` on every listener passing `pred`. The packet bytes
    /// are shared, not copied, across queues.
    pub async fn broadcast(&self, packet: Bytes, pred: impl Fn(&Listener) -> bool) {
        let list = self.list.lock().await;
        for l in list.iter() {
            if pred(l) {
                l.push(packet.clone());
            }
        }
    }

    /// Text broadcast stamped with the current time.
    pub async fn broadcast_text(&self, text: &str, pred: impl Fn(&Listener) -> bool) {
        self.broadcast(records::server_text(ole_now(), text), pred)
            .await;
    }

    /// Fan a player's roster row out to everyone.
    pub async fn update_player(&self, player: &Player) {
        let packet = players::update_packet(player).await;
        self.broadcast(packet, |_| true).await;
    }

    /// Fan the all-zero "removed" row out to everyone.
    pub async fn update_removed(&self, index: u32) {
        self.broadcast(players::removed_packet(index), |_| true).await;
    }

    /// Global stop: every client gets a polite goodbye queued before the
    /// forced close.
    pub async fn stop_all(&self) {
        let list = self.list.lock().await;
        for l in list.iter() {
            l.push(records::header_only(SERVER_NONFATALDISCONNECT));
            l.stop();
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.list.lock().await.is_empty()
    }
}
