//! Live player registry: stable slot indices bound to accounts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::accounts::Account;
use parleyproto::records::{self, MAX_PLAYERS};

#[derive(Debug)]
pub struct Player {
    pub index: u32,
    pub account: Arc<Account>,
    /// Live connections, capped by the listener hub.
    pub conn_count: AtomicU32,
}

pub struct PlayerRegistry {
    slots: tokio::sync::Mutex<Vec<Option<Arc<Player>>>>,
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            slots: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Bind an account to a slot. An existing player for the same account
    /// is reused; otherwise the lowest free slot, then a fresh one up to
    /// the wire-format cap.
    pub async fn attach(&self, account: &Arc<Account>) -> Option<Arc<Player>> {
        let mut slots = self.slots.lock().await;
        for player in slots.iter().flatten() {
            if Arc::ptr_eq(&player.account, account) {
                return Some(player.clone());
            }
        }

        let index = match slots.iter().position(|s| s.is_none()) {
            Some(free) => free,
            None => {
                if slots.len() >= MAX_PLAYERS {
                    return None;
                }
                slots.push(None);
                slots.len() - 1
            }
        };

        let player = Arc::new(Player {
            index: index as u32,
            account: account.clone(),
            conn_count: AtomicU32::new(0),
        });
        slots[index] = Some(player.clone());
        Some(player)
    }

    /// Clear the player's slot, making the index reusable. A slot that
    /// has since been handed to someone else is left alone.
    pub async fn remove(&self, player: &Arc<Player>) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(player.index as usize) {
            Some(slot) if slot.as_ref().map_or(false, |p| Arc::ptr_eq(p, player)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// True while `player` still occupies its slot.
    pub async fn holds(&self, player: &Arc<Player>) -> bool {
        let slots = self.slots.lock().await;
        slots
            .get(player.index as usize)
            .and_then(|slot| slot.as_ref())
            .map_or(false, |p| Arc::ptr_eq(p, player))
    }

    pub async fn get(&self, index: i32) -> Option<Arc<Player>> {
        let slots = self.slots.lock().await;
        usize::try_from(index)
            .ok()
            .and_then(|i| slots.get(i).cloned().flatten())
    }

    /// Full roster packet. The count covers every slot, empty ones
    /// included, so indices stay stable on the client side.
    pub async fn snapshot(&self, self_index: u32) -> Bytes {
        let slots = self.slots.lock().await;
        let mut entries: Vec<Option<(String, u64)>> = Vec::with_capacity(slots.len());
        for slot in slots.iter() {
            match slot {
                Some(p) => {
                    let name = p.account.display_name().await;
                    let flags = p.account.flags.load(Ordering::Relaxed);
                    entries.push(Some((name, flags)));
                }
                None => entries.push(None),
            }
        }
        drop(slots);

        records::player_list(
            self_index as i32,
            entries
                .iter()
                .map(|e| e.as_ref().map(|(name, flags)| (name.as_bytes(), *flags))),
        )
    }

    /// Display name of the player at `index`, or a diagnostic when the
    /// slot is empty.
    pub async fn name_by_index(&self, index: i32) -> String {
        let found = self.get(index).await;
        match found {
            Some(p) => p.account.display_name().await,
            None => format!("Wrong index {index}"),
        }
    }
}

/// Roster-row packet for the player's current visible state.
pub async fn update_packet(player: &Player) -> Bytes {
    let name = player.account.display_name().await;
    let flags = player.account.flags.load(Ordering::Relaxed);
    records::player_update(player.index as i32, Some((name.as_bytes(), flags)))
}

/// Roster-row packet announcing the slot is empty.
pub fn removed_packet(index: u32) -> Bytes {
    records::player_update(index as i32, None)
}
