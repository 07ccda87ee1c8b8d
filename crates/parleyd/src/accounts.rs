//! Account records and the flat-file store.
//!
//! The file is a sequence of binary records, each prefixed with a `u32`
//! byte size. Loading is forward-only and lenient: the first short or
//! ill-sized record ends the file. Saving rewrites the whole file through
//! a temp file and rename. Strings are variable here (`[u8 len][len
//! bytes]`), unlike their fixed-width form on the wire.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use zeroize::Zeroize;

use parleyproto::flags::{PF_NEW_PLAYER, PF_SUPERADMIN, PF_VOLATILE_FLAGS};

/// Flags + digest (8 + 16) and three length-prefixed strings, possibly
/// empty. Anything shorter cannot be a record.
const MIN_RECORD: usize = 27;

/// Mutable account fields, guarded separately from the store list so
/// roster snapshots can read names without holding the store lock.
#[derive(Debug, Default)]
pub struct Profile {
    /// md5 of the digest the client sends, never the password itself.
    pub digest: [u8; 16],
    pub uniq_name: String,
    pub email: String,
}

impl Drop for Profile {
    fn drop(&mut self) {
        self.digest.zeroize();
    }
}

#[derive(Debug)]
pub struct Account {
    pub login: String,
    pub flags: AtomicU64,
    pub profile: tokio::sync::Mutex<Profile>,
}

impl Account {
    /// Display name: the unique name when set, the login otherwise.
    pub async fn display_name(&self) -> String {
        let p = self.profile.lock().await;
        if p.uniq_name.is_empty() {
            self.login.clone()
        } else {
            p.uniq_name.clone()
        }
    }
}

pub struct AccountStore {
    path: PathBuf,
    inner: tokio::sync::Mutex<Vec<Arc<Account>>>,
    sealed: AtomicBool,
}

impl AccountStore {
    /// Read the account file, keeping every record up to the first
    /// malformed one. A missing file is an empty store, not an error.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut list = Vec::new();
        match std::fs::read(&path) {
            Ok(data) => {
                let mut cur = &data[..];
                while let Some((account, rest)) = parse_record(cur) {
                    list.push(Arc::new(account));
                    cur = rest;
                }
                info!(path = %path.display(), count = list.len(), "accounts loaded");
            }
            Err(e) => {
                warn!(path = %path.display(), err = %e, "account file not loaded, starting empty");
            }
        }
        Self {
            path,
            inner: tokio::sync::Mutex::new(list),
            sealed: AtomicBool::new(false),
        }
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Look up by exact login match. A digest mismatch on an existing
    /// account is an auth failure regardless of cause; an unknown login
    /// creates the account on the spot, under the same lock, so two first
    /// logins with one name cannot race into duplicates. Returns the
    /// account and whether it was created.
    pub async fn find_or_create(
        &self,
        login: &str,
        digest: [u8; 16],
    ) -> Option<(Arc<Account>, bool)> {
        let mut list = self.inner.lock().await;
        for acc in list.iter() {
            if acc.login == login {
                if acc.profile.lock().await.digest != digest {
                    return None;
                }
                return Some((acc.clone(), false));
            }
        }

        let flags = if list.is_empty() {
            PF_SUPERADMIN
        } else {
            PF_NEW_PLAYER
        };
        info!(name = %login, "new account registered");

        let acc = Arc::new(Account {
            login: login.to_owned(),
            flags: AtomicU64::new(flags),
            profile: tokio::sync::Mutex::new(Profile {
                digest,
                uniq_name: String::new(),
                email: String::new(),
            }),
        });
        list.push(acc.clone());
        Some((acc, true))
    }

    /// True when a different account already holds `name` as its unique
    /// display name.
    pub async fn uniq_name_taken(&self, name: &str, me: &Arc<Account>) -> bool {
        let list = self.inner.lock().await;
        for acc in list.iter() {
            if Arc::ptr_eq(acc, me) {
                continue;
            }
            if acc.profile.lock().await.uniq_name == name {
                return true;
            }
        }
        false
    }

    /// Rewrite the whole file atomically. A sealed store skips the write
    /// and keeps the last good file contents. The check sits under the
    /// store lock so it serializes with the sealing save.
    pub async fn save(&self) -> Result<()> {
        let list = self.inner.lock().await;
        if self.is_sealed() {
            warn!(path = %self.path.display(), "store sealed, save skipped");
            return Ok(());
        }
        let data = encode_all(&list).await;
        self.write_file(&data)
    }

    /// Final save during shutdown. Seals before releasing the lock, so no
    /// later write can touch the file.
    pub async fn save_and_seal(&self) -> Result<()> {
        let list = self.inner.lock().await;
        let data = encode_all(&list).await;
        let res = self.write_file(&data);
        self.seal();
        res
    }

    /// Stop all future saves without writing. The fatal-fault hook trips
    /// this so a crashing task never flushes a half-updated store over
    /// the file.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    fn write_file(&self, data: &[u8]) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename to {}", self.path.display()))?;
        Ok(())
    }
}

async fn encode_all(list: &[Arc<Account>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(list.len() * 64);
    for acc in list {
        let p = acc.profile.lock().await;
        encode_record(&mut out, acc, &p);
    }
    out
}

fn encode_record(out: &mut Vec<u8>, acc: &Account, p: &Profile) {
    let size = 8 + 16 + 1 + acc.login.len() + 1 + p.uniq_name.len() + 1 + p.email.len();
    out.extend_from_slice(&(size as u32).to_le_bytes());
    // volatile bits never persist
    let flags = acc.flags.load(Ordering::Relaxed) & !PF_VOLATILE_FLAGS;
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&p.digest);
    put_var_str(out, &acc.login);
    put_var_str(out, &p.uniq_name);
    put_var_str(out, &p.email);
}

fn put_var_str(out: &mut Vec<u8>, s: &str) {
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
}

fn parse_record(buf: &[u8]) -> Option<(Account, &[u8])> {
    if buf.len() < 4 {
        return None;
    }
    let size = u32::from_le_bytes(buf[0..4].try_into().ok()?) as usize;
    let rest = &buf[4..];
    if size < MIN_RECORD || rest.len() < size {
        return None;
    }
    let (rec, tail) = rest.split_at(size);

    let flags = u64::from_le_bytes(rec[0..8].try_into().ok()?);
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&rec[8..24]);

    let mut cur = &rec[24..];
    let login = take_var_str(&mut cur, 16)?;
    let uniq_name = take_var_str(&mut cur, 48)?;
    let email = take_var_str(&mut cur, 255)?;

    Some((
        Account {
            login,
            flags: AtomicU64::new(flags & !PF_VOLATILE_FLAGS),
            profile: tokio::sync::Mutex::new(Profile {
                digest,
                uniq_name,
                email,
            }),
        },
        tail,
    ))
}

fn take_var_str(cur: &mut &[u8], cap: usize) -> Option<String> {
    let (&len, rest) = cur.split_first()?;
    let len = len as usize;
    if len > cap || rest.len() < len {
        return None;
    }
    let (s, tail) = rest.split_at(len);
    *cur = tail;
    Some(String::from_utf8_lossy(s).into_owned())
}
