//! Kernel inode numbers for path-addressed entries.
//!
//! Stored sequence numbers are creation times and may collide, so the
//! adapter hands the kernel its own numbers. Inode 1 is always `/`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

pub const ROOT_INO: u64 = 1;

struct Slot {
    path: String,
    lookups: u64,
    // cleared once the entry is removed; the kernel may still hold the inode
    live: bool,
}

struct Inner {
    by_ino: HashMap<u64, Slot>,
    by_path: HashMap<String, u64>,
    next: u64,
}

pub struct InodeTable {
    inner: Mutex<Inner>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(
            ROOT_INO,
            Slot {
                path: "/".to_string(),
                lookups: 1,
                live: true,
            },
        );
        by_path.insert("/".to_string(), ROOT_INO);
        Self {
            inner: Mutex::new(Inner {
                by_ino,
                by_path,
                next: ROOT_INO + 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Path behind a live inode. Removed entries resolve to `None`.
    pub fn path_of(&self, ino: u64) -> Option<String> {
        self.lock()
            .by_ino
            .get(&ino)
            .filter(|s| s.live)
            .map(|s| s.path.clone())
    }

    /// Inode already handed to the kernel for `path`, if any. Never allocates.
    pub fn peek(&self, path: &str) -> Option<u64> {
        self.lock().by_path.get(path).copied()
    }

    /// Inode for `path`, allocating one if needed, and records one kernel
    /// lookup reference. Every call must be balanced by a `forget`.
    pub fn lookup(&self, path: &str) -> u64 {
        let mut inner = self.lock();
        if let Some(&ino) = inner.by_path.get(path) {
            if let Some(slot) = inner.by_ino.get_mut(&ino) {
                slot.lookups += 1;
            }
            return ino;
        }
        let ino = inner.next;
        inner.next += 1;
        inner.by_ino.insert(
            ino,
            Slot {
                path: path.to_string(),
                lookups: 1,
                live: true,
            },
        );
        inner.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Drop `nlookup` kernel references; the mapping goes away at zero.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut inner = self.lock();
        let gone = match inner.by_ino.get_mut(&ino) {
            Some(slot) => {
                slot.lookups = slot.lookups.saturating_sub(nlookup);
                slot.lookups == 0
            }
            None => false,
        };
        if gone {
            if let Some(slot) = inner.by_ino.remove(&ino) {
                if inner.by_path.get(&slot.path) == Some(&ino) {
                    inner.by_path.remove(&slot.path);
                }
            }
        }
    }

    /// Detach `path` after removal so a new entry with the same name gets a
    /// fresh inode. The old inode stops resolving and its slot goes away once
    /// the kernel forgets it.
    pub fn unlink_path(&self, path: &str) {
        if path == "/" {
            return;
        }
        let mut inner = self.lock();
        if let Some(ino) = inner.by_path.remove(path)
            && let Some(slot) = inner.by_ino.get_mut(&ino)
        {
            slot.live = false;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
