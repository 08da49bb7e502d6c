//! Directory entries (`dobj`) and the slot arena of one directory block.
//!
//! A directory's data blocks are arrays of fixed-size slots. An empty name
//! marks a free slot; removal only blanks the slot so it can be reused.

use super::{BLOCK_SIZE, NAME_MAX_LEN};
use super::fobj::FileKind;
use bytes::{Buf, BufMut};

/// Name field width, including room for the terminating NUL.
const NAME_FIELD: usize = NAME_MAX_LEN + 1;

/// Encoded slot size: `seqno: u32`, `flags: u32`, `name: [u8; 256]`.
pub const DIRENT_SIZE: usize = 8 + NAME_FIELD;

pub const SLOTS_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;

/// Slot flag: the child is a directory.
pub const FLAG_DIR: u32 = 0x1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub seqno: u32,
    pub flags: u32,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, seqno: u32, kind: FileKind) -> Self {
        let flags = match kind {
            FileKind::Dir => FLAG_DIR,
            FileKind::File => 0,
        };
        Self {
            name: name.into(),
            seqno,
            flags,
        }
    }

    pub fn kind(&self) -> FileKind {
        if self.flags & FLAG_DIR != 0 {
            FileKind::Dir
        } else {
            FileKind::File
        }
    }
}

#[derive(Clone, Copy)]
struct DirSlot {
    seqno: u32,
    flags: u32,
    name: [u8; NAME_FIELD],
}

impl DirSlot {
    const FREE: DirSlot = DirSlot {
        seqno: 0,
        flags: 0,
        name: [0u8; NAME_FIELD],
    };

    fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD);
        &self.name[..end]
    }
}

/// The slots of one directory block, addressed by index.
#[derive(Clone)]
pub struct DirBlock {
    slots: [DirSlot; SLOTS_PER_BLOCK],
}

impl Default for DirBlock {
    fn default() -> Self {
        Self::empty()
    }
}

impl DirBlock {
    pub fn empty() -> Self {
        Self {
            slots: [DirSlot::FREE; SLOTS_PER_BLOCK],
        }
    }

    /// Decode a directory block. Missing trailing bytes read as free slots.
    pub fn decode(raw: &[u8]) -> Self {
        let mut block = Self::empty();
        for (i, slot) in block.slots.iter_mut().enumerate() {
            let start = i * DIRENT_SIZE;
            let Some(mut r) = raw.get(start..start + DIRENT_SIZE) else {
                break;
            };
            slot.seqno = r.get_u32_le();
            slot.flags = r.get_u32_le();
            r.copy_to_slice(&mut slot.name);
            // a name filling the whole field has no terminator; clamp it
            slot.name[NAME_FIELD - 1] = 0;
        }
        block
    }

    /// Encode into `out`, which must be at least one block long. Bytes after
    /// the last slot are zeroed.
    pub fn encode_into(&self, out: &mut [u8]) {
        out[..BLOCK_SIZE].fill(0);
        let mut w = &mut out[..SLOTS_PER_BLOCK * DIRENT_SIZE];
        for slot in &self.slots {
            w.put_u32_le(slot.seqno);
            w.put_u32_le(slot.flags);
            w.put_slice(&slot.name);
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; BLOCK_SIZE];
        self.encode_into(&mut out);
        out
    }

    pub fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(DirSlot::is_free)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.slots
            .iter()
            .position(|s| !s.is_free() && s.name() == name.as_bytes())
    }

    /// Store `entry` in slot `index`. The name must be non-empty, at most
    /// `NAME_MAX_LEN` bytes and free of NUL bytes; callers validate it.
    pub fn occupy(&mut self, index: usize, entry: &DirEntry) {
        debug_assert!(!entry.name.is_empty() && entry.name.len() <= NAME_MAX_LEN);
        let slot = &mut self.slots[index];
        *slot = DirSlot::FREE;
        slot.seqno = entry.seqno;
        slot.flags = entry.flags;
        let n = entry.name.len().min(NAME_MAX_LEN);
        slot.name[..n].copy_from_slice(&entry.name.as_bytes()[..n]);
    }

    /// Blank slot `index` so it can be reused.
    pub fn release(&mut self, index: usize) {
        self.slots[index] = DirSlot::FREE;
    }

    pub fn get(&self, index: usize) -> Option<DirEntry> {
        let slot = self.slots.get(index)?;
        if slot.is_free() {
            return None;
        }
        Some(DirEntry {
            name: String::from_utf8_lossy(slot.name()).into_owned(),
            seqno: slot.seqno,
            flags: slot.flags,
        })
    }

    /// Used slots in storage order.
    pub fn entries(&self) -> impl Iterator<Item = DirEntry> + '_ {
        (0..SLOTS_PER_BLOCK).filter_map(|i| self.get(i))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(DirSlot::is_free)
    }
}
