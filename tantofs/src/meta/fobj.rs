//! File object (`fobj`): the metadata record kept under `<path>@fobj`.

use super::BLOCK_SIZE;
use bytes::{Buf, BufMut};
use std::time::{SystemTime, UNIX_EPOCH};

/// Encoded size: six little-endian `u32` fields.
pub const FOBJ_SIZE: usize = 24;

const S_IFMT: u32 = libc::S_IFMT as u32;
const S_IFDIR: u32 = libc::S_IFDIR as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
}

impl FileKind {
    pub fn from_mode(mode: u32) -> Self {
        if mode & S_IFMT == S_IFDIR {
            FileKind::Dir
        } else {
            FileKind::File
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileObject {
    /// Creation time in whole seconds; doubles as the inode number.
    pub seqno: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Number of contiguous data blocks `0..block_count`.
    pub block_count: u32,
    pub block_size: u32,
}

impl FileObject {
    /// Fresh, empty entry stamped with the current time.
    pub fn new(mode: u32, uid: u32, gid: u32) -> Self {
        Self {
            seqno: now_secs(),
            mode,
            uid,
            gid,
            block_count: 0,
            block_size: BLOCK_SIZE as u32,
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Dir
    }

    /// Size as reported to the kernel: whole blocks only.
    pub fn size(&self) -> u64 {
        u64::from(self.block_count) * u64::from(self.block_size)
    }

    pub fn encode(&self) -> [u8; FOBJ_SIZE] {
        let mut out = [0u8; FOBJ_SIZE];
        let mut w = &mut out[..];
        w.put_u32_le(self.seqno);
        w.put_u32_le(self.mode);
        w.put_u32_le(self.uid);
        w.put_u32_le(self.gid);
        w.put_u32_le(self.block_count);
        w.put_u32_le(self.block_size);
        out
    }

    /// Decode a record; `None` if fewer than `FOBJ_SIZE` bytes are given.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < FOBJ_SIZE {
            return None;
        }
        let mut r = raw;
        let mut obj = Self {
            seqno: r.get_u32_le(),
            mode: r.get_u32_le(),
            uid: r.get_u32_le(),
            gid: r.get_u32_le(),
            block_count: r.get_u32_le(),
            block_size: r.get_u32_le(),
        };
        // records written with a zero block size predate the field
        if obj.block_size == 0 {
            obj.block_size = BLOCK_SIZE as u32;
        }
        Some(obj)
    }
}

/// Seconds since the epoch, truncated to 32 bits.
pub fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_fixed_little_endian() {
        let obj = FileObject {
            seqno: 0x0102_0304,
            mode: S_IFDIR | 0o755,
            uid: 1000,
            gid: 100,
            block_count: 2,
            block_size: 4096,
        };
        let raw = obj.encode();
        assert_eq!(&raw[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(u32::from_le_bytes(raw[4..8].try_into().unwrap()), S_IFDIR | 0o755);
        assert_eq!(u32::from_le_bytes(raw[16..20].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(raw[20..24].try_into().unwrap()), 4096);
        assert_eq!(FileObject::decode(&raw), Some(obj));
    }

    #[test]
    fn short_record_is_rejected() {
        let raw = FileObject::new(0o644, 0, 0).encode();
        assert!(FileObject::decode(&raw[..FOBJ_SIZE - 1]).is_none());
    }

    #[test]
    fn kind_and_size_follow_fields() {
        let mut f = FileObject::new(libc::S_IFREG as u32 | 0o644, 1, 2);
        assert_eq!(f.kind(), FileKind::File);
        assert_eq!(f.size(), 0);
        f.block_count = 3;
        assert_eq!(f.size(), 3 * BLOCK_SIZE as u64);

        let d = FileObject::new(S_IFDIR | 0o700, 0, 0);
        assert!(d.is_dir());
    }
}
