//! Path-based filesystem callbacks over the object store.
//!
//! Every callback checks one connection out of the pool, runs its sequence
//! of backend commands on it and returns the connection when done. Nothing
//! is cached between calls.

use super::error::{FsError, FsResult};
use super::path::{self, ROOT};
use crate::cadapter::{ConnectionPool, KvConnector, PooledConnection};
use crate::meta::{BLOCK_SIZE, DirBlock, DirEntry, FileKind, FileObject};
use crate::store::ObjectStore;
use tracing::{debug, info};

const S_IFDIR: u32 = libc::S_IFDIR as u32;

/// Identity of the process issuing a callback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
}

impl Caller {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// Attributes reported by `getattr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub ino: u64,
    pub kind: FileKind,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub blksize: u32,
}

impl From<&FileObject> for FileStat {
    fn from(obj: &FileObject) -> Self {
        Self {
            ino: u64::from(obj.seqno),
            kind: obj.kind(),
            mode: obj.mode,
            nlink: 1,
            uid: obj.uid,
            gid: obj.gid,
            size: obj.size(),
            blocks: u64::from(obj.block_count),
            blksize: BLOCK_SIZE as u32,
        }
    }
}

pub struct TantoFs<C: KvConnector> {
    pool: ConnectionPool<C>,
}

impl<C: KvConnector> TantoFs<C> {
    /// Wrap a pool and make sure the root directory exists.
    pub async fn new(pool: ConnectionPool<C>) -> FsResult<Self> {
        let fs = Self { pool };
        fs.ensure_root().await?;
        Ok(fs)
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    async fn conn(&self) -> FsResult<PooledConnection<'_, C>> {
        Ok(self.pool.get().await?)
    }

    async fn ensure_root(&self) -> FsResult<()> {
        let mut conn = self.conn().await?;
        let mut store = ObjectStore::new(&mut *conn);
        match store.read_metadata(ROOT).await {
            Ok(_) => Ok(()),
            Err(crate::store::StoreError::EntryNotFound(_)) => {
                let root = FileObject::new(S_IFDIR | 0o755, 0, 0);
                store.write_metadata(ROOT, &root).await?;
                info!("created root directory");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn getattr(&self, path: &str) -> FsResult<FileStat> {
        let path = path::normalize(path)?;
        let mut conn = self.conn().await?;
        let obj = ObjectStore::new(&mut *conn).read_metadata(path).await?;
        Ok(FileStat::from(&obj))
    }

    /// Used slots of a directory, in storage order.
    pub async fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let path = path::normalize(path)?;
        debug!(path, "readdir");
        let mut conn = self.conn().await?;
        let mut store = ObjectStore::new(&mut *conn);
        let dir = store.read_metadata(path).await?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let mut raw = vec![0u8; BLOCK_SIZE];
        let mut out = Vec::new();
        for index in 0..u64::from(dir.block_count) {
            if store.read_block(path, index, &mut raw).await? {
                out.extend(DirBlock::decode(&raw).entries());
            }
        }
        Ok(out)
    }

    /// `readdir` with a per-entry callback `(name, kind, inode)`. Stops early
    /// when `emit` returns `false`.
    pub async fn readdir_with<F>(&self, path: &str, mut emit: F) -> FsResult<()>
    where
        F: FnMut(&str, FileKind, u64) -> bool,
    {
        for entry in self.readdir(path).await? {
            if !emit(&entry.name, entry.kind(), u64::from(entry.seqno)) {
                break;
            }
        }
        Ok(())
    }

    /// Create a file. The device number is accepted and ignored.
    pub async fn mknod(&self, caller: Caller, path: &str, mode: u32, _rdev: u32) -> FsResult<FileStat> {
        self.create_entry(caller, path, mode).await
    }

    pub async fn mkdir(&self, caller: Caller, path: &str, mode: u32) -> FsResult<FileStat> {
        self.create_entry(caller, path, mode | S_IFDIR).await
    }

    async fn create_entry(&self, caller: Caller, path: &str, mode: u32) -> FsResult<FileStat> {
        let path = path::normalize(path)?;
        let (parent, name) = path::split(path)?;
        debug!(path, mode, "create entry");

        let mut conn = self.conn().await?;
        let mut store = ObjectStore::new(&mut *conn);
        let mut pobj = store.read_metadata(parent).await?;
        if !pobj.is_dir() {
            return Err(FsError::NotADirectory);
        }

        let mut raw = vec![0u8; BLOCK_SIZE];
        let mut free: Option<(u64, usize, DirBlock)> = None;
        for index in 0..u64::from(pobj.block_count) {
            let block = if store.read_block(parent, index, &mut raw).await? {
                DirBlock::decode(&raw)
            } else {
                DirBlock::empty()
            };
            if block.position(name).is_some() {
                return Err(FsError::AlreadyExists);
            }
            if free.is_none() {
                if let Some(slot) = block.find_free() {
                    free = Some((index, slot, block));
                }
            }
        }

        let obj = FileObject::new(mode, caller.uid, caller.gid);
        let entry = DirEntry::new(name, obj.seqno, obj.kind());
        match free {
            Some((index, slot, mut block)) => {
                block.occupy(slot, &entry);
                block.encode_into(&mut raw);
                store.write_block(parent, index, &raw).await?;
            }
            None => {
                let index = pobj.block_count;
                pobj.block_count = index.checked_add(1).ok_or(FsError::InvalidArgument)?;
                let mut block = DirBlock::empty();
                block.occupy(0, &entry);
                block.encode_into(&mut raw);
                store.write_block(parent, u64::from(index), &raw).await?;
                store.write_metadata(parent, &pobj).await?;
            }
        }
        store.write_metadata(path, &obj).await?;
        Ok(FileStat::from(&obj))
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        self.remove_entry(path, FileKind::File).await
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        self.remove_entry(path, FileKind::Dir).await
    }

    async fn remove_entry(&self, path: &str, want: FileKind) -> FsResult<()> {
        let path = path::normalize(path)?;
        if path == ROOT {
            return Err(FsError::InvalidArgument);
        }
        let (parent, name) = path::split(path)?;
        debug!(path, ?want, "remove entry");

        let mut conn = self.conn().await?;
        let mut store = ObjectStore::new(&mut *conn);
        let obj = store.read_metadata(path).await?;
        match (want, obj.kind()) {
            (FileKind::File, FileKind::Dir) => return Err(FsError::IsADirectory),
            (FileKind::Dir, FileKind::File) => return Err(FsError::NotADirectory),
            _ => {}
        }
        let pobj = store.read_metadata(parent).await?;

        let mut raw = vec![0u8; BLOCK_SIZE];
        if want == FileKind::Dir {
            for index in 0..u64::from(obj.block_count) {
                if store.read_block(path, index, &mut raw).await? && !DirBlock::decode(&raw).is_empty() {
                    return Err(FsError::NotEmpty);
                }
            }
        }

        let mut found = false;
        for index in 0..u64::from(pobj.block_count) {
            if !store.read_block(parent, index, &mut raw).await? {
                continue;
            }
            let mut block = DirBlock::decode(&raw);
            if let Some(slot) = block.position(name) {
                block.release(slot);
                block.encode_into(&mut raw);
                store.write_block(parent, index, &raw).await?;
                found = true;
                break;
            }
        }
        if !found {
            return Err(FsError::NotFound);
        }

        let failed = store.delete_entry(path, obj.block_count).await;
        if failed > 0 {
            debug!(path, failed, "entry removed with leftover keys");
        }
        Ok(())
    }

    /// Set the block count to `ceil(size / BLOCK_SIZE)`. Blocks past the new
    /// end stay in the backend unreferenced.
    pub async fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        let path = path::normalize(path)?;
        debug!(path, size, "truncate");
        let blocks = u32::try_from(size.div_ceil(BLOCK_SIZE as u64)).map_err(|_| FsError::InvalidArgument)?;

        let mut conn = self.conn().await?;
        let mut store = ObjectStore::new(&mut *conn);
        let mut obj = store.read_metadata(path).await?;
        if obj.is_dir() {
            return Err(FsError::IsADirectory);
        }
        obj.block_count = blocks;
        store.write_metadata(path, &obj).await?;
        Ok(())
    }

    /// Existence check only; no handle state is kept.
    pub async fn open(&self, path: &str) -> FsResult<()> {
        self.getattr(path).await.map(|_| ())
    }

    /// Fill `buf` from `offset`. Both the length and the offset must be
    /// multiples of `BLOCK_SIZE`; blocks that were never written read as
    /// zeros. Returns `buf.len()`.
    pub async fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        if buf.len() % BLOCK_SIZE != 0 || offset % BLOCK_SIZE as u64 != 0 {
            return Err(FsError::InvalidArgument);
        }
        let path = path::normalize(path)?;
        debug!(path, offset, len = buf.len(), "read");

        let mut conn = self.conn().await?;
        let mut store = ObjectStore::new(&mut *conn);
        store.read_metadata(path).await?;
        let first = offset / BLOCK_SIZE as u64;
        for (i, chunk) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
            store.read_block_or_zero(path, first + i as u64, chunk).await?;
        }
        Ok(buf.len())
    }

    /// Write `data` at `offset`. Whole blocks are stored as-is; partial
    /// blocks are merged with their current contents. The block count only
    /// ever grows here.
    pub async fn write(&self, path: &str, data: &[u8], offset: u64) -> FsResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let path = path::normalize(path)?;
        debug!(path, offset, len = data.len(), "write");

        let bs = BLOCK_SIZE as u64;
        let end = offset.checked_add(data.len() as u64).ok_or(FsError::InvalidArgument)?;
        let needed = u32::try_from((end - 1) / bs + 1).map_err(|_| FsError::InvalidArgument)?;

        let mut conn = self.conn().await?;
        let mut store = ObjectStore::new(&mut *conn);
        let mut obj = store.read_metadata(path).await?;
        if obj.is_dir() {
            return Err(FsError::IsADirectory);
        }

        let mut block = vec![0u8; BLOCK_SIZE];
        let mut index = offset / bs;
        let mut within = (offset % bs) as usize;
        let mut pos = 0;
        while pos < data.len() {
            let n = (BLOCK_SIZE - within).min(data.len() - pos);
            let chunk = &data[pos..pos + n];
            if n == BLOCK_SIZE {
                store.write_block(path, index, chunk).await?;
            } else {
                store.read_block_or_zero(path, index, &mut block).await?;
                block[within..within + n].copy_from_slice(chunk);
                store.write_block(path, index, &block).await?;
            }
            pos += n;
            index += 1;
            within = 0;
        }

        if needed > obj.block_count {
            obj.block_count = needed;
            store.write_metadata(path, &obj).await?;
        }
        Ok(data.len())
    }

    pub async fn release(&self, _path: &str) -> FsResult<()> {
        Ok(())
    }

    pub async fn fsync(&self, _path: &str, _datasync: bool) -> FsResult<()> {
        Ok(())
    }

    /// Timestamps are not stored; only checks that the entry exists.
    pub async fn utime(&self, path: &str) -> FsResult<()> {
        self.getattr(path).await.map(|_| ())
    }

    pub async fn readlink(&self, _path: &str) -> FsResult<String> {
        Err(FsError::Unsupported)
    }

    pub async fn symlink(&self, _target: &str, _link: &str) -> FsResult<FileStat> {
        Err(FsError::Unsupported)
    }

    pub async fn rename(&self, _from: &str, _to: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    pub async fn link(&self, _from: &str, _to: &str) -> FsResult<FileStat> {
        Err(FsError::Unsupported)
    }

    pub async fn chmod(&self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    pub async fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> FsResult<()> {
        Err(FsError::Unsupported)
    }

    pub async fn statfs(&self, _path: &str) -> FsResult<()> {
        Err(FsError::Unsupported)
    }
}
