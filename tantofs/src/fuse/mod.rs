//! FUSE adapter and request handling
//!
//! Bridges the inode-based rfuse3 raw API onto the path-based callbacks of
//! `vfs::TantoFs`.
//!
//! Main components:
//! - `inode`: kernel inode numbers allocated per path.
//! - `mount`: mounting helpers.
//! - Implementation of the `Filesystem` trait for `TantoFuse`, plus attribute
//!   conversion between `FileStat` and the FUSE reply types.
//!
//! Kernel reads are widened to block boundaries before they reach the
//! translation layer, since it only accepts aligned reads.
pub mod inode;
pub mod mount;

use crate::cadapter::KvConnector;
use crate::meta::{BLOCK_SIZE, FileKind, NAME_MAX_LEN};
use crate::vfs::path::join;
use crate::vfs::{Caller, FileStat, TantoFs};
use bytes::Bytes;
use inode::{InodeTable, ROOT_INO};
use rfuse3::Result as FuseResult;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData, ReplyDirectory,
    ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
};
use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::{Duration, UNIX_EPOCH};
use tracing::debug;

use futures_util::stream::{self, Stream};
use rfuse3::raw::Filesystem;
use rfuse3::{FileType as FuseFileType, SetAttr, Timestamp};

const TTL: Duration = Duration::from_secs(1);

// Reported for directory entries the kernel has not looked up yet.
const UNKNOWN_INO: u64 = 0xffff_ffff;

const MAX_WRITE: NonZeroU32 = match NonZeroU32::new(128 * 1024) {
    Some(v) => v,
    None => unreachable!(),
};

pub struct TantoFuse<C: KvConnector> {
    fs: TantoFs<C>,
    inodes: InodeTable,
}

impl<C: KvConnector> TantoFuse<C> {
    pub fn new(fs: TantoFs<C>) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
        }
    }

    pub fn fs(&self) -> &TantoFs<C> {
        &self.fs
    }

    fn path(&self, ino: u64) -> FuseResult<String> {
        self.inodes.path_of(ino).ok_or_else(|| libc::ENOENT.into())
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> FuseResult<String> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        if name.len() > NAME_MAX_LEN {
            return Err(libc::ENAMETOOLONG.into());
        }
        Ok(join(&self.path(parent)?, name))
    }

    fn entry(&self, path: &str, stat: &FileStat) -> ReplyEntry {
        let ino = self.inodes.lookup(path);
        ReplyEntry {
            ttl: TTL,
            attr: to_fuse_attr(ino, stat),
            generation: 0,
        }
    }

    async fn list(&self, ino: u64) -> FuseResult<(String, Vec<(String, FileKind)>)> {
        let path = self.path(ino)?;
        let entries = self
            .fs
            .readdir(&path)
            .await?
            .into_iter()
            .map(|e| (join(&path, &e.name), e.kind()))
            .collect();
        Ok((path, entries))
    }

    /// Parent path and, when the kernel already knows it, its inode.
    fn parent_of<'p>(&self, path: &'p str) -> (&'p str, Option<u64>) {
        match path.rfind('/') {
            Some(0) | None => ("/", Some(ROOT_INO)),
            Some(i) => (&path[..i], self.inodes.peek(&path[..i])),
        }
    }
}

impl<C: KvConnector> Filesystem for TantoFuse<C> {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        Ok(ReplyInit { max_write: MAX_WRITE })
    }

    async fn destroy(&self, _req: Request) {
        debug!("filesystem destroyed");
    }

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let path = self.child_path(parent, name)?;
        let stat = self.fs.getattr(&path).await?;
        Ok(self.entry(&path, &stat))
    }

    async fn forget(&self, _req: Request, inode: u64, nlookup: u64) {
        self.inodes.forget(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(u64, u64)]) {
        for &(inode, nlookup) in inodes {
            self.inodes.forget(inode, nlookup);
        }
    }

    async fn getattr(&self, _req: Request, ino: u64, _fh: Option<u64>, _flags: u32) -> FuseResult<ReplyAttr> {
        let stat = self.fs.getattr(&self.path(ino)?).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(ino, &stat),
        })
    }

    // size maps to truncate; mode and owner changes are not supported;
    // timestamps are accepted and dropped
    async fn setattr(&self, _req: Request, ino: u64, _fh: Option<u64>, set_attr: SetAttr) -> FuseResult<ReplyAttr> {
        let path = self.path(ino)?;
        if let Some(mode) = set_attr.mode {
            self.fs.chmod(&path, mode).await?;
        }
        if set_attr.uid.is_some() || set_attr.gid.is_some() {
            self.fs
                .chown(&path, set_attr.uid.unwrap_or(u32::MAX), set_attr.gid.unwrap_or(u32::MAX))
                .await?;
        }
        if let Some(size) = set_attr.size {
            self.fs.truncate(&path, size).await?;
        }
        if set_attr.atime.is_some() || set_attr.mtime.is_some() {
            self.fs.utime(&path).await?;
        }
        let stat = self.fs.getattr(&path).await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_fuse_attr(ino, &stat),
        })
    }

    async fn mknod(&self, req: Request, parent: u64, name: &OsStr, mode: u32, rdev: u32) -> FuseResult<ReplyEntry> {
        let path = self.child_path(parent, name)?;
        let stat = self.fs.mknod(Caller::new(req.uid, req.gid), &path, mode, rdev).await?;
        Ok(self.entry(&path, &stat))
    }

    async fn mkdir(&self, req: Request, parent: u64, name: &OsStr, mode: u32, umask: u32) -> FuseResult<ReplyEntry> {
        let path = self.child_path(parent, name)?;
        let stat = self
            .fs
            .mkdir(Caller::new(req.uid, req.gid), &path, mode & !umask)
            .await?;
        Ok(self.entry(&path, &stat))
    }

    async fn create(&self, req: Request, parent: u64, name: &OsStr, mode: u32, _flags: u32) -> FuseResult<ReplyCreated> {
        let path = self.child_path(parent, name)?;
        let mode = libc::S_IFREG as u32 | (mode & 0o7777);
        let stat = self.fs.mknod(Caller::new(req.uid, req.gid), &path, mode, 0).await?;
        let ino = self.inodes.lookup(&path);
        Ok(ReplyCreated {
            ttl: TTL,
            attr: to_fuse_attr(ino, &stat),
            generation: 0,
            fh: 0,
            flags: 0,
        })
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_path(parent, name)?;
        self.fs.unlink(&path).await?;
        self.inodes.unlink_path(&path);
        Ok(())
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        let path = self.child_path(parent, name)?;
        self.fs.rmdir(&path).await?;
        self.inodes.unlink_path(&path);
        Ok(())
    }

    async fn rename(&self, _req: Request, parent: u64, name: &OsStr, new_parent: u64, new_name: &OsStr) -> FuseResult<()> {
        let from = self.child_path(parent, name)?;
        let to = self.child_path(new_parent, new_name)?;
        Ok(self.fs.rename(&from, &to).await?)
    }

    async fn link(&self, _req: Request, inode: u64, new_parent: u64, new_name: &OsStr) -> FuseResult<ReplyEntry> {
        let from = self.path(inode)?;
        let to = self.child_path(new_parent, new_name)?;
        let stat = self.fs.link(&from, &to).await?;
        Ok(self.entry(&to, &stat))
    }

    async fn symlink(&self, _req: Request, parent: u64, name: &OsStr, link: &OsStr) -> FuseResult<ReplyEntry> {
        let path = self.child_path(parent, name)?;
        let stat = self.fs.symlink(&link.to_string_lossy(), &path).await?;
        Ok(self.entry(&path, &stat))
    }

    async fn readlink(&self, _req: Request, inode: u64) -> FuseResult<ReplyData> {
        let target = self.fs.readlink(&self.path(inode)?).await?;
        Ok(ReplyData {
            data: Bytes::from(target.into_bytes()),
        })
    }

    async fn open(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let stat = self.fs.getattr(&self.path(ino)?).await?;
        if stat.kind == FileKind::Dir {
            return Err(libc::EISDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let stat = self.fs.getattr(&self.path(ino)?).await?;
        if stat.kind != FileKind::Dir {
            return Err(libc::ENOTDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    // the kernel may ask for any range; read whole blocks and cut the
    // requested window out, clipped to the file size
    async fn read(&self, _req: Request, ino: u64, _fh: u64, offset: u64, size: u32) -> FuseResult<ReplyData> {
        let path = self.path(ino)?;
        let file_size = self.fs.getattr(&path).await?.size;
        if offset >= file_size || size == 0 {
            return Ok(ReplyData { data: Bytes::new() });
        }
        let end = file_size.min(offset + u64::from(size));
        let bs = BLOCK_SIZE as u64;
        let start = offset - offset % bs;
        let aligned_end = end.div_ceil(bs) * bs;

        let mut buf = vec![0u8; (aligned_end - start) as usize];
        self.fs.read(&path, &mut buf, start).await?;
        let from = (offset - start) as usize;
        let to = (end - start) as usize;
        Ok(ReplyData {
            data: Bytes::copy_from_slice(&buf[from..to]),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn write(
        &self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let path = self.path(ino)?;
        let n = self.fs.write(&path, data, offset).await?;
        Ok(ReplyWrite { written: n as u32 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let (path, children) = self.list(ino).await?;

        let mut all = Vec::with_capacity(children.len() + 2);
        all.push(DirectoryEntry {
            inode: ino,
            kind: FuseFileType::Directory,
            name: OsString::from("."),
            offset: 1,
        });
        all.push(DirectoryEntry {
            inode: self.parent_of(&path).1.unwrap_or(UNKNOWN_INO),
            kind: FuseFileType::Directory,
            name: OsString::from(".."),
            offset: 2,
        });
        for (i, (child, kind)) in children.iter().enumerate() {
            // plain readdir takes no lookup reference, so nothing is allocated here
            all.push(DirectoryEntry {
                inode: self.inodes.peek(child).unwrap_or(UNKNOWN_INO),
                kind: to_fuse_kind(*kind),
                name: OsString::from(base_name(child)),
                offset: i as i64 + 3,
            });
        }

        let start = offset.max(0) as usize;
        let rest: Vec<_> = all.into_iter().skip(start).map(Ok).collect();
        let entries: Self::DirEntryStream<'a> = Box::pin(stream::iter(rest));
        Ok(ReplyDirectory { entries })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let (path, children) = self.list(ino).await?;

        let mut all = Vec::with_capacity(children.len() + 2);
        let dot = self.fs.getattr(&path).await?;
        all.push(DirectoryEntryPlus {
            inode: ino,
            generation: 0,
            kind: FuseFileType::Directory,
            name: OsString::from("."),
            offset: 1,
            attr: to_fuse_attr(ino, &dot),
            entry_ttl: TTL,
            attr_ttl: TTL,
        });
        if let (parent_path, Some(parent_ino)) = self.parent_of(&path)
            && let Ok(pstat) = self.fs.getattr(parent_path).await
        {
            all.push(DirectoryEntryPlus {
                inode: parent_ino,
                generation: 0,
                kind: FuseFileType::Directory,
                name: OsString::from(".."),
                offset: 2,
                attr: to_fuse_attr(parent_ino, &pstat),
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }
        // skip entries already consumed; each returned child counts as a lookup
        for (i, (child, kind)) in children.iter().enumerate() {
            let entry_offset = i as i64 + 3;
            if (entry_offset as u64) <= offset {
                continue;
            }
            let Ok(stat) = self.fs.getattr(child).await else {
                continue;
            };
            let child_ino = self.inodes.lookup(child);
            all.push(DirectoryEntryPlus {
                inode: child_ino,
                generation: 0,
                kind: to_fuse_kind(*kind),
                name: OsString::from(base_name(child)),
                offset: entry_offset,
                attr: to_fuse_attr(child_ino, &stat),
                entry_ttl: TTL,
                attr_ttl: TTL,
            });
        }

        let rest: Vec<_> = all
            .into_iter()
            .filter(|e| e.offset as u64 > offset)
            .map(Ok)
            .collect();
        let entries: Self::DirEntryPlusStream<'a> = Box::pin(stream::iter(rest));
        Ok(ReplyDirectoryPlus { entries })
    }

    async fn statfs(&self, _req: Request, ino: u64) -> FuseResult<ReplyStatFs> {
        self.fs.statfs(&self.path(ino)?).await?;
        Ok(ReplyStatFs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: BLOCK_SIZE as u32,
            namelen: NAME_MAX_LEN as u32,
            frsize: BLOCK_SIZE as u32,
        })
    }

    async fn release(
        &self,
        _req: Request,
        inode: u64,
        _fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        if let Some(path) = self.inodes.path_of(inode) {
            self.fs.release(&path).await?;
        }
        Ok(())
    }

    async fn flush(&self, _req: Request, _inode: u64, _fh: u64, _lock_owner: u64) -> FuseResult<()> {
        Ok(())
    }

    async fn fsync(&self, _req: Request, inode: u64, _fh: u64, datasync: bool) -> FuseResult<()> {
        if let Some(path) = self.inodes.path_of(inode) {
            self.fs.fsync(&path, datasync).await?;
        }
        Ok(())
    }

    async fn releasedir(&self, _req: Request, _inode: u64, _fh: u64, _flags: u32) -> FuseResult<()> {
        Ok(())
    }

    async fn fsyncdir(&self, _req: Request, _inode: u64, _fh: u64, _datasync: bool) -> FuseResult<()> {
        Ok(())
    }

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn to_fuse_kind(kind: FileKind) -> FuseFileType {
    match kind {
        FileKind::Dir => FuseFileType::Directory,
        FileKind::File => FuseFileType::RegularFile,
    }
}

/// Kernel attributes for `stat`. The stored sequence number is the creation
/// time in seconds and stands in for every timestamp.
fn to_fuse_attr(ino: u64, stat: &FileStat) -> FileAttr {
    let created = Timestamp::from(UNIX_EPOCH + Duration::from_secs(stat.ino));
    FileAttr {
        ino,
        size: stat.size,
        // 512-byte units
        blocks: stat.size.div_ceil(512),
        atime: created,
        mtime: created,
        ctime: created,
        #[cfg(target_os = "macos")]
        crtime: created,
        kind: to_fuse_kind(stat.kind),
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: stat.blksize,
    }
}
