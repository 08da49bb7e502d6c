//! Object store: filesystem entities on top of one backend connection.
//!
//! The store is the only place that builds backend keys. It holds no state
//! besides the borrowed connection; every call goes straight to the backend.

pub mod keys;

use crate::cadapter::{KvConnection, WireError};
use crate::meta::{FOBJ_SIZE, FileObject, BLOCK_SIZE, KEY_MAX_LEN};
use thiserror::Error;
use tracing::{trace, warn};

pub use keys::{data_key, metadata_key};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such entry: {0}")]
    EntryNotFound(String),

    #[error("corrupt record under {key}: expected {expected} bytes, got {actual}")]
    Corrupt {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("block payload must be 4096 bytes, got {0}")]
    BadBlockSize(usize),

    #[error(transparent)]
    Wire(#[from] WireError),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct ObjectStore<'c, K: KvConnection + ?Sized> {
    conn: &'c mut K,
}

impl<'c, K: KvConnection + ?Sized> ObjectStore<'c, K> {
    pub fn new(conn: &'c mut K) -> Self {
        Self { conn }
    }

    pub async fn read_metadata(&mut self, path: &str) -> StoreResult<FileObject> {
        let key = metadata_key(path);
        let mut raw = [0u8; FOBJ_SIZE];
        let n = match self.conn.get(key.as_bytes(), &mut raw).await {
            Ok(n) => n,
            Err(WireError::NotFound) => return Err(StoreError::EntryNotFound(path.to_string())),
            Err(e) => return Err(e.into()),
        };
        FileObject::decode(&raw[..n]).ok_or(StoreError::Corrupt {
            key,
            expected: FOBJ_SIZE,
            actual: n,
        })
    }

    pub async fn write_metadata(&mut self, path: &str, obj: &FileObject) -> StoreResult<()> {
        let key = metadata_key(path);
        trace!(key = %key, blocks = obj.block_count, "write metadata");
        self.conn.set(key.as_bytes(), &obj.encode()).await?;
        Ok(())
    }

    /// Read block `index` into `dst` (one block long). Returns `false` when
    /// the block does not exist; `dst` is then left untouched. A value
    /// shorter than a block is zero-padded.
    pub async fn read_block(&mut self, path: &str, index: u64, dst: &mut [u8]) -> StoreResult<bool> {
        if dst.len() != BLOCK_SIZE {
            return Err(StoreError::BadBlockSize(dst.len()));
        }
        let key = data_key(path, index);
        match self.conn.get(key.as_bytes(), dst).await {
            Ok(n) => {
                dst[n..].fill(0);
                Ok(true)
            }
            Err(WireError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Like `read_block`, but a missing block reads as zeros.
    pub async fn read_block_or_zero(&mut self, path: &str, index: u64, dst: &mut [u8]) -> StoreResult<()> {
        if !self.read_block(path, index, dst).await? {
            dst.fill(0);
        }
        Ok(())
    }

    pub async fn write_block(&mut self, path: &str, index: u64, block: &[u8]) -> StoreResult<()> {
        if block.len() != BLOCK_SIZE {
            return Err(StoreError::BadBlockSize(block.len()));
        }
        let key = data_key(path, index);
        self.conn.set(key.as_bytes(), block).await?;
        Ok(())
    }

    /// Remove the metadata key, then data keys `0..block_count`. Individual
    /// failures are logged and skipped; the number of failed deletes is
    /// returned.
    pub async fn delete_entry(&mut self, path: &str, block_count: u32) -> usize {
        let mut failed = 0;
        let key = metadata_key(path);
        if let Err(e) = self.conn.del(key.as_bytes()).await {
            warn!(key = %key, error = %e, "failed to delete metadata");
            failed += 1;
        }
        for index in 0..u64::from(block_count) {
            let key = data_key(path, index);
            if let Err(e) = self.conn.del(key.as_bytes()).await {
                warn!(key = %key, error = %e, "failed to delete data block");
                failed += 1;
            }
        }
        failed
    }

    /// Backend keys matching a glob pattern, each cut to `KEY_MAX_LEN` bytes.
    pub async fn list_keys(&mut self, pattern: &str) -> StoreResult<Vec<String>> {
        let keys = self.conn.keys(pattern.as_bytes(), KEY_MAX_LEN).await?;
        Ok(keys
            .into_iter()
            .map(|(raw, _)| String::from_utf8_lossy(&raw).into_owned())
            .collect())
    }
}
