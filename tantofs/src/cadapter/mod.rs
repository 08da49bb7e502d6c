//! Key-value store adapter (cAdapter)
//!
//! Submodules:
//! - `buffer`: incremental read buffer used by the RESP decoder
//! - `resp`: wire client speaking the Redis protocol over one TCP stream
//! - `pool`: per-callback connection checkout
//! - `memory`: in-process backend for tests and throwaway mounts
//!
//! Responsibilities summary:
//! - Provide an async API for get/set/del/keys of raw byte values.
//! - Keep each connection strictly sequential: one command, one reply.
//! - Never retry; every failure is returned to the caller as-is.

pub mod buffer;
pub mod memory;
pub mod pool;
pub mod resp;

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

pub use memory::{MemoryConnection, MemoryConnector};
pub use pool::{ConnectionPool, PooledConnection};
pub use resp::{RespClient, TcpConnector};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("backend i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("backend replied with error: {0}")]
    Backend(String),

    #[error("key not found")]
    NotFound,
}

impl WireError {
    /// Whether the connection that produced this error can still be used.
    /// After an i/o or framing failure the stream position is unknown.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WireError::Connect { .. } | WireError::Io(_) | WireError::Protocol(_)
        )
    }
}

pub type WireResult<T> = Result<T, WireError>;

/// One exclusive, strictly sequential connection to the key-value backend.
#[async_trait]
pub trait KvConnection: Send {
    /// Copy the value of `key` into `dst`, returning the number of bytes copied.
    /// Bytes of the value beyond `dst.len()` are discarded.
    async fn get(&mut self, key: &[u8], dst: &mut [u8]) -> WireResult<usize>;

    async fn set(&mut self, key: &[u8], value: &[u8]) -> WireResult<()>;

    async fn del(&mut self, key: &[u8]) -> WireResult<()>;

    /// List keys matching a glob `pattern`. Each key is cut to `capacity`
    /// bytes; the second tuple field is the length advertised by the backend.
    async fn keys(&mut self, pattern: &[u8], capacity: usize) -> WireResult<Vec<(Bytes, usize)>>;

    /// A broken connection must not be handed out again.
    fn is_broken(&self) -> bool {
        false
    }
}

/// Factory for new backend connections, shared by all callbacks.
#[async_trait]
pub trait KvConnector: Send + Sync + 'static {
    type Connection: KvConnection + 'static;

    async fn connect(&self) -> WireResult<Self::Connection>;
}
