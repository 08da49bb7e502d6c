//! VFS layer (path-based filesystem callbacks)
//!
//! Responsibilities:
//! - Map POSIX operations (create, list, remove, read, write, truncate) onto
//!   metadata records, directory slots and fixed-size data blocks.
//! - Enforce block alignment for reads and stride unaligned writes through
//!   read-modify-write.
//! - Translate every failure into an `FsError` with a fixed errno.
//!
//! There is no locking across keys. Two concurrent creations in one
//! directory may pick the same free slot, and a concurrent reader may see a
//! block written before the metadata that covers it.
//!
//! Submodules:
//! - `fs`: the callback implementation (`TantoFs`)
//! - `path`: validation and parent/name splitting
//! - `error`: `FsError` and the errno mapping
pub mod error;
pub mod fs;
pub mod path;

pub use error::{FsError, FsResult, to_status};
pub use fs::{Caller, FileStat, TantoFs};
