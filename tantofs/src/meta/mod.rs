//! Metadata records and their on-backend layout
//!
//! Responsibilities:
//! - Define the fixed binary layout of file objects (`fobj`) and directory
//!   entries (`dobj`) stored as backend values.
//! - Provide the fixed-capacity slot arena that one directory block holds.
//!
//! Layouts are little-endian with a fixed field order, so values written by
//! one build are readable by any other.
//!
//! Submodules:
//! - `fobj`: per-entry metadata record
//! - `dirent`: directory slots and the per-block slot arena

pub mod dirent;
pub mod fobj;

pub use dirent::{DirBlock, DirEntry, DIRENT_SIZE, SLOTS_PER_BLOCK};
pub use fobj::{FileKind, FileObject, FOBJ_SIZE};

/// Size of one data block, and of every value stored under a data key.
pub const BLOCK_SIZE: usize = 4096;

/// Longest accepted path, in bytes (exclusive).
pub const PATH_MAX_LEN: usize = 512;

/// Longest accepted entry name, in bytes. The on-disk slot keeps one extra
/// byte for the terminating NUL.
pub const NAME_MAX_LEN: usize = 255;

/// Capacity used when listing backend keys.
pub const KEY_MAX_LEN: usize = 512;
