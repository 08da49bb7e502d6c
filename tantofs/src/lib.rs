// Library crate for TantoFS: an object filesystem whose metadata and file
// blocks live in a Redis-compatible key-value store. The `tantofs` binary and
// the integration tests build on these modules.

pub mod cadapter;
pub mod cli;
pub mod config;
pub mod fuse;
pub mod meta;
pub mod store;
pub mod vfs;
