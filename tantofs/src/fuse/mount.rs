//! Mount helpers for starting/stopping FUSE
//!
//! Notes:
//! - Only supported on Unix-like systems. On Linux we mount unprivileged via fusermount3.
//! - These helpers are thin wrappers over rfuse3 raw Session APIs.

use std::path::Path;

use rfuse3::MountOptions;

use super::TantoFuse;
use crate::cadapter::KvConnector;

/// Build default mount options for TantoFS.
fn default_mount_options() -> MountOptions {
    let mut mo = MountOptions::default();
    mo.fs_name("tantofs");
    // no allow_other; the mountpoint must be empty
    mo
}

/// Mount the filesystem on an empty directory. Runs until the returned
/// handle is unmounted or the filesystem is unmounted externally.
#[cfg(target_os = "linux")]
pub async fn mount_unprivileged<C: KvConnector>(
    fs: TantoFuse<C>,
    mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    let session = rfuse3::raw::Session::new(default_mount_options());
    session.mount_with_unprivileged(fs, mount_point).await
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount_unprivileged<C: KvConnector>(
    _fs: TantoFuse<C>,
    _mount_point: impl AsRef<Path>,
) -> std::io::Result<rfuse3::raw::MountHandle> {
    let _ = default_mount_options();
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
