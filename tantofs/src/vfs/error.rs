use crate::cadapter::WireError;
use crate::store::StoreError;
use thiserror::Error;

/// Callback-level failure, convertible to an errno.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("entry already exists")]
    AlreadyExists,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("name too long")]
    NameTooLong,

    #[error("operation not supported")]
    Unsupported,

    #[error("backend failure: {0}")]
    Backend(#[source] StoreError),
}

impl FsError {
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::Unsupported => libc::ENOSYS,
            FsError::Backend(_) => libc::EIO,
        }
    }

    /// Negative errno, as returned by path-based FUSE callbacks.
    pub fn status(&self) -> i32 {
        -self.errno()
    }
}

impl From<StoreError> for FsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::EntryNotFound(_) => FsError::NotFound,
            other => FsError::Backend(other),
        }
    }
}

impl From<WireError> for FsError {
    fn from(e: WireError) -> Self {
        FsError::Backend(StoreError::Wire(e))
    }
}

impl From<FsError> for rfuse3::Errno {
    fn from(e: FsError) -> Self {
        e.errno().into()
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Fold a callback result into the signed status convention:
/// the byte count (or zero) on success, `-errno` on failure.
pub fn to_status(res: FsResult<usize>) -> isize {
    match res {
        Ok(n) => n as isize,
        Err(e) => e.status() as isize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_is_total() {
        let cases = [
            (FsError::NotFound, libc::ENOENT),
            (FsError::InvalidArgument, libc::EINVAL),
            (FsError::AlreadyExists, libc::EEXIST),
            (FsError::NotADirectory, libc::ENOTDIR),
            (FsError::IsADirectory, libc::EISDIR),
            (FsError::NotEmpty, libc::ENOTEMPTY),
            (FsError::NameTooLong, libc::ENAMETOOLONG),
            (FsError::Unsupported, libc::ENOSYS),
            (FsError::Backend(StoreError::BadBlockSize(1)), libc::EIO),
        ];
        for (err, errno) in cases {
            assert_eq!(err.errno(), errno);
            assert_eq!(err.status(), -errno);
        }
    }

    #[test]
    fn missing_entry_maps_to_not_found() {
        let e: FsError = StoreError::EntryNotFound("/x".into()).into();
        assert!(matches!(e, FsError::NotFound));
        let e: FsError = WireError::Protocol("bad".into()).into();
        assert_eq!(e.errno(), libc::EIO);
        assert_eq!(to_status(Err(FsError::Unsupported)), -(libc::ENOSYS as isize));
        assert_eq!(to_status(Ok(4096)), 4096);
    }

    #[test]
    fn backend_failure_keeps_wire_cause() {
        use std::error::Error;

        let e: FsError = WireError::Backend("READONLY replica".into()).into();
        let cause = e.source().and_then(|s| s.downcast_ref::<StoreError>()).unwrap();
        assert!(matches!(cause, StoreError::Wire(WireError::Backend(msg)) if msg == "READONLY replica"));
        assert_eq!(cause.to_string(), "backend replied with error: READONLY replica");
    }
}
