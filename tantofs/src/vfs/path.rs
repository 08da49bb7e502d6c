//! Path validation and splitting.

use super::error::{FsError, FsResult};
use crate::meta::{NAME_MAX_LEN, PATH_MAX_LEN};

pub const ROOT: &str = "/";

/// Validate an absolute path and drop one trailing `/`.
pub fn normalize(path: &str) -> FsResult<&str> {
    if !path.starts_with('/') || path.contains('\0') {
        return Err(FsError::InvalidArgument);
    }
    if path.len() >= PATH_MAX_LEN {
        return Err(FsError::NameTooLong);
    }
    if path.len() > 1 {
        if let Some(stripped) = path.strip_suffix('/') {
            return Ok(stripped);
        }
    }
    Ok(path)
}

/// Split a normalized path at its last `/` into `(parent, name)`.
/// The root has no parent and cannot be split.
pub fn split(path: &str) -> FsResult<(&str, &str)> {
    let idx = path.rfind('/').ok_or(FsError::InvalidArgument)?;
    let name = &path[idx + 1..];
    validate_name(name)?;
    let parent = if idx == 0 { ROOT } else { &path[..idx] };
    Ok((parent, name))
}

pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(FsError::InvalidArgument);
    }
    if name.len() > NAME_MAX_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// `parent` joined with a single component.
pub fn join(parent: &str, name: &str) -> String {
    let mut out = String::with_capacity(parent.len() + name.len() + 1);
    out.push_str(parent);
    if !parent.ends_with('/') {
        out.push('/');
    }
    out.push_str(name);
    out
}
