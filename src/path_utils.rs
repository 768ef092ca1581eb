//! Path normalization for the VFS namespace.
//!
//! Paths are POSIX-style, absolute, `/`-separated strings. This module turns
//! them into a normalized segment list the [`crate::vfs::resolver::PathResolver`]
//! can walk from the root, rejecting `..`-escapes and malformed segments.

use crate::error::{Error, Result};

/// Normalize an absolute VFS path into its non-empty segments.
///
/// `.` segments are dropped. `..` segments pop the previous segment; a `..`
/// with no preceding segment to pop is an escape past the root and is
/// rejected. The empty path and relative paths (not starting with `/`) are
/// rejected. The root path `/` normalizes to zero segments.
pub fn normalize(path: &str) -> Result<Vec<String>> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath(
            path.to_string(),
            "path must be absolute".to_string(),
        ));
    }

    let mut segments: Vec<String> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::InvalidPath(
                        path.to_string(),
                        "path escapes root".to_string(),
                    ));
                }
            }
            seg => {
                if seg.contains('\0') {
                    return Err(Error::InvalidPath(
                        path.to_string(),
                        "segment contains NUL".to_string(),
                    ));
                }
                segments.push(seg.to_string());
            }
        }
    }

    Ok(segments)
}

/// Split a normalized path into its parent segment list and final segment
/// name. Returns `None` for the root path (no parent, no name).
pub fn split_parent(segments: &[String]) -> Option<(&[String], &str)> {
    let (last, rest) = segments.split_last()?;
    Some((rest, last.as_str()))
}

/// Re-join normalized segments back into a canonical absolute path string.
pub fn join(segments: &[String]) -> String {
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}
