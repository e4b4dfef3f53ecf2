//! Path-safety checks for externally supplied file names.
//!
//! Every user-controlled path (OTA version/platform, asset names, cache
//! delete targets) must resolve inside its declared root. Symlinks are
//! resolved before the prefix check so a link cannot smuggle a path out of
//! the root.

use std::path::{Path, PathBuf};

use crate::error::{Result, RoostError};

/// Resolve `candidate` and require it to stay under `root`.
///
/// The candidate does not need to exist yet: the deepest existing ancestor is
/// canonicalized (resolving symlinks and `..`), then the not-yet-created tail
/// is re-appended. A tail that still contains parent or root components is
/// rejected outright.
///
/// Returns the fully resolved path on success.
pub fn resolve_under(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let root = std::fs::canonicalize(root)
        .map_err(|e| RoostError::PathUnsafe(format!("root {} unavailable: {e}", root.display())))?;

    // Walk up until an existing ancestor is found, collecting the missing
    // tail. `file_name()` returns None for `..` and `/` components, which
    // rejects any attempt to step out through a not-yet-created path.
    let mut existing = candidate.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_owned());
                existing = parent.to_path_buf();
            }
            _ => {
                return Err(RoostError::PathUnsafe(format!(
                    "invalid asset path {}",
                    candidate.display()
                )));
            }
        }
    }

    let mut resolved = std::fs::canonicalize(&existing).map_err(|e| {
        RoostError::PathUnsafe(format!("cannot resolve {}: {e}", existing.display()))
    })?;
    for name in tail.iter().rev() {
        resolved.push(name);
    }

    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(RoostError::PathUnsafe(format!(
            "invalid asset path {}",
            candidate.display()
        )))
    }
}
