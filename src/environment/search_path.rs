//! Process-wide list of directories that workflows can run programs from
//!
//! The list only grows. Registering a directory twice is a no-op, so every command invocation
//! can register its environment's resources directory without checking first.

use std::env::JoinPathsError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::debug;
use parking_lot::Mutex;

static SEARCH_PATH: Mutex<Vec<PathBuf>> = parking_lot::const_mutex(Vec::new());

/// Add `dir` to the search path. Returns `false` if it was already registered.
pub fn register(dir: &Path) -> bool {
    let mut entries = SEARCH_PATH.lock();
    if entries.iter().any(|entry| entry == dir) {
        return false;
    }
    debug!("Adding {} to the workflow search path", dir.display());
    entries.push(dir.to_path_buf());
    true
}

/// Currently registered directories, in registration order.
#[must_use]
pub fn entries() -> Vec<PathBuf> {
    SEARCH_PATH.lock().clone()
}

/// Registered directories followed by the entries of `existing` (typically `$PATH`).
///
/// # Errors
///
/// Returns `JoinPathsError` if a directory contains the platform's path separator.
pub fn joined_with(existing: Option<OsString>) -> Result<OsString, JoinPathsError> {
    let mut paths = entries();
    if let Some(existing) = existing {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths)
}
