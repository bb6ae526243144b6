//! File tree enumeration and path handling for the sync boundary.
//!
//! Both sides describe a tree as tables of root-relative paths with `/`
//! separators, so the comparison in the watcher is platform neutral.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::Result;

/// Size and mtime of one file, as exchanged in tree tables.
///
/// Two files are considered in sync when these match; content is never
/// compared during polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// File size in bytes.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
}

/// Table of all regular files under `root`, keyed by relative path.
///
/// # Errors
///
/// Returns an I/O error if the walk fails.
pub fn files(root: &Path) -> Result<BTreeMap<String, FileMeta>> {
    let mut table = BTreeMap::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative(root, entry.path()) else {
            continue;
        };
        let meta = entry.metadata().map_err(std::io::Error::from)?;
        table.insert(
            rel,
            FileMeta {
                size: meta.len(),
                mtime: unix_mtime(&meta),
            },
        );
    }
    Ok(table)
}

/// Set of all directories under `root`, relative, excluding the root itself.
///
/// # Errors
///
/// Returns an I/O error if the walk fails.
pub fn dirs(root: &Path) -> Result<BTreeSet<String>> {
    let mut set = BTreeSet::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(rel) = relative(root, entry.path()) {
            set.insert(rel);
        }
    }
    Ok(set)
}

/// Create a directory and any missing parents.
///
/// # Errors
///
/// Returns an I/O error on failure.
pub fn mkdir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Remove a file or a whole directory tree. Missing targets are fine.
///
/// # Errors
///
/// Returns an I/O error on failure other than the target being absent.
pub fn remove_all(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Sanitize an inbound path into something safe to join to the served root.
///
/// Splits on `/` and drops every empty, `.` and `..` segment, so absolute
/// paths lose their leading root and parent references vanish entirely; the
/// result can only name something at or below the join point. `None` when
/// nothing remains. Every path received over the wire passes through here
/// before it is joined to the served root.
#[must_use]
pub fn escape(path: &str) -> Option<String> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." | ".." => continue,
            _ => parts.push(part),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Root-relative `/`-separated rendering of `path`; `None` for the root.
fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in rel.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

pub(crate) fn unix_mtime(meta: &fs::Metadata) -> i64 {
    let Ok(modified) = meta.modified() else {
        return 0;
    };
    match modified.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

#[cfg(unix)]
pub(crate) fn unix_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
pub(crate) fn unix_mode(_meta: &fs::Metadata) -> u32 {
    0
}
