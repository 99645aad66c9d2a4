//! Atomic file operations
//!
//! The event log, snapshots and backups are rewritten with the same
//! discipline everywhere:
//!
//! 1. Write to a temporary file (.tmp)
//! 2. Call sync_all() to flush to disk
//! 3. Rename the temp file onto the final path (atomic on most filesystems)
//!
//! A reader therefore always sees either the old file or the new file,
//! never a partially written one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

pub type AtomicResult<T> = Result<T, AtomicError>;

#[derive(Debug)]
pub enum AtomicError {
    Io(io::Error),
}

impl std::fmt::Display for AtomicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtomicError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for AtomicError {}

impl From<io::Error> for AtomicError {
    fn from(e: io::Error) -> Self {
        AtomicError::Io(e)
    }
}

/// Atomically replace `path` with `content`.
///
/// Parent directories are created as needed. The temp file lives next to
/// the target so the rename stays on one filesystem.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &str) -> AtomicResult<()> {
    atomic_write_with(path, |file| file.write_all(content.as_bytes()))
}

/// Atomically replace `path` using a writer closure.
///
/// Preferred for log rewrites where streaming line by line avoids building
/// the whole file in memory.
///
/// ```ignore
/// atomic_write_with(&events_path, |file| {
///     for event in &kept {
///         writeln!(file, "{}", event.to_json_line()?)?;
///     }
///     Ok(())
/// })?;
/// ```
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> AtomicResult<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&temp_path)?;
    write_fn(&mut file)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Rename `from` onto `to`, moving any existing `to` aside first.
///
/// Returns `Ok(false)` when the source does not exist. When a `backup`
/// path is given, the previous destination survives there so a failed
/// restore can be undone.
pub fn safe_rename<P1, P2, P3>(from: P1, to: P2, backup: Option<P3>) -> AtomicResult<bool>
where
    P1: AsRef<Path>,
    P2: AsRef<Path>,
    P3: AsRef<Path>,
{
    let from = from.as_ref();
    let to = to.as_ref();

    if !from.exists() {
        return Ok(false);
    }

    if let Some(backup_path) = backup {
        if to.exists() {
            let backup = backup_path.as_ref();
            if backup.exists() {
                fs::remove_file(backup)?;
            }
            fs::rename(to, backup)?;
        }
    }

    fs::rename(from, to)?;

    Ok(true)
}

/// Remove `.tmp` leftovers from interrupted rewrites.
///
/// Run at store initialization; an orphaned temp file means a crash
/// happened between write and rename, and the final file is still the
/// previous consistent version.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> AtomicResult<usize> {
    let dir = dir.as_ref();
    let mut cleaned = 0;

    if !dir.exists() {
        return Ok(0);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().map(|e| e == "tmp").unwrap_or(false) {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
