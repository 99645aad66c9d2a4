//! Store maintenance: snapshots, archives, backup and restore
//!
//! A snapshot is a JSONL file whose first line is `SnapshotMeta` and whose
//! remaining lines are the full live event set at snapshot time. Compaction
//! snapshots the live set, moves the superseded log segment into the
//! archive directory and starts a fresh log. The previous snapshot is kept
//! as a fallback for a torn write.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::ChangeEvent;
use crate::utils::{atomic_write_with, now_millis, safe_rename};

use super::store::{EventStoreConfig, EventStoreError, EventStoreResult};

/// Bumped when the snapshot layout changes
pub const SNAPSHOT_FORMAT_VERSION: &str = "1.0";

/// First line of every snapshot file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Always "snapshot_meta"; a first line without it is not a snapshot
    #[serde(rename = "type")]
    pub meta_type: String,
    #[serde(rename = "eventCount")]
    pub event_count: usize,
    #[serde(rename = "lastEventId")]
    pub last_event_id: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    pub version: String,
}

impl SnapshotMeta {
    fn new(events: &[ChangeEvent]) -> Self {
        Self {
            meta_type: "snapshot_meta".to_string(),
            event_count: events.len(),
            last_event_id: events.last().map(|e| e.id.clone()),
            created_at: now_millis(),
            version: SNAPSHOT_FORMAT_VERSION.to_string(),
        }
    }

    pub fn from_json_line(line: &str) -> EventStoreResult<Self> {
        let meta: SnapshotMeta = serde_json::from_str(line).map_err(|e| {
            EventStoreError::SnapshotCorrupted(format!("unreadable meta line: {}", e))
        })?;
        if meta.meta_type != "snapshot_meta" {
            return Err(EventStoreError::SnapshotCorrupted(format!(
                "first line has type {:?}, expected snapshot_meta",
                meta.meta_type
            )));
        }
        Ok(meta)
    }
}

/// Write a snapshot of `events`, rotating any existing snapshot to the
/// previous slot first.
pub fn write_snapshot(
    config: &EventStoreConfig,
    events: &[ChangeEvent],
) -> EventStoreResult<SnapshotMeta> {
    let latest_path = config.latest_snapshot_path();
    let previous_path = config.previous_snapshot_path();
    let temp_path = latest_path.with_extension("tmp");

    fs::create_dir_all(config.snapshots_dir())?;

    let meta = SnapshotMeta::new(events);

    {
        let mut file = File::create(&temp_path)?;
        writeln!(file, "{}", serde_json::to_string(&meta)?)?;
        for event in events {
            writeln!(file, "{}", event.to_json_line()?)?;
        }
        file.sync_all()?;
    }

    // Keep the superseded snapshot as a fallback
    if previous_path.exists() {
        fs::remove_file(&previous_path)?;
    }
    safe_rename(&latest_path, &previous_path, None::<&Path>)?;
    fs::rename(&temp_path, &latest_path)?;

    info!(
        events = meta.event_count,
        last_event_id = ?meta.last_event_id,
        "wrote snapshot"
    );
    Ok(meta)
}

/// Load the latest snapshot, falling back to the previous one when the
/// latest is unreadable. `Ok(None)` means no snapshot exists at all.
pub fn load_snapshot(
    config: &EventStoreConfig,
) -> EventStoreResult<Option<(SnapshotMeta, Vec<ChangeEvent>)>> {
    let latest_path = config.latest_snapshot_path();
    if !latest_path.exists() {
        return Ok(None);
    }

    match read_snapshot_file(&latest_path) {
        Ok(loaded) => Ok(Some(loaded)),
        Err(e) => {
            let previous_path = config.previous_snapshot_path();
            if previous_path.exists() {
                warn!(error = %e, "latest snapshot unreadable, using previous");
                Ok(Some(read_snapshot_file(&previous_path)?))
            } else {
                Err(e)
            }
        }
    }
}

fn read_snapshot_file(path: &Path) -> EventStoreResult<(SnapshotMeta, Vec<ChangeEvent>)> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let meta_line = lines
        .next()
        .ok_or_else(|| EventStoreError::SnapshotCorrupted("empty snapshot file".to_string()))??;
    let meta = SnapshotMeta::from_json_line(&meta_line)?;

    let mut events = Vec::with_capacity(meta.event_count);
    for (line_num, line_result) in lines.enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let event = ChangeEvent::from_json_line(&line).map_err(|e| {
            EventStoreError::SnapshotCorrupted(format!("line {}: {}", line_num + 2, e))
        })?;
        events.push(event);
    }

    if events.len() != meta.event_count {
        warn!(
            expected = meta.event_count,
            found = events.len(),
            "snapshot event count differs from meta"
        );
    }

    Ok((meta, events))
}

/// Delete both snapshot slots. Run after `cleanup()` so a stale snapshot
/// cannot resurrect expired events.
pub fn clear_snapshots(config: &EventStoreConfig) -> EventStoreResult<()> {
    for path in [config.latest_snapshot_path(), config.previous_snapshot_path()] {
        if path.exists() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Atomically replace the live log with exactly `events`.
pub fn rewrite_live_log(
    config: &EventStoreConfig,
    events: &[ChangeEvent],
) -> EventStoreResult<()> {
    atomic_write_with(config.events_path(), |file| {
        for event in events {
            let line = event
                .to_json_line()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    })?;
    Ok(())
}

/// What a compaction run did
#[derive(Debug, Clone)]
pub struct CompactionReport {
    /// Events captured in the new snapshot
    pub snapshot_events: usize,
    /// Log lines moved into the archive
    pub archived_events: usize,
    /// Archive file holding the superseded log segment, if one was written
    pub archive_path: Option<PathBuf>,
}

/// Snapshot the live set and archive the superseded log segment.
///
/// `EventStore::compact()` calls this with its write lock held, so no
/// append can land between the snapshot and the log swap.
pub fn compact(
    config: &EventStoreConfig,
    events: &[ChangeEvent],
) -> EventStoreResult<CompactionReport> {
    if events.is_empty() {
        return Ok(CompactionReport {
            snapshot_events: 0,
            archived_events: 0,
            archive_path: None,
        });
    }

    write_snapshot(config, events)?;

    let events_path = config.events_path();
    let mut archived_events = 0usize;
    let mut archive_path = None;

    if events_path.exists() {
        archived_events = count_event_lines(&events_path)?;
        if archived_events > 0 {
            let archive_dir = config.archive_dir();
            fs::create_dir_all(&archive_dir)?;

            let first_ts = events.first().map(|e| e.timestamp).unwrap_or(0);
            let last_ts = events.last().map(|e| e.timestamp).unwrap_or(0);
            let target = unique_archive_path(&archive_dir, first_ts, last_ts);

            fs::rename(&events_path, &target)?;
            archive_path = Some(target);
        } else {
            fs::remove_file(&events_path)?;
        }
    }

    info!(
        snapshot_events = events.len(),
        archived_events,
        "compacted event store"
    );

    Ok(CompactionReport {
        snapshot_events: events.len(),
        archived_events,
        archive_path,
    })
}

/// Archive names embed the covered time range; a numeric suffix keeps
/// them unique when ranges repeat.
fn unique_archive_path(archive_dir: &Path, first_ts: i64, last_ts: i64) -> PathBuf {
    let base = archive_dir.join(format!("events_{}_to_{}.jsonl", first_ts, last_ts));
    if !base.exists() {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate =
            archive_dir.join(format!("events_{}_to_{}_{}.jsonl", first_ts, last_ts, n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn count_event_lines(path: &Path) -> EventStoreResult<usize> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut count = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Information about an archive file
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub size: u64,
    pub event_count: usize,
}

/// All archive files, ordered by filename (which embeds the time range)
pub fn list_archives(config: &EventStoreConfig) -> EventStoreResult<Vec<ArchiveInfo>> {
    let archive_dir = config.archive_dir();
    if !archive_dir.exists() {
        return Ok(Vec::new());
    }

    let mut archives = Vec::new();
    for entry in fs::read_dir(&archive_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            let size = entry.metadata()?.len();
            let event_count = count_event_lines(&path)?;
            archives.push(ArchiveInfo {
                path,
                size,
                event_count,
            });
        }
    }

    archives.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(archives)
}

/// Delete all but the newest `keep_count` archives. Returns the number
/// deleted.
pub fn cleanup_old_archives(
    config: &EventStoreConfig,
    keep_count: usize,
) -> EventStoreResult<usize> {
    let mut archives = list_archives(config)?;
    if archives.len() <= keep_count {
        return Ok(0);
    }

    archives.sort_by(|a, b| b.path.file_name().cmp(&a.path.file_name()));

    let to_delete = &archives[keep_count..];
    for archive in to_delete {
        fs::remove_file(&archive.path)?;
        info!(path = %archive.path.display(), "deleted old archive");
    }

    Ok(to_delete.len())
}

/// Write `events` to a backup file under `location` (directory), or the
/// configured backup directory when `None`. Returns bytes written.
pub fn write_backup(
    config: &EventStoreConfig,
    events: &[ChangeEvent],
    location: Option<&Path>,
) -> EventStoreResult<u64> {
    let dest_dir = location
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| config.backup_path());
    fs::create_dir_all(&dest_dir)?;

    let dest_file = dest_dir.join("events.jsonl");

    atomic_write_with(&dest_file, |file| {
        for event in events {
            let line = event
                .to_json_line()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    })?;

    let bytes = fs::metadata(&dest_file)?.len();
    info!(
        events = events.len(),
        bytes,
        path = %dest_file.display(),
        "backup written"
    );
    Ok(bytes)
}

/// Read every event from a backup, strictly.
///
/// `location` may be the backup directory or the backup file itself.
/// Unlike log loading one bad line fails the whole read, a partial
/// restore would silently lose history.
pub fn read_backup_events(location: &Path) -> EventStoreResult<Vec<ChangeEvent>> {
    let backup_file = if location.is_dir() {
        location.join("events.jsonl")
    } else {
        location.to_path_buf()
    };
    if !backup_file.exists() {
        return Err(EventStoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("backup file not found: {}", backup_file.display()),
        )));
    }

    let file = File::open(&backup_file)?;
    let reader = BufReader::new(file);
    let mut events: Vec<ChangeEvent> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let event = ChangeEvent::from_json_line(&line).map_err(|e| {
            EventStoreError::InvalidEvent(format!("backup line {}: {}", line_num + 1, e))
        })?;
        if !seen.insert(event.id.clone()) {
            return Err(EventStoreError::DuplicateEvent(event.id.clone()));
        }
        events.push(event);
    }

    Ok(events)
}

/// Swap the persisted state over to `events`.
///
/// `EventStore::restore()` calls this with its write lock held. The
/// superseded live log survives as `events.jsonl.backup` until the next
/// restore.
pub fn restore_files(config: &EventStoreConfig, events: &[ChangeEvent]) -> EventStoreResult<()> {
    let events_path = config.events_path();
    if events_path.exists() {
        let undo_path = config.data_dir().join("events.jsonl.backup");
        fs::copy(&events_path, &undo_path)?;
    }

    rewrite_live_log(config, events)?;
    clear_snapshots(config)?;
    Ok(())
}
