//! Event store core
//!
//! Durable, queryable append-only log of `ChangeEvent` records. Events live
//! as newline-delimited JSON in `events.jsonl`; the full ordered set plus an
//! id index is kept in memory behind a `RwLock`, so reads run concurrently
//! and writes serialize. A batch is validated and serialized before any byte
//! reaches the file, which keeps `store_events` all-or-nothing.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::{ChangeEvent, EventFilter, SortField, SortOrder, SortSpec};
use crate::utils::cleanup_temp_files;

use super::maintenance;
use super::stats::{
    collect_statistics, EventStatistics, HealthMetrics, HealthStatus, StoreHealth,
};
use super::stats_cache::StatsUpdate;

/// Page size used by `event_stream`
const STREAM_PAGE_SIZE: usize = 256;

/// Configuration for the event store
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Data directory holding the log, snapshots and archives
    pub data_dir: PathBuf,
    /// Events older than this are dropped by `cleanup()`
    pub retention_ms: i64,
    /// Events in the live log before `compact()` is worthwhile
    pub snapshot_threshold: usize,
    /// Where `backup()` writes when the caller gives no location
    pub backup_dir: Option<PathBuf>,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("sentinel-data"),
            retention_ms: 30 * 24 * 3_600_000,
            snapshot_threshold: 1000,
            backup_dir: None,
        }
    }
}

impl EventStoreConfig {
    /// Config rooted at a custom data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Config from the environment: `SENTINEL_DATA_DIR` overrides the
    /// default data directory.
    pub fn from_env() -> Self {
        match std::env::var("SENTINEL_DATA_DIR") {
            Ok(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::default(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path to the live append log
    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn latest_snapshot_path(&self) -> PathBuf {
        self.snapshots_dir().join("latest.jsonl")
    }

    pub fn previous_snapshot_path(&self) -> PathBuf {
        self.snapshots_dir().join("previous.jsonl")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    /// Effective backup directory
    pub fn backup_path(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }
}

/// Result type for event store operations
pub type EventStoreResult<T> = Result<T, EventStoreError>;

#[derive(Debug)]
pub enum EventStoreError {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// The store was used before `initialize()`
    NotInitialized,
    InvalidEvent(String),
    DuplicateEvent(String),
    SnapshotCorrupted(String),
}

impl std::fmt::Display for EventStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventStoreError::Io(e) => write!(f, "IO error: {}", e),
            EventStoreError::Json(e) => write!(f, "JSON error: {}", e),
            EventStoreError::NotInitialized => {
                write!(f, "Event store used before initialize()")
            }
            EventStoreError::InvalidEvent(msg) => write!(f, "Invalid event: {}", msg),
            EventStoreError::DuplicateEvent(id) => write!(f, "Duplicate event id: {}", id),
            EventStoreError::SnapshotCorrupted(msg) => write!(f, "Snapshot corrupted: {}", msg),
        }
    }
}

impl std::error::Error for EventStoreError {}

impl From<std::io::Error> for EventStoreError {
    fn from(e: std::io::Error) -> Self {
        EventStoreError::Io(e)
    }
}

impl From<serde_json::Error> for EventStoreError {
    fn from(e: serde_json::Error) -> Self {
        EventStoreError::Json(e)
    }
}

impl From<crate::utils::atomic::AtomicError> for EventStoreError {
    fn from(e: crate::utils::atomic::AtomicError) -> Self {
        match e {
            crate::utils::atomic::AtomicError::Io(io) => EventStoreError::Io(io),
        }
    }
}

/// Ordered event list plus id index, swapped as one unit so readers never
/// see the two out of step.
#[derive(Default)]
pub(crate) struct StoreInner {
    pub(crate) events: Vec<ChangeEvent>,
    pub(crate) index: HashMap<String, usize>,
}

impl StoreInner {
    fn push(&mut self, event: ChangeEvent) {
        self.index.insert(event.id.clone(), self.events.len());
        self.events.push(event);
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
    }
}

/// The append-only change event store
pub struct EventStore {
    config: EventStoreConfig,
    inner: RwLock<StoreInner>,
    initialized: AtomicBool,
    stats_tx: RwLock<Option<mpsc::UnboundedSender<StatsUpdate>>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_config(EventStoreConfig::default())
    }

    pub fn with_config(config: EventStoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(StoreInner::default()),
            initialized: AtomicBool::new(false),
            stats_tx: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> EventStoreResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(EventStoreError::NotInitialized)
        }
    }

    /// Load persisted state: snapshot first, then the live log.
    ///
    /// Unparseable log lines are skipped with a warning; a damaged line
    /// must not take the rest of the history with it. Returns the number
    /// of events loaded.
    pub fn initialize(&self) -> EventStoreResult<usize> {
        std::fs::create_dir_all(self.config.data_dir())?;
        let mut cleaned = cleanup_temp_files(self.config.data_dir())?;
        cleaned += cleanup_temp_files(self.config.snapshots_dir())?;
        cleaned += cleanup_temp_files(self.config.archive_dir())?;
        if cleaned > 0 {
            warn!(cleaned, "removed leftover temp files from interrupted rewrite");
        }

        let mut inner = StoreInner::default();

        if let Some((meta, events)) = maintenance::load_snapshot(&self.config)? {
            info!(
                events = events.len(),
                created_at = meta.created_at,
                "loaded snapshot"
            );
            for event in events {
                if inner.index.contains_key(&event.id) {
                    warn!(id = %event.id, "skipping duplicate event in snapshot");
                    continue;
                }
                inner.push(event);
            }
        }

        let from_log = read_events_file(&self.config.events_path())?;
        let mut appended = 0usize;
        for event in from_log {
            if inner.index.contains_key(&event.id) {
                continue;
            }
            inner.push(event);
            appended += 1;
        }

        let total = inner.events.len();
        *self.inner.write() = inner;
        self.initialized.store(true, Ordering::SeqCst);

        info!(total, from_log = appended, "event store initialized");
        Ok(total)
    }

    /// Append one event.
    ///
    /// Derives `checksum` and `size`, validates, writes the JSONL line
    /// with fsync, then publishes into the in-memory index. Returns the
    /// stored id.
    pub fn store_event(&self, event: ChangeEvent) -> EventStoreResult<String> {
        self.ensure_initialized()?;

        let mut inner = self.inner.write();
        let event = Self::prepare_event(event, &inner)?;
        let line = event.to_json_line()?;

        self.append_lines(&[line])?;
        let id = event.id.clone();
        self.notify_stats(&event);
        inner.push(event);

        Ok(id)
    }

    /// Append a batch, all-or-nothing.
    ///
    /// Every event is validated and serialized before any I/O; a bad event
    /// anywhere leaves the store untouched. The whole batch goes to disk
    /// in one write with one fsync.
    pub fn store_events(&self, events: Vec<ChangeEvent>) -> EventStoreResult<Vec<String>> {
        self.ensure_initialized()?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut inner = self.inner.write();

        let mut prepared = Vec::with_capacity(events.len());
        let mut lines = Vec::with_capacity(events.len());
        let mut batch_ids: HashMap<&str, ()> = HashMap::new();

        for event in &events {
            if inner.index.contains_key(&event.id) {
                return Err(EventStoreError::DuplicateEvent(event.id.clone()));
            }
        }
        for event in events {
            let event = Self::prepare_event(event, &inner)?;
            lines.push(event.to_json_line()?);
            prepared.push(event);
        }
        for event in &prepared {
            if batch_ids.insert(event.id.as_str(), ()).is_some() {
                return Err(EventStoreError::DuplicateEvent(event.id.clone()));
            }
        }

        self.append_lines(&lines)?;

        let ids = prepared.iter().map(|e| e.id.clone()).collect();
        for event in prepared {
            self.notify_stats(&event);
            inner.push(event);
        }

        Ok(ids)
    }

    /// Derive checksum and size, then validate.
    fn prepare_event(
        mut event: ChangeEvent,
        inner: &StoreInner,
    ) -> EventStoreResult<ChangeEvent> {
        if inner.index.contains_key(&event.id) {
            return Err(EventStoreError::DuplicateEvent(event.id.clone()));
        }

        event.checksum = None;
        event.size = None;
        let submitted = event.to_json_line()?;
        event.size = Some(submitted.len() as u64);
        event.checksum = Some(event.compute_checksum()?);

        event
            .validate()
            .map_err(EventStoreError::InvalidEvent)?;

        Ok(event)
    }

    /// One buffered write and one fsync for however many lines.
    fn append_lines(&self, lines: &[String]) -> EventStoreResult<()> {
        let events_path = self.config.events_path();
        if let Some(parent) = events_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)?;

        let mut buffer = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            buffer.push_str(line);
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes())?;
        file.sync_all()?;

        Ok(())
    }

    /// Best-effort statistics-cache update. A missing or closed drain
    /// task must never affect the write path.
    fn notify_stats(&self, event: &ChangeEvent) {
        if let Some(tx) = self.stats_tx.read().as_ref() {
            // Ignore errors - just means the drain task is gone
            let _ = tx.send(StatsUpdate::from_event(event));
        }
    }

    /// Wire the statistics-cache channel. Owned by the change log
    /// manager's lifecycle.
    pub fn set_stats_sender(&self, tx: mpsc::UnboundedSender<StatsUpdate>) {
        *self.stats_tx.write() = Some(tx);
    }

    /// Drop the statistics channel; the drain task ends once the last
    /// sender is gone.
    pub fn clear_stats_sender(&self) {
        *self.stats_tx.write() = None;
    }

    /// Direct lookup by id.
    pub fn get_event(&self, id: &str) -> EventStoreResult<Option<ChangeEvent>> {
        self.ensure_initialized()?;
        let inner = self.inner.read();
        Ok(inner
            .index
            .get(id)
            .and_then(|&i| inner.events.get(i))
            .cloned())
    }

    /// Filtered, sorted, paginated event list.
    ///
    /// Predicates compose conjunctively; sort (default `timestamp DESC`)
    /// applies before pagination.
    pub fn get_events(&self, filter: &EventFilter) -> EventStoreResult<Vec<ChangeEvent>> {
        self.ensure_initialized()?;

        let inner = self.inner.read();
        let mut matched: Vec<ChangeEvent> = inner
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        drop(inner);

        sort_events(&mut matched, filter.effective_sort());

        let offset = filter.offset.unwrap_or(0);
        if offset > 0 {
            matched = matched.into_iter().skip(offset).collect();
        }
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    /// Count of matching events; pagination fields are ignored.
    pub fn get_event_count(&self, filter: Option<&EventFilter>) -> EventStoreResult<usize> {
        self.ensure_initialized()?;
        let inner = self.inner.read();
        Ok(match filter {
            None => inner.events.len(),
            Some(f) => inner.events.iter().filter(|e| f.matches(e)).count(),
        })
    }

    /// Lazy, finite, restartable stream over matching events.
    ///
    /// Page-reads the store so a consumer never holds more than one page;
    /// each call starts a fresh pass.
    pub fn event_stream(
        self: Arc<Self>,
        filter: EventFilter,
    ) -> impl Stream<Item = EventStoreResult<ChangeEvent>> {
        async_stream::stream! {
            let base_offset = filter.offset.unwrap_or(0);
            let mut remaining = filter.limit;
            let mut cursor = 0usize;

            loop {
                let page_size = match remaining {
                    Some(r) => r.min(STREAM_PAGE_SIZE),
                    None => STREAM_PAGE_SIZE,
                };
                if page_size == 0 {
                    break;
                }

                let mut page_filter = filter.clone();
                page_filter.offset = Some(base_offset + cursor);
                page_filter.limit = Some(page_size);

                let page = match self.get_events(&page_filter) {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };

                let fetched = page.len();
                for event in page {
                    yield Ok(event);
                }

                cursor += fetched;
                if let Some(r) = remaining.as_mut() {
                    *r = r.saturating_sub(fetched);
                }
                if fetched < page_size {
                    break;
                }
            }
        }
    }

    /// Statistics over the matching slice (whole store when no filter).
    pub fn get_statistics(
        &self,
        filter: Option<&EventFilter>,
    ) -> EventStoreResult<EventStatistics> {
        self.ensure_initialized()?;
        let storage_bytes = self.get_size()?;
        let inner = self.inner.read();
        Ok(match filter {
            None => collect_statistics(&inner.events, storage_bytes),
            Some(f) => {
                let matched: Vec<ChangeEvent> = inner
                    .events
                    .iter()
                    .filter(|e| f.matches(e))
                    .cloned()
                    .collect();
                collect_statistics(&matched, storage_bytes)
            }
        })
    }

    /// Drop events older than the retention horizon and rewrite the
    /// persisted state to the surviving set. Returns the deleted count.
    pub fn cleanup(&self) -> EventStoreResult<usize> {
        self.ensure_initialized()?;
        let horizon = crate::utils::now_millis() - self.config.retention_ms;

        let mut inner = self.inner.write();
        let before = inner.events.len();
        let kept: Vec<ChangeEvent> = inner
            .events
            .iter()
            .filter(|e| e.timestamp >= horizon)
            .cloned()
            .collect();
        let deleted = before - kept.len();

        if deleted == 0 {
            return Ok(0);
        }

        // Everything surviving goes back into the live log; stale
        // snapshots would resurrect deleted events on restart.
        maintenance::rewrite_live_log(&self.config, &kept)?;
        maintenance::clear_snapshots(&self.config)?;

        inner.events = kept;
        inner.rebuild_index();
        drop(inner);

        info!(deleted, horizon, "cleanup removed expired events");
        Ok(deleted)
    }

    /// Snapshot the live set and archive the superseded log segment.
    ///
    /// Holds the write lock across the file swap so no append can land
    /// between snapshot and archive.
    pub fn compact(&self) -> EventStoreResult<maintenance::CompactionReport> {
        self.ensure_initialized()?;
        let inner = self.inner.write();
        maintenance::compact(&self.config, &inner.events)
    }

    /// Rebuild the id index from the event list. Returns the entry count.
    pub fn reindex(&self) -> EventStoreResult<usize> {
        self.ensure_initialized()?;
        let mut inner = self.inner.write();
        inner.rebuild_index();
        Ok(inner.index.len())
    }

    /// Integrity audit: checksums recompute, ids are unique, timestamps
    /// never decrease in storage order.
    pub fn verify(&self) -> EventStoreResult<bool> {
        self.ensure_initialized()?;
        let inner = self.inner.read();

        let mut last_timestamp = i64::MIN;
        for event in &inner.events {
            match &event.checksum {
                Some(stored) => {
                    let computed = event.compute_checksum()?;
                    if *stored != computed {
                        warn!(id = %event.id, "checksum mismatch");
                        return Ok(false);
                    }
                }
                None => {
                    warn!(id = %event.id, "stored event missing checksum");
                    return Ok(false);
                }
            }
            if event.timestamp < last_timestamp {
                warn!(id = %event.id, "timestamp regression in log order");
                return Ok(false);
            }
            last_timestamp = event.timestamp;
        }

        if inner.index.len() != inner.events.len() {
            warn!("index and event list sizes differ");
            return Ok(false);
        }

        Ok(true)
    }

    /// Copy the full data set to `location` (defaults to the configured
    /// backup directory). Returns bytes written.
    pub fn backup(&self, location: Option<&Path>) -> EventStoreResult<u64> {
        self.ensure_initialized()?;
        let events = self.snapshot_events();
        maintenance::write_backup(&self.config, &events, location)
    }

    /// Replace the store's contents from a backup. Returns the loaded
    /// event count.
    pub fn restore(&self, location: &Path) -> EventStoreResult<usize> {
        self.ensure_initialized()?;
        let events = maintenance::read_backup_events(location)?;
        let count = events.len();

        let mut inner = self.inner.write();
        maintenance::restore_files(&self.config, &events)?;
        inner.events = events;
        inner.rebuild_index();
        drop(inner);

        info!(events = count, path = %location.display(), "restored from backup");
        Ok(count)
    }

    /// Archive files written by past compactions.
    pub fn list_archives(&self) -> EventStoreResult<Vec<maintenance::ArchiveInfo>> {
        maintenance::list_archives(&self.config)
    }

    /// Delete all but the newest `keep_count` archives.
    pub fn cleanup_old_archives(&self, keep_count: usize) -> EventStoreResult<usize> {
        maintenance::cleanup_old_archives(&self.config, keep_count)
    }

    /// Total bytes on disk under the data directory.
    pub fn get_size(&self) -> EventStoreResult<u64> {
        Ok(dir_size(self.config.data_dir())?)
    }

    /// Health summary: cheap checks only, nothing that scans every event.
    pub fn get_health(&self) -> StoreHealth {
        let mut issues = Vec::new();

        if !self.is_initialized() {
            return StoreHealth {
                status: HealthStatus::Unhealthy,
                issues: vec!["store not initialized".to_string()],
                metrics: HealthMetrics::default(),
            };
        }

        let storage_bytes = self.get_size().unwrap_or_else(|e| {
            issues.push(format!("cannot read storage size: {}", e));
            0
        });

        let inner = self.inner.read();
        if inner.index.len() != inner.events.len() {
            issues.push(format!(
                "index entries ({}) != event count ({})",
                inner.index.len(),
                inner.events.len()
            ));
        }

        let metrics = HealthMetrics {
            event_count: inner.events.len(),
            storage_bytes,
            last_event_timestamp: inner.events.last().map(|e| e.timestamp).unwrap_or(0),
            index_entries: inner.index.len(),
        };
        drop(inner);

        let status = if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        StoreHealth {
            status,
            issues,
            metrics,
        }
    }

    /// Clone of the full ordered event list, for maintenance rewrites.
    pub(crate) fn snapshot_events(&self) -> Vec<ChangeEvent> {
        self.inner.read().events.clone()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

/// In-place sort by the given spec, ties broken by id so results are
/// deterministic.
pub(crate) fn sort_events(events: &mut [ChangeEvent], spec: SortSpec) {
    events.sort_by(|a, b| {
        let ordering = match spec.field {
            SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortField::Severity => a.severity.cmp(&b.severity),
            SortField::EventType => a.event_type.to_string().cmp(&b.event_type.to_string()),
        };
        let ordering = match spec.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    });
}

/// Read every parseable event from a JSONL file, skipping damaged lines
/// with a warning.
pub(crate) fn read_events_file(path: &Path) -> EventStoreResult<Vec<ChangeEvent>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        match ChangeEvent::from_json_line(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = line_num + 1,
                    error = %e,
                    "skipping unparseable event line"
                );
            }
        }
    }

    Ok(events)
}

/// Recursive size of a directory in bytes; missing directory is zero.
fn dir_size(path: &Path) -> std::io::Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut total = 0u64;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}
