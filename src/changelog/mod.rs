//! Change log manager
//!
//! Typed facade over the event store. The manager stamps generated fields
//! (`id`, `timestamp`, `processing`) onto drafts, owns the statistics
//! drain task's lifecycle, and carries the typed logging, search, timeline
//! and export helpers:
//! - `loggers`: one helper per event family, fixing type/source/tags
//! - `search`: case-insensitive substring search over serialized events
//! - `export`: hourly timeline buckets and JSON/CSV/SQL export
//!
//! Construct one explicitly and inject it; lifecycle (`initialize`/
//! `close`) belongs to the process entry point, tests build fresh
//! instances.

mod export;
mod loggers;
mod search;

pub use export::{export_data, get_timeline, ExportError, ExportFormat, TimelineBucket};
pub use loggers::{
    log_alert, log_backup_created, log_backup_restored, log_conflict, log_db_change,
    log_failure, log_file_change, log_recovery, log_sync_operation, log_system_event,
};
pub use search::search_events;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::event_store::{
    EventStatistics, EventStore, StatsCache,
};
use crate::types::{
    ChangeEvent, ChangeEventType, EventFilter, EventMetadata, EventPayload, EventSeverity,
    EventSource, SentinelResult,
};
use crate::utils::now_millis;

/// Everything a caller provides when logging; the manager stamps the rest
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: ChangeEventType,
    pub severity: EventSeverity,
    pub source: EventSource,
    pub data: EventPayload,
    pub project_id: Option<String>,
    pub change_id: Option<String>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: EventMetadata,
}

impl EventDraft {
    pub fn new(
        event_type: ChangeEventType,
        severity: EventSeverity,
        source: EventSource,
        data: EventPayload,
    ) -> Self {
        Self {
            event_type,
            severity,
            source,
            data,
            project_id: None,
            change_id: None,
            correlation_id: None,
            session_id: None,
            user_id: None,
            metadata: EventMetadata::default(),
        }
    }

    pub fn for_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_change(mut self, change_id: impl Into<String>) -> Self {
        self.change_id = Some(change_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.metadata = EventMetadata::with_tags(tags);
        self
    }
}

/// Snapshot of the manager's lifecycle and store totals
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    #[serde(rename = "isInitialized")]
    pub is_initialized: bool,
    #[serde(rename = "eventCount")]
    pub event_count: usize,
    #[serde(rename = "storageSize")]
    pub storage_size: u64,
    /// Timestamp of the most recent event, 0 when the log is empty
    #[serde(rename = "lastEventTime")]
    pub last_event_time: i64,
}

/// Facade over the event store for all event producers
pub struct ChangeLogManager {
    store: Arc<EventStore>,
    stats_cache: Arc<StatsCache>,
    event_seq: AtomicU64,
    last_timestamp: AtomicI64,
    drain_handle: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl ChangeLogManager {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self {
            store,
            stats_cache: Arc::new(StatsCache::new()),
            event_seq: AtomicU64::new(0),
            last_timestamp: AtomicI64::new(0),
            drain_handle: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Load the store and start the statistics drain task.
    ///
    /// Must run inside the Tokio runtime; the drain task is spawned here.
    /// Returns the number of events loaded.
    pub fn initialize(&self) -> SentinelResult<usize> {
        let loaded = self.store.initialize()?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.store.set_stats_sender(tx);
        let handle = tokio::spawn(self.stats_cache.clone().run(rx));
        *self.drain_handle.lock() = Some(handle);

        self.initialized.store(true, Ordering::SeqCst);
        info!(events = loaded, "change log manager initialized");
        Ok(loaded)
    }

    /// Stop accepting events and wind down the statistics drain task.
    pub async fn close(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.store.clear_stats_sender();

        let handle = self.drain_handle.lock().take();
        if let Some(handle) = handle {
            // The drain ends on its own once the last sender is gone
            let _ = handle.await;
        }
        info!("change log manager closed");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> SentinelResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err("change log manager used before initialize()".into())
        }
    }

    /// Next logical timestamp: wall clock, never running backwards even
    /// when the clock does.
    fn next_timestamp(&self) -> i64 {
        let now = now_millis();
        let prev = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        prev.max(now)
    }

    fn stamp(&self, draft: EventDraft) -> ChangeEvent {
        let timestamp = self.next_timestamp();
        let seq = self.event_seq.fetch_add(1, Ordering::SeqCst);
        let id = format!("evt_{}_{}", timestamp, seq);

        let mut event = ChangeEvent::new(
            id,
            draft.event_type,
            draft.severity,
            draft.source,
            timestamp,
            draft.data,
        );
        event.project_id = draft.project_id;
        event.change_id = draft.change_id;
        event.correlation_id = draft.correlation_id;
        event.session_id = draft.session_id;
        event.user_id = draft.user_id;
        event.metadata = draft.metadata;
        event
    }

    /// Stamp generated fields onto the draft and store it. Returns the
    /// assigned event id.
    pub fn log_event(&self, draft: EventDraft) -> SentinelResult<String> {
        self.ensure_initialized()?;
        let event = self.stamp(draft);
        Ok(self.store.store_event(event)?)
    }

    /// Stamp and store a batch, all-or-nothing.
    pub fn log_events(&self, drafts: Vec<EventDraft>) -> SentinelResult<Vec<String>> {
        self.ensure_initialized()?;
        let events = drafts.into_iter().map(|d| self.stamp(d)).collect();
        Ok(self.store.store_events(events)?)
    }

    pub fn get_event(&self, id: &str) -> SentinelResult<Option<ChangeEvent>> {
        Ok(self.store.get_event(id)?)
    }

    pub fn get_events(&self, filter: &EventFilter) -> SentinelResult<Vec<ChangeEvent>> {
        Ok(self.store.get_events(filter)?)
    }

    pub fn get_event_count(&self, filter: Option<&EventFilter>) -> SentinelResult<usize> {
        Ok(self.store.get_event_count(filter)?)
    }

    pub fn get_statistics(
        &self,
        filter: Option<&EventFilter>,
    ) -> SentinelResult<EventStatistics> {
        Ok(self.store.get_statistics(filter)?)
    }

    /// Lifecycle flag plus store totals.
    pub fn get_status(&self) -> SentinelResult<ManagerStatus> {
        if !self.is_initialized() {
            return Ok(ManagerStatus {
                is_initialized: false,
                event_count: 0,
                storage_size: 0,
                last_event_time: 0,
            });
        }

        let newest = self.store.get_events(&EventFilter::all().paged(1, 0))?;
        Ok(ManagerStatus {
            is_initialized: true,
            event_count: self.store.get_event_count(None)?,
            storage_size: self.store.get_size()?,
            last_event_time: newest.first().map(|e| e.timestamp).unwrap_or(0),
        })
    }

    /// The underlying store, for maintenance and replay wiring.
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// The daily rollup fed by the drain task.
    pub fn stats_cache(&self) -> &Arc<StatsCache> {
        &self.stats_cache
    }
}
