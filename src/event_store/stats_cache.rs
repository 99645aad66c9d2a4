//! Daily statistics cache
//!
//! Day-keyed rollup of event counts, fed off the store's write path over
//! an unbounded channel so appends never wait on aggregation. The drain
//! task ends on its own once every sender is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{ChangeEvent, ChangeEventType, EventSeverity, EventSource};
use crate::utils::day_key;

/// One store write, reduced to what the daily rollup needs
#[derive(Debug, Clone)]
pub struct StatsUpdate {
    /// Calendar day key, "YYYY-MM-DD"
    pub day: String,
    pub event_type: ChangeEventType,
    pub severity: EventSeverity,
    pub source: EventSource,
}

impl StatsUpdate {
    pub fn from_event(event: &ChangeEvent) -> Self {
        Self {
            day: day_key(event.timestamp),
            event_type: event.event_type,
            severity: event.severity,
            source: event.source,
        }
    }
}

/// Rolled-up counts for one calendar day
#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyStats {
    pub total: usize,
    #[serde(rename = "byType")]
    pub by_type: HashMap<ChangeEventType, usize>,
    #[serde(rename = "bySeverity")]
    pub by_severity: HashMap<EventSeverity, usize>,
    #[serde(rename = "bySource")]
    pub by_source: HashMap<EventSource, usize>,
}

/// In-memory rollup of event counts keyed by day
pub struct StatsCache {
    days: RwLock<HashMap<String, DailyStats>>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self {
            days: RwLock::new(HashMap::new()),
        }
    }

    /// Fold one update into its day bucket.
    ///
    /// Updates carrying an unrepresentable timestamp are dropped with a
    /// warning rather than polluting a bucket.
    pub fn apply(&self, update: StatsUpdate) {
        if update.day == "invalid" {
            warn!(?update.event_type, "dropping stats update with invalid day key");
            return;
        }

        let mut days = self.days.write();
        let entry = days.entry(update.day).or_default();
        entry.total += 1;
        *entry.by_type.entry(update.event_type).or_insert(0) += 1;
        *entry.by_severity.entry(update.severity).or_insert(0) += 1;
        *entry.by_source.entry(update.source).or_insert(0) += 1;
    }

    /// Counts for one day, if anything was recorded there
    pub fn day(&self, day: &str) -> Option<DailyStats> {
        self.days.read().get(day).cloned()
    }

    /// Number of days with at least one recorded event
    pub fn day_count(&self) -> usize {
        self.days.read().len()
    }

    /// Clone of the whole rollup
    pub fn snapshot(&self) -> HashMap<String, DailyStats> {
        self.days.read().clone()
    }

    /// Run the cache drain as an async task
    ///
    /// Receives updates until the channel closes, which happens when the
    /// owning manager drops its sender on shutdown.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<StatsUpdate>) {
        while let Some(update) = rx.recv().await {
            self.apply(update);
        }
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new()
    }
}
