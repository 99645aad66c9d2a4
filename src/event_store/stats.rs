//! Event store statistics and health
//!
//! Aggregate statistics over a slice of events (counts by type, severity
//! and source, time span, error rate) plus the cheap health summary the
//! store exposes for monitoring.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::{ChangeEvent, ChangeEventType, EventSeverity, EventSource};

/// Aggregate statistics over a set of change events
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStatistics {
    /// Number of events in the aggregated slice
    #[serde(rename = "totalEvents")]
    pub total_events: usize,
    /// Count per event type
    #[serde(rename = "eventsByType")]
    pub events_by_type: HashMap<ChangeEventType, usize>,
    /// Count per severity
    #[serde(rename = "eventsBySeverity")]
    pub events_by_severity: HashMap<EventSeverity, usize>,
    /// Count per source
    #[serde(rename = "eventsBySource")]
    pub events_by_source: HashMap<EventSource, usize>,
    /// Timestamp of the oldest event, if any
    #[serde(rename = "oldestEvent")]
    pub oldest_event: Option<i64>,
    /// Timestamp of the newest event, if any
    #[serde(rename = "newestEvent")]
    pub newest_event: Option<i64>,
    /// Bytes on disk under the data directory
    #[serde(rename = "storageBytes")]
    pub storage_bytes: u64,
    /// Share of events at ERROR or CRITICAL severity, 0.0 when empty
    #[serde(rename = "errorRate")]
    pub error_rate: f64,
}

impl EventStatistics {
    /// Format size in human-readable format
    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

/// Build statistics over the given events
pub fn collect_statistics(events: &[ChangeEvent], storage_bytes: u64) -> EventStatistics {
    let mut stats = EventStatistics {
        total_events: events.len(),
        storage_bytes,
        ..Default::default()
    };

    let mut error_count = 0usize;
    for event in events {
        *stats.events_by_type.entry(event.event_type).or_insert(0) += 1;
        *stats.events_by_severity.entry(event.severity).or_insert(0) += 1;
        *stats.events_by_source.entry(event.source).or_insert(0) += 1;

        if event.severity.is_error() {
            error_count += 1;
        }

        stats.oldest_event = Some(match stats.oldest_event {
            Some(oldest) => oldest.min(event.timestamp),
            None => event.timestamp,
        });
        stats.newest_event = Some(match stats.newest_event {
            Some(newest) => newest.max(event.timestamp),
            None => event.timestamp,
        });
    }

    if !events.is_empty() {
        stats.error_rate = error_count as f64 / events.len() as f64;
    }

    stats
}

/// Health verdict reported by `get_health()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Cheap metrics attached to a health report
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthMetrics {
    #[serde(rename = "eventCount")]
    pub event_count: usize,
    #[serde(rename = "storageBytes")]
    pub storage_bytes: u64,
    #[serde(rename = "lastEventTimestamp")]
    pub last_event_timestamp: i64,
    #[serde(rename = "indexEntries")]
    pub index_entries: usize,
}

/// Store health summary
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub status: HealthStatus,
    /// Human-readable descriptions of anything wrong
    pub issues: Vec<String>,
    pub metrics: HealthMetrics,
}
