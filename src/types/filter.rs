//! Event filtering, sorting and pagination
//!
//! One `EventFilter` shape serves queries, counts, statistics, exports and
//! replay-session construction. Every field is optional; an absent field
//! is unconstrained, and the set fields combine conjunctively.

use serde::{Deserialize, Serialize};

use super::event::{ChangeEvent, ChangeEventType, EventSeverity, EventSource, ProcessingStatus};

/// Inclusive timestamp range in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    Timestamp,
    Severity,
    EventType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Sort specification; the default is `timestamp DESC`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SortSpec {
    pub field: SortField,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn ascending(field: SortField) -> Self {
        Self {
            field,
            order: SortOrder::Asc,
        }
    }
}

/// Conjunctive event predicate plus sort and pagination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<ChangeEventType>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub severities: Option<Vec<EventSeverity>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<EventSource>>,

    #[serde(rename = "projectIds", skip_serializing_if = "Option::is_none")]
    pub project_ids: Option<Vec<String>>,

    #[serde(rename = "changeIds", skip_serializing_if = "Option::is_none")]
    pub change_ids: Option<Vec<String>>,

    #[serde(rename = "correlationIds", skip_serializing_if = "Option::is_none")]
    pub correlation_ids: Option<Vec<String>>,

    #[serde(rename = "sessionIds", skip_serializing_if = "Option::is_none")]
    pub session_ids: Option<Vec<String>>,

    #[serde(rename = "userIds", skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,

    #[serde(rename = "processingStatuses", skip_serializing_if = "Option::is_none")]
    pub processing_statuses: Option<Vec<ProcessingStatus>>,

    #[serde(rename = "timeRange", skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl EventFilter {
    /// Filter that matches everything, default sort, no pagination.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: &[ChangeEventType]) -> Self {
        self.types = Some(types.to_vec());
        self
    }

    pub fn with_severities(mut self, severities: &[EventSeverity]) -> Self {
        self.severities = Some(severities.to_vec());
        self
    }

    pub fn with_sources(mut self, sources: &[EventSource]) -> Self {
        self.sources = Some(sources.to_vec());
        self
    }

    pub fn for_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_ids = Some(vec![project_id.into()]);
        self
    }

    pub fn for_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_ids = Some(vec![correlation_id.into()]);
        self
    }

    pub fn in_range(mut self, start: i64, end: i64) -> Self {
        self.time_range = Some(TimeRange::new(start, end));
        self
    }

    pub fn sorted(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn paged(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Whether the event passes every set predicate.
    ///
    /// Sort and pagination are applied by the store after matching, never
    /// here.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(severities) = &self.severities {
            if !severities.contains(&event.severity) {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.contains(&event.source) {
                return false;
            }
        }
        if let Some(ids) = &self.project_ids {
            if !matches_optional_field(&event.project_id, ids) {
                return false;
            }
        }
        if let Some(ids) = &self.change_ids {
            if !matches_optional_field(&event.change_id, ids) {
                return false;
            }
        }
        if let Some(ids) = &self.correlation_ids {
            if !matches_optional_field(&event.correlation_id, ids) {
                return false;
            }
        }
        if let Some(ids) = &self.session_ids {
            if !matches_optional_field(&event.session_id, ids) {
                return false;
            }
        }
        if let Some(ids) = &self.user_ids {
            if !matches_optional_field(&event.user_id, ids) {
                return false;
            }
        }
        if let Some(statuses) = &self.processing_statuses {
            if !statuses.contains(&event.processing.status) {
                return false;
            }
        }
        if let Some(range) = &self.time_range {
            if !range.contains(event.timestamp) {
                return false;
            }
        }
        true
    }

    /// Effective sort spec (`timestamp DESC` when unset).
    pub fn effective_sort(&self) -> SortSpec {
        self.sort.unwrap_or_default()
    }
}

/// An event whose correlation field is unset cannot match a constraint on
/// that field.
fn matches_optional_field(value: &Option<String>, allowed: &[String]) -> bool {
    match value {
        Some(v) => allowed.iter().any(|a| a == v),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::{EventPayload, SystemEventData};

    fn system_event(id: &str, severity: EventSeverity, timestamp: i64) -> ChangeEvent {
        ChangeEvent::new(
            id.to_string(),
            ChangeEventType::SystemEvent,
            severity,
            EventSource::System,
            timestamp,
            EventPayload::System(SystemEventData {
                message: "test".to_string(),
                component: None,
                details: None,
            }),
        )
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let event = system_event("evt_1", EventSeverity::Info, 1_000);
        assert!(EventFilter::all().matches(&event));
    }

    #[test]
    fn test_predicates_compose_conjunctively() {
        let event = system_event("evt_1", EventSeverity::Error, 5_000).with_project("proj-1");

        let matching = EventFilter::all()
            .with_types(&[ChangeEventType::SystemEvent])
            .with_severities(&[EventSeverity::Error, EventSeverity::Critical])
            .for_project("proj-1")
            .in_range(1_000, 10_000);
        assert!(matching.matches(&event));

        // Same filter with one predicate off
        let not_matching = matching.clone().in_range(6_000, 10_000);
        assert!(!not_matching.matches(&event));
    }

    #[test]
    fn test_unset_correlation_field_fails_constraint() {
        let event = system_event("evt_1", EventSeverity::Info, 1_000);
        let filter = EventFilter::all().for_project("proj-1");
        assert!(!filter.matches(&event));
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let range = TimeRange::new(1_000, 2_000);
        assert!(range.contains(1_000));
        assert!(range.contains(2_000));
        assert!(!range.contains(2_001));
    }

    #[test]
    fn test_default_sort_is_timestamp_desc() {
        let sort = EventFilter::all().effective_sort();
        assert_eq!(sort.field, SortField::Timestamp);
        assert_eq!(sort.order, SortOrder::Desc);
    }
}
