//! Timeline bucketing and export serialization
//!
//! The timeline folds filtered events into fixed one-hour buckets keyed by
//! the bucket's start timestamp. Export renders a filtered slice of the
//! log as pretty JSON, a six-column CSV, or SQL INSERT statements for
//! loading into an external database.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::ChangeLogManager;
use crate::types::{ChangeEvent, ChangeEventType, EventFilter, SentinelResult};
use crate::utils::hour_bucket;

/// Export failure, surfaced before any rendering happens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    UnsupportedFormat(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::UnsupportedFormat(name) => {
                write!(f, "unsupported export format: {}", name)
            }
        }
    }
}

impl std::error::Error for ExportError {}

/// Supported export renderings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Sql,
}

impl ExportFormat {
    /// Parse a caller-supplied format name, case-insensitively.
    pub fn parse(name: &str) -> Result<Self, ExportError> {
        match name.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "sql" => Ok(ExportFormat::Sql),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// One hour of activity: total count plus a per-type breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineBucket {
    /// Bucket start, epoch milliseconds, aligned to the hour
    pub timestamp: i64,
    pub count: usize,
    pub types: HashMap<ChangeEventType, usize>,
}

/// Fold matching events into hour buckets, ascending by bucket start.
///
/// Empty hours between active ones are not materialized.
pub fn get_timeline(
    manager: &ChangeLogManager,
    filter: &EventFilter,
) -> SentinelResult<Vec<TimelineBucket>> {
    let events = manager.get_events(filter)?;

    let mut buckets: BTreeMap<i64, TimelineBucket> = BTreeMap::new();
    for event in &events {
        let start = hour_bucket(event.timestamp);
        let bucket = buckets.entry(start).or_insert_with(|| TimelineBucket {
            timestamp: start,
            count: 0,
            types: HashMap::new(),
        });
        bucket.count += 1;
        *bucket.types.entry(event.event_type).or_insert(0) += 1;
    }

    Ok(buckets.into_values().collect())
}

/// Render the filtered events in the requested format.
pub fn export_data(
    manager: &ChangeLogManager,
    filter: &EventFilter,
    format: ExportFormat,
) -> SentinelResult<String> {
    let events = manager.get_events(filter)?;
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&events)?),
        ExportFormat::Csv => Ok(to_csv(&events)),
        ExportFormat::Sql => Ok(to_sql(&events)),
    }
}

fn to_csv(events: &[ChangeEvent]) -> String {
    let mut out = String::from("id,type,severity,source,timestamp,projectId\n");
    for event in events {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_field(&event.id),
            csv_field(&event.event_type.to_string()),
            csv_field(&event.severity.to_string()),
            csv_field(&event.source.to_string()),
            event.timestamp,
            csv_field(event.project_id.as_deref().unwrap_or("")),
        ));
    }
    out
}

/// Quote a CSV field when it contains a delimiter, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn to_sql(events: &[ChangeEvent]) -> String {
    let mut out = String::new();
    for event in events {
        let project = match &event.project_id {
            Some(p) => format!("'{}'", sql_escape(p)),
            None => "NULL".to_string(),
        };
        out.push_str(&format!(
            "INSERT INTO change_events (id, type, severity, source, timestamp, project_id) \
             VALUES ('{}', '{}', '{}', '{}', {}, {});\n",
            sql_escape(&event.id),
            event.event_type,
            event.severity,
            event.source,
            event.timestamp,
            project,
        ));
    }
    out
}

fn sql_escape(value: &str) -> String {
    value.replace('\'', "''")
}
