//! Full-record substring search
//!
//! Matches a case-insensitive needle against the serialized JSON of each
//! event, so ids, payload fields and tags are all searchable without a
//! dedicated index. Structured constraints still come from the filter;
//! pagination applies to the matched set, not the candidates.

use rayon::prelude::*;

use super::ChangeLogManager;
use crate::types::{ChangeEvent, EventFilter, SentinelResult};

/// Below this candidate count parallelism costs more than it saves.
const PARALLEL_SEARCH_THRESHOLD: usize = 1000;

/// Case-insensitive substring search over serialized events.
///
/// The filter's predicates and sort are honored; its `limit`/`offset`
/// apply to the matched results.
pub fn search_events(
    manager: &ChangeLogManager,
    query: &str,
    filter: &EventFilter,
) -> SentinelResult<Vec<ChangeEvent>> {
    let mut candidate_filter = filter.clone();
    candidate_filter.limit = None;
    candidate_filter.offset = None;
    let candidates = manager.get_events(&candidate_filter)?;

    let needle = query.to_lowercase();
    let matches_needle = |event: &ChangeEvent| -> bool {
        event
            .to_json_line()
            .map(|line| line.to_lowercase().contains(&needle))
            .unwrap_or(false)
    };

    // Parallel scan only pays off for large candidate sets
    let matched: Vec<ChangeEvent> = if candidates.len() > PARALLEL_SEARCH_THRESHOLD {
        candidates
            .par_iter()
            .filter(|e| matches_needle(e))
            .cloned()
            .collect()
    } else {
        candidates.into_iter().filter(matches_needle).collect()
    };

    let offset = filter.offset.unwrap_or(0);
    let limited = matched.into_iter().skip(offset);
    Ok(match filter.limit {
        Some(limit) => limited.take(limit).collect(),
        None => limited.collect(),
    })
}
