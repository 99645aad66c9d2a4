//! Sliding-window pattern analysis
//!
//! Runs after every recorded failure, over the trailing window only. Three
//! patterns, evaluated in priority order:
//!
//! 1. CONSECUTIVE_FAILURES: any table with enough window failures
//! 2. HIGH_FAILURE_RATE: window failures / window operations over threshold
//! 3. NOISE_DETECTED: a nonzero but small UNKNOWN_ERROR share, which
//!    signals a classification gap rather than an operational problem
//!
//! The caller admits at most one alert per cooldown window, so ordering
//! here decides which pattern wins when several fire at once.

use std::collections::HashMap;

use serde_json::json;

use super::{DetectorConfig, DetectorState, FailureRecord};
use crate::types::{AlertData, FailureType};

/// One detected failure pattern
#[derive(Debug, Clone, PartialEq)]
pub enum PatternAlert {
    ConsecutiveFailures {
        table_name: String,
        count: usize,
    },
    HighFailureRate {
        rate: f64,
        window_failures: usize,
        window_operations: usize,
    },
    NoiseDetected {
        share: f64,
        unknown_count: usize,
    },
}

impl PatternAlert {
    pub fn alert_type(&self) -> &'static str {
        match self {
            PatternAlert::ConsecutiveFailures { .. } => "CONSECUTIVE_FAILURES",
            PatternAlert::HighFailureRate { .. } => "HIGH_FAILURE_RATE",
            PatternAlert::NoiseDetected { .. } => "NOISE_DETECTED",
        }
    }

    /// Render as an alert event payload.
    pub fn to_alert_data(&self) -> AlertData {
        match self {
            PatternAlert::ConsecutiveFailures { table_name, count } => AlertData {
                alert_type: self.alert_type().to_string(),
                message: format!(
                    "{} failures for table {} inside the sliding window",
                    count, table_name
                ),
                details: Some(json!({ "tableName": table_name, "count": count })),
            },
            PatternAlert::HighFailureRate {
                rate,
                window_failures,
                window_operations,
            } => AlertData {
                alert_type: self.alert_type().to_string(),
                message: format!(
                    "failure rate {:.2} ({} of {} operations) exceeds threshold",
                    rate, window_failures, window_operations
                ),
                details: Some(json!({
                    "rate": rate,
                    "windowFailures": window_failures,
                    "windowOperations": window_operations,
                })),
            },
            PatternAlert::NoiseDetected {
                share,
                unknown_count,
            } => AlertData {
                alert_type: self.alert_type().to_string(),
                message: format!(
                    "{} unclassified failures ({:.0}% of window), possible taxonomy gap",
                    unknown_count,
                    share * 100.0
                ),
                details: Some(json!({ "share": share, "unknownCount": unknown_count })),
            },
        }
    }
}

/// Evaluate every pattern over the trailing window.
///
/// Returns the fired alerts in priority order; tables are ordered worst
/// offender first so the result is deterministic.
pub(crate) fn analyze(
    state: &DetectorState,
    config: &DetectorConfig,
    now: i64,
) -> Vec<PatternAlert> {
    let window_start = now - config.sliding_window_ms;
    let window: Vec<&FailureRecord> = state
        .failures
        .iter()
        .filter(|f| f.timestamp >= window_start)
        .collect();

    let mut alerts = Vec::new();

    let mut by_table: HashMap<&str, usize> = HashMap::new();
    for failure in &window {
        *by_table.entry(failure.table_name.as_str()).or_insert(0) += 1;
    }
    let mut offenders: Vec<(&str, usize)> = by_table
        .into_iter()
        .filter(|(_, count)| *count >= config.consecutive_failure_threshold as usize)
        .collect();
    offenders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    for (table_name, count) in offenders {
        alerts.push(PatternAlert::ConsecutiveFailures {
            table_name: table_name.to_string(),
            count,
        });
    }

    // Rate needs a denominator; with nothing tracked in the window the
    // pattern cannot be evaluated
    let window_operations = state
        .operations
        .values()
        .flat_map(|queue| queue.iter())
        .filter(|op| op.timestamp >= window_start)
        .count();
    if window_operations > 0 {
        let rate = window.len() as f64 / window_operations as f64;
        if rate > config.failure_rate_threshold {
            alerts.push(PatternAlert::HighFailureRate {
                rate,
                window_failures: window.len(),
                window_operations,
            });
        }
    }

    if config.enable_noise_filtering && !window.is_empty() {
        let unknown_count = window
            .iter()
            .filter(|f| f.failure_type == FailureType::UnknownError)
            .count();
        let share = unknown_count as f64 / window.len() as f64;
        if unknown_count > 0 && share < config.noise_threshold {
            alerts.push(PatternAlert::NoiseDetected {
                share,
                unknown_count,
            });
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailureSeverity, OperationType, SyncOperation};

    fn failure(table: &str, failure_type: FailureType, timestamp: i64) -> FailureRecord {
        FailureRecord {
            timestamp,
            operation_id: format!("op_{}", timestamp),
            failure_type,
            severity: FailureSeverity::Medium,
            recoverable: true,
            table_name: table.to_string(),
        }
    }

    fn state_with(
        failures: Vec<FailureRecord>,
        operations: Vec<SyncOperation>,
    ) -> DetectorState {
        let mut state = DetectorState::new();
        for failure in failures {
            state.failures.push_back(failure);
        }
        for op in operations {
            state
                .operations
                .entry(op.table_name.clone())
                .or_default()
                .push_back(op);
        }
        state
    }

    fn op(id: &str, table: &str, timestamp: i64) -> SyncOperation {
        SyncOperation::new(id, table, OperationType::Push, timestamp)
    }

    const NOW: i64 = 1_000_000;

    #[test]
    fn test_consecutive_failures_needs_threshold_in_one_table() {
        let config = DetectorConfig::default();

        // Two on one table, one on another: nothing fires
        let state = state_with(
            vec![
                failure("tasks", FailureType::NetworkError, NOW - 100),
                failure("tasks", FailureType::NetworkError, NOW - 50),
                failure("notes", FailureType::NetworkError, NOW - 30),
            ],
            vec![],
        );
        assert!(analyze(&state, &config, NOW).is_empty());

        // Third failure on the same table crosses the threshold
        let state = state_with(
            vec![
                failure("tasks", FailureType::NetworkError, NOW - 100),
                failure("tasks", FailureType::NetworkError, NOW - 50),
                failure("tasks", FailureType::NetworkError, NOW - 30),
            ],
            vec![],
        );
        let alerts = analyze(&state, &config, NOW);
        assert_eq!(
            alerts,
            vec![PatternAlert::ConsecutiveFailures {
                table_name: "tasks".to_string(),
                count: 3,
            }]
        );
    }

    #[test]
    fn test_failures_outside_window_do_not_count() {
        let config = DetectorConfig::default();
        let stale = NOW - config.sliding_window_ms - 1;

        let state = state_with(
            vec![
                failure("tasks", FailureType::NetworkError, stale),
                failure("tasks", FailureType::NetworkError, stale + 1),
                failure("tasks", FailureType::NetworkError, NOW - 10),
            ],
            vec![],
        );
        assert!(analyze(&state, &config, NOW).is_empty());
    }

    #[test]
    fn test_failure_rate_against_window_operations() {
        let config = DetectorConfig::default();

        // 2 failures over 5 operations = 0.4 > 0.3
        let state = state_with(
            vec![
                failure("tasks", FailureType::NetworkError, NOW - 100),
                failure("notes", FailureType::NetworkError, NOW - 50),
            ],
            (0..5).map(|i| op(&format!("op_{}", i), "tasks", NOW - 200)).collect(),
        );
        let alerts = analyze(&state, &config, NOW);
        assert_eq!(alerts.len(), 1);
        match &alerts[0] {
            PatternAlert::HighFailureRate {
                rate,
                window_failures,
                window_operations,
            } => {
                assert!((rate - 0.4).abs() < f64::EPSILON);
                assert_eq!(*window_failures, 2);
                assert_eq!(*window_operations, 5);
            }
            other => panic!("unexpected alert {:?}", other),
        }

        // 2 over 10 = 0.2, under threshold
        let state = state_with(
            vec![
                failure("tasks", FailureType::NetworkError, NOW - 100),
                failure("notes", FailureType::NetworkError, NOW - 50),
            ],
            (0..10).map(|i| op(&format!("op_{}", i), "tasks", NOW - 200)).collect(),
        );
        assert!(analyze(&state, &config, NOW).is_empty());
    }

    #[test]
    fn test_rate_skipped_without_window_operations() {
        let config = DetectorConfig::default();

        // Failures but no tracked operations: no denominator, no alert,
        // no division by zero
        let state = state_with(
            vec![failure("tasks", FailureType::NetworkError, NOW - 10)],
            vec![op("op_old", "tasks", NOW - config.sliding_window_ms - 1)],
        );
        assert!(analyze(&state, &config, NOW).is_empty());
    }

    #[test]
    fn test_noise_fires_only_on_small_nonzero_unknown_share() {
        let config = DetectorConfig::default();

        // 1 unknown of 20 (5% < 10%): taxonomy gap signal
        let mut failures: Vec<FailureRecord> = (0..19)
            .map(|i| failure(&format!("t{}", i), FailureType::NetworkError, NOW - 100))
            .collect();
        failures.push(failure("t19", FailureType::UnknownError, NOW - 50));
        let state = state_with(failures, vec![]);
        let alerts = analyze(&state, &config, NOW);
        assert_eq!(alerts.len(), 1);
        match &alerts[0] {
            PatternAlert::NoiseDetected {
                share,
                unknown_count,
            } => {
                assert!((share - 0.05).abs() < f64::EPSILON);
                assert_eq!(*unknown_count, 1);
            }
            other => panic!("unexpected alert {:?}", other),
        }

        // Half unknown (50%): a real classification problem, not noise
        let failures = vec![
            failure("a", FailureType::UnknownError, NOW - 100),
            failure("b", FailureType::NetworkError, NOW - 50),
        ];
        let state = state_with(failures, vec![]);
        assert!(analyze(&state, &config, NOW).is_empty());

        // No unknowns at all: nothing to flag
        let failures = vec![failure("a", FailureType::NetworkError, NOW - 100)];
        let state = state_with(failures, vec![]);
        assert!(analyze(&state, &config, NOW).is_empty());
    }

    #[test]
    fn test_noise_respects_disable_flag() {
        let config = DetectorConfig {
            enable_noise_filtering: false,
            ..DetectorConfig::default()
        };

        let mut failures: Vec<FailureRecord> = (0..19)
            .map(|i| failure(&format!("t{}", i), FailureType::NetworkError, NOW - 100))
            .collect();
        failures.push(failure("t19", FailureType::UnknownError, NOW - 50));
        let state = state_with(failures, vec![]);
        assert!(analyze(&state, &config, NOW).is_empty());
    }

    #[test]
    fn test_priority_order_and_worst_offender_first() {
        let config = DetectorConfig::default();

        // Both tables over threshold, plus a rate breach
        let mut failures = Vec::new();
        for i in 0..3 {
            failures.push(failure("tasks", FailureType::NetworkError, NOW - 100 + i));
        }
        for i in 0..4 {
            failures.push(failure("notes", FailureType::NetworkError, NOW - 90 + i));
        }
        let state = state_with(
            failures,
            (0..10).map(|i| op(&format!("op_{}", i), "tasks", NOW - 200)).collect(),
        );

        let alerts = analyze(&state, &config, NOW);
        assert_eq!(alerts.len(), 3);
        match &alerts[0] {
            PatternAlert::ConsecutiveFailures { table_name, count } => {
                assert_eq!(table_name, "notes");
                assert_eq!(*count, 4);
            }
            other => panic!("unexpected alert {:?}", other),
        }
        assert_eq!(alerts[1].alert_type(), "CONSECUTIVE_FAILURES");
        assert_eq!(alerts[2].alert_type(), "HIGH_FAILURE_RATE");
    }

    #[test]
    fn test_alert_payload_rendering() {
        let alert = PatternAlert::ConsecutiveFailures {
            table_name: "tasks".to_string(),
            count: 5,
        };
        let data = alert.to_alert_data();
        assert_eq!(data.alert_type, "CONSECUTIVE_FAILURES");
        assert!(data.message.contains("tasks"));
        assert_eq!(data.details.unwrap()["count"], 5);
    }
}
