//! Failure classification
//!
//! Pure decision pipeline, no I/O: `(SyncOperation, SyncError)` in,
//! `FailureClassification` out. Five steps run in order:
//!
//! 1. Type detection over the ordered keyword families in `rules`
//! 2. Severity: base table plus up to two escalation steps
//! 3. Recoverability
//! 4. Recommended action (retry ladder or terminal action)
//! 5. Estimated recovery time (type base x severity multiplier)
//!
//! The caller supplies the table's recent-failure count; the classifier
//! itself keeps no history.

pub mod rules;

use crate::types::{
    FailureClassification, FailureContext, FailureSeverity, FailureType, RecommendedAction,
    SyncError, SyncOperation,
};

use rules::TABLE_FAILURE_ESCALATION_THRESHOLD;

/// Stateless classifier, parameterized only by the retry threshold that
/// drives severity escalation.
#[derive(Debug, Clone, Copy)]
pub struct FailureClassifier {
    consecutive_failure_threshold: u32,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 3,
        }
    }
}

impl FailureClassifier {
    pub fn new(consecutive_failure_threshold: u32) -> Self {
        Self {
            consecutive_failure_threshold,
        }
    }

    /// Classify one reported failure.
    ///
    /// `recent_table_failures` is the count of failures for the
    /// operation's table inside the detector's sliding window, measured
    /// before this failure is recorded.
    pub fn classify(
        &self,
        operation: &SyncOperation,
        error: &SyncError,
        recent_table_failures: usize,
    ) -> FailureClassification {
        let failure_type = rules::detect_failure_type(&error.code, &error.message);
        let severity = self.severity_for(failure_type, operation, recent_table_failures);
        let recoverable = is_recoverable(failure_type, severity, operation);
        let recommended_action = recommend_action(failure_type, severity, operation.retry_count);
        let estimated_recovery_time_ms = estimate_recovery_time(failure_type, severity);

        FailureClassification {
            operation_id: operation.id.clone(),
            failure_type,
            severity,
            recoverable,
            recommended_action,
            estimated_recovery_time_ms,
            context: FailureContext {
                operation_type: operation.operation_type.to_string(),
                table_name: operation.table_name.clone(),
                retry_count: operation.retry_count,
                error_code: error.code.clone(),
                error_message: error.message.clone(),
                timestamp: error.timestamp,
            },
        }
    }

    fn severity_for(
        &self,
        failure_type: FailureType,
        operation: &SyncOperation,
        recent_table_failures: usize,
    ) -> FailureSeverity {
        let mut severity = rules::base_severity(failure_type);

        if operation.retry_count >= self.consecutive_failure_threshold {
            severity = severity.escalate();
        }
        if recent_table_failures >= TABLE_FAILURE_ESCALATION_THRESHOLD {
            severity = severity.escalate();
        }

        severity
    }
}

fn is_recoverable(
    failure_type: FailureType,
    severity: FailureSeverity,
    operation: &SyncOperation,
) -> bool {
    if severity == FailureSeverity::Critical {
        return false;
    }
    if operation.retry_count >= operation.max_retries {
        return false;
    }
    rules::RECOVERABLE_TYPES.contains(&failure_type)
}

fn recommend_action(
    failure_type: FailureType,
    severity: FailureSeverity,
    retry_count: u32,
) -> RecommendedAction {
    if severity == FailureSeverity::Critical {
        return RecommendedAction::ManualIntervention;
    }

    match retry_count {
        0 => RecommendedAction::Retry,
        1 => RecommendedAction::BackoffRetry,
        2 | 3 => RecommendedAction::FallbackStrategy,
        _ => terminal_action(failure_type),
    }
}

/// Action once the retry ladder is exhausted
fn terminal_action(failure_type: FailureType) -> RecommendedAction {
    match failure_type {
        FailureType::DataCorruption | FailureType::SchemaMismatch => {
            RecommendedAction::RestoreFromBackup
        }
        FailureType::NetworkError | FailureType::TimeoutError => RecommendedAction::ResetAndResync,
        FailureType::AuthenticationError | FailureType::PermissionError => {
            RecommendedAction::Escalate
        }
        _ => RecommendedAction::ManualIntervention,
    }
}

fn estimate_recovery_time(failure_type: FailureType, severity: FailureSeverity) -> u64 {
    let base = rules::base_recovery_time_ms(failure_type) as f64;
    (base * severity.recovery_multiplier()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationType;

    fn operation(retry_count: u32, max_retries: u32) -> SyncOperation {
        SyncOperation::new("op-1", "tasks", OperationType::Push, 1_704_067_200_000)
            .with_retries(retry_count, max_retries)
    }

    fn error(code: &str, message: &str) -> SyncError {
        SyncError::new(code, message, 1_704_067_200_500)
    }

    #[test]
    fn test_fresh_connection_refused_is_retryable_network_error() {
        let classifier = FailureClassifier::default();
        let verdict = classifier.classify(
            &operation(0, 5),
            &error("ECONNREFUSED", "connect ECONNREFUSED 10.0.0.2:5432"),
            0,
        );

        assert_eq!(verdict.failure_type, FailureType::NetworkError);
        assert_eq!(verdict.severity, FailureSeverity::Medium);
        assert!(verdict.recoverable);
        assert_eq!(verdict.recommended_action, RecommendedAction::Retry);
        assert_eq!(verdict.estimated_recovery_time_ms, 5_000);
    }

    #[test]
    fn test_retry_ceiling_makes_any_type_unrecoverable() {
        let classifier = FailureClassifier::default();
        let verdict = classifier.classify(
            &operation(5, 5),
            &error("ECONNREFUSED", "connect ECONNREFUSED 10.0.0.2:5432"),
            0,
        );

        assert!(!verdict.recoverable);
    }

    #[test]
    fn test_corruption_is_critical_and_manual_at_any_retry_count() {
        let classifier = FailureClassifier::default();

        for retry_count in [0, 1, 3, 7] {
            let verdict = classifier.classify(
                &operation(retry_count, 10),
                &error("E_DATA", "corrupt page header in tasks.db"),
                0,
            );

            assert_eq!(verdict.failure_type, FailureType::DataCorruption);
            assert_eq!(verdict.severity, FailureSeverity::Critical);
            assert!(!verdict.recoverable);
            assert_eq!(
                verdict.recommended_action,
                RecommendedAction::ManualIntervention
            );
        }
    }

    #[test]
    fn test_retry_count_escalates_severity_one_step() {
        let classifier = FailureClassifier::default();

        // Network base MEDIUM, retry_count at threshold -> HIGH
        let verdict = classifier.classify(
            &operation(3, 10),
            &error("E_NET", "host unreachable"),
            0,
        );
        assert_eq!(verdict.severity, FailureSeverity::High);
    }

    #[test]
    fn test_table_failure_history_escalates_second_step() {
        let classifier = FailureClassifier::default();

        // Both escalations: MEDIUM -> HIGH -> CRITICAL, which also flips
        // recoverability and forces manual intervention
        let verdict = classifier.classify(
            &operation(3, 10),
            &error("E_NET", "host unreachable"),
            5,
        );
        assert_eq!(verdict.severity, FailureSeverity::Critical);
        assert!(!verdict.recoverable);
        assert_eq!(
            verdict.recommended_action,
            RecommendedAction::ManualIntervention
        );
    }

    #[test]
    fn test_action_ladder_by_retry_count() {
        let classifier = FailureClassifier::default();
        // Threshold high enough that severity stays below CRITICAL
        let classifier_no_escalation = FailureClassifier::new(100);
        let err = error("E_NET", "host unreachable");

        let cases = [
            (0, RecommendedAction::Retry),
            (1, RecommendedAction::BackoffRetry),
            (2, RecommendedAction::FallbackStrategy),
            (3, RecommendedAction::FallbackStrategy),
            (4, RecommendedAction::ResetAndResync),
        ];
        for (retry_count, expected) in cases {
            let verdict = classifier_no_escalation.classify(&operation(retry_count, 10), &err, 0);
            assert_eq!(verdict.recommended_action, expected, "retry {}", retry_count);
        }

        // Terminal action is per-type
        let auth = classifier_no_escalation.classify(
            &operation(4, 10),
            &error("HTTP_401", "unauthorized"),
            0,
        );
        assert_eq!(auth.recommended_action, RecommendedAction::Escalate);

        let schema = classifier_no_escalation.classify(
            &operation(4, 10),
            &error("E_SCHEMA", "missing column updated_at"),
            0,
        );
        assert_eq!(
            schema.recommended_action,
            RecommendedAction::RestoreFromBackup
        );

        let unknown = classifier.classify(&operation(4, 10), &error("E_ODD", "weirdness"), 0);
        assert_eq!(
            unknown.recommended_action,
            RecommendedAction::ManualIntervention
        );
    }

    #[test]
    fn test_recovery_time_scales_with_severity() {
        let classifier = FailureClassifier::default();

        // Corruption: 60s base x 5 (CRITICAL)
        let corruption = classifier.classify(
            &operation(0, 5),
            &error("E_DATA", "malformed record"),
            0,
        );
        assert_eq!(corruption.estimated_recovery_time_ms, 300_000);

        // Auth: 3s base x 2 (HIGH)
        let auth = classifier.classify(&operation(0, 5), &error("HTTP_401", "unauthorized"), 0);
        assert_eq!(auth.estimated_recovery_time_ms, 6_000);
    }

    #[test]
    fn test_context_captures_operation_and_error() {
        let classifier = FailureClassifier::default();
        let verdict = classifier.classify(
            &operation(2, 5),
            &error("E_NET", "connection reset"),
            0,
        );

        assert_eq!(verdict.operation_id, "op-1");
        assert_eq!(verdict.context.table_name, "tasks");
        assert_eq!(verdict.context.operation_type, "PUSH");
        assert_eq!(verdict.context.retry_count, 2);
        assert_eq!(verdict.context.error_code, "E_NET");
        assert_eq!(verdict.context.timestamp, 1_704_067_200_500);
    }
}
