//! Failure classification output types
//!
//! The classifier turns a raw `(SyncOperation, SyncError)` pair into a
//! `FailureClassification` verdict. The verdict is advisory data, embedded
//! in the failure event's payload; it is never thrown.

use serde::{Deserialize, Serialize};

/// The nine-way failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    NetworkError,
    TimeoutError,
    AuthenticationError,
    PermissionError,
    DataCorruption,
    SchemaMismatch,
    ConflictError,
    ResourceExhaustion,
    UnknownError,
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureType::NetworkError => write!(f, "NETWORK_ERROR"),
            FailureType::TimeoutError => write!(f, "TIMEOUT_ERROR"),
            FailureType::AuthenticationError => write!(f, "AUTHENTICATION_ERROR"),
            FailureType::PermissionError => write!(f, "PERMISSION_ERROR"),
            FailureType::DataCorruption => write!(f, "DATA_CORRUPTION"),
            FailureType::SchemaMismatch => write!(f, "SCHEMA_MISMATCH"),
            FailureType::ConflictError => write!(f, "CONFLICT_ERROR"),
            FailureType::ResourceExhaustion => write!(f, "RESOURCE_EXHAUSTION"),
            FailureType::UnknownError => write!(f, "UNKNOWN_ERROR"),
        }
    }
}

/// Failure severity, separate from event severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FailureSeverity {
    /// One step up the ladder, saturating at CRITICAL.
    pub fn escalate(self) -> Self {
        match self {
            FailureSeverity::Low => FailureSeverity::Medium,
            FailureSeverity::Medium => FailureSeverity::High,
            FailureSeverity::High => FailureSeverity::Critical,
            FailureSeverity::Critical => FailureSeverity::Critical,
        }
    }

    /// Recovery-time multiplier applied to the per-type base estimate.
    pub fn recovery_multiplier(self) -> f64 {
        match self {
            FailureSeverity::Low => 0.5,
            FailureSeverity::Medium => 1.0,
            FailureSeverity::High => 2.0,
            FailureSeverity::Critical => 5.0,
        }
    }
}

impl std::fmt::Display for FailureSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureSeverity::Low => write!(f, "LOW"),
            FailureSeverity::Medium => write!(f, "MEDIUM"),
            FailureSeverity::High => write!(f, "HIGH"),
            FailureSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What the caller should do about a classified failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    Retry,
    BackoffRetry,
    FallbackStrategy,
    RestoreFromBackup,
    ResetAndResync,
    Escalate,
    ManualIntervention,
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecommendedAction::Retry => write!(f, "RETRY"),
            RecommendedAction::BackoffRetry => write!(f, "BACKOFF_RETRY"),
            RecommendedAction::FallbackStrategy => write!(f, "FALLBACK_STRATEGY"),
            RecommendedAction::RestoreFromBackup => write!(f, "RESTORE_FROM_BACKUP"),
            RecommendedAction::ResetAndResync => write!(f, "RESET_AND_RESYNC"),
            RecommendedAction::Escalate => write!(f, "ESCALATE"),
            RecommendedAction::ManualIntervention => write!(f, "MANUAL_INTERVENTION"),
        }
    }
}

/// Snapshot of the failing operation at classification time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    #[serde(rename = "operationType")]
    pub operation_type: String,

    #[serde(rename = "tableName")]
    pub table_name: String,

    #[serde(rename = "retryCount")]
    pub retry_count: u32,

    #[serde(rename = "errorCode")]
    pub error_code: String,

    #[serde(rename = "errorMessage")]
    pub error_message: String,

    pub timestamp: i64,
}

/// The classifier's verdict on one reported failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureClassification {
    #[serde(rename = "operationId")]
    pub operation_id: String,

    #[serde(rename = "failureType")]
    pub failure_type: FailureType,

    pub severity: FailureSeverity,

    pub recoverable: bool,

    #[serde(rename = "recommendedAction")]
    pub recommended_action: RecommendedAction,

    #[serde(rename = "estimatedRecoveryTimeMs")]
    pub estimated_recovery_time_ms: u64,

    pub context: FailureContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_escalation_saturates() {
        assert_eq!(FailureSeverity::Low.escalate(), FailureSeverity::Medium);
        assert_eq!(FailureSeverity::High.escalate(), FailureSeverity::Critical);
        assert_eq!(
            FailureSeverity::Critical.escalate(),
            FailureSeverity::Critical
        );
    }

    #[test]
    fn test_severity_ordering_follows_ladder() {
        assert!(FailureSeverity::Low < FailureSeverity::Medium);
        assert!(FailureSeverity::High < FailureSeverity::Critical);
    }

    #[test]
    fn test_failure_type_wire_format() {
        let json = serde_json::to_string(&FailureType::ResourceExhaustion).unwrap();
        assert_eq!(json, "\"RESOURCE_EXHAUSTION\"");
        assert_eq!(FailureType::NetworkError.to_string(), "NETWORK_ERROR");
    }
}
