//! Replay session, result and rollback point types
//!
//! A `ReplaySession` is a bounded, ordered re-execution (or verification)
//! of a filtered event slice. Sessions move PENDING -> RUNNING -> one
//! terminal state; terminal sessions are immutable and their partial
//! results stay queryable for audit.

use serde::{Deserialize, Serialize};

use super::filter::EventFilter;

/// How much side effect a replay is allowed to have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayMode {
    /// Verify before and after every applied event; failures do not stop
    /// the remaining events
    #[default]
    Safe,
    /// Apply without verification
    Fast,
    /// Apply and collect non-fatal anomalies as result warnings
    Verbose,
    /// No mutation at all; report what would happen
    DryRun,
}

/// How the event slice is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayStrategy {
    /// Strict timestamp order on a single worker
    #[default]
    Sequential,
    /// Independent events fan out to a bounded pool; correlated events
    /// are deferred and run dependency-aware afterwards
    Parallel,
    /// Topological order over correlationId chains
    DependencyAware,
    /// The caller's filter supplies subset and ordering verbatim
    Selective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ReplayStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReplayStatus::Completed | ReplayStatus::Failed | ReplayStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayStatus::Pending => write!(f, "PENDING"),
            ReplayStatus::Running => write!(f, "RUNNING"),
            ReplayStatus::Completed => write!(f, "COMPLETED"),
            ReplayStatus::Failed => write!(f, "FAILED"),
            ReplayStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Per-session execution options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayOptions {
    pub mode: ReplayMode,
    pub strategy: ReplayStrategy,

    /// Worker-pool bound for the PARALLEL strategy
    #[serde(rename = "maxParallelism")]
    pub max_parallelism: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            mode: ReplayMode::Safe,
            strategy: ReplayStrategy::Sequential,
            max_parallelism: 4,
        }
    }
}

impl ReplayOptions {
    pub fn new(mode: ReplayMode, strategy: ReplayStrategy) -> Self {
        Self {
            mode,
            strategy,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_parallelism == 0 {
            return Err("maxParallelism must be at least 1".to_string());
        }
        Ok(())
    }
}

/// One replay session and its running counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySession {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub filter: EventFilter,

    pub options: ReplayOptions,

    pub status: ReplayStatus,

    #[serde(rename = "totalEvents")]
    pub total_events: usize,

    #[serde(rename = "processedEvents")]
    pub processed_events: usize,

    #[serde(rename = "succeededEvents")]
    pub succeeded_events: usize,

    #[serde(rename = "failedEvents")]
    pub failed_events: usize,

    #[serde(rename = "skippedEvents")]
    pub skipped_events: usize,

    #[serde(rename = "createdAt")]
    pub created_at: i64,

    #[serde(rename = "startedAt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,

    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,

    #[serde(rename = "durationMs", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplaySession {
    pub fn new(id: String, filter: EventFilter, options: ReplayOptions, created_at: i64) -> Self {
        Self {
            id,
            name: None,
            description: None,
            filter,
            options,
            status: ReplayStatus::Pending,
            total_events: 0,
            processed_events: 0,
            succeeded_events: 0,
            failed_events: 0,
            skipped_events: 0,
            created_at,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Outcome of one processed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayResultStatus {
    Success,
    Failed,
    Skipped,
}

/// One record per processed event
///
/// `order` is the replay sequence number; it reconstructs processing
/// order independent of storage order, which matters for PARALLEL runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    #[serde(rename = "sessionId")]
    pub session_id: String,

    #[serde(rename = "eventId")]
    pub event_id: String,

    pub status: ReplayResultStatus,

    #[serde(rename = "durationMs")]
    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    pub order: u64,
}

/// A named, expirable snapshot of target state
///
/// Expiry is policy-driven: the engine never removes points on its own,
/// callers run `sweep_expired_rollback_points`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub id: String,

    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub timestamp: i64,

    pub description: String,

    /// Opaque state capture produced by the replay target
    pub snapshot: serde_json::Value,

    #[serde(default)]
    pub metadata: serde_json::Value,

    #[serde(rename = "isActive")]
    pub is_active: bool,

    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

impl RollbackPoint {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_pending_with_zero_counters() {
        let session = ReplaySession::new(
            "rp_1".to_string(),
            EventFilter::all(),
            ReplayOptions::default(),
            1_704_067_200_000,
        );

        assert_eq!(session.status, ReplayStatus::Pending);
        assert_eq!(session.total_events, 0);
        assert_eq!(session.processed_events, 0);
        assert!(session.started_at.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ReplayStatus::Completed.is_terminal());
        assert!(ReplayStatus::Failed.is_terminal());
        assert!(ReplayStatus::Cancelled.is_terminal());
        assert!(!ReplayStatus::Running.is_terminal());
        assert!(!ReplayStatus::Pending.is_terminal());
    }

    #[test]
    fn test_options_validation() {
        let mut options = ReplayOptions::new(ReplayMode::DryRun, ReplayStrategy::Parallel);
        assert!(options.validate().is_ok());

        options.max_parallelism = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_rollback_point_expiry() {
        let point = RollbackPoint {
            id: "rb_1".to_string(),
            session_id: None,
            timestamp: 1_000,
            description: "before schema migration".to_string(),
            snapshot: serde_json::json!({"tables": {}}),
            metadata: serde_json::Value::Null,
            is_active: true,
            expires_at: 2_000,
        };

        assert!(!point.is_expired(1_999));
        assert!(point.is_expired(2_000));
    }

    #[test]
    fn test_session_wire_names() {
        let session = ReplaySession::new(
            "rp_1".to_string(),
            EventFilter::all(),
            ReplayOptions::default(),
            1_704_067_200_000,
        )
        .with_name("audit");

        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"totalEvents\":0"));
        assert!(json.contains("\"createdAt\":1704067200000"));
        assert!(json.contains("\"status\":\"PENDING\""));
        assert!(json.contains("\"maxParallelism\":4"));
    }
}
