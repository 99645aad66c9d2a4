//! Sync operation and error inputs
//!
//! Producers (sync manager, file watcher) own these records; the detector
//! only observes them. `SyncError.recoverable` is the producer's hint; the
//! classifier's verdict is authoritative.

use serde::{Deserialize, Serialize};

/// What a sync operation does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Push,
    Pull,
    FullSync,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Create => write!(f, "CREATE"),
            OperationType::Update => write!(f, "UPDATE"),
            OperationType::Delete => write!(f, "DELETE"),
            OperationType::Push => write!(f, "PUSH"),
            OperationType::Pull => write!(f, "PULL"),
            OperationType::FullSync => write!(f, "FULL_SYNC"),
        }
    }
}

/// Where a sync operation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Set by the detector's scanner when an IN_PROGRESS operation
    /// outlives the timeout threshold
    TimedOut,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::TimedOut
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::InProgress)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::Pending => write!(f, "PENDING"),
            OperationStatus::InProgress => write!(f, "IN_PROGRESS"),
            OperationStatus::Completed => write!(f, "COMPLETED"),
            OperationStatus::Failed => write!(f, "FAILED"),
            OperationStatus::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// One sync operation as reported by a producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,

    #[serde(rename = "tableName")]
    pub table_name: String,

    #[serde(rename = "type")]
    pub operation_type: OperationType,

    pub status: OperationStatus,

    /// Epoch milliseconds when the operation started
    pub timestamp: i64,

    #[serde(rename = "retryCount")]
    pub retry_count: u32,

    #[serde(rename = "maxRetries")]
    pub max_retries: u32,
}

impl SyncOperation {
    pub fn new(
        id: impl Into<String>,
        table_name: impl Into<String>,
        operation_type: OperationType,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            table_name: table_name.into(),
            operation_type,
            status: OperationStatus::InProgress,
            timestamp,
            retry_count: 0,
            max_retries: 5,
        }
    }

    pub fn with_retries(mut self, retry_count: u32, max_retries: u32) -> Self {
        self.retry_count = retry_count;
        self.max_retries = max_retries;
        self
    }
}

/// A raw error reported alongside a failed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncError {
    pub code: String,
    pub message: String,
    pub timestamp: i64,
    pub recoverable: bool,
}

impl SyncError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, timestamp: i64) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp,
            recoverable: false,
        }
    }

    /// Synthesized by the scanner for operations that exceeded the
    /// timeout threshold.
    pub fn operation_timeout(threshold_ms: u64, timestamp: i64) -> Self {
        Self {
            code: "OPERATION_TIMEOUT".to_string(),
            message: format!("operation exceeded timeout threshold of {}ms", threshold_ms),
            timestamp,
            recoverable: true,
        }
    }
}
