//! Change event types for the append-only sync log
//!
//! Every sync-relevant occurrence is recorded as an immutable `ChangeEvent`.
//! Current system state is never edited in place; corrections are new events
//! that reference the original through `correlation_id`.

use serde::{Deserialize, Serialize};

use super::classification::FailureClassification;
use super::operation::{OperationStatus, OperationType};

/// Kinds of change events recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeEventType {
    /// A watched file was created, modified, deleted or renamed
    FileChange,
    /// A database record changed
    DbChange,
    /// A sync operation ran (or finished, or timed out)
    SyncOperation,
    /// A conflict between local and remote versions was found
    ConflictDetected,
    /// A previously detected conflict was resolved
    ConflictResolved,
    /// A recovery attempt began
    RecoveryStarted,
    /// A recovery attempt finished
    RecoveryCompleted,
    /// A backup was written
    BackupCreated,
    /// State was restored from a backup
    BackupRestored,
    /// Anything system-level: failures, alerts, lifecycle
    SystemEvent,
}

impl std::fmt::Display for ChangeEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeEventType::FileChange => write!(f, "FILE_CHANGE"),
            ChangeEventType::DbChange => write!(f, "DB_CHANGE"),
            ChangeEventType::SyncOperation => write!(f, "SYNC_OPERATION"),
            ChangeEventType::ConflictDetected => write!(f, "CONFLICT_DETECTED"),
            ChangeEventType::ConflictResolved => write!(f, "CONFLICT_RESOLVED"),
            ChangeEventType::RecoveryStarted => write!(f, "RECOVERY_STARTED"),
            ChangeEventType::RecoveryCompleted => write!(f, "RECOVERY_COMPLETED"),
            ChangeEventType::BackupCreated => write!(f, "BACKUP_CREATED"),
            ChangeEventType::BackupRestored => write!(f, "BACKUP_RESTORED"),
            ChangeEventType::SystemEvent => write!(f, "SYSTEM_EVENT"),
        }
    }
}

/// Event severity, ordered from least to most serious
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    /// ERROR and CRITICAL count toward the store's error rate.
    pub fn is_error(&self) -> bool {
        matches!(self, EventSeverity::Error | EventSeverity::Critical)
    }
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Debug => write!(f, "DEBUG"),
            EventSeverity::Info => write!(f, "INFO"),
            EventSeverity::Warning => write!(f, "WARNING"),
            EventSeverity::Error => write!(f, "ERROR"),
            EventSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which subsystem produced the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    FileWatcher,
    SyncManager,
    RecoveryManager,
    BackupManager,
    McpServer,
    UserAction,
    #[default]
    System,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::FileWatcher => write!(f, "FILE_WATCHER"),
            EventSource::SyncManager => write!(f, "SYNC_MANAGER"),
            EventSource::RecoveryManager => write!(f, "RECOVERY_MANAGER"),
            EventSource::BackupManager => write!(f, "BACKUP_MANAGER"),
            EventSource::McpServer => write!(f, "MCP_SERVER"),
            EventSource::UserAction => write!(f, "USER_ACTION"),
            EventSource::System => write!(f, "SYSTEM"),
        }
    }
}

/// Downstream processing status carried on each event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "PENDING"),
            ProcessingStatus::Processing => write!(f, "PROCESSING"),
            ProcessingStatus::Completed => write!(f, "COMPLETED"),
            ProcessingStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Processing bookkeeping, stamped once when the event is logged.
///
/// Events are immutable; a processor that finishes or fails appends a
/// correction event instead of editing these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingState {
    pub status: ProcessingStatus,

    #[serde(rename = "retryCount")]
    pub retry_count: u32,

    #[serde(rename = "maxRetries")]
    pub max_retries: u32,

    #[serde(rename = "processedAt", skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self {
            status: ProcessingStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            processed_at: None,
            error: None,
        }
    }
}

/// Free-form event metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default = "default_metadata_version")]
    pub version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_metadata_version() -> String {
    "1.0".to_string()
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            version: default_metadata_version(),
            tags: Vec::new(),
        }
    }
}

impl EventMetadata {
    pub fn with_tags(tags: &[&str]) -> Self {
        Self {
            version: default_metadata_version(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Payload for FILE_CHANGE events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChangeData {
    pub path: String,

    /// created | modified | deleted | renamed
    #[serde(rename = "changeKind")]
    pub change_kind: String,

    #[serde(rename = "oldPath", skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,

    #[serde(rename = "sizeBytes", skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Payload for DB_CHANGE events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbChangeData {
    #[serde(rename = "tableName")]
    pub table_name: String,

    #[serde(rename = "recordId")]
    pub record_id: String,

    /// insert | update | delete
    pub operation: String,

    #[serde(rename = "fieldsChanged", default, skip_serializing_if = "Vec::is_empty")]
    pub fields_changed: Vec<String>,
}

/// Payload for SYNC_OPERATION events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperationData {
    #[serde(rename = "operationId")]
    pub operation_id: String,

    #[serde(rename = "tableName")]
    pub table_name: String,

    #[serde(rename = "operationType")]
    pub operation_type: OperationType,

    pub status: OperationStatus,

    #[serde(rename = "durationMs", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(rename = "itemsSynced", skip_serializing_if = "Option::is_none")]
    pub items_synced: Option<u64>,
}

/// Payload for CONFLICT_DETECTED / CONFLICT_RESOLVED events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictData {
    #[serde(rename = "conflictId")]
    pub conflict_id: String,

    #[serde(rename = "tableName")]
    pub table_name: String,

    #[serde(rename = "recordId")]
    pub record_id: String,

    #[serde(rename = "localVersion", skip_serializing_if = "Option::is_none")]
    pub local_version: Option<String>,

    #[serde(rename = "remoteVersion", skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<String>,

    /// Present once a resolution was applied; its presence selects
    /// CONFLICT_RESOLVED over CONFLICT_DETECTED when logging.
    #[serde(rename = "resolutionStrategy", skip_serializing_if = "Option::is_none")]
    pub resolution_strategy: Option<String>,

    #[serde(rename = "resolvedBy", skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

/// Payload for RECOVERY_STARTED / RECOVERY_COMPLETED events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryData {
    #[serde(rename = "recoveryId")]
    pub recovery_id: String,

    #[serde(rename = "operationId", skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,

    pub strategy: String,

    /// None while the recovery is still running; "SUCCESS" or "FAILED"
    /// once finished. Its presence selects RECOVERY_COMPLETED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload for BACKUP_CREATED / BACKUP_RESTORED events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupData {
    #[serde(rename = "backupId")]
    pub backup_id: String,

    pub location: String,

    #[serde(rename = "sizeBytes", skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Payload for plain SYSTEM_EVENT records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEventData {
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Payload for detector alert events (stored as SYSTEM_EVENT)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    /// CONSECUTIVE_FAILURES | HIGH_FAILURE_RATE | NOISE_DETECTED |
    /// HIGH_MEMORY_USAGE
    #[serde(rename = "alertType")]
    pub alert_type: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Typed event payload, one variant per payload family.
///
/// Internally tagged so the stored JSON stays self-describing; untyped
/// `serde_json::Value` never escapes the persistence boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    FileChange(FileChangeData),
    DbChange(DbChangeData),
    SyncOperation(SyncOperationData),
    Conflict(ConflictData),
    Recovery(RecoveryData),
    Backup(BackupData),
    System(SystemEventData),
    FailureDetected(FailureClassification),
    Alert(AlertData),
}

impl EventPayload {
    /// Whether this payload variant is valid under the given event type.
    pub fn matches_type(&self, event_type: ChangeEventType) -> bool {
        use ChangeEventType::*;
        match self {
            EventPayload::FileChange(_) => event_type == FileChange,
            EventPayload::DbChange(_) => event_type == DbChange,
            EventPayload::SyncOperation(_) => event_type == SyncOperation,
            EventPayload::Conflict(_) => {
                matches!(event_type, ConflictDetected | ConflictResolved)
            }
            EventPayload::Recovery(_) => {
                matches!(event_type, RecoveryStarted | RecoveryCompleted)
            }
            EventPayload::Backup(_) => {
                matches!(event_type, BackupCreated | BackupRestored)
            }
            EventPayload::System(_)
            | EventPayload::FailureDetected(_)
            | EventPayload::Alert(_) => event_type == SystemEvent,
        }
    }
}

/// An immutable record in the change log
///
/// `checksum` and `size` are derived by the store at write time; callers
/// leave them `None`. Once stored, the id never changes and the record is
/// never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: ChangeEventType,

    pub severity: EventSeverity,

    pub source: EventSource,

    /// Logical creation time, epoch milliseconds, non-decreasing per store
    pub timestamp: i64,

    #[serde(rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(rename = "changeId", skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,

    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub data: EventPayload,

    #[serde(default)]
    pub metadata: EventMetadata,

    #[serde(default)]
    pub processing: ProcessingState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ChangeEvent {
    /// Create an event with empty correlation fields and default
    /// metadata/processing.
    pub fn new(
        id: String,
        event_type: ChangeEventType,
        severity: EventSeverity,
        source: EventSource,
        timestamp: i64,
        data: EventPayload,
    ) -> Self {
        Self {
            id,
            event_type,
            severity,
            source,
            timestamp,
            project_id: None,
            change_id: None,
            correlation_id: None,
            session_id: None,
            user_id: None,
            data,
            metadata: EventMetadata::default(),
            processing: ProcessingState::default(),
            checksum: None,
            size: None,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.metadata = EventMetadata::with_tags(tags);
        self
    }

    /// Content hash over type, payload and timestamp.
    ///
    /// Stable for identical inputs, so duplicates and tampering are
    /// detectable without comparing whole records.
    pub fn compute_checksum(&self) -> Result<String, serde_json::Error> {
        let payload = serde_json::to_string(&self.data)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.event_type.to_string().as_bytes());
        hasher.update(payload.as_bytes());
        hasher.update(self.timestamp.to_le_bytes().as_slice());
        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Structural validity: non-empty id, positive timestamp, and a
    /// payload variant that belongs to the event type.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("event id must not be empty".to_string());
        }
        if self.timestamp <= 0 {
            return Err(format!(
                "event {} has non-positive timestamp {}",
                self.id, self.timestamp
            ));
        }
        if !self.data.matches_type(self.event_type) {
            return Err(format!(
                "event {} payload does not match type {}",
                self.id, self.event_type
            ));
        }
        Ok(())
    }

    /// Serialize for JSONL storage
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize one JSONL line
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> ChangeEvent {
        ChangeEvent::new(
            "evt_1704067200000_1".to_string(),
            ChangeEventType::FileChange,
            EventSeverity::Info,
            EventSource::FileWatcher,
            1_704_067_200_000,
            EventPayload::FileChange(FileChangeData {
                path: "notes/todo.md".to_string(),
                change_kind: "modified".to_string(),
                old_path: None,
                size_bytes: Some(2048),
            }),
        )
        .with_project("proj-1")
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&ChangeEventType::ConflictDetected).unwrap();
        assert_eq!(json, "\"CONFLICT_DETECTED\"");

        let parsed: ChangeEventType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ChangeEventType::ConflictDetected);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(EventSeverity::Debug < EventSeverity::Info);
        assert!(EventSeverity::Error < EventSeverity::Critical);
        assert!(EventSeverity::Error.is_error());
        assert!(EventSeverity::Critical.is_error());
        assert!(!EventSeverity::Warning.is_error());
    }

    #[test]
    fn test_event_json_line_round_trip() {
        let event = sample_event();
        let line = event.to_json_line().unwrap();

        assert!(line.contains("\"type\":\"FILE_CHANGE\""));
        assert!(line.contains("\"projectId\":\"proj-1\""));
        assert!(line.contains("\"kind\":\"file_change\""));
        // Unset correlation fields stay off the wire
        assert!(!line.contains("sessionId"));

        let parsed = ChangeEvent::from_json_line(&line).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_checksum_stable_for_identical_content() {
        let a = sample_event();
        let mut b = sample_event();
        // Correlation fields are not part of the checksum input
        b.session_id = Some("sess-9".to_string());

        assert_eq!(a.compute_checksum().unwrap(), b.compute_checksum().unwrap());

        let mut c = sample_event();
        c.timestamp += 1;
        assert_ne!(a.compute_checksum().unwrap(), c.compute_checksum().unwrap());
    }

    #[test]
    fn test_validate_rejects_payload_type_mismatch() {
        let mut event = sample_event();
        event.event_type = ChangeEventType::DbChange;

        let err = event.validate().unwrap_err();
        assert!(err.contains("does not match type"));
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let mut event = sample_event();
        event.id = String::new();
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_conflict_payload_matches_both_conflict_types() {
        let payload = EventPayload::Conflict(ConflictData {
            conflict_id: "conf-1".to_string(),
            table_name: "tasks".to_string(),
            record_id: "42".to_string(),
            local_version: None,
            remote_version: None,
            resolution_strategy: None,
            resolved_by: None,
        });

        assert!(payload.matches_type(ChangeEventType::ConflictDetected));
        assert!(payload.matches_type(ChangeEventType::ConflictResolved));
        assert!(!payload.matches_type(ChangeEventType::FileChange));
    }

    #[test]
    fn test_processing_defaults() {
        let processing = ProcessingState::default();
        assert_eq!(processing.status, ProcessingStatus::Pending);
        assert_eq!(processing.retry_count, 0);
        assert_eq!(processing.max_retries, 3);
        assert!(processing.processed_at.is_none());
    }
}
