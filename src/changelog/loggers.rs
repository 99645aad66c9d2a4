//! Typed logging helpers
//!
//! One helper per event family. Each fixes the event type, source and tag
//! so call sites only supply the payload; severity is either a parameter
//! or derived from the payload (conflicts resolve to INFO, failed
//! recoveries to ERROR, and so on).

use tracing::debug;

use super::{ChangeLogManager, EventDraft};
use crate::types::{
    AlertData, BackupData, ChangeEventType, ConflictData, DbChangeData, EventPayload,
    EventSeverity, EventSource, FailureClassification, FailureSeverity, FileChangeData,
    RecoveryData, SentinelResult, SyncOperationData, SystemEventData,
};

pub fn log_file_change(
    manager: &ChangeLogManager,
    data: FileChangeData,
    severity: EventSeverity,
) -> SentinelResult<String> {
    let draft = EventDraft::new(
        ChangeEventType::FileChange,
        severity,
        EventSource::FileWatcher,
        EventPayload::FileChange(data),
    )
    .with_tags(&["file-change"]);
    manager.log_event(draft)
}

pub fn log_db_change(
    manager: &ChangeLogManager,
    data: DbChangeData,
    severity: EventSeverity,
) -> SentinelResult<String> {
    let draft = EventDraft::new(
        ChangeEventType::DbChange,
        severity,
        EventSource::SyncManager,
        EventPayload::DbChange(data),
    )
    .with_tags(&["db-change"]);
    manager.log_event(draft)
}

/// Sync operations carry their own id as the correlation id so the whole
/// chain (operation, failures, recovery) is queryable under one key.
pub fn log_sync_operation(
    manager: &ChangeLogManager,
    data: SyncOperationData,
    severity: EventSeverity,
) -> SentinelResult<String> {
    let correlation = data.operation_id.clone();
    let draft = EventDraft::new(
        ChangeEventType::SyncOperation,
        severity,
        EventSource::SyncManager,
        EventPayload::SyncOperation(data),
    )
    .with_correlation(correlation)
    .with_tags(&["sync-operation"]);
    manager.log_event(draft)
}

/// A conflict with a resolution strategy is logged as CONFLICT_RESOLVED at
/// INFO; one without is CONFLICT_DETECTED at WARNING.
pub fn log_conflict(manager: &ChangeLogManager, data: ConflictData) -> SentinelResult<String> {
    let (event_type, severity) = if data.resolution_strategy.is_some() {
        (ChangeEventType::ConflictResolved, EventSeverity::Info)
    } else {
        (ChangeEventType::ConflictDetected, EventSeverity::Warning)
    };
    let draft = EventDraft::new(
        event_type,
        severity,
        EventSource::SyncManager,
        EventPayload::Conflict(data),
    )
    .with_tags(&["conflict"]);
    manager.log_event(draft)
}

/// A recovery with a result is RECOVERY_COMPLETED ("FAILED" at ERROR,
/// anything else at INFO); one still running is RECOVERY_STARTED at INFO.
pub fn log_recovery(manager: &ChangeLogManager, data: RecoveryData) -> SentinelResult<String> {
    let (event_type, severity) = match data.result.as_deref() {
        Some("FAILED") => (ChangeEventType::RecoveryCompleted, EventSeverity::Error),
        Some(_) => (ChangeEventType::RecoveryCompleted, EventSeverity::Info),
        None => (ChangeEventType::RecoveryStarted, EventSeverity::Info),
    };
    let correlation = data.operation_id.clone();
    let mut draft = EventDraft::new(
        event_type,
        severity,
        EventSource::RecoveryManager,
        EventPayload::Recovery(data),
    )
    .with_tags(&["recovery"]);
    draft.correlation_id = correlation;
    manager.log_event(draft)
}

pub fn log_backup_created(
    manager: &ChangeLogManager,
    data: BackupData,
) -> SentinelResult<String> {
    let draft = EventDraft::new(
        ChangeEventType::BackupCreated,
        EventSeverity::Info,
        EventSource::BackupManager,
        EventPayload::Backup(data),
    )
    .with_tags(&["backup"]);
    manager.log_event(draft)
}

pub fn log_backup_restored(
    manager: &ChangeLogManager,
    data: BackupData,
) -> SentinelResult<String> {
    let draft = EventDraft::new(
        ChangeEventType::BackupRestored,
        EventSeverity::Info,
        EventSource::BackupManager,
        EventPayload::Backup(data),
    )
    .with_tags(&["backup"]);
    manager.log_event(draft)
}

pub fn log_system_event(
    manager: &ChangeLogManager,
    data: SystemEventData,
    severity: EventSeverity,
) -> SentinelResult<String> {
    let draft = EventDraft::new(
        ChangeEventType::SystemEvent,
        severity,
        EventSource::System,
        EventPayload::System(data),
    )
    .with_tags(&["system"]);
    manager.log_event(draft)
}

/// Persist a classifier verdict. The event severity is mapped down from
/// the failure severity; LOW failures stay at WARNING so they do not
/// drown out real errors.
pub fn log_failure(
    manager: &ChangeLogManager,
    classification: FailureClassification,
) -> SentinelResult<String> {
    let severity = match classification.severity {
        FailureSeverity::Low => EventSeverity::Warning,
        FailureSeverity::Medium | FailureSeverity::High => EventSeverity::Error,
        FailureSeverity::Critical => EventSeverity::Critical,
    };
    debug!(
        operation = %classification.operation_id,
        failure_type = %classification.failure_type,
        "logging classified failure"
    );
    let correlation = classification.operation_id.clone();
    let draft = EventDraft::new(
        ChangeEventType::SystemEvent,
        severity,
        EventSource::System,
        EventPayload::FailureDetected(classification),
    )
    .with_correlation(correlation)
    .with_tags(&["failure-detection"]);
    manager.log_event(draft)
}

pub fn log_alert(manager: &ChangeLogManager, data: AlertData) -> SentinelResult<String> {
    let draft = EventDraft::new(
        ChangeEventType::SystemEvent,
        EventSeverity::Warning,
        EventSource::System,
        EventPayload::Alert(data),
    )
    .with_tags(&["alert"]);
    manager.log_event(draft)
}
