//! Data types for the sync sentinel
//!
//! Core data structures shared by the store, classifier, detector,
//! change log manager and replay engine.

mod classification;
mod event;
mod filter;
mod operation;
mod replay;

pub use classification::{
    FailureClassification, FailureContext, FailureSeverity, FailureType, RecommendedAction,
};
pub use event::{
    AlertData, BackupData, ChangeEvent, ChangeEventType, ConflictData, DbChangeData,
    EventMetadata, EventPayload, EventSeverity, EventSource, FileChangeData, ProcessingState,
    ProcessingStatus, RecoveryData, SyncOperationData, SystemEventData,
};
pub use filter::{EventFilter, SortField, SortOrder, SortSpec, TimeRange};
pub use operation::{OperationStatus, OperationType, SyncError, SyncOperation};
pub use replay::{
    ReplayMode, ReplayOptions, ReplayResult, ReplayResultStatus, ReplaySession, ReplayStatus,
    ReplayStrategy, RollbackPoint,
};

/// Result type for sentinel operations
pub type SentinelResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;
