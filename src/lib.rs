//! Sync Sentinel
//!
//! Failure detection and event-sourced recovery for offline-first sync
//! pipelines. Every file change, database write, sync operation, conflict
//! and recovery step lands in an append-only change log; a background
//! monitor classifies failures, watches for patterns and hung operations,
//! and a replay engine re-executes (or just verifies) filtered slices of
//! the log against a pluggable target, with snapshot rollback.
//!
//! # Features
//!
//! - **Append-only event store**: fsync'd JSONL log with snapshots,
//!   archives, backup/restore and integrity checksums
//! - **Failure classification**: ordered keyword cascade mapping raw sync
//!   errors to type, severity, recoverability and a recommended action
//! - **Background monitoring**: periodic scanner for hung operations and
//!   memory pressure, pattern alerts with a shared cooldown
//! - **Replay & rollback**: four modes x four strategies over any filtered
//!   slice, cooperative cancellation, expirable rollback points
//!
//! # Modules
//!
//! - `types`: core data structures (ChangeEvent, SyncOperation, filters,
//!   replay sessions)
//! - `event_store`: the append-only log and its maintenance surface
//! - `classifier`: the pure failure classification cascade
//! - `detector`: stateful failure monitor and periodic scanner
//! - `changelog`: typed logging facade, search, timeline and export
//! - `recovery`: outbound recovery event delivery to subscribed listeners
//! - `replay`: session-based replay engine and rollback points
//! - `utils`: timestamps, bucketing, atomic file replacement
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sync_sentinel::changelog::{self, ChangeLogManager};
//! use sync_sentinel::detector::{DetectorConfig, FailureDetector};
//! use sync_sentinel::event_store::{EventStore, EventStoreConfig};
//! use sync_sentinel::recovery::ListenerRegistry;
//! use sync_sentinel::types::{EventSeverity, FileChangeData, SentinelResult};
//!
//! #[tokio::main]
//! async fn main() -> SentinelResult<()> {
//!     let store = Arc::new(EventStore::with_config(EventStoreConfig::new(
//!         "./sentinel-data",
//!     )));
//!     let manager = Arc::new(ChangeLogManager::new(store));
//!     manager.initialize()?;
//!
//!     changelog::log_file_change(
//!         &manager,
//!         FileChangeData {
//!             path: "/project/notes.md".to_string(),
//!             change_kind: "modified".to_string(),
//!             old_path: None,
//!             size_bytes: Some(2_048),
//!         },
//!         EventSeverity::Info,
//!     )?;
//!
//!     let detector = Arc::new(FailureDetector::new(
//!         DetectorConfig::default(),
//!         manager.clone(),
//!         Arc::new(ListenerRegistry::new()),
//!     ));
//!     detector.start()?;
//!     Ok(())
//! }
//! ```

pub mod changelog;
pub mod classifier;
pub mod detector;
pub mod event_store;
pub mod recovery;
pub mod replay;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use changelog::{ChangeLogManager, EventDraft, ManagerStatus};
pub use classifier::FailureClassifier;
pub use detector::{DetectorConfig, DetectorStats, FailureDetector};
pub use event_store::{EventStore, EventStoreConfig};
pub use recovery::{ListenerRegistry, RecoveryEvent, RecoveryEventKind};
pub use replay::{ReplayConfig, ReplayEngine, ReplayTarget, SyncStateMirror};
pub use types::{
    ChangeEvent, ChangeEventType, EventFilter, EventSeverity, EventSource, FailureClassification,
    SentinelResult, SyncError, SyncOperation,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
