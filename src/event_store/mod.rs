//! Append-only change event store
//!
//! Core persistence for the sync change log:
//! - `EventStore`: append-only JSONL log with an in-memory index
//! - `maintenance`: snapshots, archives, backup and restore
//! - `EventStatistics` / `StoreHealth`: aggregate metrics and health
//! - `StatsCache`: daily rollup fed off the write path
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌──────────┐    ┌──────────────┐    ┌─────────────────┐
//! │ manager/ │───►│ validate +   │───►│ fsync append to │──► stats channel
//! │ detector │    │ checksum     │    │ events.jsonl    │    (fire & forget)
//! └──────────┘    └──────────────┘    └─────────────────┘
//!
//! Read Path (Startup):
//! ┌───────────────┐    ┌─────────────────┐
//! │ Load snapshot │───►│ Append log      │───► Ready!
//! │ (latest.jsonl)│    │ events on top   │
//! └───────────────┘    └─────────────────┘
//! ```

pub mod maintenance;
mod stats;
mod stats_cache;
pub(crate) mod store;

pub use maintenance::{ArchiveInfo, CompactionReport, SnapshotMeta};
pub use stats::{EventStatistics, HealthMetrics, HealthStatus, StoreHealth};
pub use stats_cache::{DailyStats, StatsCache, StatsUpdate};
pub use store::{EventStore, EventStoreConfig, EventStoreError, EventStoreResult};
