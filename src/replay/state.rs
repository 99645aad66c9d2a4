//! Replay targets
//!
//! A `ReplayTarget` is whatever the engine replays against. The trait
//! keeps the engine agnostic: apply and verify take single events,
//! snapshot and restore move opaque JSON so rollback points never depend
//! on a concrete target's layout.
//!
//! `SyncStateMirror` is the default target: an in-memory materialized view
//! of sync state (per-table status, open conflicts, backups, recovery
//! counters) folded from the event slice.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{ChangeEvent, EventPayload, SentinelResult};

/// Where replayed events land
pub trait ReplayTarget: Send + Sync {
    /// Re-apply one event's effect.
    fn apply(&self, event: &ChangeEvent) -> SentinelResult<()>;

    /// Check one event against current state without mutating anything.
    ///
    /// `Err` means the event cannot be applied correctly; the returned
    /// strings are non-fatal anomalies.
    fn verify(&self, event: &ChangeEvent) -> SentinelResult<Vec<String>>;

    /// Opaque state capture for rollback points.
    fn snapshot(&self) -> SentinelResult<serde_json::Value>;

    /// Restore a previously captured snapshot.
    fn restore(&self, snapshot: &serde_json::Value) -> SentinelResult<()>;
}

/// Last known sync activity for one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableState {
    #[serde(rename = "lastOperation", skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<String>,

    #[serde(rename = "lastStatus", skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,

    #[serde(rename = "lastTimestamp")]
    pub last_timestamp: i64,

    #[serde(rename = "changeCount")]
    pub change_count: u64,
}

/// The materialized view the mirror folds events into
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MirrorState {
    pub tables: HashMap<String, TableState>,

    /// Conflicts detected but not yet resolved. Ordered so snapshots
    /// serialize deterministically.
    #[serde(rename = "openConflicts")]
    pub open_conflicts: BTreeSet<String>,

    /// Backup ids in creation order
    pub backups: Vec<String>,

    #[serde(rename = "backupsRestored")]
    pub backups_restored: u64,

    #[serde(rename = "recoveriesStarted")]
    pub recoveries_started: u64,

    #[serde(rename = "recoveriesCompleted")]
    pub recoveries_completed: u64,

    #[serde(rename = "filesChanged")]
    pub files_changed: u64,

    #[serde(rename = "eventsApplied")]
    pub events_applied: u64,

    #[serde(rename = "lastAppliedTimestamp")]
    pub last_applied_timestamp: i64,
}

/// Default replay target: folds events into a sync-state view
#[derive(Default)]
pub struct SyncStateMirror {
    state: RwLock<MirrorState>,
}

impl SyncStateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current view, cloned out of the lock.
    pub fn state(&self) -> MirrorState {
        self.state.read().clone()
    }

    fn fold(state: &mut MirrorState, event: &ChangeEvent) {
        match &event.data {
            EventPayload::FileChange(_) => {
                state.files_changed += 1;
            }
            EventPayload::DbChange(data) => {
                let table = state.tables.entry(data.table_name.clone()).or_default();
                table.change_count += 1;
                table.last_timestamp = event.timestamp;
            }
            EventPayload::SyncOperation(data) => {
                let table = state.tables.entry(data.table_name.clone()).or_default();
                table.last_operation = Some(data.operation_type.to_string());
                table.last_status = Some(data.status.to_string());
                table.last_timestamp = event.timestamp;
            }
            EventPayload::Conflict(data) => {
                if data.resolution_strategy.is_some() {
                    state.open_conflicts.remove(&data.conflict_id);
                } else {
                    state.open_conflicts.insert(data.conflict_id.clone());
                }
            }
            EventPayload::Recovery(data) => {
                if data.result.is_some() {
                    state.recoveries_completed += 1;
                } else {
                    state.recoveries_started += 1;
                }
            }
            EventPayload::Backup(data) => {
                if event.event_type == crate::types::ChangeEventType::BackupRestored {
                    state.backups_restored += 1;
                } else {
                    state.backups.push(data.backup_id.clone());
                }
            }
            EventPayload::System(_)
            | EventPayload::FailureDetected(_)
            | EventPayload::Alert(_) => {}
        }

        state.events_applied += 1;
        state.last_applied_timestamp = state.last_applied_timestamp.max(event.timestamp);
    }
}

impl ReplayTarget for SyncStateMirror {
    fn apply(&self, event: &ChangeEvent) -> SentinelResult<()> {
        let mut state = self.state.write();
        Self::fold(&mut state, event);
        Ok(())
    }

    fn verify(&self, event: &ChangeEvent) -> SentinelResult<Vec<String>> {
        event.validate()?;

        // A stored checksum must still match the recomputed one
        if let Some(stored) = &event.checksum {
            let computed = event.compute_checksum()?;
            if *stored != computed {
                return Err(format!("checksum mismatch for event {}", event.id).into());
            }
        }

        let state = self.state.read();
        let mut warnings = Vec::new();

        if event.timestamp < state.last_applied_timestamp {
            warnings.push(format!(
                "event {} is older than the last applied state",
                event.id
            ));
        }

        if let EventPayload::Conflict(data) = &event.data {
            if data.resolution_strategy.is_some()
                && !state.open_conflicts.contains(&data.conflict_id)
            {
                warnings.push(format!(
                    "resolution for conflict {} without a matching open conflict",
                    data.conflict_id
                ));
            }
        }

        Ok(warnings)
    }

    fn snapshot(&self) -> SentinelResult<serde_json::Value> {
        Ok(serde_json::to_value(&*self.state.read())?)
    }

    fn restore(&self, snapshot: &serde_json::Value) -> SentinelResult<()> {
        let restored: MirrorState = serde_json::from_value(snapshot.clone())?;
        *self.state.write() = restored;
        Ok(())
    }
}
