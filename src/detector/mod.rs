//! Failure detection and monitoring
//!
//! The detector sits between sync producers and the change log. Producers
//! register operations and report outcomes; the detector classifies every
//! failure, keeps bounded in-memory histories, runs sliding-window pattern
//! analysis, and notifies recovery listeners. While active, a periodic
//! scanner sweeps for hung operations and high memory pressure:
//!
//! ```text
//!  producers ----> register_operation / report_failure / report_success
//!                       |                      |
//!                       v                      v
//!                  DetectorState (mutex)   classifier
//!                       |                      |
//!   scanner tick -------+                      v
//!   (timeouts, memory)       change log events + recovery listeners
//! ```
//!
//! Every store write and listener dispatch happens after the state lock is
//! released.

pub mod patterns;
pub mod scanner;

pub use patterns::PatternAlert;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::changelog::{self, ChangeLogManager};
use crate::classifier::FailureClassifier;
use crate::recovery::{ListenerRegistry, RecoveryEvent, RecoveryEventKind};
use crate::types::{
    FailureClassification, FailureSeverity, FailureType, OperationStatus, SentinelResult,
    SyncError, SyncOperation, SyncOperationData,
};
use crate::utils::now_millis;

/// Tracked operations kept per table before FIFO eviction.
const MAX_TRACKED_PER_TABLE: usize = 1000;

/// Classified failures kept in the history buffer before FIFO eviction.
const MAX_FAILURE_HISTORY: usize = 10_000;

/// Detector tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Same-table failures in the window that raise CONSECUTIVE_FAILURES,
    /// and the retry count that escalates classifier severity
    #[serde(rename = "consecutiveFailureThreshold")]
    pub consecutive_failure_threshold: u32,

    /// Window failure/operation ratio above which HIGH_FAILURE_RATE fires
    #[serde(rename = "failureRateThreshold")]
    pub failure_rate_threshold: f64,

    /// IN_PROGRESS operations older than this are timed out by the scanner
    #[serde(rename = "timeoutThresholdMs")]
    pub timeout_threshold_ms: u64,

    /// Scanner tick period
    #[serde(rename = "monitoringIntervalMs")]
    pub monitoring_interval_ms: u64,

    /// Trailing window for pattern analysis
    #[serde(rename = "slidingWindowMs")]
    pub sliding_window_ms: i64,

    #[serde(rename = "enableNoiseFiltering")]
    pub enable_noise_filtering: bool,

    /// UNKNOWN_ERROR share below which the window is treated as noise
    #[serde(rename = "noiseThreshold")]
    pub noise_threshold: f64,

    #[serde(rename = "enableAlerts")]
    pub enable_alerts: bool,

    /// Minimum gap between alert events, however many patterns fire
    #[serde(rename = "alertCooldownMs")]
    pub alert_cooldown_ms: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 3,
            failure_rate_threshold: 0.3,
            timeout_threshold_ms: 30_000,
            monitoring_interval_ms: 5_000,
            sliding_window_ms: 300_000,
            enable_noise_filtering: true,
            noise_threshold: 0.1,
            enable_alerts: true,
            alert_cooldown_ms: 60_000,
        }
    }
}

/// Detector lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    AlreadyActive,
}

impl std::fmt::Display for DetectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorError::AlreadyActive => write!(f, "detector is already active"),
        }
    }
}

impl std::error::Error for DetectorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectorStatus {
    Stopped,
    Active,
}

impl std::fmt::Display for DetectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorStatus::Stopped => write!(f, "STOPPED"),
            DetectorStatus::Active => write!(f, "ACTIVE"),
        }
    }
}

/// One classified failure in the bounded history buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: i64,

    #[serde(rename = "operationId")]
    pub operation_id: String,

    #[serde(rename = "failureType")]
    pub failure_type: FailureType,

    pub severity: FailureSeverity,

    pub recoverable: bool,

    #[serde(rename = "tableName")]
    pub table_name: String,
}

/// Aggregate view over the failure history buffer
#[derive(Debug, Clone, Serialize)]
pub struct DetectorStats {
    #[serde(rename = "totalOperations")]
    pub total_operations: u64,

    #[serde(rename = "totalFailures")]
    pub total_failures: u64,

    #[serde(rename = "failuresByType")]
    pub failures_by_type: HashMap<FailureType, usize>,

    #[serde(rename = "failuresBySeverity")]
    pub failures_by_severity: HashMap<FailureSeverity, usize>,

    /// Share of buffered failures the classifier deemed recoverable
    #[serde(rename = "recoverableRatio")]
    pub recoverable_ratio: f64,

    pub status: DetectorStatus,
}

/// Everything mutable, behind the detector's single mutex
pub(crate) struct DetectorState {
    /// Per-table FIFO of tracked operations
    pub(crate) operations: HashMap<String, VecDeque<SyncOperation>>,
    /// Classified failures, oldest first
    pub(crate) failures: VecDeque<FailureRecord>,
    pub(crate) last_alert_at: Option<i64>,
    pub(crate) total_operations: u64,
    pub(crate) total_failures: u64,
    pub(crate) status: DetectorStatus,
}

impl DetectorState {
    pub(crate) fn new() -> Self {
        Self {
            operations: HashMap::new(),
            failures: VecDeque::new(),
            last_alert_at: None,
            total_operations: 0,
            total_failures: 0,
            status: DetectorStatus::Stopped,
        }
    }

    fn track(&mut self, operation: SyncOperation) {
        self.total_operations += 1;
        let queue = self.operations.entry(operation.table_name.clone()).or_default();
        if queue.len() >= MAX_TRACKED_PER_TABLE {
            queue.pop_front();
        }
        queue.push_back(operation);
    }

    fn record_failure(&mut self, record: FailureRecord) {
        if self.failures.len() >= MAX_FAILURE_HISTORY {
            self.failures.pop_front();
        }
        self.failures.push_back(record);
        self.total_failures += 1;
    }

    /// Set the status of a tracked operation. A terminal status is never
    /// overwritten, so a timed-out operation stays TIMED_OUT even when its
    /// failure is reported afterwards.
    fn mark_operation(
        &mut self,
        table_name: &str,
        operation_id: &str,
        status: OperationStatus,
    ) -> bool {
        if let Some(queue) = self.operations.get_mut(table_name) {
            for op in queue.iter_mut() {
                if op.id == operation_id && !op.status.is_terminal() {
                    op.status = status;
                    return true;
                }
            }
        }
        false
    }

    /// Table failures inside the window, used by the classifier's second
    /// escalation step. Counted before the current failure is recorded.
    fn recent_table_failures(&self, table_name: &str, window_start: i64) -> usize {
        self.failures
            .iter()
            .filter(|f| f.timestamp >= window_start && f.table_name == table_name)
            .count()
    }

    /// Single-flight alert admission. The first caller inside a cooldown
    /// window wins; everyone else is suppressed.
    pub(crate) fn claim_alert(&mut self, now: i64, cooldown_ms: i64) -> bool {
        match self.last_alert_at {
            Some(last) if now - last < cooldown_ms => false,
            _ => {
                self.last_alert_at = Some(now);
                true
            }
        }
    }
}

struct ScannerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Stateful failure monitor
pub struct FailureDetector {
    config: DetectorConfig,
    classifier: FailureClassifier,
    state: Mutex<DetectorState>,
    manager: Arc<ChangeLogManager>,
    listeners: Arc<ListenerRegistry>,
    scanner: Mutex<Option<ScannerHandle>>,
    event_seq: AtomicU64,
}

impl FailureDetector {
    pub fn new(
        config: DetectorConfig,
        manager: Arc<ChangeLogManager>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        let classifier = FailureClassifier::new(config.consecutive_failure_threshold);
        Self {
            config,
            classifier,
            state: Mutex::new(DetectorState::new()),
            manager,
            listeners,
            scanner: Mutex::new(None),
            event_seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn status(&self) -> DetectorStatus {
        self.state.lock().status
    }

    /// Start the periodic scanner. Fails when already active.
    pub fn start(self: &Arc<Self>) -> Result<(), DetectorError> {
        {
            let mut state = self.state.lock();
            if state.status == DetectorStatus::Active {
                return Err(DetectorError::AlreadyActive);
            }
            state.status = DetectorStatus::Active;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(scanner::run_scanner(self.clone(), shutdown_rx));
        *self.scanner.lock() = Some(ScannerHandle {
            shutdown: shutdown_tx,
            task,
        });

        info!(
            interval_ms = self.config.monitoring_interval_ms,
            "failure detector started"
        );
        Ok(())
    }

    /// Stop the scanner and wait for its loop to exit. Idempotent.
    pub async fn stop(&self) {
        self.state.lock().status = DetectorStatus::Stopped;
        self.stop_scanner().await;
        info!("failure detector stopped");
    }

    async fn stop_scanner(&self) {
        let handle = self.scanner.lock().take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
        }
    }

    /// Track an operation for timeout scanning and rate analysis.
    pub fn register_operation(&self, operation: SyncOperation) {
        debug!(id = %operation.id, table = %operation.table_name, "tracking operation");
        self.state.lock().track(operation);
    }

    /// Classify and record one failure, persist it, notify listeners, and
    /// run pattern analysis.
    ///
    /// The classification is returned to the caller; alerting happens as a
    /// side effect behind the cooldown.
    pub fn report_failure(
        &self,
        operation: &SyncOperation,
        error: &SyncError,
    ) -> SentinelResult<FailureClassification> {
        let now = now_millis();

        let (classification, alerts) = {
            let mut state = self.state.lock();
            let window_start = now - self.config.sliding_window_ms;

            let recent = state.recent_table_failures(&operation.table_name, window_start);
            let classification = self.classifier.classify(operation, error, recent);

            state.record_failure(FailureRecord {
                timestamp: now,
                operation_id: operation.id.clone(),
                failure_type: classification.failure_type,
                severity: classification.severity,
                recoverable: classification.recoverable,
                table_name: operation.table_name.clone(),
            });
            state.mark_operation(&operation.table_name, &operation.id, OperationStatus::Failed);

            let mut fired = if self.config.enable_alerts {
                patterns::analyze(&state, &self.config, now)
            } else {
                Vec::new()
            };
            let admitted = if !fired.is_empty()
                && state.claim_alert(now, self.config.alert_cooldown_ms)
            {
                Some(fired.remove(0))
            } else {
                None
            };
            (classification, admitted)
        };

        changelog::log_failure(&self.manager, classification.clone())?;

        let recovery_event = RecoveryEvent::new(
            self.next_recovery_id(now),
            RecoveryEventKind::FailureDetected,
            now,
        )
        .with_operation(classification.operation_id.clone())
        .with_error(error.message.clone())
        .with_metadata(json!({
            "failureType": classification.failure_type,
            "severity": classification.severity,
            "recoverable": classification.recoverable,
        }));
        self.listeners.emit(&recovery_event);

        if let Some(alert) = alerts {
            changelog::log_alert(&self.manager, alert.to_alert_data())?;
        }

        Ok(classification)
    }

    /// Mark a tracked operation COMPLETED and log the completion.
    pub fn report_success(&self, operation: &SyncOperation) -> SentinelResult<()> {
        let now = now_millis();
        self.state.lock().mark_operation(
            &operation.table_name,
            &operation.id,
            OperationStatus::Completed,
        );

        changelog::log_sync_operation(
            &self.manager,
            SyncOperationData {
                operation_id: operation.id.clone(),
                table_name: operation.table_name.clone(),
                operation_type: operation.operation_type,
                status: OperationStatus::Completed,
                duration_ms: Some((now - operation.timestamp).max(0) as u64),
                items_synced: None,
            },
            crate::types::EventSeverity::Info,
        )?;
        Ok(())
    }

    /// Distributions over the failure history buffer plus lifetime totals.
    pub fn get_stats(&self) -> DetectorStats {
        let state = self.state.lock();

        let mut failures_by_type: HashMap<FailureType, usize> = HashMap::new();
        let mut failures_by_severity: HashMap<FailureSeverity, usize> = HashMap::new();
        let mut recoverable = 0usize;
        for record in &state.failures {
            *failures_by_type.entry(record.failure_type).or_insert(0) += 1;
            *failures_by_severity.entry(record.severity).or_insert(0) += 1;
            if record.recoverable {
                recoverable += 1;
            }
        }
        let recoverable_ratio = if state.failures.is_empty() {
            0.0
        } else {
            recoverable as f64 / state.failures.len() as f64
        };

        DetectorStats {
            total_operations: state.total_operations,
            total_failures: state.total_failures,
            failures_by_type,
            failures_by_severity,
            recoverable_ratio,
            status: state.status,
        }
    }

    /// Drop all in-memory history and stop the scanner. Callable from any
    /// state; the detector is reusable afterwards.
    pub async fn cleanup(&self) {
        {
            let mut state = self.state.lock();
            state.operations.clear();
            state.failures.clear();
            state.last_alert_at = None;
            state.total_operations = 0;
            state.total_failures = 0;
            state.status = DetectorStatus::Stopped;
        }
        self.stop_scanner().await;
        info!("detector state cleared");
    }

    fn next_recovery_id(&self, now: i64) -> String {
        format!("rec_{}_{}", now, self.event_seq.fetch_add(1, Ordering::SeqCst))
    }
}
