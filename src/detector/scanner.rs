//! Periodic monitoring loop
//!
//! One tokio task per active detector: every tick it times out hung
//! operations and checks memory pressure, then goes back to sleep. The
//! loop exits when the shutdown channel changes or its sender drops.
//! Each sweep snapshots what it needs under the state lock and does all
//! event emission after the lock is released.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sysinfo::System;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::FailureDetector;
use crate::changelog;
use crate::types::{AlertData, OperationStatus, SentinelResult, SyncError, SyncOperation};
use crate::utils::now_millis;

/// Used/total system memory ratio above which HIGH_MEMORY_USAGE fires.
const MEMORY_USAGE_THRESHOLD: f64 = 0.9;

/// Scanner loop, one sweep per interval tick until shutdown.
pub(crate) async fn run_scanner(
    detector: Arc<FailureDetector>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(
        detector.config.monitoring_interval_ms,
    ));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = scan_once(&detector) {
                    warn!("monitor sweep failed: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("scanner loop exited");
}

/// One sweep: time out hung operations, then probe memory.
pub(crate) fn scan_once(detector: &FailureDetector) -> SentinelResult<()> {
    let now = now_millis();
    scan_for_timeouts(detector, now)?;
    check_memory_pressure(detector, now, memory_usage_ratio())?;
    Ok(())
}

/// Mark IN_PROGRESS operations older than the timeout threshold TIMED_OUT
/// and route each through failure reporting exactly once. Returns how many
/// were timed out in this sweep.
pub(crate) fn scan_for_timeouts(
    detector: &FailureDetector,
    now: i64,
) -> SentinelResult<usize> {
    let threshold_ms = detector.config.timeout_threshold_ms;

    // Flip the status under the lock so the next sweep skips these, then
    // report outside it
    let timed_out: Vec<SyncOperation> = {
        let mut state = detector.state.lock();
        let mut found = Vec::new();
        for queue in state.operations.values_mut() {
            for op in queue.iter_mut() {
                if op.status == OperationStatus::InProgress
                    && now - op.timestamp > threshold_ms as i64
                {
                    op.status = OperationStatus::TimedOut;
                    found.push(op.clone());
                }
            }
        }
        found
    };

    let count = timed_out.len();
    for operation in timed_out {
        warn!(
            id = %operation.id,
            table = %operation.table_name,
            "operation exceeded timeout threshold"
        );
        let error = SyncError::operation_timeout(threshold_ms, now);
        detector.report_failure(&operation, &error)?;
    }
    Ok(count)
}

/// Raise HIGH_MEMORY_USAGE through the shared alert cooldown.
///
/// `ratio` is injected so sweeps and tests share one code path; `None`
/// means the probe had nothing to report.
pub(crate) fn check_memory_pressure(
    detector: &FailureDetector,
    now: i64,
    ratio: Option<f64>,
) -> SentinelResult<()> {
    let ratio = match ratio {
        Some(r) => r,
        None => return Ok(()),
    };
    if ratio <= MEMORY_USAGE_THRESHOLD {
        return Ok(());
    }

    let admitted = detector.config.enable_alerts
        && detector
            .state
            .lock()
            .claim_alert(now, detector.config.alert_cooldown_ms);
    if admitted {
        warn!(ratio, "high memory usage");
        changelog::log_alert(
            &detector.manager,
            AlertData {
                alert_type: "HIGH_MEMORY_USAGE".to_string(),
                message: format!("system memory usage at {:.0}% of total", ratio * 100.0),
                details: Some(json!({ "ratio": ratio })),
            },
        )?;
    }
    Ok(())
}

/// Used/total system memory; `None` when the platform reports no total.
fn memory_usage_ratio() -> Option<f64> {
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        return None;
    }
    Some(system.used_memory() as f64 / total as f64)
}
