//! Replay and rollback engine
//!
//! Re-executes (or verifies) a filtered slice of the event log against a
//! `ReplayTarget`. Sessions are the unit of work and audit:
//!
//! ```text
//!   create_session          start                    finished
//!   PENDING ---------------> RUNNING ---------------> COMPLETED
//!                              |        \------------> FAILED
//!                              | cancel (cooperative)
//!                              v
//!                           CANCELLED
//! ```
//!
//! The strategy decides scheduling (strict order, bounded fan-out,
//! correlation chains, or the caller's ordering verbatim); the mode
//! decides per-event side effects (dry run, fast apply, verified apply,
//! or apply with anomaly collection). Terminal sessions are immutable and
//! keep their results for audit.
//!
//! Rollback points capture target snapshots with a TTL; restoring one
//! consumes it, and expired points are swept only when the caller asks.

mod rollback;
mod state;

pub use state::{MirrorState, ReplayTarget, SyncStateMirror, TableState};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tracing::info;

use crate::event_store::EventStore;
use crate::types::{
    ChangeEvent, EventFilter, ReplayMode, ReplayOptions, ReplayResult, ReplayResultStatus,
    ReplaySession, ReplayStatus, ReplayStrategy, RollbackPoint, SentinelResult, SortField,
    SortSpec,
};
use crate::utils::now_millis;
use rollback::RollbackStore;

/// Replay lifecycle and rollback errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    SessionNotFound(String),
    InvalidTransition {
        session_id: String,
        from: ReplayStatus,
        action: &'static str,
    },
    InvalidOptions(String),
    RollbackNotFound(String),
    RollbackInactive(String),
    RollbackExpired(String),
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::SessionNotFound(id) => write!(f, "replay session not found: {}", id),
            ReplayError::InvalidTransition {
                session_id,
                from,
                action,
            } => write!(f, "cannot {} session {} in state {}", action, session_id, from),
            ReplayError::InvalidOptions(msg) => write!(f, "invalid replay options: {}", msg),
            ReplayError::RollbackNotFound(id) => write!(f, "rollback point not found: {}", id),
            ReplayError::RollbackInactive(id) => {
                write!(f, "rollback point already used: {}", id)
            }
            ReplayError::RollbackExpired(id) => write!(f, "rollback point expired: {}", id),
        }
    }
}

impl std::error::Error for ReplayError {}

/// Engine-level configuration
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Lifetime of a rollback point from creation
    pub rollback_ttl_ms: i64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            rollback_ttl_ms: 86_400_000,
        }
    }
}

/// How a strategy run ended
enum RunEnd {
    Finished,
    Aborted(String),
    Cancelled,
}

/// Outcome of executing one event, before it becomes a `ReplayResult`
struct EventOutcome {
    status: ReplayResultStatus,
    error: Option<String>,
    warnings: Vec<String>,
}

impl EventOutcome {
    fn success(warnings: Vec<String>) -> Self {
        Self {
            status: ReplayResultStatus::Success,
            error: None,
            warnings,
        }
    }

    fn failed(error: String, warnings: Vec<String>) -> Self {
        Self {
            status: ReplayResultStatus::Failed,
            error: Some(error),
            warnings,
        }
    }
}

/// Replays filtered event slices against a target
pub struct ReplayEngine {
    store: Arc<EventStore>,
    target: Arc<dyn ReplayTarget>,
    sessions: RwLock<HashMap<String, ReplaySession>>,
    results: RwLock<HashMap<String, Vec<ReplayResult>>>,
    cancel_flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
    rollback_points: RollbackStore,
    session_seq: AtomicU64,
}

impl ReplayEngine {
    pub fn new(store: Arc<EventStore>, target: Arc<dyn ReplayTarget>, config: ReplayConfig) -> Self {
        Self {
            store,
            target,
            sessions: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            cancel_flags: RwLock::new(HashMap::new()),
            rollback_points: RollbackStore::new(config.rollback_ttl_ms),
            session_seq: AtomicU64::new(0),
        }
    }

    /// The target this engine replays into.
    pub fn target(&self) -> &Arc<dyn ReplayTarget> {
        &self.target
    }

    pub fn create_session(
        &self,
        filter: EventFilter,
        options: ReplayOptions,
    ) -> Result<ReplaySession, ReplayError> {
        options.validate().map_err(ReplayError::InvalidOptions)?;
        let now = now_millis();
        let id = format!(
            "replay_{}_{}",
            now,
            self.session_seq.fetch_add(1, Ordering::SeqCst)
        );
        let session = ReplaySession::new(id.clone(), filter, options, now);
        self.sessions.write().insert(id, session.clone());
        Ok(session)
    }

    pub fn create_named_session(
        &self,
        name: &str,
        description: &str,
        filter: EventFilter,
        options: ReplayOptions,
    ) -> Result<ReplaySession, ReplayError> {
        let session = self
            .create_session(filter, options)?
            .with_name(name)
            .with_description(description);
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Option<ReplaySession> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Newest first.
    pub fn list_sessions(&self) -> Vec<ReplaySession> {
        let mut sessions: Vec<ReplaySession> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        sessions
    }

    /// Per-event results in processing order.
    pub fn get_results(&self, session_id: &str) -> Result<Vec<ReplayResult>, ReplayError> {
        if !self.sessions.read().contains_key(session_id) {
            return Err(ReplayError::SessionNotFound(session_id.to_string()));
        }
        let mut results = self
            .results
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default();
        results.sort_by_key(|r| r.order);
        Ok(results)
    }

    /// Run a PENDING session to a terminal state and return it.
    pub async fn start(&self, session_id: &str) -> SentinelResult<ReplaySession> {
        let options = self.transition_to_running(session_id)?;
        let events = match self.materialize(session_id, &options) {
            Ok(events) => events,
            Err(e) => {
                self.finalize(session_id, ReplayStatus::Failed, Some(e.to_string()));
                return Err(e);
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .write()
            .insert(session_id.to_string(), cancel.clone());

        info!(
            id = session_id,
            events = events.len(),
            strategy = ?options.strategy,
            mode = ?options.mode,
            "replay session started"
        );

        let order = AtomicU64::new(0);
        let end = match options.strategy {
            ReplayStrategy::Sequential | ReplayStrategy::Selective => {
                self.run_sequential(session_id, events, options.mode, &cancel, &order)
            }
            ReplayStrategy::DependencyAware => self.run_chains(
                session_id,
                build_chains(events),
                options.mode,
                &cancel,
                &order,
            ),
            ReplayStrategy::Parallel => {
                self.run_parallel(session_id, events, &options, &cancel, &order)
                    .await
            }
        };

        let session = match end {
            RunEnd::Finished => self.finalize(session_id, ReplayStatus::Completed, None),
            RunEnd::Aborted(error) => {
                self.finalize(session_id, ReplayStatus::Failed, Some(error))
            }
            RunEnd::Cancelled => self.finalize(session_id, ReplayStatus::Cancelled, None),
        }
        .ok_or_else(|| ReplayError::SessionNotFound(session_id.to_string()))?;

        info!(
            id = %session.id,
            status = %session.status,
            processed = session.processed_events,
            failed = session.failed_events,
            "replay session finished"
        );
        Ok(session)
    }

    /// Request cooperative cancellation of a RUNNING session. In-flight
    /// event handlers finish; no new events start.
    pub fn cancel(&self, session_id: &str) -> Result<ReplaySession, ReplayError> {
        let snapshot = {
            let sessions = self.sessions.read();
            let session = sessions
                .get(session_id)
                .ok_or_else(|| ReplayError::SessionNotFound(session_id.to_string()))?;
            if session.status != ReplayStatus::Running {
                return Err(ReplayError::InvalidTransition {
                    session_id: session_id.to_string(),
                    from: session.status,
                    action: "cancel",
                });
            }
            session.clone()
        };
        if let Some(flag) = self.cancel_flags.read().get(session_id) {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(snapshot)
    }

    /// Capture the target's state as a restorable point. Links the most
    /// recently started RUNNING session, if any.
    pub fn create_rollback_point(&self, description: &str) -> SentinelResult<RollbackPoint> {
        let snapshot = self.target.snapshot()?;
        let session_id = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|s| s.status == ReplayStatus::Running)
                .max_by_key(|s| s.started_at)
                .map(|s| s.id.clone())
        };
        Ok(self
            .rollback_points
            .create(description, session_id, snapshot, now_millis()))
    }

    pub fn get_rollback_point(&self, id: &str) -> Option<RollbackPoint> {
        self.rollback_points.get(id)
    }

    pub fn list_rollback_points(&self) -> Vec<RollbackPoint> {
        self.rollback_points.list()
    }

    /// Restore the target from a rollback point. The point must be active
    /// and unexpired; a successful restore consumes it.
    pub fn rollback(&self, id: &str) -> SentinelResult<RollbackPoint> {
        let mut point = self.rollback_points.checkout(id, now_millis())?;
        self.target.restore(&point.snapshot)?;
        self.rollback_points.consume(id);
        point.is_active = false;
        info!(id = %point.id, "target state rolled back");
        Ok(point)
    }

    /// Caller-driven expiry sweep.
    pub fn sweep_expired_rollback_points(&self) -> usize {
        self.rollback_points.sweep_expired(now_millis())
    }

    fn transition_to_running(&self, session_id: &str) -> Result<ReplayOptions, ReplayError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ReplayError::SessionNotFound(session_id.to_string()))?;
        if session.status != ReplayStatus::Pending {
            return Err(ReplayError::InvalidTransition {
                session_id: session_id.to_string(),
                from: session.status,
                action: "start",
            });
        }
        session.status = ReplayStatus::Running;
        session.started_at = Some(now_millis());
        Ok(session.options)
    }

    /// Load the session's event slice. Everything but SELECTIVE replays in
    /// ascending timestamp order; SELECTIVE trusts the caller's sort.
    fn materialize(
        &self,
        session_id: &str,
        options: &ReplayOptions,
    ) -> SentinelResult<Vec<ChangeEvent>> {
        let mut query = {
            let sessions = self.sessions.read();
            match sessions.get(session_id) {
                Some(session) => session.filter.clone(),
                None => return Err(ReplayError::SessionNotFound(session_id.to_string()).into()),
            }
        };
        if options.strategy != ReplayStrategy::Selective {
            query.sort = Some(SortSpec::ascending(SortField::Timestamp));
        }
        let events = self.store.get_events(&query)?;

        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.total_events = events.len();
        }
        Ok(events)
    }

    fn run_sequential(
        &self,
        session_id: &str,
        events: Vec<ChangeEvent>,
        mode: ReplayMode,
        cancel: &AtomicBool,
        order: &AtomicU64,
    ) -> RunEnd {
        for event in events {
            if cancel.load(Ordering::SeqCst) {
                return RunEnd::Cancelled;
            }
            let result = self.process_one(session_id, &event, mode, order);
            if result.status == ReplayResultStatus::Failed && aborts_on_failure(mode) {
                return RunEnd::Aborted(abort_message(&event, &result));
            }
        }
        RunEnd::Finished
    }

    /// Chains run one after another, strict order inside each. Once a
    /// chain member fails in a mutating mode the rest of that chain is
    /// skipped; other chains are unaffected.
    fn run_chains(
        &self,
        session_id: &str,
        chains: Vec<Vec<ChangeEvent>>,
        mode: ReplayMode,
        cancel: &AtomicBool,
        order: &AtomicU64,
    ) -> RunEnd {
        for chain in chains {
            let mut failed_dependency: Option<String> = None;
            for event in chain {
                if cancel.load(Ordering::SeqCst) {
                    return RunEnd::Cancelled;
                }
                if let Some(dependency) = &failed_dependency {
                    self.record_skip(session_id, &event, dependency, order);
                    continue;
                }
                let result = self.process_one(session_id, &event, mode, order);
                if result.status == ReplayResultStatus::Failed {
                    if aborts_on_failure(mode) {
                        return RunEnd::Aborted(abort_message(&event, &result));
                    }
                    // Dry runs mutate nothing, so dependents stay testable
                    if mode != ReplayMode::DryRun {
                        failed_dependency = Some(event.id.clone());
                    }
                }
            }
        }
        RunEnd::Finished
    }

    /// Independent events fan out through a bounded pool; correlated ones
    /// are deferred and run dependency-aware afterwards.
    async fn run_parallel(
        &self,
        session_id: &str,
        events: Vec<ChangeEvent>,
        options: &ReplayOptions,
        cancel: &AtomicBool,
        order: &AtomicU64,
    ) -> RunEnd {
        let (independent, correlated): (Vec<ChangeEvent>, Vec<ChangeEvent>) = events
            .into_iter()
            .partition(|event| event.correlation_id.is_none());

        let mode = options.mode;
        let mut outcomes = stream::iter(independent.into_iter().map(|event| {
            let target = self.target.clone();
            async move {
                let started = Instant::now();
                let outcome = execute_event(target.as_ref(), &event, mode);
                (event, outcome, started.elapsed().as_millis() as u64)
            }
        }))
        .buffer_unordered(options.max_parallelism);

        while let Some((event, outcome, duration_ms)) = outcomes.next().await {
            let result = ReplayResult {
                session_id: session_id.to_string(),
                event_id: event.id.clone(),
                status: outcome.status,
                duration_ms,
                error: outcome.error,
                warnings: outcome.warnings,
                order: order.fetch_add(1, Ordering::SeqCst),
            };
            self.record(session_id, result.clone());
            if result.status == ReplayResultStatus::Failed && aborts_on_failure(mode) {
                return RunEnd::Aborted(abort_message(&event, &result));
            }
            if cancel.load(Ordering::SeqCst) {
                return RunEnd::Cancelled;
            }
        }
        drop(outcomes);

        if cancel.load(Ordering::SeqCst) {
            return RunEnd::Cancelled;
        }
        self.run_chains(session_id, build_chains(correlated), mode, cancel, order)
    }

    fn process_one(
        &self,
        session_id: &str,
        event: &ChangeEvent,
        mode: ReplayMode,
        order: &AtomicU64,
    ) -> ReplayResult {
        let started = Instant::now();
        let outcome = execute_event(self.target.as_ref(), event, mode);
        let result = ReplayResult {
            session_id: session_id.to_string(),
            event_id: event.id.clone(),
            status: outcome.status,
            duration_ms: started.elapsed().as_millis() as u64,
            error: outcome.error,
            warnings: outcome.warnings,
            order: order.fetch_add(1, Ordering::SeqCst),
        };
        self.record(session_id, result.clone());
        result
    }

    fn record_skip(
        &self,
        session_id: &str,
        event: &ChangeEvent,
        failed_dependency: &str,
        order: &AtomicU64,
    ) {
        self.record(
            session_id,
            ReplayResult {
                session_id: session_id.to_string(),
                event_id: event.id.clone(),
                status: ReplayResultStatus::Skipped,
                duration_ms: 0,
                error: Some(format!("dependency {} failed", failed_dependency)),
                warnings: Vec::new(),
                order: order.fetch_add(1, Ordering::SeqCst),
            },
        );
    }

    /// Append one result and move the session counters with it.
    fn record(&self, session_id: &str, result: ReplayResult) {
        {
            let mut sessions = self.sessions.write();
            if let Some(session) = sessions.get_mut(session_id) {
                session.processed_events += 1;
                match result.status {
                    ReplayResultStatus::Success => session.succeeded_events += 1,
                    ReplayResultStatus::Failed => session.failed_events += 1,
                    ReplayResultStatus::Skipped => session.skipped_events += 1,
                }
            }
        }
        self.results
            .write()
            .entry(session_id.to_string())
            .or_default()
            .push(result);
    }

    fn finalize(
        &self,
        session_id: &str,
        status: ReplayStatus,
        error: Option<String>,
    ) -> Option<ReplaySession> {
        self.cancel_flags.write().remove(session_id);
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id)?;
        let now = now_millis();
        session.status = status;
        session.completed_at = Some(now);
        session.duration_ms = session.started_at.map(|s| (now - s).max(0) as u64);
        session.error = error;
        Some(session.clone())
    }
}

fn aborts_on_failure(mode: ReplayMode) -> bool {
    matches!(mode, ReplayMode::Fast | ReplayMode::Verbose)
}

fn abort_message(event: &ChangeEvent, result: &ReplayResult) -> String {
    result
        .error
        .clone()
        .unwrap_or_else(|| format!("event {} failed", event.id))
}

/// Run one event with the mode's side-effect contract.
fn execute_event(target: &dyn ReplayTarget, event: &ChangeEvent, mode: ReplayMode) -> EventOutcome {
    match mode {
        ReplayMode::DryRun => match target.verify(event) {
            Ok(warnings) => EventOutcome::success(warnings),
            Err(e) => EventOutcome::failed(e.to_string(), Vec::new()),
        },
        ReplayMode::Fast => match target.apply(event) {
            Ok(()) => EventOutcome::success(Vec::new()),
            Err(e) => EventOutcome::failed(e.to_string(), Vec::new()),
        },
        ReplayMode::Safe => {
            let warnings = match target.verify(event) {
                Ok(warnings) => warnings,
                Err(e) => {
                    return EventOutcome::failed(
                        format!("pre-verification failed: {}", e),
                        Vec::new(),
                    )
                }
            };
            if let Err(e) = target.apply(event) {
                return EventOutcome::failed(e.to_string(), warnings);
            }
            // The post pass guards integrity only; its warnings would
            // duplicate the pre pass
            if let Err(e) = target.verify(event) {
                return EventOutcome::failed(
                    format!("post-verification failed: {}", e),
                    warnings,
                );
            }
            EventOutcome::success(warnings)
        }
        ReplayMode::Verbose => {
            let mut warnings = Vec::new();
            match target.verify(event) {
                Ok(found) => warnings.extend(found),
                Err(e) => warnings.push(format!("verification failed: {}", e)),
            }
            match target.apply(event) {
                Ok(()) => EventOutcome::success(warnings),
                Err(e) => EventOutcome::failed(e.to_string(), warnings),
            }
        }
    }
}

/// Group events into correlation chains, preserving slice order.
///
/// A chain is the events sharing one correlation id plus the event that
/// id points at. Uncorrelated events become singleton chains, so chain
/// creation order is the slice's order.
fn build_chains(events: Vec<ChangeEvent>) -> Vec<Vec<ChangeEvent>> {
    let roots: HashSet<String> = events
        .iter()
        .filter_map(|event| event.correlation_id.clone())
        .collect();

    let mut chain_index: HashMap<String, usize> = HashMap::new();
    let mut chains: Vec<Vec<ChangeEvent>> = Vec::new();
    for event in events {
        let key = if let Some(correlation) = event.correlation_id.clone() {
            Some(correlation)
        } else if roots.contains(&event.id) {
            Some(event.id.clone())
        } else {
            None
        };
        match key {
            Some(key) => {
                let index = *chain_index.entry(key).or_insert_with(|| {
                    chains.push(Vec::new());
                    chains.len() - 1
                });
                chains[index].push(event);
            }
            None => chains.push(vec![event]),
        }
    }
    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventStoreConfig;
    use crate::types::{
        ChangeEventType, EventPayload, EventSeverity, EventSource, OperationStatus, OperationType,
        SyncOperationData,
    };
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Mirror-backed target with scripted failures and an apply hook
    struct ScriptedTarget {
        inner: SyncStateMirror,
        fail_apply: HashSet<String>,
        fail_verify: HashSet<String>,
        applied: Mutex<Vec<String>>,
        on_apply: Mutex<Option<Box<dyn Fn(usize) + Send + Sync>>>,
    }

    impl ScriptedTarget {
        fn new() -> Self {
            Self {
                inner: SyncStateMirror::new(),
                fail_apply: HashSet::new(),
                fail_verify: HashSet::new(),
                applied: Mutex::new(Vec::new()),
                on_apply: Mutex::new(None),
            }
        }

        fn failing_apply(ids: &[&str]) -> Self {
            let mut target = Self::new();
            target.fail_apply = ids.iter().map(|s| s.to_string()).collect();
            target
        }

        fn failing_verify(ids: &[&str]) -> Self {
            let mut target = Self::new();
            target.fail_verify = ids.iter().map(|s| s.to_string()).collect();
            target
        }

        fn applied(&self) -> Vec<String> {
            self.applied.lock().clone()
        }
    }

    impl ReplayTarget for ScriptedTarget {
        fn apply(&self, event: &ChangeEvent) -> SentinelResult<()> {
            if self.fail_apply.contains(&event.id) {
                return Err(format!("scripted apply failure for {}", event.id).into());
            }
            self.inner.apply(event)?;
            let count = {
                let mut applied = self.applied.lock();
                applied.push(event.id.clone());
                applied.len()
            };
            if let Some(hook) = &*self.on_apply.lock() {
                hook(count);
            }
            Ok(())
        }

        fn verify(&self, event: &ChangeEvent) -> SentinelResult<Vec<String>> {
            if self.fail_verify.contains(&event.id) {
                return Err(format!("scripted verify failure for {}", event.id).into());
            }
            self.inner.verify(event)
        }

        fn snapshot(&self) -> SentinelResult<serde_json::Value> {
            self.inner.snapshot()
        }

        fn restore(&self, snapshot: &serde_json::Value) -> SentinelResult<()> {
            self.inner.restore(snapshot)
        }
    }

    fn sync_event(id: &str, timestamp: i64, correlation: Option<&str>) -> ChangeEvent {
        let mut event = ChangeEvent::new(
            id.to_string(),
            ChangeEventType::SyncOperation,
            EventSeverity::Info,
            EventSource::SyncManager,
            timestamp,
            EventPayload::SyncOperation(SyncOperationData {
                operation_id: format!("{}_op", id),
                table_name: "tasks".to_string(),
                operation_type: OperationType::Push,
                status: OperationStatus::Completed,
                duration_ms: None,
                items_synced: None,
            }),
        );
        event.correlation_id = correlation.map(String::from);
        event
    }

    fn plain_events(count: usize) -> Vec<ChangeEvent> {
        (1..=count)
            .map(|i| sync_event(&format!("evt_{}", i), i as i64 * 1_000, None))
            .collect()
    }

    fn seed_engine(
        events: Vec<ChangeEvent>,
        target: Arc<ScriptedTarget>,
        config: ReplayConfig,
    ) -> (Arc<ReplayEngine>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(EventStore::with_config(EventStoreConfig::new(
            temp_dir.path(),
        )));
        store.initialize().unwrap();
        for event in events {
            store.store_event(event).unwrap();
        }
        let engine = Arc::new(ReplayEngine::new(store, target, config));
        (engine, temp_dir)
    }

    #[test]
    fn test_create_session_validates_options() {
        let (engine, _dir) = seed_engine(
            vec![],
            Arc::new(ScriptedTarget::new()),
            ReplayConfig::default(),
        );

        let mut options = ReplayOptions::new(ReplayMode::Safe, ReplayStrategy::Parallel);
        options.max_parallelism = 0;
        assert!(matches!(
            engine.create_session(EventFilter::all(), options),
            Err(ReplayError::InvalidOptions(_))
        ));
    }

    #[tokio::test]
    async fn test_sequential_safe_replays_in_ascending_order() {
        let target = Arc::new(ScriptedTarget::new());
        let (engine, _dir) = seed_engine(plain_events(4), target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(EventFilter::all(), ReplayOptions::default())
            .unwrap();
        let finished = engine.start(&session.id).await.unwrap();

        assert_eq!(finished.status, ReplayStatus::Completed);
        assert_eq!(finished.total_events, 4);
        assert_eq!(finished.processed_events, 4);
        assert_eq!(finished.succeeded_events, 4);
        assert!(finished.duration_ms.is_some());

        // Ascending timestamps regardless of the store's default sort
        assert_eq!(target.applied(), vec!["evt_1", "evt_2", "evt_3", "evt_4"]);

        let results = engine.get_results(&session.id).unwrap();
        let orders: Vec<u64> = results.iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_mutating() {
        let target = Arc::new(ScriptedTarget::failing_verify(&["evt_2"]));
        let (engine, _dir) = seed_engine(plain_events(3), target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::DryRun, ReplayStrategy::Sequential),
            )
            .unwrap();
        let finished = engine.start(&session.id).await.unwrap();

        // A dry run reports failures but never stops or mutates
        assert_eq!(finished.status, ReplayStatus::Completed);
        assert_eq!(finished.succeeded_events, 2);
        assert_eq!(finished.failed_events, 1);
        assert!(target.applied().is_empty());
        assert_eq!(target.inner.state().events_applied, 0);
    }

    #[tokio::test]
    async fn test_fast_aborts_on_first_failure() {
        let target = Arc::new(ScriptedTarget::failing_apply(&["evt_2"]));
        let (engine, _dir) = seed_engine(plain_events(4), target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::Fast, ReplayStrategy::Sequential),
            )
            .unwrap();
        let finished = engine.start(&session.id).await.unwrap();

        assert_eq!(finished.status, ReplayStatus::Failed);
        assert!(finished.error.as_ref().unwrap().contains("evt_2"));
        // evt_3 and evt_4 were never processed
        assert_eq!(finished.processed_events, 2);
        assert_eq!(engine.get_results(&session.id).unwrap().len(), 2);
        assert_eq!(target.applied(), vec!["evt_1"]);
    }

    #[tokio::test]
    async fn test_safe_marks_failed_and_continues() {
        let target = Arc::new(ScriptedTarget::failing_verify(&["evt_2"]));
        let (engine, _dir) = seed_engine(plain_events(3), target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::Safe, ReplayStrategy::Sequential),
            )
            .unwrap();
        let finished = engine.start(&session.id).await.unwrap();

        assert_eq!(finished.status, ReplayStatus::Completed);
        assert_eq!(finished.succeeded_events, 2);
        assert_eq!(finished.failed_events, 1);

        // The pre-verification failure blocked the apply
        assert_eq!(target.applied(), vec!["evt_1", "evt_3"]);

        let results = engine.get_results(&session.id).unwrap();
        assert_eq!(results[1].status, ReplayResultStatus::Failed);
        assert!(results[1]
            .error
            .as_ref()
            .unwrap()
            .contains("pre-verification failed"));
    }

    #[tokio::test]
    async fn test_verbose_downgrades_verification_failures() {
        let target = Arc::new(ScriptedTarget::failing_verify(&["evt_2"]));
        let (engine, _dir) = seed_engine(plain_events(3), target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::Verbose, ReplayStrategy::Sequential),
            )
            .unwrap();
        let finished = engine.start(&session.id).await.unwrap();

        assert_eq!(finished.status, ReplayStatus::Completed);
        assert_eq!(finished.succeeded_events, 3);

        // The event applied anyway, with the failure kept as a warning
        assert_eq!(target.applied().len(), 3);
        let results = engine.get_results(&session.id).unwrap();
        assert_eq!(results[1].status, ReplayResultStatus::Success);
        assert!(results[1].warnings[0].contains("verification failed"));
    }

    #[tokio::test]
    async fn test_selective_trusts_caller_ordering() {
        let target = Arc::new(ScriptedTarget::new());
        let (engine, _dir) = seed_engine(plain_events(3), target.clone(), ReplayConfig::default());

        // Default sort is timestamp DESC; SELECTIVE must not override it
        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::Fast, ReplayStrategy::Selective),
            )
            .unwrap();
        engine.start(&session.id).await.unwrap();

        assert_eq!(target.applied(), vec!["evt_3", "evt_2", "evt_1"]);
    }

    #[tokio::test]
    async fn test_dependency_aware_orders_chains() {
        let target = Arc::new(ScriptedTarget::new());
        let events = vec![
            sync_event("evt_root", 1_000, None),
            sync_event("evt_other", 2_000, None),
            sync_event("evt_dep1", 3_000, Some("evt_root")),
            sync_event("evt_late", 4_000, None),
            sync_event("evt_dep2", 5_000, Some("evt_root")),
        ];
        let (engine, _dir) = seed_engine(events, target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::Fast, ReplayStrategy::DependencyAware),
            )
            .unwrap();
        let finished = engine.start(&session.id).await.unwrap();

        assert_eq!(finished.status, ReplayStatus::Completed);
        // The root's chain runs to completion before later singletons
        assert_eq!(
            target.applied(),
            vec!["evt_root", "evt_dep1", "evt_dep2", "evt_other", "evt_late"]
        );
    }

    #[tokio::test]
    async fn test_chain_failure_skips_dependents_only() {
        let target = Arc::new(ScriptedTarget::failing_apply(&["evt_dep1"]));
        let events = vec![
            sync_event("evt_root", 1_000, None),
            sync_event("evt_other", 2_000, None),
            sync_event("evt_dep1", 3_000, Some("evt_root")),
            sync_event("evt_dep2", 4_000, Some("evt_root")),
        ];
        let (engine, _dir) = seed_engine(events, target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::Safe, ReplayStrategy::DependencyAware),
            )
            .unwrap();
        let finished = engine.start(&session.id).await.unwrap();

        assert_eq!(finished.status, ReplayStatus::Completed);
        assert_eq!(finished.succeeded_events, 2);
        assert_eq!(finished.failed_events, 1);
        assert_eq!(finished.skipped_events, 1);

        let results = engine.get_results(&session.id).unwrap();
        let skipped = results
            .iter()
            .find(|r| r.status == ReplayResultStatus::Skipped)
            .unwrap();
        assert_eq!(skipped.event_id, "evt_dep2");
        assert!(skipped.error.as_ref().unwrap().contains("evt_dep1"));

        // The unrelated singleton still ran
        assert!(target.applied().contains(&"evt_other".to_string()));
    }

    #[tokio::test]
    async fn test_parallel_defers_correlated_events() {
        let target = Arc::new(ScriptedTarget::new());
        let events = vec![
            sync_event("evt_root", 1_000, None),
            sync_event("evt_free1", 2_000, None),
            sync_event("evt_dep1", 3_000, Some("evt_root")),
            sync_event("evt_free2", 4_000, None),
            sync_event("evt_dep2", 5_000, Some("evt_root")),
        ];
        let (engine, _dir) = seed_engine(events, target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::Fast, ReplayStrategy::Parallel),
            )
            .unwrap();
        let finished = engine.start(&session.id).await.unwrap();

        assert_eq!(finished.status, ReplayStatus::Completed);
        assert_eq!(finished.succeeded_events, 5);

        // All independent events land before any correlated one, and the
        // correlated tail keeps chain order
        let applied = target.applied();
        let first_three: HashSet<&str> = applied[..3].iter().map(|s| s.as_str()).collect();
        assert_eq!(
            first_three,
            HashSet::from(["evt_root", "evt_free1", "evt_free2"])
        );
        assert_eq!(&applied[3..], &["evt_dep1", "evt_dep2"]);

        // Orders are unique and account for every event
        let results = engine.get_results(&session.id).unwrap();
        let orders: HashSet<u64> = results.iter().map(|r| r.order).collect();
        assert_eq!(orders.len(), 5);
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_results() {
        let target = Arc::new(ScriptedTarget::new());
        let (engine, _dir) = seed_engine(plain_events(4), target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::Fast, ReplayStrategy::Sequential),
            )
            .unwrap();

        // Cancel from inside the second apply; the third never starts
        let engine_for_hook = engine.clone();
        let session_id = session.id.clone();
        *target.on_apply.lock() = Some(Box::new(move |count| {
            if count == 2 {
                engine_for_hook.cancel(&session_id).unwrap();
            }
        }));

        let finished = engine.start(&session.id).await.unwrap();
        assert_eq!(finished.status, ReplayStatus::Cancelled);
        assert_eq!(finished.processed_events, 2);
        assert_eq!(engine.get_results(&session.id).unwrap().len(), 2);
        assert_eq!(target.applied(), vec!["evt_1", "evt_2"]);

        // Terminal sessions reject further transitions
        assert!(matches!(
            engine.cancel(&session.id),
            Err(ReplayError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let (engine, _dir) = seed_engine(
            plain_events(1),
            Arc::new(ScriptedTarget::new()),
            ReplayConfig::default(),
        );

        assert!(engine.start("replay_missing").await.is_err());
        assert!(matches!(
            engine.cancel("replay_missing"),
            Err(ReplayError::SessionNotFound(_))
        ));

        let session = engine
            .create_session(EventFilter::all(), ReplayOptions::default())
            .unwrap();

        // PENDING sessions cannot be cancelled
        assert!(matches!(
            engine.cancel(&session.id),
            Err(ReplayError::InvalidTransition { .. })
        ));

        engine.start(&session.id).await.unwrap();

        // COMPLETED sessions cannot be restarted
        let err = engine.start(&session.id).await.unwrap_err();
        assert!(err.to_string().contains("cannot start"));
    }

    #[tokio::test]
    async fn test_session_listing_and_results_audit() {
        let (engine, _dir) = seed_engine(
            plain_events(2),
            Arc::new(ScriptedTarget::new()),
            ReplayConfig::default(),
        );

        let first = engine
            .create_session(EventFilter::all(), ReplayOptions::default())
            .unwrap();
        let second = engine
            .create_named_session(
                "audit",
                "verification pass",
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::DryRun, ReplayStrategy::Sequential),
            )
            .unwrap();

        assert_eq!(engine.list_sessions().len(), 2);
        assert_eq!(
            engine.get_session(&second.id).unwrap().name.as_deref(),
            Some("audit")
        );

        engine.start(&first.id).await.unwrap();
        assert_eq!(engine.get_results(&first.id).unwrap().len(), 2);
        assert!(engine.get_results(&second.id).unwrap().is_empty());
        assert!(matches!(
            engine.get_results("replay_missing"),
            Err(ReplayError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rollback_restores_and_consumes_the_point() {
        let target = Arc::new(ScriptedTarget::new());
        let (engine, _dir) = seed_engine(plain_events(3), target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(EventFilter::all(), ReplayOptions::default())
            .unwrap();
        engine.start(&session.id).await.unwrap();
        assert_eq!(target.inner.state().events_applied, 3);

        let point = engine.create_rollback_point("after first replay").unwrap();
        assert!(point.session_id.is_none());

        // Replay the same slice again on top
        let again = engine
            .create_session(EventFilter::all(), ReplayOptions::new(ReplayMode::Fast, ReplayStrategy::Sequential))
            .unwrap();
        engine.start(&again.id).await.unwrap();
        assert_eq!(target.inner.state().events_applied, 6);

        let restored = engine.rollback(&point.id).unwrap();
        assert!(!restored.is_active);
        assert_eq!(target.inner.state().events_applied, 3);

        // A consumed point cannot be restored twice
        assert!(engine.rollback(&point.id).is_err());
    }

    #[tokio::test]
    async fn test_rollback_point_links_running_session() {
        let target = Arc::new(ScriptedTarget::new());
        let (engine, _dir) = seed_engine(plain_events(3), target.clone(), ReplayConfig::default());

        let session = engine
            .create_session(
                EventFilter::all(),
                ReplayOptions::new(ReplayMode::Fast, ReplayStrategy::Sequential),
            )
            .unwrap();

        let engine_for_hook = engine.clone();
        let captured: Arc<Mutex<Option<RollbackPoint>>> = Arc::new(Mutex::new(None));
        let captured_in_hook = captured.clone();
        *target.on_apply.lock() = Some(Box::new(move |count| {
            if count == 2 {
                let point = engine_for_hook
                    .create_rollback_point("mid-replay checkpoint")
                    .unwrap();
                *captured_in_hook.lock() = Some(point);
            }
        }));

        engine.start(&session.id).await.unwrap();

        let point = captured.lock().take().unwrap();
        assert_eq!(point.session_id.as_deref(), Some(session.id.as_str()));
    }

    #[tokio::test]
    async fn test_expired_points_reject_rollback_and_sweep() {
        let target = Arc::new(ScriptedTarget::new());
        let (engine, _dir) = seed_engine(
            vec![],
            target.clone(),
            ReplayConfig { rollback_ttl_ms: 0 },
        );

        let point = engine.create_rollback_point("instantly stale").unwrap();
        assert!(matches!(
            engine.rollback(&point.id).unwrap_err().downcast_ref::<ReplayError>(),
            Some(ReplayError::RollbackExpired(_))
        ));

        assert_eq!(engine.sweep_expired_rollback_points(), 1);
        assert!(engine.get_rollback_point(&point.id).is_none());
        assert_eq!(engine.sweep_expired_rollback_points(), 0);
    }
}
