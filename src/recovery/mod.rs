//! Recovery event delivery
//!
//! Outbound notifications for external collaborators (recovery manager,
//! alerting, UI). Listeners subscribe per event kind through an explicitly
//! constructed registry that the process entry point owns and injects; a
//! listener error is logged and never reaches the emitter or the other
//! listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Kinds of recovery events delivered to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryEventKind {
    FailureDetected,
    RecoveryStarted,
    RecoveryCompleted,
}

impl std::fmt::Display for RecoveryEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryEventKind::FailureDetected => write!(f, "FAILURE_DETECTED"),
            RecoveryEventKind::RecoveryStarted => write!(f, "RECOVERY_STARTED"),
            RecoveryEventKind::RecoveryCompleted => write!(f, "RECOVERY_COMPLETED"),
        }
    }
}

/// Notification delivered to subscribed listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: RecoveryEventKind,

    pub timestamp: i64,

    #[serde(rename = "operationId", skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RecoveryEvent {
    pub fn new(id: impl Into<String>, kind: RecoveryEventKind, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            kind,
            timestamp,
            operation_id: None,
            error: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// What a listener returns; `Err` is logged by the registry, nothing more
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Listener = Arc<dyn Fn(&RecoveryEvent) -> ListenerResult + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
pub type ListenerId = u64;

/// Per-kind listener registry for recovery events
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<RecoveryEventKind, Vec<(ListenerId, Listener)>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register a listener for one event kind.
    pub fn subscribe<F>(&self, kind: RecoveryEventKind, listener: F) -> ListenerId
    where
        F: Fn(&RecoveryEvent) -> ListenerResult + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false when the id was not subscribed
    /// under that kind.
    pub fn unsubscribe(&self, kind: RecoveryEventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.get_mut(&kind) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|(entry_id, _)| *entry_id != id);
                entries.len() < before
            }
            None => false,
        }
    }

    pub fn listener_count(&self, kind: RecoveryEventKind) -> usize {
        self.listeners
            .lock()
            .get(&kind)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Deliver `event` to every listener subscribed to its kind.
    ///
    /// Listeners run outside the registry lock, so a listener may
    /// subscribe or unsubscribe without deadlocking. A failing listener
    /// is logged and the rest still run. Returns how many were notified.
    pub fn emit(&self, event: &RecoveryEvent) -> usize {
        let entries: Vec<(ListenerId, Listener)> = self
            .listeners
            .lock()
            .get(&event.kind)
            .map(|entries| entries.clone())
            .unwrap_or_default();

        for (id, listener) in &entries {
            if let Err(e) = listener(event) {
                warn!(
                    listener = id,
                    kind = %event.kind,
                    error = %e,
                    "recovery listener failed"
                );
            }
        }

        entries.len()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_event(kind: RecoveryEventKind) -> RecoveryEvent {
        RecoveryEvent::new("rec_1", kind, 1_000).with_operation("op_1")
    }

    #[test]
    fn test_subscribe_and_emit() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        registry.subscribe(RecoveryEventKind::FailureDetected, move |event| {
            assert_eq!(event.operation_id.as_deref(), Some("op_1"));
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let notified = registry.emit(&test_event(RecoveryEventKind::FailureDetected));
        assert_eq!(notified, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_only_reaches_matching_kind() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        registry.subscribe(RecoveryEventKind::RecoveryStarted, move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        registry.emit(&test_event(RecoveryEventKind::FailureDetected));
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        registry.emit(&test_event(RecoveryEventKind::RecoveryStarted));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        registry.subscribe(RecoveryEventKind::FailureDetected, |_| {
            Err("listener exploded".into())
        });
        let seen_clone = seen.clone();
        registry.subscribe(RecoveryEventKind::FailureDetected, move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let notified = registry.emit(&test_event(RecoveryEventKind::FailureDetected));
        assert_eq!(notified, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_clone = seen.clone();
        let id = registry.subscribe(RecoveryEventKind::RecoveryCompleted, move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(registry.unsubscribe(RecoveryEventKind::RecoveryCompleted, id));
        assert!(!registry.unsubscribe(RecoveryEventKind::RecoveryCompleted, id));

        registry.emit(&test_event(RecoveryEventKind::RecoveryCompleted));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(registry.listener_count(RecoveryEventKind::RecoveryCompleted), 0);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let registry = Arc::new(ListenerRegistry::new());

        let registry_clone = registry.clone();
        registry.subscribe(RecoveryEventKind::FailureDetected, move |_| {
            registry_clone.subscribe(RecoveryEventKind::RecoveryStarted, |_| Ok(()));
            Ok(())
        });

        registry.emit(&test_event(RecoveryEventKind::FailureDetected));
        assert_eq!(registry.listener_count(RecoveryEventKind::RecoveryStarted), 1);
    }

    #[test]
    fn test_wire_format_uses_camel_case_names() {
        let event = test_event(RecoveryEventKind::FailureDetected).with_error("boom");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "FAILURE_DETECTED");
        assert_eq!(json["operationId"], "op_1");
        assert_eq!(json["error"], "boom");
    }
}
