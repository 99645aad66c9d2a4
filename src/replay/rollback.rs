//! Rollback point bookkeeping
//!
//! Points are created from target snapshots and restored through the
//! target. A point is usable while it is active and unexpired; restoring
//! consumes it (deactivation), expiry is swept only when the caller asks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::info;

use super::ReplayError;
use crate::types::RollbackPoint;

pub(crate) struct RollbackStore {
    points: RwLock<HashMap<String, RollbackPoint>>,
    seq: AtomicU64,
    ttl_ms: i64,
}

impl RollbackStore {
    pub(crate) fn new(ttl_ms: i64) -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            ttl_ms,
        }
    }

    pub(crate) fn create(
        &self,
        description: &str,
        session_id: Option<String>,
        snapshot: serde_json::Value,
        now: i64,
    ) -> RollbackPoint {
        let id = format!("rb_{}_{}", now, self.seq.fetch_add(1, Ordering::SeqCst));
        let point = RollbackPoint {
            id: id.clone(),
            session_id,
            timestamp: now,
            description: description.to_string(),
            snapshot,
            metadata: serde_json::Value::Null,
            is_active: true,
            expires_at: now + self.ttl_ms,
        };
        self.points.write().insert(id, point.clone());
        info!(id = %point.id, "rollback point created");
        point
    }

    pub(crate) fn get(&self, id: &str) -> Option<RollbackPoint> {
        self.points.read().get(id).cloned()
    }

    /// Newest first.
    pub(crate) fn list(&self) -> Vec<RollbackPoint> {
        let mut points: Vec<RollbackPoint> = self.points.read().values().cloned().collect();
        points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        points
    }

    /// Validate a point for restore and hand back its snapshot. The point
    /// stays active until `consume` confirms the restore happened.
    pub(crate) fn checkout(&self, id: &str, now: i64) -> Result<RollbackPoint, ReplayError> {
        let points = self.points.read();
        let point = points
            .get(id)
            .ok_or_else(|| ReplayError::RollbackNotFound(id.to_string()))?;
        if !point.is_active {
            return Err(ReplayError::RollbackInactive(id.to_string()));
        }
        if point.is_expired(now) {
            return Err(ReplayError::RollbackExpired(id.to_string()));
        }
        Ok(point.clone())
    }

    /// Deactivate after a successful restore; the point stays listed for
    /// audit until the sweep removes it.
    pub(crate) fn consume(&self, id: &str) {
        if let Some(point) = self.points.write().get_mut(id) {
            point.is_active = false;
        }
    }

    /// Remove expired points, active or not. Returns how many went.
    pub(crate) fn sweep_expired(&self, now: i64) -> usize {
        let mut points = self.points.write();
        let before = points.len();
        points.retain(|_, point| !point.is_expired(now));
        let removed = before - points.len();
        if removed > 0 {
            info!(removed, "expired rollback points swept");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_stamps_expiry_from_ttl() {
        let store = RollbackStore::new(1_000);
        let point = store.create("before migration", None, json!({}), 5_000);

        assert!(point.is_active);
        assert_eq!(point.expires_at, 6_000);
        assert_eq!(store.get(&point.id).unwrap().description, "before migration");
    }

    #[test]
    fn test_checkout_rules() {
        let store = RollbackStore::new(1_000);
        let point = store.create("p", None, json!({}), 5_000);

        assert!(store.checkout(&point.id, 5_500).is_ok());
        assert!(matches!(
            store.checkout("rb_missing", 5_500),
            Err(ReplayError::RollbackNotFound(_))
        ));
        assert!(matches!(
            store.checkout(&point.id, 6_000),
            Err(ReplayError::RollbackExpired(_))
        ));

        store.consume(&point.id);
        assert!(matches!(
            store.checkout(&point.id, 5_500),
            Err(ReplayError::RollbackInactive(_))
        ));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = RollbackStore::new(1_000);
        let old = store.create("old", None, json!({}), 1_000);
        let fresh = store.create("fresh", None, json!({}), 5_000);

        assert_eq!(store.sweep_expired(5_500), 1);
        assert!(store.get(&old.id).is_none());
        assert!(store.get(&fresh.id).is_some());
        assert_eq!(store.sweep_expired(5_500), 0);
    }

    #[test]
    fn test_list_newest_first() {
        let store = RollbackStore::new(10_000);
        store.create("first", None, json!({}), 1_000);
        store.create("second", None, json!({}), 2_000);

        let points = store.list();
        assert_eq!(points[0].description, "second");
        assert_eq!(points[1].description, "first");
    }
}
