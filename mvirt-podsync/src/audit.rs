//! Audit trail for pod discovery and sync.
//!
//! Audit events are emitted on the `audit` tracing target, with the ids of the
//! objects they concern, so they can be routed separately from diagnostics.

use tracing::{info, warn};

use crate::pod::PodRecord;

/// Pod sync audit logger
pub struct SyncAuditLogger {
    enabled: bool,
}

impl SyncAuditLogger {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn new_noop() -> Self {
        Self { enabled: false }
    }

    pub fn pod_created(&self, pod: &PodRecord) {
        if self.enabled {
            info!(
                target: "audit",
                pod_id = %pod.id,
                "Pod created: {} ({}) type {}",
                pod.name,
                pod.id,
                pod.pod_type
            );
        }
    }

    pub fn pod_deleted(&self, pod_id: &str) {
        if self.enabled {
            info!(target: "audit", pod_id = %pod_id, "Pod deleted: {}", pod_id);
        }
    }

    pub fn pod_synced(&self, pod: &PodRecord) {
        if self.enabled {
            let routable: Vec<&str> = pod.routable_workers().iter().map(|w| w.as_str()).collect();
            let unroutable: Vec<&str> =
                pod.unroutable_workers().iter().map(|w| w.as_str()).collect();
            info!(
                target: "audit",
                pod_id = %pod.id,
                "Pod synced: {} ({}) version {}, routable via {:?}, unroutable via {:?}",
                pod.name,
                pod.id,
                pod.version,
                routable,
                unroutable
            );
        }
    }

    pub fn pod_sync_failed(&self, pod: &PodRecord, reason: &str) {
        if self.enabled {
            warn!(
                target: "audit",
                pod_id = %pod.id,
                "Pod sync failed: {} ({}): {}",
                pod.name,
                pod.id,
                reason
            );
        }
    }
}

impl Default for SyncAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}
