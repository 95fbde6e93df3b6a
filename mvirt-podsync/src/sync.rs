//! Discover-and-sync entry points.
//!
//! [`PodSyncer::sync_pod_async`] is for callers running on the async
//! runtime, [`PodSyncer::sync_pod`] for callers on a plain thread (request
//! handlers, `spawn_blocking`, the CLI). Both run the same discovery and
//! reconciliation, so they produce the same pod record for the same inputs.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::info;

use crate::audit::SyncAuditLogger;
use crate::discovery::{DEFAULT_DISCOVERY_TIMEOUT, DiscoveryRequest, discover_pod};
use crate::error::SyncError;
use crate::pod::PodRecord;
use crate::reconcile::Reconciler;
use crate::store::PodStore;
use crate::worker::WorkerHandle;

/// Re-discovers pods through the connected workers and saves the result.
pub struct PodSyncer {
    reconciler: Reconciler,
    runtime: Handle,
    timeout: Duration,
    audit: Arc<SyncAuditLogger>,
}

impl PodSyncer {
    /// Create a syncer writing to `store`. Blocking syncs run their network
    /// and database work on `runtime`.
    pub fn new(store: Arc<dyn PodStore>, runtime: Handle) -> Self {
        Self {
            reconciler: Reconciler::new(store),
            runtime,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            audit: Arc::new(SyncAuditLogger::new()),
        }
    }

    /// Per-worker discovery timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_audit(mut self, audit: Arc<SyncAuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Discover `pod` through `workers` and reconcile it, without blocking.
    pub async fn sync_pod_async(
        &self,
        pod: &PodRecord,
        workers: &[Arc<dyn WorkerHandle>],
    ) -> Result<PodRecord, SyncError> {
        let result = self.run(pod, workers).await;
        match &result {
            Ok(updated) => self.audit.pod_synced(updated),
            Err(err) => self.audit.pod_sync_failed(pod, &err.to_string()),
        }
        result
    }

    /// Discover `pod` through `workers` and reconcile it, blocking the
    /// current thread until done.
    ///
    /// The write runs in the store's own transaction, which has committed by
    /// the time this returns. It does not join a transaction the caller may
    /// hold on the same database; callers needing that should apply
    /// [`plan_update`](crate::reconcile::plan_update) within their own scope.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async context; use
    /// [`sync_pod_async`](Self::sync_pod_async) there, or move the call into
    /// `spawn_blocking`.
    pub fn sync_pod(
        &self,
        pod: &PodRecord,
        workers: &[Arc<dyn WorkerHandle>],
    ) -> Result<PodRecord, SyncError> {
        self.runtime.block_on(self.sync_pod_async(pod, workers))
    }

    async fn run(
        &self,
        pod: &PodRecord,
        workers: &[Arc<dyn WorkerHandle>],
    ) -> Result<PodRecord, SyncError> {
        if pod.pod_type.trim().is_empty() {
            return Err(SyncError::InvalidTarget(format!(
                "pod {} has no power type",
                pod.id
            )));
        }

        info!(
            "Syncing pod {} ({}) through {} workers",
            pod.name,
            pod.id,
            workers.len()
        );

        // Discovery happens before, and outside of, the store write.
        let request = DiscoveryRequest::for_pod(pod);
        let result = discover_pod(&request, workers, self.timeout).await?;
        self.reconciler.reconcile(pod, &result).await
    }
}
