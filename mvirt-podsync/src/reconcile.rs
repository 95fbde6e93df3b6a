//! Reconciliation of discovery results into pod records.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::aggregate::AggregatedResult;
use crate::error::SyncError;
use crate::pod::{DiscoveredPod, PodRecord, PodUpdate};
use crate::store::PodStore;
use crate::worker::WorkerId;

/// Pick the snapshot that becomes authoritative.
///
/// Every worker is expected to see the same physical target, so any success
/// will do; the lowest worker id is taken to keep repeated syncs stable.
pub fn select_snapshot(
    result: &AggregatedResult<DiscoveredPod>,
) -> Option<(&WorkerId, &DiscoveredPod)> {
    result.succeeded.iter().next()
}

/// Turn a discovery result into the update to write.
///
/// Workers that answered become routable, workers that failed become
/// unroutable, and nothing else is kept. Fails with `NoViableWorker`, carrying
/// every failure, when no worker answered.
pub fn plan_update(result: &AggregatedResult<DiscoveredPod>) -> Result<PodUpdate, SyncError> {
    let Some((_, snapshot)) = select_snapshot(result) else {
        return Err(SyncError::NoViableWorker {
            causes: result.failed.clone(),
        });
    };

    let mut routable: BTreeMap<WorkerId, bool> = result
        .succeeded
        .keys()
        .map(|id| (id.clone(), true))
        .collect();
    routable.extend(result.failed.keys().map(|id| (id.clone(), false)));

    Ok(PodUpdate {
        discovered: snapshot.clone(),
        routable,
    })
}

/// Applies discovery results to stored pods.
///
/// Performs no network I/O. The write goes through
/// [`PodStore::apply_update`], so the discovered fields and the worker routes
/// land together or not at all.
pub struct Reconciler {
    store: Arc<dyn PodStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PodStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        pod: &PodRecord,
        result: &AggregatedResult<DiscoveredPod>,
    ) -> Result<PodRecord, SyncError> {
        let update = match plan_update(result) {
            Ok(update) => update,
            Err(err) => {
                warn!(
                    "No worker could discover pod {} ({}): {}",
                    pod.name, pod.id, err
                );
                return Err(err);
            }
        };

        if let Some((worker, _)) = select_snapshot(result) {
            info!(
                "Reconciling pod {} ({}) from worker {}: {} routable, {} unroutable",
                pod.name,
                pod.id,
                worker,
                result.succeeded.len(),
                result.failed.len()
            );
        }

        let updated = self.store.apply_update(&pod.id, &update).await?;
        Ok(updated)
    }
}
