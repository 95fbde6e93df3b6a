//! PodStore trait definition.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::pod::{CreatePodRequest, PodRecord, PodUpdate};

use super::error::Result;
use super::event::PodEvent;

/// Store trait for pod records and their worker routes.
#[async_trait]
pub trait PodStore: Send + Sync {
    /// List all pods.
    async fn list_pods(&self) -> Result<Vec<PodRecord>>;

    /// Get a pod by ID.
    async fn get_pod(&self, id: &str) -> Result<Option<PodRecord>>;

    /// Get a pod by name.
    async fn get_pod_by_name(&self, name: &str) -> Result<Option<PodRecord>>;

    /// Create a new pod. Names are unique.
    async fn create_pod(&self, req: CreatePodRequest) -> Result<PodRecord>;

    /// Apply a reconciliation to a pod.
    ///
    /// The discovered fields and the full set of worker routes are replaced
    /// in one atomic step: on error nothing is written. An update that would
    /// not change the pod writes nothing and returns the pod as stored.
    /// Fails with `NotFound` when the pod no longer exists.
    async fn apply_update(&self, id: &str, update: &PodUpdate) -> Result<PodRecord>;

    /// Delete a pod together with its worker routes.
    async fn delete_pod(&self, id: &str) -> Result<()>;

    /// Subscribe to pod change events.
    fn subscribe(&self) -> broadcast::Receiver<PodEvent>;
}
