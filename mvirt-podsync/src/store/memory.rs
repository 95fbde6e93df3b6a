//! In-memory pod store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};

use crate::pod::{CreatePodRequest, PodRecord, PodUpdate};

use super::error::{Result, StoreError};
use super::event::PodEvent;
use super::traits::PodStore;

/// Pod store kept in process memory. Used with `--dev` and in tests.
pub struct MemoryPodStore {
    pods: RwLock<HashMap<String, PodRecord>>,
    events: broadcast::Sender<PodEvent>,
}

impl MemoryPodStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            pods: RwLock::new(HashMap::new()),
            events,
        }
    }
}

impl Default for MemoryPodStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PodStore for MemoryPodStore {
    async fn list_pods(&self) -> Result<Vec<PodRecord>> {
        let pods = self.pods.read().await;
        let mut list: Vec<PodRecord> = pods.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn get_pod(&self, id: &str) -> Result<Option<PodRecord>> {
        Ok(self.pods.read().await.get(id).cloned())
    }

    async fn get_pod_by_name(&self, name: &str) -> Result<Option<PodRecord>> {
        let pods = self.pods.read().await;
        Ok(pods.values().find(|p| p.name == name).cloned())
    }

    async fn create_pod(&self, req: CreatePodRequest) -> Result<PodRecord> {
        let mut pods = self.pods.write().await;
        if pods.values().any(|p| p.name == req.name) {
            return Err(StoreError::Conflict(format!(
                "pod '{}' already exists",
                req.name
            )));
        }

        let pod = PodRecord::new(
            uuid::Uuid::new_v4().to_string(),
            req,
            Utc::now().to_rfc3339(),
        );
        pods.insert(pod.id.clone(), pod.clone());
        let _ = self.events.send(PodEvent::Created(pod.clone()));
        Ok(pod)
    }

    async fn apply_update(&self, id: &str, update: &PodUpdate) -> Result<PodRecord> {
        let mut pods = self.pods.write().await;
        let current = pods
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("pod {id}")))?;

        let mut updated = current.clone();
        if !updated.apply(update, Utc::now().to_rfc3339()) {
            return Ok(updated);
        }

        let old = pods.insert(id.to_string(), updated.clone());
        if let Some(old) = old {
            let _ = self.events.send(PodEvent::Synced {
                old,
                new: updated.clone(),
            });
        }
        Ok(updated)
    }

    async fn delete_pod(&self, id: &str) -> Result<()> {
        let mut pods = self.pods.write().await;
        if pods.remove(id).is_none() {
            return Err(StoreError::NotFound(format!("pod {id}")));
        }
        let _ = self.events.send(PodEvent::Deleted { id: id.to_string() });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PodEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::DiscoveredPod;
    use crate::worker::WorkerId;
    use std::collections::BTreeMap;

    fn create_req(name: &str) -> CreatePodRequest {
        CreatePodRequest {
            name: name.to_string(),
            pod_type: "virsh".to_string(),
            zone: "default".to_string(),
            pool: "default".to_string(),
            power_parameters: BTreeMap::new(),
        }
    }

    fn update(cores: u32, routes: &[(&str, bool)]) -> PodUpdate {
        PodUpdate {
            discovered: DiscoveredPod {
                cores,
                memory: 2048,
                ..Default::default()
            },
            routable: routes
                .iter()
                .map(|(id, r)| (WorkerId::from(*id), *r))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryPodStore::new();
        let pod = store.create_pod(create_req("kvm-01")).await.unwrap();

        assert_eq!(store.get_pod(&pod.id).await.unwrap(), Some(pod.clone()));
        assert_eq!(store.get_pod_by_name("kvm-01").await.unwrap(), Some(pod));
        assert_eq!(store.list_pods().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_name() {
        let store = MemoryPodStore::new();
        store.create_pod(create_req("kvm-01")).await.unwrap();
        let err = store.create_pod(create_req("kvm-01")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_apply_update_emits_event() {
        let store = MemoryPodStore::new();
        let pod = store.create_pod(create_req("kvm-01")).await.unwrap();
        let mut events = store.subscribe();

        let updated = store
            .apply_update(&pod.id, &update(4, &[("rack-a", true)]))
            .await
            .unwrap();
        assert_eq!(updated.cores, 4);
        assert_eq!(updated.version, pod.version + 1);

        match events.recv().await.unwrap() {
            PodEvent::Synced { old, new } => {
                assert_eq!(old.cores, 0);
                assert_eq!(new.cores, 4);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_apply_same_update_writes_nothing() {
        let store = MemoryPodStore::new();
        let pod = store.create_pod(create_req("kvm-01")).await.unwrap();
        let u = update(4, &[("rack-a", true), ("rack-b", false)]);

        let first = store.apply_update(&pod.id, &u).await.unwrap();
        let second = store.apply_update(&pod.id, &u).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_apply_update_missing_pod() {
        let store = MemoryPodStore::new();
        let err = store
            .apply_update("nope", &update(1, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryPodStore::new();
        let pod = store.create_pod(create_req("kvm-01")).await.unwrap();
        store.delete_pod(&pod.id).await.unwrap();
        assert!(store.get_pod(&pod.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_pod(&pod.id).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
