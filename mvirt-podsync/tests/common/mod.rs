//! Shared fixtures for the sync integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mvirt_podsync::{
    CreatePodRequest, DiscoveredPod, PodRecord, PodStore, RpcCall, WorkerError, WorkerHandle,
    WorkerId,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// What a fake worker does when called.
#[derive(Clone)]
pub enum Behaviour {
    /// Answer with a pod snapshot after a delay.
    Reply(Duration, DiscoveredPod),
    /// Fail with the given error after a delay.
    Fail(Duration, WorkerError),
    /// Never answer.
    Hang,
}

/// In-process rack worker answering `DiscoverPod` calls.
pub struct FakeWorker {
    id: WorkerId,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl FakeWorker {
    pub fn new(id: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            id: WorkerId::from(id),
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn replying(id: &str, delay: Duration, snapshot: DiscoveredPod) -> Arc<Self> {
        Self::new(id, Behaviour::Reply(delay, snapshot))
    }

    pub fn failing(id: &str, delay: Duration, err: WorkerError) -> Arc<Self> {
        Self::new(id, Behaviour::Fail(delay, err))
    }

    pub fn hanging(id: &str) -> Arc<Self> {
        Self::new(id, Behaviour::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerHandle for FakeWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    async fn call(&self, _call: &RpcCall, _cancel: CancellationToken) -> Result<Value, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Reply(delay, snapshot) => {
                tokio::time::sleep(*delay).await;
                Ok(json!({ "pod": snapshot }))
            }
            Behaviour::Fail(delay, err) => {
                tokio::time::sleep(*delay).await;
                Err(err.clone())
            }
            Behaviour::Hang => std::future::pending().await,
        }
    }
}

/// Upcast fake workers into the handle list taken by discovery.
pub fn handles(workers: &[Arc<FakeWorker>]) -> Vec<Arc<dyn WorkerHandle>> {
    workers
        .iter()
        .map(|w| Arc::clone(w) as Arc<dyn WorkerHandle>)
        .collect()
}

pub fn snapshot(cores: u32, memory: u64) -> DiscoveredPod {
    DiscoveredPod {
        architectures: vec!["amd64/generic".into()],
        cores,
        cpu_speed: 2400,
        memory,
        local_storage: 100 * 1024 * 1024 * 1024,
        ..Default::default()
    }
}

pub fn pod_request(name: &str) -> CreatePodRequest {
    let mut power_parameters = BTreeMap::new();
    power_parameters.insert(
        "power_address".to_string(),
        "qemu+ssh://ubuntu@10.0.0.1/system".to_string(),
    );
    CreatePodRequest {
        name: name.to_string(),
        pod_type: "virsh".to_string(),
        zone: "default".to_string(),
        pool: "default".to_string(),
        power_parameters,
    }
}

pub async fn create_pod(store: &dyn PodStore, name: &str) -> PodRecord {
    store.create_pod(pod_request(name)).await.unwrap()
}

pub fn worker(id: &str) -> WorkerId {
    WorkerId::from(id)
}

/// Fresh directory for a file-backed store. Callers remove it when done.
pub fn temp_data_dir() -> PathBuf {
    std::env::temp_dir().join(format!("podsync-test-{}", uuid::Uuid::new_v4()))
}
