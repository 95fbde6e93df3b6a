//! mvirt-podsync: discovery and sync of VM hosts through rack workers.
//!
//! Any connected rack worker may be able to reach a pod, so discovery asks
//! all of them at once ([`fanout`]), splits the answers into successes and
//! failures ([`aggregate`]), and writes one authoritative snapshot plus the
//! per-worker routability into the pod record ([`reconcile`]). [`sync`] ties
//! it together for async and blocking callers.

pub mod aggregate;
pub mod audit;
pub mod discovery;
pub mod error;
pub mod fanout;
pub mod http_worker;
pub mod pod;
pub mod reconcile;
pub mod store;
pub mod sync;
pub mod worker;

pub use aggregate::{AggregatedResult, Outcome};
pub use audit::SyncAuditLogger;
pub use discovery::{
    DEFAULT_DISCOVERY_TIMEOUT, DiscoveryRequest, TargetKind, discover, discover_chassis,
    discover_pod,
};
pub use error::SyncError;
pub use fanout::fan_out;
pub use http_worker::HttpWorker;
pub use pod::{
    CreatePodRequest, DiscoveredPod, DiscoveredPodHints, DiscoveredPodStoragePool, PodRecord,
    PodUpdate,
};
pub use reconcile::Reconciler;
pub use store::{MemoryPodStore, PodEvent, PodStore, SqlitePodStore, StoreError};
pub use sync::PodSyncer;
pub use worker::{RpcCall, WorkerError, WorkerHandle, WorkerId, WorkerRegistry};
