//! Pod (VM host) records and discovery snapshots.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::worker::WorkerId;

/// Capacity that can safely be handed out to machines composed on a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPodHints {
    pub cores: u32,
    /// CPU speed in MHz.
    pub cpu_speed: u32,
    /// Memory in MiB.
    pub memory: u64,
    /// Local storage in bytes.
    pub local_storage: u64,
}

/// A storage pool reported by a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPodStoragePool {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub pool_type: String,
    pub path: String,
    /// Total capacity in bytes.
    pub storage: u64,
}

/// One worker's view of a pod or chassis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPod {
    #[serde(default)]
    pub architectures: Vec<String>,
    pub cores: u32,
    pub cpu_speed: u32,
    pub memory: u64,
    pub local_storage: u64,
    #[serde(default)]
    pub hints: DiscoveredPodHints,
    #[serde(default)]
    pub storage_pools: Vec<DiscoveredPodStoragePool>,
}

/// Everything a reconciliation writes to a pod record.
///
/// `routable` holds one entry per worker that took part in the discovery:
/// `true` for workers that answered, `false` for workers that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodUpdate {
    pub discovered: DiscoveredPod,
    pub routable: BTreeMap<WorkerId, bool>,
}

/// Persisted pod record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRecord {
    pub id: String,
    pub name: String,
    /// Power driver type, e.g. `virsh` or `lxd`.
    pub pod_type: String,
    pub zone: String,
    pub pool: String,
    pub power_parameters: BTreeMap<String, String>,
    pub ip_address: Option<IpAddr>,
    pub architectures: Vec<String>,
    pub cores: u32,
    pub cpu_speed: u32,
    pub memory: u64,
    pub local_storage: u64,
    pub hints: DiscoveredPodHints,
    pub storage_pools: Vec<DiscoveredPodStoragePool>,
    /// Routability per worker, replaced on every reconciliation.
    pub routable: BTreeMap<WorkerId, bool>,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

/// Request to create a pod record from user configuration.
#[derive(Debug, Clone)]
pub struct CreatePodRequest {
    pub name: String,
    pub pod_type: String,
    pub zone: String,
    pub pool: String,
    pub power_parameters: BTreeMap<String, String>,
}

impl PodRecord {
    /// Build a fresh, never-discovered record.
    pub fn new(id: String, req: CreatePodRequest, timestamp: String) -> Self {
        let ip_address = req
            .power_parameters
            .get("power_address")
            .and_then(|addr| ip_from_power_address(addr));

        Self {
            id,
            name: req.name,
            pod_type: req.pod_type,
            zone: req.zone,
            pool: req.pool,
            power_parameters: req.power_parameters,
            ip_address,
            architectures: Vec::new(),
            cores: 0,
            cpu_speed: 0,
            memory: 0,
            local_storage: 0,
            hints: DiscoveredPodHints::default(),
            storage_pools: Vec::new(),
            routable: BTreeMap::new(),
            version: 1,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        }
    }

    /// The discovery-owned part of the record, as a snapshot.
    pub fn discovered(&self) -> DiscoveredPod {
        DiscoveredPod {
            architectures: self.architectures.clone(),
            cores: self.cores,
            cpu_speed: self.cpu_speed,
            memory: self.memory,
            local_storage: self.local_storage,
            hints: self.hints.clone(),
            storage_pools: self.storage_pools.clone(),
        }
    }

    /// Apply a reconciliation update in place.
    ///
    /// Fields are replaced wholesale. Returns `false` and leaves the record
    /// untouched (version and timestamp included) when the update would not
    /// change anything.
    pub fn apply(&mut self, update: &PodUpdate, timestamp: String) -> bool {
        if self.discovered() == update.discovered && self.routable == update.routable {
            return false;
        }

        let d = &update.discovered;
        self.architectures = d.architectures.clone();
        self.cores = d.cores;
        self.cpu_speed = d.cpu_speed;
        self.memory = d.memory;
        self.local_storage = d.local_storage;
        self.hints = d.hints.clone();
        self.storage_pools = d.storage_pools.clone();
        self.routable = update.routable.clone();
        self.version += 1;
        self.updated_at = timestamp;
        true
    }

    pub fn routable_workers(&self) -> Vec<&WorkerId> {
        self.routable
            .iter()
            .filter(|(_, routable)| **routable)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn unroutable_workers(&self) -> Vec<&WorkerId> {
        self.routable
            .iter()
            .filter(|(_, routable)| !**routable)
            .map(|(id, _)| id)
            .collect()
    }
}

/// Extract the host of a power address if it is an IP literal.
///
/// Accepts URL-like addresses (`qemu+ssh://user@10.0.0.1/system`,
/// `https://[fd00::1]:8443`) as well as bare hosts (`10.0.0.1`).
pub fn ip_from_power_address(address: &str) -> Option<IpAddr> {
    let rest = match address.split_once("://") {
        Some((_, rest)) => rest,
        None => address,
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = match authority.rsplit_once('@') {
        Some((_, host)) => host,
        None => authority,
    };

    if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, _) = bracketed.split_once(']')?;
        return host.parse().ok();
    }

    // Bare IPv6 without brackets has several colons; a port has one.
    if host_port.matches(':').count() > 1 {
        return host_port.parse().ok();
    }
    let host = host_port.split(':').next().unwrap_or_default();
    host.parse().ok()
}
