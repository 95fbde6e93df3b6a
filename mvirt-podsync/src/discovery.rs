//! Discovery of pods and chassis through every connected worker.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::aggregate::AggregatedResult;
use crate::error::SyncError;
use crate::fanout::fan_out;
use crate::pod::{DiscoveredPod, PodRecord};
use crate::worker::{RpcCall, WorkerError, WorkerHandle};

/// How long a worker gets to answer a discovery call.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Kind of target being discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A virtualization host.
    Pod,
    /// A power chassis.
    Chassis,
}

impl TargetKind {
    /// Remote procedure implementing discovery for this kind.
    pub fn method(self) -> &'static str {
        match self {
            TargetKind::Pod => "DiscoverPod",
            TargetKind::Chassis => "DiscoverChassis",
        }
    }

    /// Key of the snapshot in the worker's reply.
    pub fn reply_key(self) -> &'static str {
        match self {
            TargetKind::Pod => "pod",
            TargetKind::Chassis => "chassis",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Pod => f.write_str("pod"),
            TargetKind::Chassis => f.write_str("chassis"),
        }
    }
}

/// Arguments of a discovery call.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryRequest {
    /// Driver type, e.g. `virsh`.
    #[serde(rename = "type")]
    pub target_type: String,
    /// Driver parameters needed to reach the target.
    pub context: BTreeMap<String, String>,
    /// Id of the existing record, `None` for a new target.
    pub pod_id: Option<String>,
    /// Name of the existing record, `None` for a new target.
    pub name: Option<String>,
}

impl DiscoveryRequest {
    pub fn new(target_type: impl Into<String>, context: BTreeMap<String, String>) -> Self {
        Self {
            target_type: target_type.into(),
            context,
            pod_id: None,
            name: None,
        }
    }

    /// Request re-discovery of an existing pod.
    pub fn for_pod(pod: &PodRecord) -> Self {
        Self {
            target_type: pod.pod_type.clone(),
            context: pod.power_parameters.clone(),
            pod_id: Some(pod.id.clone()),
            name: Some(pod.name.clone()),
        }
    }

    fn to_call(&self, kind: TargetKind) -> Result<RpcCall, SyncError> {
        let args = serde_json::to_value(self)
            .map_err(|e| SyncError::InvalidTarget(format!("cannot encode request: {e}")))?;
        Ok(RpcCall::new(kind.method(), args))
    }
}

/// Ask every worker to discover a target.
///
/// Has no persistence side effects. Fails only when the request itself is
/// unusable; worker failures are reported in the result.
pub async fn discover(
    kind: TargetKind,
    request: &DiscoveryRequest,
    workers: &[Arc<dyn WorkerHandle>],
    timeout: Duration,
) -> Result<AggregatedResult<DiscoveredPod>, SyncError> {
    if request.target_type.trim().is_empty() {
        return Err(SyncError::InvalidTarget(format!("{kind} type is empty")));
    }

    let call = request.to_call(kind)?;
    let result = fan_out(workers, call, timeout)
        .await
        .try_map(|reply| decode_snapshot(kind, reply));

    info!(
        "Discovered {} '{}' via {} of {} workers",
        kind,
        request.target_type,
        result.succeeded.len(),
        result.len()
    );

    Ok(result)
}

/// Discover a virtualization host.
pub async fn discover_pod(
    request: &DiscoveryRequest,
    workers: &[Arc<dyn WorkerHandle>],
    timeout: Duration,
) -> Result<AggregatedResult<DiscoveredPod>, SyncError> {
    discover(TargetKind::Pod, request, workers, timeout).await
}

/// Discover a power chassis.
pub async fn discover_chassis(
    request: &DiscoveryRequest,
    workers: &[Arc<dyn WorkerHandle>],
    timeout: Duration,
) -> Result<AggregatedResult<DiscoveredPod>, SyncError> {
    discover(TargetKind::Chassis, request, workers, timeout).await
}

fn decode_snapshot(kind: TargetKind, mut reply: Value) -> Result<DiscoveredPod, WorkerError> {
    let payload = reply
        .get_mut(kind.reply_key())
        .map(Value::take)
        .ok_or_else(|| WorkerError::InvalidReply(format!("reply has no '{}'", kind.reply_key())))?;
    serde_json::from_value(payload).map_err(|e| WorkerError::InvalidReply(e.to_string()))
}
