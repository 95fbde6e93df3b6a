//! Rack worker handles.
//!
//! A worker is a rack-level controller that can run discovery against the
//! chassis and VM hosts it can reach. The engine only sees workers through
//! [`WorkerHandle`]; concrete transports (see [`crate::http_worker`]) and
//! connection management live outside of it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Identifier of a rack worker. Stable across calls.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A named remote procedure call with JSON arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub method: String,
    pub args: Value,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, args: Value) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

/// Why a single worker failed to answer a call.
///
/// These never abort a fan-out; they end up in the failed map of an
/// [`AggregatedResult`](crate::aggregate::AggregatedResult).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum WorkerError {
    /// The call did not finish before the deadline and was cancelled.
    #[error("call cancelled after {after:?} without a reply")]
    Cancelled { after: Duration },

    /// The worker ran the call and reported a failure.
    #[error("{message}")]
    Remote { kind: String, message: String },

    /// The call never reached the worker, or the reply never came back.
    #[error("transport error: {0}")]
    Transport(String),

    /// The worker replied with something that could not be understood.
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    /// The task running the call died before producing an outcome.
    #[error("call aborted: {0}")]
    Aborted(String),
}

impl WorkerError {
    /// Build a remote failure with a domain-specific kind, e.g. `UnknownPodType`.
    pub fn remote(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A connection to one rack worker.
///
/// `call` is cancelled either by dropping the returned future or through
/// `cancel`; transports that hand work off to detached tasks should watch the
/// token so they stop once the caller has given up.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    fn id(&self) -> &WorkerId;

    async fn call(&self, call: &RpcCall, cancel: CancellationToken) -> Result<Value, WorkerError>;
}

/// Connected workers, keyed by id.
///
/// The engine never reads this directly: callers take a [`snapshot`](Self::snapshot)
/// and pass it into discovery.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, Arc<dyn WorkerHandle>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, replacing any previous handle with the same id.
    pub async fn register(&self, worker: Arc<dyn WorkerHandle>) {
        let id = worker.id().clone();
        let mut workers = self.workers.write().await;
        if workers.insert(id.clone(), worker).is_some() {
            warn!("Worker {} re-registered, replacing previous handle", id);
        } else {
            info!("Worker {} registered", id);
        }
    }

    /// Remove a worker. Returns whether it was registered.
    pub async fn deregister(&self, id: &WorkerId) -> bool {
        let removed = self.workers.write().await.remove(id).is_some();
        if removed {
            info!("Worker {} deregistered", id);
        }
        removed
    }

    /// All currently registered workers, ordered by id.
    pub async fn snapshot(&self) -> Vec<Arc<dyn WorkerHandle>> {
        let workers = self.workers.read().await;
        let mut handles: Vec<_> = workers.values().cloned().collect();
        handles.sort_by(|a, b| a.id().cmp(b.id()));
        handles
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }
}
