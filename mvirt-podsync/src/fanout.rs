//! Concurrent, deadline-bounded dispatch of one call to many workers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregate::{AggregatedResult, Outcome};
use crate::worker::{RpcCall, WorkerError, WorkerHandle, WorkerId};

/// Call `call` on every worker at once and collect the outcomes.
///
/// Each call gets `timeout` from the moment it is dispatched. A call still
/// running at its deadline is dropped, its cancellation token is fired and the
/// worker is recorded as failed with [`WorkerError::Cancelled`]; whatever the
/// call would have returned later is ignored. Worker errors never escape this
/// function, they land in the failed map. Handles sharing an id are called
/// once.
pub async fn fan_out(
    workers: &[Arc<dyn WorkerHandle>],
    call: RpcCall,
    timeout: Duration,
) -> AggregatedResult<Value> {
    if workers.is_empty() {
        debug!("No workers to call for {}", call.method);
        return AggregatedResult::default();
    }

    let call = Arc::new(call);
    let mut tasks = JoinSet::new();
    let mut pending = HashMap::with_capacity(workers.len());
    let mut seen = HashSet::with_capacity(workers.len());

    for worker in workers {
        let id = worker.id().clone();
        if !seen.insert(id.clone()) {
            warn!("Worker {} passed more than once, calling it once", id);
            continue;
        }

        let worker = Arc::clone(worker);
        let call = Arc::clone(&call);
        let deadline = Instant::now() + timeout;
        let handle = tasks.spawn(async move {
            call_with_deadline(worker.as_ref(), &call, deadline, timeout).await
        });
        pending.insert(handle.id(), id);
    }

    debug!("Dispatched {} to {} workers", call.method, pending.len());

    let mut outcomes: Vec<(WorkerId, Outcome<Value>)> = Vec::with_capacity(pending.len());
    while let Some(joined) = tasks.join_next_with_id().await {
        let (task_id, outcome) = match joined {
            Ok((task_id, outcome)) => (task_id, outcome),
            Err(err) => {
                let task_id = err.id();
                (task_id, Outcome::Failure(WorkerError::Aborted(err.to_string())))
            }
        };
        if let Some(id) = pending.remove(&task_id) {
            if let Outcome::Failure(ref err) = outcome {
                debug!("Worker {} failed {}: {}", id, call.method, err);
            }
            outcomes.push((id, outcome));
        }
    }

    AggregatedResult::from_outcomes(outcomes)
}

/// Run one call, giving up at `deadline`.
///
/// The deadline is fixed at dispatch, so time spent waiting for the task to
/// be scheduled counts against `timeout`.
async fn call_with_deadline(
    worker: &dyn WorkerHandle,
    call: &RpcCall,
    deadline: Instant,
    timeout: Duration,
) -> Outcome<Value> {
    let cancel = CancellationToken::new();
    match tokio::time::timeout_at(deadline, worker.call(call, cancel.clone())).await {
        Ok(Ok(reply)) => Outcome::Success(reply),
        Ok(Err(err)) => Outcome::Failure(err),
        Err(_) => {
            cancel.cancel();
            warn!(
                "Worker {} did not answer {} within {:?}, cancelled",
                worker.id(),
                call.method,
                timeout
            );
            Outcome::Failure(WorkerError::Cancelled { after: timeout })
        }
    }
}
