//! JSON-over-HTTP transport for rack workers.
//!
//! A call is `POST {endpoint}/rpc` with body `{"method": ..., "args": ...}`.
//! A 2xx response body is the reply. Failures reported by the worker come back
//! as a non-2xx response with body `{"kind": ..., "message": ...}`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::worker::{RpcCall, WorkerError, WorkerHandle, WorkerId};

#[derive(Debug, Deserialize)]
struct RemoteFault {
    kind: String,
    message: String,
}

/// Worker reachable over HTTP.
pub struct HttpWorker {
    id: WorkerId,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpWorker {
    pub fn new(id: impl Into<WorkerId>, endpoint: impl Into<String>) -> Self {
        Self::with_client(id, endpoint, reqwest::Client::new())
    }

    /// Use a shared client, so many workers reuse one connection pool.
    pub fn with_client(
        id: impl Into<WorkerId>,
        endpoint: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn rpc_url(&self) -> String {
        format!("{}/rpc", self.endpoint.trim_end_matches('/'))
    }

    async fn send(&self, call: &RpcCall) -> Result<Value, WorkerError> {
        let response = self
            .client
            .post(self.rpc_url())
            .json(call)
            .send()
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| WorkerError::InvalidReply(e.to_string()));
        }

        let body = response.text().await.map_err(|e| {
            WorkerError::Transport(format!("HTTP {status}: failed to read error body: {e}"))
        })?;
        match serde_json::from_str::<RemoteFault>(&body) {
            Ok(fault) => Err(WorkerError::Remote {
                kind: fault.kind,
                message: fault.message,
            }),
            Err(_) => Err(WorkerError::Transport(format!("HTTP {status}: {body}"))),
        }
    }
}

#[async_trait]
impl WorkerHandle for HttpWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    async fn call(&self, call: &RpcCall, cancel: CancellationToken) -> Result<Value, WorkerError> {
        debug!("Calling {} on worker {} at {}", call.method, self.id, self.endpoint);
        tokio::select! {
            reply = self.send(call) => reply,
            _ = cancel.cancelled() => {
                Err(WorkerError::Transport("call cancelled by caller".to_string()))
            }
        }
    }
}
