//! HttpWorker tests against a mock rack worker served by axum.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use mvirt_podsync::{
    DiscoveryRequest, HttpWorker, RpcCall, TargetKind, WorkerError, WorkerHandle, WorkerId,
    discover,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct MockRack {
    endpoint: String,
    handle: JoinHandle<()>,
}

impl MockRack {
    async fn spawn(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            endpoint: format!("http://{addr}"),
            handle,
        }
    }

    fn worker(&self, id: &str) -> Arc<dyn WorkerHandle> {
        Arc::new(HttpWorker::new(id, self.endpoint.clone()))
    }

    fn shutdown(self) {
        self.handle.abort();
    }
}

async fn discover_reply(Json(call): Json<Value>) -> (StatusCode, Json<Value>) {
    match call["method"].as_str() {
        Some("DiscoverPod") if call["args"]["type"] == "virsh" => (
            StatusCode::OK,
            Json(json!({
                "pod": {
                    "architectures": ["amd64/generic"],
                    "cores": 2,
                    "cpu_speed": 2400,
                    "memory": 2048,
                    "local_storage": 107374182400u64
                }
            })),
        ),
        Some("DiscoverPod") => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "kind": "UnknownPodType",
                "message": format!("Unknown pod type: {}", call["args"]["type"].as_str().unwrap_or(""))
            })),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "kind": "NoSuchMethod", "message": "unknown method" })),
        ),
    }
}

fn request(pod_type: &str) -> DiscoveryRequest {
    DiscoveryRequest::new(
        pod_type,
        [(
            "power_address".to_string(),
            "qemu+ssh://ubuntu@10.0.0.1/system".to_string(),
        )]
        .into_iter()
        .collect(),
    )
}

#[tokio::test]
async fn test_discover_over_http() {
    let rack = MockRack::spawn(Router::new().route("/rpc", post(discover_reply))).await;

    let result = discover(
        TargetKind::Pod,
        &request("virsh"),
        &[rack.worker("rack-a")],
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let pod = &result.succeeded[&WorkerId::from("rack-a")];
    assert_eq!(pod.cores, 2);
    assert_eq!(pod.memory, 2048);
    assert_eq!(pod.architectures, vec!["amd64/generic".to_string()]);
    assert!(result.failed.is_empty());

    rack.shutdown();
}

#[tokio::test]
async fn test_remote_fault_keeps_kind_and_message() {
    let rack = MockRack::spawn(Router::new().route("/rpc", post(discover_reply))).await;

    let result = discover(
        TargetKind::Pod,
        &request("lxd"),
        &[rack.worker("rack-a")],
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(
        result.failed[&WorkerId::from("rack-a")],
        WorkerError::remote("UnknownPodType", "Unknown pod type: lxd")
    );

    rack.shutdown();
}

#[tokio::test]
async fn test_unexpected_replies_are_failures() {
    let rack = MockRack::spawn(Router::new().route("/rpc", post(discover_reply))).await;

    // The mock only answers pods, so a chassis discovery hits the fallback.
    let worker = rack.worker("rack-a");
    let call = RpcCall::new("DiscoverChassis", json!({}));
    let err = worker
        .call(&call, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, WorkerError::remote("NoSuchMethod", "unknown method"));

    let ok_without_pod = MockRack::spawn(Router::new().route(
        "/rpc",
        post(|| async { Json(json!({ "chassis": {} })) }),
    ))
    .await;
    let result = discover(
        TargetKind::Pod,
        &request("virsh"),
        &[ok_without_pod.worker("rack-b")],
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert!(matches!(
        result.failed[&WorkerId::from("rack-b")],
        WorkerError::InvalidReply(_)
    ));

    rack.shutdown();
    ok_without_pod.shutdown();
}

#[tokio::test]
async fn test_non_json_error_is_transport_error() {
    let rack = MockRack::spawn(Router::new().route(
        "/rpc",
        post(|| async { (StatusCode::BAD_GATEWAY, "upstream unavailable") }),
    ))
    .await;

    let err = rack
        .worker("rack-a")
        .call(&RpcCall::new("DiscoverPod", json!({})), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        WorkerError::Transport(msg) => assert!(msg.contains("502")),
        other => panic!("expected Transport, got {other:?}"),
    }

    rack.shutdown();
}

#[tokio::test]
async fn test_truncated_error_body_is_transport_error() {
    // Promises a 100 byte body, sends a few bytes and hangs up.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        while !request.ends_with(b"}") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket
            .write_all(
                b"HTTP/1.1 500 Internal Server Error\r\n\
                  Content-Type: application/json\r\n\
                  Content-Length: 100\r\n\r\n{\"kind\"",
            )
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let worker = HttpWorker::new("rack-a", format!("http://{addr}"));
    let err = worker
        .call(&RpcCall::new("DiscoverPod", json!({})), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        WorkerError::Transport(msg) => {
            assert!(msg.contains("500"), "{msg}");
            assert!(msg.contains("failed to read error body"), "{msg}");
        }
        other => panic!("expected Transport, got {other:?}"),
    }

    server.await.unwrap();
}

#[tokio::test]
async fn test_slow_worker_cancelled_by_deadline() {
    let slow = MockRack::spawn(Router::new().route(
        "/rpc",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Json(json!({ "pod": {} }))
        }),
    ))
    .await;
    let fast = MockRack::spawn(Router::new().route("/rpc", post(discover_reply))).await;

    let start = std::time::Instant::now();
    let result = discover(
        TargetKind::Pod,
        &request("virsh"),
        &[fast.worker("rack-a"), slow.worker("rack-b")],
        Duration::from_millis(300),
    )
    .await
    .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(result.succeeded.contains_key(&WorkerId::from("rack-a")));
    assert!(result.failed[&WorkerId::from("rack-b")].is_cancelled());

    slow.shutdown();
    fast.shutdown();
}
