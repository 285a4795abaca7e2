use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use url::Url;

use toolgate_invoke::{BoundedInvoker, DispatchTarget, ForwardRequest, InvokeError, InvokeLimits};
use toolgate_sign::{sign, SignedEnvelope, Verifier, HEADER_SIGNATURE};
use toolgate_tools::{HandlerError, ToolHandler};

async fn spawn_downstream() -> (SocketAddr, oneshot::Sender<()>) {
    async fn slow() -> Json<Value> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Json(json!({"late": true}))
    }

    async fn big() -> (StatusCode, Vec<u8>) {
        (StatusCode::OK, vec![b'x'; 10 * 1024 * 1024])
    }

    async fn teapot() -> (StatusCode, Json<Value>) {
        (StatusCode::IM_A_TEAPOT, Json(json!({"error": "short and stout"})))
    }

    async fn text() -> &'static str {
        "plain words"
    }

    async fn headers(headers: HeaderMap, body: String) -> Json<Value> {
        let pick = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Json(json!({
            "request_id": pick("x-toolgate-request-id"),
            "timestamp": pick("x-toolgate-timestamp"),
            "digest": pick("x-toolgate-body-digest"),
            "signature": pick(HEADER_SIGNATURE),
            "body": body,
        }))
    }

    let app = Router::new()
        .route("/slow", post(slow))
        .route("/big", post(big))
        .route("/teapot", post(teapot))
        .route("/text", post(text))
        .route("/headers", post(headers));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await;
    });
    (addr, tx)
}

fn remote(addr: SocketAddr, path: &str) -> DispatchTarget {
    DispatchTarget::Remote {
        url: Url::parse(&format!("http://{addr}{path}")).unwrap(),
    }
}

fn request(target: &DispatchTarget, secret: Option<&[u8]>) -> ForwardRequest {
    let args = json!({"k": "v"});
    let body = serde_json::to_vec(&args).unwrap();
    let envelope = sign("POST", &target.signing_path(), 1_700_000_000, secret, &body).unwrap();
    ForwardRequest {
        method: "POST".into(),
        args,
        body,
        envelope,
    }
}

fn limits(timeout_ms: u64, max: usize) -> InvokeLimits {
    InvokeLimits {
        timeout: Duration::from_millis(timeout_ms),
        max_response_bytes: max,
    }
}

#[tokio::test]
async fn slow_downstream_times_out() {
    let (addr, shutdown) = spawn_downstream().await;
    let target = remote(addr, "/slow");
    let err = BoundedInvoker::new()
        .invoke(&target, &request(&target, None), limits(100, 64 * 1024))
        .await
        .unwrap_err();
    assert_eq!(err, InvokeError::Timeout { timeout_ms: 100 });
    assert_eq!(err.code(), "timeout");
    shutdown.send(()).ok();
}

#[tokio::test]
async fn oversized_response_is_rejected() {
    let (addr, shutdown) = spawn_downstream().await;
    let target = remote(addr, "/big");
    let err = BoundedInvoker::new()
        .invoke(&target, &request(&target, None), limits(5_000, 64 * 1024))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "response_too_large");
    shutdown.send(()).ok();
}

#[tokio::test]
async fn downstream_status_is_passed_through() {
    let (addr, shutdown) = spawn_downstream().await;
    let target = remote(addr, "/teapot");
    let resp = BoundedInvoker::new()
        .invoke(&target, &request(&target, None), InvokeLimits::default())
        .await
        .unwrap();
    assert_eq!(resp.status, 418);
    assert!(!resp.is_success());
    assert_eq!(resp.body["error"], "short and stout");
    assert!(resp.headers["content-type"].starts_with("application/json"));

    let target = remote(addr, "/text");
    let resp = BoundedInvoker::new()
        .invoke(&target, &request(&target, None), InvokeLimits::default())
        .await
        .unwrap();
    assert_eq!(resp.body, Value::String("plain words".into()));
    shutdown.send(()).ok();
}

#[tokio::test]
async fn signed_envelope_reaches_downstream_and_verifies() {
    let (addr, shutdown) = spawn_downstream().await;
    let target = remote(addr, "/headers");
    let req = request(&target, Some(b"s3cret"));
    let resp = BoundedInvoker::new()
        .invoke(&target, &req, InvokeLimits::default())
        .await
        .unwrap();

    let seen = &resp.body;
    assert_eq!(seen["request_id"], req.envelope.request_id.as_str());
    let envelope = SignedEnvelope {
        method: "POST".into(),
        path: "/headers".into(),
        timestamp: seen["timestamp"].as_str().unwrap().parse().unwrap(),
        body_digest: seen["digest"].as_str().unwrap().to_string(),
        signature: seen["signature"].as_str().map(str::to_string),
        request_id: seen["request_id"].as_str().unwrap().to_string(),
    };
    let body = seen["body"].as_str().unwrap().as_bytes();
    Verifier::new(b"s3cret".to_vec())
        .verify(&envelope, body, 1_700_000_010)
        .unwrap();
    shutdown.send(()).ok();
}

#[tokio::test]
async fn unsigned_forward_carries_only_request_id() {
    let (addr, shutdown) = spawn_downstream().await;
    let target = remote(addr, "/headers");
    let resp = BoundedInvoker::new()
        .invoke(&target, &request(&target, None), InvokeLimits::default())
        .await
        .unwrap();
    assert!(resp.body["request_id"].is_string());
    assert!(resp.body["signature"].is_null());
    assert!(resp.body["timestamp"].is_null());
    shutdown.send(()).ok();
}

#[tokio::test]
async fn connection_failure_is_invoke_failed() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let target = remote(addr, "/gone");
    let err = BoundedInvoker::new()
        .invoke(&target, &request(&target, None), InvokeLimits::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invoke_failed");
}

struct Sleepy;

#[async_trait]
impl ToolHandler for Sleepy {
    async fn handle(&self, _args: Value, _envelope: &SignedEnvelope) -> Result<Value, HandlerError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!({}))
    }
}

struct Chatty;

#[async_trait]
impl ToolHandler for Chatty {
    async fn handle(&self, _args: Value, _envelope: &SignedEnvelope) -> Result<Value, HandlerError> {
        Ok(json!({"blob": "y".repeat(2048)}))
    }
}

#[tokio::test]
async fn in_process_targets_share_the_same_bounds() {
    let sleepy = DispatchTarget::InProcess {
        binding: "sleepy".into(),
        handler: Arc::new(Sleepy),
    };
    let err = BoundedInvoker::new()
        .invoke(&sleepy, &request(&sleepy, None), limits(50, 1024))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "timeout");

    let chatty = DispatchTarget::InProcess {
        binding: "chatty".into(),
        handler: Arc::new(Chatty),
    };
    let err = BoundedInvoker::new()
        .invoke(&chatty, &request(&chatty, None), limits(1_000, 1024))
        .await
        .unwrap_err();
    assert_eq!(err, InvokeError::ResponseTooLarge { limit: 1024 });
}
