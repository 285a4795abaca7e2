use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::routing::post as post_route;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;

use toolgate_auth::CredentialGate;
use toolgate_core::{Gateway, GatewaySettings, RegistrySeed};
use toolgate_http::{router, AppState};
use toolgate_store::EpisodeQuery;
use toolgate_types::{DecisionKind, DispatchMode, EpisodeType, Route};

const SEED: &str = r#"
policies:
  default:
    policy_id: default
    policy_version: "3"
    tool_allowlist: [builtin.echo]
routes:
  - domain: builtin
    action: echo
    mode: in_process
    target_ref: builtin.echo
"#;

async fn app_with(max_request_bytes: usize) -> (Router, Arc<Gateway>) {
    let gateway = Arc::new(Gateway::in_memory(GatewaySettings::default()));
    RegistrySeed::from_yaml(SEED)
        .unwrap()
        .apply(&gateway.registry)
        .await
        .unwrap();
    let gate = CredentialGate::new(Some("user-token".into()), Some("admin-token".into()));
    let state = AppState::new(gateway.clone(), gate, max_request_bytes);
    (router(state), gateway)
}

async fn app() -> (Router, Arc<Gateway>) {
    app_with(toolgate_http::DEFAULT_MAX_REQUEST_BYTES).await
}

fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn episodes(gateway: &Gateway, ty: EpisodeType) -> Vec<toolgate_types::Episode> {
    gateway
        .search_episodes(&EpisodeQuery {
            episode_type: Some(ty),
            ..Default::default()
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn health_needs_no_credential() {
    let (app, _) = app().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert!(body["engine_ref"].as_str().unwrap().starts_with("toolgate@"));
}

#[tokio::test]
async fn missing_and_wrong_credentials_look_the_same() {
    let (app, gateway) = app().await;
    let args = json!({"tool_id": "builtin.echo", "args": {}});
    let (missing_status, missing) = send(&app, post("/tool/run", None, args.clone())).await;
    let (wrong_status, wrong) = send(&app, post("/tool/run", Some("guess"), args)).await;

    assert_eq!(missing_status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing, wrong);
    assert_eq!(wrong_status, missing_status);
    assert_eq!(missing["ok"], false);
    assert_eq!(missing["error"]["code"], "unauthorized");
    assert_eq!(episodes(&gateway, EpisodeType::RequestRejected).await.len(), 2);
}

#[tokio::test]
async fn unlisted_tool_is_denied_with_evidence() {
    let (app, gateway) = app().await;
    let body = json!({"tool_id": "shell.exec", "args": {"cmd": "rm -rf /"}, "ctx": {"run_id": "r1"}});
    let (status, out) = send(&app, post("/tool/run", Some("user-token"), body)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(out["ok"], false);
    assert_eq!(out["policy_check"]["decision"], "deny");
    assert_eq!(out["policy_check"]["reason"], "default_deny");
    assert_eq!(out["error"]["code"], "policy_denied");
    assert!(out.get("tool_result").is_none());

    let denies = episodes(&gateway, EpisodeType::PolicyDeny).await;
    assert_eq!(denies.len(), 1);
    assert_eq!(denies[0].decision, DecisionKind::Deny);
    assert_eq!(denies[0].run_id.as_deref(), Some("r1"));
    assert!(episodes(&gateway, EpisodeType::ToolRun).await.is_empty());
}

#[tokio::test]
async fn allowed_tool_runs_and_artifacts_are_fetchable() {
    let (app, _) = app().await;
    let body = json!({"tool_id": "builtin.echo", "args": {"hello": "world"}});
    let (status, out) = send(&app, post("/tool/run", Some("user-token"), body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["ok"], true);
    assert_eq!(out["tool_result"]["status"], 200);
    assert_eq!(out["tool_result"]["body"]["echo"], json!({"hello": "world"}));

    let first = out["evidence_refs"][0].as_str().unwrap().to_string();
    let (status, echo) = send(&app, get(&format!("/artifact/get?ref={first}"), "user-token")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(echo["kind"], "request");

    let (status, err) = send(&app, get("/artifact/get?ref=../../etc/passwd", "user-token")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["code"], "invalid_artifact_ref");
}

#[tokio::test]
async fn oversize_and_malformed_bodies() {
    let (app, _) = app_with(64).await;
    let big = json!({"tool_id": "builtin.echo", "args": {"blob": "x".repeat(200)}});
    let (status, out) = send(&app, post("/tool/run", Some("user-token"), big)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(out["error"]["code"], "request_too_large");

    let request = Request::builder()
        .method("POST")
        .uri("/tool/run")
        .header(header::AUTHORIZATION, "Bearer user-token")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, out) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(out["error"]["code"], "invalid_json");

    // well-formed JSON of the wrong shape
    let (status, out) = send(&app, post("/tool/run", Some("user-token"), json!({"args": {}}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(out["error"]["code"], "invalid_json");
}

#[tokio::test]
async fn inline_schema_needs_admin() {
    let (app, gateway) = app().await;
    let body = json!({
        "variant": "v2",
        "schema_inline": {"type": "object", "required": ["id"]},
        "payload": {"id": 1}
    });

    let (status, out) = send(&app, post("/payload/validate", Some("user-token"), body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(out["ok"], true);
    assert_eq!(out["valid"], false);
    assert_eq!(out["errors"], json!(["V2 inline schema not allowed (deny-by-default)"]));
    assert_eq!(gateway.schemas.compile_count(), 0);

    let (status, out) = send(&app, post("/payload/validate", Some("admin-token"), body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["valid"], true);
    assert_eq!(out["cache_hit"], false);
    assert_eq!(gateway.schemas.compile_count(), 1);
}

#[tokio::test]
async fn schema_registry_over_http() {
    let (app, _) = app().await;
    let schema = json!({"type": "object", "properties": {"n": {"type": "integer"}}});
    let put = json!({"schema_id": "counter", "version": "1", "schema_json": schema});
    let (status, out) = send(&app, post("/schema/put", Some("user-token"), put)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["schema_ref"], "counter@1");

    let (status, fetched) = send(&app, get("/schema/get?schema_id=counter&version=1", "user-token")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, schema);

    // the short field name is still accepted
    let legacy = json!({"schema_id": "counter", "version": "2", "schema": {"type": "string"}});
    let (status, out) = send(&app, post("/schema/put", Some("user-token"), legacy)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["schema_ref"], "counter@2");

    let (status, out) = send(&app, get("/schema/get?schema_id=counter&version=9", "user-token")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(out["error"]["code"], "schema_not_found");

    let validate = json!({"variant": "v1", "schema_ref": "counter@1", "payload": {"n": "many"}});
    let (status, out) = send(&app, post("/payload/validate", Some("user-token"), validate)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["valid"], false);
    assert_eq!(out["cache_hit"], true);
    assert_eq!(out["errors"][0]["instance_location"], "/n");
    assert_eq!(out["errors"][0]["keyword"], "type");
}

#[tokio::test]
async fn episode_search_filters_and_limits() {
    let (app, _) = app().await;
    for _ in 0..3 {
        let body = json!({"tool_id": "builtin.echo", "args": {}});
        send(&app, post("/tool/run", Some("user-token"), body)).await;
    }
    send(&app, post("/tool/run", Some("user-token"), json!({"tool_id": "nope.x"}))).await;

    let query = json!({"type": "tool_run", "limit": 2, "order": "asc"});
    let (status, out) = send(&app, post("/episode/search", Some("user-token"), query)).await;
    assert_eq!(status, StatusCode::OK);
    let found = out["results"].as_array().unwrap();
    assert_eq!(found.len(), 2);
    assert!(found[0]["ts"].as_i64() <= found[1]["ts"].as_i64());
    assert!(found.iter().all(|ep| ep["type"] == "tool_run"));

    let query = json!({"decision": "deny"});
    let (_, out) = send(&app, post("/episode/search", Some("user-token"), query)).await;
    assert_eq!(out["results"].as_array().unwrap().len(), 1);
    assert!(out.get("episodes").is_none());
}

#[tokio::test]
async fn slow_downstream_maps_to_gateway_timeout() {
    let downstream = Router::new().route(
        "/slow",
        post_route(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Json(json!({"late": true}))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, downstream).await.unwrap();
    });

    let (app, gateway) = app().await;
    let seed = "policies:\n  default:\n    policy_id: default\n    policy_version: \"4\"\n    tool_allowlist: [slow.call]\n";
    RegistrySeed::from_yaml(seed).unwrap().apply(&gateway.registry).await.unwrap();
    gateway
        .registry
        .put_route(&Route {
            domain: "slow".into(),
            action: "call".into(),
            mode: DispatchMode::RemoteHttp,
            target_ref: Some(format!("http://{addr}")),
            path_template: Some("/slow".into()),
            timeout_ms: Some(100),
            max_response_bytes: None,
            signing_secret_ref: None,
        })
        .await
        .unwrap();

    let body = json!({"tool_id": "slow.call", "args": {}});
    let (status, out) = send(&app, post("/tool/run", Some("user-token"), body)).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(out["ok"], false);
    assert_eq!(out["error"]["code"], "timeout");
    let failures = episodes(&gateway, EpisodeType::ToolError).await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].reason, "timeout");
}
