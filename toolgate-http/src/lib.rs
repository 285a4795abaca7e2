use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;

use toolgate_auth::{CredentialClass, CredentialGate};
use toolgate_core::{
    ActionRunRequest, ErrorBody, Gateway, GatewayError, PayloadValidateRequest, SchemaPutRequest,
    ToolRunRequest,
};
use toolgate_store::EpisodeQuery;

pub mod config;
pub mod pipeline;

use pipeline::{Inbound, Pipeline};

pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    json_pipeline: Arc<Pipeline>,
    query_pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, gate: CredentialGate, max_request_bytes: usize) -> Self {
        let gate = Arc::new(gate);
        Self {
            gateway,
            json_pipeline: Arc::new(Pipeline::for_json(gate.clone(), max_request_bytes)),
            query_pipeline: Arc::new(Pipeline::for_query(gate)),
        }
    }

    /// Runs the JSON pipeline and decodes the typed request. Rejections are recorded.
    async fn admit_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        headers: HeaderMap,
        body: Body,
    ) -> Result<(CredentialClass, T), Response> {
        let admitted = self
            .json_pipeline
            .run(Inbound::new(endpoint, headers, Some(body)))
            .await;
        let decoded = admitted.and_then(|inbound| {
            let class = inbound.credential.unwrap_or(CredentialClass::Standard);
            serde_json::from_value(inbound.json)
                .map(|req| (class, req))
                .map_err(|e| GatewayError::InvalidJson(e.to_string()))
        });
        match decoded {
            Ok(ok) => Ok(ok),
            Err(err) => Err(self.reject(endpoint, err).await),
        }
    }

    async fn admit_query(&self, endpoint: &'static str, headers: HeaderMap) -> Result<(), Response> {
        match self.query_pipeline.run(Inbound::new(endpoint, headers, None)).await {
            Ok(_) => Ok(()),
            Err(err) => Err(self.reject(endpoint, err).await),
        }
    }

    async fn reject(&self, endpoint: &'static str, err: GatewayError) -> Response {
        tracing::info!(endpoint, code = err.code(), "request rejected");
        self.gateway.record_rejection(endpoint, &err).await;
        ApiError(err).into_response()
    }
}

/// `{ok:false, error:{code, message}}` with the taxonomy status.
pub struct ApiError(pub GatewayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({"ok": false, "error": ErrorBody::from(&self.0)});
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tool/run", post(tool_run))
        .route("/action/run", post(action_run))
        .route("/episode/search", post(episode_search))
        .route("/artifact/get", get(artifact_get))
        .route("/schema/put", post(schema_put))
        .route("/schema/get", get(schema_get))
        .route("/payload/validate", post(payload_validate))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    Json(state.gateway.health()).into_response()
}

async fn tool_run(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    let (_, req) = match state.admit_json::<ToolRunRequest>("/tool/run", headers, body).await {
        Ok(admitted) => admitted,
        Err(rsp) => return rsp,
    };
    match state.gateway.run_tool(req).await {
        Ok(out) if out.error.is_some() => (StatusCode::FORBIDDEN, Json(out)).into_response(),
        Ok(out) => Json(out).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

async fn action_run(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    let (_, req) = match state.admit_json::<ActionRunRequest>("/action/run", headers, body).await {
        Ok(admitted) => admitted,
        Err(rsp) => return rsp,
    };
    match state.gateway.run_action(req).await {
        Ok(out) if out.error.is_some() => (StatusCode::FORBIDDEN, Json(out)).into_response(),
        Ok(out) => Json(out).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

async fn episode_search(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    let (_, query) = match state.admit_json::<EpisodeQuery>("/episode/search", headers, body).await {
        Ok(admitted) => admitted,
        Err(rsp) => return rsp,
    };
    match state.gateway.search_episodes(&query).await {
        Ok(episodes) => Json(json!({"ok": true, "results": episodes})).into_response(),
        Err(err) => state.reject("/episode/search", err).await,
    }
}

async fn artifact_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(rsp) = state.admit_query("/artifact/get", headers).await {
        return rsp;
    }
    let raw_ref = params.get("ref").map(String::as_str).unwrap_or_default();
    match state.gateway.get_artifact(raw_ref).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(err) => state.reject("/artifact/get", err).await,
    }
}

async fn schema_put(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    let (_, req) = match state.admit_json::<SchemaPutRequest>("/schema/put", headers, body).await {
        Ok(admitted) => admitted,
        Err(rsp) => return rsp,
    };
    match state.gateway.put_schema(req).await {
        Ok(out) => Json(out).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

async fn schema_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(rsp) = state.admit_query("/schema/get", headers).await {
        return rsp;
    }
    let param = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();
    match state.gateway.get_schema_raw(param("schema_id"), param("version")).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Err(err) => state.reject("/schema/get", err).await,
    }
}

async fn payload_validate(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Response {
    let (class, req) = match state
        .admit_json::<PayloadValidateRequest>("/payload/validate", headers, body)
        .await
    {
        Ok(admitted) => admitted,
        Err(rsp) => return rsp,
    };
    match state.gateway.validate_payload(req, class).await {
        Ok(out) if out.denied => (StatusCode::FORBIDDEN, Json(out)).into_response(),
        Ok(out) => Json(out).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}
