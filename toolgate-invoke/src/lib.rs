//! Bounded downstream invocation.
//!
//! Every call runs under a deadline and a response byte ceiling. Failures are folded into three
//! outcomes: `timeout`, `response_too_large` and `invoke_failed`. Nothing is retried here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use toolgate_sign::{SignedEnvelope, HEADER_REQUEST_ID};
use toolgate_tools::ToolHandler;
use toolgate_types::Route;

pub const DEFAULT_TIMEOUT_MS: u64 = 1500;
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Response headers copied into the tool result.
const KEPT_HEADERS: &[&str] = &["content-type", HEADER_REQUEST_ID];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvokeLimits {
    pub timeout: Duration,
    pub max_response_bytes: usize,
}

impl Default for InvokeLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl InvokeLimits {
    pub fn for_route(route: &Route) -> Self {
        Self {
            timeout: Duration::from_millis(route.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
            max_response_bytes: route.max_response_bytes.unwrap_or(DEFAULT_MAX_RESPONSE_BYTES),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("downstream did not answer within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("downstream response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },
    #[error("invoke failed: {0}")]
    Failed(String),
}

impl InvokeError {
    pub fn code(&self) -> &'static str {
        match self {
            InvokeError::Timeout { .. } => "timeout",
            InvokeError::ResponseTooLarge { .. } => "response_too_large",
            InvokeError::Failed(_) => "invoke_failed",
        }
    }
}

/// What the gateway hands to a dispatch target.
#[derive(Clone, Debug)]
pub struct ForwardRequest {
    pub method: String,
    pub args: Value,
    /// Serialized `args`; the bytes the envelope digest covers.
    pub body: Vec<u8>,
    pub envelope: SignedEnvelope,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub status: u16,
    pub body: Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl InvokeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where an allowed call goes. Exactly two shapes.
#[derive(Clone)]
pub enum DispatchTarget {
    InProcess {
        binding: String,
        handler: Arc<dyn ToolHandler>,
    },
    Remote {
        url: Url,
    },
}

impl std::fmt::Debug for DispatchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl DispatchTarget {
    pub fn describe(&self) -> String {
        match self {
            DispatchTarget::InProcess { binding, .. } => format!("binding:{binding}"),
            DispatchTarget::Remote { url } => url.to_string(),
        }
    }

    /// Path covered by the request signature.
    pub fn signing_path(&self) -> String {
        match self {
            DispatchTarget::InProcess { binding, .. } => format!("/{binding}"),
            DispatchTarget::Remote { url } => url.path().to_string(),
        }
    }

    pub async fn invoke(
        &self,
        client: &reqwest::Client,
        request: &ForwardRequest,
        max_response_bytes: usize,
    ) -> Result<InvokeResponse, InvokeError> {
        match self {
            DispatchTarget::InProcess { handler, .. } => {
                let output = handler
                    .handle(request.args.clone(), &request.envelope)
                    .await
                    .map_err(|e| InvokeError::Failed(e.message))?;
                let size = serde_json::to_vec(&output).map(|b| b.len()).unwrap_or(0);
                if size > max_response_bytes {
                    return Err(InvokeError::ResponseTooLarge {
                        limit: max_response_bytes,
                    });
                }
                let mut headers = BTreeMap::new();
                headers.insert(HEADER_REQUEST_ID.to_string(), request.envelope.request_id.clone());
                Ok(InvokeResponse {
                    status: 200,
                    body: output,
                    headers,
                })
            }
            DispatchTarget::Remote { url } => invoke_remote(client, url, request, max_response_bytes).await,
        }
    }
}

async fn invoke_remote(
    client: &reqwest::Client,
    url: &Url,
    request: &ForwardRequest,
    max_response_bytes: usize,
) -> Result<InvokeResponse, InvokeError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|e| InvokeError::Failed(format!("invalid method: {e}")))?;
    let mut builder = client
        .request(method, url.clone())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(request.body.clone());
    for (name, value) in request.envelope.headers() {
        builder = builder.header(name, value);
    }

    let resp = builder
        .send()
        .await
        .map_err(|e| InvokeError::Failed(e.to_string()))?;
    let status = resp.status().as_u16();
    let headers: BTreeMap<String, String> = KEPT_HEADERS
        .iter()
        .filter_map(|name| {
            resp.headers()
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();

    let too_large = InvokeError::ResponseTooLarge {
        limit: max_response_bytes,
    };
    if resp.content_length().is_some_and(|len| len > max_response_bytes as u64) {
        return Err(too_large);
    }

    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| InvokeError::Failed(format!("stream error: {e}")))?;
        if body.len() + chunk.len() > max_response_bytes {
            return Err(too_large);
        }
        body.extend_from_slice(&chunk);
    }

    Ok(InvokeResponse {
        status,
        body: parse_body(&body),
        headers,
    })
}

/// JSON when it parses, raw text otherwise.
fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Runs a dispatch target under a deadline. Variant-agnostic.
#[derive(Clone, Default)]
pub struct BoundedInvoker {
    client: reqwest::Client,
}

impl BoundedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn invoke(
        &self,
        target: &DispatchTarget,
        request: &ForwardRequest,
        limits: InvokeLimits,
    ) -> Result<InvokeResponse, InvokeError> {
        let call = target.invoke(&self.client, request, limits.max_response_bytes);
        match tokio::time::timeout(limits.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(target = %target.describe(), timeout_ms = limits.timeout.as_millis() as u64, "downstream call timed out");
                Err(InvokeError::Timeout {
                    timeout_ms: limits.timeout.as_millis() as u64,
                })
            }
        }
    }
}
