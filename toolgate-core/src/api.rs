use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use toolgate_invoke::InvokeResponse;
use toolgate_schema::{SchemaViolation, ValidationMode};
use toolgate_types::{ArtifactRef, Decision};

use crate::GatewayError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub policy_ref: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolRunRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub tool_id: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub ctx: RunContext,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionRunRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub domain: String,
    pub action: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub ctx: RunContext,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolRunResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<InvokeResponse>,
    pub policy_check: Decision,
    pub evidence_refs: Vec<ArtifactRef>,
    pub engine_ref: String,
    pub episode_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVariant {
    /// Operator-configured fixed schema.
    V0,
    /// Registry schema by `schema_ref`.
    V1,
    /// Inline schema; privilege gated.
    V2,
}

impl SchemaVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVariant::V0 => "v0",
            SchemaVariant::V1 => "v1",
            SchemaVariant::V2 => "v2",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayloadValidateRequest {
    pub variant: SchemaVariant,
    #[serde(default)]
    pub schema_ref: Option<String>,
    #[serde(default)]
    pub schema_inline: Option<Value>,
    pub payload: Value,
    #[serde(default)]
    pub mode: Option<ValidationMode>,
}

/// Either a plain gate message or a structured schema violation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadIssue {
    Message(String),
    Violation(SchemaViolation),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayloadValidateResponse {
    pub ok: bool,
    pub valid: bool,
    pub errors: Vec<PayloadIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ds_payload_ref: Option<ArtifactRef>,
    pub ds_payload_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
    pub cache_hit: bool,
    pub compile_ms: f64,
    pub validate_ms: f64,
    pub engine_ref: String,
    pub evidence_refs: Vec<ArtifactRef>,
    /// Set when the inline-schema gate refused the request.
    #[serde(skip)]
    pub denied: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaPutRequest {
    pub schema_id: String,
    pub version: String,
    #[serde(alias = "schema")]
    pub schema_json: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaPutResponse {
    pub ok: bool,
    pub schema_ref: String,
    pub schema_hash: String,
    pub engine_ref: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub engine_ref: String,
    pub time: String,
}
