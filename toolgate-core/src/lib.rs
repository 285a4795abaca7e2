//! The gateway orchestrator: wires credential class, policy, routing, invocation, schema
//! validation and evidence recording into the public flows.

use std::sync::Arc;

use serde_json::{json, Value};

use toolgate_invoke::BoundedInvoker;
use toolgate_router::{EnvLookup, ProcessEnv};
use toolgate_schema::{SchemaCache, ValidationMode};
use toolgate_store::{
    EpisodeQuery, InMemoryArtifactStore, InMemoryEpisodeIndex, InMemoryKvStore,
};
use toolgate_tools::HandlerRegistry;
use toolgate_types::{ArtifactRef, DecisionKind, Episode, EpisodeType, ENGINE_REF};

pub mod api;
pub use api::*;

mod error;
pub use error::GatewayError;

pub mod recorder;
pub use recorder::EvidenceRecorder;

pub mod refs;

pub mod registry;
pub use registry::{Registry, RegistrySeed};

mod payload;
mod tool_run;
pub use tool_run::split_tool_id;

pub const DEFAULT_POLICY_REF: &str = "default";
pub const DEFAULT_MAX_SCHEMA_BYTES: usize = 64 * 1024;
pub const INLINE_SCHEMA_DENIED: &str = "V2 inline schema not allowed (deny-by-default)";

#[derive(Clone, Debug)]
pub struct GatewaySettings {
    /// Policy used when a request carries no `ctx.policy_ref`.
    pub default_policy_ref: String,
    /// Operator opt-in for v2 inline schemas from non-admin callers.
    pub allow_inline_schema: bool,
    /// The fixed v0 schema.
    pub v0_schema: Value,
    pub max_schema_bytes: usize,
    pub validation_mode: ValidationMode,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            default_policy_ref: DEFAULT_POLICY_REF.to_string(),
            allow_inline_schema: false,
            v0_schema: json!({"type": "object"}),
            max_schema_bytes: DEFAULT_MAX_SCHEMA_BYTES,
            validation_mode: ValidationMode::AllErrors,
        }
    }
}

pub struct Gateway {
    pub registry: Registry,
    pub recorder: EvidenceRecorder,
    pub bindings: HandlerRegistry,
    pub schemas: Arc<SchemaCache>,
    pub invoker: BoundedInvoker,
    pub env: Arc<dyn EnvLookup>,
    pub settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        registry: Registry,
        recorder: EvidenceRecorder,
        bindings: HandlerRegistry,
        schemas: Arc<SchemaCache>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            registry,
            recorder,
            bindings,
            schemas,
            invoker: BoundedInvoker::new(),
            env: Arc::new(ProcessEnv),
            settings,
        }
    }

    /// In-memory stores, built-in handlers and a default-sized schema cache.
    pub fn in_memory(settings: GatewaySettings) -> Self {
        Self::new(
            Registry::new(Arc::new(InMemoryKvStore::new())),
            EvidenceRecorder::new(
                Arc::new(InMemoryArtifactStore::new()),
                Arc::new(InMemoryEpisodeIndex::new()),
            ),
            HandlerRegistry::with_builtins(),
            Arc::new(SchemaCache::default()),
            settings,
        )
    }

    pub fn with_env(mut self, env: Arc<dyn EnvLookup>) -> Self {
        self.env = env;
        self
    }

    pub fn with_invoker(mut self, invoker: BoundedInvoker) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            ok: true,
            engine_ref: ENGINE_REF.to_string(),
            time: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub async fn search_episodes(&self, query: &EpisodeQuery) -> Result<Vec<Episode>, GatewayError> {
        Ok(self.recorder.episodes().search(query).await?)
    }

    pub async fn get_artifact(&self, raw_ref: &str) -> Result<Vec<u8>, GatewayError> {
        refs::validate_artifact_ref(raw_ref)?;
        self.recorder
            .artifacts()
            .get(&ArtifactRef(raw_ref.to_string()))
            .await?
            .ok_or_else(|| GatewayError::ArtifactNotFound(raw_ref.to_string()))
    }

    /// Records a request that never reached a flow (bad credential, oversize or malformed body).
    pub async fn record_rejection(&self, endpoint: &str, err: &GatewayError) -> String {
        let mut episode = Episode::new(EpisodeType::RequestRejected, DecisionKind::Deny, err.code());
        episode.payload = json!({
            "endpoint": endpoint,
            "error": ErrorBody::from(err),
        });
        self.recorder.append(episode).await
    }

    /// Engine identity snapshot stored as evidence alongside each request.
    fn engine_snapshot(&self) -> Value {
        json!({
            "kind": "engine",
            "engine_ref": ENGINE_REF,
            "default_policy_ref": self.settings.default_policy_ref,
            "allow_inline_schema": self.settings.allow_inline_schema,
            "schema_cache_len": self.schemas.len(),
            "bindings": self.bindings.names(),
        })
    }
}
