//! Server configuration from `TOOLGATE_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;

use toolgate_auth::CredentialGate;
use toolgate_core::{
    EvidenceRecorder, Gateway, GatewaySettings, Registry, RegistrySeed, DEFAULT_POLICY_REF,
};
use toolgate_receipts::EpisodeJournal;
use toolgate_schema::{OldestInsertedHalf, SchemaCache, DEFAULT_CAPACITY};
use toolgate_store::{
    ArtifactStore, EpisodeIndex, FsArtifactStore, InMemoryArtifactStore, InMemoryEpisodeIndex,
    InMemoryKvStore,
};
use toolgate_tools::HandlerRegistry;

use crate::{AppState, DEFAULT_MAX_REQUEST_BYTES};

pub const DEFAULT_ADDR: &str = "0.0.0.0:7070";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub token: Option<String>,
    pub admin_token: Option<String>,
    pub registry_file: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
    pub episode_log: Option<PathBuf>,
    pub default_policy: String,
    pub allow_inline_schema: bool,
    pub v0_schema_file: Option<PathBuf>,
    pub max_request_bytes: usize,
    pub schema_cache_capacity: usize,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let flag = |name: &str| {
            var(name)
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false)
        };

        let addr = var("TOOLGATE_ADDR").unwrap_or_else(|| DEFAULT_ADDR.into());
        Ok(Self {
            addr: addr
                .parse()
                .with_context(|| format!("invalid TOOLGATE_ADDR {addr}"))?,
            token: var("TOOLGATE_TOKEN"),
            admin_token: var("TOOLGATE_ADMIN_TOKEN"),
            registry_file: var("TOOLGATE_REGISTRY_FILE").map(PathBuf::from),
            artifact_dir: var("TOOLGATE_ARTIFACT_DIR").map(PathBuf::from),
            episode_log: var("TOOLGATE_EPISODE_LOG").map(PathBuf::from),
            default_policy: var("TOOLGATE_DEFAULT_POLICY").unwrap_or_else(|| DEFAULT_POLICY_REF.into()),
            allow_inline_schema: flag("TOOLGATE_ALLOW_INLINE_SCHEMA"),
            v0_schema_file: var("TOOLGATE_V0_SCHEMA_FILE").map(PathBuf::from),
            max_request_bytes: parse_or(var("TOOLGATE_MAX_REQUEST_BYTES"), DEFAULT_MAX_REQUEST_BYTES)
                .context("invalid TOOLGATE_MAX_REQUEST_BYTES")?,
            schema_cache_capacity: parse_or(var("TOOLGATE_SCHEMA_CACHE_CAPACITY"), DEFAULT_CAPACITY)
                .context("invalid TOOLGATE_SCHEMA_CACHE_CAPACITY")?,
        })
    }

    /// Builds the stores, seeds the registry and wires the gateway.
    pub async fn build_state(&self) -> anyhow::Result<AppState> {
        let artifacts: Arc<dyn ArtifactStore> = match &self.artifact_dir {
            Some(dir) => Arc::new(FsArtifactStore::new(dir)),
            None => Arc::new(InMemoryArtifactStore::new()),
        };
        let episodes: Arc<dyn EpisodeIndex> = match &self.episode_log {
            Some(path) => Arc::new(
                EpisodeJournal::open(path)
                    .with_context(|| format!("opening episode log {}", path.display()))?,
            ),
            None => Arc::new(InMemoryEpisodeIndex::new()),
        };

        let registry = Registry::new(Arc::new(InMemoryKvStore::new()));
        if let Some(path) = &self.registry_file {
            RegistrySeed::from_path(path)
                .with_context(|| format!("loading registry {}", path.display()))?
                .apply(&registry)
                .await?;
        }

        let mut settings = GatewaySettings {
            default_policy_ref: self.default_policy.clone(),
            allow_inline_schema: self.allow_inline_schema,
            ..Default::default()
        };
        if let Some(path) = &self.v0_schema_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading v0 schema {}", path.display()))?;
            settings.v0_schema = serde_json::from_str::<Value>(&text)?;
        }

        let gateway = Gateway::new(
            registry,
            EvidenceRecorder::new(artifacts, episodes),
            HandlerRegistry::with_builtins(),
            Arc::new(SchemaCache::new(
                self.schema_cache_capacity,
                Box::new(OldestInsertedHalf),
            )),
            settings,
        );
        if self.token.is_none() {
            tracing::warn!("TOOLGATE_TOKEN is not set; every authenticated endpoint will refuse requests");
        }
        let gate = CredentialGate::new(self.token.clone(), self.admin_token.clone());
        Ok(AppState::new(Arc::new(gateway), gate, self.max_request_bytes))
    }
}

fn parse_or(raw: Option<String>, default: usize) -> anyhow::Result<usize> {
    match raw {
        Some(v) => Ok(v.parse()?),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<ServerConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr.port(), 7070);
        assert_eq!(cfg.default_policy, "default");
        assert!(!cfg.allow_inline_schema);
        assert_eq!(cfg.max_request_bytes, DEFAULT_MAX_REQUEST_BYTES);
        assert_eq!(cfg.schema_cache_capacity, 100);
        assert!(cfg.token.is_none());
    }

    #[test]
    fn overrides_and_bad_values() {
        let cfg = config(&[
            ("TOOLGATE_ADDR", "127.0.0.1:9999"),
            ("TOOLGATE_ALLOW_INLINE_SCHEMA", "TRUE"),
            ("TOOLGATE_TOKEN", "tok"),
            ("TOOLGATE_ADMIN_TOKEN", ""),
            ("TOOLGATE_SCHEMA_CACHE_CAPACITY", "8"),
        ])
        .unwrap();
        assert_eq!(cfg.addr.port(), 9999);
        assert!(cfg.allow_inline_schema);
        assert_eq!(cfg.token.as_deref(), Some("tok"));
        assert!(cfg.admin_token.is_none());
        assert_eq!(cfg.schema_cache_capacity, 8);

        assert!(config(&[("TOOLGATE_MAX_REQUEST_BYTES", "lots")]).is_err());
        assert!(config(&[("TOOLGATE_ADDR", "nowhere")]).is_err());
    }

    #[tokio::test]
    async fn durable_stores_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join("registry.yaml");
        std::fs::write(
            &registry,
            "policies:\n  default:\n    policy_id: default\n    policy_version: \"1\"\n    tool_allowlist: [builtin.echo]\nroutes:\n  - { domain: builtin, action: echo, mode: in_process }\n",
        )
        .unwrap();
        let log = dir.path().join("episodes.jsonl");
        let artifacts = dir.path().join("artifacts");
        let cfg = config(&[
            ("TOOLGATE_TOKEN", "tok"),
            ("TOOLGATE_REGISTRY_FILE", registry.to_str().unwrap()),
            ("TOOLGATE_EPISODE_LOG", log.to_str().unwrap()),
            ("TOOLGATE_ARTIFACT_DIR", artifacts.to_str().unwrap()),
        ])
        .unwrap();

        let state = cfg.build_state().await.unwrap();
        let out = state
            .gateway
            .run_tool(toolgate_core::ToolRunRequest {
                request_id: None,
                tool_id: "builtin.echo".into(),
                args: serde_json::json!({"x": 1}),
                ctx: Default::default(),
            })
            .await
            .unwrap();
        assert!(out.ok);
        let bytes = state.gateway.get_artifact(out.evidence_refs[0].as_str()).await.unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(toolgate_receipts::verify_log(&log).unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_registry_file_is_an_error() {
        let cfg = config(&[("TOOLGATE_REGISTRY_FILE", "/definitely/not/here.yaml")]).unwrap();
        assert!(cfg.build_state().await.is_err());
    }
}
