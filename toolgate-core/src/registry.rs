use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use toolgate_store::KvStore;
use toolgate_types::{canonical_json, route_key, PolicyProfile, Route};

use crate::refs::{schema_key, validate_schema_ident};
use crate::GatewayError;

pub const NS_POLICIES: &str = "policies";
pub const NS_ROUTES: &str = "routes";
pub const NS_SCHEMAS: &str = "schemas";

/// Typed view over the key-value registry holding policies, routes and schemas.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn KvStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get_policy(&self, policy_ref: &str) -> Result<Option<PolicyProfile>, GatewayError> {
        self.get_json(NS_POLICIES, policy_ref).await
    }

    pub async fn put_policy(&self, policy_ref: &str, profile: &PolicyProfile) -> Result<(), GatewayError> {
        self.put_json(NS_POLICIES, policy_ref, profile).await
    }

    pub async fn get_route(&self, domain: &str, action: &str) -> Result<Option<Route>, GatewayError> {
        self.get_json(NS_ROUTES, &route_key(domain, action)).await
    }

    pub async fn put_route(&self, route: &Route) -> Result<(), GatewayError> {
        self.put_json(NS_ROUTES, &route.key(), route).await
    }

    pub async fn get_schema_raw(&self, schema_id: &str, version: &str) -> Result<Option<Vec<u8>>, GatewayError> {
        Ok(self.store.get(NS_SCHEMAS, &schema_key(schema_id, version)).await?)
    }

    pub async fn put_schema_raw(&self, schema_id: &str, version: &str, bytes: Vec<u8>) -> Result<(), GatewayError> {
        Ok(self.store.put(NS_SCHEMAS, &schema_key(schema_id, version), bytes).await?)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, ns: &str, key: &str) -> Result<Option<T>, GatewayError> {
        match self.store.get(ns, key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| GatewayError::Internal(format!("corrupt {ns} entry {key}: {e}"))),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(&self, ns: &str, key: &str, value: &T) -> Result<(), GatewayError> {
        let bytes = serde_json::to_vec(value).map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(self.store.put(ns, key, bytes).await?)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SeedSchema {
    pub schema_id: String,
    pub version: String,
    #[serde(alias = "schema")]
    pub schema_json: Value,
}

/// Registry contents loaded from YAML at startup.
///
/// ```yaml
/// policies:
///   default:
///     policy_id: default
///     policy_version: "1"
///     tool_allowlist: [kv.get]
/// routes:
///   - { domain: kv, action: get, mode: remote_http, target_ref: "env:KV_BASE" }
/// schemas:
///   - { schema_id: order, version: "1", schema_json: { type: object } }
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RegistrySeed {
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyProfile>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub schemas: Vec<SeedSchema>,
}

impl RegistrySeed {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_yaml(&text)?)
    }

    pub async fn apply(&self, registry: &Registry) -> Result<(), GatewayError> {
        for (policy_ref, profile) in &self.policies {
            registry.put_policy(policy_ref, profile).await?;
        }
        for route in &self.routes {
            registry.put_route(route).await?;
        }
        for seed in &self.schemas {
            validate_schema_ident(&seed.schema_id, &seed.version)?;
            registry
                .put_schema_raw(&seed.schema_id, &seed.version, canonical_json(&seed.schema_json))
                .await?;
        }
        tracing::info!(
            policies = self.policies.len(),
            routes = self.routes.len(),
            schemas = self.schemas.len(),
            "registry seeded"
        );
        Ok(())
    }
}
