use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identity string stamped on every response and episode.
pub const ENGINE_REF: &str = concat!("toolgate@", env!("CARGO_PKG_VERSION"));

/// Outcome of a policy evaluation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Allow,
    Deny,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Allow => "allow",
            DecisionKind::Deny => "deny",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: DecisionKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl Decision {
    pub fn allow(reason: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self {
            decision: DecisionKind::Allow,
            reason: reason.into(),
            rule_id: Some(rule_id.into()),
        }
    }

    pub fn deny(reason: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self {
            decision: DecisionKind::Deny,
            reason: reason.into(),
            rule_id: Some(rule_id.into()),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.decision == DecisionKind::Allow
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainActionRule {
    pub domain: String,
    pub actions: BTreeSet<String>,
    #[serde(default)]
    pub rule_id: Option<String>,
}

/// Named, versioned bundle of allow rules. Read-only once loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyProfile {
    pub policy_id: String,
    pub policy_version: String,
    #[serde(default = "default_deny")]
    pub default_decision: DecisionKind,
    #[serde(default)]
    pub tool_allowlist: BTreeSet<String>,
    #[serde(default)]
    pub hostname_allowlist: BTreeSet<String>,
    #[serde(default)]
    pub domain_action_allow_rules: Vec<DomainActionRule>,
}

fn default_deny() -> DecisionKind {
    DecisionKind::Deny
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    InProcess,
    RemoteHttp,
}

/// Dispatch description for one `(domain, action)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub domain: String,
    pub action: String,
    pub mode: DispatchMode,
    #[serde(default)]
    pub target_ref: Option<String>,
    #[serde(default)]
    pub path_template: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_response_bytes: Option<usize>,
    #[serde(default)]
    pub signing_secret_ref: Option<String>,
}

impl Route {
    pub fn key(&self) -> String {
        route_key(&self.domain, &self.action)
    }
}

pub fn route_key(domain: &str, action: &str) -> String {
    format!("{domain}:{action}")
}

/// Content-addressed pointer into the artifact store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self(format!("sha256/{}", sha256_hex(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeType {
    ToolRun,
    PolicyDeny,
    ToolError,
    ActionRun,
    PayloadValidate,
    PayloadDeny,
    SchemaPut,
    RequestRejected,
}

impl EpisodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeType::ToolRun => "tool_run",
            EpisodeType::PolicyDeny => "policy_deny",
            EpisodeType::ToolError => "tool_error",
            EpisodeType::ActionRun => "action_run",
            EpisodeType::PayloadValidate => "payload_validate",
            EpisodeType::PayloadDeny => "payload_deny",
            EpisodeType::SchemaPut => "schema_put",
            EpisodeType::RequestRejected => "request_rejected",
        }
    }
}

/// Append-only audit record for one terminal outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    /// Unix milliseconds.
    pub ts: i64,
    #[serde(rename = "type")]
    pub episode_type: EpisodeType,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub policy_ref: Option<String>,
    #[serde(default)]
    pub policy_version: Option<String>,
    pub engine_ref: String,
    pub decision: DecisionKind,
    pub reason: String,
    #[serde(default)]
    pub evidence_refs: Vec<ArtifactRef>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Episode {
    pub fn new(episode_type: EpisodeType, decision: DecisionKind, reason: impl Into<String>) -> Self {
        Self {
            id: new_episode_id(),
            ts: now_ms(),
            episode_type,
            run_id: None,
            step_id: None,
            policy_ref: None,
            policy_version: None,
            engine_ref: ENGINE_REF.to_string(),
            decision,
            reason: reason.into(),
            evidence_refs: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }
}

/// Episode ids sort by creation time: a millisecond prefix plus a random suffix.
pub fn new_episode_id() -> String {
    format!("ep_{:013}_{}", now_ms(), Uuid::new_v4().simple())
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compact JSON encoding with sorted object keys.
pub fn canonical_json(value: &serde_json::Value) -> Vec<u8> {
    // serde_json's default map is ordered by key, so the compact encoding is stable.
    serde_json::to_vec(value).unwrap_or_default()
}

pub fn content_hash(value: &serde_json::Value) -> String {
    sha256_hex(&canonical_json(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_hash_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn profile_defaults_to_deny() {
        let profile: PolicyProfile =
            serde_json::from_value(json!({"policy_id": "p", "policy_version": "1"})).unwrap();
        assert_eq!(profile.default_decision, DecisionKind::Deny);
        assert!(profile.tool_allowlist.is_empty());
    }

    #[test]
    fn episode_serializes_type_field() {
        let ep = Episode::new(EpisodeType::PolicyDeny, DecisionKind::Deny, "default_deny");
        let v = serde_json::to_value(&ep).unwrap();
        assert_eq!(v["type"], "policy_deny");
        assert_eq!(v["decision"], "deny");
        assert!(ep.id.starts_with("ep_"));
    }

    #[test]
    fn artifact_ref_is_content_addressed() {
        let a = ArtifactRef::for_bytes(b"hello");
        assert_eq!(a, ArtifactRef::for_bytes(b"hello"));
        assert!(a.as_str().starts_with("sha256/"));
        assert_eq!(a.as_str().len(), "sha256/".len() + 64);
    }
}
