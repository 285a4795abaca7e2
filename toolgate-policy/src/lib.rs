//! Deny-by-default policy evaluation.
//!
//! The engine is a first-match evaluator over a single [`PolicyProfile`]. It performs no I/O:
//! profile lookup is the caller's job.

use serde_json::Value;
use toolgate_types::{Decision, DecisionKind, PolicyProfile};
use url::Url;

pub const RULE_DEFAULT_ALLOW: &str = "default_allow";
pub const RULE_DEFAULT_DENY: &str = "default_deny";
pub const RULE_TOOL_ALLOWLIST_MATCH: &str = "tool_allowlist_match";
pub const RULE_HTTP_FETCH_HOSTNAME_CHECK: &str = "http_fetch_hostname_check";
pub const RULE_HTTP_FETCH_URL_VALIDATION: &str = "http_fetch_url_validation";

/// The network-fetch tool; the only tool whose arguments are inspected.
pub const HTTP_FETCH_TOOL: &str = "http.fetch";

#[derive(Clone, Debug)]
pub struct PolicyEngine {
    profile: PolicyProfile,
}

impl PolicyEngine {
    pub fn new(profile: PolicyProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &PolicyProfile {
        &self.profile
    }

    pub fn evaluate_tool(&self, tool_id: &str, args: &Value) -> Decision {
        if let Some(decision) = self.default_allow() {
            return decision;
        }
        if !self.profile.tool_allowlist.contains(tool_id) {
            return Decision::deny(RULE_DEFAULT_DENY, RULE_DEFAULT_DENY);
        }
        if tool_id == HTTP_FETCH_TOOL {
            if let Some(decision) = self.check_fetch_url(args) {
                return decision;
            }
        }
        Decision::allow(RULE_TOOL_ALLOWLIST_MATCH, RULE_TOOL_ALLOWLIST_MATCH)
    }

    pub fn evaluate_domain_action(&self, domain: &str, action: &str) -> Decision {
        if let Some(decision) = self.default_allow() {
            return decision;
        }
        let matched = self
            .profile
            .domain_action_allow_rules
            .iter()
            .find(|rule| rule.domain == domain && rule.actions.contains(action));
        match matched {
            Some(rule) => {
                let rule_id = rule
                    .rule_id
                    .clone()
                    .unwrap_or_else(|| format!("domain_action:{}", rule.domain));
                Decision::allow(rule_id.clone(), rule_id)
            }
            None => Decision::deny(RULE_DEFAULT_DENY, RULE_DEFAULT_DENY),
        }
    }

    fn default_allow(&self) -> Option<Decision> {
        if self.profile.default_decision != DecisionKind::Deny {
            Some(Decision::allow(RULE_DEFAULT_ALLOW, RULE_DEFAULT_ALLOW))
        } else {
            None
        }
    }

    fn check_fetch_url(&self, args: &Value) -> Option<Decision> {
        let raw = args.get("url")?;
        let host = match raw.as_str().map(Url::parse) {
            Some(Ok(url)) => url.host_str().map(|h| h.to_ascii_lowercase()),
            _ => None,
        };
        let Some(host) = host else {
            return Some(Decision::deny(RULE_HTTP_FETCH_URL_VALIDATION, RULE_HTTP_FETCH_URL_VALIDATION));
        };
        let allowlist = &self.profile.hostname_allowlist;
        if !allowlist.is_empty() && !allowlist.contains(&host) {
            return Some(Decision::deny(RULE_HTTP_FETCH_HOSTNAME_CHECK, RULE_HTTP_FETCH_HOSTNAME_CHECK));
        }
        None
    }
}
