use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{info, warn};

use toolgate_invoke::ForwardRequest;
use toolgate_policy::PolicyEngine;
use toolgate_router::{ResolvedRoute, RouteResolver};
use toolgate_types::{
    now_secs, route_key, ArtifactRef, DecisionKind, Episode, EpisodeType, ENGINE_REF,
};

use crate::{
    ActionRunRequest, ErrorBody, Gateway, GatewayError, RunContext, ToolRunRequest,
    ToolRunResponse,
};

const FORWARD_METHOD: &str = "POST";

/// `http.fetch` → (`http`, `fetch`); a bare id maps to action `invoke`.
pub fn split_tool_id(tool_id: &str) -> (String, String) {
    match tool_id.split_once('.') {
        Some((domain, action)) => (domain.to_string(), action.to_string()),
        None => (tool_id.to_string(), "invoke".to_string()),
    }
}

enum CallKind {
    Tool(String),
    Action,
}

struct Call {
    kind: CallKind,
    domain: String,
    action: String,
    args: Value,
    query: BTreeMap<String, String>,
    ctx: RunContext,
    request_id: Option<String>,
}

impl Call {
    fn success_type(&self) -> EpisodeType {
        match self.kind {
            CallKind::Tool(_) => EpisodeType::ToolRun,
            CallKind::Action => EpisodeType::ActionRun,
        }
    }

    fn label(&self) -> String {
        match &self.kind {
            CallKind::Tool(tool_id) => tool_id.clone(),
            CallKind::Action => route_key(&self.domain, &self.action),
        }
    }

    fn echo(&self) -> Value {
        json!({
            "kind": "request",
            "request_id": self.request_id,
            "target": self.label(),
            "domain": self.domain,
            "action": self.action,
            "args": self.args,
            "query": self.query,
            "ctx": self.ctx,
        })
    }
}

/// Policy identity the episode is stamped with.
struct Scope {
    policy_ref: String,
    policy_version: Option<String>,
}

impl Gateway {
    pub async fn run_tool(&self, req: ToolRunRequest) -> Result<ToolRunResponse, GatewayError> {
        let (domain, action) = split_tool_id(&req.tool_id);
        self.run_call(Call {
            kind: CallKind::Tool(req.tool_id),
            domain,
            action,
            args: req.args,
            query: BTreeMap::new(),
            ctx: req.ctx,
            request_id: req.request_id,
        })
        .await
    }

    pub async fn run_action(&self, req: ActionRunRequest) -> Result<ToolRunResponse, GatewayError> {
        self.run_call(Call {
            kind: CallKind::Action,
            domain: req.domain,
            action: req.action,
            args: req.args,
            query: req.query,
            ctx: req.ctx,
            request_id: req.request_id,
        })
        .await
    }

    async fn run_call(&self, call: Call) -> Result<ToolRunResponse, GatewayError> {
        let mut scope = Scope {
            policy_ref: call
                .ctx
                .policy_ref
                .clone()
                .unwrap_or_else(|| self.settings.default_policy_ref.clone()),
            policy_version: None,
        };
        let mut evidence = Vec::new();
        evidence.extend(self.recorder.put_json("request", &call.echo()).await);
        evidence.extend(self.recorder.put_json("engine", &self.engine_snapshot()).await);

        let profile = match self.registry.get_policy(&scope.policy_ref).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                let err = GatewayError::PolicyNotFound(scope.policy_ref.clone());
                return Err(self
                    .record_failure(&call, &scope, DecisionKind::Deny, Value::Null, err, evidence)
                    .await);
            }
            Err(err) => {
                return Err(self
                    .record_failure(&call, &scope, DecisionKind::Deny, Value::Null, err, evidence)
                    .await)
            }
        };
        scope.policy_version = Some(profile.policy_version.clone());

        let engine = PolicyEngine::new(profile);
        let decision = match &call.kind {
            CallKind::Tool(tool_id) => engine.evaluate_tool(tool_id, &call.args),
            CallKind::Action => engine.evaluate_domain_action(&call.domain, &call.action),
        };
        info!(
            target_id = %call.label(),
            policy_ref = %scope.policy_ref,
            decision = %decision.decision,
            reason = %decision.reason,
            "policy decision"
        );
        evidence.extend(
            self.recorder
                .put_json(
                    "decision",
                    &json!({
                        "kind": "decision",
                        "policy_ref": scope.policy_ref,
                        "policy_version": scope.policy_version,
                        "policy_check": decision,
                    }),
                )
                .await,
        );

        if !decision.is_allow() {
            let denied = GatewayError::PolicyDenied(decision.reason.clone());
            let mut episode = self.episode(
                &call,
                &scope,
                EpisodeType::PolicyDeny,
                DecisionKind::Deny,
                &decision.reason,
                &evidence,
            );
            episode.payload = json!({"target": call.label(), "policy_check": decision});
            let episode_id = self.recorder.append(episode).await;
            return Ok(ToolRunResponse {
                ok: false,
                tool_result: None,
                policy_check: decision,
                evidence_refs: evidence,
                engine_ref: ENGINE_REF.to_string(),
                episode_id,
                error: Some(ErrorBody::from(&denied)),
            });
        }

        let (resolved, request) = match self.prepare(&call).await {
            Ok(prepared) => prepared,
            Err(err) => {
                let extra = json!({"policy_check": decision});
                return Err(self
                    .record_failure(&call, &scope, DecisionKind::Allow, extra, err, evidence)
                    .await);
            }
        };

        let invocation = json!({
            "target": resolved.target.describe(),
            "request_id": request.envelope.request_id,
            "signed": request.envelope.is_signed(),
            "timeout_ms": resolved.limits.timeout.as_millis() as u64,
        });
        match self
            .invoker
            .invoke(&resolved.target, &request, resolved.limits)
            .await
        {
            Ok(response) => {
                let result = json!({"kind": "result", "invocation": invocation, "response": response});
                evidence.extend(self.recorder.put_json("result", &result).await);
                let mut episode = self.episode(
                    &call,
                    &scope,
                    call.success_type(),
                    DecisionKind::Allow,
                    &decision.reason,
                    &evidence,
                );
                episode.payload = json!({
                    "target": call.label(),
                    "policy_check": decision,
                    "invocation": invocation,
                    "status": response.status,
                });
                let episode_id = self.recorder.append(episode).await;
                Ok(ToolRunResponse {
                    ok: response.is_success(),
                    tool_result: Some(response),
                    policy_check: decision,
                    evidence_refs: evidence,
                    engine_ref: ENGINE_REF.to_string(),
                    episode_id,
                    error: None,
                })
            }
            Err(err) => {
                let err = GatewayError::from(err);
                let result = json!({
                    "kind": "result",
                    "invocation": invocation,
                    "error": ErrorBody::from(&err),
                });
                evidence.extend(self.recorder.put_json("result", &result).await);
                let extra = json!({"policy_check": decision, "invocation": invocation});
                Err(self
                    .record_failure(&call, &scope, DecisionKind::Allow, extra, err, evidence)
                    .await)
            }
        }
    }

    /// Route lookup, target resolution and signing. Nothing here touches the network.
    async fn prepare(&self, call: &Call) -> Result<(ResolvedRoute, ForwardRequest), GatewayError> {
        let route = self
            .registry
            .get_route(&call.domain, &call.action)
            .await?
            .ok_or_else(|| GatewayError::RouteNotFound(route_key(&call.domain, &call.action)))?;
        let resolved = RouteResolver::new(&self.bindings, self.env.as_ref()).resolve(&route, &call.query)?;

        let body = serde_json::to_vec(&call.args).map_err(|e| GatewayError::Internal(e.to_string()))?;
        if resolved.signing_secret.is_none() {
            warn!(route = %route.key(), "forwarding unsigned request: route has no signing secret");
        }
        let mut envelope = toolgate_sign::sign(
            FORWARD_METHOD,
            &resolved.target.signing_path(),
            now_secs(),
            resolved.signing_secret.as_deref(),
            &body,
        )
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
        if let Some(request_id) = &call.request_id {
            envelope.request_id = request_id.clone();
        }
        let request = ForwardRequest {
            method: FORWARD_METHOD.to_string(),
            args: call.args.clone(),
            body,
            envelope,
        };
        Ok((resolved, request))
    }

    fn episode(
        &self,
        call: &Call,
        scope: &Scope,
        episode_type: EpisodeType,
        decision: DecisionKind,
        reason: &str,
        evidence: &[ArtifactRef],
    ) -> Episode {
        let mut episode = Episode::new(episode_type, decision, reason);
        episode.run_id = call.ctx.run_id.clone();
        episode.step_id = call.ctx.step_id.clone();
        episode.policy_ref = Some(scope.policy_ref.clone());
        episode.policy_version = scope.policy_version.clone();
        episode.evidence_refs = evidence.to_vec();
        episode
    }

    async fn record_failure(
        &self,
        call: &Call,
        scope: &Scope,
        decision: DecisionKind,
        extra: Value,
        err: GatewayError,
        evidence: Vec<ArtifactRef>,
    ) -> GatewayError {
        warn!(target_id = %call.label(), code = err.code(), error = %err, "call failed");
        let mut episode = self.episode(call, scope, EpisodeType::ToolError, decision, err.code(), &evidence);
        let mut payload = json!({"target": call.label(), "error": ErrorBody::from(&err)});
        if let (Value::Object(out), Value::Object(extra)) = (&mut payload, extra) {
            out.extend(extra);
        }
        episode.payload = payload;
        self.recorder.append(episode).await;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_ids_split_at_first_dot() {
        assert_eq!(split_tool_id("http.fetch"), ("http".into(), "fetch".into()));
        assert_eq!(split_tool_id("kv.get.many"), ("kv".into(), "get.many".into()));
        assert_eq!(split_tool_id("ping"), ("ping".into(), "invoke".into()));
    }
}
