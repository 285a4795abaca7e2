use std::time::Instant;

use serde_json::{json, Value};
use tracing::info;

use toolgate_auth::CredentialClass;
use toolgate_schema::schema_hash;
use toolgate_types::{canonical_json, content_hash, ArtifactRef, DecisionKind, Episode, EpisodeType, ENGINE_REF};

use crate::refs::{parse_schema_ref, schema_key, validate_schema_ident};
use crate::{
    ErrorBody, Gateway, GatewayError, PayloadIssue, PayloadValidateRequest, PayloadValidateResponse,
    SchemaPutRequest, SchemaPutResponse, SchemaVariant, INLINE_SCHEMA_DENIED,
};

impl Gateway {
    /// Validates a payload against the schema its variant names. Every terminal state records an
    /// episode; errors are returned only for requests that never reached validation.
    pub async fn validate_payload(
        &self,
        req: PayloadValidateRequest,
        class: CredentialClass,
    ) -> Result<PayloadValidateResponse, GatewayError> {
        let ds_payload_hash = content_hash(&req.payload);
        let mut evidence = Vec::new();

        if req.variant == SchemaVariant::V2 && !(class.is_elevated() || self.settings.allow_inline_schema) {
            // The inline schema is neither hashed nor stored.
            let echo = json!({
                "kind": "request",
                "variant": req.variant.as_str(),
                "inline_schema_present": req.schema_inline.is_some(),
                "ds_payload_hash": ds_payload_hash,
            });
            evidence.extend(self.recorder.put_json("request", &echo).await);
            let mut episode = Episode::new(EpisodeType::PayloadDeny, DecisionKind::Deny, "inline_schema_not_allowed");
            episode.evidence_refs = evidence.clone();
            episode.payload = json!({"variant": req.variant.as_str(), "ds_payload_hash": ds_payload_hash});
            self.recorder.append(episode).await;
            info!(variant = req.variant.as_str(), "inline schema refused");
            return Ok(PayloadValidateResponse {
                ok: true,
                valid: false,
                errors: vec![PayloadIssue::Message(INLINE_SCHEMA_DENIED.to_string())],
                ds_payload_ref: None,
                ds_payload_hash,
                schema_hash: None,
                cache_hit: false,
                compile_ms: 0.0,
                validate_ms: 0.0,
                engine_ref: ENGINE_REF.to_string(),
                evidence_refs: evidence,
                denied: true,
            });
        }

        let echo = json!({
            "kind": "request",
            "variant": req.variant.as_str(),
            "schema_ref": req.schema_ref,
            "inline_schema_present": req.schema_inline.is_some(),
            "ds_payload_hash": ds_payload_hash,
            "mode": req.mode,
        });
        evidence.extend(self.recorder.put_json("request", &echo).await);
        evidence.extend(self.recorder.put_json("engine", &self.engine_snapshot()).await);
        let ds_payload_ref = self.recorder.put_json("payload", &req.payload).await;
        evidence.extend(ds_payload_ref.clone());

        let outcome = match self.resolve_schema(&req).await {
            Ok(schema) => {
                let hash = schema_hash(&schema);
                self.schemas
                    .get_or_compile(&schema, &hash)
                    .map(|lookup| (hash, lookup))
                    .map_err(|e| GatewayError::InvalidSchema(e.to_string()))
            }
            Err(err) => Err(err),
        };
        let (hash, lookup) = match outcome {
            Ok(found) => found,
            Err(err) => {
                let mut episode = Episode::new(EpisodeType::PayloadValidate, DecisionKind::Deny, err.code());
                episode.evidence_refs = evidence;
                episode.payload = json!({
                    "variant": req.variant.as_str(),
                    "schema_ref": req.schema_ref,
                    "ds_payload_hash": ds_payload_hash,
                    "error": ErrorBody::from(&err),
                });
                self.recorder.append(episode).await;
                return Err(err);
            }
        };

        let started = Instant::now();
        let report = lookup
            .validator
            .validate(&req.payload, req.mode.unwrap_or(self.settings.validation_mode));
        let validate_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            variant = req.variant.as_str(),
            schema_hash = %hash,
            cache_hit = lookup.cache_hit,
            valid = report.valid,
            "payload validated"
        );

        let (decision, reason) = if report.valid {
            (DecisionKind::Allow, "valid")
        } else {
            (DecisionKind::Deny, "invalid")
        };
        let mut episode = Episode::new(EpisodeType::PayloadValidate, decision, reason);
        episode.evidence_refs = evidence.clone();
        episode.payload = json!({
            "variant": req.variant.as_str(),
            "schema_ref": req.schema_ref,
            "schema_hash": hash,
            "cache_hit": lookup.cache_hit,
            "ds_payload_hash": ds_payload_hash,
            "valid": report.valid,
            "error_count": report.errors.len(),
        });
        self.recorder.append(episode).await;

        Ok(PayloadValidateResponse {
            ok: true,
            valid: report.valid,
            errors: report.errors.into_iter().map(PayloadIssue::Violation).collect(),
            ds_payload_ref,
            ds_payload_hash,
            schema_hash: Some(hash),
            cache_hit: lookup.cache_hit,
            compile_ms: lookup.compile_ms,
            validate_ms,
            engine_ref: ENGINE_REF.to_string(),
            evidence_refs: evidence,
            denied: false,
        })
    }

    async fn resolve_schema(&self, req: &PayloadValidateRequest) -> Result<Value, GatewayError> {
        match req.variant {
            SchemaVariant::V0 => Ok(self.settings.v0_schema.clone()),
            SchemaVariant::V1 => {
                let schema_ref = req
                    .schema_ref
                    .as_deref()
                    .ok_or_else(|| GatewayError::InvalidJson("v1 requires schema_ref".into()))?;
                let (schema_id, version) = parse_schema_ref(schema_ref)?;
                self.get_schema(schema_id, version).await
            }
            SchemaVariant::V2 => {
                let schema = req
                    .schema_inline
                    .clone()
                    .ok_or_else(|| GatewayError::InvalidJson("v2 requires schema_inline".into()))?;
                self.check_schema_size(&schema)?;
                Ok(schema)
            }
        }
    }

    fn check_schema_size(&self, schema: &Value) -> Result<Vec<u8>, GatewayError> {
        let bytes = canonical_json(schema);
        if bytes.len() > self.settings.max_schema_bytes {
            return Err(GatewayError::SchemaTooLarge {
                limit: self.settings.max_schema_bytes,
            });
        }
        Ok(bytes)
    }

    pub async fn get_schema(&self, schema_id: &str, version: &str) -> Result<Value, GatewayError> {
        let raw = self.get_schema_raw(schema_id, version).await?;
        serde_json::from_slice(&raw).map_err(|e| GatewayError::Internal(format!("corrupt schema entry: {e}")))
    }

    pub async fn get_schema_raw(&self, schema_id: &str, version: &str) -> Result<Vec<u8>, GatewayError> {
        validate_schema_ident(schema_id, version)?;
        self.registry
            .get_schema_raw(schema_id, version)
            .await?
            .ok_or_else(|| GatewayError::SchemaNotFound(schema_key(schema_id, version)))
    }

    /// Stores a schema after compiling it, which also warms the cache.
    pub async fn put_schema(&self, req: SchemaPutRequest) -> Result<SchemaPutResponse, GatewayError> {
        let schema_ref = schema_key(&req.schema_id, &req.version);
        let mut evidence = Vec::new();
        let stored = self.store_schema(&req, &mut evidence).await;

        let mut episode = match &stored {
            Ok(_) => Episode::new(EpisodeType::SchemaPut, DecisionKind::Allow, "stored"),
            Err(err) => Episode::new(EpisodeType::SchemaPut, DecisionKind::Deny, err.code()),
        };
        episode.evidence_refs = evidence;
        episode.payload = match &stored {
            Ok(hash) => json!({"schema_ref": schema_ref, "schema_hash": hash}),
            Err(err) => json!({"schema_ref": schema_ref, "error": ErrorBody::from(err)}),
        };
        self.recorder.append(episode).await;

        let schema_hash = stored?;
        info!(%schema_ref, %schema_hash, "schema stored");
        Ok(SchemaPutResponse {
            ok: true,
            schema_ref,
            schema_hash,
            engine_ref: ENGINE_REF.to_string(),
        })
    }

    async fn store_schema(
        &self,
        req: &SchemaPutRequest,
        evidence: &mut Vec<ArtifactRef>,
    ) -> Result<String, GatewayError> {
        validate_schema_ident(&req.schema_id, &req.version)?;
        let bytes = self.check_schema_size(&req.schema_json)?;
        let hash = schema_hash(&req.schema_json);
        self.schemas
            .get_or_compile(&req.schema_json, &hash)
            .map_err(|e| GatewayError::InvalidSchema(e.to_string()))?;
        evidence.extend(self.recorder.put_json("schema", &req.schema_json).await);
        self.registry
            .put_schema_raw(&req.schema_id, &req.version, bytes)
            .await?;
        Ok(hash)
    }
}
