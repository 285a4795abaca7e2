//! Request admission: auth stage → body-size stage → JSON stage, then the business flow.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{header, HeaderMap};
use http_body_util::LengthLimitError;
use serde_json::Value;

use toolgate_auth::{CredentialClass, CredentialGate};
use toolgate_core::GatewayError;

/// An inbound request as it moves through the stages.
pub struct Inbound {
    pub endpoint: &'static str,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    pub bytes: Bytes,
    pub credential: Option<CredentialClass>,
    pub json: Value,
}

impl Inbound {
    pub fn new(endpoint: &'static str, headers: HeaderMap, body: Option<Body>) -> Self {
        Self {
            endpoint,
            headers,
            body,
            bytes: Bytes::new(),
            credential: None,
            json: Value::Null,
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    async fn handle(&self, inbound: &mut Inbound) -> Result<(), GatewayError>;
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Auth, bounded body read and JSON parse.
    pub fn for_json(gate: Arc<CredentialGate>, max_bytes: usize) -> Self {
        Self::new(vec![
            Box::new(AuthStage::new(gate, CredentialClass::Standard)),
            Box::new(BodyLimitStage { max_bytes }),
            Box::new(JsonStage),
        ])
    }

    /// Auth only; for query-string endpoints.
    pub fn for_query(gate: Arc<CredentialGate>) -> Self {
        Self::new(vec![Box::new(AuthStage::new(gate, CredentialClass::Standard))])
    }

    pub async fn run(&self, mut inbound: Inbound) -> Result<Inbound, GatewayError> {
        for stage in &self.stages {
            stage.handle(&mut inbound).await?;
        }
        Ok(inbound)
    }
}

pub struct AuthStage {
    gate: Arc<CredentialGate>,
    required: CredentialClass,
}

impl AuthStage {
    pub fn new(gate: Arc<CredentialGate>, required: CredentialClass) -> Self {
        Self { gate, required }
    }
}

#[async_trait]
impl Stage for AuthStage {
    async fn handle(&self, inbound: &mut Inbound) -> Result<(), GatewayError> {
        let authorization = inbound
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let class = self
            .gate
            .require(authorization, self.required)
            .map_err(|_| GatewayError::Unauthorized)?;
        inbound.credential = Some(class);
        Ok(())
    }
}

pub struct BodyLimitStage {
    pub max_bytes: usize,
}

#[async_trait]
impl Stage for BodyLimitStage {
    async fn handle(&self, inbound: &mut Inbound) -> Result<(), GatewayError> {
        let too_large = GatewayError::RequestTooLarge {
            limit: self.max_bytes,
        };
        let declared = inbound
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_bytes) {
            return Err(too_large);
        }
        let Some(body) = inbound.body.take() else {
            return Ok(());
        };
        inbound.bytes = to_bytes(body, self.max_bytes).await.map_err(|err| {
            let err = err.into_inner();
            if is_length_limit(&*err) {
                too_large
            } else {
                GatewayError::InvalidJson(format!("request body could not be read: {err}"))
            }
        })?;
        Ok(())
    }
}

fn is_length_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

pub struct JsonStage;

#[async_trait]
impl Stage for JsonStage {
    async fn handle(&self, inbound: &mut Inbound) -> Result<(), GatewayError> {
        inbound.json = serde_json::from_slice(&inbound.bytes)
            .map_err(|e| GatewayError::InvalidJson(e.to_string()))?;
        Ok(())
    }
}
