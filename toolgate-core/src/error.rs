use thiserror::Error;

use toolgate_invoke::InvokeError;
use toolgate_router::ResolveError;
use toolgate_store::StoreError;

/// Every terminal failure the gateway surfaces, with its stable code and HTTP status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("denied by policy: {0}")]
    PolicyDenied(String),
    #[error("policy {0} not found")]
    PolicyNotFound(String),
    #[error("no route for {0}")]
    RouteNotFound(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("schema {0} not found")]
    SchemaNotFound(String),
    #[error("schema exceeds {limit} bytes")]
    SchemaTooLarge { limit: usize },
    #[error("invalid schema_id or version")]
    InvalidSchemaIdOrVersion,
    #[error("{0}")]
    InvalidSchema(String),
    #[error("invalid artifact ref")]
    InvalidArtifactRef,
    #[error("artifact {0} not found")]
    ArtifactNotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::PolicyDenied(_) => "policy_denied",
            GatewayError::PolicyNotFound(_) => "policy_not_found",
            GatewayError::RouteNotFound(_) => "route_not_found",
            GatewayError::Resolve(e) => e.code(),
            GatewayError::RequestTooLarge { .. } => "request_too_large",
            GatewayError::InvalidJson(_) => "invalid_json",
            GatewayError::Invoke(e) => e.code(),
            GatewayError::SchemaNotFound(_) => "schema_not_found",
            GatewayError::SchemaTooLarge { .. } => "schema_too_large",
            GatewayError::InvalidSchemaIdOrVersion => "invalid_schema_id_or_version",
            GatewayError::InvalidSchema(_) => "invalid_schema",
            GatewayError::InvalidArtifactRef => "invalid_artifact_ref",
            GatewayError::ArtifactNotFound(_) => "artifact_not_found",
            GatewayError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            GatewayError::Unauthorized => 401,
            GatewayError::PolicyDenied(_) => 403,
            GatewayError::PolicyNotFound(_)
            | GatewayError::RouteNotFound(_)
            | GatewayError::SchemaNotFound(_)
            | GatewayError::ArtifactNotFound(_) => 404,
            GatewayError::RequestTooLarge { .. } | GatewayError::SchemaTooLarge { .. } => 413,
            GatewayError::InvalidJson(_)
            | GatewayError::InvalidSchemaIdOrVersion
            | GatewayError::InvalidSchema(_)
            | GatewayError::InvalidArtifactRef => 400,
            GatewayError::Invoke(InvokeError::Timeout { .. }) => 504,
            GatewayError::Invoke(_) | GatewayError::Resolve(_) => 502,
            GatewayError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::Internal(err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(GatewayError::Unauthorized.status(), 401);
        assert_eq!(GatewayError::PolicyNotFound("p".into()).status(), 404);
        assert_eq!(GatewayError::from(InvokeError::Timeout { timeout_ms: 1 }).status(), 504);
        let too_large = GatewayError::from(InvokeError::ResponseTooLarge { limit: 1 });
        assert_eq!((too_large.code(), too_large.status()), ("response_too_large", 502));
        let missing = GatewayError::from(ResolveError::BindingMissing("b".into()));
        assert_eq!((missing.code(), missing.status()), ("binding_missing", 502));
        assert_eq!(GatewayError::SchemaTooLarge { limit: 1 }.status(), 413);
        assert_eq!(GatewayError::InvalidSchemaIdOrVersion.code(), "invalid_schema_id_or_version");
    }
}
