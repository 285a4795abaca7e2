use crate::GatewayError;

pub const MAX_ARTIFACT_REF_LEN: usize = 512;
const MAX_IDENT_LEN: usize = 128;

/// Rejects refs that could escape the artifact namespace.
pub fn validate_artifact_ref(raw: &str) -> Result<(), GatewayError> {
    let charset_ok = raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'));
    if raw.is_empty()
        || raw.len() > MAX_ARTIFACT_REF_LEN
        || raw.starts_with('/')
        || raw.contains("..")
        || !charset_ok
    {
        return Err(GatewayError::InvalidArtifactRef);
    }
    Ok(())
}

pub fn validate_schema_ident(schema_id: &str, version: &str) -> Result<(), GatewayError> {
    let ok = |s: &str| {
        !s.is_empty()
            && s.len() <= MAX_IDENT_LEN
            && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    };
    if ok(schema_id) && ok(version) {
        Ok(())
    } else {
        Err(GatewayError::InvalidSchemaIdOrVersion)
    }
}

pub fn schema_key(schema_id: &str, version: &str) -> String {
    format!("{schema_id}@{version}")
}

/// Splits `<schema_id>@<version>`.
pub fn parse_schema_ref(schema_ref: &str) -> Result<(&str, &str), GatewayError> {
    let (id, version) = schema_ref
        .split_once('@')
        .ok_or(GatewayError::InvalidSchemaIdOrVersion)?;
    validate_schema_ident(id, version)?;
    Ok((id, version))
}
