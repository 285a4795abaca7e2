use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SchemaError;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    AllErrors,
    /// Stop at the first failing keyword.
    FirstFailure,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub instance_location: String,
    pub keyword: String,
    pub keyword_location: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<SchemaViolation>,
}

/// Draft 2019-09 with format assertions on.
pub fn compile(schema: &Value) -> Result<Validator, SchemaError> {
    jsonschema::options()
        .with_draft(Draft::Draft201909)
        .should_validate_formats(true)
        .build(schema)
        .map_err(|err| SchemaError::Invalid(err.to_string()))
}

pub(crate) fn run(validator: &Validator, instance: &Value, mode: ValidationMode) -> ValidationReport {
    let errors = validator.iter_errors(instance).map(|err| {
        let keyword_location = err.schema_path.to_string();
        let keyword = keyword_location
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        SchemaViolation {
            instance_location: err.instance_path.to_string(),
            keyword,
            keyword_location,
            message: err.to_string(),
        }
    });
    let errors: Vec<SchemaViolation> = match mode {
        ValidationMode::AllErrors => errors.collect(),
        ValidationMode::FirstFailure => errors.take(1).collect(),
    };
    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}
