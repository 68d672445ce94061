// Manifest wrapper
//
// Users submit the template body as YAML (the `spec` of a WorkflowTemplate).
// The cluster store wants the full resource envelope, so the body is wrapped
// before validation and before every create/update call.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use thiserror::Error;

pub const API_VERSION: &str = "argoproj.io/v1alpha1";
pub const KIND: &str = "WorkflowTemplate";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid YAML: {0}")]
    Parse(String),

    #[error("manifest must be a mapping at the top level")]
    NotAMapping,

    #[error("manifest is invalid: {0}")]
    Invalid(String),
}

fn parse_body(body: &str) -> Result<Value, ManifestError> {
    let value: Value =
        serde_yaml::from_str(body).map_err(|e| ManifestError::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(ManifestError::NotAMapping);
    }
    Ok(value)
}

/// Wrap a template body into the resource envelope accepted by the cluster
/// store. Output is JSON with sorted keys, so equal bodies give equal bytes.
pub fn wrap(body: &str) -> Result<Vec<u8>, ManifestError> {
    let spec = parse_body(body)?;
    let envelope = json!({
        "apiVersion": API_VERSION,
        "kind": KIND,
        "metadata": {},
        "spec": spec,
    });
    serde_json::to_vec(&envelope).map_err(|e| ManifestError::Parse(e.to_string()))
}

/// Declared parameters (`arguments.parameters[]`) as name -> default value.
pub fn extract_parameters(body: &str) -> Result<BTreeMap<String, String>, ManifestError> {
    let spec = parse_body(body)?;

    let parameters = spec
        .get("arguments")
        .and_then(|args| args.get("parameters"))
        .and_then(Value::as_array);

    let mut result = BTreeMap::new();
    for parameter in parameters.into_iter().flatten() {
        let Some(name) = parameter.get("name").and_then(Value::as_str) else {
            continue;
        };
        let value = match parameter.get("value") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(other) => other.to_string(),
        };
        result.insert(name.to_string(), value);
    }

    Ok(result)
}

/// Pass/fail oracle for wrapped manifests.
pub trait ManifestValidator: Send + Sync {
    fn validate(&self, envelope: &[u8]) -> Result<(), ManifestError>;
}

/// Checks the shape the workflow engine needs before it will accept a
/// template: an entrypoint naming one of a non-empty list of templates.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralValidator;

impl ManifestValidator for StructuralValidator {
    fn validate(&self, envelope: &[u8]) -> Result<(), ManifestError> {
        let envelope: Value =
            serde_json::from_slice(envelope).map_err(|e| ManifestError::Parse(e.to_string()))?;
        let spec = envelope
            .get("spec")
            .filter(|s| s.is_object())
            .ok_or(ManifestError::NotAMapping)?;

        let entrypoint = spec
            .get("entrypoint")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ManifestError::Invalid("spec.entrypoint is required".into()))?;

        let templates = spec
            .get("templates")
            .and_then(Value::as_array)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ManifestError::Invalid("spec.templates must list at least one template".into())
            })?;

        let declared = templates
            .iter()
            .filter_map(|t| t.get("name").and_then(Value::as_str))
            .any(|name| name == entrypoint);
        if !declared {
            return Err(ManifestError::Invalid(format!(
                "entrypoint {} does not name a template",
                entrypoint
            )));
        }

        Ok(())
    }
}
