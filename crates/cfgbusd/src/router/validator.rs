//! Structural validation of envelopes and per-action payloads.

use serde_json::{Map, Value};
use thiserror::Error;

use super::registry::{ActionSpec, DataShape};

const ENVELOPE_KEYS: &[&str] = &["module", "action", "kind", "data", "errors"];
const KINDS: &[&str] = &["request", "reply", "notification"];

/// A validation failure pointing at the offending path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct ValidationError {
    path: String,
    message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Validation seam consulted by the router around every handler call.
pub trait SchemaValidator: Send + Sync {
    /// Checks the raw envelope before routing.
    fn validate_envelope(&self, envelope: &Value) -> Result<(), ValidationError>;

    /// Checks request data before the handler runs.
    fn validate_request(
        &self,
        spec: &ActionSpec,
        data: Option<&Value>,
    ) -> Result<(), ValidationError>;

    /// Checks the handler result before it is returned.
    fn validate_reply(&self, spec: &ActionSpec, data: &Value) -> Result<(), ValidationError>;
}

/// Default validator driven by each action's declared [`DataShape`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeValidator;

impl SchemaValidator for EnvelopeValidator {
    fn validate_envelope(&self, envelope: &Value) -> Result<(), ValidationError> {
        let object = envelope
            .as_object()
            .ok_or_else(|| ValidationError::new("$", "envelope must be an object"))?;
        if let Some(key) = object.keys().find(|key| !ENVELOPE_KEYS.contains(&key.as_str())) {
            return Err(ValidationError::new("$", format!("unexpected key '{key}'")));
        }
        for field in ["module", "action"] {
            require_string(object, field)?;
        }
        let kind = require_string(object, "kind")?;
        if !KINDS.contains(&kind) {
            return Err(ValidationError::new(
                "kind",
                format!("'{kind}' is not one of {KINDS:?}"),
            ));
        }
        if let Some(data) = object.get("data")
            && !data.is_object()
        {
            return Err(ValidationError::new("data", "must be an object"));
        }
        Ok(())
    }

    fn validate_request(
        &self,
        spec: &ActionSpec,
        data: Option<&Value>,
    ) -> Result<(), ValidationError> {
        match (&spec.request, data) {
            (None, None) => Ok(()),
            (None, Some(_)) => Err(ValidationError::new(
                "data",
                format!("action '{}' takes no data", spec.name),
            )),
            (Some(shape), Some(data)) => check_shape("data", shape, data),
            (Some(shape), None) if shape.required.is_empty() => Ok(()),
            (Some(_), None) => Err(ValidationError::new(
                "data",
                format!("action '{}' requires data", spec.name),
            )),
        }
    }

    fn validate_reply(&self, spec: &ActionSpec, data: &Value) -> Result<(), ValidationError> {
        check_shape("reply.data", &spec.reply, data)
    }
}

fn require_string<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a str, ValidationError> {
    match object.get(field) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ValidationError::new(field, "must be a string")),
        None => Err(ValidationError::new("$", format!("missing key '{field}'"))),
    }
}

fn check_shape(path: &str, shape: &DataShape, data: &Value) -> Result<(), ValidationError> {
    let object = data
        .as_object()
        .ok_or_else(|| ValidationError::new(path, "must be an object"))?;
    if let Some(missing) = shape.required.iter().find(|key| !object.contains_key(**key)) {
        return Err(ValidationError::new(path, format!("missing key '{missing}'")));
    }
    if let Some(unexpected) = object.keys().find(|key| !shape.allows(key)) {
        return Err(ValidationError::new(
            path,
            format!("unexpected key '{unexpected}'"),
        ));
    }
    Ok(())
}
