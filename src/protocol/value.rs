//! Typed extraction from JSON payloads.
//!
//! Payloads are arbitrary JSON. Code that needs a specific field goes through
//! [`ValueExt`] so a type mismatch becomes a [`GatewayError::Protocol`] that
//! names the field, instead of a silent default.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{GatewayError, Result};

/// Field accessors on a JSON object.
pub trait ValueExt {
    /// Required string field.
    fn str_field(&self, key: &str) -> Result<&str>;

    /// Optional string field; present but non-string is an error.
    fn opt_str_field(&self, key: &str) -> Result<Option<&str>>;
}

impl ValueExt for Value {
    fn str_field(&self, key: &str) -> Result<&str> {
        self.opt_str_field(key)?
            .ok_or_else(|| GatewayError::Protocol(format!("missing field `{key}`")))
    }

    fn opt_str_field(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(key, "string", other)),
        }
    }
}

/// Deserialize a payload into `T`, mapping failures to protocol errors.
pub fn decode_payload<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| GatewayError::Protocol(format!("unexpected payload shape: {e}")))
}

/// JSON type name of a value, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(key: &str, expected: &str, found: &Value) -> GatewayError {
    GatewayError::Protocol(format!(
        "field `{key}`: expected {expected}, found {}",
        type_name(found)
    ))
}
