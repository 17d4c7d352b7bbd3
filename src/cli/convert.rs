//! JSON to EQL value conversion for command-line variables

use std::str::FromStr;

use rust_decimal::Decimal;

use super::CliError;
use crate::{Object, Value, Variables};

/// Convert serde_json::Value to an untyped EQL Value. Objects become
/// `Input` objects; non-integral numbers become decimals.
pub fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInteger(u)
            } else {
                let text = n.to_string();
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map(Value::Decimal)
                    .unwrap_or_else(|_| Value::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(arr) => Value::List(arr.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(obj) => {
            let mut object = Object::new("Input");
            for (k, v) in obj {
                object.fields.insert(k, json_to_value(v));
            }
            Value::Object(object)
        }
    }
}

/// Parse `--vars` JSON into request variables.
pub fn variables_from_json(json: &str) -> Result<Variables, CliError> {
    match serde_json::from_str(json)? {
        serde_json::Value::Object(obj) => Ok(obj
            .into_iter()
            .map(|(name, value)| (name, json_to_value(value)))
            .collect()),
        _ => Err(CliError::InvalidVariables),
    }
}
