//! JSON output for query results.
//!
//! Records keep their field order, enums print their member name when it is
//! known and fall back to the numeric value, and identifiers and dates print
//! as strings.
//!
//! # Examples
//!
//! ```
//! use eql_lang::Value;
//! use eql_lang::output::{to_json, to_json_pretty};
//!
//! let value = Value::Integer(42);
//! assert_eq!(to_json(&value), "42");
//! assert_eq!(to_json_pretty(&value), "42");
//! ```

use serde_json::{Map, Number};

use crate::{schema::Schema, value::Value};

pub struct JsonPrinter<'s> {
    pretty: bool,
    schema: Option<&'s Schema>,
}

impl<'s> JsonPrinter<'s> {
    pub fn new(pretty: bool) -> Self {
        JsonPrinter {
            pretty,
            schema: None,
        }
    }

    /// Uses `schema` to name enum values that carry only their number.
    pub fn with_schema(mut self, schema: &'s Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn print(&self, value: &Value) -> String {
        let json = self.convert(value);
        let text = if self.pretty {
            serde_json::to_string_pretty(&json)
        } else {
            serde_json::to_string(&json)
        };
        // Serializing a serde_json::Value cannot fail
        text.unwrap_or_default()
    }

    pub fn convert(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::Number((*n).into()),
            Value::UInteger(n) => serde_json::Value::Number((*n).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal(d) => {
                let text = d.normalize().to_string();
                match text.parse::<Number>() {
                    Ok(n) => serde_json::Value::Number(n),
                    Err(_) => serde_json::Value::String(text),
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Guid(g) => serde_json::Value::String(g.to_string()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Value::Enum(e) => {
                let name = e.name.clone().or_else(|| {
                    self.schema
                        .and_then(|s| s.get_enum(&e.type_name))
                        .and_then(|t| t.name_of(e.value))
                        .map(str::to_string)
                });
                match name {
                    Some(name) => serde_json::Value::String(name),
                    None => serde_json::Value::Number(e.value.into()),
                }
            }
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.convert(v)).collect())
            }
            Value::Object(o) => serde_json::Value::Object(
                o.fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.convert(v)))
                    .collect::<Map<_, _>>(),
            ),
            Value::Record(r) => serde_json::Value::Object(
                r.iter()
                    .map(|(k, v)| (k.to_string(), self.convert(v)))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

/// Converts a value to a `serde_json::Value`.
pub fn to_json_value(value: &Value, schema: Option<&Schema>) -> serde_json::Value {
    let printer = JsonPrinter::new(false);
    match schema {
        Some(schema) => printer.with_schema(schema).convert(value),
        None => printer.convert(value),
    }
}

/// Compact JSON text.
pub fn to_json(value: &Value) -> String {
    JsonPrinter::new(false).print(value)
}

/// JSON text indented by two spaces.
pub fn to_json_pretty(value: &Value) -> String {
    JsonPrinter::new(true).print(value)
}
