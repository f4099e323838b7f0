//! Argument preparation for tool calls: schema defaults, then validation.
use jsonschema::JSONSchema;
use serde_json::{Map, Value};

use crate::errors::{AgentError, AgentResult};

const MAX_REPORTED_ERRORS: usize = 3;

/// Fill in top-level `properties.*.default` values the model left out.
///
/// A missing or `null` arguments value is treated as an empty object so that
/// a tool whose parameters all have defaults can be called with no arguments.
pub fn apply_defaults(schema: &Value, arguments: Value) -> Value {
    let mut arguments = match arguments {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };

    let (Some(properties), Some(object)) = (
        schema.get("properties").and_then(|p| p.as_object()),
        arguments.as_object_mut(),
    ) else {
        return arguments;
    };

    for (name, property) in properties {
        if let Some(default) = property.get("default") {
            if default.is_null() {
                continue;
            }
            let missing = object.get(name).map_or(true, |v| v.is_null());
            if missing {
                object.insert(name.clone(), default.clone());
            }
        }
    }
    arguments
}

/// Validate arguments against the tool's parameter schema
pub fn validate(schema: &Value, arguments: &Value) -> AgentResult<()> {
    if !schema.is_object() {
        return Ok(());
    }

    let compiled = match JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(e) => {
            tracing::warn!("invalid tool schema, skipping validation: {}", e);
            return Ok(());
        }
    };

    if let Err(errors) = compiled.validate(arguments) {
        let messages: Vec<String> = errors
            .take(MAX_REPORTED_ERRORS)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{} at {}", err, path)
                }
            })
            .collect();
        return Err(AgentError::InvalidParameters(format!(
            "Tool arguments failed schema validation: {}",
            messages.join("; ")
        )));
    }
    Ok(())
}

/// Apply defaults and validate, returning the arguments a tool should run with
pub fn prepare_arguments(schema: &Value, arguments: Value) -> AgentResult<Value> {
    let arguments = apply_defaults(schema, arguments);
    validate(schema, &arguments)?;
    Ok(arguments)
}
