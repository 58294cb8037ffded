//! Data-node transforms
//!
//! A data node derives new values from the current scope. The derived object is
//! merged at the top level of the scope that downstream nodes see.

use crate::error::TransformError;
use crate::runtime::interpolate::{lookup_path, render};
use serde_json::{Map, Value};

/// Apply the transform described by a data node's `data` to `scope`.
///
/// Supported transforms:
/// - `map`: `{ "mapping": { "outKey": "path.in.scope" } }`
/// - `aggregate`: `{ "source": "items", "field": "amount", "operation": "sum", "output": "total" }`
/// - `format`: `{ "template": "Hi {{name}}", "output": "message" }`
pub fn apply(data: &Value, scope: &Value) -> Result<Map<String, Value>, TransformError> {
    let transform = data
        .get("transform")
        .and_then(Value::as_str)
        .ok_or(TransformError::MissingTransform)?;

    match transform {
        "map" => map(data, scope),
        "aggregate" => aggregate(data, scope),
        "format" => format(data, scope),
        other => Err(TransformError::UnknownTransform(other.to_string())),
    }
}

fn map(data: &Value, scope: &Value) -> Result<Map<String, Value>, TransformError> {
    let mapping = data
        .get("mapping")
        .and_then(Value::as_object)
        .ok_or(TransformError::MissingKey { transform: "map", key: "mapping" })?;

    Ok(mapping
        .iter()
        .map(|(out_key, path)| {
            let value = path
                .as_str()
                .and_then(|path| lookup_path(scope, path))
                .cloned()
                .unwrap_or(Value::Null);
            (out_key.clone(), value)
        })
        .collect())
}

fn aggregate(data: &Value, scope: &Value) -> Result<Map<String, Value>, TransformError> {
    let source = data
        .get("source")
        .and_then(Value::as_str)
        .ok_or(TransformError::MissingKey { transform: "aggregate", key: "source" })?;
    let operation = data.get("operation").and_then(Value::as_str).unwrap_or("count");
    let output = data.get("output").and_then(Value::as_str).unwrap_or(operation);
    let field = data.get("field").and_then(Value::as_str);

    let items = lookup_path(scope, source)
        .and_then(Value::as_array)
        .ok_or_else(|| TransformError::NotAnArray(source.to_string()))?;

    let numbers: Vec<f64> = items
        .iter()
        .filter_map(|item| match field {
            Some(field) => lookup_path(item, field),
            None => Some(item),
        })
        .filter_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .collect();

    let result = match operation {
        "count" => Value::from(items.len()),
        "sum" => number(numbers.iter().sum()),
        "avg" if numbers.is_empty() => Value::Null,
        "avg" => number(numbers.iter().sum::<f64>() / numbers.len() as f64),
        "min" => numbers.iter().copied().reduce(f64::min).map(number).unwrap_or(Value::Null),
        "max" => numbers.iter().copied().reduce(f64::max).map(number).unwrap_or(Value::Null),
        other => return Err(TransformError::UnknownOperation(other.to_string())),
    };

    let mut derived = Map::new();
    derived.insert(output.to_string(), result);
    Ok(derived)
}

fn format(data: &Value, scope: &Value) -> Result<Map<String, Value>, TransformError> {
    let template = data
        .get("template")
        .and_then(Value::as_str)
        .ok_or(TransformError::MissingKey { transform: "format", key: "template" })?;
    let output = data
        .get("output")
        .and_then(Value::as_str)
        .ok_or(TransformError::MissingKey { transform: "format", key: "output" })?;

    let mut derived = Map::new();
    derived.insert(output.to_string(), Value::String(render(template, scope)));
    Ok(derived)
}

/// Whole numbers stay integers so `{{total}}` renders as `30`, not `30.0`.
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}
