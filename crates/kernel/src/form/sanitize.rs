//! Type resolution and sanitizing of submitted values.
//!
//! A field's declared [`ParamType`] applies to its whole value. When a value is
//! composite (an array or keyed map, e.g. repeated elements), each key can
//! carry its own declaration under `name[key]`; keys without one inherit the
//! parent's type.

use std::collections::BTreeMap;

use serde_json::Value;

use super::error::FormError;
use super::param::{ParamType, clean_param};

/// Declared types keyed by element name (`foo`, `foo[0]`, `foo[0][bar]`).
pub type TypeTable = BTreeMap<String, ParamType>;

/// Cleaning plan for one value, mirroring the value's shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanType {
    /// Clean a scalar with one type.
    Param(ParamType),
    /// Clean each key of a composite value with its own plan.
    Nested(BTreeMap<String, CleanType>),
}

/// Resolve the cleaning plan for `value` submitted under `name`.
pub fn resolve_clean_type(
    types: &TypeTable,
    name: &str,
    value: &Value,
    default: ParamType,
) -> CleanType {
    let own = types.get(name).copied().unwrap_or(default);
    match value {
        Value::Object(map) => CleanType::Nested(
            map.iter()
                .map(|(key, sub)| (key.clone(), resolve_child(types, name, key, sub, own)))
                .collect(),
        ),
        Value::Array(items) => CleanType::Nested(
            items
                .iter()
                .enumerate()
                .map(|(index, sub)| {
                    let key = index.to_string();
                    let plan = resolve_child(types, name, &key, sub, own);
                    (key, plan)
                })
                .collect(),
        ),
        _ => CleanType::Param(own),
    }
}

fn resolve_child(
    types: &TypeTable,
    parent: &str,
    key: &str,
    value: &Value,
    inherited: ParamType,
) -> CleanType {
    let child = format!("{parent}[{key}]");
    let declared = types.get(&child).copied().unwrap_or(inherited);
    if value.is_array() || value.is_object() {
        resolve_clean_type(types, &child, value, declared)
    } else {
        CleanType::Param(declared)
    }
}

/// Apply a cleaning plan to a value.
///
/// The plan and the value must have the same shape; a mismatch means the
/// plan was built for a different value and is reported as a coding error.
pub fn reconcile(value: &Value, plan: &CleanType) -> Result<Value, FormError> {
    match (plan, value) {
        (CleanType::Param(param), scalar) if !scalar.is_array() && !scalar.is_object() => {
            clean_param(scalar, *param)
        }
        (CleanType::Nested(plans), Value::Object(map)) => {
            let mut cleaned = map.clone();
            for (key, sub_plan) in plans {
                if let Some(sub) = map.get(key) {
                    cleaned.insert(key.clone(), reconcile(sub, sub_plan)?);
                }
            }
            Ok(Value::Object(cleaned))
        }
        (CleanType::Nested(plans), Value::Array(items)) => {
            let mut cleaned = items.clone();
            for (key, sub_plan) in plans {
                let Ok(index) = key.parse::<usize>() else {
                    return Err(FormError::Coding(format!(
                        "unexpected key '{key}' in cleaning plan for a list value"
                    )));
                };
                if let Some(sub) = items.get(index) {
                    cleaned[index] = reconcile(sub, sub_plan)?;
                }
            }
            Ok(Value::Array(cleaned))
        }
        _ => Err(FormError::Coding(
            "unexpected type or value received while cleaning a submitted value".to_string(),
        )),
    }
}

/// Clean the value submitted under `name` with its declared type(s).
pub fn sanitize(
    types: &TypeTable,
    name: &str,
    value: &Value,
    default: ParamType,
) -> Result<Value, FormError> {
    let plan = resolve_clean_type(types, name, value, default);
    reconcile(value, &plan)
}
