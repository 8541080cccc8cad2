//! Bracket-name helpers for nested form values.
//!
//! Element names like `link[2][url]` address nested values. Submitted data is
//! kept as JSON objects keyed by string segments, so `link[2][url]` lives at
//! `values["link"]["2"]["url"]`.

use serde_json::{Map, Value};

/// Split an element name into its path segments.
///
/// `a[b][]` yields `["a", "b", ""]`. Names with unbalanced brackets are
/// treated as a single plain segment.
pub fn split_name(name: &str) -> Vec<&str> {
    let Some(open) = name.find('[') else {
        return vec![name];
    };
    if open == 0 {
        return vec![name];
    }

    let mut segments = vec![&name[..open]];
    let mut rest = &name[open..];
    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return vec![name];
        };
        let Some(close) = inner.find(']') else {
            return vec![name];
        };
        segments.push(&inner[..close]);
        rest = &inner[close + 1..];
    }
    segments
}

/// Base name of an element: the part before the first `[`.
pub fn base_name(name: &str) -> &str {
    split_name(name).first().copied().unwrap_or(name)
}

/// Look up the value stored under a bracketed name.
pub fn lookup<'a>(values: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    if let Some(direct) = values.get(name) {
        return Some(direct);
    }
    let segments = split_name(name);
    let (first, rest) = segments.split_first()?;
    let mut current = values.get(*first)?;
    for segment in rest {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Store a value under a bracketed name, creating intermediate objects.
///
/// An empty segment (`name[]`) appends at the next free index. Scalars in the
/// way are replaced by objects.
pub fn insert(values: &mut Map<String, Value>, name: &str, value: Value) {
    let segments = split_name(name);
    insert_segments(values, &segments, value);
}

fn insert_segments(values: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let key = if first.is_empty() {
        next_index(values)
    } else {
        (*first).to_string()
    };

    if rest.is_empty() {
        values.insert(key, value);
        return;
    }

    let slot = values
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(child) = slot {
        insert_segments(child, rest, value);
    }
}

fn next_index(values: &Map<String, Value>) -> String {
    values
        .keys()
        .filter_map(|k| k.parse::<usize>().ok())
        .max()
        .map_or(0, |max| max + 1)
        .to_string()
}

/// Recursively merge `source` into `target`; `source` wins on conflicts.
pub fn merge(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, incoming) in source {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge(existing, nested),
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Parse url-encoded `key=value` pairs into nested values.
pub fn parse_urlencoded(input: &str) -> Map<String, Value> {
    let mut values = Map::new();
    let trimmed = input.strip_prefix('?').unwrap_or(input);
    for (key, value) in url::form_urlencoded::parse(trimmed.as_bytes()) {
        insert(&mut values, &key, Value::String(value.into_owned()));
    }
    values
}

/// Whether a submitted value counts as "pressed"/"set" (non-empty, not `0`).
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !super::param::is_php_empty(s),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
