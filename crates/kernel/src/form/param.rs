//! Parameter types and scalar value cleaning.
//!
//! Every submitted field is cleaned with exactly one [`ParamType`]. Cleaning is
//! idempotent: cleaning an already cleaned value with the same type returns it
//! unchanged.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::error::FormError;

/// Leading numeric prefix of a float literal.
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static FLOAT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?").expect("valid regex literal")
});

/// Any markup tag, including unterminated nesting like `<<b>`.
#[allow(clippy::expect_used)]
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex literal"));

#[allow(clippy::expect_used)]
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$")
        .expect("valid regex literal")
});

#[allow(clippy::expect_used)]
static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(_[a-z][a-z0-9_]*)?[a-z0-9]$").expect("valid regex literal")
});

#[allow(clippy::expect_used)]
static PLUGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*[a-z0-9]$").expect("valid regex literal"));

#[allow(clippy::expect_used)]
static DOT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\.+").expect("valid regex literal"));

#[allow(clippy::expect_used)]
static SLASH_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"//+").expect("valid regex literal"));

#[allow(clippy::expect_used)]
static DOT_SEGMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\./)+").expect("valid regex literal"));

/// Cleaning rule applied to one submitted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// Integer; malformed input cleans to `0`.
    Int,
    /// Floating point number; malformed input cleans to `0`.
    Float,
    /// `0` or `1`; accepts `on/off`, `yes/no`, `true/false`.
    Bool,
    /// ASCII letters only.
    Alpha,
    /// ASCII letters, `_` and `-`.
    AlphaExt,
    /// ASCII letters and digits.
    AlphaNum,
    /// ASCII letters, digits, `_` and `-`.
    AlphaNumExt,
    /// Digits and commas.
    Sequence,
    /// Plain text, markup stripped.
    Text,
    /// Like `Text`, for values that are never shown as rich text.
    NoTags,
    /// HTML cleaned against the default allow-list.
    CleanHtml,
    /// No cleaning at all.
    Raw,
    /// No cleaning apart from trimming whitespace.
    RawTrimmed,
    /// A single file name.
    File,
    /// A relative or absolute path without traversal segments.
    Path,
    /// Directory name safe for the filesystem.
    SafeDir,
    /// Path made of safe directory names.
    SafePath,
    /// Absolute http(s)/ftp url or site-relative url.
    Url,
    /// Email address; invalid input cleans to an empty string.
    Email,
    /// Plugin name inside a component (`forum`).
    Plugin,
    /// Frankenstyle component name (`mod_forum`).
    Component,
}

impl ParamType {
    /// Whether values of this type may be displayed right-to-left.
    ///
    /// Everything except free text is forced left-to-right.
    pub fn is_rtl_compatible(self) -> bool {
        matches!(self, ParamType::Text)
    }

    /// Get the type name as a string.
    pub fn name(self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::Alpha => "alpha",
            ParamType::AlphaExt => "alphaext",
            ParamType::AlphaNum => "alphanum",
            ParamType::AlphaNumExt => "alphanumext",
            ParamType::Sequence => "sequence",
            ParamType::Text => "text",
            ParamType::NoTags => "notags",
            ParamType::CleanHtml => "cleanhtml",
            ParamType::Raw => "raw",
            ParamType::RawTrimmed => "raw_trimmed",
            ParamType::File => "file",
            ParamType::Path => "path",
            ParamType::SafeDir => "safedir",
            ParamType::SafePath => "safepath",
            ParamType::Url => "url",
            ParamType::Email => "email",
            ParamType::Plugin => "plugin",
            ParamType::Component => "component",
        }
    }
}

/// Clean one scalar value.
///
/// Composite values (arrays, objects) are a programming error here; callers
/// resolve per-key types first, see [`super::sanitize`].
pub fn clean_param(value: &Value, param: ParamType) -> Result<Value, FormError> {
    if value.is_array() || value.is_object() {
        return Err(FormError::Coding(format!(
            "clean_param() can not process composite values as {}",
            param.name()
        )));
    }

    if param == ParamType::Raw {
        return Ok(value.clone());
    }

    let raw = scalar_to_string(value);
    Ok(clean_str(&raw, param))
}

/// String form of a scalar JSON value, the way it arrived over HTTP.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) | Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => String::new(),
    }
}

fn clean_str(raw: &str, param: ParamType) -> Value {
    match param {
        ParamType::Int => Value::Number(parse_int_prefix(raw).into()),
        ParamType::Float => {
            let parsed = FLOAT_PREFIX
                .find(raw)
                .and_then(|m| m.as_str().trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(0.0);
            Number::from_f64(parsed).map_or(Value::Null, Value::Number)
        }
        ParamType::Bool => {
            let lowered = raw.trim().to_ascii_lowercase();
            let flag = match lowered.as_str() {
                "on" | "yes" | "true" => 1,
                "off" | "no" | "false" => 0,
                _ if is_php_empty(raw) => 0,
                _ => 1,
            };
            Value::Number(flag.into())
        }
        ParamType::Alpha => keep(raw, |c| c.is_ascii_alphabetic()),
        ParamType::AlphaExt => keep(raw, |c| c.is_ascii_alphabetic() || c == '_' || c == '-'),
        ParamType::AlphaNum => keep(raw, |c| c.is_ascii_alphanumeric()),
        ParamType::AlphaNumExt => {
            keep(raw, |c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        ParamType::Sequence => keep(raw, |c| c.is_ascii_digit() || c == ','),
        ParamType::Text | ParamType::NoTags => {
            Value::String(TAG.replace_all(raw, "").into_owned())
        }
        ParamType::CleanHtml => Value::String(ammonia::clean(raw)),
        ParamType::Raw => Value::String(raw.to_string()),
        ParamType::RawTrimmed => Value::String(raw.trim().to_string()),
        ParamType::File => {
            let cleaned: String = raw
                .chars()
                .filter(|c| !c.is_control() && !"/\\:*?\"<>|".contains(*c))
                .collect();
            if cleaned == "." || cleaned == ".." {
                Value::String(String::new())
            } else {
                Value::String(cleaned)
            }
        }
        ParamType::Path => Value::String(clean_path(raw)),
        ParamType::SafeDir => keep(raw, |c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        ParamType::SafePath => keep(raw, |c| {
            c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '/'
        }),
        ParamType::Url => {
            let trimmed = raw.trim();
            if is_acceptable_url(trimmed) {
                Value::String(trimmed.to_string())
            } else {
                Value::String(String::new())
            }
        }
        ParamType::Email => {
            let trimmed = raw.trim();
            if EMAIL.is_match(trimmed) {
                Value::String(trimmed.to_string())
            } else {
                Value::String(String::new())
            }
        }
        ParamType::Plugin => {
            if PLUGIN.is_match(raw) && !raw.contains("__") {
                Value::String(raw.to_string())
            } else {
                Value::String(String::new())
            }
        }
        ParamType::Component => {
            if COMPONENT.is_match(raw) && !raw.contains("__") {
                Value::String(raw.to_string())
            } else {
                Value::String(String::new())
            }
        }
    }
}

fn keep(raw: &str, allowed: impl Fn(char) -> bool) -> Value {
    Value::String(raw.chars().filter(|c| allowed(*c)).collect())
}

/// Integer prefix of a string: optional whitespace, sign, digits.
fn parse_int_prefix(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let Ok(magnitude) = digits[..end].parse::<i64>() else {
        return 0;
    };
    if negative { -magnitude } else { magnitude }
}

/// PHP `empty()` for a submitted string: `""` and `"0"`.
pub(crate) fn is_php_empty(raw: &str) -> bool {
    raw.is_empty() || raw == "0"
}

fn clean_path(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let filtered: String = unified
        .chars()
        .filter(|c| !c.is_control() && !":*?\"<>|".contains(*c))
        .collect();
    let no_dots = DOT_RUN.replace_all(&filtered, "");
    let single_slashes = SLASH_RUN.replace_all(&no_dots, "/");
    DOT_SEGMENTS.replace_all(&single_slashes, "/").into_owned()
}

fn is_acceptable_url(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
        return false;
    }
    if candidate.starts_with('/') && !candidate.starts_with("//") {
        return true;
    }
    match url::Url::parse(candidate) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https" | "ftp"),
        Err(_) => false,
    }
}
