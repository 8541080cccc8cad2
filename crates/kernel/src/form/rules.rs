//! Built-in validation rules.
//!
//! Each rule checks one sanitized value on the server and can emit the
//! matching client-side check for the generated validation script.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::param::scalar_to_string;
use super::values;

#[allow(clippy::expect_used)]
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$")
        .expect("valid regex literal")
});

#[allow(clippy::expect_used)]
static LETTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z]+$").expect("valid regex literal"));

#[allow(clippy::expect_used)]
static ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("valid regex literal"));

#[allow(clippy::expect_used)]
static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^-?\d\d*\.\d*$)|(^-?\d\d*$)|(^-?\.\d\d*$)").expect("valid regex literal")
});

#[allow(clippy::expect_used)]
static NO_PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[^()./*^?#!@$%+=,"'><~\[\]{}]+$"#).expect("valid regex literal")
});

#[allow(clippy::expect_used)]
static NON_ZERO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?[1-9][0-9]*").expect("valid regex literal"));

/// Markup tags; `img`, `canvas` and `hr` count as content for `Required`.
#[allow(clippy::expect_used)]
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)</?([a-z0-9]*)[^>]*>").expect("valid regex literal"));

/// Compiled `Rule::Regex` patterns, keyed by source.
static PATTERNS: LazyLock<RwLock<HashMap<String, Regex>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Compile `pattern` once per process.
fn compiled(pattern: &str) -> Result<Regex, regex::Error> {
    if let Some(re) = PATTERNS.read().get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    PATTERNS.write().insert(pattern.to_string(), re.clone());
    Ok(re)
}

/// Where a rule runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAt {
    #[default]
    Server,
    /// Server and the generated client script.
    Client,
}

/// Comparison used by [`Rule::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn js(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Neq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }

    fn holds(self, left: &str, right: &str) -> bool {
        match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
            (Ok(l), Ok(r)) if !matches!(self, CompareOp::Eq | CompareOp::Neq) => match self {
                CompareOp::Gt => l > r,
                CompareOp::Gte => l >= r,
                CompareOp::Lt => l < r,
                _ => l <= r,
            },
            _ => match self {
                CompareOp::Eq => left == right,
                CompareOp::Neq => left != right,
                CompareOp::Gt => left > right,
                CompareOp::Gte => left >= right,
                CompareOp::Lt => left < right,
                CompareOp::Lte => left <= right,
            },
        }
    }
}

/// A built-in validation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    Required,
    MaxLength { max: usize },
    MinLength { min: usize },
    RangeLength { min: usize, max: usize },
    /// Inclusive numeric range; either bound may be open.
    NumericRange { min: Option<f64>, max: Option<f64> },
    Regex { pattern: String },
    Email,
    LettersOnly,
    AlphaNumeric,
    Numeric,
    NoPunctuation,
    NonZero,
    /// Compare against another element's value.
    Compare { other: String, operator: CompareOp },
}

impl Rule {
    pub fn required() -> Self {
        Rule::Required
    }

    pub fn max_length(max: usize) -> Self {
        Rule::MaxLength { max }
    }

    pub fn min_length(min: usize) -> Self {
        Rule::MinLength { min }
    }

    pub fn range_length(min: usize, max: usize) -> Self {
        Rule::RangeLength { min, max }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Rule::Regex {
            pattern: pattern.into(),
        }
    }

    pub fn compare(other: impl Into<String>, operator: CompareOp) -> Self {
        Rule::Compare {
            other: other.into(),
            operator,
        }
    }

    /// Rule name as used in messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Required => "required",
            Rule::MaxLength { .. } => "maxlength",
            Rule::MinLength { .. } => "minlength",
            Rule::RangeLength { .. } => "rangelength",
            Rule::NumericRange { .. } => "numericrange",
            Rule::Regex { .. } => "regex",
            Rule::Email => "email",
            Rule::LettersOnly => "lettersonly",
            Rule::AlphaNumeric => "alphanumeric",
            Rule::Numeric => "numeric",
            Rule::NoPunctuation => "nopunctuation",
            Rule::NonZero => "nonzero",
            Rule::Compare { .. } => "compare",
        }
    }

    /// Check the rule's own arguments.
    pub fn check_arguments(&self) -> Result<(), String> {
        match self {
            Rule::RangeLength { min, max } if min > max => {
                Err(format!("minimum {min} is larger than maximum {max}"))
            }
            Rule::NumericRange {
                min: Some(min),
                max: Some(max),
            } if min > max => Err(format!("minimum {min} is larger than maximum {max}")),
            Rule::Regex { pattern } => compiled(pattern).map(|_| ()).map_err(|e| e.to_string()),
            Rule::Compare { other, .. } if other.is_empty() => {
                Err("no element to compare with".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Message used when the form author gives none.
    pub fn default_message(&self) -> String {
        match self {
            Rule::Required => "You must supply a value here.".to_string(),
            Rule::MaxLength { max } => format!("Maximum of {max} characters"),
            Rule::MinLength { min } => format!("You must enter at least {min} characters here."),
            Rule::RangeLength { min, max } => {
                format!("You must enter between {min} and {max} characters here.")
            }
            Rule::NumericRange { min, max } => match (min, max) {
                (Some(min), Some(max)) => {
                    format!("You must enter a number between {min} and {max} here.")
                }
                (Some(min), None) => format!("You must enter a number of at least {min} here."),
                (None, Some(max)) => format!("You must enter a number of at most {max} here."),
                (None, None) => "You must enter a number here.".to_string(),
            },
            Rule::Regex { .. } => "The value is not in the expected format.".to_string(),
            Rule::Email => "You must enter a valid email address here.".to_string(),
            Rule::LettersOnly => "You must enter only letters here.".to_string(),
            Rule::AlphaNumeric => "You must enter only letters or numbers here.".to_string(),
            Rule::Numeric => "You must enter a number here.".to_string(),
            Rule::NoPunctuation => "You must enter no punctuation characters here.".to_string(),
            Rule::NonZero => "You must enter a number not starting with a 0 here.".to_string(),
            Rule::Compare { .. } => "The values do not match.".to_string(),
        }
    }

    /// Validate one value. `values` is the whole submission, for `Compare`.
    pub fn check(&self, value: Option<&Value>, values: &Map<String, Value>) -> bool {
        match self {
            Rule::Required => value.is_some_and(has_content),
            Rule::MaxLength { max } => text_len(value) <= *max,
            Rule::MinLength { min } => text_len(value) >= *min,
            Rule::RangeLength { min, max } => {
                let len = text_len(value);
                len >= *min && len <= *max
            }
            Rule::NumericRange { min, max } => {
                let Ok(number) = text(value).trim().parse::<f64>() else {
                    return false;
                };
                min.is_none_or(|min| number >= min) && max.is_none_or(|max| number <= max)
            }
            Rule::Regex { pattern } => {
                compiled(pattern).is_ok_and(|re| re.is_match(&text(value)))
            }
            Rule::Email => EMAIL.is_match(&text(value)),
            Rule::LettersOnly => LETTERS.is_match(&text(value)),
            Rule::AlphaNumeric => ALPHANUMERIC.is_match(&text(value)),
            Rule::Numeric => NUMERIC.is_match(&text(value)),
            Rule::NoPunctuation => NO_PUNCTUATION.is_match(&text(value)),
            Rule::NonZero => NON_ZERO.is_match(&text(value)),
            Rule::Compare { other, operator } => {
                let theirs = values::lookup(values, other).map(scalar_to_string);
                operator.holds(&text(value), &theirs.unwrap_or_default())
            }
        }
    }

    /// Client-side check for `element`.
    ///
    /// Produces a JS fragment for the body of the element's validation
    /// function; it appends `message` to `_qfMsg` when the check fails.
    pub fn client_script(&self, element: &str, message: &str) -> String {
        let field = format!("frm.elements['{}']", js_escape(element));
        let failing = match self {
            Rule::Required => "value == ''".to_string(),
            Rule::MaxLength { max } => format!("value != '' && value.length > {max}"),
            Rule::MinLength { min } => format!("value != '' && value.length < {min}"),
            Rule::RangeLength { min, max } => {
                format!("value != '' && (value.length < {min} || value.length > {max})")
            }
            Rule::NumericRange { min, max } => {
                let mut checks = vec!["isNaN(parseFloat(value))".to_string()];
                if let Some(min) = min {
                    checks.push(format!("parseFloat(value) < {min}"));
                }
                if let Some(max) = max {
                    checks.push(format!("parseFloat(value) > {max}"));
                }
                format!("value != '' && ({})", checks.join(" || "))
            }
            Rule::Regex { pattern } => regex_check(pattern),
            Rule::Email => regex_check(EMAIL.as_str()),
            Rule::LettersOnly => regex_check(LETTERS.as_str()),
            Rule::AlphaNumeric => regex_check(ALPHANUMERIC.as_str()),
            Rule::Numeric => regex_check(NUMERIC.as_str()),
            Rule::NoPunctuation => regex_check(NO_PUNCTUATION.as_str()),
            Rule::NonZero => regex_check(NON_ZERO.as_str()),
            Rule::Compare { other, operator } => format!(
                "value != '' && !(value {} frm.elements['{}'].value)",
                operator.js(),
                js_escape(other)
            ),
        };
        let key = js_escape(element);
        format!(
            "  value = {field} ? {field}.value : '';\n  \
             if ({failing} && !errFlag['{key}']) {{\n    \
             errFlag['{key}'] = true;\n    \
             _qfMsg = _qfMsg + '\\n - {message}';\n  \
             }}\n",
            message = js_escape(message),
        )
    }
}

fn regex_check(pattern: &str) -> String {
    format!("value != '' && !/{}/.test(value)", pattern.replace('/', "\\/"))
}

/// Escape a string for a single-quoted JS literal.
pub fn js_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\r' => escaped.push_str("\\r"),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn text(value: Option<&Value>) -> String {
    value.map(scalar_to_string).unwrap_or_default()
}

fn text_len(value: Option<&Value>) -> usize {
    text(value).chars().count()
}

/// Whether a value has visible content.
///
/// Lists count when their joined items do; editor values are checked
/// through their `text` key. Markup other than images, canvases and rules
/// is ignored, as is whitespace.
pub fn has_content(value: &Value) -> bool {
    let joined = match value {
        Value::Object(map) => match map.get("text") {
            Some(text) => scalar_to_string(text),
            None => map.values().map(flatten).collect(),
        },
        Value::Array(items) => items.iter().map(flatten).collect(),
        scalar => scalar_to_string(scalar),
    };

    let without_tags = TAG.replace_all(&joined, |caps: &regex::Captures<'_>| {
        let tag = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
        if matches!(tag.as_str(), "img" | "canvas" | "hr") {
            caps[0].to_string()
        } else {
            String::new()
        }
    });
    let visible = without_tags.replace("&nbsp;", "").replace('\u{a0}', "");
    visible.chars().any(|c| !c.is_whitespace())
}

fn flatten(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(flatten).collect(),
        Value::Object(map) => map.values().map(flatten).collect(),
        scalar => scalar_to_string(scalar),
    }
}
