//! Type-aware value coercion.
//!
//! Every parser here is total: malformed input yields `None` ("unset") and,
//! where it helps an operator, a warning. Downstream, an unset value means the
//! next lower-priority source (or the default) stays in effect.

use crate::schema::ValueType;
use regex_lite::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::warn;

/// Parse a boolean literal. Accepts `true`/`1` and `false`/`0`, case-insensitive.
pub fn parse_bool(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") || raw == "1" {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") || raw == "0" {
        Some(false)
    } else {
        None
    }
}

/// Coerce an arbitrary JSON value into a boolean.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => parse_bool(s),
        _ => None,
    }
}

/// Parse a float and clamp it into `[0, 1]`.
pub fn parse_unit(raw: &str) -> Option<f64> {
    maybe_float(raw).map(|f| f.clamp(0.0, 1.0))
}

/// Coerce a JSON number or numeric string into a unit float.
pub fn coerce_unit(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(|f| f.clamp(0.0, 1.0)),
        Value::String(s) => parse_unit(s),
        _ => None,
    }
}

/// Split a comma separated list, normalizing whitespace around `key:value` pairs.
pub fn parse_array(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| match item.split_once(':') {
            Some((key, val)) => format!("{}:{}", key.trim(), val.trim()),
            None => item.trim().to_string(),
        })
        .collect()
}

/// Coerce a value into an array. Strings are split, arrays pass through unchanged.
pub fn coerce_array(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => Some(Value::from(parse_array(s))),
        Value::Array(_) => Some(value.clone()),
        _ => None,
    }
}

/// Upper bound on the number of integers an int range set expands to.
pub const MAX_INT_RANGE_SET_LEN: usize = 4096;

/// Parse a set of integers such as `3,13,400-403`.
///
/// Ranges expand inclusively in ascending order at the position they appear.
/// A reversed range expands to nothing. A range that would push the set past
/// [`MAX_INT_RANGE_SET_LEN`] entries is skipped.
pub fn parse_int_range_set(raw: &str) -> Vec<i64> {
    let mut result = Vec::new();

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if let Some((start, end)) = token.split_once('-') {
            match (start.trim().parse::<i64>(), end.trim().parse::<i64>()) {
                (Ok(start), Ok(end)) if start > end => {}
                (Ok(start), Ok(end)) => {
                    let room = MAX_INT_RANGE_SET_LEN.saturating_sub(result.len());
                    let fits = end
                        .checked_sub(start)
                        .and_then(|span| usize::try_from(span).ok())
                        .is_some_and(|span| span < room);
                    if fits {
                        result.extend(start..=end);
                    } else {
                        warn!(
                            "Ignoring integer range '{}' wider than {} entries",
                            token, MAX_INT_RANGE_SET_LEN
                        );
                    }
                }
                _ => warn!("Ignoring invalid integer range '{}'", token),
            }
        } else {
            match token.parse::<i64>() {
                Ok(n) => result.push(n),
                Err(_) => warn!("Ignoring invalid integer '{}'", token),
            }
        }
    }

    result
}

/// Parse `key[:value]` pairs separated by commas. Bare keys map to `""`.
pub fn parse_map(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|item| {
            let (key, value) = match item.split_once(':') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (item.trim(), ""),
            };
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Convert a string map into a JSON object value.
pub fn map_value(map: BTreeMap<String, String>) -> Value {
    Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

/// Parse a JSON list of sampling rules and normalize rule field names.
pub fn parse_sampling_rules(raw: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(rules)) => Some(rename_rule_fields(rules)),
        Ok(_) => {
            warn!("Sampling rules must be a JSON array, ignoring '{}'", raw);
            None
        }
        Err(e) => {
            warn!("Unable to parse sampling rules: {}", e);
            None
        }
    }
}

/// Rename `sample_rate` and `max_per_second` in each rule object.
pub fn rename_rule_fields(rules: Vec<Value>) -> Vec<Value> {
    rules
        .into_iter()
        .map(|rule| match rule {
            Value::Object(fields) => {
                let renamed: Map<String, Value> = fields
                    .into_iter()
                    .map(|(key, value)| {
                        let key = match key.as_str() {
                            "sample_rate" => "sampleRate".to_string(),
                            "max_per_second" => "maxPerSecond".to_string(),
                            _ => key,
                        };
                        (key, value)
                    })
                    .collect();
                Value::Object(renamed)
            }
            other => other,
        })
        .collect()
}

/// Parse the leading integer of a string (`"12ms"` is 12, `"1.9"` is 1).
pub fn maybe_int(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let digits_start = usize::from(raw.starts_with(['-', '+']));
    let digits_len = raw[digits_start..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits_len == 0 {
        return None;
    }
    raw[..digits_start + digits_len].parse().ok()
}

static FLOAT_PREFIX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(Infinity|(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?)").ok()
});

/// Parse the leading float of a string (`"0.5abc"` is 0.5, `"abc"` is none).
pub fn parse_float_prefix(raw: &str) -> Option<f64> {
    let raw = raw.trim_start();
    let prefix = FLOAT_PREFIX.as_ref()?.find(raw)?.as_str();
    match prefix.trim_start_matches(['+', '-']) {
        "Infinity" if prefix.starts_with('-') => Some(f64::NEG_INFINITY),
        "Infinity" => Some(f64::INFINITY),
        _ => prefix.parse().ok(),
    }
}

/// Parse a finite float.
pub fn maybe_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Coerce a JSON number or numeric string into an integer.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => maybe_int(s),
        _ => None,
    }
}

/// Coerce a JSON number or numeric string into a float.
pub fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => maybe_float(s),
        _ => None,
    }
}

/// Parse a non-negative integer, warning on anything else.
pub fn non_negative_int(raw: Option<&str>, name: &str, allow_zero: bool) -> Option<i64> {
    let raw = raw?;
    match maybe_int(raw) {
        Some(n) if n > 0 || (n == 0 && allow_zero) => Some(n),
        _ => {
            warn!("Invalid value {} for {}. Using default value.", raw, name);
            None
        }
    }
}

/// `DD_TAGS` may be space separated when it contains no comma.
pub fn parse_space_separated_tags(raw: &str) -> Cow<'_, str> {
    if raw.contains(',') {
        Cow::Borrowed(raw)
    } else {
        Cow::Owned(raw.split_whitespace().collect::<Vec<_>>().join(","))
    }
}

static OTEL_RESOURCE_RENAMES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(^|,)deployment\.environment=", "${1}env:"),
        (r"(^|,)service\.name=", "${1}service:"),
        (r"(^|,)service\.version=", "${1}version:"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Translate `OTEL_RESOURCE_ATTRIBUTES` into the `key:value` tag syntax.
pub fn translate_otel_resource_attributes(raw: &str) -> String {
    let mut translated = raw.to_string();
    for (re, replacement) in OTEL_RESOURCE_RENAMES.iter() {
        translated = re.replace(&translated, *replacement).into_owned();
    }
    translated.replace('=', ":")
}

/// Lowercase propagation styles from a comma separated string.
pub fn normalize_propagation_style(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|style| !style.is_empty())
        .map(|style| style.trim().to_lowercase())
        .collect()
}

/// Normalize a profiling toggle into `"true"`, `"false"` or `"auto"`.
pub fn normalize_profiling_enabled(raw: &str) -> Option<&'static str> {
    if raw.trim().eq_ignore_ascii_case("auto") {
        return Some("auto");
    }
    match parse_bool(raw) {
        Some(true) => Some("true"),
        Some(false) => Some("false"),
        None => {
            warn!("Unexpected value '{}' for profiling enablement", raw);
            None
        }
    }
}

pub const DEFAULT_NAMING_VERSION: &str = "v0";

/// Validate a span attribute schema version, falling back to `v0`.
pub fn validate_naming_version(raw: Option<&str>) -> &'static str {
    match raw {
        None | Some("") => DEFAULT_NAMING_VERSION,
        Some("v0") => "v0",
        Some("v1") => "v1",
        Some(other) => {
            warn!(
                "Unexpected input '{}' for span attribute schema, picked default {}",
                other, DEFAULT_NAMING_VERSION
            );
            DEFAULT_NAMING_VERSION
        }
    }
}

/// Coerce a manifest default into the typed value used by the defaults source.
pub fn coerce_default(value_type: ValueType, raw: &Value) -> Value {
    let text = match raw {
        Value::Null => return Value::Null,
        Value::String(s) => s.as_str(),
        // Already typed in the manifest
        other => return other.clone(),
    };

    match value_type {
        ValueType::Boolean => parse_bool(text).map(Value::Bool).unwrap_or(Value::Null),
        ValueType::Int => maybe_int(text).map(Value::from).unwrap_or(Value::Null),
        ValueType::Decimal => maybe_float(text).map(Value::from).unwrap_or(Value::Null),
        ValueType::String => Value::String(text.to_string()),
        ValueType::Array if text.is_empty() => Value::Array(Vec::new()),
        ValueType::Array => Value::from(parse_array(text)),
        ValueType::Map => map_value(parse_map(text)),
        ValueType::IntRangeSet => Value::from(parse_int_range_set(text)),
        ValueType::SamplingRules => parse_sampling_rules(text)
            .map(Value::Array)
            .unwrap_or(Value::Null),
    }
}
