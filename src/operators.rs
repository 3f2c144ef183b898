//! Condition operators.
//!
//! Operators are applied to a user value and a condition target. The outer `Option` is
//! `None` when the operator name itself is unrecognized; that case fails closed and marks
//! the evaluation unsupported. A recognized operator that cannot be applied to the values at
//! hand (type mismatch, unparsable number, bad regex) evaluates to its non-matching result.
use std::cmp::Ordering;

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;

/// Apply `operator` to `value` and `target`. Returns `None` for unrecognized operators.
pub(crate) fn apply(operator: &str, value: Option<&Value>, target: &Value) -> Option<bool> {
    match operator {
        "any" => Some(is_member(value, target, false)),
        "none" => Some(!is_member(value, target, false)),
        "any_case_sensitive" => Some(is_member(value, target, true)),
        "none_case_sensitive" => Some(!is_member(value, target, true)),

        "str_starts_with_any" => Some(string_any(value, target, |v: &str, t: &str| v.starts_with(t))),
        "str_ends_with_any" => Some(string_any(value, target, |v: &str, t: &str| v.ends_with(t))),
        "str_contains_any" => Some(string_any(value, target, |v: &str, t: &str| v.contains(t))),
        "str_contains_none" => Some(!string_any(value, target, |v: &str, t: &str| v.contains(t))),
        "str_matches" => Some(regex_match(value, target)),

        "eq" => Some(loose_eq(value, target)),
        "neq" => Some(!loose_eq(value, target)),

        "gt" => Some(compare_numbers(value, target, |o| o == Ordering::Greater)),
        "gte" => Some(compare_numbers(value, target, |o| o != Ordering::Less)),
        "lt" => Some(compare_numbers(value, target, |o| o == Ordering::Less)),
        "lte" => Some(compare_numbers(value, target, |o| o != Ordering::Greater)),

        "version_gt" => Some(compare_versions(value, target, |o| o == Ordering::Greater)),
        "version_gte" => Some(compare_versions(value, target, |o| o != Ordering::Less)),
        "version_lt" => Some(compare_versions(value, target, |o| o == Ordering::Less)),
        "version_lte" => Some(compare_versions(value, target, |o| o != Ordering::Greater)),
        "version_eq" => Some(compare_versions(value, target, |o| o == Ordering::Equal)),
        "version_neq" => Some(compare_versions(value, target, |o| o != Ordering::Equal)),

        "before" => Some(compare_times(value, target, |v, t| v < t)),
        "after" => Some(compare_times(value, target, |v, t| v > t)),
        "on" => Some(same_utc_day(value, target)),

        _ => None,
    }
}

/// String form of a JSON scalar. Objects and arrays have no string form.
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn target_strings(target: &Value) -> Vec<String> {
    match target {
        Value::Array(items) => items.iter().filter_map(value_to_string).collect(),
        // A scalar target is treated as a single-element list.
        other => value_to_string(other).into_iter().collect(),
    }
}

fn is_member(value: Option<&Value>, target: &Value, case_sensitive: bool) -> bool {
    let Some(value) = value.and_then(value_to_string) else {
        return false;
    };
    target_strings(target).iter().any(|candidate| {
        if case_sensitive {
            candidate == &value
        } else {
            candidate.eq_ignore_ascii_case(&value)
        }
    })
}

fn string_any(value: Option<&Value>, target: &Value, predicate: fn(&str, &str) -> bool) -> bool {
    let Some(value) = value.and_then(value_to_string) else {
        return false;
    };
    let value = value.to_ascii_lowercase();
    target_strings(target)
        .iter()
        .any(|candidate| predicate(&value, &candidate.to_ascii_lowercase()))
}

fn regex_match(value: Option<&Value>, target: &Value) -> bool {
    let Some(value) = value.and_then(value_to_string) else {
        return false;
    };
    let Some(pattern) = target.as_str() else {
        return false;
    };
    match Regex::new(pattern) {
        Ok(regex) => regex.is_match(&value),
        Err(_) => false,
    }
}

fn loose_eq(value: Option<&Value>, target: &Value) -> bool {
    let value = match value {
        None | Some(Value::Null) => return target.is_null(),
        Some(v) => v,
    };
    if target.is_null() {
        return false;
    }
    if let (Some(a), Some(b)) = (value_to_f64(value), value_to_f64(target)) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (value_to_string(value), value_to_string(target)) {
        return a == b;
    }
    value == target
}

fn compare_numbers(
    value: Option<&Value>,
    target: &Value,
    predicate: fn(Ordering) -> bool,
) -> bool {
    let (Some(value), Some(target)) = (
        value.and_then(value_to_f64),
        value_to_f64(target),
    ) else {
        return false;
    };
    value
        .partial_cmp(&target)
        .is_some_and(predicate)
}

/// Parse a dotted version string into integer segments. Any suffix after the first `-` is
/// ignored (`1.2.3-beta` compares as `1.2.3`).
fn parse_version(value: &Value) -> Option<Vec<i64>> {
    let raw = value.as_str()?;
    let core = raw.split('-').next().unwrap_or(raw).trim();
    if core.is_empty() {
        return None;
    }
    core.split('.')
        .map(|segment| segment.parse::<i64>().ok())
        .collect()
}

fn compare_versions(
    value: Option<&Value>,
    target: &Value,
    predicate: fn(Ordering) -> bool,
) -> bool {
    let (Some(value), Some(target)) = (value.and_then(parse_version), parse_version(target))
    else {
        return false;
    };
    // Segment-by-segment with implicit trailing zeros, so "1.2" == "1.2.0".
    let length = value.len().max(target.len());
    for i in 0..length {
        let a = value.get(i).copied().unwrap_or(0);
        let b = target.get(i).copied().unwrap_or(0);
        if a != b {
            return predicate(a.cmp(&b));
        }
    }
    predicate(Ordering::Equal)
}

/// Epoch milliseconds from a JSON scalar: a number, a numeric string, or an RFC 3339 string.
fn value_to_epoch_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|t| t.timestamp_millis())),
        _ => None,
    }
}

fn compare_times(value: Option<&Value>, target: &Value, predicate: fn(i64, i64) -> bool) -> bool {
    let (Some(value), Some(target)) = (
        value.and_then(value_to_epoch_ms),
        value_to_epoch_ms(target),
    ) else {
        return false;
    };
    predicate(value, target)
}

fn same_utc_day(value: Option<&Value>, target: &Value) -> bool {
    let (Some(value), Some(target)) = (
        value.and_then(value_to_epoch_ms),
        value_to_epoch_ms(target),
    ) else {
        return false;
    };
    let (Some(value), Some(target)) = (
        DateTime::from_timestamp_millis(value),
        DateTime::from_timestamp_millis(target),
    ) else {
        return false;
    };
    value.date_naive() == target.date_naive()
}
