use std::env;
use std::path::PathBuf;

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Reads `key`, treating unset and blank values the same.
pub(crate) fn non_empty(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

pub(crate) fn path(key: &str) -> Option<PathBuf> {
    non_empty(key).map(PathBuf::from)
}

pub(crate) fn flag(key: &str) -> bool {
    non_empty(key).is_some_and(|value| parse_bool(&value))
}

/// Presence switch: any value, even an empty one, turns it on.
pub(crate) fn present(key: &str) -> bool {
    env::var_os(key).is_some()
}

/// Integer switch with three states: unset, zero (off) and anything else (on).
///
/// Values that do not start with an integer count as zero.
pub(crate) fn tristate(key: &str) -> Option<bool> {
    let raw = env::var(key).ok()?;
    Some(leading_integer(&raw) != 0)
}

pub(crate) fn parse_usize(key: &str) -> Option<usize> {
    non_empty(key).and_then(|value| value.parse().ok())
}

fn leading_integer(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|v| sign * v).unwrap_or(0)
}
