//! Helpers for reading configuration from environment variables.
//!
//! Every config struct takes a lookup function so tests can feed a map
//! instead of mutating the process environment.

use std::str::FromStr;

use crate::{Error, Result};

/// Read a variable from the process environment, treating empty as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Value of `key`, or `fallback` when unset or empty.
pub fn var_or<L>(lookup: &L, key: &str, fallback: &str) -> String
where
    L: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Value of `key` parsed as a number, or `fallback` when unset.
///
/// # Errors
/// - `Error::Config` if the variable is set but does not parse
pub fn parse_number<L, T>(lookup: &L, key: &str, fallback: T) -> Result<T>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        None => Ok(fallback),
        Some(raw) if raw.is_empty() => Ok(fallback),
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("Invalid number for env var {}: {}", key, raw))),
    }
}

/// Value of `key` interpreted as a flag, or `fallback` when unset.
pub fn parse_bool<L>(lookup: &L, key: &str, fallback: bool) -> bool
where
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => is_truthy(&raw),
        _ => fallback,
    }
}

/// `true`, `1`, `yes` and `y` (any case) are truthy.
pub fn is_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}

/// Strip a trailing slash from a base URL.
pub fn normalize_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_var_or_falls_back_on_empty() {
        let lookup = lookup_from(&[("A", "  "), ("B", "value")]);
        assert_eq!(var_or(&lookup, "A", "fallback"), "fallback");
        assert_eq!(var_or(&lookup, "B", "fallback"), "value");
        assert_eq!(var_or(&lookup, "C", "fallback"), "fallback");
    }

    #[test]
    fn test_parse_number() {
        let lookup = lookup_from(&[("N", "42"), ("BAD", "forty")]);
        assert_eq!(parse_number(&lookup, "N", 0u32).unwrap(), 42);
        assert_eq!(parse_number(&lookup, "MISSING", 7u32).unwrap(), 7);
        assert!(matches!(
            parse_number(&lookup, "BAD", 0u32),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_bool() {
        let lookup = lookup_from(&[("T", "Yes"), ("F", "off"), ("ONE", "1")]);
        assert!(parse_bool(&lookup, "T", false));
        assert!(!parse_bool(&lookup, "F", true));
        assert!(parse_bool(&lookup, "ONE", false));
        assert!(parse_bool(&lookup, "MISSING", true));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://services.example.com/"),
            "https://services.example.com"
        );
        assert_eq!(normalize_url("http://x"), "http://x");
    }
}
