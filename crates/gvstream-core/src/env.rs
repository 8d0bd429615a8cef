//! Typed environment lookups for `GVS_*` settings.

use std::str::FromStr;

/// Parse `key` as `T`, or `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` when `key` is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean lookup. "1", "true", "yes", "on" (any case) are true;
/// any other value is false; unset yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_returns_default() {
        let val: usize = env_get("__GVS_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__GVS_TEST_UNSET__", true));
        assert!(env_get_opt::<u64>("__GVS_TEST_UNSET__").is_none());
    }

    #[test]
    fn test_set_values_parse() {
        std::env::set_var("__GVS_TEST_NUM__", " 123 ");
        assert_eq!(env_get::<usize>("__GVS_TEST_NUM__", 0), 123);
        std::env::set_var("__GVS_TEST_NUM__", "nope");
        assert_eq!(env_get::<usize>("__GVS_TEST_NUM__", 9), 9);
        std::env::remove_var("__GVS_TEST_NUM__");

        std::env::set_var("__GVS_TEST_BOOL__", "ON");
        assert!(env_get_bool("__GVS_TEST_BOOL__", false));
        std::env::set_var("__GVS_TEST_BOOL__", "0");
        assert!(!env_get_bool("__GVS_TEST_BOOL__", true));
        std::env::remove_var("__GVS_TEST_BOOL__");
    }
}
