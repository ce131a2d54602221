//! Environment variable utilities
//!
//! Every `PSV_*` knob (logging, server limits) is read through these.
//!
//! ```ignore
//! use pollserve_core::env::{env_get, env_get_bool};
//!
//! let max_clients: usize = env_get("PSV_MAX_CLIENTS", 1024);
//! let flush = env_get_bool("PSV_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or return `default` when unset or unparseable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// "1", "true", "yes", "on" (any case) are true; any other set value is false.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// `Some(T)` when set and parseable.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_defaults() {
        let val: usize = env_get("__PSV_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__PSV_TEST_UNSET__", true));
        assert!(env_get_opt::<i32>("__PSV_TEST_UNSET__").is_none());
        assert_eq!(env_get_str("__PSV_TEST_UNSET__", "8080"), "8080");
        assert!(!env_is_set("__PSV_TEST_UNSET__"));
    }

    #[test]
    fn test_parse_with_whitespace() {
        std::env::set_var("__PSV_TEST_NUM__", " 2048 ");
        let val: usize = env_get("__PSV_TEST_NUM__", 0);
        assert_eq!(val, 2048);
        std::env::remove_var("__PSV_TEST_NUM__");
    }

    #[test]
    fn test_negative_timeout() {
        std::env::set_var("__PSV_TEST_TIMEOUT__", "-1");
        let val: i32 = env_get("__PSV_TEST_TIMEOUT__", 500);
        assert_eq!(val, -1);
        std::env::remove_var("__PSV_TEST_TIMEOUT__");
    }

    #[test]
    fn test_bool_variants() {
        for (raw, expected) in [("1", true), ("TRUE", true), ("on", true), ("0", false), ("garbage", false)] {
            std::env::set_var("__PSV_TEST_BOOL__", raw);
            assert_eq!(env_get_bool("__PSV_TEST_BOOL__", !expected), expected, "{}", raw);
        }
        std::env::remove_var("__PSV_TEST_BOOL__");
    }

    #[test]
    fn test_invalid_parse_falls_back() {
        std::env::set_var("__PSV_TEST_INVALID__", "lots");
        let val: usize = env_get("__PSV_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__PSV_TEST_INVALID__");
    }
}
