//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MurmurSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::MurmurSettings;

/// Resolve the path to the settings file (`~/.murmur/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".murmur").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<MurmurSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<MurmurSettings> {
    let defaults = serde_json::to_value(MurmurSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut MurmurSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Invalid values are ignored with a warning (falling back to file/default).
/// `MURMUR_PORT` wins over the conventional `PORT`.
pub fn apply_overrides(settings: &mut MurmurSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvSource { lookup };

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = env.string("MURMUR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u16("MURMUR_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("MURMUR_IDLE_TIMEOUT", 1, 86_400) {
        settings.server.idle_timeout_secs = v;
    }
    if let Some(v) = env.u64("MURMUR_REAP_INTERVAL", 1, 3_600) {
        settings.server.reap_interval_secs = v;
    }
    if let Some(v) = env.usize("MURMUR_MAX_SEND_QUEUE", 1, 65_536) {
        settings.server.max_send_queue = v;
    }
    if let Some(v) = env.usize("MURMUR_MAX_LINE_LENGTH", 16, 1_048_576) {
        settings.server.max_line_length = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = env.bool("MURMUR_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers (thin wrappers) ────────────────────────────────────────

struct EnvSource<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.raw(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.raw(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.raw(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.raw(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::errors::SettingsError;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 4000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_skips_null() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_file_layer(&dir.path().join("absent.json")).unwrap();
        assert_eq!(s.server.port, 4000);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"{{"server": {{"idleTimeoutSecs": 120}}, "logging": {{"json": true}}}}"#)
            .unwrap();

        let s = load_file_layer(&path).unwrap();
        assert_eq!(s.server.idle_timeout_secs, 120);
        assert_eq!(s.server.reap_interval_secs, 10);
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn port_env_var_applies() {
        let mut s = MurmurSettings::default();
        apply_overrides(&mut s, vars(&[("PORT", "5555")]));
        assert_eq!(s.server.port, 5555);
    }

    #[test]
    fn murmur_port_beats_port() {
        let mut s = MurmurSettings::default();
        apply_overrides(&mut s, vars(&[("PORT", "5555"), ("MURMUR_PORT", "6666")]));
        assert_eq!(s.server.port, 6666);
    }

    #[test]
    fn invalid_values_are_ignored() {
        let mut s = MurmurSettings::default();
        apply_overrides(
            &mut s,
            vars(&[
                ("PORT", "not-a-port"),
                ("MURMUR_IDLE_TIMEOUT", "0"),
                ("MURMUR_LOG_JSON", "maybe"),
            ]),
        );
        assert_eq!(s.server.port, 4000);
        assert_eq!(s.server.idle_timeout_secs, 60);
        assert!(!s.logging.json);
    }

    #[test]
    fn timing_and_logging_overrides() {
        let mut s = MurmurSettings::default();
        apply_overrides(
            &mut s,
            vars(&[
                ("MURMUR_IDLE_TIMEOUT", "30"),
                ("MURMUR_REAP_INTERVAL", "5"),
                ("MURMUR_HOST", "127.0.0.1"),
                ("MURMUR_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(s.server.idle_timeout_secs, 30);
        assert_eq!(s.server.reap_interval_secs, 5);
        assert_eq!(s.server.host, "127.0.0.1");
        assert!(s.logging.json);
    }

    #[test]
    fn empty_host_is_ignored() {
        let mut s = MurmurSettings::default();
        apply_overrides(&mut s, vars(&[("MURMUR_HOST", "")]));
        assert_eq!(s.server.host, "0.0.0.0");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("80", 1, 65535), Some(80));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("90000", 1, 86_400), None);
        assert_eq!(parse_usize_range("256", 1, 65_536), Some(256));
    }
}
