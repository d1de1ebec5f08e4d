//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`StrandSettings::default()`]
//! 2. If `~/.strand/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use strand_core::TargetMode;
use tracing::debug;

use crate::errors::Result;
use crate::types::StrandSettings;

/// Resolve the path to the settings file (`~/.strand/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".strand").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StrandSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<StrandSettings> {
    let defaults = serde_json::to_value(StrandSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: StrandSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
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

/// Apply `STRAND_*` environment variable overrides.
///
/// Invalid values are ignored with a warning (file/default value stays).
pub fn apply_env_overrides(settings: &mut StrandSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup (env vars in production, a map
/// in tests).
pub fn apply_overrides(settings: &mut StrandSettings, lookup: impl Fn(&str) -> Option<String>) {
    // ── Parser ──────────────────────────────────────────────────────
    if let Some(v) = read_usize(&lookup, "STRAND_TEXT_BUFFER_LIMIT", 1, 64 * 1024 * 1024) {
        settings.parser.text_buffer_limit = v;
    }
    if let Some(v) = read_usize(&lookup, "STRAND_STRUCTURED_BUFFER_LIMIT", 1, 64 * 1024 * 1024) {
        settings.parser.structured_buffer_limit = v;
    }

    // ── Processor ───────────────────────────────────────────────────
    if let Some(v) = read_usize(&lookup, "STRAND_MAX_PENDING_EVENTS", 0, 1_000_000) {
        settings.processor.max_pending_events = v;
    }

    // ── Stream ──────────────────────────────────────────────────────
    if let Some(raw) = read_string(&lookup, "STRAND_DEFAULT_TARGET") {
        match raw.parse::<TargetMode>() {
            Ok(mode) => settings.stream.default_target = mode,
            Err(e) => tracing::warn!(key = "STRAND_DEFAULT_TARGET", error = %e, "invalid env var, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_string(&lookup, "STRAND_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_string(&lookup, "STRAND_LOG_JSON") {
        settings.logging.json = matches!(v.trim(), "1" | "true");
    }
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.is_empty())
}

fn read_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: usize,
    max: usize,
) -> Option<usize> {
    let val = lookup(name)?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"parser": {"a": 1, "b": 2}});
        let source = serde_json::json!({"parser": {"a": 10}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["parser"]["a"], 10);
        assert_eq!(merged["parser"]["b"], 2);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.parser, crate::types::ParserSettings::default());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"parser": {{"structuredBufferLimit": 1024}}, "stream": {{"defaultTarget": "state"}}}}"#
        )
        .unwrap();
        let settings = load_settings_from_path(file.path()).unwrap();
        assert_eq!(settings.parser.structured_buffer_limit, 1024);
        assert_eq!(settings.parser.text_buffer_limit, 64 * 1024);
        assert_eq!(settings.stream.default_target, TargetMode::State);
    }

    #[test]
    fn invalid_json_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert_matches!(load_settings_from_path(file.path()), Err(SettingsError::Json(_)));
    }

    #[test]
    fn zero_limit_in_file_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"parser": {{"textBufferLimit": 0}}}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(file.path()),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply_valid_values() {
        let mut s = StrandSettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("STRAND_TEXT_BUFFER_LIMIT", "2048"),
                ("STRAND_MAX_PENDING_EVENTS", "0"),
                ("STRAND_DEFAULT_TARGET", "state"),
                ("STRAND_LOG_LEVEL", "strand_events=debug"),
                ("STRAND_LOG_JSON", "true"),
            ]),
        );
        assert_eq!(s.parser.text_buffer_limit, 2048);
        assert_eq!(s.processor.max_pending(), None);
        assert_eq!(s.stream.default_target, TargetMode::State);
        assert_eq!(s.logging.level, "strand_events=debug");
        assert!(s.logging.json);
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut s = StrandSettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("STRAND_STRUCTURED_BUFFER_LIMIT", "0"),
                ("STRAND_TEXT_BUFFER_LIMIT", "lots"),
                ("STRAND_DEFAULT_TARGET", "graph"),
                ("STRAND_LOG_LEVEL", ""),
            ]),
        );
        assert_eq!(s, StrandSettings::default());
    }

    #[test]
    fn parse_usize_range_bounds() {
        assert_eq!(parse_usize_range("10", 1, 10), Some(10));
        assert_eq!(parse_usize_range("11", 1, 10), None);
        assert_eq!(parse_usize_range(" 5 ", 1, 10), Some(5));
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }
}
