//! Per-key value transforms.
//!
//! In `state` mode every top-level key of the structured object can be
//! passed through a caller-supplied function before it is emitted. A
//! transform that fails means the value is not ready yet (typically a
//! partial object missing a required field); the key is skipped for that
//! round and retried on the next delta.
//!
//! Transforms only shape state values. Structured block data is recorded and
//! replayed untouched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use strand_core::{Block, BlockKind};

use crate::errors::TransformError;

/// A transform applied to one state key's value.
pub type KeyTransform = Arc<dyn Fn(&Value) -> Result<Value, TransformError> + Send + Sync>;

/// Transforms indexed by state key. Keys without a transform pass through.
#[derive(Clone, Default)]
pub struct KeyTransforms {
    by_key: HashMap<String, KeyTransform>,
}

impl fmt::Debug for KeyTransforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.by_key.keys().collect();
        keys.sort();
        f.debug_struct("KeyTransforms").field("keys", &keys).finish()
    }
}

impl KeyTransforms {
    /// No transforms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform for `key`, replacing any previous one.
    #[must_use]
    pub fn with<F>(mut self, key: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        let _ = self.by_key.insert(key.into(), Arc::new(transform));
        self
    }

    /// Whether `key` has a transform.
    pub fn has(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Whether no transforms are registered.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Apply the transform for `key`, or return the value unchanged.
    pub fn apply(&self, key: &str, value: &Value) -> Result<Value, TransformError> {
        match self.by_key.get(key) {
            Some(transform) => transform(value),
            None => Ok(value.clone()),
        }
    }
}

/// Top-level keys of every structured object block, later blocks overriding
/// earlier ones. This is the raw input of the final `state` values.
pub fn merge_state<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Map<String, Value> {
    let mut merged = Map::new();
    for block in blocks {
        if block.kind != BlockKind::Structured {
            continue;
        }
        if let Some(Value::Object(fields)) = &block.data {
            for (key, value) in fields {
                let _ = merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_state_prefers_later_blocks() {
        let blocks = [
            Block::structured("a", 0, Some(json!({"title": "first", "n": 1})), ""),
            Block::text("t", 1, "ignored"),
            Block::structured("b", 2, Some(json!({"title": "second"})), ""),
            Block::structured("c", 3, Some(json!([1, 2])), ""),
        ];
        let merged = merge_state(&blocks);
        assert_eq!(Value::Object(merged), json!({"title": "second", "n": 1}));
    }

    #[test]
    fn missing_transform_is_identity() {
        let t = KeyTransforms::new();
        assert_eq!(t.apply("k", &json!([1])), Ok(json!([1])));
    }

    #[test]
    fn registered_transform_runs() {
        let t = KeyTransforms::new().with("count", |v| {
            v.as_array()
                .map(|a| json!(a.len()))
                .ok_or_else(|| TransformError::new("not an array"))
        });
        assert!(t.has("count"));
        assert_eq!(t.apply("count", &json!([1, 2, 3])), Ok(json!(3)));
        assert!(t.apply("count", &json!("x")).is_err());
    }

    #[test]
    fn debug_lists_sorted_keys() {
        let t = KeyTransforms::new()
            .with("b", |v| Ok(v.clone()))
            .with("a", |v| Ok(v.clone()));
        assert_eq!(format!("{t:?}"), r#"KeyTransforms { keys: ["a", "b"] }"#);
    }
}
