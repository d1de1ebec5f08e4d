//! Run-scoped transform cache.
//!
//! A [`RunScope`] lives for one run (one streamed answer, or one history
//! replay) and remembers every transformed value by message id, key and the
//! stable hash of the input, so a non-deterministic transform is invoked at
//! most once per message, key and input while the scope is alive. Two blocks
//! of one message sharing a key with different values never see each other's
//! results. Dropping the scope releases the cache.

use std::collections::HashMap;

use serde_json::Value;
use strand_core::stable_hash;
use tracing::debug;

use crate::errors::TransformError;
use crate::transforms::KeyTransforms;

type Slot = (String, String, String);

fn slot(message_id: &str, key: &str, input: &Value) -> Slot {
    (message_id.to_string(), key.to_string(), stable_hash(input))
}

/// Transformed values of one run, keyed by `(message_id, key, hash(input))`.
#[derive(Debug, Default)]
pub struct TransformCache {
    entries: HashMap<Slot, Value>,
}

impl TransformCache {
    /// Cached result of transforming `input` under `(message_id, key)`.
    pub fn get(&self, message_id: &str, key: &str, input: &Value) -> Option<&Value> {
        self.entries.get(&slot(message_id, key, input))
    }

    /// Store a result, replacing any previous one.
    pub fn insert(&mut self, message_id: &str, key: &str, input: &Value, output: Value) {
        let _ = self.entries.insert(slot(message_id, key, input), output);
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Context for one run. Pass it by `&mut` to everything that may transform.
#[derive(Debug)]
pub struct RunScope {
    run_id: String,
    cache: TransformCache,
}

impl RunScope {
    /// Open a scope for `run_id`.
    pub fn enter(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        debug!(run_id = %run_id, "run scope entered");
        Self {
            run_id,
            cache: TransformCache::default(),
        }
    }

    /// Run `f` inside a fresh scope that is released when `f` returns.
    pub fn with<R>(run_id: impl Into<String>, f: impl FnOnce(&mut RunScope) -> R) -> R {
        let mut scope = Self::enter(run_id);
        f(&mut scope)
    }

    /// Id of the run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Cache of this run.
    pub fn cache(&self) -> &TransformCache {
        &self.cache
    }

    /// Transform `value` under `(message_id, key)`, reusing the cached result
    /// for the same input.
    ///
    /// Only successful transforms are cached, so a key that was not ready is
    /// retried on the next call.
    pub fn transform(
        &mut self,
        transforms: &KeyTransforms,
        message_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<Value, TransformError> {
        if let Some(cached) = self.cache.get(message_id, key, value) {
            return Ok(cached.clone());
        }
        let transformed = transforms.apply(key, value)?;
        self.cache.insert(message_id, key, value, transformed.clone());
        Ok(transformed)
    }
}

impl Drop for RunScope {
    fn drop(&mut self) {
        debug!(
            run_id = %self.run_id,
            released = self.cache.len(),
            "run scope closed"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
