//! Block reconstruction from persisted transcripts.
//!
//! [`HistoryReconstructor`] rebuilds the [`MessageWithBlocks`] shape the live
//! path produces, using only what persistence kept:
//!
//! 1. **Recorded blocks**: an assistant message carrying `metadata.blocks` is
//!    replayed as is. Structured data is checked against the optional
//!    validator; a rejected value is logged and kept.
//! 2. **Legacy content**: without recorded blocks the raw text is scanned for
//!    fenced code. ```` ```json ```` fences become structured blocks and
//!    prose around them becomes text blocks. Fences with any other tag are
//!    dropped, as the live parser drops them, and a JSON fence that does not
//!    parse stays part of the prose. Ids are derived from the message id and
//!    a stable hash of the block content, so the same transcript always
//!    reconstructs to the same ids.
//!
//! User messages become a single text block.
//!
//! Block data is never transformed. [`HistoryReconstructor::final_state`]
//! derives the `state:final` values a `state` stream would have emitted,
//! through the same [`RunScope`] cache the streamer uses.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{Map, Value};
use strand_core::block::sort_by_index;
use strand_core::{
    Block, BlockKind, MessageWithBlocks, PersistedMessage, Role, SchemaValidator, stable_hash,
};
use strand_stream::{KeyTransforms, RunScope, merge_state};
use tracing::{debug, warn};

/// Any closed fence: tag line, then body up to the next three backticks.
static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([^\n]*)\n(.*?)```").expect("valid regex"));

/// Rebuilds block lists from persisted messages.
#[derive(Clone, Default)]
pub struct HistoryReconstructor {
    validator: Option<Arc<SchemaValidator>>,
    transforms: KeyTransforms,
}

impl std::fmt::Debug for HistoryReconstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryReconstructor")
            .field("validator", &self.validator.is_some())
            .field("transforms", &self.transforms)
            .finish()
    }
}

impl HistoryReconstructor {
    /// Reconstructor without validation or transforms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check recorded structured data with `validator`.
    #[must_use]
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Per-key transforms for [`final_state`](Self::final_state).
    #[must_use]
    pub fn with_transforms(mut self, transforms: KeyTransforms) -> Self {
        self.transforms = transforms;
        self
    }

    /// Reconstruct a whole transcript.
    pub fn reconstruct(&self, messages: &[PersistedMessage]) -> Vec<MessageWithBlocks> {
        let out: Vec<MessageWithBlocks> = messages
            .iter()
            .map(|message| self.reconstruct_message(message))
            .collect();
        debug!(
            messages = out.len(),
            blocks = out.iter().map(|m| m.blocks.len()).sum::<usize>(),
            "history reconstructed"
        );
        out
    }

    /// Reconstruct one message.
    pub fn reconstruct_message(&self, message: &PersistedMessage) -> MessageWithBlocks {
        let blocks = match (message.role, message.recorded_blocks()) {
            (Role::User, _) => vec![Block::text(
                hashed_id(&message.id, BlockKind::Text, &Value::String(message.content.clone())),
                0,
                message.content.clone(),
            )],
            (Role::Assistant, Some(recorded)) => self.replay(&message.id, recorded),
            (Role::Assistant, None) => legacy_blocks(&message.id, &message.content),
        };

        MessageWithBlocks {
            id: message.id.clone(),
            role: message.role,
            blocks,
        }
    }

    /// Final state values of one message: every top-level key of its
    /// structured objects, later blocks overriding earlier ones, passed
    /// through the transforms. A failing transform skips its key.
    pub fn final_state(
        &self,
        message: &PersistedMessage,
        scope: &mut RunScope,
    ) -> Map<String, Value> {
        let reconstructed = self.reconstruct_message(message);
        let mut state = Map::new();
        for (key, value) in merge_state(&reconstructed.blocks) {
            match scope.transform(&self.transforms, &message.id, &key, &value) {
                Ok(transformed) => {
                    let _ = state.insert(key, transformed);
                }
                Err(err) => debug!(
                    run_id = scope.run_id(),
                    message_id = %message.id,
                    key = %key,
                    error = %err,
                    "final transform failed, key skipped"
                ),
            }
        }
        state
    }

    fn replay(&self, message_id: &str, recorded: &[Block]) -> Vec<Block> {
        let mut blocks = recorded.to_vec();
        if let Some(validator) = &self.validator {
            for block in &blocks {
                let rejected = block.kind == BlockKind::Structured
                    && block.data.as_ref().is_some_and(|data| !validator(data));
                if rejected {
                    warn!(
                        message_id,
                        block_id = %block.id,
                        "recorded structured block failed validation, keeping raw value"
                    );
                }
            }
        }
        sort_by_index(&mut blocks);
        blocks
    }
}

/// `{message_id}:{kind}:{hash}`.
fn hashed_id(message_id: &str, kind: BlockKind, content: &Value) -> String {
    format!("{message_id}:{}:{}", kind.as_str(), stable_hash(content))
}

/// Split raw content into text and structured blocks.
fn legacy_blocks(message_id: &str, content: &str) -> Vec<Block> {
    let mut builder = LegacyBuilder::new(message_id);
    let mut last = 0;

    for caps in FENCE.captures_iter(content) {
        let (Some(whole), Some(tag), Some(inner)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        builder.prose.push_str(&content[last..whole.start()]);
        last = whole.end();

        if !tag.as_str().trim().eq_ignore_ascii_case("json") {
            debug!(message_id, tag = %tag.as_str().trim(), "legacy non-json fence dropped");
            continue;
        }
        let source = inner.as_str().trim();
        match serde_json::from_str::<Value>(source) {
            Ok(data) => {
                builder.flush_prose();
                builder.push(BlockKind::Structured, &data, |id, index| {
                    Block::structured(id, index, Some(data.clone()), source)
                });
            }
            Err(err) => {
                debug!(message_id, error = %err, "legacy json fence did not parse, kept as text");
                builder.prose.push_str(whole.as_str());
            }
        }
    }
    builder.prose.push_str(&content[last..]);
    builder.flush_prose();
    builder.blocks
}

struct LegacyBuilder<'a> {
    message_id: &'a str,
    prose: String,
    blocks: Vec<Block>,
    seen: HashSet<String>,
}

impl<'a> LegacyBuilder<'a> {
    fn new(message_id: &'a str) -> Self {
        Self {
            message_id,
            prose: String::new(),
            blocks: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn flush_prose(&mut self) {
        let prose = std::mem::take(&mut self.prose);
        let text = prose.trim();
        if text.is_empty() {
            return;
        }
        let value = Value::String(text.to_string());
        self.push(BlockKind::Text, &value, |id, index| Block::text(id, index, text));
    }

    fn push(&mut self, kind: BlockKind, content: &Value, build: impl FnOnce(String, u32) -> Block) {
        let index = u32::try_from(self.blocks.len()).unwrap_or(u32::MAX);
        let mut id = hashed_id(self.message_id, kind, content);
        // Identical content twice in one message.
        if !self.seen.insert(id.clone()) {
            id = format!("{id}:{index}");
            let _ = self.seen.insert(id.clone());
        }
        self.blocks.push(build(id, index));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
