//! Structured output streamer.
//!
//! Consumes model deltas, keeps a [`BlockParser`] up to date and turns each
//! visible change into a [`UiEvent`]:
//!
//! - free text becomes `content:text` updates for the block being written
//! - an open JSON fence becomes either one `state:streaming` event per
//!   top-level key (`state` target) or a single `content:structured` preview
//!   of the whole object (`messages` target)
//!
//! Every update is deduplicated by the stable hash of its value, so a delta
//! that does not change what the user sees emits nothing. When the stream
//! ends the streamer emits the final events and assembles the persisted
//! message with its block list attached.

use std::collections::HashMap;
use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_core::{
    Block, BlockKind, EventSequencer, MessageMetadata, PersistedMessage, Role, SchemaValidator,
    TargetMode, UiEventKind, stable_hash,
};
use strand_parser::{BlockParser, ParserLimits};
use strand_settings::StrandSettings;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::Result;
use crate::scope::RunScope;
use crate::sink::EventSink;
use crate::transforms::{KeyTransforms, merge_state};

/// One chunk of model output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDelta {
    /// Text of the chunk.
    pub content: String,
}

impl ModelDelta {
    /// Wrap a chunk.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl From<&str> for ModelDelta {
    fn from(content: &str) -> Self {
        Self::new(content)
    }
}

/// Result of a completed stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamOutcome {
    /// Assistant message with the raw text and `metadata.blocks`.
    pub message: PersistedMessage,
    /// Last finalized structured value, if it parsed and passed validation.
    pub parsed: Option<Value>,
}

/// Drives one model answer from deltas to UI events.
pub struct StructuredOutputStreamer {
    parser: BlockParser,
    sequencer: EventSequencer,
    target: TargetMode,
    limits: ParserLimits,
    transforms: KeyTransforms,
    validator: Option<Arc<SchemaValidator>>,
    message_id: String,
    raw_text: String,
    /// Finalized parser blocks already announced.
    inspected: usize,
    /// Block id → hash of the last content sent for it.
    sent_blocks: HashMap<String, String>,
    /// State key → hash of the last value sent for it.
    sent_keys: HashMap<String, String>,
}

impl fmt::Debug for StructuredOutputStreamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredOutputStreamer")
            .field("message_id", &self.message_id)
            .field("target", &self.target)
            .field("state", &self.parser.state())
            .field("next_seq", &self.sequencer.next_seq())
            .field("transforms", &self.transforms)
            .field("validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl StructuredOutputStreamer {
    /// Streamer for `target` with default limits and a fresh message id.
    pub fn new(target: TargetMode) -> Self {
        let message_id = Uuid::now_v7().to_string();
        let limits = ParserLimits::default();
        Self {
            parser: BlockParser::with_instance_id(message_id.clone(), limits),
            sequencer: EventSequencer::new(),
            target,
            limits,
            transforms: KeyTransforms::new(),
            validator: None,
            message_id,
            raw_text: String::new(),
            inspected: 0,
            sent_blocks: HashMap::new(),
            sent_keys: HashMap::new(),
        }
    }

    /// Streamer configured from settings (default target and buffer caps).
    pub fn from_settings(settings: &StrandSettings) -> Self {
        Self::new(settings.stream.default_target).with_limits(ParserLimits::from(&settings.parser))
    }

    // Builders rebuild the parser, so they belong before the first delta.

    /// Use `id` for the persisted message. Block ids derive from it.
    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self.parser = BlockParser::with_instance_id(self.message_id.clone(), self.limits);
        self
    }

    /// Override the parser buffer caps.
    #[must_use]
    pub fn with_limits(mut self, limits: ParserLimits) -> Self {
        self.limits = limits;
        self.parser = BlockParser::with_instance_id(self.message_id.clone(), limits);
        self
    }

    /// Per-key transforms for the `state` target.
    #[must_use]
    pub fn with_transforms(mut self, transforms: KeyTransforms) -> Self {
        self.transforms = transforms;
        self
    }

    /// Schema check for the final structured value.
    #[must_use]
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Namespace stamped on every emitted event.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.sequencer = EventSequencer::with_namespace(Some(namespace.into()));
        self
    }

    /// Id of the message being streamed.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Target mode.
    pub fn target(&self) -> TargetMode {
        self.target
    }

    /// Underlying parser, for inspecting a stream that was abandoned.
    pub fn parser(&self) -> &BlockParser {
        &self.parser
    }

    /// Consume `deltas` to the end, then finalize.
    ///
    /// The only suspension point is waiting for the next delta. A parse
    /// error aborts the run and is returned as is.
    pub async fn run<S, K>(
        mut self,
        deltas: S,
        scope: &mut RunScope,
        sink: &mut K,
    ) -> Result<StreamOutcome>
    where
        S: Stream<Item = ModelDelta>,
        K: EventSink + ?Sized,
    {
        let mut deltas = pin!(deltas);
        debug!(message_id = %self.message_id, target = ?self.target, "stream started");
        while let Some(delta) = deltas.next().await {
            if let Err(err) = self.push_delta(&delta.content, sink) {
                warn!(message_id = %self.message_id, error = %err, "stream aborted");
                return Err(err);
            }
        }
        self.finish(scope, sink)
    }

    /// Process one delta and emit whatever changed.
    pub fn push_delta<K>(&mut self, delta: &str, sink: &mut K) -> Result<()>
    where
        K: EventSink + ?Sized,
    {
        self.raw_text.push_str(delta);
        self.parser.append(delta)?;
        self.emit_text_updates(sink)?;

        if let Some(partial) = self.parser.try_parse_partial_json() {
            match self.target {
                TargetMode::State => self.emit_state_partial(&partial, sink)?,
                TargetMode::Messages => self.emit_structured_partial(partial, sink)?,
            }
        }
        Ok(())
    }

    fn emit_text_updates<K>(&mut self, sink: &mut K) -> Result<()>
    where
        K: EventSink + ?Sized,
    {
        let finalized = self.parser.finalized_blocks();
        let mut updates: Vec<(String, u32, String)> = finalized[self.inspected..]
            .iter()
            .filter(|b| b.kind == BlockKind::Text)
            .map(|b| (b.id.clone(), b.index, b.text_or_empty().to_string()))
            .collect();
        self.inspected = finalized.len();

        let preview = self.parser.streaming_text().trim();
        if !preview.is_empty() {
            updates.push((
                self.parser.pending_text_block_id(),
                self.parser.next_index(),
                preview.to_string(),
            ));
        }

        for (block_id, index, text) in updates {
            if changed(&mut self.sent_blocks, &block_id, &Value::String(text.clone())) {
                self.emit(
                    sink,
                    UiEventKind::ContentText {
                        block_id,
                        index,
                        text,
                        is_final: false,
                    },
                )?;
            }
        }
        Ok(())
    }

    fn emit_state_partial<K>(&mut self, partial: &Value, sink: &mut K) -> Result<()>
    where
        K: EventSink + ?Sized,
    {
        let Value::Object(fields) = partial else {
            debug!("partial structured value is not an object, no state emitted");
            return Ok(());
        };
        for (key, value) in fields {
            let value = match self.transforms.apply(key, value) {
                Ok(value) => value,
                Err(err) => {
                    debug!(key = %key, error = %err, "transform not ready, key skipped");
                    continue;
                }
            };
            if changed(&mut self.sent_keys, key, &value) {
                self.emit(
                    sink,
                    UiEventKind::StateStreaming {
                        key: key.clone(),
                        value,
                    },
                )?;
            }
        }
        Ok(())
    }

    fn emit_structured_partial<K>(&mut self, partial: Value, sink: &mut K) -> Result<()>
    where
        K: EventSink + ?Sized,
    {
        let block_id = self.parser.pending_structured_block_id();
        if changed(&mut self.sent_blocks, &block_id, &partial) {
            let index = self.parser.next_index();
            self.emit(
                sink,
                UiEventKind::ContentStructured {
                    block_id,
                    index,
                    data: Some(partial),
                    source_text: None,
                    is_final: false,
                },
            )?;
        }
        Ok(())
    }

    /// Emit final events and assemble the outcome.
    ///
    /// Every finalized text block gets its own final `content:text` event, so
    /// prose split by a fence ends as one event per segment, each under the
    /// block id its streaming updates used. An answer with a single text
    /// segment gets exactly one. Structured block data is emitted and
    /// recorded untouched; transforms only shape `state:final` values.
    ///
    /// A JSON fence the model never closed is finalized here.
    pub fn finish<K>(mut self, scope: &mut RunScope, sink: &mut K) -> Result<StreamOutcome>
    where
        K: EventSink + ?Sized,
    {
        self.parser.close_open_fence();
        let blocks = self.parser.blocks();

        for block in blocks.iter().filter(|b| b.kind == BlockKind::Text) {
            self.emit(
                sink,
                UiEventKind::ContentText {
                    block_id: block.id.clone(),
                    index: block.index,
                    text: block.text_or_empty().to_string(),
                    is_final: true,
                },
            )?;
        }

        let structured: Vec<&Block> = blocks
            .iter()
            .filter(|b| b.kind == BlockKind::Structured)
            .collect();
        match self.target {
            TargetMode::State => self.emit_state_final(&structured, scope, sink)?,
            TargetMode::Messages => {
                for block in &structured {
                    self.emit(
                        sink,
                        UiEventKind::ContentStructured {
                            block_id: block.id.clone(),
                            index: block.index,
                            data: block.data.clone(),
                            source_text: block.source_text.clone(),
                            is_final: true,
                        },
                    )?;
                }
            }
        }

        let parsed = structured
            .iter()
            .rev()
            .find_map(|b| b.data.clone())
            .and_then(|data| self.validate(data));

        debug!(
            message_id = %self.message_id,
            blocks = blocks.len(),
            events = self.sequencer.next_seq() - 1,
            parsed = parsed.is_some(),
            "stream finalized"
        );

        Ok(StreamOutcome {
            message: PersistedMessage {
                id: self.message_id,
                role: Role::Assistant,
                content: self.raw_text,
                metadata: Some(MessageMetadata {
                    blocks: Some(blocks),
                }),
            },
            parsed,
        })
    }

    /// One `state:final` per key of the structured objects, later blocks
    /// overriding earlier ones.
    fn emit_state_final<K>(
        &mut self,
        structured: &[&Block],
        scope: &mut RunScope,
        sink: &mut K,
    ) -> Result<()>
    where
        K: EventSink + ?Sized,
    {
        let merged = merge_state(structured.iter().copied());
        for (key, value) in &merged {
            match scope.transform(&self.transforms, &self.message_id, key, value) {
                Ok(value) => self.emit(
                    sink,
                    UiEventKind::StateFinal {
                        key: key.clone(),
                        value,
                    },
                )?,
                Err(err) => debug!(key = %key, error = %err, "final transform failed, key skipped"),
            }
        }
        Ok(())
    }

    fn validate(&self, data: Value) -> Option<Value> {
        match &self.validator {
            Some(validator) if !validator(&data) => {
                warn!(message_id = %self.message_id, "structured output failed schema validation");
                None
            }
            _ => Some(data),
        }
    }

    fn emit<K>(&mut self, sink: &mut K, kind: UiEventKind) -> Result<()>
    where
        K: EventSink + ?Sized,
    {
        sink.send(self.sequencer.stamp(kind))
    }
}

/// Record the hash of `value` under `slot`; `true` if it differs from the
/// previous one.
fn changed(sent: &mut HashMap<String, String>, slot: &str, value: &Value) -> bool {
    let hash = stable_hash(value);
    if sent.get(slot) == Some(&hash) {
        return false;
    }
    let _ = sent.insert(slot.to_string(), hash);
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
