//! Consumer-side event processor.
//!
//! [`EventProcessor`] turns a possibly reordered stream of [`UiEvent`]s back
//! into materialized state: per-key values, content blocks and tool records.
//!
//! Events are applied strictly in `seq` order. An early event is parked in a
//! reorder buffer until the gap before it closes, then the buffer drains in
//! a cascade. The buffer is bounded: once it holds more than `max_pending`
//! events the processor gives up on the missing range, reports it through
//! [`ProcessorListener::on_gap`] and resumes from the lowest buffered seq.
//!
//! A key that received `state:final` ignores later `state:streaming` events
//! until the processor is reset.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde_json::{Map, Value};
use strand_core::block::sort_by_index;
use strand_core::{
    Block, MessageWithBlocks, Role, ToolRecord, ToolState, UiEvent, UiEventKind,
};
use strand_settings::ProcessorSettings;
use tracing::{debug, warn};

use crate::errors::{ProcessorError, Result};

/// Observable change produced by applying one event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessorUpdate {
    /// A state key changed.
    State {
        /// State key.
        key: String,
        /// New value.
        value: Value,
        /// Whether the key is now finalized.
        is_final: bool,
        /// Namespace of the originating event.
        namespace: Option<String>,
    },
    /// A block was inserted or replaced.
    Block(Block),
    /// A tool record was created or updated.
    Tool(ToolRecord),
}

/// Callbacks for conditions that do not interrupt processing.
pub trait ProcessorListener: Send {
    /// An event arrived ahead of `expected` and was buffered.
    fn on_out_of_order(&mut self, _expected: u64, _received: u64) {}

    /// Events `from..=to` were given up on.
    fn on_gap(&mut self, _from: u64, _to: u64) {}

    /// Applying `event` failed.
    fn on_error(&mut self, _event: &UiEvent, _error: &ProcessorError) {}
}

/// Processor tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Reorder buffer bound. `None` buffers without limit.
    pub max_pending: Option<usize>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from(&ProcessorSettings::default())
    }
}

impl From<&ProcessorSettings> for ProcessorConfig {
    fn from(settings: &ProcessorSettings) -> Self {
        Self {
            max_pending: settings.max_pending(),
        }
    }
}

/// Rebuilds state, blocks and tools from one logical event stream.
pub struct EventProcessor {
    config: ProcessorConfig,
    listener: Option<Box<dyn ProcessorListener>>,
    stream_id: Option<String>,
    expected_seq: u64,
    pending: BTreeMap<u64, UiEvent>,
    finalized: HashSet<String>,
    state: Map<String, Value>,
    blocks: HashMap<String, Block>,
    tools: HashMap<String, ToolRecord>,
    tool_order: Vec<String>,
    next_index: u32,
}

impl fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventProcessor")
            .field("stream_id", &self.stream_id)
            .field("expected_seq", &self.expected_seq)
            .field("pending", &self.pending.len())
            .field("blocks", &self.blocks.len())
            .field("tools", &self.tools.len())
            .field("listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for EventProcessor {
    fn default() -> Self {
        Self::new(ProcessorConfig::default())
    }
}

impl EventProcessor {
    /// Processor expecting seq 1.
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            listener: None,
            stream_id: None,
            expected_seq: 1,
            pending: BTreeMap::new(),
            finalized: HashSet::new(),
            state: Map::new(),
            blocks: HashMap::new(),
            tools: HashMap::new(),
            tool_order: Vec::new(),
            next_index: 0,
        }
    }

    /// Attach a listener.
    #[must_use]
    pub fn with_listener(mut self, listener: impl ProcessorListener + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Feed one event. Returns the updates of every event applied as a
    /// result, which may be none (buffered) or several (drained).
    pub fn process(&mut self, event: UiEvent) -> Vec<ProcessorUpdate> {
        let mut updates = Vec::new();
        let seq = event.seq;

        if seq < self.expected_seq {
            debug!(seq, expected = self.expected_seq, "stale event dropped");
            return updates;
        }

        if seq == self.expected_seq {
            self.apply(&event, &mut updates);
            self.expected_seq += 1;
            self.drain(&mut updates);
        } else {
            debug!(seq, expected = self.expected_seq, "event buffered out of order");
            if let Some(listener) = self.listener.as_mut() {
                listener.on_out_of_order(self.expected_seq, seq);
            }
            let _ = self.pending.insert(seq, event);
            self.enforce_pending_bound(&mut updates);
        }
        updates
    }

    /// Feed several events in delivery order.
    pub fn process_all(&mut self, events: impl IntoIterator<Item = UiEvent>) -> Vec<ProcessorUpdate> {
        events
            .into_iter()
            .flat_map(|event| self.process(event))
            .collect()
    }

    fn drain(&mut self, updates: &mut Vec<ProcessorUpdate>) {
        while let Some(event) = self.pending.remove(&self.expected_seq) {
            self.apply(&event, updates);
            self.expected_seq += 1;
        }
    }

    fn enforce_pending_bound(&mut self, updates: &mut Vec<ProcessorUpdate>) {
        let Some(max) = self.config.max_pending else {
            return;
        };
        if self.pending.len() <= max {
            return;
        }
        let Some(&lowest) = self.pending.keys().next() else {
            return;
        };
        let (from, to) = (self.expected_seq, lowest - 1);
        warn!(from, to, buffered = self.pending.len(), "reorder buffer full, skipping missing events");
        if let Some(listener) = self.listener.as_mut() {
            listener.on_gap(from, to);
        }
        self.expected_seq = lowest;
        self.drain(updates);
    }

    fn apply(&mut self, event: &UiEvent, updates: &mut Vec<ProcessorUpdate>) {
        if let Err(err) = self.apply_kind(event, updates) {
            warn!(seq = event.seq, event_type = event.kind.type_name(), error = %err, "event not applied");
            if let Some(listener) = self.listener.as_mut() {
                listener.on_error(event, &err);
            }
        }
    }

    fn apply_kind(&mut self, event: &UiEvent, updates: &mut Vec<ProcessorUpdate>) -> Result<()> {
        let event_type = event.kind.type_name();
        match &event.kind {
            UiEventKind::StateStreaming { key, value } => {
                require(key, ProcessorError::MissingKey { event_type })?;
                if self.finalized.contains(key) {
                    debug!(key = %key, "update for finalized key ignored");
                    return Ok(());
                }
                self.set_state(key, value, false, event, updates);
            }
            UiEventKind::StateFinal { key, value } => {
                require(key, ProcessorError::MissingKey { event_type })?;
                let _ = self.finalized.insert(key.clone());
                self.set_state(key, value, true, event, updates);
            }
            UiEventKind::ContentText {
                block_id,
                index,
                text,
                is_final,
            } => {
                require(block_id, ProcessorError::MissingBlockId { event_type })?;
                self.upsert_block(
                    mark_partial(Block::text(block_id, *index, text), *is_final),
                    event_type,
                    updates,
                )?;
            }
            UiEventKind::ContentReasoning {
                block_id,
                index,
                text,
                is_final,
            } => {
                require(block_id, ProcessorError::MissingBlockId { event_type })?;
                self.upsert_block(
                    mark_partial(Block::reasoning(block_id, *index, text), *is_final),
                    event_type,
                    updates,
                )?;
            }
            UiEventKind::ContentStructured {
                block_id,
                index,
                data,
                source_text,
                is_final,
            } => {
                require(block_id, ProcessorError::MissingBlockId { event_type })?;
                let mut block = Block::structured(block_id, *index, data.clone(), "");
                block.source_text.clone_from(source_text);
                self.upsert_block(mark_partial(block, *is_final), event_type, updates)?;
            }
            UiEventKind::ToolStart {
                tool_id,
                name,
                input,
            } => {
                require(tool_id, ProcessorError::MissingToolId { event_type })?;
                self.start_tool(tool_id, name, input.clone(), updates)?;
            }
            UiEventKind::ToolInput { tool_id, input } => {
                require(tool_id, ProcessorError::MissingToolId { event_type })?;
                self.update_tool(tool_id, updates, |record| {
                    record.input = Some(input.clone());
                    record.state = ToolState::Running;
                });
            }
            UiEventKind::ToolOutput { tool_id, output } => {
                require(tool_id, ProcessorError::MissingToolId { event_type })?;
                self.update_tool(tool_id, updates, |record| {
                    record.output = Some(output.clone());
                    record.state = ToolState::Complete;
                });
            }
            UiEventKind::ToolError { tool_id, error } => {
                require(tool_id, ProcessorError::MissingToolId { event_type })?;
                self.update_tool(tool_id, updates, |record| {
                    record.error = Some(error.clone());
                    record.state = ToolState::Error;
                });
            }
        }
        Ok(())
    }

    fn set_state(
        &mut self,
        key: &str,
        value: &Value,
        is_final: bool,
        event: &UiEvent,
        updates: &mut Vec<ProcessorUpdate>,
    ) {
        let _ = self.state.insert(key.to_string(), value.clone());
        updates.push(ProcessorUpdate::State {
            key: key.to_string(),
            value: value.clone(),
            is_final,
            namespace: event.namespace.clone(),
        });
    }

    /// Insert or replace by id. A replaced block keeps its original index.
    fn upsert_block(
        &mut self,
        mut block: Block,
        event_type: &'static str,
        updates: &mut Vec<ProcessorUpdate>,
    ) -> Result<()> {
        if let Some(existing) = self.blocks.get(&block.id) {
            block.index = existing.index;
        }
        let after = block.index.checked_add(1).ok_or(ProcessorError::IndexOverflow {
            event_type,
            index: block.index,
        })?;
        self.next_index = self.next_index.max(after);
        let _ = self.blocks.insert(block.id.clone(), block.clone());
        updates.push(ProcessorUpdate::Block(block));
        Ok(())
    }

    fn start_tool(
        &mut self,
        tool_id: &str,
        name: &str,
        input: Option<Value>,
        updates: &mut Vec<ProcessorUpdate>,
    ) -> Result<()> {
        let mut record = ToolRecord::pending(tool_id, name);
        record.input = input;

        let index = self.next_index;
        self.upsert_block(Block::tool_call(tool_id, index, &record), "tool:start", updates)?;
        if !self.tools.contains_key(tool_id) {
            self.tool_order.push(tool_id.to_string());
        }
        let _ = self.tools.insert(tool_id.to_string(), record.clone());
        updates.push(ProcessorUpdate::Tool(record));
        debug!(tool_id, name, "tool started");
        Ok(())
    }

    /// Merge onto an existing tool record and its block. Unknown ids are a
    /// no-op: the start event may have been skipped over.
    fn update_tool(
        &mut self,
        tool_id: &str,
        updates: &mut Vec<ProcessorUpdate>,
        merge: impl FnOnce(&mut ToolRecord),
    ) {
        let Some(record) = self.tools.get_mut(tool_id) else {
            debug!(tool_id, "update for unknown tool ignored");
            return;
        };
        merge(record);
        let record = record.clone();
        if let Some(block) = self.blocks.get_mut(tool_id) {
            block.apply_tool(&record);
            updates.push(ProcessorUpdate::Block(block.clone()));
        }
        updates.push(ProcessorUpdate::Tool(record));
    }

    /// Drop everything and expect seq 1 again.
    pub fn reset(&mut self) {
        self.expected_seq = 1;
        self.pending.clear();
        self.finalized.clear();
        self.state.clear();
        self.blocks.clear();
        self.tools.clear();
        self.tool_order.clear();
        self.next_index = 0;
    }

    /// Switch to stream `id`. Repeating the current id changes nothing.
    pub fn reset_for_new_stream(&mut self, id: &str) {
        if self.stream_id.as_deref() == Some(id) {
            return;
        }
        debug!(stream_id = id, previous = ?self.stream_id, "processor switched stream");
        self.reset();
        self.stream_id = Some(id.to_string());
    }

    /// Blocks in render order.
    pub fn blocks(&self) -> Vec<Block> {
        let mut blocks: Vec<Block> = self.blocks.values().cloned().collect();
        sort_by_index(&mut blocks);
        blocks
    }

    /// Tool records in start order.
    pub fn tools(&self) -> Vec<&ToolRecord> {
        self.tool_order
            .iter()
            .filter_map(|id| self.tools.get(id))
            .collect()
    }

    /// Tool record by id.
    pub fn tool(&self, id: &str) -> Option<&ToolRecord> {
        self.tools.get(id)
    }

    /// Latest value per state key.
    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    /// Whether `key` received `state:final`.
    pub fn is_finalized(&self, key: &str) -> bool {
        self.finalized.contains(key)
    }

    /// Seq the processor is waiting for.
    pub fn expected_seq(&self) -> u64 {
        self.expected_seq
    }

    /// Number of buffered out-of-order events.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Stream currently tracked.
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// Current blocks as an assistant message.
    pub fn message(&self, id: impl Into<String>) -> MessageWithBlocks {
        MessageWithBlocks {
            id: id.into(),
            role: Role::Assistant,
            blocks: self.blocks(),
        }
    }
}

fn require(value: &str, error: ProcessorError) -> Result<()> {
    if value.is_empty() { Err(error) } else { Ok(()) }
}

/// Streaming updates are marked partial; final ones carry no flag, matching
/// the blocks a parser finalizes.
fn mark_partial(block: Block, is_final: bool) -> Block {
    if is_final { block } else { block.with_partial(true) }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
