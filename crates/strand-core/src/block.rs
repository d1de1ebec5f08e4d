//! Content block types.
//!
//! A [`Block`] is one addressable unit of a model response. Blocks are
//! produced append-only: a later update carrying the same `id` replaces the
//! earlier one in place, and the `index` assigned at creation fixes the
//! render order for the life of the message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{ToolRecord, ToolState};

/// Kind of content a block holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Free prose outside any fence.
    Text,
    /// A fenced JSON region.
    Structured,
    /// Model reasoning / thinking text.
    Reasoning,
    /// A tool invocation tracked through its lifecycle.
    ToolCall,
}

impl BlockKind {
    /// Wire name of the kind, used when deriving block ids.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Structured => "structured",
            Self::Reasoning => "reasoning",
            Self::ToolCall => "tool_call",
        }
    }
}

/// A typed, addressable content block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Block kind.
    #[serde(rename = "type")]
    pub kind: BlockKind,
    /// Logical identity, stable across partial and final updates.
    pub id: String,
    /// Render position within the message.
    pub index: u32,
    /// Text payload (text and reasoning blocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Parsed payload (structured blocks; tool input for tool calls).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Raw trimmed fence interior (structured blocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    /// Whether the block is still being streamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    /// Tool call id (tool call blocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    /// Tool name (tool call blocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool lifecycle state (tool call blocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ToolState>,
    /// Tool output (tool call blocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Tool error message (tool call blocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Block {
    fn bare(kind: BlockKind, id: impl Into<String>, index: u32) -> Self {
        Self {
            kind,
            id: id.into(),
            index,
            text: None,
            data: None,
            source_text: None,
            partial: None,
            tool_id: None,
            name: None,
            state: None,
            output: None,
            error: None,
        }
    }

    /// Create a text block.
    pub fn text(id: impl Into<String>, index: u32, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::bare(BlockKind::Text, id, index)
        }
    }

    /// Create a reasoning block.
    pub fn reasoning(id: impl Into<String>, index: u32, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::bare(BlockKind::Reasoning, id, index)
        }
    }

    /// Create a structured block from its raw source and best parse.
    pub fn structured(
        id: impl Into<String>,
        index: u32,
        data: Option<Value>,
        source_text: impl Into<String>,
    ) -> Self {
        Self {
            data,
            source_text: Some(source_text.into()),
            ..Self::bare(BlockKind::Structured, id, index)
        }
    }

    /// Create a tool call block mirroring a tool record.
    pub fn tool_call(id: impl Into<String>, index: u32, record: &ToolRecord) -> Self {
        let mut block = Self::bare(BlockKind::ToolCall, id, index);
        block.apply_tool(record);
        block
    }

    /// Copy the mutable fields of a tool record onto this block.
    pub fn apply_tool(&mut self, record: &ToolRecord) {
        self.tool_id = Some(record.id.clone());
        self.name = Some(record.name.clone());
        self.state = Some(record.state);
        self.data.clone_from(&record.input);
        self.output.clone_from(&record.output);
        self.error.clone_from(&record.error);
    }

    /// Mark the block as partial (`true`) or final (`false`).
    #[must_use]
    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = Some(partial);
        self
    }

    /// Whether the block is still streaming.
    pub fn is_partial(&self) -> bool {
        self.partial.unwrap_or(false)
    }

    /// Text payload, or the empty string.
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Sort blocks into render order.
pub fn sort_by_index(blocks: &mut [Block]) {
    blocks.sort_by_key(|b| b.index);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_block_wire_shape() {
        let block = Block::text("b1", 0, "hello");
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v, json!({"type": "text", "id": "b1", "index": 0, "text": "hello"}));
    }

    #[test]
    fn structured_block_uses_camel_case_source_text() {
        let block = Block::structured("s", 1, Some(json!({"a": 1})), r#"{"a":1}"#);
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "structured");
        assert_eq!(v["sourceText"], r#"{"a":1}"#);
        assert_eq!(v["data"]["a"], 1);
    }

    #[test]
    fn structured_block_without_data_omits_field() {
        let block = Block::structured("s", 1, None, "{broken");
        let v = serde_json::to_value(&block).unwrap();
        assert!(v.get("data").is_none());
        assert_eq!(v["sourceText"], "{broken");
    }

    #[test]
    fn deserializes_minimal_block() {
        let block: Block =
            serde_json::from_value(json!({"type": "reasoning", "id": "r", "index": 3, "text": "hm"}))
                .unwrap();
        assert_eq!(block.kind, BlockKind::Reasoning);
        assert_eq!(block.index, 3);
        assert!(!block.is_partial());
    }

    #[test]
    fn tool_call_block_mirrors_record() {
        let mut record = ToolRecord::pending("t1", "search");
        record.input = Some(json!({"q": "rust"}));
        let block = Block::tool_call("tool:t1", 2, &record);
        assert_eq!(block.kind, BlockKind::ToolCall);
        assert_eq!(block.tool_id.as_deref(), Some("t1"));
        assert_eq!(block.state, Some(ToolState::Pending));
        assert_eq!(block.data, Some(json!({"q": "rust"})));
    }

    #[test]
    fn sort_orders_by_index() {
        let mut blocks = vec![Block::text("b", 2, "b"), Block::text("a", 0, "a")];
        sort_by_index(&mut blocks);
        assert_eq!(blocks[0].id, "a");
    }
}
