//! UI event wire types.
//!
//! A [`UiEvent`] is one step of the ordered stream a producer sends to a
//! remote consumer. Every event carries the common envelope (`id`, `seq`,
//! `timestamp`, optional `namespace`) with a kind-specific payload flattened
//! alongside it:
//!
//! ```text
//! {"type":"content:text","id":"…","seq":3,"timestamp":"…","blockId":"…","index":0,"text":"Hi","final":false}
//! ```
//!
//! `seq` starts at 1 and is contiguous for one logical stream; the
//! [`EventSequencer`] is the only producer-side component that assigns it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// TargetMode
// ─────────────────────────────────────────────────────────────────────────────

/// How structured output is surfaced to the consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    /// One `content:structured` event carrying the whole object per update.
    #[default]
    Messages,
    /// One `state:*` event per top-level key.
    State,
}

/// A target mode name that is neither `messages` nor `state`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown target mode: {0}")]
pub struct ParseTargetModeError(pub String);

impl std::str::FromStr for TargetMode {
    type Err = ParseTargetModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "messages" => Ok(Self::Messages),
            "state" => Ok(Self::State),
            other => Err(ParseTargetModeError(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UiEventKind
// ─────────────────────────────────────────────────────────────────────────────

/// Kind-specific payload of a [`UiEvent`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UiEventKind {
    /// Partial value for one state key.
    #[serde(rename = "state:streaming")]
    StateStreaming {
        /// State key.
        key: String,
        /// Best current value.
        value: Value,
    },

    /// Final value for one state key.
    #[serde(rename = "state:final")]
    StateFinal {
        /// State key.
        key: String,
        /// Final value.
        value: Value,
    },

    /// Free text block update.
    #[serde(rename = "content:text")]
    ContentText {
        /// Target block id.
        #[serde(rename = "blockId")]
        block_id: String,
        /// Render position.
        index: u32,
        /// Full current text of the block.
        text: String,
        /// Whether this is the last update for the block.
        #[serde(rename = "final", default)]
        is_final: bool,
    },

    /// Structured block update.
    #[serde(rename = "content:structured")]
    ContentStructured {
        /// Target block id.
        #[serde(rename = "blockId")]
        block_id: String,
        /// Render position.
        index: u32,
        /// Best current parse.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Raw fence interior, present once finalized.
        #[serde(rename = "sourceText", default, skip_serializing_if = "Option::is_none")]
        source_text: Option<String>,
        /// Whether this is the last update for the block.
        #[serde(rename = "final", default)]
        is_final: bool,
    },

    /// Reasoning block update.
    #[serde(rename = "content:reasoning")]
    ContentReasoning {
        /// Target block id.
        #[serde(rename = "blockId")]
        block_id: String,
        /// Render position.
        index: u32,
        /// Full current reasoning text.
        text: String,
        /// Whether this is the last update for the block.
        #[serde(rename = "final", default)]
        is_final: bool,
    },

    /// Tool call announced.
    #[serde(rename = "tool:start")]
    ToolStart {
        /// Tool call id.
        #[serde(rename = "toolId")]
        tool_id: String,
        /// Tool name.
        name: String,
        /// Input, if already known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },

    /// Tool input arguments.
    #[serde(rename = "tool:input")]
    ToolInput {
        /// Tool call id.
        #[serde(rename = "toolId")]
        tool_id: String,
        /// Input arguments.
        input: Value,
    },

    /// Tool produced output.
    #[serde(rename = "tool:output")]
    ToolOutput {
        /// Tool call id.
        #[serde(rename = "toolId")]
        tool_id: String,
        /// Output value.
        output: Value,
    },

    /// Tool failed.
    #[serde(rename = "tool:error")]
    ToolError {
        /// Tool call id.
        #[serde(rename = "toolId")]
        tool_id: String,
        /// Error message.
        error: String,
    },
}

impl UiEventKind {
    /// Wire name of the kind (the `type` field).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::StateStreaming { .. } => "state:streaming",
            Self::StateFinal { .. } => "state:final",
            Self::ContentText { .. } => "content:text",
            Self::ContentStructured { .. } => "content:structured",
            Self::ContentReasoning { .. } => "content:reasoning",
            Self::ToolStart { .. } => "tool:start",
            Self::ToolInput { .. } => "tool:input",
            Self::ToolOutput { .. } => "tool:output",
            Self::ToolError { .. } => "tool:error",
        }
    }

    /// Whether the payload marks a final value.
    pub fn is_final(&self) -> bool {
        match self {
            Self::StateFinal { .. } => true,
            Self::ContentText { is_final, .. }
            | Self::ContentStructured { is_final, .. }
            | Self::ContentReasoning { is_final, .. } => *is_final,
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UiEvent
// ─────────────────────────────────────────────────────────────────────────────

/// One event of an ordered UI stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UiEvent {
    /// Event identity.
    pub id: String,
    /// Position in the logical stream, starting at 1.
    pub seq: u64,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Subgraph path this event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub kind: UiEventKind,
}

impl UiEvent {
    /// Build an event with a fresh id and the current timestamp.
    pub fn new(seq: u64, kind: UiEventKind) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            seq,
            timestamp: chrono::Utc::now().to_rfc3339(),
            namespace: None,
            kind,
        }
    }

    /// Attach a namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Split the namespace into its path segments (`/` or `|` delimited).
    pub fn namespace_path(&self) -> Vec<&str> {
        self.namespace
            .as_deref()
            .map(|ns| ns.split(['/', '|']).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventSequencer
// ─────────────────────────────────────────────────────────────────────────────

/// Producer-side stamping of event envelopes.
///
/// Assigns contiguous `seq` values starting at 1 and applies the stream's
/// namespace to every event it builds.
#[derive(Clone, Debug)]
pub struct EventSequencer {
    next_seq: u64,
    namespace: Option<String>,
}

impl Default for EventSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSequencer {
    /// Sequencer without namespace.
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            namespace: None,
        }
    }

    /// Sequencer whose events all carry `namespace`.
    pub fn with_namespace(namespace: Option<String>) -> Self {
        Self {
            next_seq: 1,
            namespace,
        }
    }

    /// Wrap a payload in the next envelope.
    pub fn stamp(&mut self, kind: UiEventKind) -> UiEvent {
        let mut event = UiEvent::new(self.next_seq, kind);
        event.namespace.clone_from(&self.namespace);
        self.next_seq += 1;
        event
    }

    /// Seq the next stamped event will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Restart numbering at 1 for a new logical stream.
    pub fn reset(&mut self) {
        self.next_seq = 1;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
