//! Transcript message types.
//!
//! [`PersistedMessage`] is what the persistence collaborator stores: raw text
//! plus, for messages produced by the live path, the finalized block list in
//! `metadata.blocks`. [`MessageWithBlocks`] is the reconstructed form a UI
//! binding consumes, whether it was materialized live or from history.

use serde::{Deserialize, Serialize};

use crate::block::Block;

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human input.
    User,
    /// Model output.
    Assistant,
}

/// Metadata attached to a persisted message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Finalized block list recorded when the message was produced live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Block>>,
}

/// A message as stored by the persistence layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    /// Message id.
    pub id: String,
    /// Author.
    pub role: Role,
    /// Raw accumulated text.
    pub content: String,
    /// Optional metadata (absent on legacy messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl PersistedMessage {
    /// Finalized blocks recorded on this message, if any.
    pub fn recorded_blocks(&self) -> Option<&[Block]> {
        self.metadata.as_ref()?.blocks.as_deref()
    }
}

/// A message split into ordered blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageWithBlocks {
    /// Message id.
    pub id: String,
    /// Author.
    pub role: Role,
    /// Blocks in render order.
    pub blocks: Vec<Block>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_message_has_no_blocks() {
        let m: PersistedMessage =
            serde_json::from_value(json!({"id": "m1", "role": "assistant", "content": "hi"}))
                .unwrap();
        assert!(m.recorded_blocks().is_none());
    }

    #[test]
    fn recorded_blocks_round_trip_through_metadata() {
        let m = PersistedMessage {
            id: "m1".into(),
            role: Role::Assistant,
            content: "hi".into(),
            metadata: Some(MessageMetadata {
                blocks: Some(vec![Block::text("t", 0, "hi")]),
            }),
        };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["metadata"]["blocks"][0]["text"], "hi");
        let back: PersistedMessage = serde_json::from_value(v).unwrap();
        assert_eq!(back.recorded_blocks().map(<[Block]>::len), Some(1));
    }
}
