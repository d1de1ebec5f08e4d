//! # strand-core
//!
//! Shared vocabulary for the strand streaming pipeline.
//!
//! Every other strand crate depends on the types defined here:
//!
//! - **Blocks**: [`Block`] and [`BlockKind`], the typed, addressable units a
//!   model response is split into (text, structured JSON, reasoning, tool calls)
//! - **UI events**: [`UiEvent`] with its [`UiEventKind`] union, plus the
//!   [`EventSequencer`] that stamps id/seq/timestamp on the producer side
//! - **Tools**: [`ToolRecord`] and its [`ToolState`] lifecycle
//! - **Messages**: persisted transcript messages and their block-carrying
//!   reconstructed form
//! - **Stable hashing**: order-independent content hashing for reproducible ids
//! - **Logging**: `tracing` subscriber bootstrap and test capture helpers

#![deny(unsafe_code)]

pub mod block;
pub mod events;
pub mod hash;
pub mod logging;
pub mod messages;
pub mod tools;

pub use block::{Block, BlockKind};
pub use events::{EventSequencer, ParseTargetModeError, TargetMode, UiEvent, UiEventKind};
pub use hash::{canonicalize, stable_hash};
pub use messages::{MessageMetadata, MessageWithBlocks, PersistedMessage, Role};
pub use tools::{ToolRecord, ToolState};

/// Schema check applied to finalized structured values.
///
/// Returns `true` when the value is acceptable. Used both when a live stream
/// finalizes and when history is reconstructed.
pub type SchemaValidator = dyn Fn(&serde_json::Value) -> bool + Send + Sync;
