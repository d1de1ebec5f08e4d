//! # strand-stream
//!
//! Producer side of the strand pipeline.
//!
//! [`StructuredOutputStreamer`] consumes a stream of [`ModelDelta`]s, feeds
//! the block parser and pushes deduplicated [`UiEvent`](strand_core::UiEvent)s
//! into an [`EventSink`]. At the end of the stream it returns the persisted
//! assistant message together with the parsed structured value.
//!
//! Per-key [`KeyTransforms`] reshape values for the `state` target, and a
//! [`RunScope`] keeps transformed final values stable for the length of a run.

#![deny(unsafe_code)]

pub mod errors;
pub mod scope;
pub mod sink;
pub mod streamer;
pub mod transforms;

pub use errors::{Result, StreamError, TransformError};
pub use scope::{RunScope, TransformCache};
pub use sink::{ChannelSink, EventSink};
pub use streamer::{ModelDelta, StreamOutcome, StructuredOutputStreamer};
pub use transforms::{KeyTransform, KeyTransforms, merge_state};
