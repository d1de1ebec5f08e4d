//! # strand-events
//!
//! Consumer side of the strand pipeline.
//!
//! - [`EventProcessor`]: applies a possibly reordered `UiEvent` stream in
//!   `seq` order and materializes state keys, blocks and tool records
//! - [`HistoryReconstructor`]: rebuilds the same block shape from persisted
//!   messages when no event stream is available

#![deny(unsafe_code)]

pub mod errors;
pub mod processor;
pub mod reconstruct;

pub use errors::{ProcessorError, Result};
pub use processor::{EventProcessor, ProcessorConfig, ProcessorListener, ProcessorUpdate};
pub use reconstruct::HistoryReconstructor;
