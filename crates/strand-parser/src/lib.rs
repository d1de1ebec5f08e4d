//! # strand-parser
//!
//! Incremental classification of model output into content blocks.
//!
//! - [`BlockParser`]: character-level state machine splitting a text stream
//!   into free-text and fenced-JSON blocks
//! - [`repair_json`] / [`parse_partial_json`]: heuristic completion of
//!   truncated JSON so an open fence can be previewed while it streams

#![deny(unsafe_code)]

pub mod errors;
pub mod parser;
pub mod repair;

pub use errors::{ParseError, Result};
pub use parser::{BlockParser, ParserLimits, ParserState};
pub use repair::{parse_partial_json, repair_json};
