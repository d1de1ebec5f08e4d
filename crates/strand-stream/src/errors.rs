//! Streamer error types.

use strand_parser::ParseError;
use thiserror::Error;

/// Errors that abort a streaming run.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The block parser rejected a delta (structured buffer overflow).
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The event sink can no longer accept events.
    #[error("event sink closed")]
    Sink,
}

/// Result type for streamer operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Failure of a per-key transform. Treated as "value not ready": the key is
/// skipped for that round, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transform failed: {0}")]
pub struct TransformError(pub String);

impl TransformError {
    /// Build from any displayable reason.
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_converts() {
        let err: StreamError = ParseError::StructuredOverflow { limit: 4 }.into();
        assert_eq!(err.to_string(), "parse error: structured block exceeds 4 bytes");
    }

    #[test]
    fn transform_error_display() {
        assert_eq!(TransformError::new("missing id").to_string(), "transform failed: missing id");
    }
}
