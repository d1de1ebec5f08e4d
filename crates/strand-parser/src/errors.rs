//! Parser error types.

use thiserror::Error;

/// Errors returned by [`BlockParser::append`](crate::BlockParser::append).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The content of an open JSON fence exceeded its cap. Truncating would
    /// corrupt the structured payload, so the append fails instead.
    #[error("structured block exceeds {limit} bytes")]
    StructuredOverflow {
        /// Configured cap in bytes.
        limit: usize,
    },
}

/// Result type for parser operations.
pub type Result<T> = std::result::Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_display() {
        let err = ParseError::StructuredOverflow { limit: 65_536 };
        assert_eq!(err.to_string(), "structured block exceeds 65536 bytes");
    }
}
