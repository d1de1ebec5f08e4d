//! Processor error types.

use thiserror::Error;

/// Failure to apply a single event. Reported to the listener; the stream
/// keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    /// A `state:*` event with an empty key.
    #[error("{event_type} event has no key")]
    MissingKey {
        /// Wire type of the offending event.
        event_type: &'static str,
    },

    /// A `content:*` event with an empty block id.
    #[error("{event_type} event has no block id")]
    MissingBlockId {
        /// Wire type of the offending event.
        event_type: &'static str,
    },

    /// A `tool:*` event with an empty tool id.
    #[error("{event_type} event has no tool id")]
    MissingToolId {
        /// Wire type of the offending event.
        event_type: &'static str,
    },

    /// A block index with no room for a following block.
    #[error("{event_type} event has out of range index {index}")]
    IndexOverflow {
        /// Wire type of the offending event.
        event_type: &'static str,
        /// Index carried by the event.
        index: u32,
    },
}

/// Result type for event application.
pub type Result<T> = std::result::Result<T, ProcessorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_event_type() {
        let err = ProcessorError::MissingToolId {
            event_type: "tool:output",
        };
        assert_eq!(err.to_string(), "tool:output event has no tool id");
    }
}
