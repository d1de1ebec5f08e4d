//! Tool call records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    /// Announced, no input yet.
    Pending,
    /// Input received, awaiting output.
    Running,
    /// Output received.
    Complete,
    /// Failed.
    Error,
}

/// Consumer-side view of a single tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Tool call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Current lifecycle state.
    pub state: ToolState,
    /// Latest input arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Latest output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolRecord {
    /// A freshly announced tool call.
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: ToolState::Pending,
            input: None,
            output: None,
            error: None,
        }
    }
}
