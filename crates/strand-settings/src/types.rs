//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! settings file only needs to list the values it changes.

use serde::{Deserialize, Serialize};
use strand_core::TargetMode;

use crate::errors::{Result, SettingsError};

/// Default cap for both the free-text and the in-fence buffer (64 KiB).
pub const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

/// Default reorder-buffer bound for the event processor.
pub const DEFAULT_MAX_PENDING_EVENTS: usize = 1024;

/// Root settings type.
///
/// ```json
/// {
///   "parser": { "structuredBufferLimit": 131072 },
///   "processor": { "maxPendingEvents": 0 },
///   "stream": { "defaultTarget": "state" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrandSettings {
    /// Block parser buffers.
    pub parser: ParserSettings,
    /// Consumer-side event processing.
    pub processor: ProcessorSettings,
    /// Producer-side streaming.
    pub stream: StreamSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl StrandSettings {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.parser.text_buffer_limit == 0 {
            return Err(SettingsError::InvalidValue(
                "parser.textBufferLimit must be > 0".into(),
            ));
        }
        if self.parser.structured_buffer_limit == 0 {
            return Err(SettingsError::InvalidValue(
                "parser.structuredBufferLimit must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Block parser buffer limits, in bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParserSettings {
    /// Soft cap on the free-text buffer; overflow trims from the front.
    pub text_buffer_limit: usize,
    /// Hard cap on the in-fence buffer; overflow fails the append.
    pub structured_buffer_limit: usize,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            text_buffer_limit: DEFAULT_BUFFER_LIMIT,
            structured_buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }
}

/// Event processor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorSettings {
    /// Maximum out-of-order events held before skipping ahead. `0` disables
    /// the bound.
    pub max_pending_events: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_pending_events: DEFAULT_MAX_PENDING_EVENTS,
        }
    }
}

impl ProcessorSettings {
    /// The bound as an option (`None` = unbounded).
    pub fn max_pending(&self) -> Option<usize> {
        (self.max_pending_events > 0).then_some(self.max_pending_events)
    }
}

/// Streamer settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Target mode used when the caller does not pick one.
    pub default_target: TargetMode,
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`EnvFilter` directive syntax).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
