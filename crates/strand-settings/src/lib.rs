//! # strand-settings
//!
//! Configuration for the strand pipeline, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`StrandSettings::default()`]
//! 2. **User file**: `~/.strand/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `STRAND_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use strand_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("fence cap: {}", settings.parser.structured_buffer_limit);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton, filled on first [`get_settings`] call.
static SETTINGS: OnceLock<StrandSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads `~/.strand/settings.json` with env var overrides,
/// falling back to compiled defaults if loading fails.
pub fn get_settings() -> &'static StrandSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            StrandSettings::default()
        })
    })
}

/// Install the global tracing subscriber described by `logging`.
///
/// `RUST_LOG` still wins over `logging.level` when set. Subsequent calls are
/// no-ops.
pub fn init_subscriber_from(logging: &LoggingSettings) {
    if logging.json {
        strand_core::logging::init_json_subscriber(&logging.level);
    } else {
        strand_core::logging::init_subscriber(&logging.level);
    }
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: StrandSettings) -> std::result::Result<(), StrandSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
