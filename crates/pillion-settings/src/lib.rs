//! # pillion-settings
//!
//! Layered configuration for the Pillion coordination layer.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PillionSettings::default()`]
//! 2. **User file**: `~/.pillion/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PILLION_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use pillion_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("first broker endpoint: {}", settings.broker.endpoints[0]);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton, initialized on first access.
static SETTINGS: OnceLock<PillionSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.pillion/settings.json` with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static PillionSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            PillionSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: PillionSettings) -> std::result::Result<(), PillionSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
