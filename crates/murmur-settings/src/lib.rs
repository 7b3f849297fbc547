//! # murmur-settings
//!
//! Layered configuration for the murmur chat server.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`MurmurSettings::default()`]
//! 2. **User file**: `~/.murmur/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PORT` and `MURMUR_*` overrides
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, settings_path};
pub use types::*;
