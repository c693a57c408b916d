//! Layered configuration for the relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. Compiled defaults ([`RelaySettings::default()`])
//! 2. A JSON file, `~/.relay/settings.json` by default, deep-merged over defaults
//! 3. `RELAY_*` environment variables
//!
//! Command-line flags are applied on top by the binary.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, relay_home, settings_path};
pub use types::{
    LoggingSettings, ProducerSettings, RelaySettings, ServerSettings, StoreBackend, StoreSettings,
};
