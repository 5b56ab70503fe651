//! # wxbridge-settings
//!
//! Layered configuration for the gateway bridge.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`BridgeSettings::default()`]
//! 2. **User file** — `~/.wxbridge/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `WXBRIDGE_*` / `WECHAT_*` overrides
//!
//! Command-line flags are applied by the binary on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, expand_home, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = BridgeSettings::default();
        let path = settings_path();
        assert!(path.ends_with(".wxbridge/settings.json"));
    }
}
