//! # relay-settings
//!
//! Configuration for the form relay, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.form-relay/settings.json` or `--config <path>`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `WS_*` overrides (highest priority), with a
//!    `.env` file filling in variables the process environment leaves unset
//!
//! The admission and routing core never reads these layers directly. It is
//! handed a [`PolicyConfig`], an immutable snapshot validated once at startup.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod policy;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    DOTENV_FILE, deep_merge, load_dotenv, load_settings, load_settings_from_path,
    load_settings_with_dotenv, settings_path,
};
pub use policy::{HEALTH_CHECK_FORM, PolicyConfig};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.port, 5000);
        let _path = settings_path();
    }

    #[test]
    fn default_settings_build_a_policy_once_token_is_set() {
        let mut settings = RelaySettings::default();
        assert!(PolicyConfig::from_settings(&settings.policy).is_err());
        settings.policy.auth_token = Some("secret".into());
        let policy = PolicyConfig::from_settings(&settings.policy).unwrap();
        assert!(policy.is_form_allowed(HEALTH_CHECK_FORM));
    }
}
