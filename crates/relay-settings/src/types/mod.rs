//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may name only the fields it wants to change.

mod logging;
mod policy;
mod server;

pub use logging::*;
pub use policy::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the relay.
///
/// ```json
/// {
///   "server": { "port": 5000 },
///   "policy": { "authToken": "s3cret", "allowedFormNames": ["chat_room", "health_check"] }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and per-connection transport settings.
    pub server: ServerSettings,
    /// Admission and routing policy inputs.
    pub policy: PolicySettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"server":{"port":9000}}"#;
        let settings: RelaySettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(RelaySettings::default()).unwrap();
        assert!(value["server"].get("pingIntervalMs").is_some());
        assert!(value["policy"].get("allowedFormNames").is_some());
    }
}
