use serde::{Deserialize, Serialize};

/// Raw admission and routing policy inputs, as written in the settings file.
///
/// Validated into a [`PolicyConfig`](crate::PolicyConfig) before use.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySettings {
    /// Shared secret every envelope must carry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// `scheme://host[:port]` origins allowed to connect. `None` allows any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
    /// Cap on concurrent connections from one source address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections_per_ip: Option<usize>,
    /// Source addresses allowed to connect. `None` allows any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<Vec<String>>,
    /// Form (channel) names clients may name in an envelope.
    pub allowed_form_names: Vec<String>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            auth_token: None,
            allowed_origins: None,
            max_connections_per_ip: None,
            allowed_ips: None,
            allowed_form_names: vec!["chat_room".to_string(), "health_check".to_string()],
        }
    }
}
