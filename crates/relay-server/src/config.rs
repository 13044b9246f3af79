//! Server configuration.

use std::time::Duration;

use relay_settings::ServerSettings;

/// Runtime configuration for [`RelayServer`](crate::server::RelayServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// How long a peer may stay silent after a ping before it is dropped.
    pub ping_timeout: Duration,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each peer's outbound queue.
    pub send_queue_capacity: usize,
    /// Grace period for in-flight sessions on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            ping_interval: Duration::from_millis(settings.ping_interval_ms),
            ping_timeout: Duration::from_millis(settings.ping_timeout_ms),
            max_message_size: settings.max_message_size,
            send_queue_capacity: settings.send_queue_capacity.max(1),
            ..Self::default()
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_ephemeral() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn from_settings_converts_millis() {
        let settings = ServerSettings {
            ping_interval_ms: 1500,
            ping_timeout_ms: 250,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.ping_interval, Duration::from_millis(1500));
        assert_eq!(cfg.ping_timeout, Duration::from_millis(250));
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.host, "0.0.0.0");
    }

    #[test]
    fn zero_queue_capacity_is_clamped() {
        let settings = ServerSettings {
            send_queue_capacity: 0,
            ..ServerSettings::default()
        };
        assert_eq!(ServerConfig::from(&settings).send_queue_capacity, 1);
    }
}
