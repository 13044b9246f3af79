//! # relay-agent
//!
//! Form relay binary: loads settings, sets up logging and metrics, and runs
//! the WebSocket relay until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use relay_server::config::ServerConfig;
use relay_server::server::RelayServer;
use relay_settings::{LogFormat, PolicyConfig, RelaySettings};

/// Real-time form relay over WebSockets.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "Real-time form relay over WebSockets")]
struct Cli {
    /// Settings file (defaults to `~/.form-relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dotenv file read for `WS_*` variables the environment leaves unset.
    #[arg(long, default_value = relay_settings::DOTENV_FILE)]
    env_file: PathBuf,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides settings; `RUST_LOG` wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format (overrides settings).
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,

    /// Also write logs to this file (overrides settings).
    #[arg(long)]
    log_file: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CliLogFormat {
    Compact,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Compact => Self::Compact,
            CliLogFormat::Json => Self::Json,
        }
    }
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(relay_settings::settings_path)
    }

    /// Flags take precedence over the file and `WS_*` variables.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format.into();
        }
        if let Some(file) = &self.log_file {
            settings.logging.file = Some(file.clone());
        }
    }
}

/// Load settings and build the server without binding anything.
fn build_server(cli: &Cli) -> Result<(RelaySettings, RelayServer)> {
    let path = cli.settings_path();
    let mut settings = relay_settings::load_settings_with_dotenv(&path, &cli.env_file)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    let policy = PolicyConfig::from_settings(&settings.policy).context("Invalid relay policy")?;
    let server = RelayServer::new(ServerConfig::from(&settings.server), policy);
    Ok((settings, server))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (settings, mut server) =
        tracing::subscriber::with_default(relay_logging::bootstrap_subscriber(), || {
            build_server(&cli)
        })?;

    let _log_guard = relay_logging::init_from_settings(&settings.logging)
        .context("Failed to set up logging")?;

    match relay_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics disabled"),
    }

    let policy = &server.context().policy;
    match policy.allowed_origins() {
        Some(origins) => tracing::info!(?origins, "origin allow-list enabled"),
        None => tracing::warn!("no origin allow-list configured, any origin is accepted"),
    }
    tracing::info!(
        forms = ?policy.allowed_form_names(),
        max_connections_per_ip = ?policy.max_connections_per_ip(),
        "relay policy loaded"
    );

    let (addr, handle) = server.listen().await.context("Failed to start server")?;
    tracing::info!(%addr, "form relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let timeout = server.config().shutdown_timeout;
    if !server.shutdown().graceful_shutdown(Some(timeout)).await {
        tracing::warn!("sessions still open after {timeout:?}");
    }
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_settings(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("settings.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn cli_defaults_are_unset() {
        let cli = Cli::parse_from(["relay-agent"]);
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.log_format.is_none());
        assert!(cli.log_file.is_none());
        assert_eq!(cli.env_file, PathBuf::from(".env"));
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "relay-agent",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--log-file",
            "logs/websocket.log",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.logging.file.as_deref(), Some("logs/websocket.log"));
    }

    #[test]
    fn cli_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["relay-agent", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn build_server_from_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(
            &dir,
            r#"{"server": {"port": 6001}, "policy": {"authToken": "file-token"}}"#,
        );
        let cli = Cli::parse_from(["relay-agent", "--config", path.to_str().unwrap()]);
        let (settings, server) = build_server(&cli).unwrap();
        assert_eq!(settings.server.port, 6001);
        assert!(server.context().policy.token_matches("file-token"));
    }

    #[test]
    fn build_server_reads_dotenv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, r#"{"policy": {"authToken": "file-token"}}"#);
        let env_file = dir.path().join("relay.env");
        std::fs::write(&env_file, "WS_ALLOWED_FORMS=chat_room,orders,health_check\n").unwrap();
        let cli = Cli::parse_from([
            "relay-agent",
            "--config",
            path.to_str().unwrap(),
            "--env-file",
            env_file.to_str().unwrap(),
        ]);
        let (_, server) = build_server(&cli).unwrap();
        assert!(server.context().policy.is_form_allowed("orders"));
    }

    #[test]
    fn build_server_fails_on_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(&dir, "{not json");
        let cli = Cli::parse_from(["relay-agent", "--config", path.to_str().unwrap()]);
        let err = build_server(&cli).err().unwrap();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
