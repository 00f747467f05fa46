//! # helpdesk
//!
//! Helpdesk broker binary: loads settings, starts the broker task and the
//! HTTP/WebSocket gateway, and shuts both down on Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use helpdesk_broker::BrokerConfig;
use helpdesk_core::logging::{self, LogFormat};
use helpdesk_server::{HelpdeskServer, ServerConfig, ShutdownCoordinator};
use helpdesk_settings::HelpdeskSettings;

/// Real-time support-session broker.
#[derive(Parser, Debug)]
#[command(name = "helpdesk", about = "Real-time support-session broker")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.helpdesk/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `helpdesk_broker=trace` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut HelpdeskSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn load(cli: &Cli) -> Result<HelpdeskSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(helpdesk_settings::settings_path);
    let mut settings = helpdesk_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    logging::init_subscriber(&settings.logging.level, format);

    let metrics = helpdesk_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let shutdown = ShutdownCoordinator::new();
    let (broker, broker_task) =
        helpdesk_broker::spawn(BrokerConfig::from(&settings.broker), shutdown.token());

    let config = ServerConfig::from(&settings.server);
    let drain_timeout = config.shutdown_timeout();
    let server = HelpdeskServer::new(config, broker, shutdown.clone()).with_metrics(metrics);
    let (addr, serve_task) = server
        .listen()
        .await
        .with_context(|| format!("Failed to bind {}", server.config().bind_addr()))?;

    tracing::info!(%addr, "helpdesk ready");

    shutdown.wait_for_signal().await;
    tracing::info!("shutting down");
    shutdown
        .graceful_shutdown(vec![serve_task, broker_task], drain_timeout)
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["helpdesk"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.json_logs);
        let mut settings = HelpdeskSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings, HelpdeskSettings::default());
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "helpdesk",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let mut settings = HelpdeskSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["helpdesk", "--settings", "/tmp/helpdesk.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/helpdesk.json")));
    }

    #[test]
    fn load_reads_file_then_applies_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server":{{"port":7000,"maxConnections":3}}}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_owned();
        let cli = Cli::parse_from(["helpdesk", "--settings", &path, "--host", "127.0.0.1"]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.max_connections, 3);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let path = file.path().to_str().unwrap().to_owned();
        let cli = Cli::parse_from(["helpdesk", "--settings", &path]);
        assert!(load(&cli).is_err());
    }
}
