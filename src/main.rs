//! # wxbridge
//!
//! Bridge binary: loads settings, installs logging, and keeps the selected
//! messaging backend linked to the gateway until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::Level;

use wxbridge_core::mock::MockBackend;
use wxbridge_core::{event_channel, Backend};
use wxbridge_server::Bridge;
use wxbridge_settings::{load_settings, load_settings_from_path, BridgeSettings};
use wxbridge_telemetry::{init_telemetry, TelemetryConfig};

/// Backends this binary can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// In-process backend that accepts every command; for protocol smoke tests.
    Loopback,
}

/// Link a desktop messaging client to a gateway over JSON-RPC.
#[derive(Parser, Debug)]
#[command(name = "wxbridge", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.wxbridge/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Gateway WebSocket URL, e.g. `ws://localhost:18789`.
    #[arg(long)]
    gateway: Option<String>,

    /// Bearer token appended to the gateway URL.
    #[arg(long, env = "WECHAT_AUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Preferred media server port.
    #[arg(long)]
    media_port: Option<u16>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    #[arg(long, value_enum, default_value_t = BackendKind::Loopback)]
    backend: BackendKind,
}

impl Cli {
    fn apply(&self, settings: &mut BridgeSettings) {
        if let Some(url) = &self.gateway {
            settings.gateway.url = url.clone();
        }
        if let Some(token) = &self.token {
            settings.gateway.auth_token = token.clone();
        }
        if let Some(port) = self.media_port {
            settings.media.port = port;
        }
        if self.verbose {
            settings.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);

    let telemetry = TelemetryConfig::from_level_name(&settings.logging.level, settings.logging.json)
        .context("Invalid logging.level")?
        .with_module_level("tungstenite", Level::WARN)
        .with_module_level("tokio_tungstenite", Level::WARN);
    let telemetry = init_telemetry(telemetry).context("Failed to initialise logging")?;
    tracing::debug!(level = %telemetry.log_level(), directives = %telemetry.directives(), "logging initialised");

    let backend: Arc<dyn Backend> = match cli.backend {
        BackendKind::Loopback => Arc::new(MockBackend::new(&settings.gateway.backend_name)),
    };
    tracing::info!(backend = ?cli.backend, gateway = %settings.gateway.url, "starting bridge");

    // The sender stays alive for the life of the bridge so the event queue never reports closed.
    let (_events, rx) = event_channel(settings.events.queue_capacity);
    let bridge = Bridge::new(settings, backend, rx).context("Invalid configuration")?;

    let shutdown = bridge.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, shutting down"),
            Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        shutdown.cancel();
    });

    bridge.run().await.context("Bridge stopped with an error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "wxbridge",
            "--gateway",
            "ws://gw:9000",
            "--token",
            "abc",
            "--media-port",
            "19000",
            "--verbose",
        ]);
        let mut settings = BridgeSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.gateway.url, "ws://gw:9000");
        assert_eq!(settings.gateway.auth_token, "abc");
        assert_eq!(settings.media.port, 19000);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(cli.backend, BackendKind::Loopback);
    }

    #[test]
    fn no_flags_leave_settings_alone() {
        let cli = Cli {
            config: None,
            gateway: None,
            token: None,
            media_port: None,
            verbose: false,
            backend: BackendKind::Loopback,
        };
        let mut settings = BridgeSettings::default();
        settings.gateway.auth_token = "from-file".into();
        cli.apply(&mut settings);
        assert_eq!(settings.gateway.url, "ws://localhost:18789");
        assert_eq!(settings.gateway.auth_token, "from-file");
        assert_eq!(settings.logging.level, "info");
    }
}
