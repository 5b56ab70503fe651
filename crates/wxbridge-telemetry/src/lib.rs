use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "wxbridge_server::transport" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build a config from a level name such as `"debug"`.
    pub fn from_level_name(level: &str, json: bool) -> Result<Self, TelemetryError> {
        let log_level =
            Level::from_str(level).map_err(|_| TelemetryError::InvalidLevel(level.to_string()))?;
        Ok(Self {
            log_level,
            json,
            ..Default::default()
        })
    }

    pub fn with_module_level(mut self, module: &str, level: Level) -> Self {
        self.module_levels.push((module.to_string(), level));
        self
    }

    /// Directive string handed to [`EnvFilter`] when RUST_LOG is unset.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown log level: {0}")]
    InvalidLevel(String),
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Effective configuration of the installed subscriber.
pub struct TelemetryGuard {
    config: TelemetryConfig,
}

impl TelemetryGuard {
    pub fn log_level(&self) -> Level {
        self.config.log_level
    }

    /// Directives in force when RUST_LOG is unset.
    pub fn directives(&self) -> String {
        self.config.filter_directives()
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let directives = config.filter_directives();
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    Ok(TelemetryGuard { config })
}
