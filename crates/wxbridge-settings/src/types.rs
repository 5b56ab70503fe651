//! Settings types with compiled defaults.
//!
//! Every struct uses `#[serde(default)]` so a partial user file only has to
//! name the keys it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub gateway: GatewaySettings,
    pub media: MediaSettings,
    pub send: SendSettings,
    pub listen_chats: Vec<ListenChat>,
    pub events: EventSettings,
    pub logging: LoggingSettings,
}

/// Gateway connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Base WebSocket URL of the gateway.
    pub url: String,
    /// Sent as the `token` query parameter when non-empty.
    pub auth_token: String,
    /// Backend name; selects `/channels/<name>` and prefixes notifications.
    pub backend_name: String,
    pub reconnect_delay_ms: u64,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    /// Default timeout for bridge-initiated RPC calls.
    pub request_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:18789".to_string(),
            auth_token: String::new(),
            backend_name: "wechat".to_string(),
            reconnect_delay_ms: 5_000,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl GatewaySettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Local media file server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaSettings {
    pub enabled: bool,
    /// Root directory; a leading `~` expands to the home directory.
    pub dir: String,
    pub host: String,
    pub port: u16,
    /// Extra consecutive ports tried when `port` is taken.
    pub port_fallbacks: u16,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "~/.wxbridge/media".to_string(),
            host: "localhost".to_string(),
            port: 18790,
            port_fallbacks: 5,
        }
    }
}

impl MediaSettings {
    pub fn dir_path(&self) -> PathBuf {
        crate::loader::expand_home(&self.dir)
    }
}

/// Outbound send behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendSettings {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// When non-empty, outbound files must live under one of these.
    pub allowed_file_dirs: Vec<String>,
}

impl Default for SendSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 500,
            allowed_file_dirs: Vec::new(),
        }
    }
}

impl SendSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn allowed_dirs(&self) -> Vec<PathBuf> {
        self.allowed_file_dirs
            .iter()
            .filter(|d| !d.trim().is_empty())
            .map(|d| crate::loader::expand_home(d.trim()))
            .collect()
    }
}

/// Conversation type of a configured listener.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Friend,
    Group,
}

/// A conversation to start listening to when the bridge comes up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenChat {
    pub name: String,
    #[serde(default, rename = "type")]
    pub chat_type: ChatType,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Backend event queue settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    pub queue_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl BridgeSettings {
    /// Names of configured listeners that are enabled.
    pub fn enabled_listen_chats(&self) -> Vec<String> {
        self.listen_chats
            .iter()
            .filter(|c| c.enabled && !c.name.trim().is_empty())
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.backend_name.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "gateway.backendName must not be empty".into(),
            ));
        }
        if self.gateway.reconnect_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "gateway.reconnectDelayMs must be positive".into(),
            ));
        }
        if self.gateway.ping_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "gateway.pingIntervalMs must be positive".into(),
            ));
        }
        if self.gateway.pong_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "gateway.pongTimeoutMs must be positive".into(),
            ));
        }
        if self.send.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "send.maxAttempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
