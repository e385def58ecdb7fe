//! Configuration schema definitions.

use crate::error::ConfigError;
use crate::paths;
use crate::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Main Parley configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Durable store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Credential verification settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Chat behaviour.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind mode.
    #[serde(default)]
    pub bind: BindMode,

    /// Port number.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable permissive CORS on the HTTP surface.
    #[serde(default)]
    pub cors: bool,

    /// Maximum concurrent WebSocket connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds a client has to present a credential after upgrading.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Per-connection outbound queue capacity.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Inbound events a single connection may send per second.
    #[serde(default = "default_max_events_per_second")]
    pub max_events_per_second: u32,

    /// Interval between WebSocket pings. Zero disables pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: BindMode::default(),
            port: default_port(),
            cors: false,
            max_connections: default_max_connections(),
            handshake_timeout_secs: default_handshake_timeout(),
            outbound_buffer: default_outbound_buffer(),
            max_events_per_second: default_max_events_per_second(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

impl GatewayConfig {
    /// Address the gateway listens on.
    pub fn bind_addr(&self) -> IpAddr {
        match self.bind {
            BindMode::Loopback => IpAddr::V4(Ipv4Addr::LOCALHOST),
            BindMode::Lan => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}

fn default_port() -> u16 {
    18790
}

fn default_max_connections() -> usize {
    1000
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_max_events_per_second() -> u32 {
    60
}

fn default_ping_interval() -> u64 {
    30
}

/// Bind mode for the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Bind to loopback only (127.0.0.1).
    #[default]
    Loopback,

    /// Bind to all interfaces.
    Lan,
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite URL. Defaults to `sqlite://~/.parley/parley.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Pool size.
    #[serde(default = "default_store_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_store_connections(),
        }
    }
}

impl StoreConfig {
    /// The configured database URL, or the default file under the base directory.
    pub fn resolved_url(&self) -> Result<String, ConfigError> {
        match &self.database_url {
            Some(url) => Ok(url.clone()),
            None => paths::default_database_url(),
        }
    }
}

fn default_store_connections() -> u32 {
    5
}

/// Credential verification configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret for signed bearer tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<SecretString>,

    /// Accept `?token=` on the upgrade request.
    #[serde(default)]
    pub allow_query_token: bool,
}

/// Chat behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// How long after creation a message may be edited.
    #[serde(default = "default_edit_window")]
    pub edit_window_secs: u64,

    /// Typing indicator expiry.
    #[serde(default = "default_typing_timeout")]
    pub typing_timeout_ms: u64,

    /// Maximum body length in characters, after trimming.
    #[serde(default = "default_max_body_len")]
    pub max_body_len: usize,

    /// Default history page size.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            edit_window_secs: default_edit_window(),
            typing_timeout_ms: default_typing_timeout(),
            max_body_len: default_max_body_len(),
            history_page_size: default_history_page_size(),
        }
    }
}

impl ChatConfig {
    pub fn edit_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.edit_window_secs).unwrap_or(i64::MAX))
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }
}

fn default_edit_window() -> u64 {
    24 * 60 * 60
}

fn default_typing_timeout() -> u64 {
    3000
}

fn default_max_body_len() -> usize {
    4000
}

fn default_history_page_size() -> u32 {
    50
}

/// Upper bound for a single history page.
pub const MAX_HISTORY_PAGE_SIZE: u32 = 200;

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
