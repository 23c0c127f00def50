use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::connection_manager::{ConnectionLimits, DuplicateUserPolicy};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins and Host values accepted by CORS and the trusted-host check.
    /// A single `*` disables both checks.
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends heartbeat)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Close a connection after this many seconds without an inbound frame
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Upper bound for enqueueing one outbound message, in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Capacity of each connection's outbound queue
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Maximum number of live connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub duplicate_user_policy: DuplicateUserPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; the database is disabled when unset
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
    /// Connect timeout in seconds
    #[serde(default = "default_db_connect_timeout")]
    pub connect_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    /// Emit logs as JSON lines instead of the human-readable format
    #[serde(default)]
    pub json_logs: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_allowed_hosts() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_idle_timeout() -> u64 {
    120 // 2 minutes
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_channel_buffer() -> usize {
    32
}

fn default_max_connections() -> usize {
    10000
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_connect_timeout() -> u64 {
    30
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_uploads_dir() -> String {
    "uploads".to_string()
}

fn default_temp_dir() -> String {
    "temp".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "nexus-learn-backend".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("websocket.heartbeat_interval", default_heartbeat_interval())?
            .set_default("websocket.idle_timeout", default_idle_timeout())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // NEXUS_SERVER__PORT, NEXUS_DATABASE__URL, NEXUS_WEBSOCKET__IDLE_TIMEOUT, ...
            .add_source(
                Environment::with_prefix("NEXUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_hosts"),
            )
            // Hosting platforms hand out the bind address through plain HOST/PORT
            .set_override_option("server.host", env::var("HOST").ok())?
            .set_override_option("server.port", env::var("PORT").ok())?;

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerConfig {
    pub fn allows_any_host(&self) -> bool {
        self.allowed_hosts.iter().any(|h| h == "*")
    }
}

impl WebSocketConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_connections: self.max_connections,
            duplicate_user_policy: self.duplicate_user_policy,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_hosts: default_allowed_hosts(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            idle_timeout: default_idle_timeout(),
            send_timeout_ms: default_send_timeout_ms(),
            channel_buffer: default_channel_buffer(),
            max_connections: default_max_connections(),
            duplicate_user_policy: DuplicateUserPolicy::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_db_max_connections(),
            connect_timeout: default_db_connect_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            static_dir: default_static_dir(),
            uploads_dir: default_uploads_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
            json_logs: false,
        }
    }
}
