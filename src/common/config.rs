//! Relay configuration: a single object loaded from YAML, overridable by
//! CLI flags and environment variables (precedence: CLI > file > env >
//! built-in defaults, per spec §6.4).

use crate::common::error;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
}

fn default_port() -> u16 {
    8080
}
fn default_instance_name() -> String {
    "shugur-relay".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            instance_name: default_instance_name(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            // tracing has no fatal level; a fatal condition still logs at
            // error severity before the process exits.
            LogLevel::Fatal => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_log_path")]
    pub file: String,
    #[serde(default = "default_log_max_size")]
    pub max_size: u64,
    #[serde(default = "default_log_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_log_max_age")]
    pub max_age: u32,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Console
}
fn default_log_path() -> String {
    crate::common::consts::LOG_PATH.to_string()
}
fn default_log_max_size() -> u64 {
    100
}
fn default_log_max_backups() -> u32 {
    5
}
fn default_log_max_age() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: default_log_path(),
            max_size: default_log_max_size(),
            max_backups: default_log_max_backups(),
            max_age: default_log_max_age(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_events_per_second")]
    pub max_events_per_second: u32,
    #[serde(default = "default_max_requests_per_second")]
    pub max_requests_per_second: u32,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    #[serde(default = "default_ban_threshold")]
    pub ban_threshold: u32,
    #[serde(default)]
    pub progressive_ban: bool,
    #[serde(default = "default_ban_duration_secs")]
    pub ban_duration_secs: u64,
    #[serde(default = "default_max_ban_duration_secs")]
    pub max_ban_duration_secs: u64,
}

fn default_max_events_per_second() -> u32 {
    20
}
fn default_max_requests_per_second() -> u32 {
    50
}
fn default_burst_size() -> u32 {
    40
}
fn default_ban_threshold() -> u32 {
    50
}
fn default_ban_duration_secs() -> u64 {
    60
}
fn default_max_ban_duration_secs() -> u64 {
    3_600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_events_per_second: default_max_events_per_second(),
            max_requests_per_second: default_max_requests_per_second(),
            burst_size: default_burst_size(),
            ban_threshold: default_ban_threshold(),
            progressive_ban: true,
            ban_duration_secs: default_ban_duration_secs(),
            max_ban_duration_secs: default_max_ban_duration_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ThrottlingConfig {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_content_length() -> usize {
    64 * 1024
}
fn default_max_connections() -> usize {
    1_000
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            max_content_length: default_max_content_length(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub contact: String,
    /// Explicit 64-hex public key; if set, overrides the on-disk identity's
    /// derived public key (spec §4.9).
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default = "default_ws_addr")]
    pub ws_addr: String,
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Must be a power of two in [1KB, 1MB] (spec §6.4).
    #[serde(default = "default_send_buffer_size")]
    pub send_buffer_size: usize,
    #[serde(default = "default_event_cache_size")]
    pub event_cache_size: usize,
    #[serde(default)]
    pub throttling: ThrottlingConfig,
    #[serde(default)]
    pub min_pow_difficulty: u8,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default = "default_max_event_tags")]
    pub max_event_tags: usize,
    /// Max length of a single tag element, e.g. `tags[i][j]` (spec §4.5 step 1).
    #[serde(default = "default_max_tag_element_length")]
    pub max_tag_element_length: usize,
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,
    #[serde(default = "default_max_filters")]
    pub max_filters: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    /// Accepted clock skew for `created_at`, in seconds, in both directions.
    #[serde(default = "default_created_at_skew_secs")]
    pub created_at_skew_secs: i64,
}

fn default_relay_name() -> String {
    "Shugur Relay".to_string()
}
fn default_ws_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_public_url() -> String {
    "ws://localhost:8080".to_string()
}
fn default_idle_timeout_secs() -> u64 {
    600
}
fn default_write_timeout_secs() -> u64 {
    10
}
fn default_send_buffer_size() -> usize {
    64 * 1024
}
fn default_event_cache_size() -> usize {
    100
}
fn default_max_event_tags() -> usize {
    2_000
}
fn default_max_tag_element_length() -> usize {
    1_024
}
fn default_max_subscriptions() -> usize {
    20
}
fn default_max_filters() -> usize {
    10
}
fn default_max_limit() -> usize {
    5_000
}
fn default_created_at_skew_secs() -> i64 {
    900
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: default_relay_name(),
            description: String::new(),
            contact: String::new(),
            public_key: None,
            icon: None,
            banner: None,
            ws_addr: default_ws_addr(),
            public_url: default_public_url(),
            idle_timeout_secs: default_idle_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            send_buffer_size: default_send_buffer_size(),
            event_cache_size: default_event_cache_size(),
            throttling: ThrottlingConfig::default(),
            min_pow_difficulty: 0,
            auth_required: false,
            max_event_tags: default_max_event_tags(),
            max_tag_element_length: default_max_tag_element_length(),
            max_subscriptions: default_max_subscriptions(),
            max_filters: default_max_filters(),
            max_limit: default_max_limit(),
            created_at_skew_secs: default_created_at_skew_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PolicyList {
    #[serde(default)]
    pub pubkeys: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RelayPolicyConfig {
    #[serde(default)]
    pub blacklist: PolicyList,
    #[serde(default)]
    pub whitelist: PolicyList,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; when present it takes precedence over
    /// `server`/`port` (spec §6.3).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_max_connect_pool")]
    pub max_connect_pool: u32,
    #[serde(default = "default_min_connect_pool")]
    pub min_connect_pool: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connect_pool() -> u32 {
    10
}
fn default_min_connect_pool() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_acquire_timeout() -> u64 {
    5
}

impl DatabaseConfig {
    /// Resolves the effective connection URL, preferring an explicit `url`.
    pub fn resolved_url(&self) -> error::Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let server = self.server.as_deref().ok_or_else(|| {
            error::Error::InvalidConfig("database.server or database.url is required".into())
        })?;
        let port = self.port.unwrap_or(26257);
        let db = self.database.as_deref().unwrap_or("shugur");
        let user = self.user.as_deref().unwrap_or("root");
        match &self.password {
            Some(pw) => Ok(format!("postgres://{user}:{pw}@{server}:{port}/{db}")),
            None => Ok(format!("postgres://{user}@{server}:{port}/{db}")),
        }
    }

    /// Pool sizing derived from the configured WS connection cap (spec §4.1).
    pub fn pool_bounds_for(max_ws_connections: usize) -> (u32, u32) {
        match max_ws_connections {
            0..=200 => (10, 2),
            201..=2000 => (50, 5),
            _ => (200, 10),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            server: None,
            port: None,
            database: None,
            user: None,
            password: None,
            max_connect_pool: default_max_connect_pool(),
            min_connect_pool: default_min_connect_pool(),
            connect_timeout_secs: default_connect_timeout(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub relay_policy: RelayPolicyConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Optional feature-flag group; unrecognized flags are ignored rather
    /// than rejected so operators can roll flags out ahead of code.
    #[serde(default)]
    pub capsules: HashMap<String, bool>,
}

impl Config {
    pub fn load_config(path: PathBuf) -> error::Result<Config> {
        let p: &Path = path.as_ref();
        let config_yaml = std::fs::read_to_string(p).map_err(|err| match err {
            e @ std::io::Error { .. } if e.kind() == std::io::ErrorKind::NotFound => {
                error::Error::ConfigMissing(path.clone())
            }
            _ => err.into(),
        })?;

        let mut config: Config =
            serde_yaml::from_str(&config_yaml).map_err(error::Error::SerializationError)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables fill in anything the file left unset. CLI
    /// flags (handled by `cli::run_cmd`) are applied after this and win.
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(crate::common::consts::LOG_KEY_ENV) {
            self.logging.level = match level.to_lowercase().as_str() {
                "debug" => LogLevel::Debug,
                "warn" => LogLevel::Warn,
                "error" => LogLevel::Error,
                "fatal" => LogLevel::Fatal,
                _ => LogLevel::Info,
            };
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url);
        }
    }

    /// Cross-field invariants from spec §6.4.
    pub fn validate(&self) -> error::Result<()> {
        let rl = &self.relay.throttling.rate_limit;
        if rl.ban_threshold as u64 > 5 * rl.max_events_per_second as u64 {
            return Err(error::Error::InvalidConfig(
                "relay.throttling.rate_limit.ban_threshold must be <= 5 * max_events_per_second"
                    .into(),
            ));
        }
        if self.relay.event_cache_size < self.relay.throttling.max_connections / 10 {
            return Err(error::Error::InvalidConfig(
                "relay.event_cache_size must be >= relay.throttling.max_connections / 10".into(),
            ));
        }
        if let Some(db_port) = self.database.port {
            if db_port == self.metrics.port {
                return Err(error::Error::InvalidConfig(
                    "database.port must differ from metrics.port".into(),
                ));
            }
        }
        if !self.relay.send_buffer_size.is_power_of_two()
            || self.relay.send_buffer_size < 1024
            || self.relay.send_buffer_size > 1024 * 1024
        {
            return Err(error::Error::InvalidConfig(
                "relay.send_buffer_size must be a power of two in [1KB, 1MB]".into(),
            ));
        }
        let scheme_ok =
            self.relay.public_url.starts_with("ws://") || self.relay.public_url.starts_with("wss://");
        if !scheme_ok {
            return Err(error::Error::InvalidConfig(
                "relay.public_url must use the ws:// or wss:// scheme".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ban_threshold_too_high_is_rejected() {
        let mut config = Config::default();
        config.relay.throttling.rate_limit.ban_threshold = 10_000;
        config.relay.throttling.rate_limit.max_events_per_second = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_send_buffer_size_is_rejected() {
        let mut config = Config::default();
        config.relay.send_buffer_size = 3000; // not a power of two
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_ws_public_url_is_rejected() {
        let mut config = Config::default();
        config.relay.public_url = "https://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolved_url_prefers_explicit_url() {
        let mut db = DatabaseConfig::default();
        db.url = Some("postgres://explicit".into());
        db.server = Some("ignored".into());
        assert_eq!(db.resolved_url().unwrap(), "postgres://explicit");
    }

    #[test]
    fn pool_bounds_scale_with_connection_cap() {
        assert_eq!(DatabaseConfig::pool_bounds_for(100), (10, 2));
        assert_eq!(DatabaseConfig::pool_bounds_for(1000), (50, 5));
        assert_eq!(DatabaseConfig::pool_bounds_for(5000), (200, 10));
    }
}
