//! Daemon configuration.
//!
//! The daemon reads a TOML file (by default `~/.config/budlink/service.toml`).
//! Every section is optional and falls back to the scheduler defaults:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "/var/lib/budlink/reconnect.db"
//!
//! [connect]
//! capacity = 3
//! campaign_ceiling_ms = 175000
//!
//! [policy]
//! base_try = 3
//! phone_timeout_ms = 3000
//!
//! [security]
//! api_key_enabled = true
//! api_key = "a-long-random-secret"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use budlink_core::{ConnectConfig, MonitorConfig, RetryPolicy};

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Reconnect table storage.
    pub storage: StorageConfig,
    /// Scheduler timings.
    pub connect: ConnectSettings,
    /// Default retry policy of new campaigns.
    pub policy: PolicySettings,
    /// API authentication.
    pub security: SecurityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// ```
    /// use budlink_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.connect.validate());
        errors.extend(self.policy.validate());
        errors.extend(self.security.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
    /// Capacity of the host command broadcast channel.
    pub broadcast_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            broadcast_buffer: 256,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.parse::<std::net::SocketAddr>().is_err() {
            match self.bind.rsplit_once(':') {
                Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
                _ => errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!("'{}' is not a host:port address", self.bind),
                }),
            }
        }

        if self.broadcast_buffer == 0 {
            errors.push(ValidationError {
                field: "server.broadcast_buffer".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        errors
    }
}

/// Reconnect table storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: budlink_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        if self.path.as_os_str().is_empty() {
            vec![ValidationError {
                field: "storage.path".to_string(),
                message: "must not be empty".to_string(),
            }]
        } else {
            Vec::new()
        }
    }
}

/// Scheduler timings, in milliseconds where they are durations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectSettings {
    pub capacity: usize,
    pub max_connections: usize,
    pub campaign_ceiling_ms: u64,
    pub early_failure_fraction: f64,
    pub transient_max_concurrent: usize,
    pub transient_retry_delay_ms: u64,
    pub disinterest_threshold: u8,
    pub quick_switch_ms: u64,
    pub start_delay_ms: u64,
    pub wait_idle_ms: u64,
    pub get_name_wait_ms: u64,
    pub tws_role_wait_ms: u64,
    pub tws_pair_tries: u8,
    pub connect_pending_timeout_ms: u64,
    pub event_capacity: usize,
    pub monitor_period_ms: u64,
    /// Start campaigns for every remembered device when the daemon starts.
    pub reconnect_on_start: bool,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self::from_connect_config(&ConnectConfig::default())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ConnectSettings {
    fn from_connect_config(config: &ConnectConfig) -> Self {
        Self {
            capacity: config.capacity,
            max_connections: 3,
            campaign_ceiling_ms: millis(config.campaign_ceiling),
            early_failure_fraction: config.early_failure_fraction,
            transient_max_concurrent: config.transient_max_concurrent,
            transient_retry_delay_ms: millis(config.transient_retry_delay),
            disinterest_threshold: config.disinterest_threshold,
            quick_switch_ms: millis(config.quick_switch),
            start_delay_ms: millis(config.start_delay),
            wait_idle_ms: millis(config.wait_idle),
            get_name_wait_ms: millis(config.get_name_wait),
            tws_role_wait_ms: millis(config.tws_role_wait),
            tws_pair_tries: config.tws_pair_tries,
            connect_pending_timeout_ms: millis(config.connect_pending_timeout),
            event_capacity: config.event_capacity,
            monitor_period_ms: millis(config.monitor.period),
            reconnect_on_start: true,
        }
    }

    /// Build the scheduler configuration.
    pub fn to_connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            capacity: self.capacity,
            campaign_ceiling: Duration::from_millis(self.campaign_ceiling_ms),
            early_failure_fraction: self.early_failure_fraction,
            transient_max_concurrent: self.transient_max_concurrent,
            transient_retry_delay: Duration::from_millis(self.transient_retry_delay_ms),
            disinterest_threshold: self.disinterest_threshold,
            quick_switch: Duration::from_millis(self.quick_switch_ms),
            start_delay: Duration::from_millis(self.start_delay_ms),
            wait_idle: Duration::from_millis(self.wait_idle_ms),
            get_name_wait: Duration::from_millis(self.get_name_wait_ms),
            tws_role_wait: Duration::from_millis(self.tws_role_wait_ms),
            tws_pair_tries: self.tws_pair_tries,
            connect_pending_timeout: Duration::from_millis(self.connect_pending_timeout_ms),
            event_capacity: self.event_capacity,
            monitor: MonitorConfig {
                period: Duration::from_millis(self.monitor_period_ms),
                ..MonitorConfig::default()
            },
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = self.to_connect_config().validate() {
            errors.push(ValidationError {
                field: "connect".to_string(),
                message: e.to_string(),
            });
        }
        if self.max_connections == 0 {
            errors.push(ValidationError {
                field: "connect.max_connections".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        errors
    }
}

/// Default retry policy, durations in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub strategy: u8,
    /// Zero means unlimited; the campaign ceiling still applies.
    pub base_try: u8,
    pub profile_try: u8,
    pub base_interval_ms: u64,
    pub profile_interval_ms: u64,
    pub phone_timeout_ms: u64,
    pub tws_timeout_ms: u64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self::from(&RetryPolicy::default())
    }
}

impl From<&RetryPolicy> for PolicySettings {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            strategy: policy.strategy,
            base_try: policy.base_try,
            profile_try: policy.profile_try,
            base_interval_ms: millis(policy.base_interval),
            profile_interval_ms: millis(policy.profile_interval),
            phone_timeout_ms: millis(policy.phone_timeout),
            tws_timeout_ms: millis(policy.tws_timeout),
        }
    }
}

impl PolicySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            strategy: self.strategy,
            base_try: self.base_try,
            profile_try: self.profile_try,
            base_interval: Duration::from_millis(self.base_interval_ms),
            profile_interval: Duration::from_millis(self.profile_interval_ms),
            phone_timeout: Duration::from_millis(self.phone_timeout_ms),
            tws_timeout: Duration::from_millis(self.tws_timeout_ms),
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        match self.to_policy().validate() {
            Ok(()) => Vec::new(),
            Err(e) => vec![ValidationError {
                field: "policy".to_string(),
                message: e.to_string(),
            }],
        }
    }
}

/// Minimum length of a configured API key.
pub const MIN_API_KEY_LEN: usize = 16;

/// API authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Require an `X-API-Key` header on every endpoint except health.
    pub api_key_enabled: bool,
    pub api_key: Option<String>,
}

impl SecurityConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        if !self.api_key_enabled {
            return Vec::new();
        }
        match &self.api_key {
            Some(key) if key.len() >= MIN_API_KEY_LEN => Vec::new(),
            Some(_) => vec![ValidationError {
                field: "security.api_key".to_string(),
                message: format!("must be at least {MIN_API_KEY_LEN} characters"),
            }],
            None => vec![ValidationError {
                field: "security.api_key".to_string(),
                message: "required when api_key_enabled is set".to_string(),
            }],
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid configuration:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// One configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("budlink")
        .join("service.toml")
}
