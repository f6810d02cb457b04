//! Configuration types for the relay gateway.
//!
//! Configuration is loaded from YAML files and validated before use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

/// Largest threshold the protocol can express in a 3-byte varint.
const MAX_COMPRESSION_THRESHOLD: i32 = 2_097_151;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// TCP listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Upstream server connection configuration.
    pub upstream: UpstreamConfig,

    /// Client-facing session security configuration.
    #[serde(default)]
    pub security: SecurityConfig,

    /// Server-list status configuration.
    #[serde(default)]
    pub status: StatusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address to bind to, e.g., "0.0.0.0:25565".
    #[serde(default = "default_listen_address")]
    pub address: String,

    /// Maximum number of concurrent client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Upstream server connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Upstream host name or address.
    /// Supports environment variable expansion: "${UPSTREAM_HOST}"
    pub host: String,

    /// Upstream port.
    #[serde(default = "default_upstream_port")]
    pub port: u16,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl UpstreamConfig {
    /// Get the host with environment variables expanded.
    #[must_use]
    pub fn host(&self) -> String {
        expand_env_vars(&self.host)
    }
}

/// Client-facing session security configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Whether to run the RSA key exchange and encrypt client sessions.
    #[serde(default = "default_encryption")]
    pub encryption: bool,

    /// RSA key size for the generated server keypair.
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,

    /// Compression threshold for the client leg; omit to disable.
    #[serde(default)]
    pub compression_threshold: Option<i32>,
}

/// Server-list status configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusConfig {
    /// Message of the day shown in the server list.
    #[serde(default = "default_motd")]
    pub motd: String,

    /// Advertised player capacity.
    #[serde(default = "default_max_players")]
    pub max_players: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

// Default value functions

fn default_listen_address() -> String {
    "0.0.0.0:25565".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_upstream_port() -> u16 {
    25565
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_encryption() -> bool {
    true
}

fn default_key_bits() -> usize {
    1024
}

fn default_motd() -> String {
    "A Minecraft relay".to_string()
}

fn default_max_players() -> u32 {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption: default_encryption(),
            key_bits: default_key_bits(),
            compression_threshold: None,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            motd: default_motd(),
            max_players: default_max_players(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable
/// `VAR_NAME`. If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

// Configuration loading and validation

impl GatewayConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.upstream.host().is_empty() {
            return Err(ConfigError::MissingUpstreamHost);
        }
        if self.security.key_bits < 512 {
            return Err(ConfigError::KeySizeTooSmall(self.security.key_bits));
        }
        if let Some(threshold) = self.security.compression_threshold {
            if !(0..=MAX_COMPRESSION_THRESHOLD).contains(&threshold) {
                return Err(ConfigError::InvalidCompressionThreshold(threshold));
            }
        }
        Ok(())
    }

    /// The upstream endpoint as a `host:port` dial string.
    #[must_use]
    pub fn upstream_address(&self) -> String {
        format!("{}:{}", self.upstream.host(), self.upstream.port)
    }
}
