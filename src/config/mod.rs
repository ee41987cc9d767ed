//! Configuration management for hostsync
//!
//! This module handles loading, parsing, and validating application
//! configuration from YAML files and environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Marketplace API configuration
    #[serde(default)]
    pub marketplace: MarketplaceConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Queue poller configuration
    #[serde(default)]
    pub poller: PollerConfig,

    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // Expand environment variables before parsing
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix HOSTSYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("HOSTSYNC_SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("HOSTSYNC_SERVER_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid port number".to_string()))?;
        }

        if let Ok(path) = std::env::var("HOSTSYNC_DATABASE_PATH") {
            config.database.path = path;
        }

        if let Ok(client_id) = std::env::var("HOSTSYNC_MARKETPLACE_CLIENT_ID") {
            config.marketplace.client_id = client_id;
        }
        if let Ok(client_secret) = std::env::var("HOSTSYNC_MARKETPLACE_CLIENT_SECRET") {
            config.marketplace.client_secret = client_secret;
        }
        if let Ok(base_url) = std::env::var("HOSTSYNC_MARKETPLACE_BASE_URL") {
            config.marketplace.base_url = base_url;
        }

        if let Ok(key) = std::env::var("HOSTSYNC_TOKEN_ENCRYPTION_KEY") {
            config.security.token_encryption_key = key;
        }

        if let Ok(level) = std::env::var("HOSTSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Validate that values required before startup are present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marketplace.client_id.is_empty() {
            return Err(ConfigError::Invalid(
                "marketplace.client_id is required".to_string(),
            ));
        }
        if self.marketplace.client_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "marketplace.client_secret is required".to_string(),
            ));
        }
        if self.security.token_encryption_key.is_empty() {
            return Err(ConfigError::Invalid(
                "security.token_encryption_key is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Marketplace API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceConfig {
    /// Platform identifier used on integration and booking records
    #[serde(default = "default_platform")]
    pub platform: String,

    /// OAuth client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// Base API URL (override for testing)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            client_id: String::new(),
            client_secret: String::new(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_platform() -> String {
    "marketplace".to_string()
}

fn default_base_url() -> String {
    "https://api.marketplace.example".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// SQLite database path; use ":memory:" for an in-memory database
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "hostsync.db".to_string()
}

/// Queue poller configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Seconds between poller ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Maximum queue items claimed per tick
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Wall-clock budget per tick, in milliseconds. Must stay under the
    /// hosting platform's hard timeout.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            page_size: default_page_size(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

fn default_tick_interval() -> u64 {
    10
}

fn default_page_size() -> u32 {
    10
}

fn default_deadline_ms() -> u64 {
    9500
}

/// Security configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// Base64-encoded 32-byte key for token encryption at rest
    #[serde(default)]
    pub token_encryption_key: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Expand `${VAR_NAME}` references in a YAML string from the environment
///
/// Unset variables are replaced with an empty string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut name = String::new();
            let mut closed = false;
            for inner in chars.by_ref() {
                if inner == '}' {
                    closed = true;
                    break;
                }
                name.push(inner);
            }
            if closed {
                result.push_str(&std::env::var(&name).unwrap_or_default());
            } else {
                result.push_str("${");
                result.push_str(&name);
            }
        } else {
            result.push(c);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Default configuration values
    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "hostsync.db");
        assert_eq!(config.poller.page_size, 10);
        assert_eq!(config.poller.deadline_ms, 9500);
        assert_eq!(config.poller.tick_interval_secs, 10);
        assert_eq!(config.marketplace.platform, "marketplace");
        assert_eq!(config.logging.level, "info");
    }

    // Test 2: Parse full YAML config
    #[test]
    fn test_from_yaml() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090
marketplace:
  client_id: "client-123"
  client_secret: "secret-456"
  base_url: "https://sandbox.marketplace.example"
database:
  path: "/var/lib/hostsync/db.sqlite"
poller:
  tick_interval_secs: 30
  page_size: 5
security:
  token_encryption_key: "a2V5a2V5a2V5a2V5a2V5a2V5a2V5a2V5a2V5a2V5a2U="
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.marketplace.client_id, "client-123");
        assert_eq!(
            config.marketplace.base_url,
            "https://sandbox.marketplace.example"
        );
        assert_eq!(config.database.path, "/var/lib/hostsync/db.sqlite");
        assert_eq!(config.poller.tick_interval_secs, 30);
        assert_eq!(config.poller.page_size, 5);
        // Unspecified values keep their defaults
        assert_eq!(config.poller.deadline_ms, 9500);
    }

    // Test 3: Environment variable expansion in YAML
    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("HOSTSYNC_TEST_SECRET", "expanded-secret");

        let yaml = r#"
marketplace:
  client_secret: "${HOSTSYNC_TEST_SECRET}"
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.marketplace.client_secret, "expanded-secret");

        std::env::remove_var("HOSTSYNC_TEST_SECRET");
    }

    // Test 4: Unset env var expands to empty string
    #[test]
    fn test_unset_env_var_expands_empty() {
        let yaml = r#"
marketplace:
  client_secret: "${HOSTSYNC_DOES_NOT_EXIST_12345}"
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.marketplace.client_secret, "");
    }

    // Test 5: Invalid YAML returns parse error
    #[test]
    fn test_invalid_yaml() {
        let result = Config::from_yaml("server: [not a map");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // Test 6: Validation requires credentials and key
    #[test]
    fn test_validate_requires_credentials() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.marketplace.client_id = "id".to_string();
        assert!(config.validate().is_err());

        config.marketplace.client_secret = "secret".to_string();
        assert!(config.validate().is_err());

        config.security.token_encryption_key = "key".to_string();
        assert!(config.validate().is_ok());
    }

    // Test 7: expand_env_vars leaves unclosed braces intact
    #[test]
    fn test_expand_unclosed_brace() {
        assert_eq!(expand_env_vars("abc ${UNCLOSED"), "abc ${UNCLOSED");
        assert_eq!(expand_env_vars("plain text"), "plain text");
    }
}
