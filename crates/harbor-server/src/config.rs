//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (HARBOR_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Session timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Identity resolution configuration.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Identity resolution configuration.
///
/// The token table feeds the built-in static authenticator; hosts that
/// embed harbor as a library wire their own [`crate::auth::Authenticator`]
/// instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer-token to identity table.
    #[serde(default)]
    pub tokens: std::collections::HashMap<String, TokenIdentity>,
}

/// An identity entry in the token table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenIdentity {
    /// Stable user ID.
    pub user_id: String,
    /// Display name.
    pub username: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-session mailbox capacity in messages.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Session timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Per-write deadline in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Read-idle timeout in milliseconds; a session with no inbound
    /// traffic for this long is closed.
    #[serde(default = "default_read_idle_timeout")]
    pub read_idle_timeout_ms: u64,

    /// Bound on waiting for sessions to flush at shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("HARBOR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HARBOR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_max_message_size() -> usize {
    512
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_read_idle_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_shutdown_grace() -> u64 {
    5_000 // 5 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            metrics: MetricsConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout(),
            read_idle_timeout_ms: default_read_idle_timeout(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl TimeoutsConfig {
    /// Per-write deadline.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Read-idle timeout.
    #[must_use]
    pub fn read_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.read_idle_timeout_ms)
    }

    /// Shutdown flush bound.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "harbor.toml",
            "/etc/harbor/harbor.toml",
            "~/.config/harbor/harbor.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host/port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.limits.mailbox_capacity, 256);
        assert_eq!(config.limits.max_message_size, 512);
        assert_eq!(config.timeouts.write_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            mailbox_capacity = 64

            [timeouts]
            read_idle_timeout_ms = 30000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.mailbox_capacity, 64);
        assert_eq!(config.limits.max_message_size, 512);
        assert_eq!(
            config.timeouts.read_idle_timeout(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_config_token_table() {
        let toml_str = r#"
            [auth.tokens.secret-token]
            user_id = "u1"
            username = "alice"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        let entry = config.auth.tokens.get("secret-token").unwrap();
        assert_eq!(entry.user_id, "u1");
        assert_eq!(entry.username, "alice");
    }
}
