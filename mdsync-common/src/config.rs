//! Configuration loading
//!
//! Bootstrap configuration comes from a TOML file resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `MDSYNC_CONFIG` environment variable
//! 3. `~/.config/mdsync/config.toml` (if present)
//! 4. Compiled defaults (fallback)
//!
//! A missing file is not fatal: a warning is logged and defaults are used.
//! A file that exists but cannot be parsed is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "MDSYNC_CONFIG";

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Directory of static UI assets (optional)
    pub static_assets: Option<PathBuf>,
    /// Largest accepted upload request body, in bytes
    pub max_upload_bytes: usize,
    pub queue: QueueConfig,
    pub sessions: SessionConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3939".to_string(),
            static_assets: None,
            max_upload_bytes: 10 * 1024 * 1024,
            queue: QueueConfig::default(),
            sessions: SessionConfig::default(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending jobs; enqueue beyond this fails immediately
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bounded size of each session's progress channel
    pub progress_capacity: usize,
    /// Sessions older than this are swept
    pub max_age_secs: u64,
    /// Interval between stale-session sweeps
    pub cleanup_interval_secs: u64,
    /// Absolute ceiling on one reconciliation operation
    pub operation_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            progress_capacity: 100,
            max_age_secs: 24 * 60 * 60,
            cleanup_interval_secs: 60 * 60,
            operation_timeout_secs: 30 * 60,
        }
    }
}

impl SessionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// Remote catalog service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_base_url: String,
    pub auth_url: String,
    /// Sustained request rate allowed against the remote API
    pub requests_per_second: u32,
    pub request_timeout_secs: u64,
    /// Number of search results inspected per unmatched title
    pub search_limit: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.mangadex.org".to_string(),
            auth_url: "https://auth.mangadex.org/realms/mangadex/protocol/openid-connect/token"
                .to_string(),
            requests_per_second: 5,
            request_timeout_secs: 30,
            search_limit: 10,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolve which configuration file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    dirs::config_dir()
        .map(|d| d.join("mdsync").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load configuration from `path`, falling back to defaults
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let Some(path) = path else {
        info!("No configuration file found, using compiled defaults");
        return Ok(ServiceConfig::default());
    };

    if !path.exists() {
        warn!(
            "Configuration file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(ServiceConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// Parse and validate TOML configuration text
pub fn parse_config(content: &str) -> Result<ServiceConfig> {
    let config: ServiceConfig =
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
    config.validate()?;
    Ok(config)
}

impl ServiceConfig {
    fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(Error::Config("max_upload_bytes must be at least 1".to_string()));
        }
        if self.queue.capacity == 0 {
            return Err(Error::Config("queue.capacity must be at least 1".to_string()));
        }
        if self.sessions.progress_capacity == 0 {
            return Err(Error::Config(
                "sessions.progress_capacity must be at least 1".to_string(),
            ));
        }
        if self.remote.requests_per_second == 0 {
            return Err(Error::Config(
                "remote.requests_per_second must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.sessions.operation_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = parse_config(
            r#"
            bind_address = "0.0.0.0:8080"

            [queue]
            capacity = 3

            [remote]
            requests_per_second = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.queue.capacity, 3);
        assert_eq!(config.remote.requests_per_second, 2);
        // Untouched keys keep defaults
        assert_eq!(config.remote.search_limit, 10);
        assert_eq!(config.sessions.progress_capacity, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("[queue]\ncapacity = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = parse_config("max_upload_bytes = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = parse_config("bind_address = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[sessions]\nmax_age_secs = 60").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.sessions.max_age(), Duration::from_secs(60));
    }

    #[test]
    #[serial]
    fn test_cli_path_beats_environment() {
        std::env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

        let cli = PathBuf::from("/from/cli.toml");
        assert_eq!(resolve_config_path(Some(&cli)), Some(cli.clone()));
        assert_eq!(
            resolve_config_path(None),
            Some(PathBuf::from("/from/env.toml"))
        );

        std::env::remove_var(CONFIG_ENV_VAR);
    }
}
