//! Configuration management for the Drivegate gateway.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/drivegate/config.toml`.
//! Components receive the sections they need by reference at construction
//! time; there are no ambient global lookups.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_addr is not a valid socket address: {0}")]
    InvalidBindAddr(String),

    #[error("drive.api_base_url must start with http:// or https://, got {0}")]
    InvalidApiBaseUrl(String),

    #[error("drive.root_id must not be empty")]
    MissingRootId,

    #[error("limits.{class} limit must be greater than 0")]
    InvalidRouteLimit { class: &'static str },

    #[error("limits.{class} window_secs must be between 1 and 86400, got {window_secs}")]
    InvalidRouteWindow { class: &'static str, window_secs: u64 },

    #[error("upload.chunk_size must be between 256 KiB and 8 MiB, got {0} bytes")]
    InvalidChunkSize(u64),

    #[error("upload.max_concurrent must be between 1 and 16, got {0}")]
    InvalidMaxConcurrent(usize),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Minimum upload chunk size (256 KiB, the provider's resumable granularity).
pub const MIN_CHUNK_SIZE: u64 = 256 * 1024;

/// Maximum upload chunk size (8 MiB).
pub const MAX_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Environment variable overriding the token signing secret.
pub const ENV_SIGNING_SECRET: &str = "DRIVEGATE_SIGNING_SECRET";

/// Main configuration structure for the Drivegate gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Remote drive provider configuration.
    pub drive: DriveConfig,

    /// Share/session token configuration.
    pub tokens: TokenConfig,

    /// Access-restriction configuration.
    pub access: AccessConfig,

    /// Per-route-class rate limits.
    pub limits: LimitConfig,

    /// Resumable upload configuration.
    pub upload: UploadConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `127.0.0.1:8080`.
    pub bind_addr: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Optional directory for rolling file logs. Empty means stdout only.
    pub log_dir: Option<PathBuf>,
}

/// Remote drive provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriveConfig {
    /// Base URL of the provider's metadata/media API.
    pub api_base_url: String,

    /// Base URL of the provider's resumable upload API.
    pub upload_base_url: String,

    /// Resource id of the configured root folder. The root is public by
    /// construction; ancestry walks stop there.
    pub root_id: String,

    /// Bearer access token for the provider. Refresh is an external
    /// collaborator's job; this value is what it last handed us.
    pub access_token: String,
}

/// Share/session token configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TokenConfig {
    /// Symmetric signing secret, minimum 32 bytes. An absent or short
    /// secret disables share tokens instead of aborting startup. May be
    /// overridden by `DRIVEGATE_SIGNING_SECRET`.
    pub signing_secret: String,

    /// Default TTL for newly issued share tokens, in seconds.
    pub default_share_ttl_secs: u64,
}

/// Access-restriction configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccessConfig {
    /// Statically private resource ids (env-style list). Restricted for
    /// everyone except admins and batch-granted callers.
    pub private_ids: Vec<String>,

    /// Caller emails granted batch access to the static private set.
    pub batch_grants: Vec<String>,

    /// Hard cap on the ancestry-walk depth.
    pub max_depth: usize,

    /// Retry attempts for transient metadata failures during the walk.
    pub metadata_retries: u32,

    /// Base backoff between metadata retries, in milliseconds.
    pub metadata_backoff_ms: u64,
}

/// A single route-class rate limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RouteLimit {
    /// Maximum requests per window.
    pub limit: u64,

    /// Window length in seconds.
    pub window_secs: u64,
}

impl RouteLimit {
    /// Window length as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Per-route-class rate limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitConfig {
    /// General API routes.
    pub api: RouteLimit,

    /// Download streaming routes.
    pub download: RouteLimit,

    /// Token issue/revoke routes.
    pub auth: RouteLimit,

    /// Administrative routes (uploads included).
    pub admin: RouteLimit,
}

/// Resumable upload configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Chunk size the caller is expected to use, in bytes.
    pub chunk_size: u64,

    /// Maximum concurrently driven upload sessions per batch.
    pub max_concurrent: usize,

    /// Retry budget for transient init/chunk failures.
    pub retry_budget: u32,

    /// Base backoff between retries, in milliseconds (linear).
    pub backoff_ms: u64,

    /// TTL for the per-batch folder-path cache, in seconds.
    pub path_cache_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base_url: "https://www.googleapis.com/upload/drive/v3".to_string(),
            root_id: "root".to_string(),
            access_token: String::new(),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            default_share_ttl_secs: 7 * 24 * 3600, // one week
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            private_ids: Vec::new(),
            batch_grants: Vec::new(),
            max_depth: 20,
            metadata_retries: 3,
            metadata_backoff_ms: 200,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            api: RouteLimit {
                limit: 100,
                window_secs: 60,
            },
            download: RouteLimit {
                limit: 10,
                window_secs: 3600,
            },
            auth: RouteLimit {
                limit: 20,
                window_secs: 60,
            },
            admin: RouteLimit {
                limit: 60,
                window_secs: 60,
            },
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4 * 1024 * 1024, // 4MiB
            max_concurrent: 3,
            retry_budget: 3,
            backoff_ms: 500,
            path_cache_ttl_secs: 600,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drivegate")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - DRIVEGATE_SIGNING_SECRET: Override the token signing secret
    /// - DRIVEGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - DRIVEGATE_ACCESS_TOKEN: Override the drive bearer token
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(ENV_SIGNING_SECRET) {
            if !secret.is_empty() {
                tracing::info!("Overriding signing_secret from environment");
                self.tokens.signing_secret = secret;
            }
        }

        if let Ok(level) = std::env::var("DRIVEGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.server.log_level = level;
            }
        }

        if let Ok(token) = std::env::var("DRIVEGATE_ACCESS_TOKEN") {
            if !token.is_empty() {
                tracing::info!("Overriding drive access_token from environment");
                self.drive.access_token = token;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid
    /// range. A short or missing signing secret is deliberately NOT a
    /// validation error: the token service degrades to rejecting share
    /// tokens instead of keeping the gateway from starting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.server.bind_addr.clone()));
        }

        let url = &self.drive.api_base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidApiBaseUrl(url.clone()));
        }
        let url = &self.drive.upload_base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidApiBaseUrl(url.clone()));
        }

        if self.drive.root_id.is_empty() {
            return Err(ConfigError::MissingRootId);
        }

        for (class, route) in [
            ("api", &self.limits.api),
            ("download", &self.limits.download),
            ("auth", &self.limits.auth),
            ("admin", &self.limits.admin),
        ] {
            if route.limit == 0 {
                return Err(ConfigError::InvalidRouteLimit { class });
            }
            if route.window_secs == 0 || route.window_secs > 86400 {
                return Err(ConfigError::InvalidRouteWindow {
                    class,
                    window_secs: route.window_secs,
                });
            }
        }

        if self.upload.chunk_size < MIN_CHUNK_SIZE || self.upload.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize(self.upload.chunk_size));
        }

        if self.upload.max_concurrent < 1 || self.upload.max_concurrent > 16 {
            return Err(ConfigError::InvalidMaxConcurrent(self.upload.max_concurrent));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {e}"))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }
}
