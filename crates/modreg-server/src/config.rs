//! Server configuration
//!
//! This module handles hierarchical configuration loading from multiple sources:
//! - Default configuration file
//! - Environment-specific configuration file
//! - Environment variables
//! - Command-line arguments

use config::{Config, ConfigError, Environment, File};
use modreg_core::QuotaLimits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server settings
    #[serde(default)]
    pub server: HttpServerConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Blob storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload buffering settings
    #[serde(default)]
    pub upload: UploadConfig,

    /// Per-owner quota limits
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Publisher identity settings
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// CORS settings
    #[serde(default)]
    pub cors: CorsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable graceful shutdown
    #[serde(default = "default_true")]
    pub graceful_shutdown: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            graceful_shutdown: default_true(),
        }
    }
}

/// Package store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Which package store to run
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    /// Maximum lifetime of a connection in seconds
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_seconds: u64,

    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Postgres
}

fn default_database_url() -> String {
    "postgresql://localhost/modreg".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_lifetime() -> u64 {
    1800
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_seconds: default_connection_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
            max_lifetime_seconds: default_max_lifetime(),
            run_migrations: default_true(),
        }
    }
}

/// Blob store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    Filesystem,
    Memory,
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where blob bytes live
    #[serde(default = "default_blob_backend")]
    pub backend: BlobBackend,

    /// Directory holding content-addressed blobs
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
}

fn default_blob_backend() -> BlobBackend {
    BlobBackend::Filesystem
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("data/blobs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_blob_backend(),
            blob_dir: default_blob_dir(),
        }
    }
}

/// Upload buffering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Uploads above this size are spilled to a temporary file
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_bytes: usize,
}

fn default_memory_threshold() -> usize {
    modreg_service::DEFAULT_MEMORY_THRESHOLD
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            memory_threshold_bytes: default_memory_threshold(),
        }
    }
}

/// Quota configuration; an absent limit is unlimited
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Maximum number of versions per owner
    #[serde(default)]
    pub max_version_count: Option<u64>,

    /// Maximum size of a single module archive in bytes
    #[serde(default)]
    pub max_type_file_size: Option<u64>,

    /// Maximum total stored bytes per owner
    #[serde(default)]
    pub max_total_size: Option<u64>,
}

impl QuotaConfig {
    pub fn limits(&self) -> QuotaLimits {
        QuotaLimits {
            max_version_count: self.max_version_count,
            max_type_file_size: self.max_type_file_size,
            max_total_size: self.max_total_size,
        }
    }
}

/// Publisher identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Header carrying the authenticated user name
    #[serde(default = "default_identity_header")]
    pub header: String,
}

fn default_identity_header() -> String {
    modreg_api::DEFAULT_IDENTITY_HEADER.to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: default_identity_header(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON formatting
    #[serde(default)]
    pub json_format: bool,

    /// Include thread IDs
    #[serde(default)]
    pub include_thread_ids: bool,

    /// Include target module
    #[serde(default = "default_true")]
    pub include_target: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            include_thread_ids: false,
            include_target: true,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins (empty means all)
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Max age for preflight requests in seconds
    #[serde(default = "default_cors_max_age")]
    pub max_age_seconds: u64,
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            max_age_seconds: default_cors_max_age(),
        }
    }
}

impl CorsConfig {
    pub fn to_middleware(&self) -> modreg_api::CorsConfig {
        modreg_api::CorsConfig {
            allowed_origins: self.allowed_origins.clone(),
            max_age_seconds: Some(self.max_age_seconds),
        }
    }
}

impl ServerConfig {
    /// Load configuration from files and environment
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default configuration file (config/default.toml)
    /// 2. Environment-specific file (config/{env}.toml)
    /// 3. Environment variables (MODREG_*)
    pub fn load(config_dir: impl Into<PathBuf>, environment: &str) -> Result<Self, ConfigError> {
        let config_dir = config_dir.into();

        let config = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", environment))).required(false),
            )
            // e.g. MODREG_SERVER__PORT=8080
            .add_source(
                Environment::with_prefix("MODREG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
