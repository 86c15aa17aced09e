use crate::model::{CoordinateParsing, Radius, DEFAULT_RADIUS_KM};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the post service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// S3 configuration for post images
    pub s3: S3Config,
    /// Search index configuration
    pub search: SearchConfig,
    /// Record store database configuration
    pub database: DatabaseConfig,
    /// API configuration
    pub api: ApiConfig,
    /// Token validation configuration
    pub auth: AuthConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for post images
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL clients use to fetch images (CDN or bucket website)
    pub public_base_url: Option<String>,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Search index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Elasticsearch node URL
    pub url: String,
    /// Index holding post documents
    #[serde(default = "default_index")]
    pub index: String,
    /// Legacy document type name, kept for logging
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
    /// Radius applied when a search omits `range`
    #[serde(default = "default_radius_km")]
    pub default_radius_km: f64,
    /// Upper bound on hits returned by a single search
    #[serde(default = "default_max_hits")]
    pub max_hits: i64,
}

/// Database configuration for the wide-row record store
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Logical table the post records are appended to
    #[serde(default = "default_table")]
    pub table: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body (32MB default)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Coerce unparseable coordinates to 0.0 instead of rejecting them
    #[serde(default)]
    pub lenient_coordinates: bool,
}

/// Token validation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: String,
    /// Claim carrying the user identity
    #[serde(default = "default_username_claim")]
    pub username_claim: String,
}

// Default value functions
fn default_service_name() -> String {
    "post-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_index() -> String {
    "around".to_string()
}

fn default_doc_type() -> String {
    "post".to_string()
}

fn default_radius_km() -> f64 {
    DEFAULT_RADIUS_KM
}

fn default_max_hits() -> i64 {
    10_000
}

fn default_table() -> String {
    "post".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    32 << 20
}

fn default_username_claim() -> String {
    "username".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "post-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .set_default("api.port", 8080)?
            // Add config file if present
            .add_source(config::File::with_name("config/post-service").required(false))
            .add_source(config::File::with_name("/etc/around/post-service").required(false))
            // Override with environment variables
            // AROUND__SEARCH__URL -> search.url
            .add_source(
                config::Environment::with_prefix("AROUND")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl SearchConfig {
    /// Validated default search radius
    pub fn default_radius(&self) -> anyhow::Result<Radius> {
        Radius::from_km(self.default_radius_km).map_err(Into::into)
    }
}

impl ApiConfig {
    /// How `lat`/`lon` request values are parsed
    pub fn coordinate_parsing(&self) -> CoordinateParsing {
        if self.lenient_coordinates {
            CoordinateParsing::Lenient
        } else {
            CoordinateParsing::Strict
        }
    }
}
