use crate::backend::Backend;
use crate::models::ANONYMOUS_SENDER;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the photo relay
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
    /// Object storage configuration (hosted backend)
    pub storage: Option<StorageConfig>,
    /// Realtime database configuration (hosted backend)
    pub database: Option<DatabaseConfig>,
    /// Offline backend configuration
    #[serde(default)]
    pub offline: OfflineConfig,
    /// Gallery configuration
    #[serde(default)]
    pub gallery: GalleryConfig,
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
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Which storage and database pair to use
    #[serde(default)]
    pub backend: Backend,
    /// Sender label written into every record
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Extension of uploaded object keys
    #[serde(default = "default_image_extension")]
    pub image_extension: String,
}

/// S3-compatible object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket receiving uploaded images
    pub bucket: String,
    /// Region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (GCS interoperability, MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Public base URL; objects are addressed as `{base}/{key}` when set
    pub public_base_url: Option<String>,
    /// Presigned URL expiration in seconds, used without a public base URL
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Realtime database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database root URL, e.g. `https://<project>-default-rtdb.firebaseio.com/`
    pub url: String,
    /// Auth token appended as the `auth` query parameter
    pub auth_token: Option<String>,
    /// Timeout for non-streaming requests in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Offline backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OfflineConfig {
    /// Directory receiving "uploaded" images
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
}

/// Gallery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GalleryConfig {
    /// Gallery root directory
    #[serde(default = "default_gallery_dir")]
    pub dir: PathBuf,
    /// Album saved images are filed under
    #[serde(default = "default_album")]
    pub album: String,
    /// Save every received image automatically
    #[serde(default)]
    pub auto_save: bool,
}

// Default value functions
fn default_service_name() -> String {
    "photo-relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sender() -> String {
    ANONYMOUS_SENDER.to_string()
}

fn default_image_extension() -> String {
    "jpg".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    7 * 24 * 3600 // longest expiry SigV4 allows
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_shared_dir() -> PathBuf {
    PathBuf::from("shared_images")
}

fn default_gallery_dir() -> PathBuf {
    PathBuf::from("gallery")
}

fn default_album() -> String {
    "ImageSharingApp".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "photo-relay")?
            .set_default("service.log_level", "info")?
            // Add config file if present
            .add_source(config::File::with_name("config/relay").required(false))
            .add_source(config::File::with_name("/etc/photo-relay/relay").required(false))
            // Override with environment variables
            // RELAY__STORAGE__BUCKET -> storage.bucket
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl DatabaseConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            sender: default_sender(),
            image_extension: default_image_extension(),
        }
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            shared_dir: default_shared_dir(),
        }
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            dir: default_gallery_dir(),
            album: default_album(),
            auto_save: false,
        }
    }
}
