use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for locally served media; cached BBCode images live
    /// under `{media_dir}/bbcode/`
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("agora.db")
}
fn default_media_dir() -> PathBuf {
    PathBuf::from("media")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            media_dir: default_media_dir(),
        }
    }
}

/// Limits for fetching and validating remote BBCode images.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum number of bytes accepted for a single image (default: 8 MiB)
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,

    /// Accepted `Content-Type` values
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,

    /// Whole-request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// TCP connect timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Largest decoded pixel count accepted before an image is treated as a
    /// decompression bomb
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,

    /// Bytes kept in memory before a download spills to a temporary file
    #[serde(default = "default_spool_threshold")]
    pub spool_threshold_bytes: usize,

    /// `User-Agent` header sent with image requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_size() -> u64 {
    8 * 1024 * 1024
}
fn default_allowed_types() -> Vec<String> {
    [
        "image/png",
        "image/jpeg",
        "image/pjpeg",
        "image/gif",
        "image/webp",
        "image/bmp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_max_pixels() -> u64 {
    // 1 GiB / 4 / 3
    89_478_485
}
fn default_spool_threshold() -> usize {
    2 * 1024 * 1024
}
fn default_user_agent() -> String {
    format!("agora/{}", env!("CARGO_PKG_VERSION"))
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size(),
            allowed_types: default_allowed_types(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_pixels: default_max_pixels(),
            spool_threshold_bytes: default_spool_threshold(),
            user_agent: default_user_agent(),
        }
    }
}

/// Background postprocess queue settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Maximum number of postprocess jobs running at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pending jobs buffered before `submit` waits
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_workers() -> usize {
    4
}
fn default_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            capacity: default_capacity(),
        }
    }
}
