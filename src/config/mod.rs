//! Application configuration.
//!
//! Loaded from a TOML file (default `vodvault.toml` in the working
//! directory) with environment-variable overrides for paths and secrets, so
//! credentials never need to live in the config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "vodvault.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_database_url() -> String {
    "sqlite:vodvault.db?mode=rwc".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root directory for the `vods/`, `chats/` and `finals/` trees.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Idle poll interval when no job is eligible, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Lease refresh interval, in seconds.
    #[serde(default = "default_lease_refresh_secs")]
    pub lease_refresh_secs: u64,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_lease_refresh_secs() -> u64 {
    120
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lease_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.lease_refresh_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            poll_interval_secs: default_poll_interval_secs(),
            lease_refresh_secs: default_lease_refresh_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Path to the ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Path to the VOD download CLI.
    #[serde(default = "default_vod_downloader_path")]
    pub vod_downloader_path: String,
    /// Path to the chat download/render CLI.
    #[serde(default = "default_chat_downloader_path")]
    pub chat_downloader_path: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_vod_downloader_path() -> String {
    "yt-dlp".to_string()
}

fn default_chat_downloader_path() -> String {
    "TwitchDownloaderCLI".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            vod_downloader_path: default_vod_downloader_path(),
            chat_downloader_path: default_chat_downloader_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Seconds between channel scans.
    #[serde(default = "default_ingest_interval_secs")]
    pub interval_secs: u64,
    /// Source-platform API client id (env `TWITCH_CLIENT_ID`).
    #[serde(default)]
    pub client_id: String,
    /// Source-platform API app token (env `TWITCH_AUTH_TOKEN`).
    #[serde(default)]
    pub auth_token: String,
}

fn default_ingest_interval_secs() -> u64 {
    600
}

impl IngestConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_ingest_interval_secs(),
            client_id: String::new(),
            auth_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// JSON file with `client_id`, `client_secret` and `refresh_token`.
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    /// Resumable upload chunk size in bytes.
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("youtube_credentials.json")
}

fn default_chunk_size_bytes() -> usize {
    8 * 1024 * 1024
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            chunk_size_bytes: default_chunk_size_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rolling log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Filter directive override (else `RUST_LOG` or the built-in default).
    #[serde(default)]
    pub filter: String,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            filter: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` (or the default file if present),
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&raw)
            .map_err(|e| Error::config(format!("Invalid config file {}: {e}", path.display())))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.store.database_url = url;
        }
        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            self.tools.ffmpeg_path = path;
        }
        if let Ok(path) = std::env::var("FFPROBE_PATH") {
            self.tools.ffprobe_path = path;
        }
        if let Ok(path) = std::env::var("VOD_DOWNLOADER_PATH") {
            self.tools.vod_downloader_path = path;
        }
        if let Ok(path) = std::env::var("CHAT_DOWNLOADER_PATH") {
            self.tools.chat_downloader_path = path;
        }
        if let Ok(id) = std::env::var("TWITCH_CLIENT_ID") {
            self.ingest.client_id = id;
        }
        if let Ok(token) = std::env::var("TWITCH_AUTH_TOKEN") {
            self.ingest.auth_token = token;
        }
        if let Ok(path) = std::env::var("UPLOAD_CREDENTIALS_PATH") {
            self.upload.credentials_path = PathBuf::from(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.store.database_url, "sqlite:vodvault.db?mode=rwc");
        assert_eq!(config.pipeline.poll_interval(), Duration::from_secs(30));
        assert_eq!(
            config.pipeline.lease_refresh_interval(),
            Duration::from_secs(120)
        );
        assert_eq!(config.ingest.interval(), Duration::from_secs(600));
        assert_eq!(config.upload.chunk_size_bytes, 8 * 1024 * 1024);
        assert_eq!(config.tools.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [pipeline]
            working_dir = "/srv/archive"
            poll_interval_secs = 5

            [tools]
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.working_dir, PathBuf::from("/srv/archive"));
        assert_eq!(config.pipeline.poll_interval_secs, 5);
        assert_eq!(config.pipeline.lease_refresh_secs, 120);
        assert_eq!(config.tools.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.tools.ffprobe_path, "ffprobe");
    }
}
