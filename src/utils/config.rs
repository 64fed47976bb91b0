//! Application configuration

use crate::downloader::engine::TransferConfig;
use crate::downloader::retry::RetryPolicy;
use crate::selector::CodecPreference;
use crate::utils::error::{Result, TubeloaderError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Smallest and largest accepted playlist worker counts
pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 16;
pub const DEFAULT_WORKERS: usize = 4;

/// Which metadata resolution strategy the process uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// Hosted metadata API, needs `api_key`
    Api,
    /// Public watch page and player data
    #[default]
    Page,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Resolution strategy, chosen once per process
    pub resolver: ResolverKind,

    /// Credential for the hosted metadata API
    pub api_key: Option<String>,

    /// Base URL of the hosted metadata API
    pub api_base_url: String,

    /// Base URL of the public site (watch and playlist pages)
    pub web_base_url: String,

    /// User agent sent with every request
    pub user_agent: String,

    /// Download location
    pub download_location: PathBuf,

    /// Default playlist worker count
    pub max_workers: usize,

    /// Video codec ranking used to break resolution ties
    pub codec_preference: CodecPreference,

    /// Attempts per network operation (first try included)
    pub retry_attempts: u32,

    /// Backoff before the first retry (milliseconds)
    pub retry_initial_delay_ms: u64,

    /// Backoff growth factor
    pub retry_multiplier: u32,

    /// Backoff ceiling (milliseconds)
    pub retry_max_delay_ms: u64,

    /// Connect timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Timeout for a whole metadata request, or for one body chunk of a transfer (seconds)
    pub read_timeout_secs: u64,

    /// Minimum spacing between two metadata requests (milliseconds)
    pub request_spacing_ms: u64,

    /// Progress callback: minimum time between two updates (milliseconds)
    pub progress_interval_ms: u64,

    /// Progress callback: minimum bytes between two updates
    pub progress_min_bytes: u64,

    /// Resume partial downloads with range requests
    pub enable_resume: bool,

    /// Signature transform applied to ciphered stream URLs, e.g. "r,s2,w3"
    pub cipher_operations: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolver: ResolverKind::Page,
            api_key: None,
            api_base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            web_base_url: "https://www.youtube.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            download_location: dirs::download_dir().unwrap_or_else(|| PathBuf::from("./downloads")),
            max_workers: DEFAULT_WORKERS,
            codec_preference: CodecPreference::default(),
            retry_attempts: 3,
            retry_initial_delay_ms: 1_000,
            retry_multiplier: 2,
            retry_max_delay_ms: 30_000,
            connect_timeout_secs: 15,
            read_timeout_secs: 30,
            request_spacing_ms: 250,
            progress_interval_ms: 500,
            progress_min_bytes: 1024 * 1024, // 1MB
            enable_resume: true,
            cipher_operations: None,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw).map_err(|e| {
            TubeloaderError::Configuration(format!("{}: {}", path.display(), e))
        })?;
        settings.validate()?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Reject values outside their accepted ranges
    pub fn validate(&self) -> Result<()> {
        validate_worker_count(self.max_workers)?;
        if self.retry_attempts == 0 {
            return Err(TubeloaderError::Configuration(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(TubeloaderError::Configuration(
                "timeouts must be finite and non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            multiplier: self.retry_multiplier.max(1),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            retry: self.retry_policy(),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            progress_min_bytes: self.progress_min_bytes,
            enable_resume: self.enable_resume,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn request_spacing(&self) -> Duration {
        Duration::from_millis(self.request_spacing_ms)
    }
}

/// Accept playlist worker counts in `1..=16`
pub fn validate_worker_count(max_workers: usize) -> Result<()> {
    if !(MIN_WORKERS..=MAX_WORKERS).contains(&max_workers) {
        return Err(TubeloaderError::Configuration(format!(
            "max_workers must be between {} and {} (got {})",
            MIN_WORKERS, MAX_WORKERS, max_workers
        )));
    }
    Ok(())
}
