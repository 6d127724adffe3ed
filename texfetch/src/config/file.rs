//! Loading and saving `~/.texfetch/config.ini`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::defaults::{CONFIG_DIR_NAME, CONFIG_FILE_NAME};
use super::settings::ConfigFile;
use crate::fetch::FetchConfig;
use crate::http::HttpClientConfig;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load from the default path. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save to the default path.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }
        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Write a default config file at `path` unless one exists.
    ///
    /// Returns true if a file was written.
    pub fn ensure_exists(path: &Path) -> Result<bool, ConfigFileError> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save_to(path)?;
        Ok(true)
    }

    /// HTTP client settings derived from `[http]` and `[timeouts]`.
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            user_agent: self.http.user_agent.clone(),
            timeout: Duration::from_secs(self.timeouts.http),
            connect_timeout: Duration::from_secs(self.http.connect_timeout),
            pool_idle_timeout: Duration::from_secs(self.http.pool_idle),
        }
    }
}

impl From<&ConfigFile> for FetchConfig {
    fn from(file: &ConfigFile) -> Self {
        let fetch = &file.fetch;
        let timeouts = &file.timeouts;
        FetchConfig::default()
            .with_worker_threads(fetch.worker_threads)
            .with_max_http_concurrent(fetch.max_http_concurrent)
            .with_max_decode_concurrent(fetch.max_decode_concurrent)
            .with_attempts(
                fetch.max_http_attempts,
                fetch.max_datagram_attempts,
                fetch.max_decode_attempts,
            )
            .with_bandwidth(fetch.bandwidth as f32)
            .with_pushed_image_priority(fetch.pushed_image_priority)
            .with_cache_timeout(Duration::from_secs(timeouts.cache))
            .with_http_timeout(Duration::from_secs(timeouts.http))
            .with_datagram_timeout(Duration::from_secs(timeouts.datagram))
            .with_shutdown_timeout(Duration::from_secs(timeouts.shutdown))
            .with_request_resend_interval(Duration::from_secs(timeouts.request_resend))
    }
}

/// `~/.texfetch`
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// `~/.texfetch/config.ini`
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}
