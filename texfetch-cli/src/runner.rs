//! CLI runner for common setup.
//!
//! Loads the config file and installs logging for commands that drive the
//! pipeline.

use tracing::info;

use texfetch::config::ConfigFile;
use texfetch::logging::{init_logging, LoggingGuard};

use crate::error::CliError;

/// Keeps logging alive for the duration of a command.
pub struct CliRunner {
    _logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Load `~/.texfetch/config.ini` (or defaults) and initialize logging.
    pub fn new() -> Result<Self, CliError> {
        let config = ConfigFile::load()?;
        let logging_guard = init_logging(&config.logging.directory, &config.logging.file)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("texfetch v{}", texfetch::VERSION);
        info!(
            command,
            log = %self.config.logging.directory.join(&self.config.logging.file).display(),
            "texfetch CLI started"
        );
    }
}
