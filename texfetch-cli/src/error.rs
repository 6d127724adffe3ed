//! CLI error handling with user-friendly messages.
//!
//! Every command returns `Result<(), CliError>`; `main` prints the error and
//! exits with the code from [`CliError::exit_code`].

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use texfetch::cache::CacheError;
use texfetch::config::ConfigFileError;
use texfetch::fetch::{FetchError, FetchFailure};
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigFileError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to start fetch pipeline: {0}")]
    Fetch(#[from] FetchError),

    #[error("Fetch failed: {0}")]
    FetchFailed(FetchFailure),

    #[error("Timed out after {}s waiting for the image", .0.as_secs())]
    Timeout(Duration),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Failed to write file '{}': {error}", path.display())]
    FileWrite { path: PathBuf, error: String },
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgument(_) => 2,
            CliError::FetchFailed(_) | CliError::Timeout(_) => 3,
            _ => 1,
        }
    }

    /// Print the error, with a hint where one helps, and exit.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Config(_) => {
                eprintln!();
                eprintln!("Check the file shown by: texfetch config path");
                eprintln!("Regenerate defaults with: texfetch config init --force");
            }
            CliError::FetchFailed(FetchFailure::NoSource) => {
                eprintln!();
                eprintln!("The image is not cached and no --url was given.");
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }
}
