//! User configuration file.
//!
//! `~/.texfetch/config.ini` is an INI file read with the `ini` crate. Every
//! key is optional; missing keys keep their defaults and unknown ones are
//! ignored. [`FetchConfig`](crate::fetch::FetchConfig) converts from a loaded
//! [`ConfigFile`].
//!
//! ```no_run
//! use texfetch::config::ConfigFile;
//! use texfetch::fetch::FetchConfig;
//!
//! let file = ConfigFile::load()?;
//! let config = FetchConfig::from(&file);
//! # Ok::<(), texfetch::config::ConfigFileError>(())
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use defaults::{
    default_cache_directory, CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_MEMORY_CACHE_SIZE,
};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    CacheSettings, ConfigFile, FetchSettings, HttpSettings, LoggingSettings, TimeoutSettings,
};
pub use size::{format_size, parse_size, SizeParseError};

/// Render `config` as commented INI text, as `save_to` would write it.
pub fn to_config_string(config: &ConfigFile) -> String {
    writer::to_config_string(config)
}
