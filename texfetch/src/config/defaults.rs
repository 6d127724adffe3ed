//! Config-file defaults and the `ConfigFile::default()` implementation.
//!
//! Fetch tuning defaults are owned by [`crate::fetch`]; this module only adds
//! the file-level ones and converts units.

use std::path::PathBuf;

use super::settings::*;
use crate::fetch::{
    default_decode_concurrent, default_worker_threads, DEFAULT_CACHE_TIMEOUT,
    DEFAULT_DATAGRAM_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT, DEFAULT_MAX_DATAGRAM_ATTEMPTS,
    DEFAULT_MAX_DECODE_ATTEMPTS, DEFAULT_MAX_HTTP_ATTEMPTS, DEFAULT_MAX_HTTP_CONCURRENT,
    DEFAULT_PUSHED_IMAGE_PRIORITY, DEFAULT_REQUEST_RESEND_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::http::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_POOL_IDLE_TIMEOUT, DEFAULT_USER_AGENT};
use crate::logging::DEFAULT_LOG_FILE;

/// Default memory cache size (256 MB).
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 256 * 1024 * 1024;

/// Name of the per-user config directory under `$HOME`.
pub const CONFIG_DIR_NAME: &str = ".texfetch";

/// Name of the config file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Default disk cache root: the platform cache directory plus `texfetch`.
pub fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("texfetch")
}

impl Default for ConfigFile {
    fn default() -> Self {
        let config_dir = super::file::config_directory();

        Self {
            fetch: FetchSettings {
                worker_threads: default_worker_threads(),
                max_http_concurrent: DEFAULT_MAX_HTTP_CONCURRENT,
                max_decode_concurrent: default_decode_concurrent(),
                max_http_attempts: DEFAULT_MAX_HTTP_ATTEMPTS,
                max_datagram_attempts: DEFAULT_MAX_DATAGRAM_ATTEMPTS,
                max_decode_attempts: DEFAULT_MAX_DECODE_ATTEMPTS,
                bandwidth: 0,
                pushed_image_priority: DEFAULT_PUSHED_IMAGE_PRIORITY,
            },
            timeouts: TimeoutSettings {
                cache: DEFAULT_CACHE_TIMEOUT.as_secs(),
                http: DEFAULT_HTTP_REQUEST_TIMEOUT.as_secs(),
                datagram: DEFAULT_DATAGRAM_TIMEOUT.as_secs(),
                shutdown: DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
                request_resend: DEFAULT_REQUEST_RESEND_INTERVAL.as_secs(),
            },
            http: HttpSettings {
                user_agent: DEFAULT_USER_AGENT.to_string(),
                connect_timeout: DEFAULT_CONNECT_TIMEOUT.as_secs(),
                pool_idle: DEFAULT_POOL_IDLE_TIMEOUT.as_secs(),
            },
            cache: CacheSettings {
                directory: default_cache_directory(),
                memory_size: DEFAULT_MEMORY_CACHE_SIZE,
            },
            logging: LoggingSettings {
                directory: config_dir.join("logs"),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
