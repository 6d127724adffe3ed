//! Settings structs, one per `[section]` of `config.ini`.
//!
//! Plain data. Parsing lives in [`super::parser`], serialization in
//! [`super::writer`], defaults in [`super::defaults`].

use std::path::PathBuf;

/// Everything read from `config.ini`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub fetch: FetchSettings,
    pub timeouts: TimeoutSettings,
    pub http: HttpSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

/// `[fetch]`: worker pool, concurrency and retry bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    /// Worker runtime threads.
    pub worker_threads: usize,
    /// HTTP requests in flight. Clamped to 1..=64.
    pub max_http_concurrent: usize,
    /// Decodes in flight.
    pub max_decode_concurrent: usize,
    pub max_http_attempts: u32,
    pub max_datagram_attempts: u32,
    pub max_decode_attempts: u32,
    /// Inbound ceiling in bytes per second; 0 is unlimited.
    pub bandwidth: usize,
    /// Priority of images a simulator pushes unasked.
    pub pushed_image_priority: f32,
}

/// `[timeouts]`, all in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutSettings {
    pub cache: u64,
    pub http: u64,
    pub datagram: u64,
    pub shutdown: u64,
    pub request_resend: u64,
}

/// `[http]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    /// Seconds.
    pub connect_timeout: u64,
    /// Seconds an idle pooled connection is kept.
    pub pool_idle: u64,
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Disk cache root.
    pub directory: PathBuf,
    /// Memory cache size in bytes; 0 disables it.
    pub memory_size: usize,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}
