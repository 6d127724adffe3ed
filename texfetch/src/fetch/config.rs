//! Fetch manager tuning.

use std::time::Duration;

use crate::transport::IMAGES_PER_REQUEST;

// =============================================================================
// Concurrency
// =============================================================================

/// Default concurrent HTTP requests.
pub const DEFAULT_MAX_HTTP_CONCURRENT: usize = 8;

/// Bounds for `max_http_concurrent`.
pub const MIN_HTTP_CONCURRENT: usize = 1;
pub const MAX_HTTP_CONCURRENT: usize = 64;

/// Default worker threads: one per core, at least two.
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(2)
}

/// Default concurrent decodes: one per core.
pub fn default_decode_concurrent() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

// =============================================================================
// Retry and timeouts
// =============================================================================

pub const DEFAULT_MAX_HTTP_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_DATAGRAM_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_DECODE_ATTEMPTS: u32 = 2;

pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DATAGRAM_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Datagram request batching
// =============================================================================

/// Re-send an unanswered datagram request after this long.
pub const DEFAULT_REQUEST_RESEND_INTERVAL: Duration = Duration::from_secs(10);

/// Priority change that forces a re-send.
pub const DEFAULT_PRIORITY_RESEND_DELTA: f32 = 1000.0;

/// Image requests sent per `update` pass, across all hosts.
pub const DEFAULT_MAX_REQUESTS_PER_PASS: usize = 80;

/// Priority given to images a simulator pushes without being asked.
pub const DEFAULT_PUSHED_IMAGE_PRIORITY: f32 = 1.0;

/// Datagram packets held while waiting for a late header.
pub const DEFAULT_MAX_EARLY_PACKETS: usize = 64;

/// Download records kept for statistics.
pub const DEFAULT_DOWNLOAD_LOG_CAPACITY: usize = 1024;

/// Tuning for [`FetchManager`](crate::fetch::FetchManager).
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub worker_threads: usize,
    pub max_http_concurrent: usize,
    pub max_decode_concurrent: usize,
    pub max_http_attempts: u32,
    pub max_datagram_attempts: u32,
    pub max_decode_attempts: u32,
    pub cache_timeout: Duration,
    pub http_timeout: Duration,
    pub datagram_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub request_resend_interval: Duration,
    pub priority_resend_delta: f32,
    pub images_per_message: usize,
    pub max_requests_per_pass: usize,
    pub pushed_image_priority: f32,
    pub max_early_packets: usize,
    /// Initial inbound ceiling in bytes per second; 0 is unlimited.
    pub bandwidth: f32,
    pub download_log_capacity: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_http_concurrent: DEFAULT_MAX_HTTP_CONCURRENT,
            max_decode_concurrent: default_decode_concurrent(),
            max_http_attempts: DEFAULT_MAX_HTTP_ATTEMPTS,
            max_datagram_attempts: DEFAULT_MAX_DATAGRAM_ATTEMPTS,
            max_decode_attempts: DEFAULT_MAX_DECODE_ATTEMPTS,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            http_timeout: DEFAULT_HTTP_REQUEST_TIMEOUT,
            datagram_timeout: DEFAULT_DATAGRAM_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            request_resend_interval: DEFAULT_REQUEST_RESEND_INTERVAL,
            priority_resend_delta: DEFAULT_PRIORITY_RESEND_DELTA,
            images_per_message: IMAGES_PER_REQUEST,
            max_requests_per_pass: DEFAULT_MAX_REQUESTS_PER_PASS,
            pushed_image_priority: DEFAULT_PUSHED_IMAGE_PRIORITY,
            max_early_packets: DEFAULT_MAX_EARLY_PACKETS,
            bandwidth: 0.0,
            download_log_capacity: DEFAULT_DOWNLOAD_LOG_CAPACITY,
        }
    }
}

impl FetchConfig {
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_max_http_concurrent(mut self, value: usize) -> Self {
        self.max_http_concurrent = clamp_http_concurrent(value);
        self
    }

    pub fn with_max_decode_concurrent(mut self, value: usize) -> Self {
        self.max_decode_concurrent = value.max(1);
        self
    }

    pub fn with_attempts(mut self, http: u32, datagram: u32, decode: u32) -> Self {
        self.max_http_attempts = http;
        self.max_datagram_attempts = datagram;
        self.max_decode_attempts = decode.max(1);
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_datagram_timeout(mut self, timeout: Duration) -> Self {
        self.datagram_timeout = timeout;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_request_resend_interval(mut self, interval: Duration) -> Self {
        self.request_resend_interval = interval;
        self
    }

    pub fn with_bandwidth(mut self, bytes_per_second: f32) -> Self {
        self.bandwidth = bytes_per_second.max(0.0);
        self
    }

    pub fn with_pushed_image_priority(mut self, priority: f32) -> Self {
        self.pushed_image_priority = priority;
        self
    }
}

/// Clamp `max_http_concurrent` into range, warning when it moves.
pub fn clamp_http_concurrent(value: usize) -> usize {
    if value < MIN_HTTP_CONCURRENT {
        tracing::warn!(
            requested = value,
            min = MIN_HTTP_CONCURRENT,
            "max_http_concurrent below minimum, clamping to {}",
            MIN_HTTP_CONCURRENT
        );
        MIN_HTTP_CONCURRENT
    } else if value > MAX_HTTP_CONCURRENT {
        tracing::warn!(
            requested = value,
            max = MAX_HTTP_CONCURRENT,
            "max_http_concurrent above maximum, clamping to {}",
            MAX_HTTP_CONCURRENT
        );
        MAX_HTTP_CONCURRENT
    } else {
        value
    }
}
