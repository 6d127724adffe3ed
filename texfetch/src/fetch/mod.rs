//! Fetch pipeline: the manager facade and the per-image workers behind it.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────────────┐
//!  render loop ───────► │         FetchManager         │
//!  (create/delete/      │  request table   ◄─ identity │
//!   update/finished)    │  network queue   (datagram)  │
//!                       │  HTTP queue                  │
//!                       │  cancel queue    (per host)  │
//!                       └──────────────┬───────────────┘
//!                                      │ spawn (highest priority first)
//!                                      ▼
//!                 ┌──────────── texfetch-worker runtime ────────────┐
//!                 │ Worker: Init ─► CacheLookup ─► NetworkRequest   │
//!                 │          ─► WaitingOnNetwork ─► Decode          │
//!                 │          ─► WriteCache ─► Done / Failed         │
//!                 └──┬──────────────┬──────────────┬────────────────┘
//!                    ▼              ▼              ▼
//!               ImageCache     HttpClient     ImageDecoder
//!                                             (blocking pool)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use texfetch::fetch::{FetchConfig, FetchManager, FetchOutcome, FetchRequest};
//! use texfetch::ImageId;
//!
//! let manager = FetchManager::builder(FetchConfig::default()).build()?;
//! let id = ImageId::new_random();
//! manager.create_request(
//!     FetchRequest::new(id)
//!         .with_url("https://assets.example.com/textures/grass.png")
//!         .with_priority(10.0),
//! );
//!
//! loop {
//!     manager.update(Duration::from_millis(2));
//!     if let Some(outcome) = manager.get_request_finished(id) {
//!         if let FetchOutcome::Decoded(image) = outcome {
//!             println!("{}x{}", image.raw.width, image.raw.height);
//!         }
//!         break;
//!     }
//!     std::thread::sleep(Duration::from_millis(16));
//! }
//! # Ok::<(), texfetch::fetch::FetchError>(())
//! ```

mod bandwidth;
mod config;
mod context;
mod diagnostics;
mod error;
mod handle;
mod manager;
mod queues;
mod request;
mod slots;
mod state;
mod stats;
mod worker;

pub use bandwidth::{BandwidthMeter, DEFAULT_BANDWIDTH_WINDOW};
pub use config::{
    clamp_http_concurrent, default_decode_concurrent, default_worker_threads, FetchConfig,
    DEFAULT_CACHE_TIMEOUT, DEFAULT_DATAGRAM_TIMEOUT, DEFAULT_DOWNLOAD_LOG_CAPACITY,
    DEFAULT_HTTP_REQUEST_TIMEOUT, DEFAULT_MAX_DATAGRAM_ATTEMPTS, DEFAULT_MAX_DECODE_ATTEMPTS,
    DEFAULT_MAX_EARLY_PACKETS, DEFAULT_MAX_HTTP_ATTEMPTS, DEFAULT_MAX_HTTP_CONCURRENT,
    DEFAULT_MAX_REQUESTS_PER_PASS, DEFAULT_PRIORITY_RESEND_DELTA, DEFAULT_PUSHED_IMAGE_PRIORITY,
    DEFAULT_REQUEST_RESEND_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, MAX_HTTP_CONCURRENT,
    MIN_HTTP_CONCURRENT,
};
pub use diagnostics::FetchStateInfo;
pub use error::FetchError;
pub use handle::{FETCH_PRIORITY_ACTIVE, FETCH_PRIORITY_MASK, FETCH_PRIORITY_WAITING};
pub use manager::{FetchManager, FetchManagerBuilder, UpdateReport, WORKER_THREAD_NAME};
pub use request::FetchRequest;
pub use state::{FetchFailure, FetchOutcome, FetchState, Transport, TransportKind};
pub use stats::{DownloadRecord, FetchStatsSnapshot};
