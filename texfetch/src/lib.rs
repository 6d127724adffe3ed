//! texfetch - asynchronous image fetch pipeline
//!
//! Streams compressed images from a local cache, HTTP origins and a
//! simulator's datagram transport, decodes them off the calling thread and
//! hands raw pixels back to a render loop that polls once per frame.
//!
//! # High-Level API
//!
//! [`fetch::FetchManager`] is the facade. Collaborators plug in through
//! traits so each source can be swapped or mocked:
//!
//! - [`cache::ImageCache`] - local byte store
//! - [`http::HttpClient`] - ranged GETs
//! - [`decode::ImageDecoder`] - bytes to pixels at a discard level
//! - [`transport::DatagramTransport`] - outbound simulator messages
//!
//! ```ignore
//! use texfetch::fetch::{FetchConfig, FetchManager, FetchRequest};
//!
//! let manager = FetchManager::builder(FetchConfig::default())
//!     .with_cache(cache)
//!     .build()?;
//! manager.create_request(FetchRequest::new(id).with_url(url));
//! // once per frame
//! manager.update(Duration::from_millis(2));
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod cache;
pub mod config;
pub mod decode;
pub mod fetch;
pub mod http;
pub mod id;
pub mod logging;
pub mod transport;

pub use id::{Host, ImageId};

/// Version of the texfetch library and CLI.
///
/// Shared by every crate in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Boxed future used by the object-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
