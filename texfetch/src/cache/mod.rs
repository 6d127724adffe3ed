//! Local image cache.
//!
//! The fetch worker consults the cache before touching the network and
//! writes freshly received bytes back after a successful decode. Backends:
//!
//! - [`NullImageCache`] never stores anything
//! - [`MemoryImageCache`] keeps entries in RAM with LRU eviction
//! - [`DiskImageCache`] persists one checksummed file per image

mod disk;
mod memory;
mod stats;
mod traits;

pub use disk::{DiskImageCache, DiskUsage};
pub use memory::MemoryImageCache;
pub use stats::CacheStats;
pub use traits::{CacheError, CachedImage, ImageCache, NullImageCache, VersionTag};
