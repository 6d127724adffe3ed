//! Cache trait and the value types that cross it.
//!
//! The fetch worker talks to its local cache only through [`ImageCache`].
//! Methods return boxed futures so the manager can hold any backend as
//! `Arc<dyn ImageCache>`.

use std::path::PathBuf;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::cache::CacheStats;
use crate::id::ImageId;
use crate::BoxFuture;

/// Freshness marker for a cached byte stream.
///
/// Derived from the first eight bytes of the SHA-256 digest of the stored
/// bytes, so a tag also detects on-disk corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionTag(pub u64);

impl VersionTag {
    /// Compute the tag for a byte stream.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(head))
    }
}

/// Best cached byte range for one image.
#[derive(Debug, Clone)]
pub struct CachedImage {
    /// Leading bytes of the compressed stream.
    pub data: Bytes,
    /// Total size of the compressed stream, when known.
    pub image_size: Option<usize>,
    pub version: VersionTag,
}

impl CachedImage {
    /// Wrap a byte prefix, computing its version tag.
    pub fn new(data: Bytes, image_size: Option<usize>) -> Self {
        let version = VersionTag::of(&data);
        Self {
            data,
            image_size,
            version,
        }
    }

    /// True when the entry holds the whole compressed stream.
    pub fn is_complete(&self) -> bool {
        self.image_size == Some(self.data.len())
    }

    /// True when the bytes still hash to the recorded tag.
    pub fn verify(&self) -> bool {
        VersionTag::of(&self.data) == self.version
    }
}

/// Errors raised by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry for {id}: {reason}")]
    Corrupt { id: ImageId, reason: String },

    #[error("cache directory unavailable: {0}")]
    Directory(PathBuf),
}

/// Local store of compressed image bytes keyed by identity.
///
/// Implementations must be safe to call from many worker tasks at once.
/// A lookup never returns bytes that fail [`CachedImage::verify`]; such
/// entries surface as [`CacheError::Corrupt`] instead.
pub trait ImageCache: Send + Sync + 'static {
    /// Fetch the best cached bytes for `id`.
    fn lookup(&self, id: ImageId) -> BoxFuture<'_, Result<Option<CachedImage>, CacheError>>;

    /// Persist bytes for `id`, replacing any previous entry.
    fn store(&self, id: ImageId, image: CachedImage) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Drop the entry for `id`. Returns true if something was removed.
    fn remove(&self, id: ImageId) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// True if the cache holds exactly the bytes identified by `version`.
    fn has_newest(&self, id: ImageId, version: VersionTag) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            matches!(self.lookup(id).await, Ok(Some(cached)) if cached.version == version)
        })
    }

    /// Counter snapshot.
    fn stats(&self) -> CacheStats;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Cache that never stores anything.
///
/// Every lookup misses and every store succeeds without effect.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullImageCache;

impl ImageCache for NullImageCache {
    fn lookup(&self, _id: ImageId) -> BoxFuture<'_, Result<Option<CachedImage>, CacheError>> {
        Box::pin(async { Ok(None) })
    }

    fn store(&self, _id: ImageId, _image: CachedImage) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async { Ok(()) })
    }

    fn remove(&self, _id: ImageId) -> BoxFuture<'_, Result<bool, CacheError>> {
        Box::pin(async { Ok(false) })
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }

    fn name(&self) -> &str {
        "none"
    }
}
