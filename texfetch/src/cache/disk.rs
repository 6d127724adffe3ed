//! On-disk image cache.
//!
//! One file per image identity, fanned out over 256 subdirectories by the
//! first two hex digits of the identity:
//!
//! ```text
//! {cache_dir}/{ab}/{abcdef...}.tex
//! ```
//!
//! # Entry format
//!
//! ```text
//! ┌──────────┬─────────┬────────────────┬─────────────┬─────────────┬─────────┐
//! │ "TXFC"   │ format  │ image size     │ version tag │ payload len │ payload │
//! │ 4 bytes  │ u8 (=1) │ u64 BE         │ u64 BE      │ u64 BE      │ ...     │
//! └──────────┴─────────┴────────────────┴─────────────┴─────────────┴─────────┘
//! ```
//!
//! An image size of `u64::MAX` means the full stream size is unknown. The
//! version tag is checked against the payload on every read, so a torn or
//! bit-rotted file is reported as [`CacheError::Corrupt`] rather than handed
//! to the decoder.
//!
//! Writes go to a uniquely named temp file first and are renamed into place,
//! so readers never observe a half-written entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::cache::stats::CacheCounters;
use crate::cache::{CacheError, CacheStats, CachedImage, ImageCache, VersionTag};
use crate::id::ImageId;
use crate::BoxFuture;

const ENTRY_MAGIC: &[u8; 4] = b"TXFC";
const ENTRY_FORMAT: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 8 + 8 + 8;
const UNKNOWN_SIZE: u64 = u64::MAX;
const ENTRY_EXTENSION: &str = "tex";

/// Disk usage summary produced by [`DiskImageCache::usage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub entries: u64,
    pub bytes: u64,
}

/// Persistent cache backed by one file per image.
pub struct DiskImageCache {
    directory: PathBuf,
    counters: CacheCounters,
    temp_sequence: AtomicU64,
    entries: AtomicU64,
    bytes: AtomicU64,
}

impl DiskImageCache {
    /// Open (creating if needed) a cache rooted at `directory`.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|_| CacheError::Directory(directory.clone()))?;
        info!(directory = %directory.display(), "disk image cache opened");

        Ok(Self {
            directory,
            counters: CacheCounters::default(),
            temp_sequence: AtomicU64::new(0),
            entries: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the entry file for `id`.
    pub fn entry_path(&self, id: ImageId) -> PathBuf {
        let name = id.to_simple_string();
        self.directory
            .join(&name[..2])
            .join(format!("{}.{}", name, ENTRY_EXTENSION))
    }

    /// Walk the cache directory and count entries and bytes.
    ///
    /// The result also refreshes the occupancy reported by
    /// [`ImageCache::stats`].
    pub async fn usage(&self) -> Result<DiskUsage, CacheError> {
        let mut usage = DiskUsage::default();
        let mut shards = match tokio::fs::read_dir(&self.directory).await {
            Ok(shards) => shards,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(usage),
            Err(e) => return Err(e.into()),
        };

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                    continue;
                }
                usage.entries += 1;
                usage.bytes += file.metadata().await?.len();
            }
        }

        self.entries.store(usage.entries, Ordering::Relaxed);
        self.bytes.store(usage.bytes, Ordering::Relaxed);
        Ok(usage)
    }

    /// Delete every entry. Returns the number of entries removed.
    pub async fn clear(&self) -> Result<u64, CacheError> {
        let usage = self.usage().await?;
        match tokio::fs::remove_dir_all(&self.directory).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.directory).await?;
        self.entries.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        info!(removed = usage.entries, "disk image cache cleared");
        Ok(usage.entries)
    }

    fn temp_path(&self, final_path: &Path) -> PathBuf {
        let seq = self.temp_sequence.fetch_add(1, Ordering::Relaxed);
        final_path.with_extension(format!("{}.tmp", seq))
    }
}

/// Serialize an entry into its on-disk form.
fn encode_entry(image: &CachedImage) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + image.data.len());
    out.put_slice(ENTRY_MAGIC);
    out.put_u8(ENTRY_FORMAT);
    out.put_u64(image.image_size.map(|s| s as u64).unwrap_or(UNKNOWN_SIZE));
    out.put_u64(image.version.0);
    out.put_u64(image.data.len() as u64);
    out.put_slice(&image.data);
    out.freeze()
}

/// Parse an on-disk entry, verifying its payload against the version tag.
fn decode_entry(id: ImageId, raw: Bytes) -> Result<CachedImage, CacheError> {
    let corrupt = |reason: &str| CacheError::Corrupt {
        id,
        reason: reason.to_string(),
    };

    if raw.len() < HEADER_LEN {
        return Err(corrupt("truncated header"));
    }
    if &raw[..4] != ENTRY_MAGIC {
        return Err(corrupt("bad magic"));
    }
    if raw[4] != ENTRY_FORMAT {
        return Err(corrupt("unsupported entry format"));
    }

    let read_u64 = |at: usize| {
        let mut word = [0u8; 8];
        word.copy_from_slice(&raw[at..at + 8]);
        u64::from_be_bytes(word)
    };
    let image_size = read_u64(5);
    let version = VersionTag(read_u64(13));
    let payload_len = read_u64(21) as usize;

    if raw.len() - HEADER_LEN != payload_len {
        return Err(corrupt("payload length mismatch"));
    }

    let data = raw.slice(HEADER_LEN..);
    if VersionTag::of(&data) != version {
        return Err(corrupt("version tag mismatch"));
    }

    let image_size = (image_size != UNKNOWN_SIZE).then_some(image_size as usize);
    if matches!(image_size, Some(size) if size < data.len()) {
        return Err(corrupt("payload longer than image"));
    }

    Ok(CachedImage {
        data,
        image_size,
        version,
    })
}

impl ImageCache for DiskImageCache {
    fn lookup(&self, id: ImageId) -> BoxFuture<'_, Result<Option<CachedImage>, CacheError>> {
        let path = self.entry_path(id);
        Box::pin(async move {
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.counters.record_miss();
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            match decode_entry(id, Bytes::from(raw)) {
                Ok(image) => {
                    self.counters.record_hit(image.data.len());
                    Ok(Some(image))
                }
                Err(e) => {
                    self.counters.record_corrupt();
                    warn!(%id, path = %path.display(), error = %e, "corrupt disk cache entry");
                    Err(e)
                }
            }
        })
    }

    fn store(&self, id: ImageId, image: CachedImage) -> BoxFuture<'_, Result<(), CacheError>> {
        let path = self.entry_path(id);
        let temp = self.temp_path(&path);
        Box::pin(async move {
            let encoded = encode_entry(&image);
            let result = async {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&temp, &encoded).await?;
                tokio::fs::rename(&temp, &path).await
            }
            .await;

            match result {
                Ok(()) => {
                    self.counters.record_write(image.data.len());
                    debug!(%id, bytes = image.data.len(), "disk cache entry written");
                    Ok(())
                }
                Err(e) => {
                    self.counters.record_write_failure();
                    let _ = tokio::fs::remove_file(&temp).await;
                    Err(e.into())
                }
            }
        })
    }

    fn remove(&self, id: ImageId) -> BoxFuture<'_, Result<bool, CacheError>> {
        let path = self.entry_path(id);
        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    self.counters.record_removal();
                    Ok(true)
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot(
            self.entries.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }

    fn name(&self) -> &str {
        "disk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(len: usize, image_size: Option<usize>) -> CachedImage {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        CachedImage::new(Bytes::from(data), image_size)
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(dir.path()).unwrap();
        let id = ImageId::from_u128(0xabcdef);

        cache.store(id, sample(2048, Some(4096))).await.unwrap();
        let hit = cache.lookup(id).await.unwrap().unwrap();

        assert_eq!(hit.data.len(), 2048);
        assert_eq!(hit.image_size, Some(4096));
        assert!(hit.verify());
        assert!(cache.has_newest(id, hit.version).await);
    }

    #[tokio::test]
    async fn test_unknown_image_size_survives() {
        let dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(dir.path()).unwrap();
        let id = ImageId::from_u128(2);

        cache.store(id, sample(10, None)).await.unwrap();
        assert_eq!(cache.lookup(id).await.unwrap().unwrap().image_size, None);
    }

    #[tokio::test]
    async fn test_missing_entry_is_miss() {
        let dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(dir.path()).unwrap();

        assert!(cache.lookup(ImageId::from_u128(3)).await.unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_flipped_byte_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(dir.path()).unwrap();
        let id = ImageId::from_u128(4);
        cache.store(id, sample(100, Some(100))).await.unwrap();

        let path = cache.entry_path(id);
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let err = cache.lookup(id).await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
        assert_eq!(cache.stats().corrupt_entries, 1);
    }

    #[tokio::test]
    async fn test_truncated_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(dir.path()).unwrap();
        let id = ImageId::from_u128(5);
        cache.store(id, sample(100, None)).await.unwrap();

        let path = cache.entry_path(id);
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..50]).unwrap();

        assert!(matches!(
            cache.lookup(id).await,
            Err(CacheError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(dir.path().join("cache")).unwrap();

        for n in 0..4u128 {
            cache
                .store(ImageId::from_u128(n << 120 | 1), sample(10, None))
                .await
                .unwrap();
        }
        assert_eq!(cache.usage().await.unwrap().entries, 4);

        assert!(cache.remove(ImageId::from_u128(1)).await.unwrap());
        assert!(!cache.remove(ImageId::from_u128(1)).await.unwrap());
        assert_eq!(cache.clear().await.unwrap(), 3);
        assert_eq!(cache.usage().await.unwrap(), DiskUsage::default());
    }

    #[test]
    fn test_entry_path_fan_out() {
        let dir = TempDir::new().unwrap();
        let cache = DiskImageCache::open(dir.path()).unwrap();
        let id: ImageId = "ab000000-0000-0000-0000-000000000001".parse().unwrap();

        let path = cache.entry_path(id);
        assert!(path.starts_with(dir.path().join("ab")));
        assert_eq!(path.extension().unwrap(), "tex");
    }
}
