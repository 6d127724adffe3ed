//! In-memory image cache with LRU eviction.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::stats::CacheCounters;
use crate::cache::{CacheError, CacheStats, CachedImage, ImageCache};
use crate::id::ImageId;
use crate::BoxFuture;

/// Entry in the memory cache.
#[derive(Debug, Clone)]
struct CacheEntry {
    image: CachedImage,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(image: CachedImage) -> Self {
        Self {
            image,
            last_accessed: Instant::now(),
        }
    }

    fn size(&self) -> usize {
        self.image.data.len()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<ImageId, CacheEntry>,
    size_bytes: usize,
}

/// Size-bounded in-memory cache.
///
/// When an insert would exceed the byte limit, the least recently accessed
/// entries are evicted first. An entry larger than the whole limit is not
/// stored at all.
pub struct MemoryImageCache {
    state: Mutex<MemoryState>,
    max_size_bytes: usize,
    counters: CacheCounters,
}

impl MemoryImageCache {
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_size_bytes,
            counters: CacheCounters::default(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.state.lock().entries.contains_key(&id)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.size_bytes = 0;
    }

    fn get(&self, id: ImageId) -> Option<CachedImage> {
        let mut state = self.state.lock();
        let entry = state.entries.get_mut(&id)?;
        entry.last_accessed = Instant::now();
        Some(entry.image.clone())
    }

    fn put(&self, id: ImageId, image: CachedImage) -> bool {
        let incoming = image.data.len();
        if incoming > self.max_size_bytes {
            return false;
        }

        let mut state = self.state.lock();
        if let Some(previous) = state.entries.remove(&id) {
            state.size_bytes -= previous.size();
        }

        if state.size_bytes + incoming > self.max_size_bytes {
            let target = self.max_size_bytes - incoming;
            let evicted = Self::evict_until(&mut state, target);
            self.counters.record_evictions(evicted);
            debug!(evicted, target, "memory cache evicted entries");
        }

        state.entries.insert(id, CacheEntry::new(image));
        state.size_bytes += incoming;
        true
    }

    /// Evict oldest entries until the cache holds at most `target` bytes.
    fn evict_until(state: &mut MemoryState, target: usize) -> usize {
        let mut by_age: Vec<(ImageId, Instant)> = state
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.last_accessed))
            .collect();
        by_age.sort_by_key(|(_, accessed)| *accessed);

        let mut evicted = 0;
        for (id, _) in by_age {
            if state.size_bytes <= target {
                break;
            }
            if let Some(entry) = state.entries.remove(&id) {
                state.size_bytes -= entry.size();
                evicted += 1;
            }
        }
        evicted
    }
}

impl ImageCache for MemoryImageCache {
    fn lookup(&self, id: ImageId) -> BoxFuture<'_, Result<Option<CachedImage>, CacheError>> {
        Box::pin(async move {
            match self.get(id) {
                Some(image) => {
                    self.counters.record_hit(image.data.len());
                    Ok(Some(image))
                }
                None => {
                    self.counters.record_miss();
                    Ok(None)
                }
            }
        })
    }

    fn store(&self, id: ImageId, image: CachedImage) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            let bytes = image.data.len();
            if self.put(id, image) {
                self.counters.record_write(bytes);
            } else {
                self.counters.record_write_failure();
                debug!(%id, bytes, limit = self.max_size_bytes, "image larger than memory cache");
            }
            Ok(())
        })
    }

    fn remove(&self, id: ImageId) -> BoxFuture<'_, Result<bool, CacheError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            match state.entries.remove(&id) {
                Some(entry) => {
                    state.size_bytes -= entry.size();
                    self.counters.record_removal();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        self.counters
            .snapshot(state.entries.len() as u64, state.size_bytes as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
