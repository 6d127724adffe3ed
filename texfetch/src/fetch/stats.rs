//! Pipeline counters and per-texture download records.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::fetch::TransportKind;
use crate::id::ImageId;

/// Point-in-time pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStatsSnapshot {
    pub requests_created: u64,
    pub requests_merged: u64,
    pub requests_deleted: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub packets_received: u64,
    pub bad_packets: u64,
    pub orphan_packets: u64,
    pub http_requests: u64,
    pub http_failures: u64,
    pub http_bytes: u64,
    pub datagram_bytes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub corrupt_cache_entries: u64,
    pub decode_failures: u64,
    pub throttled_passes: u64,
}

macro_rules! counters {
    ($($name:ident),* $(,)?) => {
        #[derive(Debug, Default)]
        pub(crate) struct FetchStats {
            $($name: AtomicU64,)*
        }

        impl FetchStats {
            pub fn snapshot(&self) -> FetchStatsSnapshot {
                FetchStatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters!(
    requests_created,
    requests_merged,
    requests_deleted,
    requests_completed,
    requests_failed,
    packets_received,
    bad_packets,
    orphan_packets,
    http_requests,
    http_failures,
    http_bytes,
    datagram_bytes,
    cache_hits,
    cache_misses,
    corrupt_cache_entries,
    decode_failures,
    throttled_passes,
);

/// Which counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    Created,
    Merged,
    Deleted,
    Completed,
    Failed,
    PacketReceived,
    BadPacket,
    OrphanPacket,
    HttpRequest,
    HttpFailure,
    CacheHit,
    CacheMiss,
    CorruptCacheEntry,
    DecodeFailure,
    ThrottledPass,
}

impl FetchStats {
    pub fn bump(&self, counter: Counter) {
        let slot = match counter {
            Counter::Created => &self.requests_created,
            Counter::Merged => &self.requests_merged,
            Counter::Deleted => &self.requests_deleted,
            Counter::Completed => &self.requests_completed,
            Counter::Failed => &self.requests_failed,
            Counter::PacketReceived => &self.packets_received,
            Counter::BadPacket => &self.bad_packets,
            Counter::OrphanPacket => &self.orphan_packets,
            Counter::HttpRequest => &self.http_requests,
            Counter::HttpFailure => &self.http_failures,
            Counter::CacheHit => &self.cache_hits,
            Counter::CacheMiss => &self.cache_misses,
            Counter::CorruptCacheEntry => &self.corrupt_cache_entries,
            Counter::DecodeFailure => &self.decode_failures,
            Counter::ThrottledPass => &self.throttled_passes,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_http_bytes(&self, bytes: usize) {
        self.http_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_datagram_bytes(&self, bytes: usize) {
        self.datagram_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// One completed network download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub id: ImageId,
    pub source: TransportKind,
    pub bytes: usize,
    pub requested_at: Instant,
    pub completed_at: Instant,
}

impl DownloadRecord {
    pub fn duration(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.requested_at)
    }
}

/// Ring of the most recent download records.
#[derive(Debug)]
pub(crate) struct DownloadLog {
    capacity: usize,
    records: Mutex<VecDeque<DownloadRecord>>,
}

impl DownloadLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, record: DownloadRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Latest record for `id`.
    pub fn get(&self, id: ImageId) -> Option<DownloadRecord> {
        self.records.lock().iter().rev().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Bytes per second across every kept record.
    pub fn average_rate(&self) -> f64 {
        let records = self.records.lock();
        let (bytes, secs) = records.iter().fold((0usize, 0f64), |(b, s), r| {
            (b + r.bytes, s + r.duration().as_secs_f64())
        });
        if secs > 0.0 {
            bytes as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u128, bytes: usize, millis: u64) -> DownloadRecord {
        let requested_at = Instant::now();
        DownloadRecord {
            id: ImageId::from_u128(n),
            source: TransportKind::Http,
            bytes,
            requested_at,
            completed_at: requested_at + Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_bump_and_snapshot() {
        let stats = FetchStats::default();
        stats.bump(Counter::Created);
        stats.bump(Counter::Created);
        stats.bump(Counter::BadPacket);
        stats.add_http_bytes(128);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests_created, 2);
        assert_eq!(snapshot.bad_packets, 1);
        assert_eq!(snapshot.http_bytes, 128);
        assert_eq!(snapshot.orphan_packets, 0);
    }

    #[test]
    fn test_download_log_capacity() {
        let log = DownloadLog::new(2);
        log.push(record(1, 10, 10));
        log.push(record(2, 10, 10));
        log.push(record(3, 10, 10));

        assert_eq!(log.len(), 2);
        assert!(log.get(ImageId::from_u128(1)).is_none());
        assert!(log.get(ImageId::from_u128(3)).is_some());
    }

    #[test]
    fn test_average_rate() {
        let log = DownloadLog::new(8);
        log.push(record(1, 1000, 500));
        log.push(record(2, 1000, 500));
        assert!((log.average_rate() - 2000.0).abs() < 1e-6);
    }
}
