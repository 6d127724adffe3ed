//! State shared by the facade, every worker task and spawned HTTP requests.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::cache::ImageCache;
use crate::decode::ImageDecoder;
use crate::fetch::bandwidth::BandwidthMeter;
use crate::fetch::handle::{StateChanged, WorkerHandle};
use crate::fetch::queues::TransportQueues;
use crate::fetch::slots::PrioritySlots;
use crate::fetch::stats::{DownloadLog, FetchStats};
use crate::fetch::{FetchConfig, FetchState, TransportKind};
use crate::http::HttpClient;
use crate::id::ImageId;

/// Identity → worker. The single source of truth for what is being fetched.
pub(crate) type RequestTable = DashMap<ImageId, Arc<WorkerHandle>>;

pub(crate) struct FetchContext {
    pub config: FetchConfig,
    pub requests: RequestTable,
    pub queues: Mutex<TransportQueues>,
    pub cache: Arc<dyn ImageCache>,
    pub decoder: Arc<dyn ImageDecoder>,
    pub http: Arc<dyn HttpClient>,
    pub http_slots: PrioritySlots,
    pub decode_slots: PrioritySlots,
    pub stats: FetchStats,
    pub bandwidth: Mutex<BandwidthMeter>,
    pub downloads: DownloadLog,
    events: mpsc::UnboundedSender<StateChanged>,
}

impl FetchContext {
    pub fn new(
        config: FetchConfig,
        cache: Arc<dyn ImageCache>,
        decoder: Arc<dyn ImageDecoder>,
        http: Arc<dyn HttpClient>,
        events: mpsc::UnboundedSender<StateChanged>,
    ) -> Self {
        Self {
            http_slots: PrioritySlots::new(config.max_http_concurrent, "http"),
            decode_slots: PrioritySlots::new(config.max_decode_concurrent, "decode"),
            downloads: DownloadLog::new(config.download_log_capacity),
            config,
            requests: RequestTable::new(),
            queues: Mutex::new(TransportQueues::default()),
            cache,
            decoder,
            http,
            stats: FetchStats::default(),
            bandwidth: Mutex::new(BandwidthMeter::default()),
            events,
        }
    }

    /// Look up a live worker by identity.
    pub fn worker(&self, id: ImageId) -> Option<Arc<WorkerHandle>> {
        self.requests.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Account for bytes arriving from the network.
    pub fn record_inbound(&self, bytes: usize, kind: TransportKind) {
        self.bandwidth.lock().record(bytes, Instant::now());
        match kind {
            TransportKind::Http => self.stats.add_http_bytes(bytes),
            TransportKind::Datagram => self.stats.add_datagram_bytes(bytes),
            TransportKind::Cache => {}
        }
    }

    pub fn notify(&self, id: ImageId, state: FetchState) {
        // The receiver only goes away during shutdown.
        let _ = self.events.send(StateChanged { id, state });
    }
}
