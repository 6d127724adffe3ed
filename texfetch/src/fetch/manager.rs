//! Fetch manager facade.
//!
//! The only type the render loop talks to. It owns the worker runtime, the
//! request table and the transport queues, and it is the sole producer of
//! outbound datagram messages.
//!
//! ```text
//!  render thread                     texfetch-worker runtime
//!  ─────────────                     ───────────────────────
//!  create_request ──► table + pending
//!  update() ──────► spawn pending ─────────► Worker::run ──► cache / HTTP / decode
//!            ├────► drain state changes ◄───── notify
//!            ├────► cancel queue ──► DatagramTransport::cancel_images
//!            └────► network queue ─► DatagramTransport::request_images
//!  receive_image_* ─► worker mailbox
//!  get_request_finished ◄── result slot
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheStats, ImageCache, NullImageCache};
use crate::decode::{ImageCodec, ImageCrateDecoder, ImageDecoder};
use crate::fetch::context::FetchContext;
use crate::fetch::handle::{StateChanged, WorkerControl, WorkerEvent, WorkerHandle};
use crate::fetch::stats::{Counter, DownloadRecord, FetchStatsSnapshot};
use crate::fetch::worker::Worker;
use crate::fetch::{
    FetchConfig, FetchError, FetchOutcome, FetchRequest, FetchState, FetchStateInfo,
    TransportKind,
};
use crate::http::{HttpClient, HttpClientConfig, ReqwestHttpClient};
use crate::id::{Host, ImageId};
use crate::transport::{DatagramTransport, ImageRequest, NullTransport};

/// Name given to the worker runtime's threads.
pub const WORKER_THREAD_NAME: &str = "texfetch-worker";

/// What one `update` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Worker state transitions observed.
    pub state_changes: usize,
    /// Workers started.
    pub spawned: usize,
    /// Image requests handed to the datagram transport.
    pub requests_sent: usize,
    /// Image cancels handed to the datagram transport.
    pub cancels_sent: usize,
    /// New datagram requests were held back by the bandwidth ceiling.
    pub throttled: bool,
    /// The pass stopped early because the budget ran out.
    pub budget_exhausted: bool,
}

impl UpdateReport {
    /// True if any worker changed state or any work was dispatched.
    pub fn did_work(&self) -> bool {
        self.state_changes > 0
            || self.spawned > 0
            || self.requests_sent > 0
            || self.cancels_sent > 0
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Wires collaborators into a [`FetchManager`].
///
/// Anything not supplied falls back to a default: no cache, the `image`
/// crate decoder, a reqwest client and no datagram transport.
pub struct FetchManagerBuilder {
    config: FetchConfig,
    cache: Option<Arc<dyn ImageCache>>,
    decoder: Option<Arc<dyn ImageDecoder>>,
    http: Option<Arc<dyn HttpClient>>,
    transport: Option<Arc<dyn DatagramTransport>>,
}

impl FetchManagerBuilder {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            cache: None,
            decoder: None,
            http: None,
            transport: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn DatagramTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Start the worker runtime and return the manager.
    pub fn build(self) -> Result<FetchManager, FetchError> {
        let config = self.config;
        if config.images_per_message == 0 || config.max_requests_per_pass == 0 {
            return Err(FetchError::Config(
                "images_per_message and max_requests_per_pass must be positive".into(),
            ));
        }

        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => {
                let http_config = HttpClientConfig::default().with_timeout(config.http_timeout);
                Arc::new(ReqwestHttpClient::new(&http_config)?)
            }
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(NullImageCache) as Arc<dyn ImageCache>);
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(ImageCrateDecoder::new()) as Arc<dyn ImageDecoder>);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(NullTransport) as Arc<dyn DatagramTransport>);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()
            .map_err(FetchError::Runtime)?;

        info!(
            workers = config.worker_threads,
            http_slots = config.max_http_concurrent,
            decode_slots = config.max_decode_concurrent,
            cache = cache.name(),
            decoder = decoder.name(),
            "fetch manager started"
        );

        let bandwidth = sanitize_bandwidth(config.bandwidth);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(FetchContext::new(config, cache, decoder, http, events_tx));

        Ok(FetchManager {
            rt_handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            ctx,
            transport,
            events: Mutex::new(events_rx),
            pending: Mutex::new(Vec::new()),
            root: CancellationToken::new(),
            bandwidth_ceiling: AtomicU32::new(bandwidth.to_bits()),
        })
    }
}

fn sanitize_bandwidth(bytes_per_sec: f32) -> f32 {
    if bytes_per_sec.is_finite() && bytes_per_sec >= 0.0 {
        bytes_per_sec
    } else {
        warn!(bytes_per_sec, "invalid bandwidth ceiling, using unlimited");
        0.0
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Asynchronous image fetch pipeline.
///
/// Construct one per simulator connection and call [`update`](Self::update)
/// once per frame. Every method is safe to call from any thread; none of them
/// blocks on I/O.
pub struct FetchManager {
    ctx: Arc<FetchContext>,
    transport: Arc<dyn DatagramTransport>,
    events: Mutex<mpsc::UnboundedReceiver<StateChanged>>,
    /// Registered but not yet started.
    pending: Mutex<Vec<ImageId>>,
    runtime: Mutex<Option<Runtime>>,
    rt_handle: Handle,
    root: CancellationToken,
    bandwidth_ceiling: AtomicU32,
}

impl FetchManager {
    pub fn builder(config: FetchConfig) -> FetchManagerBuilder {
        FetchManagerBuilder::new(config)
    }

    pub fn config(&self) -> &FetchConfig {
        &self.ctx.config
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Register interest in an image, or refine an existing request.
    ///
    /// Returns false only for a structurally invalid request or after
    /// shutdown. A live identity never gets a second worker; the request is
    /// merged into the existing one instead.
    pub fn create_request(&self, request: FetchRequest) -> bool {
        if let Err(e) = request.validate() {
            warn!(id = %request.id, error = %e, "rejected fetch request");
            return false;
        }
        if self.root.is_cancelled() {
            return false;
        }

        let id = request.id;
        match self.ctx.requests.entry(id) {
            Entry::Occupied(entry) => {
                let handle = entry.get();
                let refine = {
                    let mut control = handle.control.lock();
                    let refine = control.request.merge(&request);
                    if refine {
                        control.refine_pending = true;
                    }
                    refine
                };
                if refine {
                    handle.post(WorkerEvent::Refine);
                }
                self.ctx.stats.bump(Counter::Merged);
                trace!(%id, refine, "merged fetch request");
            }
            Entry::Vacant(entry) => {
                let priority = request.priority;
                entry.insert(WorkerHandle::new(request, self.root.child_token()));
                self.ctx.stats.bump(Counter::Created);
                debug!(%id, priority, "fetch request created");
                self.pending.lock().push(id);
            }
        }
        true
    }

    /// Forget an image. With `cancel`, a host streaming it is told to stop.
    ///
    /// Unknown identities are ignored.
    pub fn delete_request(&self, id: ImageId, cancel: bool) {
        let Some((_, handle)) = self.ctx.requests.remove(&id) else {
            trace!(%id, "delete of unknown request ignored");
            return;
        };

        let bound_host = {
            let mut control = handle.control.lock();
            control.state = FetchState::Cancelled;
            control.result = None;
            control.refine_pending = false;
            control.transport = None;
            control.datagram.host.take()
        };
        handle.cancel.cancel();

        {
            let mut queues = self.ctx.queues.lock();
            queues.dequeue(id);
            if let (true, Some(host)) = (cancel, bound_host) {
                queues.request_cancel(host, id);
            }
        }

        self.ctx.stats.bump(Counter::Deleted);
        debug!(%id, cancel, host = ?bound_host, "fetch request deleted");
    }

    /// Take the finished result for `id`, if one is waiting.
    ///
    /// A worker parked in a terminal state with nothing more to do is retired
    /// when its result is taken.
    pub fn get_request_finished(&self, id: ImageId) -> Option<FetchOutcome> {
        let handle = self.ctx.worker(id)?;
        let (outcome, retire) = {
            let mut control = handle.control.lock();
            let outcome = control.result.take()?;
            let retire = control.state.is_terminal() && !control.refine_pending;
            (outcome, retire)
        };

        if retire {
            let retired = self
                .ctx
                .requests
                .remove_if(&id, |_, live| {
                    Arc::ptr_eq(live, &handle) && !live.control.lock().refine_pending
                })
                .is_some();
            if retired {
                handle.cancel.cancel();
                // A partial stream was enough; the host is still sending.
                let bound_host = handle.control.lock().datagram.host.take();
                if let Some(host) = bound_host {
                    let mut queues = self.ctx.queues.lock();
                    queues.dequeue(id);
                    queues.request_cancel(host, id);
                }
                trace!(%id, host = ?bound_host, "worker retired");
            }
        }
        Some(outcome)
    }

    /// Change a live request's priority. False if `id` is unknown.
    pub fn update_request_priority(&self, id: ImageId, priority: f32) -> bool {
        if !priority.is_finite() {
            return false;
        }
        match self.ctx.worker(id) {
            Some(handle) => {
                handle.control.lock().request.priority = priority;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Datagram callbacks
    // =========================================================================

    /// First datagram of an image stream.
    ///
    /// An identity nobody asked for gets a worker bound to `host`, since a
    /// simulator may push images unprompted.
    pub fn receive_image_header(
        &self,
        host: Host,
        id: ImageId,
        codec: ImageCodec,
        packet_count: u16,
        total_bytes: usize,
        data: Bytes,
    ) -> bool {
        self.ctx.stats.bump(Counter::PacketReceived);
        self.ctx.record_inbound(data.len(), TransportKind::Datagram);

        if id.is_nil() || self.root.is_cancelled() {
            self.ctx.stats.bump(Counter::BadPacket);
            return false;
        }

        let handle = match self.ctx.requests.entry(id) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let handle = self.materialize(id, host);
                entry.insert(Arc::clone(&handle));
                self.pending.lock().push(id);
                handle
            }
        };

        handle.post(WorkerEvent::Header {
            host,
            codec,
            packet_count,
            total_bytes,
            data,
        })
    }

    /// Later datagram of an image stream. False for unknown identities.
    pub fn receive_image_packet(&self, host: Host, id: ImageId, packet: u16, data: Bytes) -> bool {
        self.ctx.stats.bump(Counter::PacketReceived);
        self.ctx.record_inbound(data.len(), TransportKind::Datagram);

        match self.ctx.worker(id) {
            Some(handle) => handle.post(WorkerEvent::Packet { host, packet, data }),
            None => {
                self.ctx.stats.bump(Counter::OrphanPacket);
                trace!(%id, %host, packet, "packet for unknown image dropped");
                false
            }
        }
    }

    fn materialize(&self, id: ImageId, host: Host) -> Arc<WorkerHandle> {
        let priority = self.ctx.config.pushed_image_priority;
        let request = FetchRequest::new(id)
            .with_host(host)
            .with_priority(priority)
            .with_http(false);
        let handle = WorkerHandle::new(request, self.root.child_token());
        {
            let mut control = handle.control.lock();
            control.datagram.host = Some(host);
            control.datagram.sent_at = Some(Instant::now());
            control.datagram.sent_priority = priority;
            control.datagram.sent_discard = Some(0);
        }
        self.ctx.stats.bump(Counter::Created);
        debug!(%id, %host, "worker created for pushed image");
        handle
    }

    // =========================================================================
    // Per-frame pass
    // =========================================================================

    /// Run one scheduler pass, stopping once `budget` has elapsed.
    ///
    /// Each stage still starts at least one worker and sends at least one
    /// request message, so a zero budget makes progress too.
    pub fn update(&self, budget: Duration) -> UpdateReport {
        let deadline = Instant::now() + budget;
        let mut report = UpdateReport {
            state_changes: self.drain_state_changes(deadline),
            ..UpdateReport::default()
        };

        // Every stage makes some progress even on an exhausted budget.
        report.spawned = self.spawn_pending(deadline);
        report.cancels_sent = self.send_cancels();
        let (sent, throttled) = self.send_request_batches(deadline);
        report.requests_sent = sent;
        report.throttled = throttled;

        report.budget_exhausted = Instant::now() >= deadline;
        if report.did_work() {
            trace!(
                changes = report.state_changes,
                spawned = report.spawned,
                sent = report.requests_sent,
                cancels = report.cancels_sent,
                "update pass"
            );
        }
        report
    }

    fn drain_state_changes(&self, deadline: Instant) -> usize {
        let mut events = self.events.lock();
        let mut changes = 0;
        while let Ok(change) = events.try_recv() {
            changes += 1;
            trace!(id = %change.id, state = %change.state, "state change");
            if Instant::now() >= deadline {
                break;
            }
        }
        changes
    }

    /// Start registered workers, highest priority first.
    fn spawn_pending(&self, deadline: Instant) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return 0;
        }

        let mut ranked: Vec<(f32, Arc<WorkerHandle>)> = pending
            .into_iter()
            .filter_map(|id| self.ctx.worker(id))
            .map(|handle| {
                let priority = handle.control.lock().request.priority;
                (priority, handle)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut spawned = 0;
        let mut deferred = Vec::new();
        for (_, handle) in ranked {
            if spawned > 0 && Instant::now() >= deadline {
                deferred.push(handle.id);
                continue;
            }
            let Some(inbox) = handle.take_inbox() else {
                continue;
            };
            let worker = Worker::new(Arc::clone(&self.ctx), Arc::clone(&handle), inbox);
            self.rt_handle.spawn(worker.run());
            spawned += 1;
        }

        if !deferred.is_empty() {
            trace!(deferred = deferred.len(), "worker start deferred to next pass");
            self.pending.lock().extend(deferred);
        }
        spawned
    }

    fn send_cancels(&self) -> usize {
        let cancels = self.ctx.queues.lock().take_cancels();
        let mut sent = 0;
        for (host, ids) in cancels {
            let ids: Vec<ImageId> = ids.into_iter().collect();
            for chunk in ids.chunks(self.ctx.config.images_per_message.max(1)) {
                self.transport.cancel_images(host, chunk);
                sent += chunk.len();
            }
            debug!(%host, count = ids.len(), "sent image cancels");
        }
        sent
    }

    /// Batch due datagram requests per host. Returns (sent, throttled).
    ///
    /// At least one message goes out per pass; later messages stop at
    /// `deadline` and stay due for the next pass.
    fn send_request_batches(&self, deadline: Instant) -> (usize, bool) {
        let ceiling = self.get_texture_bandwidth();
        if ceiling > 0.0 {
            let rate = self.ctx.bandwidth.lock().rate(Instant::now());
            if rate >= f64::from(ceiling) {
                self.ctx.stats.bump(Counter::ThrottledPass);
                trace!(rate, ceiling, "datagram requests throttled");
                return (0, true);
            }
        }

        let ids = self.ctx.queues.lock().network_ids();
        if ids.is_empty() {
            return (0, false);
        }

        let now = Instant::now();
        let mut due: Vec<(Host, ImageRequest)> = ids
            .into_iter()
            .filter_map(|id| {
                let handle = self.ctx.worker(id)?;
                let control = handle.control.lock();
                if !self.request_due(&control, now) {
                    return None;
                }
                let host = control.datagram.host.or(control.request.host)?;
                Some((
                    host,
                    ImageRequest {
                        id,
                        discard: control.request.discard,
                        priority: control.request.priority,
                        packet: control.datagram.next_packet,
                    },
                ))
            })
            .collect();
        due.sort_by(|a, b| b.1.priority.total_cmp(&a.1.priority));
        due.truncate(self.ctx.config.max_requests_per_pass);

        let mut per_host: HashMap<Host, Vec<ImageRequest>> = HashMap::new();
        for (host, request) in due {
            per_host.entry(host).or_default().push(request);
        }

        let mut sent = 0;
        'hosts: for (host, requests) in per_host {
            let mut host_sent = 0;
            for batch in requests.chunks(self.ctx.config.images_per_message.max(1)) {
                if sent > 0 && Instant::now() >= deadline {
                    trace!(%host, "request batches deferred to next pass");
                    if host_sent > 0 {
                        debug!(%host, count = host_sent, "sent image requests");
                    }
                    break 'hosts;
                }
                self.transport.request_images(host, batch);
                for request in batch {
                    self.mark_sent(host, request, now);
                }
                sent += batch.len();
                host_sent += batch.len();
            }
            debug!(%host, count = host_sent, "sent image requests");
        }
        (sent, false)
    }

    fn request_due(&self, control: &WorkerControl, now: Instant) -> bool {
        if control.state != FetchState::WaitingOnNetwork
            || control.transport != Some(TransportKind::Datagram)
        {
            return false;
        }
        let binding = &control.datagram;
        match binding.sent_at {
            None => true,
            Some(sent_at) => {
                binding.sent_discard != Some(control.request.discard)
                    || (control.request.priority - binding.sent_priority).abs()
                        > self.ctx.config.priority_resend_delta
                    || now.saturating_duration_since(sent_at)
                        >= self.ctx.config.request_resend_interval
            }
        }
    }

    fn mark_sent(&self, host: Host, request: &ImageRequest, now: Instant) {
        if let Some(handle) = self.ctx.worker(request.id) {
            let mut control = handle.control.lock();
            control.datagram.host = Some(host);
            control.datagram.sent_at = Some(now);
            control.datagram.sent_priority = request.priority;
            control.datagram.sent_discard = Some(request.discard);
            control.request_sent_at = Some(now);
        }
    }

    // =========================================================================
    // Bandwidth
    // =========================================================================

    /// Set the inbound ceiling in bytes per second. 0 disables throttling.
    pub fn set_texture_bandwidth(&self, bytes_per_sec: f32) {
        let ceiling = sanitize_bandwidth(bytes_per_sec);
        self.bandwidth_ceiling
            .store(ceiling.to_bits(), Ordering::Relaxed);
        debug!(ceiling, "texture bandwidth ceiling set");
    }

    pub fn get_texture_bandwidth(&self) -> f32 {
        f32::from_bits(self.bandwidth_ceiling.load(Ordering::Relaxed))
    }

    /// Inbound bytes per second over the last window.
    pub fn measured_bandwidth(&self) -> f64 {
        self.ctx.bandwidth.lock().rate(Instant::now())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn fetch_state(&self, id: ImageId) -> Option<FetchStateInfo> {
        let handle = self.ctx.worker(id)?;
        let control = handle.control.lock();
        Some(FetchStateInfo::capture(id, &control, Instant::now()))
    }

    pub fn num_requests(&self) -> usize {
        self.ctx.requests.len()
    }

    /// Identities waiting on HTTP.
    pub fn num_http_requests(&self) -> usize {
        self.ctx.queues.lock().http_len()
    }

    /// Identities waiting on the datagram transport.
    pub fn num_network_requests(&self) -> usize {
        self.ctx.queues.lock().network_len()
    }

    pub fn num_pending_cancels(&self) -> usize {
        self.ctx.queues.lock().cancel_len()
    }

    pub fn is_from_local_cache(&self, id: ImageId) -> bool {
        self.ctx
            .worker(id)
            .is_some_and(|handle| handle.control.lock().from_local_cache)
    }

    pub fn stats(&self) -> FetchStatsSnapshot {
        self.ctx.stats.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.ctx.cache.stats()
    }

    /// Most recent network download of `id`.
    pub fn download_record(&self, id: ImageId) -> Option<DownloadRecord> {
        self.ctx.downloads.get(id)
    }

    /// Average bytes per second across recorded downloads.
    pub fn average_download_rate(&self) -> f64 {
        self.ctx.downloads.average_rate()
    }

    /// Log every worker and the aggregate counters at INFO.
    pub fn dump(&self) {
        let now = Instant::now();
        info!(
            requests = self.num_requests(),
            http = self.num_http_requests(),
            network = self.num_network_requests(),
            cancels = self.num_pending_cancels(),
            bandwidth = self.measured_bandwidth(),
            "fetch manager"
        );
        for slots in [&self.ctx.http_slots, &self.ctx.decode_slots] {
            info!(
                slots = slots.label(),
                in_use = slots.in_use(),
                capacity = slots.capacity(),
                waiting = slots.waiting(),
                peak = slots.peak(),
                "  slots"
            );
        }
        for entry in self.ctx.requests.iter() {
            let info = FetchStateInfo::capture(*entry.key(), &entry.value().control.lock(), now);
            info!("  {}", info.summary());
        }

        let stats = self.stats();
        info!(
            created = stats.requests_created,
            merged = stats.requests_merged,
            deleted = stats.requests_deleted,
            completed = stats.requests_completed,
            failed = stats.requests_failed,
            packets = stats.packets_received,
            bad_packets = stats.bad_packets,
            orphan_packets = stats.orphan_packets,
            http_requests = stats.http_requests,
            http_failures = stats.http_failures,
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            downloads = self.ctx.downloads.len(),
            "fetch counters"
        );

        let cache = self.cache_stats();
        info!(
            backend = self.ctx.cache.name(),
            entries = cache.entry_count,
            bytes = cache.size_bytes,
            hit_rate = format!("{:.1}%", cache.hit_rate() * 100.0),
            evictions = cache.evictions,
            "cache"
        );
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Stop every worker and the runtime. Later calls do nothing.
    pub fn shutdown(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        info!(requests = self.ctx.requests.len(), "shutting down fetch manager");

        self.root.cancel();
        self.ctx.requests.clear();
        self.ctx.queues.lock().clear();
        self.pending.lock().clear();

        // Blocking shutdown is not allowed from inside another runtime.
        if Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(self.ctx.config.shutdown_timeout);
        }
    }
}

impl Drop for FetchManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> FetchManager {
        FetchManager::builder(FetchConfig::default().with_worker_threads(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_invalid_request_rejected() {
        let manager = manager();
        assert!(!manager.create_request(FetchRequest::new(ImageId::NIL)));
        assert!(!manager.create_request(FetchRequest::new(ImageId::from_u128(1)).with_discard(9)));
        assert_eq!(manager.num_requests(), 0);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = FetchConfig::default().with_worker_threads(1);
        config.images_per_message = 0;
        let result = FetchManager::builder(config).build();
        assert!(matches!(result, Err(FetchError::Config(_))));
    }

    #[test]
    fn test_second_create_merges() {
        let manager = manager();
        let id = ImageId::from_u128(2);
        assert!(manager.create_request(FetchRequest::new(id).with_priority(1.0)));
        assert!(manager.create_request(FetchRequest::new(id).with_priority(9.0)));

        assert_eq!(manager.num_requests(), 1);
        assert_eq!(manager.fetch_state(id).unwrap().requested_priority, 9.0);
        let stats = manager.stats();
        assert_eq!(stats.requests_created, 1);
        assert_eq!(stats.requests_merged, 1);
    }

    #[test]
    fn test_update_priority_unknown_id() {
        let manager = manager();
        assert!(!manager.update_request_priority(ImageId::from_u128(3), 5.0));

        let id = ImageId::from_u128(4);
        manager.create_request(FetchRequest::new(id));
        assert!(manager.update_request_priority(id, 5.0));
        assert!(!manager.update_request_priority(id, f32::NAN));
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let manager = manager();
        manager.delete_request(ImageId::from_u128(5), true);
        manager.delete_request(ImageId::from_u128(5), false);
        assert_eq!(manager.stats().requests_deleted, 0);
    }

    #[test]
    fn test_bandwidth_ceiling() {
        let manager = manager();
        assert_eq!(manager.get_texture_bandwidth(), 0.0);
        manager.set_texture_bandwidth(250_000.0);
        assert_eq!(manager.get_texture_bandwidth(), 250_000.0);
        manager.set_texture_bandwidth(f32::NAN);
        assert_eq!(manager.get_texture_bandwidth(), 0.0);
    }

    #[test]
    fn test_orphan_packet_counted() {
        let manager = manager();
        let host: Host = "127.0.0.1:13000".parse().unwrap();
        assert!(!manager.receive_image_packet(host, ImageId::from_u128(6), 1, Bytes::from_static(b"x")));
        assert_eq!(manager.stats().orphan_packets, 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let manager = manager();
        manager.create_request(FetchRequest::new(ImageId::from_u128(7)));
        manager.shutdown();
        manager.shutdown();
        assert!(manager.is_shut_down());
        assert_eq!(manager.num_requests(), 0);
        assert!(!manager.create_request(FetchRequest::new(ImageId::from_u128(8))));
    }

    #[test]
    fn test_update_report_did_work() {
        assert!(!UpdateReport::default().did_work());
        let report = UpdateReport {
            spawned: 1,
            ..UpdateReport::default()
        };
        assert!(report.did_work());
    }
}
