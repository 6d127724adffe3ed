//! Per-image fetch state machine.
//!
//! Each worker is a single tokio task. It owns the image's byte buffer and
//! is the only code that ever advances its state, so per-image transitions
//! are strictly sequential without any lock held across a step. The facade
//! reaches it through [`WorkerHandle`]: shared fields under a short lock,
//! everything else as messages in the mailbox.
//!
//! ```text
//!                 ┌──────────────── mailbox ────────────────┐
//!   HTTP task ───►│ HttpComplete{attempt}                   │
//!   facade ──────►│ Header / Packet / Refine                │──► Worker::drive()
//!                 └─────────────────────────────────────────┘        │
//!                                                                    ▼
//!                                           WorkerControl (state, result, progress)
//! ```
//!
//! Source order is cache, then HTTP (when allowed and a URL is known), then
//! the datagram host, then give up. A coarse cache hit is kept as a prefix
//! and continued over the network rather than accepted as final.

use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant as Deadline};
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheError, CachedImage};
use crate::decode::{DecodedImage, ImageCodec, MAX_DISCARD_LEVEL};
use crate::fetch::context::FetchContext;
use crate::fetch::handle::{WorkerEvent, WorkerHandle};
use crate::fetch::stats::{Counter, DownloadRecord};
use crate::fetch::{FetchFailure, FetchOutcome, FetchState, Transport, TransportKind};
use crate::http::{ByteRange, HttpError, HttpRequest, HttpResponse};
use crate::id::{Host, ImageId};
use crate::transport::PacketAssembler;

/// Requested width, height and component count.
type Dims = (u32, u32, u8);

pub(crate) struct Worker {
    id: ImageId,
    handle: Arc<WorkerHandle>,
    ctx: Arc<FetchContext>,
    inbox: mpsc::UnboundedReceiver<WorkerEvent>,

    buffer: BytesMut,
    /// Length of the complete compressed stream, once known.
    image_size: Option<usize>,
    codec: ImageCodec,
    /// Origin of the bytes currently in `buffer`.
    source: Option<TransportKind>,
    transport: Option<Transport>,
    assembler: Option<PacketAssembler>,
    early_packets: Vec<(u16, Bytes)>,
    decoded: Option<DecodedImage>,
    /// Discard level and aux presence of the last delivered image.
    delivered: Option<(u8, bool)>,

    http_attempts: u32,
    datagram_attempts: u32,
    decode_attempts: u32,
    http_sequence: u32,
    http_range: Option<ByteRange>,

    network_started_at: Option<Instant>,
    network_bytes_before: usize,
}

impl Worker {
    pub fn new(
        ctx: Arc<FetchContext>,
        handle: Arc<WorkerHandle>,
        inbox: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> Self {
        Self {
            id: handle.id,
            handle,
            ctx,
            inbox,
            buffer: BytesMut::new(),
            image_size: None,
            codec: ImageCodec::Unknown,
            source: None,
            transport: None,
            assembler: None,
            early_packets: Vec::new(),
            decoded: None,
            delivered: None,
            http_attempts: 0,
            datagram_attempts: 0,
            decode_attempts: 0,
            http_sequence: 0,
            http_range: None,
            network_started_at: None,
            network_bytes_before: 0,
        }
    }

    /// Run until cancelled or the mailbox closes.
    pub async fn run(mut self) {
        let id = self.id;
        let cancel = self.handle.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => trace!(%id, "worker cancelled"),
            _ = self.drive() => trace!(%id, "worker finished"),
        }
        // A step interrupted by cancellation may have left a queue entry.
        let replaced = self
            .ctx
            .worker(id)
            .is_some_and(|live| !Arc::ptr_eq(&live, &self.handle));
        if !replaced {
            self.ctx.queues.lock().dequeue(id);
        }
    }

    async fn drive(&mut self) {
        let mut state = FetchState::Init;
        loop {
            if !self.publish_state(state) {
                return;
            }
            state = match state {
                FetchState::Init => self.start(),
                FetchState::CacheLookup => self.lookup_cache().await,
                FetchState::NetworkRequest => self.request_network().await,
                FetchState::WaitingOnNetwork => self.wait_on_network().await,
                FetchState::Decode => self.decode().await,
                FetchState::WriteCache => self.write_cache().await,
                FetchState::Done | FetchState::Failed => match self.park().await {
                    Some(next) => next,
                    None => return,
                },
                FetchState::Cancelled => return,
            };
        }
    }

    // =========================================================================
    // Shared-state helpers
    // =========================================================================

    /// Record the new state. False if the caller deleted the request.
    fn publish_state(&self, state: FetchState) -> bool {
        {
            let mut control = self.handle.control.lock();
            if control.state == FetchState::Cancelled {
                return false;
            }
            if control.state == state {
                return true;
            }
            control.state = state;
        }
        debug!(id = %self.id, %state, "worker state");
        self.ctx.notify(self.id, state);
        true
    }

    fn desired(&self) -> (u8, bool) {
        let control = self.handle.control.lock();
        (control.request.discard, control.request.needs_aux)
    }

    fn dims(&self) -> Dims {
        let control = self.handle.control.lock();
        let request = &control.request;
        (request.width, request.height, request.components)
    }

    /// Bytes the decoder needs for `discard`, if it can say.
    fn needed_for(&self, dims: Dims, discard: u8) -> Option<usize> {
        self.ctx.decoder.data_size(dims.0, dims.1, dims.2, discard)
    }

    fn wanted_bytes(&self) -> Option<usize> {
        let (desired, _) = self.desired();
        self.needed_for(self.dims(), desired)
    }

    fn stream_complete(&self) -> bool {
        self.image_size
            .is_some_and(|size| self.buffer.len() >= size)
    }

    fn can_decode(&self, dims: Dims, discard: u8) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        if self.stream_complete() {
            return true;
        }
        matches!(self.needed_for(dims, discard), Some(needed) if self.buffer.len() >= needed)
    }

    /// Finest level, no finer than requested, the buffer can satisfy.
    fn decodable_discard(&self) -> Option<u8> {
        let (desired, _) = self.desired();
        let dims = self.dims();
        (desired..=MAX_DISCARD_LEVEL).find(|&discard| self.can_decode(dims, discard))
    }

    fn publish_progress(&self) {
        let held = match &self.assembler {
            Some(assembler) => assembler.contiguous_bytes().max(self.buffer.len()),
            None => self.buffer.len(),
        };
        let needed = self.wanted_bytes().or(self.image_size);
        let mut control = self.handle.control.lock();
        control.bytes_held = held;
        control.bytes_needed = needed;
    }

    fn reset_buffer(&mut self) {
        self.buffer.clear();
        self.image_size = None;
        self.codec = ImageCodec::Unknown;
        self.source = None;
        self.assembler = None;
        self.early_packets.clear();
        self.handle.control.lock().from_local_cache = false;
        self.publish_progress();
    }

    fn record_download(&mut self, source: TransportKind) {
        if let Some(requested_at) = self.network_started_at.take() {
            self.ctx.downloads.push(DownloadRecord {
                id: self.id,
                source,
                bytes: self.buffer.len().saturating_sub(self.network_bytes_before),
                requested_at,
                completed_at: Instant::now(),
            });
        }
    }

    fn mark_network_start(&mut self) {
        if self.network_started_at.is_none() {
            self.network_started_at = Some(Instant::now());
            self.network_bytes_before = self.buffer.len();
        }
    }

    // =========================================================================
    // Init / CacheLookup
    // =========================================================================

    fn start(&mut self) -> FetchState {
        self.handle
            .control
            .lock()
            .fetch_started_at
            .get_or_insert_with(Instant::now);
        FetchState::CacheLookup
    }

    async fn lookup_cache(&mut self) -> FetchState {
        let lookup = timeout(self.ctx.config.cache_timeout, self.ctx.cache.lookup(self.id)).await;

        match lookup {
            Ok(Ok(Some(cached))) if cached.verify() => {
                self.ctx.stats.bump(Counter::CacheHit);
                self.buffer = BytesMut::from(&cached.data[..]);
                self.image_size = cached.image_size;
                self.source = Some(TransportKind::Cache);
                self.handle.control.lock().from_local_cache = true;
                self.publish_progress();

                let (desired, _) = self.desired();
                if self.can_decode(self.dims(), desired) {
                    FetchState::Decode
                } else {
                    debug!(
                        id = %self.id,
                        cached_bytes = self.buffer.len(),
                        desired,
                        "cached data too coarse, fetching finer level"
                    );
                    FetchState::NetworkRequest
                }
            }
            Ok(Ok(Some(_))) => {
                self.invalidate_cache("version tag mismatch").await;
                FetchState::NetworkRequest
            }
            Ok(Ok(None)) => {
                self.ctx.stats.bump(Counter::CacheMiss);
                FetchState::NetworkRequest
            }
            Ok(Err(CacheError::Corrupt { reason, .. })) => {
                self.invalidate_cache(&reason).await;
                FetchState::NetworkRequest
            }
            Ok(Err(e)) => {
                self.ctx.stats.bump(Counter::CacheMiss);
                warn!(id = %self.id, error = %e, "cache lookup failed");
                FetchState::NetworkRequest
            }
            Err(_) => {
                self.ctx.stats.bump(Counter::CacheMiss);
                warn!(id = %self.id, "cache lookup timed out");
                FetchState::NetworkRequest
            }
        }
    }

    async fn invalidate_cache(&mut self, reason: &str) {
        self.ctx.stats.bump(Counter::CorruptCacheEntry);
        warn!(id = %self.id, reason, "invalidating corrupt cache entry");

        match timeout(self.ctx.config.cache_timeout, self.ctx.cache.remove(self.id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(id = %self.id, error = %e, "failed to remove cache entry"),
            Err(_) => warn!(id = %self.id, "cache remove timed out"),
        }
        self.reset_buffer();
    }

    // =========================================================================
    // NetworkRequest
    // =========================================================================

    async fn request_network(&mut self) -> FetchState {
        self.ctx.queues.lock().dequeue(self.id);

        let (url, host) = {
            let control = self.handle.control.lock();
            (
                control.request.http_url().map(str::to_owned),
                control.request.host,
            )
        };
        let max_http = self.ctx.config.max_http_attempts;
        let max_datagram = self.ctx.config.max_datagram_attempts;

        let transport = match (url, host) {
            (Some(url), _) if self.http_attempts < max_http => Transport::Http { url },
            (_, Some(host)) if self.datagram_attempts < max_datagram => Transport::Datagram { host },
            (url, host) => return self.exhausted(url.is_none() && host.is_none()),
        };

        debug!(id = %self.id, transport = %transport.kind(), "requesting from network");
        self.transport = Some(transport.clone());
        self.handle.control.lock().transport = Some(transport.kind());

        match transport {
            Transport::Http { url } => self.start_http(url).await,
            Transport::Datagram { host } => self.start_datagram(host),
        }
    }

    /// Every network source is used up.
    fn exhausted(&mut self, no_source: bool) -> FetchState {
        self.transport = None;

        if let Some(discard) = self.decodable_discard() {
            let coarser_than_delivered = self.delivered.is_some_and(|(done, _)| discard > done);
            if !coarser_than_delivered {
                info!(id = %self.id, discard, "network exhausted, decoding best available data");
                return FetchState::Decode;
            }
        }

        let failure = if no_source && self.http_attempts == 0 && self.datagram_attempts == 0 {
            FetchFailure::NoSource
        } else {
            FetchFailure::SourcesExhausted {
                http_attempts: self.http_attempts,
                datagram_attempts: self.datagram_attempts,
            }
        };
        self.finish(FetchOutcome::Failed(failure))
    }

    async fn start_http(&mut self, url: String) -> FetchState {
        self.ctx.queues.lock().enqueue(self.id, TransportKind::Http);
        let priority = self.handle.control.lock().request.priority;
        let permit = self.ctx.http_slots.acquire(priority).await;

        let offset = self.buffer.len();
        let range = match (offset, self.wanted_bytes()) {
            (0, None) => None,
            (offset, Some(wanted)) if wanted > offset => {
                Some(ByteRange::new(offset as u64, (wanted - offset) as u64))
            }
            (offset, _) => Some(ByteRange::from_offset(offset as u64)),
        };

        self.http_sequence += 1;
        self.http_range = range;
        self.mark_network_start();
        self.handle.control.lock().request_sent_at = Some(Instant::now());
        self.ctx.stats.bump(Counter::HttpRequest);
        trace!(id = %self.id, %url, ?range, attempt = self.http_sequence, "HTTP request issued");

        let request = HttpRequest { url, range };
        let attempt = self.http_sequence;
        let id = self.id;
        let ctx = Arc::clone(&self.ctx);
        let owner = Arc::downgrade(&self.handle);
        let cancel = self.handle.cancel.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = timeout(ctx.config.http_timeout, ctx.http.get(request)) => {
                    result.unwrap_or(Err(HttpError::Timeout))
                }
            };
            if let Ok(response) = &result {
                ctx.record_inbound(response.body.len(), TransportKind::Http);
            }
            deliver_http(&ctx, id, &owner, attempt, result);
        });

        FetchState::WaitingOnNetwork
    }

    fn start_datagram(&mut self, host: Host) -> FetchState {
        self.mark_network_start();
        let next_packet = self.next_packet();
        {
            let mut control = self.handle.control.lock();
            control.datagram.next_packet = next_packet;
            if control.datagram.host != Some(host) {
                control.datagram.sent_at = None;
            }
        }
        self.ctx
            .queues
            .lock()
            .enqueue(self.id, TransportKind::Datagram);
        FetchState::WaitingOnNetwork
    }

    // =========================================================================
    // WaitingOnNetwork
    // =========================================================================

    async fn wait_on_network(&mut self) -> FetchState {
        match self.transport.clone() {
            Some(Transport::Http { .. }) => self.wait_http().await,
            Some(Transport::Datagram { host }) => self.wait_datagram(host).await,
            None => FetchState::NetworkRequest,
        }
    }

    async fn wait_http(&mut self) -> FetchState {
        loop {
            let Some(event) = self.inbox.recv().await else {
                return FetchState::Cancelled;
            };
            match event {
                WorkerEvent::HttpComplete { attempt, result } if attempt == self.http_sequence => {
                    return self.on_http_complete(result);
                }
                WorkerEvent::HttpComplete { attempt, .. } => {
                    trace!(id = %self.id, attempt, "stale HTTP completion ignored");
                }
                WorkerEvent::Header { host, .. } | WorkerEvent::Packet { host, .. } => {
                    trace!(id = %self.id, %host, "datagram data ignored during HTTP fetch");
                }
                WorkerEvent::Refine => {}
            }
        }
    }

    fn on_http_complete(&mut self, result: Result<HttpResponse, HttpError>) -> FetchState {
        self.ctx.queues.lock().dequeue(self.id);

        let response = match result {
            Ok(response) => response,
            Err(e) => return self.http_failed(&e.to_string()),
        };

        let ranged = self.http_range.is_some();
        match response.status {
            HttpResponse::PARTIAL_CONTENT if ranged => {
                if response.body.is_empty() && self.buffer.is_empty() {
                    return self.http_failed("empty partial response");
                }
                let asked = self.http_range.and_then(|range| range.length);
                let short = match asked {
                    Some(length) => (response.body.len() as u64) < length,
                    None => true,
                };
                self.buffer.extend_from_slice(&response.body);
                if short {
                    self.image_size = Some(self.buffer.len());
                }
            }
            HttpResponse::OK | HttpResponse::PARTIAL_CONTENT => {
                if response.body.is_empty() {
                    return self.http_failed("empty response body");
                }
                self.buffer = BytesMut::from(&response.body[..]);
                self.image_size = Some(self.buffer.len());
            }
            HttpResponse::RANGE_NOT_SATISFIABLE if !self.buffer.is_empty() => {
                self.image_size = Some(self.buffer.len());
            }
            status => return self.http_failed(&format!("HTTP status {}", status)),
        }

        self.source = Some(TransportKind::Http);
        self.publish_progress();

        let (desired, _) = self.desired();
        if self.can_decode(self.dims(), desired) {
            self.record_download(TransportKind::Http);
            FetchState::Decode
        } else {
            self.http_attempts += 1;
            debug!(
                id = %self.id,
                held = self.buffer.len(),
                "partial HTTP response, requesting more"
            );
            FetchState::NetworkRequest
        }
    }

    fn http_failed(&mut self, reason: &str) -> FetchState {
        self.http_attempts += 1;
        self.ctx.stats.bump(Counter::HttpFailure);
        warn!(id = %self.id, attempt = self.http_attempts, reason, "HTTP fetch failed");
        FetchState::NetworkRequest
    }

    async fn wait_datagram(&mut self, host: Host) -> FetchState {
        let wait = self.ctx.config.datagram_timeout;
        let mut deadline = Deadline::now() + wait;

        loop {
            if self.datagram_ready() {
                return self.finish_datagram();
            }

            let event = match timeout_at(deadline, self.inbox.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return FetchState::Cancelled,
                Err(_) => {
                    self.datagram_attempts += 1;
                    if self.datagram_attempts >= self.ctx.config.max_datagram_attempts {
                        return self.abandon_datagram(host);
                    }
                    debug!(
                        id = %self.id,
                        %host,
                        attempt = self.datagram_attempts,
                        next_packet = self.next_packet(),
                        "datagram transfer stalled, re-requesting"
                    );
                    let next_packet = self.next_packet();
                    {
                        let mut control = self.handle.control.lock();
                        control.datagram.sent_at = None;
                        control.datagram.next_packet = next_packet;
                    }
                    deadline = Deadline::now() + wait;
                    continue;
                }
            };

            let progressed = match event {
                WorkerEvent::Header {
                    host,
                    codec,
                    packet_count,
                    total_bytes,
                    data,
                } => self.accept_header(host, codec, packet_count, total_bytes, data),
                WorkerEvent::Packet { host, packet, data } => self.accept_packet(host, packet, data),
                WorkerEvent::HttpComplete { .. } | WorkerEvent::Refine => false,
            };
            if progressed {
                deadline = Deadline::now() + wait;
            }
        }
    }

    fn datagram_ready(&self) -> bool {
        let Some(assembler) = &self.assembler else {
            return false;
        };
        if assembler.is_complete() {
            return true;
        }
        matches!(self.wanted_bytes(), Some(wanted) if assembler.contiguous_bytes() >= wanted)
    }

    fn take_assembled(&mut self) {
        if let Some(assembler) = &self.assembler {
            if assembler.contiguous_bytes() >= self.buffer.len() {
                self.buffer = BytesMut::from(&assembler.assembled()[..]);
                self.image_size = Some(assembler.total_bytes());
                self.codec = assembler.codec();
                self.source = Some(TransportKind::Datagram);
            }
        }
    }

    fn finish_datagram(&mut self) -> FetchState {
        self.ctx.queues.lock().dequeue(self.id);
        self.take_assembled();
        if self.assembler.as_ref().is_some_and(PacketAssembler::is_complete) {
            self.handle.control.lock().datagram.host = None;
        }
        self.publish_progress();
        self.record_download(TransportKind::Datagram);
        FetchState::Decode
    }

    fn abandon_datagram(&mut self, host: Host) -> FetchState {
        warn!(
            id = %self.id,
            %host,
            attempts = self.datagram_attempts,
            "datagram transfer timed out"
        );
        self.take_assembled();
        let bound = self.handle.control.lock().datagram.host.take();
        let mut queues = self.ctx.queues.lock();
        queues.dequeue(self.id);
        if let Some(bound) = bound {
            queues.request_cancel(bound, self.id);
        }
        FetchState::NetworkRequest
    }

    fn next_packet(&self) -> u16 {
        self.assembler
            .as_ref()
            .map_or(0, PacketAssembler::next_missing_packet)
    }

    fn accept_header(
        &mut self,
        host: Host,
        codec: ImageCodec,
        packet_count: u16,
        total_bytes: usize,
        data: Bytes,
    ) -> bool {
        if let Some(existing) = &self.assembler {
            if existing.total_bytes() == total_bytes && existing.packet_count() == packet_count {
                trace!(id = %self.id, %host, "duplicate image header");
                return false;
            }
        }

        match PacketAssembler::from_header(codec, packet_count, total_bytes, data) {
            Ok(assembler) => {
                self.assembler = Some(assembler);
                for (packet, chunk) in std::mem::take(&mut self.early_packets) {
                    self.insert_packet(host, packet, chunk);
                }
                let next_packet = self.next_packet();
                {
                    let mut control = self.handle.control.lock();
                    control.datagram.host = Some(host);
                    control.datagram.next_packet = next_packet;
                }
                self.publish_progress();
                true
            }
            Err(e) => {
                self.ctx.stats.bump(Counter::BadPacket);
                debug!(id = %self.id, %host, error = %e, "rejected image header");
                false
            }
        }
    }

    fn accept_packet(&mut self, host: Host, packet: u16, data: Bytes) -> bool {
        let progressed = self.insert_packet(host, packet, data);
        if progressed {
            let next_packet = self.next_packet();
            self.handle.control.lock().datagram.next_packet = next_packet;
            self.publish_progress();
        }
        progressed
    }

    fn insert_packet(&mut self, host: Host, packet: u16, data: Bytes) -> bool {
        let Some(assembler) = self.assembler.as_mut() else {
            if self.early_packets.len() < self.ctx.config.max_early_packets {
                self.early_packets.push((packet, data));
            } else {
                self.ctx.stats.bump(Counter::BadPacket);
                debug!(id = %self.id, %host, packet, "early packet dropped");
            }
            return false;
        };

        match assembler.insert(packet, data) {
            Ok(fresh) => fresh,
            Err(e) => {
                self.ctx.stats.bump(Counter::BadPacket);
                debug!(id = %self.id, %host, error = %e, "rejected image packet");
                false
            }
        }
    }

    // =========================================================================
    // Decode / WriteCache
    // =========================================================================

    async fn decode(&mut self) -> FetchState {
        let Some(discard) = self.decodable_discard() else {
            return FetchState::NetworkRequest;
        };
        let (priority, needs_aux) = {
            let control = self.handle.control.lock();
            (control.request.priority, control.request.needs_aux)
        };
        let data = Bytes::copy_from_slice(&self.buffer);

        let result = {
            let _permit = self.ctx.decode_slots.acquire(priority).await;
            self.ctx
                .decoder
                .decode(self.id, self.codec, data, discard, needs_aux)
                .await
        };

        match result {
            Ok(image) => {
                trace!(
                    id = %self.id,
                    discard,
                    width = image.raw.width,
                    height = image.raw.height,
                    "decoded"
                );
                self.decoded = Some(image);
                FetchState::WriteCache
            }
            Err(e) if self.source == Some(TransportKind::Cache) => {
                self.ctx.stats.bump(Counter::DecodeFailure);
                self.invalidate_cache(&e.to_string()).await;
                FetchState::NetworkRequest
            }
            Err(e) => {
                self.ctx.stats.bump(Counter::DecodeFailure);
                self.decode_attempts += 1;
                warn!(
                    id = %self.id,
                    attempt = self.decode_attempts,
                    error = %e,
                    "decode of network data failed"
                );
                if self.decode_attempts >= self.ctx.config.max_decode_attempts {
                    self.finish(FetchOutcome::Failed(FetchFailure::DecodeFailed(e)))
                } else {
                    self.reset_buffer();
                    FetchState::NetworkRequest
                }
            }
        }
    }

    async fn write_cache(&mut self) -> FetchState {
        if matches!(
            self.source,
            Some(TransportKind::Http | TransportKind::Datagram)
        ) {
            let entry = CachedImage::new(Bytes::copy_from_slice(&self.buffer), self.image_size);
            match timeout(self.ctx.config.cache_timeout, self.ctx.cache.store(self.id, entry)).await {
                Ok(Ok(())) => trace!(id = %self.id, bytes = self.buffer.len(), "cached"),
                Ok(Err(e)) => warn!(id = %self.id, error = %e, "cache write failed"),
                Err(_) => warn!(id = %self.id, "cache write timed out"),
            }
        }

        match self.decoded.take() {
            Some(image) => self.finish(FetchOutcome::Decoded(image)),
            None => FetchState::Decode,
        }
    }

    // =========================================================================
    // Done / Failed
    // =========================================================================

    fn finish(&mut self, outcome: FetchOutcome) -> FetchState {
        let state = if outcome.is_decoded() {
            FetchState::Done
        } else {
            FetchState::Failed
        };

        match &outcome {
            FetchOutcome::Decoded(image) => {
                self.delivered = Some((image.discard, image.aux.is_some()));
                debug!(
                    id = %self.id,
                    discard = image.discard,
                    width = image.raw.width,
                    height = image.raw.height,
                    "fetch complete"
                );
            }
            FetchOutcome::Failed(failure) => {
                warn!(id = %self.id, reason = %failure, "fetch failed");
            }
        }

        {
            let mut control = self.handle.control.lock();
            if control.state == FetchState::Cancelled {
                return FetchState::Cancelled;
            }
            control.delivered_discard = self.delivered.map(|(discard, _)| discard);
            // A merge that landed mid-flight may already be satisfied.
            if let (FetchState::Done, Some((discard, has_aux))) = (state, self.delivered) {
                let request = &control.request;
                if discard <= request.discard && (has_aux || !request.needs_aux) {
                    control.refine_pending = false;
                }
            }
            control.result = Some(outcome);
            control.state = state;
            control.transport = None;
        }

        self.transport = None;
        self.ctx.stats.bump(if state == FetchState::Done {
            Counter::Completed
        } else {
            Counter::Failed
        });
        self.ctx.notify(self.id, state);
        state
    }

    /// Wait in a terminal state until a merge asks for more.
    async fn park(&mut self) -> Option<FetchState> {
        loop {
            if let Some(next) = self.refinement() {
                return Some(next);
            }
            match self.inbox.recv().await? {
                WorkerEvent::Header {
                    host,
                    codec,
                    packet_count,
                    total_bytes,
                    data,
                } => {
                    self.accept_header(host, codec, packet_count, total_bytes, data);
                }
                WorkerEvent::Packet { host, packet, data } => {
                    self.accept_packet(host, packet, data);
                }
                WorkerEvent::HttpComplete { .. } | WorkerEvent::Refine => {}
            }
        }
    }

    /// Pick up a pending merge. Returns the state to resume in, if any.
    fn refinement(&mut self) -> Option<FetchState> {
        let mut control = self.handle.control.lock();
        if !control.refine_pending {
            return None;
        }
        control.refine_pending = false;

        let request = &control.request;
        let desired = request.discard;
        let dims = (request.width, request.height, request.components);
        let wants_more = match (control.state, self.delivered) {
            (FetchState::Done, Some((done, has_aux))) => {
                desired < done || (request.needs_aux && !has_aux)
            }
            (FetchState::Failed, _) => true,
            _ => false,
        };
        if !wants_more {
            return None;
        }

        let next = if control.state == FetchState::Failed {
            FetchState::Init
        } else if self.can_decode(dims, desired) {
            FetchState::Decode
        } else {
            FetchState::NetworkRequest
        };
        control.state = next;
        drop(control);

        self.http_attempts = 0;
        self.datagram_attempts = 0;
        self.decode_attempts = 0;
        debug!(id = %self.id, desired, %next, "refining fetch");
        self.ctx.notify(self.id, next);
        Some(next)
    }
}

/// Route an HTTP completion back to the worker that issued it.
///
/// The worker is found by identity in the request table; a replacement
/// worker created under the same identity does not receive it.
fn deliver_http(
    ctx: &FetchContext,
    id: ImageId,
    owner: &Weak<WorkerHandle>,
    attempt: u32,
    result: Result<HttpResponse, HttpError>,
) {
    let delivered = ctx
        .worker(id)
        .filter(|live| std::ptr::eq(Arc::as_ptr(live), owner.as_ptr()))
        .is_some_and(|live| live.post(WorkerEvent::HttpComplete { attempt, result }));
    if !delivered {
        trace!(%id, attempt, "HTTP completion for retired worker dropped");
    }
}
